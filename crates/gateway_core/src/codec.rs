//! Codificação da telemetria para o broker.
//!
//! Os assinantes do tópico dependem dos nomes exatos dos campos:
//!
//! ```json
//! {"sender":1,"solo":"12","umidade":"55","inclinacao":"3","rssi":-80,"snr":7.5}
//! ```
//!
//! A ordem das chaves segue a declaração de [`TelemetryRecord`], então a
//! mesma leitura sempre gera os mesmos bytes.

use crate::types::TelemetryRecord;

/// Codifica um registro como JSON compacto.
///
/// Um `snr` não finito vira `null`.
pub fn encode_record(record: &TelemetryRecord) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample() -> TelemetryRecord {
        TelemetryRecord {
            sender: 1,
            soil: "12".into(),
            humidity: "55".into(),
            tilt: "3".into(),
            rssi: -80,
            snr: 7.5,
        }
    }

    #[test]
    fn encodes_exact_field_set() {
        let encoded = encode_record(&sample()).unwrap();
        let decoded: Value = serde_json::from_slice(&encoded).unwrap();
        let obj = decoded.as_object().unwrap();

        assert_eq!(obj.len(), 6);
        assert_eq!(obj["sender"], 1);
        assert_eq!(obj["solo"], "12");
        assert_eq!(obj["umidade"], "55");
        assert_eq!(obj["inclinacao"], "3");
        assert_eq!(obj["rssi"], -80);
        assert_eq!(obj["snr"], 7.5);
    }

    #[test]
    fn encoding_is_deterministic() {
        let record = sample();
        let first = encode_record(&record).unwrap();
        for _ in 0..10 {
            assert_eq!(encode_record(&record).unwrap(), first);
        }
    }

    #[test]
    fn key_order_is_stable() {
        let encoded = String::from_utf8(encode_record(&sample()).unwrap()).unwrap();
        assert_eq!(
            encoded,
            r#"{"sender":1,"solo":"12","umidade":"55","inclinacao":"3","rssi":-80,"snr":7.5}"#
        );
    }

    #[test]
    fn values_with_quotes_are_escaped() {
        let record = TelemetryRecord {
            soil: "1\"2".into(),
            ..sample()
        };
        let decoded: Value = serde_json::from_slice(&encode_record(&record).unwrap()).unwrap();
        assert_eq!(decoded["solo"], "1\"2");
    }

    #[test]
    fn non_finite_snr_is_null() {
        let record = TelemetryRecord {
            snr: f32::NAN,
            ..sample()
        };
        let decoded: Value = serde_json::from_slice(&encode_record(&record).unwrap()).unwrap();
        assert!(decoded["snr"].is_null());
    }
}
