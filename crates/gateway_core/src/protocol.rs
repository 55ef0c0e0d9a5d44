//! Protocolo do datagrama rádio → gateway.
//!
//! A ponte LoRa (colaborador externo que controla o rádio) encaminha cada
//! pacote recebido via UDP, junto com RSSI e SNR medidos pelo rádio:
//!
//! ```text
//! ┌──────────┬─────────┬──────────────────────────────┐
//! │ Magic(1) │ Ver.(1) │ bincode(RadioDatagram) (N)   │
//! └──────────┴─────────┴──────────────────────────────┘
//! ```
//!
//! - Magic byte `0x4C` ('L') identifica datagramas da ponte LoRa
//! - Versão do protocolo (1 byte)
//! - `RadioDatagram` = RSSI + SNR + bytes crus do frame LoRa
//!
//! O frame segue exatamente como saiu do rádio: `[endereço][payload...]`,
//! separado por [`RadioFrame::from_bytes`].

use crate::types::{LinkQuality, RadioFrame, ReceivedFrame};
use serde::{Deserialize, Serialize};

/// Magic byte que identifica datagramas da ponte LoRa.
pub const MAGIC_BYTE: u8 = 0x4C; // 'L'

/// Versão atual do protocolo.
pub const PROTOCOL_VERSION: u8 = 1;

/// Tamanho do header (magic + version).
const HEADER_SIZE: usize = 2;

/// Maior payload LoRa (SX127x FIFO) mais folga para header e metadados.
pub const MAX_DATAGRAM_SIZE: usize = 512;

/// Erros do protocolo.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Datagrama muito curto ({0} bytes, mínimo {HEADER_SIZE})")]
    TooShort(usize),

    #[error("Magic byte inválido: 0x{0:02X} (esperado 0x{MAGIC_BYTE:02X})")]
    InvalidMagic(u8),

    #[error("Versão incompatível: {0} (suportada: {PROTOCOL_VERSION})")]
    VersionMismatch(u8),

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),

    #[error("Frame LoRa vazio (sem byte de endereço)")]
    EmptyFrame,
}

/// Corpo do datagrama, como visto no fio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RadioDatagram {
    rssi: i32,
    snr: f32,
    frame: Vec<u8>,
}

/// Codifica um frame recebido para envio pela ponte LoRa.
pub fn encode_datagram(received: &ReceivedFrame) -> Result<Vec<u8>, ProtocolError> {
    let mut frame = Vec::with_capacity(1 + received.frame.payload.len());
    frame.push(received.frame.sender_address);
    frame.extend_from_slice(&received.frame.payload);

    let datagram = RadioDatagram {
        rssi: received.link.rssi,
        snr: received.link.snr,
        frame,
    };
    let body =
        bincode::serialize(&datagram).map_err(|e| ProtocolError::Serialize(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
    out.push(MAGIC_BYTE);
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);

    Ok(out)
}

/// Decodifica um datagrama recebido via UDP em [`ReceivedFrame`].
///
/// Valida magic byte e versão antes de deserializar.
pub fn decode_datagram(data: &[u8]) -> Result<ReceivedFrame, ProtocolError> {
    if data.len() < HEADER_SIZE {
        return Err(ProtocolError::TooShort(data.len()));
    }

    let magic = data[0];
    if magic != MAGIC_BYTE {
        return Err(ProtocolError::InvalidMagic(magic));
    }

    let version = data[1];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch(version));
    }

    let datagram: RadioDatagram = bincode::deserialize(&data[HEADER_SIZE..])
        .map_err(|e| ProtocolError::Deserialize(e.to_string()))?;

    let frame = RadioFrame::from_bytes(&datagram.frame).ok_or(ProtocolError::EmptyFrame)?;

    Ok(ReceivedFrame {
        frame,
        link: LinkQuality {
            rssi: datagram.rssi,
            snr: datagram.snr,
        },
    })
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> ReceivedFrame {
        ReceivedFrame {
            frame: RadioFrame::new(0x01, "Solo=12,Umidade=55,Inclinacao=3"),
            link: LinkQuality {
                rssi: -80,
                snr: 7.5,
            },
        }
    }

    #[test]
    fn link_quality_survives_the_wire() {
        let original = sample_frame();
        let encoded = encode_datagram(&original).unwrap();
        let decoded = decode_datagram(&encoded).unwrap();
        assert_eq!(decoded.link.rssi, -80);
        assert_eq!(decoded.link.snr, 7.5);
        assert_eq!(decoded, original);
    }

    #[test]
    fn header_is_correct() {
        let encoded = encode_datagram(&sample_frame()).unwrap();
        assert_eq!(encoded[0], MAGIC_BYTE);
        assert_eq!(encoded[1], PROTOCOL_VERSION);
        assert!(encoded.len() < MAX_DATAGRAM_SIZE);
    }

    #[test]
    fn rejects_invalid_magic() {
        let mut encoded = encode_datagram(&sample_frame()).unwrap();
        encoded[0] = 0x54;
        assert!(matches!(
            decode_datagram(&encoded),
            Err(ProtocolError::InvalidMagic(0x54))
        ));
    }

    #[test]
    fn rejects_short_datagram() {
        assert!(matches!(
            decode_datagram(&[MAGIC_BYTE]),
            Err(ProtocolError::TooShort(1))
        ));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut encoded = encode_datagram(&sample_frame()).unwrap();
        encoded[1] = 9;
        assert!(matches!(
            decode_datagram(&encoded),
            Err(ProtocolError::VersionMismatch(9))
        ));
    }

    #[test]
    fn raw_frame_first_byte_is_the_address() {
        let body = bincode::serialize(&RadioDatagram {
            rssi: -100,
            snr: 1.0,
            frame: b"\xFFSolo=1,Umidade=2,Inclinacao=3".to_vec(),
        })
        .unwrap();
        let mut datagram = vec![MAGIC_BYTE, PROTOCOL_VERSION];
        datagram.extend_from_slice(&body);

        let decoded = decode_datagram(&datagram).unwrap();
        assert_eq!(decoded.frame.sender_address, 0xFF);
        assert_eq!(decoded.frame.payload, b"Solo=1,Umidade=2,Inclinacao=3");
    }

    #[test]
    fn empty_frame_is_rejected() {
        let body = bincode::serialize(&RadioDatagram {
            rssi: -100,
            snr: 1.0,
            frame: Vec::new(),
        })
        .unwrap();
        let mut datagram = vec![MAGIC_BYTE, PROTOCOL_VERSION];
        datagram.extend_from_slice(&body);

        assert!(matches!(
            decode_datagram(&datagram),
            Err(ProtocolError::EmptyFrame)
        ));
    }

    #[test]
    fn truncated_body_fails_to_deserialize() {
        let encoded = encode_datagram(&sample_frame()).unwrap();
        let truncated = &encoded[..encoded.len() - 4];
        assert!(matches!(
            decode_datagram(truncated),
            Err(ProtocolError::Deserialize(_))
        ));
    }
}
