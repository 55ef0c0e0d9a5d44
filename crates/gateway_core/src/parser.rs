//! Parser do protocolo de telemetria dos sensores.
//!
//! O payload é uma sequência de tokens `chave=valor` separados por vírgula:
//!
//! ```text
//! Solo=12,Umidade=55,Inclinacao=3
//! ```
//!
//! - As chaves obrigatórias são `Solo`, `Umidade` e `Inclinacao`
//! - A ordem dos campos não é fixa e campos desconhecidos são ignorados
//! - Se uma chave se repetir vale a primeira ocorrência
//!   (ver [`duplicate_keys`] para reportar a repetição)

use crate::types::{LinkQuality, TelemetryRecord};
use serde::{Deserialize, Serialize};

pub const KEY_SOIL: &str = "Solo";
pub const KEY_HUMIDITY: &str = "Umidade";
pub const KEY_TILT: &str = "Inclinacao";

/// Chaves obrigatórias, na ordem em que são verificadas.
pub const REQUIRED_KEYS: [&str; 3] = [KEY_SOIL, KEY_HUMIDITY, KEY_TILT];

/// Erros de parsing do payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Campo obrigatório ausente: {0}")]
    MissingField(&'static str),

    #[error("Valor inválido para {key}: {value:?}")]
    MalformedValue { key: &'static str, value: String },

    #[error("Payload não é texto UTF-8")]
    NotText,
}

/// Como os valores dos campos são validados.
///
/// Em ambos os modos o texto original segue inalterado para o broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueMode {
    /// Aceita qualquer texto não vazio
    #[default]
    Text,
    /// Exige um número decimal finito
    Numeric,
}

/// Converte o payload textual de um frame em [`TelemetryRecord`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryParser {
    mode: ValueMode,
}

impl TelemetryParser {
    pub fn new(mode: ValueMode) -> Self {
        Self { mode }
    }

    /// Faz o parsing dos bytes crus de um frame.
    pub fn parse_bytes(
        &self,
        sender: u8,
        payload: &[u8],
        link: LinkQuality,
    ) -> Result<TelemetryRecord, ParseError> {
        let text = std::str::from_utf8(payload).map_err(|_| ParseError::NotText)?;
        self.parse(sender, text, link)
    }

    /// Faz o parsing do payload textual.
    pub fn parse(
        &self,
        sender: u8,
        payload: &str,
        link: LinkQuality,
    ) -> Result<TelemetryRecord, ParseError> {
        let payload = trim_payload(payload);

        let soil = self.required(payload, KEY_SOIL)?;
        let humidity = self.required(payload, KEY_HUMIDITY)?;
        let tilt = self.required(payload, KEY_TILT)?;

        Ok(TelemetryRecord {
            sender,
            soil,
            humidity,
            tilt,
            rssi: link.rssi,
            snr: link.snr,
        })
    }

    fn required(&self, payload: &str, key: &'static str) -> Result<String, ParseError> {
        let value = find_value(payload, key).ok_or(ParseError::MissingField(key))?;

        let valid = match self.mode {
            ValueMode::Text => !value.is_empty(),
            ValueMode::Numeric => value.parse::<f64>().is_ok_and(f64::is_finite),
        };
        if !valid {
            return Err(ParseError::MalformedValue {
                key,
                value: value.to_string(),
            });
        }

        Ok(value.to_string())
    }
}

/// Retorna as chaves obrigatórias que aparecem mais de uma vez no payload.
pub fn duplicate_keys(payload: &str) -> Vec<&'static str> {
    REQUIRED_KEYS
        .into_iter()
        .filter(|key| tokens(payload).filter(|(k, _)| k == key).count() > 1)
        .collect()
}

/// Primeira ocorrência de `key`.
fn find_value<'a>(payload: &'a str, key: &str) -> Option<&'a str> {
    tokens(payload).find(|(k, _)| *k == key).map(|(_, v)| v)
}

/// Tokens `chave=valor`; tokens sem `=` são ignorados.
///
/// O valor vai do primeiro `=` até a próxima vírgula, sem aparar espaços.
fn tokens(payload: &str) -> impl Iterator<Item = (&str, &str)> {
    payload
        .split(',')
        .filter_map(|token| token.split_once('='))
}

/// Remove o padding de alguns módulos de rádio (`\r\n`, NUL).
fn trim_payload(payload: &str) -> &str {
    payload.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0')
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
