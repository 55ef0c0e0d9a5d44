//! Tipos do pipeline de entrega.
//!
//! Um [`RadioFrame`] vive apenas durante um ciclo do gateway; o
//! [`TelemetryRecord`] é imutável depois de criado pelo parser; o
//! [`BufferedMessage`] só deixa o buffer quando o broker confirma a entrega.

use serde::Serialize;

/// Endereço reservado de broadcast, aceito por qualquer gateway.
pub const BROADCAST_ADDRESS: u8 = 0xFF;

// ──────────────────────────────────────────────
// Rádio
// ──────────────────────────────────────────────

/// Frame endereçado recebido pelo enlace LoRa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioFrame {
    /// Primeiro byte do frame (endereço do remetente)
    pub sender_address: u8,
    /// Restante do frame (texto ASCII)
    pub payload: Vec<u8>,
}

impl RadioFrame {
    pub fn new(sender_address: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            sender_address,
            payload: payload.into(),
        }
    }

    /// Monta um frame a partir dos bytes crus: `[endereço][payload...]`.
    ///
    /// Retorna `None` para um frame vazio.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&sender_address, payload) = bytes.split_first()?;
        Some(Self {
            sender_address,
            payload: payload.to_vec(),
        })
    }
}

/// Qualidade do enlace reportada pelo rádio para um frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkQuality {
    /// Intensidade do sinal recebido (dBm)
    pub rssi: i32,
    /// Relação sinal/ruído (dB)
    pub snr: f32,
}

/// Frame acompanhado dos metadados de enlace entregues pelo rádio.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFrame {
    pub frame: RadioFrame,
    pub link: LinkQuality,
}

// ──────────────────────────────────────────────
// Telemetria
// ──────────────────────────────────────────────

/// Leituras de um sensor extraídas de um frame válido.
///
/// Os valores são mantidos como texto, exatamente como chegaram pelo rádio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub sender: u8,
    #[serde(rename = "solo")]
    pub soil: String,
    #[serde(rename = "umidade")]
    pub humidity: String,
    #[serde(rename = "inclinacao")]
    pub tilt: String,
    pub rssi: i32,
    pub snr: f32,
}

// ──────────────────────────────────────────────
// Buffer
// ──────────────────────────────────────────────

/// Mensagem serializada aguardando envio ao broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedMessage {
    /// Número de sequência monotônico, atribuído no enqueue
    pub sequence: u64,
    /// Payload serializado (opaco para o buffer)
    pub payload: Vec<u8>,
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
