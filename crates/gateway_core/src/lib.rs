//! # Gateway Core
//!
//! Pipeline de entrega do gateway LoRa → MQTT: recebe frames endereçados,
//! valida o protocolo de telemetria, codifica em JSON e entrega ao broker,
//! mantendo as mensagens em buffer enquanto o link estiver fora.
//!
//! ## Módulos
//! - [`types`] – Frame, registro de telemetria, mensagem em buffer
//! - [`protocol`] – Datagrama binário da ponte LoRa (bincode com magic byte)
//! - [`filter`] – Filtro de endereço (próprio ou broadcast)
//! - [`parser`] – Parser `Solo=..,Umidade=..,Inclinacao=..`
//! - [`codec`] – JSON de saída para o broker
//! - [`buffer`] – Fila FIFO com limite e política de overflow
//! - [`supervisor`] – Máquina de estados da conexão e trait [`Transport`]
//! - [`gateway`] – Orquestrador do ciclo
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod filter;
pub mod parser;
pub mod codec;
pub mod buffer;
pub mod supervisor;
pub mod gateway;
pub mod config;

// Re-exports convenientes
pub use types::{BufferedMessage, LinkQuality, RadioFrame, ReceivedFrame, TelemetryRecord};
pub use protocol::{decode_datagram, encode_datagram, PROTOCOL_VERSION};
pub use buffer::{DeliveryBuffer, OverflowPolicy};
pub use supervisor::{ConnectProgress, ConnectionState, ConnectionSupervisor, Transport, TransportError};
pub use gateway::{FrameSource, Gateway};
pub use config::AppConfig;
