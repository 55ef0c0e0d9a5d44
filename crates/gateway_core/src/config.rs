//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável; seções ausentes usam os
//! valores padrão.

use crate::buffer::OverflowPolicy;
use crate::parser::ValueMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Rádio: de onde chegam os frames e quem é este gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Endereço deste gateway no enlace LoRa
    pub self_address: u8,
    /// IP local para escutar os datagramas da ponte LoRa
    pub bind_ip: String,
    /// Porta UDP da ponte LoRa
    pub port: u16,
    /// Frames aguardando o loop principal (excedentes são descartados)
    pub channel_capacity: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            self_address: 0x01,
            bind_ip: "127.0.0.1".into(),
            port: 1700,
            channel_capacity: 64,
        }
    }
}

/// Broker MQTT e material TLS do dispositivo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Hostname do broker (também usado no SNI)
    pub host: String,
    /// Porta TLS
    pub port: u16,
    /// ID do cliente MQTT (nome do dispositivo)
    pub client_id: String,
    /// Tópico de destino da telemetria
    pub topic: String,
    /// Intervalo de keep-alive MQTT (segundos)
    pub keep_alive_secs: u16,
    /// Limite para TCP connect + handshake TLS + CONNACK (segundos)
    pub connect_timeout_secs: f64,
    /// Espera máxima por uma leitura/escrita no socket (ms)
    pub io_timeout_ms: u64,
    /// Espera máxima pelo PUBACK (ms)
    pub ack_timeout_ms: u64,
    /// Intervalo entre tentativas de conexão (segundos)
    pub retry_backoff_secs: f64,
    /// Certificado da CA raiz (PEM)
    pub ca_cert_path: String,
    /// Certificado do dispositivo (PEM)
    pub client_cert_path: String,
    /// Chave privada do dispositivo (PEM)
    pub client_key_path: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8883,
            client_id: "lora-gateway".into(),
            topic: "diegohat/lora".into(),
            keep_alive_secs: 15,
            connect_timeout_secs: 5.0,
            io_timeout_ms: 50,
            ack_timeout_ms: 2000,
            retry_backoff_secs: 5.0,
            ca_cert_path: "certs/AmazonRootCA1.pem".into(),
            client_cert_path: "certs/device.pem.crt".into(),
            client_key_path: "certs/private.pem.key".into(),
        }
    }
}

/// Buffer de mensagens não entregues.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Capacidade em mensagens (0 = sem limite)
    pub max_messages: usize,
    /// "drop_oldest", "drop_newest" ou "reject"
    pub overflow: OverflowPolicy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_messages: 1000,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Validação dos valores de telemetria.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// "text" (valor cru) ou "numeric" (exige número)
    pub value_mode: ValueMode,
}

/// Loop principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Pausa entre ciclos (ms)
    pub cycle_interval_ms: u64,
    /// Intervalo do log de estatísticas (segundos, 0 = desligado)
    pub stats_interval_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 10,
            stats_interval_secs: 60,
        }
    }
}

/// Configuração raiz do gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub radio: RadioConfig,
    pub broker: BrokerConfig,
    pub buffer: BufferConfig,
    pub parser: ParserConfig,
    pub gateway: LoopConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.radio.port == 0 {
            errors.push("Porta do rádio não pode ser 0".into());
        }
        if self.radio.channel_capacity == 0 {
            errors.push("Capacidade do channel do rádio não pode ser 0".into());
        }
        if self.broker.host.trim().is_empty() {
            errors.push("Host do broker não configurado".into());
        }
        if self.broker.port == 0 {
            errors.push("Porta do broker não pode ser 0".into());
        }
        if self.broker.client_id.is_empty() || self.broker.client_id.len() > 23 {
            // MQTT 3.1.1 §3.1.3.1: brokers só são obrigados a aceitar 1–23 bytes
            errors.push(format!(
                "ID do cliente inválido: {:?} (1–23 caracteres)",
                self.broker.client_id
            ));
        }
        if self.broker.topic.is_empty() || self.broker.topic.contains(['+', '#']) {
            errors.push(format!(
                "Tópico inválido: {:?} (não pode ser vazio nem conter curingas)",
                self.broker.topic
            ));
        }
        if !(0.5..=60.0).contains(&self.broker.connect_timeout_secs) {
            errors.push(format!(
                "Timeout de conexão inválido: {} (0.5–60.0)",
                self.broker.connect_timeout_secs
            ));
        }
        if self.broker.io_timeout_ms == 0 || self.broker.io_timeout_ms > 1000 {
            errors.push(format!(
                "Timeout de I/O inválido: {} ms (1–1000)",
                self.broker.io_timeout_ms
            ));
        }
        if self.broker.ack_timeout_ms == 0 {
            errors.push("Timeout do PUBACK não pode ser 0".into());
        }
        if !(0.1..=3600.0).contains(&self.broker.retry_backoff_secs) {
            errors.push(format!(
                "Intervalo de reconexão inválido: {} (0.1–3600.0)",
                self.broker.retry_backoff_secs
            ));
        }
        if self.gateway.cycle_interval_ms > 1000 {
            errors.push(format!(
                "Intervalo do ciclo inválido: {} ms (0–1000)",
                self.gateway.cycle_interval_ms
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> AppConfig {
        let mut config = AppConfig::default();
        config.broker.host = "example-ats.iot.us-east-1.amazonaws.com".into();
        config
    }

    #[test]
    fn configured_defaults_are_valid() {
        let errors = configured().validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn missing_broker_host_is_reported() {
        let errors = AppConfig::default().validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Host"));
    }

    #[test]
    fn wildcard_topic_is_rejected() {
        let mut config = configured();
        config.broker.topic = "sensores/#".into();
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn long_client_id_is_rejected() {
        let mut config = configured();
        config.broker.client_id = "x".repeat(24);
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn nan_durations_are_rejected() {
        let config: AppConfig = toml::from_str(
            "[broker]\nhost = \"b\"\nretry_backoff_secs = nan\nconnect_timeout_secs = nan\n",
        )
        .unwrap();
        let errors = config.validate();
        assert_eq!(errors.len(), 2, "Erros: {:?}", errors);
        assert!(errors.iter().any(|e| e.starts_with("Timeout de conexão")));
        assert!(errors.iter().any(|e| e.starts_with("Intervalo de reconexão")));
    }

    #[test]
    fn infinite_backoff_is_rejected() {
        let mut config = configured();
        config.broker.retry_backoff_secs = f64::INFINITY;
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn roundtrip_toml() {
        let config = configured();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.broker.host, parsed.broker.host);
        assert_eq!(config.buffer.overflow, parsed.buffer.overflow);
        assert_eq!(config.radio.self_address, parsed.radio.self_address);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[radio]
self_address = 7

[buffer]
overflow = "reject"

[parser]
value_mode = "numeric"
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.radio.self_address, 7);
        assert_eq!(config.buffer.overflow, OverflowPolicy::Reject);
        assert_eq!(config.parser.value_mode, ValueMode::Numeric);
        // Outros campos devem ter valor padrão
        assert_eq!(config.radio.port, 1700);
        assert_eq!(config.buffer.max_messages, 1000);
        assert_eq!(config.broker.port, 8883);
    }

    #[test]
    fn unknown_overflow_policy_fails() {
        let bad = "[buffer]\noverflow = \"drop_random\"\n";
        assert!(toml::from_str::<AppConfig>(bad).is_err());
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load(Path::new("/nao/existe/config.toml"));
        assert_eq!(config.broker.topic, "diegohat/lora");
    }
}
