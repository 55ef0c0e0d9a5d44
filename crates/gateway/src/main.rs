//! # LoRa Gateway
//!
//! Recebe frames de telemetria dos sensores via LoRa, converte para JSON e
//! publica no broker MQTT (TLS com certificado do dispositivo). Mensagens que
//! não puderam ser entregues ficam em fila até a conexão voltar.
//!
//! ## Uso
//! ```bash
//! lora_gateway                            # config.toml ao lado do executável
//! lora_gateway --config /etc/gateway.toml
//! ```

mod mqtt;
mod mqtt_packet;
mod radio;
mod tls;

use gateway_core::config::AppConfig;
use gateway_core::gateway::Gateway;
use mqtt::{MqttSettings, MqttTransport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Falhas que impedem o gateway de iniciar.
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("Configuração inválida:\n  - {}", .0.join("\n  - "))]
    InvalidConfig(Vec<String>),

    #[error("Material TLS: {0}")]
    Tls(#[from] tls::TlsError),

    #[error("Falha ao iniciar a thread do rádio: {0}")]
    Radio(#[from] std::io::Error),

    #[error("Argumento inválido: {0}")]
    Usage(String),
}

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), StartupError> {
    // ── Carregar config ──
    let config_path = config_path_from_args(std::env::args().skip(1))?;
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(StartupError::InvalidConfig(errors));
    }

    // ── TLS ──
    let broker = &config.broker;
    let tls = tls::load_client_config(
        Path::new(&broker.ca_cert_path),
        Path::new(&broker.client_cert_path),
        Path::new(&broker.client_key_path),
    )?;
    info!("Certificados TLS carregados");

    // ── Rádio ──
    let radio = radio::spawn_radio_thread(
        config.radio.bind_ip.clone(),
        config.radio.port,
        config.radio.channel_capacity,
    )?;

    // ── Gateway ──
    let transport = MqttTransport::new(MqttSettings::from_config(broker), tls);
    let mut gateway = Gateway::from_config(&config, radio, transport);

    // ── Banner ──
    let capacity = match config.buffer.max_messages {
        0 => "sem limite".to_string(),
        n => n.to_string(),
    };
    println!();
    println!("══════════════════════════════════════════════");
    println!("   📡 LORA GATEWAY – ATIVO (Rust)");
    println!("══════════════════════════════════════════════");
    println!("  Endereço:  0x{:02X}", config.radio.self_address);
    println!("  Rádio:     udp://{}:{}", config.radio.bind_ip, config.radio.port);
    println!("  Broker:    mqtts://{}:{}", broker.host, broker.port);
    println!("  Tópico:    {}", broker.topic);
    println!("  Fila:      {capacity} ({:?})", config.buffer.overflow);
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop principal ──
    let interval = Duration::from_millis(config.gateway.cycle_interval_ms);
    let stats_interval = Duration::from_secs(config.gateway.stats_interval_secs);
    let mut last_stats = Instant::now();

    loop {
        let cycle_start = Instant::now();

        gateway.cycle_at(cycle_start);

        if !stats_interval.is_zero() && last_stats.elapsed() >= stats_interval {
            info!("{}", gateway.stats_line());
            last_stats = Instant::now();
        }

        // Dormir pelo tempo restante do intervalo
        let elapsed = cycle_start.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
}

/// `--config <caminho>`; sem argumento usa o config.toml ao lado do executável.
fn config_path_from_args(mut args: impl Iterator<Item = String>) -> Result<PathBuf, StartupError> {
    match args.next().as_deref() {
        None => Ok(AppConfig::default_path()),
        Some("--config" | "-c") => args
            .next()
            .map(PathBuf::from)
            .ok_or_else(|| StartupError::Usage("--config exige um caminho".into())),
        Some(other) => Err(StartupError::Usage(other.to_string())),
    }
}
