//! Cliente MQTT sobre TLS, implementando o [`Transport`] do supervisor.
//!
//! A conexão é dividida em fases, cada uma avançada por uma chamada de
//! `poll_connect` e limitada pelos timeouts do socket:
//!
//! 1. `begin_connect`: resolução + TCP connect (`connect_timeout`)
//! 2. handshake TLS (mTLS com o certificado do dispositivo)
//! 3. CONNECT → CONNACK
//!
//! Publicações usam QoS 1: a entrega só conta quando o broker responde PUBACK.

use crate::mqtt_packet::{self, Incoming};
use gateway_core::config::BrokerConfig;
use gateway_core::supervisor::{ConnectProgress, Transport, TransportError};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, StreamOwned};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Parâmetros da conexão com o broker.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub ack_timeout: Duration,
}

impl MqttSettings {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            client_id: config.client_id.clone(),
            topic: config.topic.clone(),
            keep_alive: Duration::from_secs(config.keep_alive_secs.into()),
            connect_timeout: Duration::from_secs_f64(config.connect_timeout_secs),
            io_timeout: Duration::from_millis(config.io_timeout_ms),
            ack_timeout: Duration::from_millis(config.ack_timeout_ms),
        }
    }
}

// ──────────────────────────────────────────────
// Sessão MQTT (independente do socket)
// ──────────────────────────────────────────────

/// Sessão MQTT sobre um stream já estabelecido.
///
/// Leituras que retornam `WouldBlock`/`TimedOut` significam "nada por enquanto".
pub struct MqttSession<S> {
    stream: S,
    inbox: Vec<u8>,
    next_packet_id: u16,
    keep_alive: Duration,
    ack_timeout: Duration,
    last_sent: Instant,
    ping_sent: Option<Instant>,
}

impl<S: Read + Write> MqttSession<S> {
    pub fn new(stream: S, keep_alive: Duration, ack_timeout: Duration) -> Self {
        Self {
            stream,
            inbox: Vec::new(),
            next_packet_id: 0,
            keep_alive,
            ack_timeout,
            last_sent: Instant::now(),
            ping_sent: None,
        }
    }

    pub fn send_connect(&mut self, client_id: &str) -> Result<(), TransportError> {
        let keep_alive = u16::try_from(self.keep_alive.as_secs()).unwrap_or(u16::MAX);
        let packet = mqtt_packet::encode_connect(client_id, keep_alive).map_err(protocol_error)?;
        self.write_packet(&packet)
    }

    /// `true` quando o CONNACK de aceite chegou.
    pub fn poll_connack(&mut self) -> Result<bool, TransportError> {
        match self.read_packet()? {
            None => Ok(false),
            Some(Incoming::ConnAck { code: 0, session_present }) => {
                debug!("CONNACK recebido (sessão presente: {session_present})");
                self.ping_sent = None;
                Ok(true)
            }
            Some(Incoming::ConnAck { code, .. }) => Err(TransportError::Refused(code)),
            Some(other) => Err(TransportError::Protocol(format!(
                "esperado CONNACK, recebido {other:?}"
            ))),
        }
    }

    /// Publica com QoS 1 e espera o PUBACK correspondente.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let packet_id = self.allocate_packet_id();
        let packet = mqtt_packet::encode_publish(topic, payload, packet_id).map_err(protocol_error)?;
        self.write_packet(&packet)?;

        let deadline = Instant::now() + self.ack_timeout;
        loop {
            match self.read_packet()? {
                Some(Incoming::PubAck { packet_id: id }) if id == packet_id => return Ok(()),
                Some(other) => self.handle_unsolicited(other)?,
                None => {}
            }
            if Instant::now() >= deadline {
                return Err(TransportError::AckTimeout);
            }
        }
    }

    /// Processa pacotes pendentes e mantém o keep-alive.
    pub fn service(&mut self) -> Result<(), TransportError> {
        while let Some(packet) = self.read_packet()? {
            self.handle_unsolicited(packet)?;
        }

        if self.keep_alive.is_zero() {
            return Ok(());
        }
        match self.ping_sent {
            Some(sent) if sent.elapsed() >= self.keep_alive => {
                Err(TransportError::Timeout("PINGRESP"))
            }
            Some(_) => Ok(()),
            None if self.last_sent.elapsed() >= self.keep_alive / 2 => {
                self.write_packet(&mqtt_packet::encode_pingreq())?;
                self.ping_sent = Some(Instant::now());
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// DISCONNECT de cortesia; erros são ignorados.
    pub fn disconnect(&mut self) {
        let _ = self.write_packet(&mqtt_packet::encode_disconnect());
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn allocate_packet_id(&mut self) -> u16 {
        // Packet id 0 é inválido no MQTT
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        self.next_packet_id
    }

    fn handle_unsolicited(&mut self, packet: Incoming) -> Result<(), TransportError> {
        match packet {
            Incoming::PingResp => self.ping_sent = None,
            Incoming::Publish {
                topic,
                qos,
                packet_id,
                payload,
            } => {
                info!(
                    "Mensagem MQTT em {topic}: {}",
                    String::from_utf8_lossy(&payload)
                );
                match (qos, packet_id) {
                    (1, Some(id)) => self.write_packet(&mqtt_packet::encode_puback(id))?,
                    // QoS 2 exigiria PUBREC/PUBREL; o gateway não assina tópicos
                    (2, _) => debug!("PUBLISH QoS 2 em {topic} não confirmado"),
                    _ => {}
                }
            }
            Incoming::PubAck { packet_id } => debug!("PUBACK atrasado #{packet_id} ignorado"),
            other => debug!("Pacote MQTT ignorado: {other:?}"),
        }
        Ok(())
    }

    fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(packet)?;
        self.stream.flush()?;
        self.last_sent = Instant::now();
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Option<Incoming>, TransportError> {
        if let Some(packet) = self.take_packet()? {
            return Ok(Some(packet));
        }
        self.fill()?;
        self.take_packet()
    }

    fn take_packet(&mut self) -> Result<Option<Incoming>, TransportError> {
        match mqtt_packet::decode(&self.inbox).map_err(protocol_error)? {
            Some((packet, used)) => {
                self.inbox.drain(..used);
                Ok(Some(packet))
            }
            None => Ok(None),
        }
    }

    fn fill(&mut self) -> Result<(), TransportError> {
        let mut buf = [0u8; 1024];
        match self.stream.read(&mut buf) {
            Ok(0) => Err(TransportError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "broker fechou a conexão",
            ))),
            Ok(n) => {
                self.inbox.extend_from_slice(&buf[..n]);
                Ok(())
            }
            Err(e) if is_timeout(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn protocol_error(e: mqtt_packet::PacketError) -> TransportError {
    TransportError::Protocol(e.to_string())
}

// ──────────────────────────────────────────────
// Transporte TLS
// ──────────────────────────────────────────────

enum Phase {
    Idle,
    Handshaking {
        stream: TlsStream,
        deadline: Instant,
    },
    AwaitingConnAck {
        session: MqttSession<TlsStream>,
        deadline: Instant,
    },
    Connected(MqttSession<TlsStream>),
}

/// Conexão MQTT/TLS com o broker.
pub struct MqttTransport {
    settings: MqttSettings,
    tls: Arc<ClientConfig>,
    phase: Phase,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings, tls: Arc<ClientConfig>) -> Self {
        Self {
            settings,
            tls,
            phase: Phase::Idle,
        }
    }

    fn connect_tcp(&self) -> Result<TcpStream, TransportError> {
        let addrs = (self.settings.host.as_str(), self.settings.port).to_socket_addrs()?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.settings.connect_timeout) {
                Ok(tcp) => return Ok(tcp),
                Err(e) => {
                    debug!("TCP {addr} falhou: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} não resolveu para nenhum endereço", self.settings.host),
                )
            })
            .into())
    }
}

impl Transport for MqttTransport {
    fn begin_connect(&mut self) -> Result<(), TransportError> {
        self.close();

        let tcp = self.connect_tcp()?;
        tcp.set_nodelay(true)?;
        tcp.set_read_timeout(Some(self.settings.io_timeout))?;
        tcp.set_write_timeout(Some(self.settings.connect_timeout))?;

        let server_name = ServerName::try_from(self.settings.host.clone())
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        let conn = ClientConnection::new(Arc::clone(&self.tls), server_name)
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        debug!(
            "TCP conectado a {}:{}, iniciando handshake TLS",
            self.settings.host, self.settings.port
        );
        self.phase = Phase::Handshaking {
            stream: StreamOwned::new(conn, tcp),
            deadline: Instant::now() + self.settings.connect_timeout,
        };
        Ok(())
    }

    fn poll_connect(&mut self) -> Result<ConnectProgress, TransportError> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => Err(TransportError::NotConnected),
            Phase::Handshaking {
                mut stream,
                deadline,
            } => {
                if stream.conn.is_handshaking() {
                    match stream.conn.complete_io(&mut stream.sock) {
                        Ok(_) => {}
                        Err(e) if is_timeout(&e) => {}
                        Err(e) => return Err(e.into()),
                    }
                }

                if stream.conn.is_handshaking() {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout("handshake TLS"));
                    }
                    self.phase = Phase::Handshaking { stream, deadline };
                    return Ok(ConnectProgress::Pending);
                }

                debug!("Handshake TLS concluído, enviando CONNECT");
                let mut session =
                    MqttSession::new(stream, self.settings.keep_alive, self.settings.ack_timeout);
                session.send_connect(&self.settings.client_id)?;
                self.phase = Phase::AwaitingConnAck { session, deadline };
                Ok(ConnectProgress::Pending)
            }
            Phase::AwaitingConnAck {
                mut session,
                deadline,
            } => {
                if session.poll_connack()? {
                    self.phase = Phase::Connected(session);
                    return Ok(ConnectProgress::Established);
                }
                if Instant::now() >= deadline {
                    return Err(TransportError::Timeout("CONNACK"));
                }
                self.phase = Phase::AwaitingConnAck { session, deadline };
                Ok(ConnectProgress::Pending)
            }
            Phase::Connected(session) => {
                self.phase = Phase::Connected(session);
                Ok(ConnectProgress::Established)
            }
        }
    }

    fn publish(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        match &mut self.phase {
            Phase::Connected(session) => session.publish(&self.settings.topic, payload),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn service(&mut self) -> Result<(), TransportError> {
        match &mut self.phase {
            Phase::Connected(session) => session.service(),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn close(&mut self) {
        let stream = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => return,
            Phase::Handshaking { stream, .. } => stream,
            Phase::AwaitingConnAck { session, .. } => session.into_inner(),
            Phase::Connected(mut session) => {
                session.disconnect();
                session.into_inner()
            }
        };

        let StreamOwned { mut conn, mut sock } = stream;
        conn.send_close_notify();
        let _ = conn.write_tls(&mut sock);
        let _ = sock.shutdown(Shutdown::Both);
        debug!("Conexão com o broker encerrada");
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
