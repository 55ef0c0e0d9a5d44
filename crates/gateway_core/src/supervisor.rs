//! Supervisor da conexão com o broker.
//!
//! Máquina de estados polled, avançada uma etapa por ciclo do gateway:
//!
//! ```text
//!            begin_connect ok          poll_connect = Established
//! Disconnected ───────────────▶ Connecting ───────────────▶ Ready
//!      ▲                            │                         │
//!      └──── falha (backoff) ◀──────┘◀──── link perdido ──────┘
//! ```
//!
//! Nenhuma chamada bloqueia além do limite de uma etapa do [`Transport`];
//! a espera do backoff é feita comparando instantes, nunca dormindo.

use crate::types::BufferedMessage;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Estado do link com o broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "desconectado",
            Self::Connecting => "conectando",
            Self::Ready => "conectado",
        };
        f.write_str(s)
    }
}

/// Resultado de uma tentativa de envio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Tentar de novo mais tarde; a mensagem continua no buffer
    Rejected,
}

/// Progresso de uma conexão em andamento.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectProgress {
    Pending,
    Established,
}

/// Erros de transporte.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Erro de I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Erro TLS: {0}")]
    Tls(String),

    #[error("Broker recusou a conexão (código {0})")]
    Refused(u8),

    #[error("Timeout: {0}")]
    Timeout(&'static str),

    #[error("Violação de protocolo: {0}")]
    Protocol(String),

    #[error("Broker não confirmou a publicação a tempo")]
    AckTimeout,

    #[error("Transporte não conectado")]
    NotConnected,
}

impl TransportError {
    /// `true` quando o erro indica que a conexão caiu.
    ///
    /// Um timeout de confirmação só adia a mensagem; a queda do link, se houver,
    /// é detectada pelo keep-alive.
    pub fn is_link_lost(&self) -> bool {
        !matches!(self, Self::AckTimeout)
    }
}

/// Conexão com o broker, vista pelo supervisor.
///
/// Cada método deve retornar em tempo limitado.
pub trait Transport {
    /// Inicia uma nova conexão.
    fn begin_connect(&mut self) -> Result<(), TransportError>;

    /// Avança a conexão iniciada por [`Transport::begin_connect`].
    fn poll_connect(&mut self) -> Result<ConnectProgress, TransportError>;

    /// Publica um payload no tópico de destino e aguarda a confirmação.
    fn publish(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Manutenção da conexão estabelecida (keep-alive, leitura pendente).
    fn service(&mut self) -> Result<(), TransportError>;

    /// Fecha a conexão, se houver.
    fn close(&mut self);
}

/// Contadores do supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub connect_attempts: u64,
    pub connections: u64,
    pub link_losses: u64,
    pub delivered: u64,
    pub rejected: u64,
}

/// Acompanha o estado do link e decide quando tentar enviar.
pub struct ConnectionSupervisor<T: Transport> {
    transport: T,
    state: ConnectionState,
    retry_backoff: Duration,
    /// `None` = pode tentar imediatamente
    next_attempt: Option<Instant>,
    stats: SupervisorStats,
}

impl<T: Transport> ConnectionSupervisor<T> {
    pub fn new(transport: T, retry_backoff: Duration) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            retry_backoff,
            next_attempt: None,
            stats: SupervisorStats::default(),
        }
    }

    /// Avança a máquina de estados uma etapa.
    pub fn poll(&mut self) {
        self.poll_at(Instant::now());
    }

    /// Como [`poll`](Self::poll), com o instante atual explícito.
    pub fn poll_at(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Disconnected => {
                if self.next_attempt.is_some_and(|at| now < at) {
                    return;
                }
                self.stats.connect_attempts += 1;
                debug!("Tentando conexão #{}...", self.stats.connect_attempts);
                match self.transport.begin_connect() {
                    Ok(()) => self.state = ConnectionState::Connecting,
                    Err(e) => self.fail(now, &e),
                }
            }
            ConnectionState::Connecting => match self.transport.poll_connect() {
                Ok(ConnectProgress::Pending) => {}
                Ok(ConnectProgress::Established) => {
                    self.state = ConnectionState::Ready;
                    self.next_attempt = None;
                    self.stats.connections += 1;
                    info!("Broker conectado!");
                }
                Err(e) => self.fail(now, &e),
            },
            ConnectionState::Ready => {
                if let Err(e) = self.transport.service() {
                    self.lose_link(now, &e);
                }
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> SupervisorStats {
        self.stats
    }

    /// Tenta entregar uma mensagem; só é válido com o link pronto.
    pub fn attempt_send(&mut self, message: &BufferedMessage) -> SendOutcome {
        self.attempt_send_at(message, Instant::now())
    }

    pub fn attempt_send_at(&mut self, message: &BufferedMessage, now: Instant) -> SendOutcome {
        if !self.is_ready() {
            self.stats.rejected += 1;
            return SendOutcome::Rejected;
        }

        match self.transport.publish(&message.payload) {
            Ok(()) => {
                self.stats.delivered += 1;
                SendOutcome::Delivered
            }
            Err(e) => {
                self.stats.rejected += 1;
                if e.is_link_lost() {
                    self.lose_link(now, &e);
                } else {
                    warn!("Mensagem #{} não confirmada: {e}. Mantendo na fila.", message.sequence);
                }
                SendOutcome::Rejected
            }
        }
    }

    /// Acesso ao transporte (testes, estatísticas).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn fail(&mut self, now: Instant, error: &TransportError) {
        warn!(
            "Falha na conexão: {error}. Tentando novamente em {:.0?}...",
            self.retry_backoff
        );
        self.disconnect(now);
    }

    fn lose_link(&mut self, now: Instant, error: &TransportError) {
        self.stats.link_losses += 1;
        warn!(
            "Conexão com o broker perdida: {error}. Reconectando em {:.0?}...",
            self.retry_backoff
        );
        self.disconnect(now);
    }

    fn disconnect(&mut self, now: Instant) {
        self.transport.close();
        self.state = ConnectionState::Disconnected;
        self.next_attempt = Some(now + self.retry_backoff);
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Transporte roteirizado para testes.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub connect_results: VecDeque<Result<(), TransportError>>,
        pub poll_results: VecDeque<Result<ConnectProgress, TransportError>>,
        pub publish_results: VecDeque<Result<(), TransportError>>,
        pub service_results: VecDeque<Result<(), TransportError>>,
        pub published: Vec<Vec<u8>>,
        pub closes: usize,
    }

    impl ScriptedTransport {
        /// Conecta na primeira tentativa e aceita toda publicação.
        pub(crate) fn connecting() -> Self {
            let mut t = Self::default();
            t.poll_results.push_back(Ok(ConnectProgress::Established));
            t
        }
    }

    impl Transport for ScriptedTransport {
        fn begin_connect(&mut self) -> Result<(), TransportError> {
            self.connect_results.pop_front().unwrap_or(Ok(()))
        }

        fn poll_connect(&mut self) -> Result<ConnectProgress, TransportError> {
            self.poll_results
                .pop_front()
                .unwrap_or(Ok(ConnectProgress::Established))
        }

        fn publish(&mut self, payload: &[u8]) -> Result<(), TransportError> {
            let result = self.publish_results.pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                self.published.push(payload.to_vec());
            }
            result
        }

        fn service(&mut self) -> Result<(), TransportError> {
            self.service_results.pop_front().unwrap_or(Ok(()))
        }

        fn close(&mut self) {
            self.closes += 1;
        }
    }

    fn message(payload: &[u8]) -> BufferedMessage {
        BufferedMessage {
            sequence: 0,
            payload: payload.to_vec(),
        }
    }

    fn broken_pipe() -> TransportError {
        TransportError::Io(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    const BACKOFF: Duration = Duration::from_secs(5);

    #[test]
    fn connects_in_two_polls() {
        let mut sup = ConnectionSupervisor::new(ScriptedTransport::connecting(), BACKOFF);
        let t0 = Instant::now();
        assert_eq!(sup.state(), ConnectionState::Disconnected);

        sup.poll_at(t0);
        assert_eq!(sup.state(), ConnectionState::Connecting);
        assert!(!sup.is_ready());

        sup.poll_at(t0);
        assert!(sup.is_ready());
        assert_eq!(sup.stats().connections, 1);
    }

    #[test]
    fn pending_handshake_stays_connecting() {
        let mut transport = ScriptedTransport::default();
        transport.poll_results.push_back(Ok(ConnectProgress::Pending));
        transport.poll_results.push_back(Ok(ConnectProgress::Pending));
        let mut sup = ConnectionSupervisor::new(transport, BACKOFF);
        let t0 = Instant::now();

        sup.poll_at(t0);
        sup.poll_at(t0);
        sup.poll_at(t0);
        assert_eq!(sup.state(), ConnectionState::Connecting);
        sup.poll_at(t0);
        assert!(sup.is_ready());
    }

    #[test]
    fn failed_connect_waits_for_backoff() {
        let mut transport = ScriptedTransport::default();
        transport.connect_results.push_back(Err(broken_pipe()));
        let mut sup = ConnectionSupervisor::new(transport, BACKOFF);
        let t0 = Instant::now();

        sup.poll_at(t0);
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert_eq!(sup.stats().connect_attempts, 1);

        // Antes do backoff: nenhuma tentativa nova
        sup.poll_at(t0 + Duration::from_secs(1));
        assert_eq!(sup.stats().connect_attempts, 1);

        sup.poll_at(t0 + BACKOFF);
        assert_eq!(sup.stats().connect_attempts, 2);
        assert_eq!(sup.state(), ConnectionState::Connecting);
    }

    #[test]
    fn refused_handshake_goes_back_to_disconnected() {
        let mut transport = ScriptedTransport::default();
        transport.poll_results.push_back(Err(TransportError::Refused(5)));
        let mut sup = ConnectionSupervisor::new(transport, BACKOFF);
        let t0 = Instant::now();

        sup.poll_at(t0);
        sup.poll_at(t0);
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert_eq!(sup.transport().closes, 1);
    }

    #[test]
    fn retries_forever() {
        let mut transport = ScriptedTransport::default();
        for _ in 0..50 {
            transport.connect_results.push_back(Err(broken_pipe()));
        }
        let mut sup = ConnectionSupervisor::new(transport, BACKOFF);
        let mut now = Instant::now();
        for _ in 0..50 {
            sup.poll_at(now);
            now += BACKOFF;
        }
        assert_eq!(sup.stats().connect_attempts, 50);

        sup.poll_at(now);
        sup.poll_at(now);
        assert!(sup.is_ready());
    }

    #[test]
    fn send_when_not_ready_is_rejected_without_transport() {
        let mut sup = ConnectionSupervisor::new(ScriptedTransport::connecting(), BACKOFF);
        assert_eq!(sup.attempt_send(&message(b"x")), SendOutcome::Rejected);
        assert!(sup.transport().published.is_empty());
    }

    #[test]
    fn delivered_payload_is_unmodified() {
        let mut sup = ConnectionSupervisor::new(ScriptedTransport::connecting(), BACKOFF);
        let t0 = Instant::now();
        sup.poll_at(t0);
        sup.poll_at(t0);

        let payload = br#"{"sender":1}"#;
        assert_eq!(sup.attempt_send_at(&message(payload), t0), SendOutcome::Delivered);
        assert_eq!(sup.transport().published, vec![payload.to_vec()]);
    }

    #[test]
    fn ack_timeout_rejects_but_keeps_link() {
        let mut transport = ScriptedTransport::connecting();
        transport.publish_results.push_back(Err(TransportError::AckTimeout));
        let mut sup = ConnectionSupervisor::new(transport, BACKOFF);
        let t0 = Instant::now();
        sup.poll_at(t0);
        sup.poll_at(t0);

        assert_eq!(sup.attempt_send_at(&message(b"x"), t0), SendOutcome::Rejected);
        assert!(sup.is_ready());
        assert_eq!(sup.stats().link_losses, 0);
    }

    #[test]
    fn io_error_on_publish_drops_link() {
        let mut transport = ScriptedTransport::connecting();
        transport.publish_results.push_back(Err(broken_pipe()));
        let mut sup = ConnectionSupervisor::new(transport, BACKOFF);
        let t0 = Instant::now();
        sup.poll_at(t0);
        sup.poll_at(t0);

        assert_eq!(sup.attempt_send_at(&message(b"x"), t0), SendOutcome::Rejected);
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert_eq!(sup.stats().link_losses, 1);

        // Reconexão respeita o backoff
        sup.poll_at(t0);
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        sup.poll_at(t0 + BACKOFF);
        assert_eq!(sup.state(), ConnectionState::Connecting);
    }

    #[test]
    fn keepalive_failure_drops_link() {
        let mut transport = ScriptedTransport::connecting();
        transport
            .service_results
            .push_back(Err(TransportError::Timeout("PINGRESP")));
        let mut sup = ConnectionSupervisor::new(transport, BACKOFF);
        let t0 = Instant::now();
        sup.poll_at(t0);
        sup.poll_at(t0);
        assert!(sup.is_ready());

        sup.poll_at(t0);
        assert_eq!(sup.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn link_loss_classification() {
        assert!(!TransportError::AckTimeout.is_link_lost());
        assert!(TransportError::NotConnected.is_link_lost());
        assert!(TransportError::Refused(4).is_link_lost());
        assert!(broken_pipe().is_link_lost());
    }
}
