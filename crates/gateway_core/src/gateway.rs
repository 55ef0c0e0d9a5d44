//! Orquestrador do pipeline rádio → parse → buffer → rede.
//!
//! Cada chamada de [`Gateway::cycle`]:
//!
//! 1. avança o [`ConnectionSupervisor`] uma etapa;
//! 2. processa no máximo um frame recebido (filtro → parser → codec → buffer);
//! 3. esvazia o buffer em ordem FIFO enquanto o link estiver pronto,
//!    parando na primeira rejeição.

use crate::buffer::{BufferError, DeliveryBuffer, EnqueueOutcome};
use crate::codec::encode_record;
use crate::config::AppConfig;
use crate::filter::FrameFilter;
use crate::parser::{ParseError, TelemetryParser, duplicate_keys};
use crate::supervisor::{ConnectionState, ConnectionSupervisor, SendOutcome, Transport};
use crate::types::ReceivedFrame;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fonte de frames do rádio, consultada sem bloquear.
pub trait FrameSource {
    /// Próximo frame recebido, se houver.
    fn try_next(&mut self) -> Option<ReceivedFrame>;
}

/// O que aconteceu com o frame do ciclo.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Nenhum frame disponível
    Idle,
    /// Endereço não é deste gateway nem broadcast
    Ignored { address: u8 },
    /// Payload fora do protocolo; descartado
    Malformed(ParseError),
    /// Registro não pôde ser serializado; descartado
    Unencodable(String),
    /// Armazenado no buffer
    Buffered(EnqueueOutcome),
    /// Recusado pelo buffer cheio
    Refused(BufferError),
}

/// Resumo de um ciclo.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub frame: FrameOutcome,
    pub delivered: usize,
    /// Houve rejeição e o esvaziamento parou
    pub drain_halted: bool,
    pub pending: usize,
    pub state: ConnectionState,
}

/// Contadores do lado do rádio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub received: u64,
    pub ignored: u64,
    pub malformed: u64,
}

/// Contexto do gateway: todo o estado mutável do pipeline.
pub struct Gateway<S: FrameSource, T: Transport> {
    source: S,
    filter: FrameFilter,
    parser: TelemetryParser,
    buffer: DeliveryBuffer,
    supervisor: ConnectionSupervisor<T>,
    frame_stats: FrameStats,
    last_state: ConnectionState,
}

impl<S: FrameSource, T: Transport> Gateway<S, T> {
    pub fn new(
        source: S,
        filter: FrameFilter,
        parser: TelemetryParser,
        buffer: DeliveryBuffer,
        supervisor: ConnectionSupervisor<T>,
    ) -> Self {
        let last_state = supervisor.state();
        Self {
            source,
            filter,
            parser,
            buffer,
            supervisor,
            frame_stats: FrameStats::default(),
            last_state,
        }
    }

    /// Monta o gateway a partir da configuração.
    pub fn from_config(config: &AppConfig, source: S, transport: T) -> Self {
        Self::new(
            source,
            FrameFilter::new(config.radio.self_address),
            TelemetryParser::new(config.parser.value_mode),
            DeliveryBuffer::new(config.buffer.max_messages, config.buffer.overflow),
            ConnectionSupervisor::new(
                transport,
                Duration::from_secs_f64(config.broker.retry_backoff_secs),
            ),
        )
    }

    /// Executa um ciclo completo.
    pub fn cycle(&mut self) -> CycleReport {
        self.cycle_at(Instant::now())
    }

    /// Como [`cycle`](Self::cycle), com o instante atual explícito.
    pub fn cycle_at(&mut self, now: Instant) -> CycleReport {
        self.supervisor.poll_at(now);
        self.note_state_change();

        let frame = match self.source.try_next() {
            Some(received) => self.ingest(received),
            None => FrameOutcome::Idle,
        };

        let (delivered, drain_halted) = self.drain(now);
        self.note_state_change();

        CycleReport {
            frame,
            delivered,
            drain_halted,
            pending: self.buffer.len(),
            state: self.supervisor.state(),
        }
    }

    /// Roda filtro → parser → codec → buffer para um frame.
    fn ingest(&mut self, received: ReceivedFrame) -> FrameOutcome {
        self.frame_stats.received += 1;
        let ReceivedFrame { frame, link } = received;

        if !self.filter.accept(&frame) {
            self.frame_stats.ignored += 1;
            debug!(
                "Mensagem ignorada (endereço 0x{:02X}, não é para mim)",
                frame.sender_address
            );
            return FrameOutcome::Ignored {
                address: frame.sender_address,
            };
        }

        let record = match self
            .parser
            .parse_bytes(frame.sender_address, &frame.payload, link)
        {
            Ok(record) => record,
            Err(e) => {
                self.frame_stats.malformed += 1;
                warn!(
                    "Frame de 0x{:02X} descartado: {e} | {:?}",
                    frame.sender_address,
                    String::from_utf8_lossy(&frame.payload)
                );
                return FrameOutcome::Malformed(e);
            }
        };

        if let Ok(text) = std::str::from_utf8(&frame.payload) {
            let duplicates = duplicate_keys(text);
            if !duplicates.is_empty() {
                warn!(
                    "Frame de 0x{:02X} com chaves repetidas {duplicates:?}; usando a primeira ocorrência",
                    frame.sender_address
                );
            }
        }

        info!(
            "← LoRa 0x{:02X} | Solo {} | Umidade {} | Inclinação {} | RSSI {} | SNR {:.1}",
            record.sender, record.soil, record.humidity, record.tilt, record.rssi, record.snr
        );

        let payload = match encode_record(&record) {
            Ok(payload) => payload,
            Err(e) => {
                self.frame_stats.malformed += 1;
                warn!("Frame de 0x{:02X} descartado: falha ao gerar JSON: {e}", record.sender);
                return FrameOutcome::Unencodable(e.to_string());
            }
        };

        match self.buffer.enqueue(payload) {
            Ok(outcome) => {
                if let EnqueueOutcome::StoredEvicting { evicted, .. } = outcome {
                    warn!("Buffer cheio: mensagem #{evicted} descartada para abrir espaço");
                }
                FrameOutcome::Buffered(outcome)
            }
            Err(e) => {
                warn!("Mensagem descartada: {e}");
                FrameOutcome::Refused(e)
            }
        }
    }

    /// Envia a cabeça do buffer até esvaziar ou até a primeira rejeição.
    fn drain(&mut self, now: Instant) -> (usize, bool) {
        let mut delivered = 0;

        while self.supervisor.is_ready() {
            let Some(head) = self.buffer.peek_oldest() else {
                break;
            };

            match self.supervisor.attempt_send_at(head, now) {
                SendOutcome::Delivered => {
                    if let Some(sent) = self.buffer.acknowledge_oldest() {
                        debug!("→ MQTT mensagem #{} publicada", sent.sequence);
                    }
                    delivered += 1;
                }
                SendOutcome::Rejected => {
                    debug!(
                        "Envio rejeitado; {} mensagens mantidas na fila",
                        self.buffer.len()
                    );
                    return (delivered, true);
                }
            }
        }

        if delivered > 0 {
            info!(
                "→ MQTT {delivered} mensagens publicadas ({} pendentes)",
                self.buffer.len()
            );
        }
        (delivered, false)
    }

    fn note_state_change(&mut self) {
        let state = self.supervisor.state();
        if state != self.last_state {
            info!(
                "Broker: {} → {} | {} mensagens na fila",
                self.last_state,
                state,
                self.buffer.len()
            );
            self.last_state = state;
        }
    }

    pub fn buffer(&self) -> &DeliveryBuffer {
        &self.buffer
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor<T> {
        &self.supervisor
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.frame_stats
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Linha de estatísticas para o log periódico.
    pub fn stats_line(&self) -> String {
        let f = self.frame_stats;
        let b = self.buffer.stats();
        let s = self.supervisor.stats();
        format!(
            "Broker {} | Frames {} (ignorados {}, inválidos {}) | Fila {} (enfileiradas {}, despejadas {}, recusadas {}) | Publicadas {} | Rejeições {} | Quedas {}",
            self.supervisor.state(),
            f.received,
            f.ignored,
            f.malformed,
            self.buffer.len(),
            b.enqueued,
            b.evicted,
            b.dropped_newest + b.rejected,
            s.delivered,
            s.rejected,
            s.link_losses,
        )
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
