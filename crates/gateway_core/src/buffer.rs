//! Buffer FIFO de mensagens aguardando envio ao broker.
//!
//! Uma mensagem só sai do buffer por [`DeliveryBuffer::acknowledge_oldest`]
//! (entrega confirmada) ou por despejo explícito quando o buffer está cheio
//! com a política [`OverflowPolicy::DropOldest`]. Os dois casos são contados.

use crate::types::BufferedMessage;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

/// O que fazer quando o buffer atinge a capacidade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Descarta a mensagem mais antiga para abrir espaço
    #[default]
    DropOldest,
    /// Descarta a mensagem nova
    DropNewest,
    /// Recusa a mensagem nova e conta como rejeitada
    Reject,
}

/// Erros do buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("Buffer cheio ({capacity} mensagens, política {policy:?})")]
    Full {
        capacity: usize,
        policy: OverflowPolicy,
    },
}

/// Resultado de um enqueue bem-sucedido.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Stored { sequence: u64 },
    /// Armazenada após despejar a mensagem mais antiga
    StoredEvicting { sequence: u64, evicted: u64 },
}

impl EnqueueOutcome {
    pub fn sequence(&self) -> u64 {
        match *self {
            Self::Stored { sequence } | Self::StoredEvicting { sequence, .. } => sequence,
        }
    }
}

/// Contadores do buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub enqueued: u64,
    pub acknowledged: u64,
    /// Despejadas por `DropOldest`
    pub evicted: u64,
    /// Recusadas por `DropNewest`
    pub dropped_newest: u64,
    /// Recusadas por `Reject`
    pub rejected: u64,
}

/// Fila ordenada de mensagens serializadas.
#[derive(Debug)]
pub struct DeliveryBuffer {
    queue: VecDeque<BufferedMessage>,
    /// 0 = sem limite
    capacity: usize,
    policy: OverflowPolicy,
    next_sequence: u64,
    stats: BufferStats,
}

impl DeliveryBuffer {
    /// Cria um buffer com `capacity` mensagens (`0` = sem limite).
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
            policy,
            next_sequence: 0,
            stats: BufferStats::default(),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0, OverflowPolicy::default())
    }

    /// Adiciona uma mensagem no fim da fila.
    pub fn enqueue(&mut self, payload: Vec<u8>) -> Result<EnqueueOutcome, BufferError> {
        let mut evicted = None;

        if self.is_full() {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    evicted = self.queue.pop_front().map(|m| m.sequence);
                    self.stats.evicted += 1;
                }
                OverflowPolicy::DropNewest => {
                    self.stats.dropped_newest += 1;
                    return Err(self.full_error());
                }
                OverflowPolicy::Reject => {
                    self.stats.rejected += 1;
                    return Err(self.full_error());
                }
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queue.push_back(BufferedMessage { sequence, payload });
        self.stats.enqueued += 1;

        Ok(match evicted {
            Some(evicted) => EnqueueOutcome::StoredEvicting { sequence, evicted },
            None => EnqueueOutcome::Stored { sequence },
        })
    }

    /// Mensagem mais antiga, sem removê-la.
    pub fn peek_oldest(&self) -> Option<&BufferedMessage> {
        self.queue.front()
    }

    /// Remove a mensagem mais antiga após entrega confirmada.
    ///
    /// Em buffer vazio não faz nada e retorna `None`.
    pub fn acknowledge_oldest(&mut self) -> Option<BufferedMessage> {
        let message = self.queue.pop_front();
        match &message {
            Some(_) => self.stats.acknowledged += 1,
            None => warn!("acknowledge_oldest chamado com buffer vazio"),
        }
        message
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        (self.capacity > 0).then_some(self.capacity)
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    fn is_full(&self) -> bool {
        self.capacity > 0 && self.queue.len() >= self.capacity
    }

    fn full_error(&self) -> BufferError {
        BufferError::Full {
            capacity: self.capacity,
            policy: self.policy,
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(buffer: &DeliveryBuffer) -> Vec<Vec<u8>> {
        buffer.queue.iter().map(|m| m.payload.clone()).collect()
    }

    #[test]
    fn fifo_order_and_sequences() {
        let mut buffer = DeliveryBuffer::unbounded();
        assert_eq!(buffer.enqueue(b"A".to_vec()).unwrap().sequence(), 0);
        assert_eq!(buffer.enqueue(b"B".to_vec()).unwrap().sequence(), 1);
        assert_eq!(buffer.enqueue(b"C".to_vec()).unwrap().sequence(), 2);

        assert_eq!(buffer.peek_oldest().unwrap().payload, b"A");
        assert_eq!(buffer.acknowledge_oldest().unwrap().payload, b"A");
        assert_eq!(buffer.peek_oldest().unwrap().payload, b"B");
        assert_eq!(buffer.acknowledge_oldest().unwrap().payload, b"B");
        assert_eq!(buffer.acknowledge_oldest().unwrap().payload, b"C");
        assert!(buffer.is_empty());
    }

    #[test]
    fn peek_does_not_remove() {
        let mut buffer = DeliveryBuffer::unbounded();
        buffer.enqueue(b"A".to_vec()).unwrap();
        assert_eq!(buffer.peek_oldest().unwrap().sequence, 0);
        assert_eq!(buffer.peek_oldest().unwrap().sequence, 0);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn peek_and_acknowledge_refer_to_same_message() {
        let mut buffer = DeliveryBuffer::unbounded();
        for p in [b"A", b"B", b"C"] {
            buffer.enqueue(p.to_vec()).unwrap();
        }
        while let Some(head) = buffer.peek_oldest().cloned() {
            assert_eq!(buffer.acknowledge_oldest(), Some(head));
        }
    }

    #[test]
    fn acknowledge_on_empty_is_noop() {
        let mut buffer = DeliveryBuffer::unbounded();
        assert!(buffer.acknowledge_oldest().is_none());
        assert_eq!(buffer.stats().acknowledged, 0);
    }

    #[test]
    fn sequences_keep_growing_after_drain() {
        let mut buffer = DeliveryBuffer::unbounded();
        buffer.enqueue(b"A".to_vec()).unwrap();
        buffer.acknowledge_oldest();
        assert_eq!(buffer.enqueue(b"B".to_vec()).unwrap().sequence(), 1);
    }

    #[test]
    fn drop_oldest_evicts_head() {
        let mut buffer = DeliveryBuffer::new(2, OverflowPolicy::DropOldest);
        buffer.enqueue(b"A".to_vec()).unwrap();
        buffer.enqueue(b"B".to_vec()).unwrap();
        let outcome = buffer.enqueue(b"C".to_vec()).unwrap();

        assert_eq!(
            outcome,
            EnqueueOutcome::StoredEvicting {
                sequence: 2,
                evicted: 0
            }
        );
        assert_eq!(payloads(&buffer), vec![b"B".to_vec(), b"C".to_vec()]);
        assert_eq!(buffer.stats().evicted, 1);
    }

    #[test]
    fn drop_newest_keeps_existing_messages() {
        let mut buffer = DeliveryBuffer::new(2, OverflowPolicy::DropNewest);
        buffer.enqueue(b"A".to_vec()).unwrap();
        buffer.enqueue(b"B".to_vec()).unwrap();
        let err = buffer.enqueue(b"C".to_vec()).unwrap_err();

        assert_eq!(
            err,
            BufferError::Full {
                capacity: 2,
                policy: OverflowPolicy::DropNewest
            }
        );
        assert_eq!(payloads(&buffer), vec![b"A".to_vec(), b"B".to_vec()]);
        assert_eq!(buffer.stats().dropped_newest, 1);
    }

    #[test]
    fn reject_is_counted_separately() {
        let mut buffer = DeliveryBuffer::new(1, OverflowPolicy::Reject);
        buffer.enqueue(b"A".to_vec()).unwrap();
        assert!(buffer.enqueue(b"B".to_vec()).is_err());
        assert_eq!(buffer.stats().rejected, 1);
        assert_eq!(buffer.stats().dropped_newest, 0);

        // Libera espaço e volta a aceitar, sem pular sequência
        buffer.acknowledge_oldest();
        assert_eq!(buffer.enqueue(b"C".to_vec()).unwrap().sequence(), 1);
    }

    #[test]
    fn zero_capacity_is_unbounded() {
        let mut buffer = DeliveryBuffer::new(0, OverflowPolicy::Reject);
        for i in 0..1000u32 {
            buffer.enqueue(i.to_le_bytes().to_vec()).unwrap();
        }
        assert_eq!(buffer.len(), 1000);
        assert_eq!(buffer.capacity(), None);
    }
}
