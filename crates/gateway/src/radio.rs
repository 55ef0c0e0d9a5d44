//! Thread do rádio: escuta os datagramas da ponte LoRa e entrega os frames
//! ao loop principal via channel.
//!
//! O loop principal consulta o channel com `try_recv`, no máximo um frame por
//! ciclo; o buffer de entrega continua sendo tocado por uma única thread.

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use gateway_core::gateway::FrameSource;
use gateway_core::protocol::{MAX_DATAGRAM_SIZE, decode_datagram};
use gateway_core::types::ReceivedFrame;
use std::net::UdpSocket;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lado do loop principal do channel do rádio.
pub struct RadioLink {
    rx: Receiver<ReceivedFrame>,
    disconnected_logged: bool,
}

impl RadioLink {
    pub fn new(rx: Receiver<ReceivedFrame>) -> Self {
        Self {
            rx,
            disconnected_logged: false,
        }
    }
}

impl FrameSource for RadioLink {
    fn try_next(&mut self) -> Option<ReceivedFrame> {
        match self.rx.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if !self.disconnected_logged {
                    error!("Thread do rádio encerrada; nenhum frame novo será recebido");
                    self.disconnected_logged = true;
                }
                None
            }
        }
    }
}

/// Inicia a thread do rádio.
pub fn spawn_radio_thread(
    bind_ip: String,
    port: u16,
    capacity: usize,
) -> std::io::Result<RadioLink> {
    let (tx, rx) = bounded::<ReceivedFrame>(capacity);

    std::thread::Builder::new()
        .name("lora-radio".into())
        .spawn(move || {
            radio_loop(&tx, &bind_ip, port);
        })?;

    Ok(RadioLink::new(rx))
}

fn radio_loop(tx: &Sender<ReceivedFrame>, bind_ip: &str, port: u16) {
    loop {
        match UdpSocket::bind((bind_ip, port)) {
            Ok(sock) => {
                sock.set_read_timeout(Some(Duration::from_secs(1))).ok();
                info!("Rádio escutando a ponte LoRa em {bind_ip}:{port}");

                let mut buf = [0u8; MAX_DATAGRAM_SIZE];
                loop {
                    match sock.recv_from(&mut buf) {
                        Ok((size, addr)) => match decode_datagram(&buf[..size]) {
                            Ok(received) => {
                                if !forward(tx, received) {
                                    return;
                                }
                            }
                            Err(e) => {
                                debug!("Datagrama inválido de {addr}: {e}");
                            }
                        },
                        Err(ref e)
                            if e.kind() == std::io::ErrorKind::TimedOut
                                || e.kind() == std::io::ErrorKind::WouldBlock =>
                        {
                            // Timeout normal, continua
                        }
                        Err(e) => {
                            warn!("Erro ao receber UDP: {e}");
                        }
                    }
                }
            }
            Err(e) => {
                error!("Falha ao bind {bind_ip}:{port}: {e}. Tentando novamente em 2s...");
                std::thread::sleep(Duration::from_secs(2));
            }
        }
    }
}

/// Entrega um frame ao loop principal; `false` se o loop já terminou.
fn forward(tx: &Sender<ReceivedFrame>, received: ReceivedFrame) -> bool {
    match tx.try_send(received) {
        Ok(()) => true,
        Err(crossbeam_channel::TrySendError::Full(dropped)) => {
            // Loop principal atrasado: o frame novo é perdido, como no FIFO do rádio
            warn!(
                "Channel do rádio cheio, frame de 0x{:02X} descartado",
                dropped.frame.sender_address
            );
            true
        }
        Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
    }
}
