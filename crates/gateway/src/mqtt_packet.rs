//! Codec dos pacotes MQTT 3.1.1 usados pelo gateway.
//!
//! Só o lado cliente do que o gateway precisa: CONNECT, PUBLISH (QoS 1),
//! PUBACK, PINGREQ e DISCONNECT na ida; CONNACK, PUBACK, PINGRESP e PUBLISH
//! na volta.
//!
//! ```text
//! ┌────────────────┬──────────────────────┬──────────────────┐
//! │ Tipo+flags (1) │ Remaining length (1–4)│ Corpo (N)        │
//! └────────────────┴──────────────────────┴──────────────────┘
//! ```

const CONNECT: u8 = 0x10;
const CONNACK: u8 = 0x20;
const PUBLISH: u8 = 0x30;
const PUBACK: u8 = 0x40;
const PINGREQ: u8 = 0xC0;
const PINGRESP: u8 = 0xD0;
const DISCONNECT: u8 = 0xE0;

/// Nível de protocolo do MQTT 3.1.1.
const PROTOCOL_LEVEL: u8 = 4;

/// Maior valor representável no remaining length (4 bytes).
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Erros de codificação/decodificação.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("Remaining length malformado")]
    MalformedLength,

    #[error("Pacote grande demais ({0} bytes)")]
    TooLarge(usize),

    #[error("String maior que 65535 bytes")]
    StringTooLong,

    #[error("Pacote 0x{kind:02X} malformado: {reason}")]
    Malformed { kind: u8, reason: &'static str },
}

/// Pacote recebido do broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    ConnAck { session_present: bool, code: u8 },
    PubAck { packet_id: u16 },
    PingResp,
    Publish {
        topic: String,
        qos: u8,
        /// Presente quando `qos > 0`
        packet_id: Option<u16>,
        payload: Vec<u8>,
    },
    /// Tipo que o gateway não trata
    Other(u8),
}

// ──────────────────────────────────────────────
// Encode
// ──────────────────────────────────────────────

/// CONNECT com clean session, sem usuário/senha (autenticação via mTLS).
pub fn encode_connect(client_id: &str, keep_alive_secs: u16) -> Result<Vec<u8>, PacketError> {
    let mut body = Vec::with_capacity(12 + client_id.len());
    write_string(&mut body, "MQTT")?;
    body.push(PROTOCOL_LEVEL);
    body.push(0x02); // clean session
    body.extend_from_slice(&keep_alive_secs.to_be_bytes());
    write_string(&mut body, client_id)?;
    frame(CONNECT, &body)
}

/// PUBLISH QoS 1.
pub fn encode_publish(topic: &str, payload: &[u8], packet_id: u16) -> Result<Vec<u8>, PacketError> {
    let mut body = Vec::with_capacity(4 + topic.len() + payload.len());
    write_string(&mut body, topic)?;
    body.extend_from_slice(&packet_id.to_be_bytes());
    body.extend_from_slice(payload);
    frame(PUBLISH | 0x02, &body)
}

/// PUBACK para um PUBLISH QoS 1 recebido.
pub fn encode_puback(packet_id: u16) -> [u8; 4] {
    let [hi, lo] = packet_id.to_be_bytes();
    [PUBACK, 0x02, hi, lo]
}

pub fn encode_pingreq() -> [u8; 2] {
    [PINGREQ, 0]
}

pub fn encode_disconnect() -> [u8; 2] {
    [DISCONNECT, 0]
}

fn frame(header: u8, body: &[u8]) -> Result<Vec<u8>, PacketError> {
    let mut out = Vec::with_capacity(body.len() + 5);
    out.push(header);
    write_variable_length(&mut out, body.len())?;
    out.extend_from_slice(body);
    Ok(out)
}

pub fn write_variable_length(out: &mut Vec<u8>, mut len: usize) -> Result<(), PacketError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(PacketError::TooLarge(len));
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            return Ok(());
        }
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) -> Result<(), PacketError> {
    let len = u16::try_from(s.len()).map_err(|_| PacketError::StringTooLong)?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

// ──────────────────────────────────────────────
// Decode
// ──────────────────────────────────────────────

/// Lê o remaining length a partir de `buf[0]`.
///
/// Retorna `(valor, bytes consumidos)`, ou `None` se faltam bytes.
pub fn read_variable_length(buf: &[u8]) -> Result<Option<(usize, usize)>, PacketError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, &byte) in buf.iter().enumerate() {
        if i == 4 {
            return Err(PacketError::MalformedLength);
        }
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        return Err(PacketError::MalformedLength);
    }
    Ok(None)
}

/// Decodifica um pacote completo do início de `buf`.
///
/// Retorna o pacote e quantos bytes ele ocupa, ou `None` se o buffer ainda
/// não contém o pacote inteiro.
pub fn decode(buf: &[u8]) -> Result<Option<(Incoming, usize)>, PacketError> {
    let Some(&header) = buf.first() else {
        return Ok(None);
    };
    let Some((remaining, len_bytes)) = read_variable_length(&buf[1..])? else {
        return Ok(None);
    };
    let start = 1 + len_bytes;
    let total = start + remaining;
    if buf.len() < total {
        return Ok(None);
    }
    let body = &buf[start..total];
    let kind = header & 0xF0;

    let packet = match kind {
        CONNACK => {
            if body.len() != 2 {
                return Err(malformed(kind, "CONNACK deve ter 2 bytes"));
            }
            Incoming::ConnAck {
                session_present: body[0] & 0x01 != 0,
                code: body[1],
            }
        }
        PUBACK => {
            if body.len() != 2 {
                return Err(malformed(kind, "PUBACK deve ter 2 bytes"));
            }
            Incoming::PubAck {
                packet_id: u16::from_be_bytes([body[0], body[1]]),
            }
        }
        PINGRESP => Incoming::PingResp,
        PUBLISH => decode_publish(header, body)?,
        other => Incoming::Other(other),
    };

    Ok(Some((packet, total)))
}

fn decode_publish(header: u8, body: &[u8]) -> Result<Incoming, PacketError> {
    if body.len() < 2 {
        return Err(malformed(PUBLISH, "sem tópico"));
    }
    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let mut offset = 2 + topic_len;
    if body.len() < offset {
        return Err(malformed(PUBLISH, "tópico truncado"));
    }
    let topic = String::from_utf8(body[2..offset].to_vec())
        .map_err(|_| malformed(PUBLISH, "tópico não é UTF-8"))?;

    let qos = (header >> 1) & 0x03;
    let mut packet_id = None;
    if qos > 0 {
        if body.len() < offset + 2 {
            return Err(malformed(PUBLISH, "packet id truncado"));
        }
        packet_id = Some(u16::from_be_bytes([body[offset], body[offset + 1]]));
        offset += 2;
    }

    Ok(Incoming::Publish {
        topic,
        qos,
        packet_id,
        payload: body[offset..].to_vec(),
    })
}

fn malformed(kind: u8, reason: &'static str) -> PacketError {
    PacketError::Malformed { kind, reason }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
