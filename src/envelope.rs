//! Binary envelope codec for the message set.
//!
//! Wire layout: a 1-byte discriminant (variant index + 1, zero reserved),
//! then the variant payload in little-endian fixed-width fields, with a
//! `u32` count prefix on every list:
//!
//! ```text
//!   Spike:          [tag=1][sender 16B][step u64][count u32][index u32]*
//!   SynapticImpact: [tag=2][sender 16B][step u64][pre 16B][post 16B]
//!                   [forcing u8][count u32]
//!                   ([connection u64][impact f32][kind u8][pre_idx u32][post_idx u32])*
//! ```
//!
//! The in-process bus moves `Message` values and never touches this module;
//! the socket transport carries exactly these bytes. An unknown discriminant
//! or kind byte is a hard decode error, never skipped.

use tracing::trace;

use crate::message::{
    ImpactKind, Message, MessageHeader, MessageKind, SpikeMessage, SynapticImpact,
    SynapticImpactMessage,
};
use crate::uid::Uid;

/// Failure while decoding an envelope buffer.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown message discriminant {0}")]
    UnknownTag(u8),
    #[error("unknown impact kind byte {0}")]
    UnknownImpactKind(u8),
    #[error("buffer truncated: needed {needed} more bytes")]
    Truncated { needed: usize },
}

// ─── Write primitives ───────────────────────────────────────────────────────

fn write_u8(buf: &mut Vec<u8>, val: u8) {
    buf.push(val);
}

fn write_u32(buf: &mut Vec<u8>, val: u32) {
    buf.extend_from_slice(&val.to_le_bytes());
}

fn write_u64(buf: &mut Vec<u8>, val: u64) {
    buf.extend_from_slice(&val.to_le_bytes());
}

fn write_f32(buf: &mut Vec<u8>, val: f32) {
    buf.extend_from_slice(&val.to_le_bytes());
}

fn write_uid(buf: &mut Vec<u8>, uid: Uid) {
    buf.extend_from_slice(uid.as_bytes());
}

fn write_header(buf: &mut Vec<u8>, header: &MessageHeader) {
    write_uid(buf, header.sender);
    write_u64(buf, header.step);
}

// ─── Read primitives ────────────────────────────────────────────────────────

fn take<'a>(cursor: &mut &'a [u8], len: usize) -> Result<&'a [u8], CodecError> {
    if cursor.len() < len {
        return Err(CodecError::Truncated {
            needed: len - cursor.len(),
        });
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    Ok(head)
}

fn read_u8(cursor: &mut &[u8]) -> Result<u8, CodecError> {
    Ok(take(cursor, 1)?[0])
}

fn read_u32(cursor: &mut &[u8]) -> Result<u32, CodecError> {
    let bytes = take(cursor, 4)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u64(cursor: &mut &[u8]) -> Result<u64, CodecError> {
    let bytes = take(cursor, 8)?;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_f32(cursor: &mut &[u8]) -> Result<f32, CodecError> {
    let bytes = take(cursor, 4)?;
    Ok(f32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_uid(cursor: &mut &[u8]) -> Result<Uid, CodecError> {
    let bytes = take(cursor, 16)?;
    Ok(Uid::from_bytes(bytes.try_into().unwrap()))
}

fn read_header(cursor: &mut &[u8]) -> Result<MessageHeader, CodecError> {
    Ok(MessageHeader {
        sender: read_uid(cursor)?,
        step: read_u64(cursor)?,
    })
}

// ─── Pack ───────────────────────────────────────────────────────────────────

/// Serialize a message into a self-contained envelope buffer.
pub fn pack(message: &Message) -> Vec<u8> {
    trace!(tag = message.kind().wire_tag(), "packing envelope");
    let mut buf = Vec::with_capacity(64);
    write_u8(&mut buf, message.kind().wire_tag());
    match message {
        Message::Spike(msg) => {
            write_header(&mut buf, &msg.header);
            write_u32(&mut buf, msg.neuron_indexes.len() as u32);
            for index in &msg.neuron_indexes {
                write_u32(&mut buf, *index);
            }
        }
        Message::SynapticImpact(msg) => {
            write_header(&mut buf, &msg.header);
            write_uid(&mut buf, msg.presynaptic_population);
            write_uid(&mut buf, msg.postsynaptic_population);
            write_u8(&mut buf, msg.is_forcing as u8);
            write_u32(&mut buf, msg.impacts.len() as u32);
            for impact in &msg.impacts {
                write_u64(&mut buf, impact.connection_index);
                write_f32(&mut buf, impact.impact);
                write_u8(&mut buf, impact.kind as u8);
                write_u32(&mut buf, impact.presynaptic_neuron_index);
                write_u32(&mut buf, impact.postsynaptic_neuron_index);
            }
        }
    }
    buf
}

// ─── Unpack ─────────────────────────────────────────────────────────────────

/// Deserialize an envelope buffer produced by [`pack`].
pub fn unpack(buffer: &[u8]) -> Result<Message, CodecError> {
    let mut cursor = buffer;
    let tag = read_u8(&mut cursor)?;
    let kind = MessageKind::from_wire_tag(tag).ok_or(CodecError::UnknownTag(tag))?;
    trace!(?kind, "unpacking envelope");
    match kind {
        MessageKind::Spike => {
            let header = read_header(&mut cursor)?;
            let count = read_u32(&mut cursor)? as usize;
            let mut neuron_indexes = Vec::with_capacity(count);
            for _ in 0..count {
                neuron_indexes.push(read_u32(&mut cursor)?);
            }
            Ok(Message::Spike(SpikeMessage {
                header,
                neuron_indexes,
            }))
        }
        MessageKind::SynapticImpact => {
            let header = read_header(&mut cursor)?;
            let presynaptic_population = read_uid(&mut cursor)?;
            let postsynaptic_population = read_uid(&mut cursor)?;
            let is_forcing = read_u8(&mut cursor)? != 0;
            let count = read_u32(&mut cursor)? as usize;
            let mut impacts = Vec::with_capacity(count);
            for _ in 0..count {
                let connection_index = read_u64(&mut cursor)?;
                let impact = read_f32(&mut cursor)?;
                let kind_byte = read_u8(&mut cursor)?;
                let kind = ImpactKind::from_wire(kind_byte)
                    .ok_or(CodecError::UnknownImpactKind(kind_byte))?;
                impacts.push(SynapticImpact {
                    connection_index,
                    impact,
                    kind,
                    presynaptic_neuron_index: read_u32(&mut cursor)?,
                    postsynaptic_neuron_index: read_u32(&mut cursor)?,
                });
            }
            Ok(Message::SynapticImpact(SynapticImpactMessage {
                header,
                presynaptic_population,
                postsynaptic_population,
                is_forcing,
                impacts,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated_spike() -> Message {
        Message::Spike(SpikeMessage {
            header: MessageHeader {
                sender: Uid::new(),
                step: 42,
            },
            neuron_indexes: vec![0, 5, 17, 1000],
        })
    }

    fn populated_impact() -> Message {
        Message::SynapticImpact(SynapticImpactMessage {
            header: MessageHeader {
                sender: Uid::new(),
                step: 9,
            },
            presynaptic_population: Uid::new(),
            postsynaptic_population: Uid::new(),
            is_forcing: true,
            impacts: vec![
                SynapticImpact {
                    connection_index: 3,
                    impact: 1.25,
                    kind: ImpactKind::Excitatory,
                    presynaptic_neuron_index: 0,
                    postsynaptic_neuron_index: 7,
                },
                SynapticImpact {
                    connection_index: 11,
                    impact: -0.5,
                    kind: ImpactKind::InhibitoryCurrent,
                    presynaptic_neuron_index: 2,
                    postsynaptic_neuron_index: 0,
                },
            ],
        })
    }

    #[test]
    fn spike_roundtrip() {
        let msg = populated_spike();
        assert_eq!(unpack(&pack(&msg)).unwrap(), msg);
    }

    #[test]
    fn spike_roundtrip_empty() {
        let msg = Message::Spike(SpikeMessage::default());
        assert_eq!(unpack(&pack(&msg)).unwrap(), msg);
    }

    #[test]
    fn impact_roundtrip() {
        let msg = populated_impact();
        assert_eq!(unpack(&pack(&msg)).unwrap(), msg);
    }

    #[test]
    fn impact_roundtrip_empty() {
        let msg = Message::SynapticImpact(SynapticImpactMessage::default());
        assert_eq!(unpack(&pack(&msg)).unwrap(), msg);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let mut buf = pack(&populated_spike());
        buf[0] = 9;
        assert!(matches!(unpack(&buf), Err(CodecError::UnknownTag(9))));

        buf[0] = 0; // reserved "none"
        assert!(matches!(unpack(&buf), Err(CodecError::UnknownTag(0))));
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let buf = pack(&populated_impact());
        for len in 0..buf.len() {
            assert!(
                matches!(unpack(&buf[..len]), Err(CodecError::Truncated { .. })),
                "prefix of {len} bytes decoded"
            );
        }
    }

    #[test]
    fn unknown_impact_kind_is_an_error() {
        let mut buf = pack(&Message::SynapticImpact(SynapticImpactMessage {
            impacts: vec![SynapticImpact {
                connection_index: 0,
                impact: 0.0,
                kind: ImpactKind::Excitatory,
                presynaptic_neuron_index: 0,
                postsynaptic_neuron_index: 0,
            }],
            ..SynapticImpactMessage::default()
        }));
        // Kind byte sits after tag + header + two uids + forcing + count +
        // connection_index + impact.
        let kind_offset = 1 + 24 + 32 + 1 + 4 + 8 + 4;
        buf[kind_offset] = 200;
        assert!(matches!(
            unpack(&buf),
            Err(CodecError::UnknownImpactKind(200))
        ));
    }
}
