//! The wire envelope.
//!
//! Every datagram is one message:
//!
//! ```text
//! +-----------+---------------------+--------------------------+
//! | type (1)  | timestamp (4, LE)   | type-specific body       |
//! +-----------+---------------------+--------------------------+
//! ```
//!
//! The timestamp is the sender's network time in milliseconds,
//! `round(time * 1000)`. Bodies are fixed-layout except `State` and `Event`,
//! which carry a variable payload bounded so the whole message fits the
//! transport's 1024-byte maximum. This layout is a bit-exact contract between
//! peers; nothing here goes through a general-purpose serializer.

use thiserror::Error;

use tether_state::{ByteReader, ByteWriter, WireError};
use tether_topology::MAX_PAYLOAD;

/// Envelope bytes: type tag plus timestamp.
pub const HEADER_LEN: usize = 5;

/// Largest schema-packed state payload a `State` message can carry.
pub const MAX_STATE_PAYLOAD: usize = MAX_PAYLOAD - HEADER_LEN;

/// Largest packed event payload an `Event` message can carry
/// (sequence + flags + type index precede it).
pub const MAX_EVENT_PAYLOAD: usize = MAX_PAYLOAD - HEADER_LEN - 3;

const TAG_PING: u8 = 0x01;
const TAG_PONG: u8 = 0x02;
const TAG_STATE: u8 = 0x03;
const TAG_EVENT: u8 = 0x04;
const TAG_EVENT_ACK: u8 = 0x05;
const TAG_HANDSHAKE: u8 = 0x06;
const TAG_BYE: u8 = 0x07;

/// Converts network time in seconds to wire milliseconds.
pub fn time_to_wire(time: f64) -> u32 {
    (time * 1000.0).round() as u32
}

/// Converts wire milliseconds back to seconds.
pub fn wire_to_time(wire: u32) -> f64 {
    f64::from(wire) / 1000.0
}

/// Delivery class of an application event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent once, never retried. Duplicates are still filtered on receive.
    BestEffort,
    /// Retried until acknowledged; delivered to listeners in send order.
    ReliableOrdered,
}

impl Delivery {
    pub(crate) fn to_flags(self) -> u8 {
        match self {
            Delivery::BestEffort => 0,
            Delivery::ReliableOrdered => 1,
        }
    }

    pub(crate) fn from_flags(flags: u8) -> Option<Self> {
        match flags {
            0 => Some(Delivery::BestEffort),
            1 => Some(Delivery::ReliableOrdered),
            _ => None,
        }
    }
}

/// Whether a handshake expects a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeKind {
    /// Periodic announcement from a connecting peer; answered with a reply.
    Announce,
    /// Response to an announcement; never answered, which keeps two
    /// established peers from echoing handshakes at each other forever.
    Reply,
}

/// Errors from [`Message::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum MessageError {
    /// The payload ended before the message did.
    #[error(transparent)]
    Truncated(#[from] WireError),

    /// Unknown type tag.
    #[error("unknown message type 0x{0:02x}")]
    UnknownType(u8),

    /// Unknown event delivery flags.
    #[error("unknown event flags 0x{0:02x}")]
    UnknownFlags(u8),

    /// A fixed-layout body had bytes left over.
    #[error("{0} trailing byte(s) after message body")]
    TrailingBytes(usize),
}

/// One decoded wire message, timestamp excluded (it rides in the envelope).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Latency probe. `echo_time` is the sender's raw local clock in wire
    /// milliseconds — raw, not smoothed, so round-trip measurement is immune
    /// to clock nudging. `status` is the sender's application status byte.
    Ping {
        /// Sender's raw clock at send, wire ms.
        echo_time: u32,
        /// Sender's status byte.
        status: u8,
    },

    /// Answer to a ping.
    Pong {
        /// The ping's `echo_time`, returned verbatim.
        echo_time: u32,
        /// Responder's current one-way latency estimate, wire ms.
        latency: u32,
        /// Responder's latency standard deviation, wire ms.
        latency_spread: u32,
    },

    /// Schema-packed state snapshot or delta.
    State {
        /// Change mask plus packed slots, as produced by the schema.
        payload: Vec<u8>,
    },

    /// Application event.
    Event {
        /// Per-class wrapping sequence number.
        sequence: u8,
        /// Delivery class.
        delivery: Delivery,
        /// Index into the peers' shared event-type registry.
        type_index: u8,
        /// Serialized event body.
        payload: Vec<u8>,
    },

    /// Acknowledges a reliable-ordered event.
    EventAck {
        /// Sequence being acknowledged.
        sequence: u8,
    },

    /// Connection-time compatibility check.
    Handshake {
        /// Announce or reply.
        kind: HandshakeKind,
        /// Digest of the sender's state schema layout.
        schema_digest: u32,
        /// Digest of the sender's ordered event-type registry.
        event_digest: u32,
    },

    /// Graceful goodbye.
    Bye,
}

impl Message {
    fn type_tag(&self) -> u8 {
        match self {
            Message::Ping { .. } => TAG_PING,
            Message::Pong { .. } => TAG_PONG,
            Message::State { .. } => TAG_STATE,
            Message::Event { .. } => TAG_EVENT,
            Message::EventAck { .. } => TAG_EVENT_ACK,
            Message::Handshake { .. } => TAG_HANDSHAKE,
            Message::Bye => TAG_BYE,
        }
    }

    /// Encodes the message with the sender's network `time` stamped into the
    /// envelope. Payload bounds are enforced upstream; the writer's budget is
    /// the transport maximum and backstops them.
    pub fn encode(&self, time: f64) -> Result<Vec<u8>, WireError> {
        let mut w = ByteWriter::with_budget(MAX_PAYLOAD);
        w.write_u8(self.type_tag())?;
        w.write_u32(time_to_wire(time))?;
        match self {
            Message::Ping { echo_time, status } => {
                w.write_u32(*echo_time)?;
                w.write_u8(*status)?;
            }
            Message::Pong {
                echo_time,
                latency,
                latency_spread,
            } => {
                w.write_u32(*echo_time)?;
                w.write_u32(*latency)?;
                w.write_u32(*latency_spread)?;
            }
            Message::State { payload } => {
                w.write_bytes(payload)?;
            }
            Message::Event {
                sequence,
                delivery,
                type_index,
                payload,
            } => {
                w.write_u8(*sequence)?;
                w.write_u8(delivery.to_flags())?;
                w.write_u8(*type_index)?;
                w.write_bytes(payload)?;
            }
            Message::EventAck { sequence } => {
                w.write_u8(*sequence)?;
            }
            Message::Handshake {
                kind,
                schema_digest,
                event_digest,
            } => {
                w.write_u8(matches!(kind, HandshakeKind::Reply) as u8)?;
                w.write_u32(*schema_digest)?;
                w.write_u32(*event_digest)?;
            }
            Message::Bye => {}
        }
        Ok(w.into_bytes())
    }

    /// Decodes a datagram into the message and its envelope timestamp in
    /// seconds.
    pub fn decode(data: &[u8]) -> Result<(Message, f64), MessageError> {
        let mut r = ByteReader::new(data);
        let tag = r.read_u8()?;
        let time = wire_to_time(r.read_u32()?);

        let message = match tag {
            TAG_PING => Message::Ping {
                echo_time: r.read_u32()?,
                status: r.read_u8()?,
            },
            TAG_PONG => Message::Pong {
                echo_time: r.read_u32()?,
                latency: r.read_u32()?,
                latency_spread: r.read_u32()?,
            },
            TAG_STATE => Message::State {
                payload: r.read_rest().to_vec(),
            },
            TAG_EVENT => {
                let sequence = r.read_u8()?;
                let flags = r.read_u8()?;
                let delivery =
                    Delivery::from_flags(flags).ok_or(MessageError::UnknownFlags(flags))?;
                Message::Event {
                    sequence,
                    delivery,
                    type_index: r.read_u8()?,
                    payload: r.read_rest().to_vec(),
                }
            }
            TAG_EVENT_ACK => Message::EventAck {
                sequence: r.read_u8()?,
            },
            TAG_HANDSHAKE => {
                let kind = if r.read_u8()? == 0 {
                    HandshakeKind::Announce
                } else {
                    HandshakeKind::Reply
                };
                Message::Handshake {
                    kind,
                    schema_digest: r.read_u32()?,
                    event_digest: r.read_u32()?,
                }
            }
            TAG_BYE => Message::Bye,
            other => return Err(MessageError::UnknownType(other)),
        };

        if !r.is_empty() {
            return Err(MessageError::TrailingBytes(r.remaining()));
        }
        Ok((message, time))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
