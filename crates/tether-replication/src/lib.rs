//! Peer state replication over an unreliable transport.
//!
//! A [`Coordinator`] keeps a small set of simulation values synchronized
//! across peers and delivers discrete events between them with configurable
//! ordering and reliability, on top of loss, duplication and reordering.
//! Everything runs synchronously inside one `update(dt)` call per simulation
//! tick; the transport itself is an abstract
//! [`NetworkTopology`](tether_topology::NetworkTopology) capability supplied
//! by the application.
//!
//! The moving parts:
//!
//! - per-peer [`PeerProxy`] sessions with shadow-state history, dead
//!   reckoning queries, latency statistics and event bookkeeping;
//! - interest-based state cadence driven by spatial distance bands;
//! - ping/pong clock synchronization feeding a smoothed network time;
//! - at-most-once event delivery in two classes, best-effort and
//!   reliable-ordered, over an 8-bit wrapping sequence space.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod event;
pub mod message;
pub mod proxy;
mod window;

pub use clock::{LatencyTracker, NetworkClock};
pub use config::{ConfigError, ReplicationConfig};
pub use coordinator::{
    Coordinator, CoordinatorError, Diagnostics, DisconnectReason, PeerNotice, SendEventError,
    SetStateError,
};
pub use event::{EventContext, EventError, EventRegistry, ReplicatedEvent};
pub use message::{Delivery, HandshakeKind, MAX_EVENT_PAYLOAD, MAX_STATE_PAYLOAD, Message};
pub use proxy::{ConnectionState, PeerProxy};
