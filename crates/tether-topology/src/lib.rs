//! The network topology capability consumed by the replication engine.
//!
//! A topology supplies peer identities, connect/disconnect notifications and
//! unreliable datagram delivery. It is polled, never pushed: all notifications
//! and inbound payloads surface synchronously from [`NetworkTopology::poll`],
//! on the caller's thread, so the engine above it can stay single-threaded
//! and tick-driven. Implementations that do background I/O must serialize it
//! onto the polling thread themselves.

use thiserror::Error;

pub mod memory;

pub use memory::{LinkConfig, MemoryHub, MemoryTopology};

/// Largest payload a topology must accept, in bytes.
pub const MAX_PAYLOAD: usize = 1024;

/// Opaque identity of a node on the topology. `NodeHandle(0)` is reserved
/// and never names a live node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub u64);

impl NodeHandle {
    /// The reserved invalid handle.
    pub const INVALID: NodeHandle = NodeHandle(0);

    /// Returns `true` if this handle can name a node.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// A notification surfaced by [`NetworkTopology::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    /// A remote node became reachable.
    PeerConnected {
        /// The new node.
        node: NodeHandle,
        /// Its display name.
        name: String,
    },
    /// A remote node is gone. Terminal for that handle.
    PeerDisconnected {
        /// The departed node.
        node: NodeHandle,
    },
    /// An inbound datagram. May be lost, duplicated or reordered upstream;
    /// never fragmented.
    Datagram {
        /// Sending node.
        from: NodeHandle,
        /// Payload bytes, at most [`MAX_PAYLOAD`].
        payload: Vec<u8>,
    },
}

/// Errors from [`NetworkTopology::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The payload exceeds [`MAX_PAYLOAD`].
    #[error("payload of {size} byte(s) exceeds the {MAX_PAYLOAD}-byte transport maximum")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
    },

    /// The destination handle names no live node.
    #[error("unknown destination node {0:?}")]
    UnknownNode(NodeHandle),
}

/// Abstract transport and peer-discovery boundary.
pub trait NetworkTopology {
    /// This node's own handle.
    fn local_handle(&self) -> NodeHandle;

    /// Pumps the transport, advancing its logical clock by `dt` seconds, and
    /// appends pending notifications to `events` in delivery order.
    fn poll(&mut self, dt: f64, events: &mut Vec<TopologyEvent>);

    /// Sends one unreliable datagram. `Ok` means accepted, not delivered.
    fn send(&mut self, to: NodeHandle, payload: &[u8]) -> Result<(), SendError>;

    /// Designates `node` (a live node, or the local handle) as the session's
    /// primary. Returns `false` if the handle names no live node.
    fn set_primary(&mut self, node: NodeHandle) -> bool;

    /// The current primary designation.
    fn primary(&self) -> NodeHandle;
}
