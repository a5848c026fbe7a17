//! Application event types and typed listener plumbing.
//!
//! Event types are registered once, in the same order, on every peer; a
//! type's position in the registry is its wire tag. Registration captures
//! type-erased encode/decode function pointers, so dispatch needs no runtime
//! reflection beyond one `TypeId` lookup and a downcast that cannot fail for
//! a correctly-registered listener.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use tether_topology::NodeHandle;

use crate::message::MAX_EVENT_PAYLOAD;

/// Marker for types usable as replicated events.
pub trait ReplicatedEvent: Any + Serialize + DeserializeOwned {}

impl<T: Any + Serialize + DeserializeOwned> ReplicatedEvent for T {}

/// Errors from event registration and encoding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    /// The type was already registered.
    #[error("event type {tag:?} registered twice")]
    DuplicateType {
        /// Tag of the duplicate registration.
        tag: &'static str,
    },

    /// The registry is limited to 256 types (the wire tag is one byte).
    #[error("event registry is full")]
    RegistryFull,

    /// The type was never registered.
    #[error("event type is not registered")]
    UnregisteredType,

    /// The serialized event exceeds the per-message byte budget.
    #[error("packed event of {size} byte(s) exceeds the {MAX_EVENT_PAYLOAD}-byte maximum")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
    },

    /// Serialization failed.
    #[error("event serialization failed: {0}")]
    Serialize(String),
}

struct EventEntry {
    type_id: TypeId,
    tag: &'static str,
    decode: fn(&[u8]) -> Option<Box<dyn Any>>,
}

// ---------------------------------------------------------------------------
// EventRegistry
// ---------------------------------------------------------------------------

/// The ordered event-type registry. Must be declared identically, in the
/// same order, by every peer; the handshake digest enforces it.
#[derive(Default)]
pub struct EventRegistry {
    entries: Vec<EventEntry>,
}

impl EventRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `tag`. Declaration order is the wire tag order.
    pub fn register<T: ReplicatedEvent>(&mut self, tag: &'static str) -> Result<(), EventError> {
        if self.entries.len() >= 256 {
            return Err(EventError::RegistryFull);
        }
        let type_id = TypeId::of::<T>();
        if let Some(existing) = self.entries.iter().find(|e| e.type_id == type_id) {
            return Err(EventError::DuplicateType { tag: existing.tag });
        }
        self.entries.push(EventEntry {
            type_id,
            tag,
            decode: |bytes| {
                postcard::from_bytes::<T>(bytes)
                    .ok()
                    .map(|event| Box::new(event) as Box<dyn Any>)
            },
        });
        Ok(())
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stable digest of the registration order, exchanged in the handshake.
    /// FNV-1a over the tags; see `Schema::layout_digest` for why this is
    /// hand-rolled.
    pub fn digest(&self) -> u32 {
        let mut h: u32 = 0x811c_9dc5;
        for entry in &self.entries {
            for &b in entry.tag.as_bytes() {
                h ^= u32::from(b);
                h = h.wrapping_mul(0x0100_0193);
            }
            h ^= 0xFF;
            h = h.wrapping_mul(0x0100_0193);
        }
        h
    }

    pub(crate) fn contains(&self, type_id: TypeId) -> bool {
        self.entries.iter().any(|e| e.type_id == type_id)
    }

    /// Serializes `event`, returning its wire tag and payload.
    pub(crate) fn encode<T: ReplicatedEvent>(&self, event: &T) -> Result<(u8, Vec<u8>), EventError> {
        let type_id = TypeId::of::<T>();
        let index = self
            .entries
            .iter()
            .position(|e| e.type_id == type_id)
            .ok_or(EventError::UnregisteredType)?;
        let payload =
            postcard::to_allocvec(event).map_err(|e| EventError::Serialize(e.to_string()))?;
        if payload.len() > MAX_EVENT_PAYLOAD {
            return Err(EventError::PayloadTooLarge {
                size: payload.len(),
            });
        }
        Ok((index as u8, payload))
    }

    /// Deserializes a received payload by wire tag. `None` for unknown tags
    /// or malformed payloads — both are dropped upstream, not errors.
    pub(crate) fn decode(&self, type_index: u8, payload: &[u8]) -> Option<(TypeId, Box<dyn Any>)> {
        let entry = self.entries.get(usize::from(type_index))?;
        let event = (entry.decode)(payload)?;
        Some((entry.type_id, event))
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Context handed to event listeners alongside the decoded event.
#[derive(Debug, Clone, Copy)]
pub struct EventContext {
    /// The peer the event came from.
    pub peer: NodeHandle,
    /// Network time the sender stamped on the event.
    pub time: f64,
}

type ErasedHandler = Box<dyn FnMut(&EventContext, &dyn Any)>;

/// Per-type listener registrations, dispatched by iterating the matching
/// registration list.
#[derive(Default)]
pub(crate) struct EventListeners {
    by_type: HashMap<TypeId, Vec<ErasedHandler>>,
}

impl EventListeners {
    /// Registers a typed listener. The wrapper downcasts before invoking, so
    /// the closure never sees a foreign type.
    pub(crate) fn register<T, F>(&mut self, mut listener: F)
    where
        T: Any,
        F: FnMut(&EventContext, &T) + 'static,
    {
        self.by_type
            .entry(TypeId::of::<T>())
            .or_default()
            .push(Box::new(move |ctx, event| {
                if let Some(event) = event.downcast_ref::<T>() {
                    listener(ctx, event);
                }
            }));
    }

    /// Invokes every listener registered for `type_id`.
    pub(crate) fn dispatch(&mut self, type_id: TypeId, ctx: &EventContext, event: &dyn Any) {
        if let Some(handlers) = self.by_type.get_mut(&type_id) {
            for handler in handlers {
                handler(ctx, event);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
