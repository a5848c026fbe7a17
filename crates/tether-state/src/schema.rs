//! The ordered codec list that defines a replicated object's wire layout.
//!
//! A [`Schema`] is declared once at setup and must be identical, slot for
//! slot, on every peer that exchanges the state type. It drives packing
//! (delta encoding against the last transmitted state), unpacking (merging
//! absent slots from a base state), and slot-wise prediction and blending.
//!
//! State payload layout:
//!
//! ```text
//! +----------------------+----------------------------------+
//! | change mask          | packed values of masked slots    |
//! | ceil(slots/8) bytes  | in schema order                  |
//! +----------------------+----------------------------------+
//! ```
//!
//! An all-ones mask is a full state; anything less is a delta the receiver
//! can only apply over a base state it already holds.

use thiserror::Error;

use crate::codec::{CodecError, Sample, ValueCodec};
use crate::state::State;
use crate::value::Value;
use crate::wire::{ByteReader, ByteWriter, WireError};

/// Hard cap on schema arity; keeps the change mask small and bounded.
pub const MAX_SLOTS: usize = 32;

/// Errors from schema construction and state validation.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SchemaError {
    /// A schema must have at least one slot.
    #[error("schema has no slots")]
    Empty,

    /// Too many slots declared.
    #[error("schema has {0} slots, maximum is {MAX_SLOTS}")]
    TooManySlots(usize),

    /// A supplied value list does not match the schema's arity.
    #[error("expected {expected} values, got {found}")]
    ArityMismatch {
        /// Slots the schema declares.
        expected: usize,
        /// Values actually supplied.
        found: usize,
    },

    /// A supplied value has the wrong kind for its slot.
    #[error("slot {slot}: {source}")]
    Slot {
        /// Offending slot index.
        slot: usize,
        /// The underlying kind mismatch.
        source: CodecError,
    },
}

/// Errors from packing a state for transmission.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum PackError {
    /// The state was not produced by this schema.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A slot failed to pack.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors from unpacking a received state payload.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum UnpackError {
    /// The payload was truncated or a slot failed to decode.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The payload was shorter than the change mask.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A delta payload arrived but no base state is held.
    #[error("delta state received without a base state")]
    MissingBase,

    /// Bytes remained after the last masked slot.
    #[error("{0} trailing byte(s) after state payload")]
    TrailingBytes(usize),
}

// ---------------------------------------------------------------------------
// SchemaBuilder
// ---------------------------------------------------------------------------

/// Builds a [`Schema`] from an ordered list of codecs.
#[derive(Default)]
pub struct SchemaBuilder {
    codecs: Vec<Box<dyn ValueCodec>>,
}

impl SchemaBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a slot. Declaration order is wire order.
    pub fn slot(mut self, codec: impl ValueCodec + 'static) -> Self {
        self.codecs.push(Box::new(codec));
        self
    }

    /// Appends an already-boxed slot.
    pub fn boxed_slot(mut self, codec: Box<dyn ValueCodec>) -> Self {
        self.codecs.push(codec);
        self
    }

    /// Finalizes the schema.
    pub fn build(self) -> Result<Schema, SchemaError> {
        if self.codecs.is_empty() {
            return Err(SchemaError::Empty);
        }
        if self.codecs.len() > MAX_SLOTS {
            return Err(SchemaError::TooManySlots(self.codecs.len()));
        }
        Ok(Schema {
            codecs: self.codecs,
        })
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// A packed state payload plus the slot mask it covers.
///
/// The mask tells the sender which slots were actually transmitted, so its
/// per-peer "last sent" reference advances only for those slots. Updating
/// unsent slots would let sub-threshold drift accumulate silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packed {
    /// The wire payload: change mask followed by the masked slots.
    pub bytes: Vec<u8>,
    /// Bit `i` set when slot `i` is present in `bytes`.
    pub mask: u32,
}

/// The ordered list of [`ValueCodec`]s for one replicated object type.
/// Stateless with respect to any particular [`State`] instance.
pub struct Schema {
    codecs: Vec<Box<dyn ValueCodec>>,
}

impl core::fmt::Debug for Schema {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Schema")
            .field("len", &self.codecs.len())
            .finish()
    }
}

impl Schema {
    /// Number of slots.
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    /// Returns `true` if the schema has no slots (never, post-build).
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Bytes of the leading change mask.
    pub fn mask_len(&self) -> usize {
        self.codecs.len().div_ceil(8)
    }

    /// Upper bound on a packed state payload: mask plus every slot's bound.
    pub fn max_packed_len(&self) -> usize {
        self.mask_len()
            + self
                .codecs
                .iter()
                .map(|c| c.max_packed_len())
                .sum::<usize>()
    }

    /// Stable digest of the wire layout, exchanged during the connection
    /// handshake to reject peers with a different schema declaration.
    ///
    /// FNV-1a over arity, slot kinds and packed bounds. Hand-rolled on
    /// purpose: the digest is part of the wire contract and must not change
    /// underneath us when a hashing dependency revises its algorithm.
    pub fn layout_digest(&self) -> u32 {
        let mut h: u32 = 0x811c_9dc5;
        let mut mix = |b: u8| {
            h ^= u32::from(b);
            h = h.wrapping_mul(0x0100_0193);
        };
        mix(self.codecs.len() as u8);
        for codec in &self.codecs {
            mix(codec.kind().digest_tag());
            mix(codec.max_packed_len() as u8);
        }
        h
    }

    /// Validates `values` against the schema and wraps them in a [`State`].
    pub fn state_from_values(&self, values: Vec<Value>) -> Result<State, SchemaError> {
        self.check_slots(values.iter())?;
        Ok(State::from_values(values))
    }

    /// Checks that `state` matches this schema's arity and slot kinds.
    pub fn validate_state(&self, state: &State) -> Result<(), SchemaError> {
        self.check_slots(state.values().iter())
    }

    fn check_slots<'a>(
        &self,
        values: impl ExactSizeIterator<Item = &'a Value>,
    ) -> Result<(), SchemaError> {
        self.check_arity(values.len())?;
        for (slot, (value, codec)) in values.zip(&self.codecs).enumerate() {
            if value.kind() != codec.kind() {
                return Err(SchemaError::Slot {
                    slot,
                    source: CodecError::KindMismatch {
                        expected: codec.kind(),
                        found: value.kind(),
                    },
                });
            }
        }
        Ok(())
    }

    fn check_arity(&self, found: usize) -> Result<(), SchemaError> {
        if found != self.codecs.len() {
            return Err(SchemaError::ArityMismatch {
                expected: self.codecs.len(),
                found,
            });
        }
        Ok(())
    }

    /// Packs `state` for one peer.
    ///
    /// When `last_sent` is present and `force_full` is false, only slots whose
    /// codec reports a significant change are included; `Ok(None)` means no
    /// slot qualified and nothing should be transmitted. A full payload packs
    /// every slot.
    pub fn pack(
        &self,
        state: &State,
        last_sent: Option<&State>,
        force_full: bool,
    ) -> Result<Option<Packed>, PackError> {
        self.check_arity(state.len())?;

        let mut mask: u32 = 0;
        for (slot, codec) in self.codecs.iter().enumerate() {
            let candidate = &state.values()[slot];
            let include = match (last_sent, force_full) {
                (Some(base), false) => codec.exceeds_threshold(&base.values()[slot], candidate),
                _ => true,
            };
            if include {
                mask |= 1 << slot;
            }
        }
        if mask == 0 {
            return Ok(None);
        }

        let mask_bytes = mask.to_le_bytes();
        let mut w = ByteWriter::with_budget(self.max_packed_len());
        w.write_bytes(&mask_bytes[..self.mask_len()])
            .map_err(CodecError::from)?;
        for (slot, codec) in self.codecs.iter().enumerate() {
            if mask & (1 << slot) != 0 {
                codec.pack(&state.values()[slot], &mut w)?;
            }
        }
        Ok(Some(Packed {
            bytes: w.into_bytes(),
            mask,
        }))
    }

    /// Slot-wise overlay: takes `update`'s value where the mask bit is set,
    /// `base`'s otherwise. Used by senders to advance their per-peer "last
    /// sent" reference by exactly the slots a packet carried.
    pub fn apply_mask(&self, base: &State, update: &State, mask: u32) -> State {
        let values = base
            .values()
            .iter()
            .zip(update.values())
            .enumerate()
            .map(|(slot, (old, new))| {
                if mask & (1 << slot) != 0 {
                    new.clone()
                } else {
                    old.clone()
                }
            })
            .collect();
        State::from_values(values)
    }

    /// Unpacks a received payload, merging slots absent from the change mask
    /// out of `base`. A delta without a base is unusable and rejected.
    pub fn unpack(&self, payload: &[u8], base: Option<&State>) -> Result<State, UnpackError> {
        let mut r = ByteReader::new(payload);
        let mask = r.read_bytes(self.mask_len())?.to_vec();

        let mut values = Vec::with_capacity(self.codecs.len());
        for (slot, codec) in self.codecs.iter().enumerate() {
            if mask[slot / 8] & (1 << (slot % 8)) != 0 {
                values.push(codec.unpack(&mut r)?);
            } else {
                match base {
                    Some(base) => values.push(base.values()[slot].clone()),
                    None => return Err(UnpackError::MissingBase),
                }
            }
        }
        if !r.is_empty() {
            return Err(UnpackError::TrailingBytes(r.remaining()));
        }
        Ok(State::from_values(values))
    }

    /// Predicts a whole state at `time` by extrapolating every slot from up to
    /// three shadow samples, newest first.
    pub fn extrapolate(
        &self,
        newest: (&State, f64),
        prev: Option<(&State, f64)>,
        oldest: Option<(&State, f64)>,
        time: f64,
    ) -> State {
        let values = self
            .codecs
            .iter()
            .enumerate()
            .map(|(slot, codec)| {
                codec.extrapolate(
                    Sample::new(&newest.0.values()[slot], newest.1),
                    prev.map(|(s, t)| Sample::new(&s.values()[slot], t)),
                    oldest.map(|(s, t)| Sample::new(&s.values()[slot], t)),
                    time,
                )
            })
            .collect();
        State::from_values(values)
    }

    /// Moves `current` toward `target` slot-wise by `coeff`.
    pub fn blend(&self, current: &State, target: &State, coeff: f32) -> Result<State, SchemaError> {
        self.check_arity(current.len())?;
        self.check_arity(target.len())?;
        let values = self
            .codecs
            .iter()
            .enumerate()
            .map(|(slot, codec)| {
                codec.blend(&current.values()[slot], &target.values()[slot], coeff)
            })
            .collect();
        Ok(State::from_values(values))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::{BoolCodec, Float32Codec, Vec3Codec};
    use glam::Vec3;

    fn test_schema() -> Schema {
        SchemaBuilder::new()
            .slot(Vec3Codec::new(0.01))
            .slot(Float32Codec::new(0.1))
            .slot(BoolCodec)
            .build()
            .unwrap()
    }

    fn state(schema: &Schema, pos: Vec3, heading: f32, alive: bool) -> State {
        schema
            .state_from_values(vec![
                Value::Vec3(pos),
                Value::Float(heading),
                Value::Bool(alive),
            ])
            .unwrap()
    }

    #[test]
    fn test_build_rejects_empty_schema() {
        assert_eq!(SchemaBuilder::new().build().unwrap_err(), SchemaError::Empty);
    }

    #[test]
    fn test_state_construction_checks_arity_and_kinds() {
        let schema = test_schema();
        let err = schema
            .state_from_values(vec![Value::Float(1.0)])
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::ArityMismatch {
                expected: 3,
                found: 1
            }
        );

        let err = schema
            .state_from_values(vec![
                Value::Float(1.0),
                Value::Float(1.0),
                Value::Bool(true),
            ])
            .unwrap_err();
        assert!(matches!(err, SchemaError::Slot { slot: 0, .. }));
    }

    #[test]
    fn test_full_pack_roundtrips() {
        let schema = test_schema();
        let s = state(&schema, Vec3::new(1.0, 2.0, 3.0), 0.5, true);
        let packed = schema.pack(&s, None, false).unwrap().unwrap();
        assert!(packed.bytes.len() <= schema.max_packed_len());
        assert_eq!(packed.mask, 0b111);
        let out = schema.unpack(&packed.bytes, None).unwrap();
        assert_eq!(out, s);
    }

    #[test]
    fn test_quiet_delta_packs_nothing() {
        let schema = test_schema();
        let sent = state(&schema, Vec3::ZERO, 1.0, true);
        let near = state(&schema, Vec3::new(0.001, 0.0, 0.0), 1.05, true);
        assert!(schema.pack(&near, Some(&sent), false).unwrap().is_none());
    }

    #[test]
    fn test_delta_packs_only_changed_slots() {
        let schema = test_schema();
        let sent = state(&schema, Vec3::ZERO, 1.0, true);
        let moved = state(&schema, Vec3::new(5.0, 0.0, 0.0), 1.0, true);

        let packed = schema.pack(&moved, Some(&sent), false).unwrap().unwrap();
        // Mask byte + one vec3; the float and bool ride along from the base.
        assert_eq!(packed.bytes.len(), 1 + 12);
        assert_eq!(packed.mask, 0b001);

        let out = schema.unpack(&packed.bytes, Some(&sent)).unwrap();
        assert_eq!(out, moved);
    }

    #[test]
    fn test_delta_without_base_is_rejected() {
        let schema = test_schema();
        let sent = state(&schema, Vec3::ZERO, 1.0, true);
        let moved = state(&schema, Vec3::new(5.0, 0.0, 0.0), 1.0, true);
        let packed = schema.pack(&moved, Some(&sent), false).unwrap().unwrap();
        assert_eq!(
            schema.unpack(&packed.bytes, None).unwrap_err(),
            UnpackError::MissingBase
        );
    }

    #[test]
    fn test_force_full_ignores_thresholds() {
        let schema = test_schema();
        let sent = state(&schema, Vec3::ZERO, 1.0, true);
        let same = sent.clone();
        let packed = schema.pack(&same, Some(&sent), true).unwrap().unwrap();
        assert_eq!(packed.mask, 0b111);
        let out = schema.unpack(&packed.bytes, None).unwrap();
        assert_eq!(out, same);
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let schema = test_schema();
        let s = state(&schema, Vec3::ZERO, 0.0, false);
        let mut bytes = schema.pack(&s, None, false).unwrap().unwrap().bytes;
        bytes.push(0xFF);
        assert_eq!(
            schema.unpack(&bytes, None).unwrap_err(),
            UnpackError::TrailingBytes(1)
        );
    }

    #[test]
    fn test_apply_mask_overlays_sent_slots_only() {
        let schema = test_schema();
        let last = state(&schema, Vec3::ZERO, 1.0, true);
        let current = state(&schema, Vec3::new(5.0, 0.0, 0.0), 2.0, false);

        let advanced = schema.apply_mask(&last, &current, 0b001);
        assert_eq!(advanced.vec3(0).unwrap(), Vec3::new(5.0, 0.0, 0.0));
        // Unsent slots keep the old reference.
        assert_eq!(advanced.float(1), Some(1.0));
        assert_eq!(advanced.boolean(2), Some(true));
    }

    #[test]
    fn test_layout_digest_is_order_sensitive() {
        let a = SchemaBuilder::new()
            .slot(Float32Codec::new(0.1))
            .slot(BoolCodec)
            .build()
            .unwrap();
        let b = SchemaBuilder::new()
            .slot(BoolCodec)
            .slot(Float32Codec::new(0.1))
            .build()
            .unwrap();
        let a2 = SchemaBuilder::new()
            .slot(Float32Codec::new(0.5))
            .slot(BoolCodec)
            .build()
            .unwrap();

        assert_ne!(a.layout_digest(), b.layout_digest());
        // Thresholds are local policy, not wire layout.
        assert_eq!(a.layout_digest(), a2.layout_digest());
    }

    #[test]
    fn test_schema_extrapolates_slot_wise() {
        let schema = test_schema();
        let s2 = state(&schema, Vec3::ZERO, 0.0, true);
        let s1 = state(&schema, Vec3::new(1.0, 0.0, 0.0), 0.0, true);
        let s0 = state(&schema, Vec3::new(2.0, 0.0, 0.0), 0.0, false);

        let out = schema.extrapolate((&s0, 2.0), Some((&s1, 1.0)), Some((&s2, 0.0)), 3.0);
        let pos = out.vec3(0).unwrap();
        assert!((pos.x - 3.0).abs() < 1e-3);
        // Discrete slot holds the newest sample.
        assert_eq!(out.boolean(2), Some(false));
    }

    #[test]
    fn test_blend_moves_motion_slots_and_snaps_discrete() {
        let schema = test_schema();
        let current = state(&schema, Vec3::ZERO, 0.0, true);
        let target = state(&schema, Vec3::new(10.0, 0.0, 0.0), 1.0, false);
        let out = schema.blend(&current, &target, 0.5).unwrap();
        assert_eq!(out.vec3(0).unwrap(), Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(out.float(1), Some(0.5));
        assert_eq!(out.boolean(2), Some(false));
    }
}
