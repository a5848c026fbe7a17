//! The per-slot packing and prediction seam.
//!
//! A [`ValueCodec`] is the strategy object declared once per schema slot. It
//! knows how to pack and unpack one [`Value`] within a bounded byte budget,
//! whether a new value differs enough from the last transmitted one to be
//! worth sending, and how to predict a value at query time from the few
//! timestamped samples a peer proxy keeps.

use thiserror::Error;

use crate::value::{Value, ValueKind};
use crate::wire::{ByteReader, ByteWriter, WireError};

/// Errors produced while packing or unpacking a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CodecError {
    /// The value handed to the codec is not the kind it was declared for.
    #[error("expected a {expected:?} value, got {found:?}")]
    KindMismatch {
        /// Kind the codec packs.
        expected: ValueKind,
        /// Kind actually supplied.
        found: ValueKind,
    },

    /// The underlying byte cursor ran out of budget or payload.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// A timestamped shadow sample handed to [`ValueCodec::extrapolate`].
#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
    /// The decoded value.
    pub value: &'a Value,
    /// Network time the value was produced at.
    pub time: f64,
}

impl<'a> Sample<'a> {
    /// Convenience constructor.
    pub fn new(value: &'a Value, time: f64) -> Self {
        Self { value, time }
    }
}

/// Per-slot replication policy.
///
/// Implementations must be deterministic: packing the same value twice yields
/// identical bytes, and `unpack(pack(v)) == v` within the codec's precision.
pub trait ValueCodec: Send + Sync {
    /// The [`ValueKind`] this codec packs and produces.
    fn kind(&self) -> ValueKind;

    /// Upper bound on the bytes one [`ValueCodec::pack`] call may write.
    fn max_packed_len(&self) -> usize;

    /// Packs `value` into the writer.
    fn pack(&self, value: &Value, w: &mut ByteWriter) -> Result<(), CodecError>;

    /// Reads one value back out of the payload.
    fn unpack(&self, r: &mut ByteReader<'_>) -> Result<Value, CodecError>;

    /// Whether `candidate` differs enough from the value last transmitted to
    /// a peer that it should be sent again.
    fn exceeds_threshold(&self, last_sent: &Value, candidate: &Value) -> bool;

    /// Predicts the value at `time` from up to three samples, newest first.
    ///
    /// `newest.time <= time` in the common case, but implementations must
    /// tolerate queries at or before the newest sample. Motion-like codecs
    /// dead-reckon; discrete codecs hold the newest value.
    fn extrapolate(
        &self,
        newest: Sample<'_>,
        prev: Option<Sample<'_>>,
        oldest: Option<Sample<'_>>,
        time: f64,
    ) -> Value;

    /// Moves `current` toward `target` by `coeff` (0 = hold current,
    /// 1 = snap to target). Discrete codecs snap; the default does.
    fn blend(&self, _current: &Value, target: &Value, _coeff: f32) -> Value {
        target.clone()
    }
}
