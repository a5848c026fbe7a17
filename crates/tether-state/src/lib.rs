//! Replicated value model: typed values, per-slot codecs, and the schema
//! that packs, diffs and extrapolates whole states within a fixed byte
//! budget.

pub mod codec;
pub mod codecs;
pub mod schema;
pub mod state;
pub mod value;
pub mod wire;

pub use codec::{CodecError, Sample, ValueCodec};
pub use codecs::{BoolCodec, Float32Codec, Int32Codec, Vec3Codec};
pub use schema::{MAX_SLOTS, PackError, Packed, Schema, SchemaBuilder, SchemaError, UnpackError};
pub use state::State;
pub use value::{Value, ValueKind};
pub use wire::{ByteReader, ByteWriter, WireError};
