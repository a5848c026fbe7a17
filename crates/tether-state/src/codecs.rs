//! Stock codecs for the built-in value kinds.
//!
//! `Float32Codec` and `Vec3Codec` are motion-like: they dead-reckon from the
//! shadow samples (velocity from the two newest, a damped acceleration term
//! when a third is available) and blend by linear interpolation.
//! `Int32Codec` and `BoolCodec` are discrete: any change is significant,
//! prediction holds the newest sample, and blending snaps.

use glam::Vec3;

use crate::codec::{CodecError, Sample, ValueCodec};
use crate::value::{Value, ValueKind};
use crate::wire::{ByteReader, ByteWriter};

/// Sample spacing below which velocity estimates are meaningless.
const MIN_SAMPLE_SPACING: f64 = 1e-4;

fn expect_float(value: &Value) -> Result<f32, CodecError> {
    value.as_float().ok_or(CodecError::KindMismatch {
        expected: ValueKind::Float,
        found: value.kind(),
    })
}

fn expect_vec3(value: &Value) -> Result<Vec3, CodecError> {
    value.as_vec3().ok_or(CodecError::KindMismatch {
        expected: ValueKind::Vec3,
        found: value.kind(),
    })
}

fn expect_int(value: &Value) -> Result<i32, CodecError> {
    value.as_int().ok_or(CodecError::KindMismatch {
        expected: ValueKind::Int,
        found: value.kind(),
    })
}

fn expect_bool(value: &Value) -> Result<bool, CodecError> {
    value.as_bool().ok_or(CodecError::KindMismatch {
        expected: ValueKind::Bool,
        found: value.kind(),
    })
}

// ---------------------------------------------------------------------------
// Dead-reckoning math
// ---------------------------------------------------------------------------

/// Velocity and half-acceleration displacement at `time`, generic over the
/// sample payload so the scalar and vector codecs share one implementation.
///
/// With two samples the prediction is linear; a third contributes a damped
/// acceleration term. Degenerate sample spacing falls back to holding.
fn predict<T>(
    newest: (T, f64),
    prev: Option<(T, f64)>,
    oldest: Option<(T, f64)>,
    time: f64,
    sub: impl Fn(T, T) -> T,
    scale: impl Fn(T, f64) -> T,
    add: impl Fn(T, T) -> T,
) -> T
where
    T: Copy,
{
    let (s0, t0) = newest;
    let Some((s1, t1)) = prev else {
        return s0;
    };
    let dt01 = t0 - t1;
    if dt01 < MIN_SAMPLE_SPACING {
        return s0;
    }
    let v01 = scale(sub(s0, s1), 1.0 / dt01);
    let dt = time - t0;

    let accel = oldest.and_then(|(s2, t2)| {
        let dt12 = t1 - t2;
        let span = (t0 - t2) * 0.5;
        if dt12 < MIN_SAMPLE_SPACING || span < MIN_SAMPLE_SPACING {
            return None;
        }
        let v12 = scale(sub(s1, s2), 1.0 / dt12);
        Some(scale(sub(v01, v12), 1.0 / span))
    });

    let mut out = add(s0, scale(v01, dt));
    if let Some(a) = accel {
        out = add(out, scale(a, 0.5 * dt * dt));
    }
    out
}

fn predict_f32(
    newest: (f32, f64),
    prev: Option<(f32, f64)>,
    oldest: Option<(f32, f64)>,
    time: f64,
) -> f32 {
    predict(
        newest,
        prev,
        oldest,
        time,
        |a, b| a - b,
        |v, k| (v as f64 * k) as f32,
        |a, b| a + b,
    )
}

fn predict_vec3(
    newest: (Vec3, f64),
    prev: Option<(Vec3, f64)>,
    oldest: Option<(Vec3, f64)>,
    time: f64,
) -> Vec3 {
    predict(
        newest,
        prev,
        oldest,
        time,
        |a, b| a - b,
        |v, k| v * k as f32,
        |a, b| a + b,
    )
}

// ---------------------------------------------------------------------------
// Float32Codec
// ---------------------------------------------------------------------------

/// A raw IEEE-754 scalar slot with dead reckoning.
#[derive(Debug, Clone)]
pub struct Float32Codec {
    /// Minimum absolute change worth retransmitting.
    pub threshold: f32,
}

impl Float32Codec {
    /// Creates a codec with the given significance threshold.
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl ValueCodec for Float32Codec {
    fn kind(&self) -> ValueKind {
        ValueKind::Float
    }

    fn max_packed_len(&self) -> usize {
        4
    }

    fn pack(&self, value: &Value, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_f32(expect_float(value)?)?;
        Ok(())
    }

    fn unpack(&self, r: &mut ByteReader<'_>) -> Result<Value, CodecError> {
        Ok(Value::Float(r.read_f32()?))
    }

    fn exceeds_threshold(&self, last_sent: &Value, candidate: &Value) -> bool {
        match (last_sent.as_float(), candidate.as_float()) {
            (Some(a), Some(b)) => (b - a).abs() > self.threshold,
            // A kind mismatch is always worth sending; packing will surface it.
            _ => true,
        }
    }

    fn extrapolate(
        &self,
        newest: Sample<'_>,
        prev: Option<Sample<'_>>,
        oldest: Option<Sample<'_>>,
        time: f64,
    ) -> Value {
        let Some(s0) = newest.value.as_float() else {
            return newest.value.clone();
        };
        let p = prev.and_then(|s| s.value.as_float().map(|v| (v, s.time)));
        let o = oldest.and_then(|s| s.value.as_float().map(|v| (v, s.time)));
        Value::Float(predict_f32((s0, newest.time), p, o, time))
    }

    fn blend(&self, current: &Value, target: &Value, coeff: f32) -> Value {
        match (current.as_float(), target.as_float()) {
            (Some(a), Some(b)) => Value::Float(a + (b - a) * coeff),
            _ => target.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Vec3Codec
// ---------------------------------------------------------------------------

/// A three-float vector slot (position, direction) with dead reckoning.
#[derive(Debug, Clone)]
pub struct Vec3Codec {
    /// Minimum euclidean displacement worth retransmitting.
    pub threshold: f32,
}

impl Vec3Codec {
    /// Creates a codec with the given significance threshold.
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl ValueCodec for Vec3Codec {
    fn kind(&self) -> ValueKind {
        ValueKind::Vec3
    }

    fn max_packed_len(&self) -> usize {
        12
    }

    fn pack(&self, value: &Value, w: &mut ByteWriter) -> Result<(), CodecError> {
        let v = expect_vec3(value)?;
        w.write_f32(v.x)?;
        w.write_f32(v.y)?;
        w.write_f32(v.z)?;
        Ok(())
    }

    fn unpack(&self, r: &mut ByteReader<'_>) -> Result<Value, CodecError> {
        let x = r.read_f32()?;
        let y = r.read_f32()?;
        let z = r.read_f32()?;
        Ok(Value::Vec3(Vec3::new(x, y, z)))
    }

    fn exceeds_threshold(&self, last_sent: &Value, candidate: &Value) -> bool {
        match (last_sent.as_vec3(), candidate.as_vec3()) {
            (Some(a), Some(b)) => (b - a).length() > self.threshold,
            _ => true,
        }
    }

    fn extrapolate(
        &self,
        newest: Sample<'_>,
        prev: Option<Sample<'_>>,
        oldest: Option<Sample<'_>>,
        time: f64,
    ) -> Value {
        let Some(s0) = newest.value.as_vec3() else {
            return newest.value.clone();
        };
        let p = prev.and_then(|s| s.value.as_vec3().map(|v| (v, s.time)));
        let o = oldest.and_then(|s| s.value.as_vec3().map(|v| (v, s.time)));
        Value::Vec3(predict_vec3((s0, newest.time), p, o, time))
    }

    fn blend(&self, current: &Value, target: &Value, coeff: f32) -> Value {
        match (current.as_vec3(), target.as_vec3()) {
            (Some(a), Some(b)) => Value::Vec3(a.lerp(b, coeff)),
            _ => target.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Int32Codec
// ---------------------------------------------------------------------------

/// A discrete 32-bit integer slot. Any change is significant.
#[derive(Debug, Clone, Default)]
pub struct Int32Codec;

impl ValueCodec for Int32Codec {
    fn kind(&self) -> ValueKind {
        ValueKind::Int
    }

    fn max_packed_len(&self) -> usize {
        4
    }

    fn pack(&self, value: &Value, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_i32(expect_int(value)?)?;
        Ok(())
    }

    fn unpack(&self, r: &mut ByteReader<'_>) -> Result<Value, CodecError> {
        Ok(Value::Int(r.read_i32()?))
    }

    fn exceeds_threshold(&self, last_sent: &Value, candidate: &Value) -> bool {
        last_sent != candidate
    }

    fn extrapolate(
        &self,
        newest: Sample<'_>,
        _prev: Option<Sample<'_>>,
        _oldest: Option<Sample<'_>>,
        _time: f64,
    ) -> Value {
        newest.value.clone()
    }
}

// ---------------------------------------------------------------------------
// BoolCodec
// ---------------------------------------------------------------------------

/// A single-flag slot. Any change is significant.
#[derive(Debug, Clone, Default)]
pub struct BoolCodec;

impl ValueCodec for BoolCodec {
    fn kind(&self) -> ValueKind {
        ValueKind::Bool
    }

    fn max_packed_len(&self) -> usize {
        1
    }

    fn pack(&self, value: &Value, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_u8(expect_bool(value)? as u8)?;
        Ok(())
    }

    fn unpack(&self, r: &mut ByteReader<'_>) -> Result<Value, CodecError> {
        Ok(Value::Bool(r.read_u8()? != 0))
    }

    fn exceeds_threshold(&self, last_sent: &Value, candidate: &Value) -> bool {
        last_sent != candidate
    }

    fn extrapolate(
        &self,
        newest: Sample<'_>,
        _prev: Option<Sample<'_>>,
        _oldest: Option<Sample<'_>>,
        _time: f64,
    ) -> Value {
        newest.value.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(codec: &dyn ValueCodec, value: Value) -> Value {
        let mut w = ByteWriter::with_budget(codec.max_packed_len());
        codec.pack(&value, &mut w).unwrap();
        let bytes = w.into_bytes();
        assert!(bytes.len() <= codec.max_packed_len());
        let mut r = ByteReader::new(&bytes);
        let out = codec.unpack(&mut r).unwrap();
        assert!(r.is_empty(), "codec left trailing bytes");
        out
    }

    #[test]
    fn test_pack_unpack_roundtrips() {
        let f = Float32Codec::new(0.01);
        assert_eq!(roundtrip(&f, Value::Float(-7.625)), Value::Float(-7.625));

        let v = Vec3Codec::new(0.01);
        let pos = Value::Vec3(Vec3::new(1.5, -2.0, 1000.25));
        assert_eq!(roundtrip(&v, pos.clone()), pos);

        assert_eq!(roundtrip(&Int32Codec, Value::Int(i32::MIN)), Value::Int(i32::MIN));
        assert_eq!(roundtrip(&BoolCodec, Value::Bool(true)), Value::Bool(true));
    }

    #[test]
    fn test_pack_rejects_wrong_kind() {
        let codec = Float32Codec::new(0.01);
        let mut w = ByteWriter::with_budget(8);
        let err = codec.pack(&Value::Bool(true), &mut w).unwrap_err();
        assert_eq!(
            err,
            CodecError::KindMismatch {
                expected: ValueKind::Float,
                found: ValueKind::Bool
            }
        );
    }

    #[test]
    fn test_float_threshold_is_strict_inequality() {
        let codec = Float32Codec::new(0.5);
        let last = Value::Float(1.0);
        assert!(!codec.exceeds_threshold(&last, &Value::Float(1.4)));
        assert!(!codec.exceeds_threshold(&last, &Value::Float(1.5)));
        assert!(codec.exceeds_threshold(&last, &Value::Float(1.6)));
        assert!(codec.exceeds_threshold(&last, &Value::Float(0.4)));
    }

    #[test]
    fn test_vec3_threshold_uses_distance() {
        let codec = Vec3Codec::new(1.0);
        let last = Value::Vec3(Vec3::ZERO);
        assert!(!codec.exceeds_threshold(&last, &Value::Vec3(Vec3::new(0.5, 0.5, 0.5))));
        assert!(codec.exceeds_threshold(&last, &Value::Vec3(Vec3::new(0.0, 0.0, 1.1))));
    }

    #[test]
    fn test_discrete_threshold_is_any_change() {
        assert!(!Int32Codec.exceeds_threshold(&Value::Int(3), &Value::Int(3)));
        assert!(Int32Codec.exceeds_threshold(&Value::Int(3), &Value::Int(4)));
        assert!(BoolCodec.exceeds_threshold(&Value::Bool(false), &Value::Bool(true)));
    }

    #[test]
    fn test_linear_motion_extrapolates_exactly() {
        // Constant velocity 3.0/s sampled at t = 0, 1, 2.
        let codec = Float32Codec::new(0.01);
        let s2 = Value::Float(0.0);
        let s1 = Value::Float(3.0);
        let s0 = Value::Float(6.0);
        let out = codec.extrapolate(
            Sample::new(&s0, 2.0),
            Some(Sample::new(&s1, 1.0)),
            Some(Sample::new(&s2, 0.0)),
            2.5,
        );
        let got = out.as_float().unwrap();
        assert!((got - 7.5).abs() < 1e-4, "expected 7.5, got {got}");
    }

    #[test]
    fn test_vec3_linear_motion_extrapolates_exactly() {
        let codec = Vec3Codec::new(0.01);
        let v = Vec3::new(1.0, -2.0, 0.5);
        let s2 = Value::Vec3(Vec3::ZERO);
        let s1 = Value::Vec3(v);
        let s0 = Value::Vec3(v * 2.0);
        let out = codec.extrapolate(
            Sample::new(&s0, 2.0),
            Some(Sample::new(&s1, 1.0)),
            Some(Sample::new(&s2, 0.0)),
            3.0,
        );
        let got = out.as_vec3().unwrap();
        assert!((got - v * 3.0).length() < 1e-3, "expected {:?}, got {got:?}", v * 3.0);
    }

    #[test]
    fn test_single_sample_holds_value() {
        let codec = Float32Codec::new(0.01);
        let s0 = Value::Float(4.0);
        let out = codec.extrapolate(Sample::new(&s0, 1.0), None, None, 9.0);
        assert_eq!(out, Value::Float(4.0));
    }

    #[test]
    fn test_discrete_codecs_hold_newest() {
        let s0 = Value::Int(9);
        let s1 = Value::Int(5);
        let out = Int32Codec.extrapolate(
            Sample::new(&s0, 2.0),
            Some(Sample::new(&s1, 1.0)),
            None,
            10.0,
        );
        assert_eq!(out, Value::Int(9));
    }

    #[test]
    fn test_blend_lerps_motion_and_snaps_discrete() {
        let f = Float32Codec::new(0.01);
        assert_eq!(
            f.blend(&Value::Float(0.0), &Value::Float(10.0), 0.25),
            Value::Float(2.5)
        );
        assert_eq!(
            Int32Codec.blend(&Value::Int(1), &Value::Int(2), 0.25),
            Value::Int(2)
        );
    }
}
