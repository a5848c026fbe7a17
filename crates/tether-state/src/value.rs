//! The typed unit of replicated data.

use glam::Vec3;

/// Discriminant of a [`Value`]. Kind tags participate in the schema layout
/// digest, so their numeric values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// 32-bit float.
    Float,
    /// Three-component float vector.
    Vec3,
    /// 32-bit signed integer.
    Int,
    /// Boolean flag.
    Bool,
}

impl ValueKind {
    /// Stable byte fed into [`crate::Schema::layout_digest`].
    pub(crate) fn digest_tag(self) -> u8 {
        match self {
            ValueKind::Float => 0x01,
            ValueKind::Vec3 => 0x02,
            ValueKind::Int => 0x03,
            ValueKind::Bool => 0x04,
        }
    }
}

/// An opaque typed value, immutable once constructed and owned by the
/// [`crate::State`] that holds it.
///
/// A tagged union rather than a downcast hierarchy: slot access can fail only
/// by returning `None`, never at runtime type-cast.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Scalar, e.g. health or throttle.
    Float(f32),
    /// Position or direction.
    Vec3(Vec3),
    /// Discrete counter or id.
    Int(i32),
    /// On/off flag.
    Bool(bool),
}

impl Value {
    /// The kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Float(_) => ValueKind::Float,
            Value::Vec3(_) => ValueKind::Vec3,
            Value::Int(_) => ValueKind::Int,
            Value::Bool(_) => ValueKind::Bool,
        }
    }

    /// Returns the scalar if this is a [`Value::Float`].
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the vector if this is a [`Value::Vec3`].
    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            Value::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the integer if this is a [`Value::Int`].
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the flag if this is a [`Value::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(Value::Float(1.0).kind(), ValueKind::Float);
        assert_eq!(Value::Vec3(Vec3::ZERO).kind(), ValueKind::Vec3);
        assert_eq!(Value::Int(0).kind(), ValueKind::Int);
        assert_eq!(Value::Bool(true).kind(), ValueKind::Bool);
    }

    #[test]
    fn test_typed_accessors_reject_other_kinds() {
        let v = Value::Float(2.5);
        assert_eq!(v.as_float(), Some(2.5));
        assert_eq!(v.as_vec3(), None);
        assert_eq!(v.as_int(), None);
        assert_eq!(v.as_bool(), None);
    }
}
