//! An ordered, fixed-arity tuple of replicated values.

use glam::Vec3;

use crate::value::Value;

/// One replicated snapshot: an ordered sequence of [`Value`]s whose order and
/// count are fixed by the [`crate::Schema`] that produced it. Read-only after
/// construction; each peer builds and owns its own.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    values: Box<[Value]>,
}

impl State {
    pub(crate) fn from_values(values: Vec<Value>) -> Self {
        Self {
            values: values.into_boxed_slice(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the state has no slots.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The value in `slot`, if in range.
    pub fn get(&self, slot: usize) -> Option<&Value> {
        self.values.get(slot)
    }

    /// All values in schema order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The scalar in `slot`, if in range and of float kind.
    pub fn float(&self, slot: usize) -> Option<f32> {
        self.get(slot).and_then(Value::as_float)
    }

    /// The vector in `slot`, if in range and of vec3 kind.
    pub fn vec3(&self, slot: usize) -> Option<Vec3> {
        self.get(slot).and_then(Value::as_vec3)
    }

    /// The integer in `slot`, if in range and of int kind.
    pub fn int(&self, slot: usize) -> Option<i32> {
        self.get(slot).and_then(Value::as_int)
    }

    /// The flag in `slot`, if in range and of bool kind.
    pub fn boolean(&self, slot: usize) -> Option<bool> {
        self.get(slot).and_then(Value::as_bool)
    }
}
