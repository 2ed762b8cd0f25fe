//! Whole-program field state.
//!
//! A [`WholeProgramState`] answers what a field may hold anywhere outside the static or
//! instance initializer of its owning class. It is computed once per optimization run by an
//! interprocedural summarizer and only read afterwards.

use std::collections::HashMap;

use crate::{analysis::AbstractValue, ir::FieldId};

/// Read-only, flow-insensitive approximation of field values.
pub trait WholeProgramState<V: AbstractValue>: Send + Sync {
    /// Returns the value `field` holds at every reachable point outside its class
    /// initializers, or top if nothing is known.
    fn field_value(&self, field: FieldId) -> V;
}

/// Map-backed [`WholeProgramState`]; fields without an entry are top.
#[derive(Debug, Clone)]
pub struct FieldSummary<V> {
    values: HashMap<FieldId, V>,
}

impl<V> Default for FieldSummary<V> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
        }
    }
}

impl<V: AbstractValue> FieldSummary<V> {
    /// Creates a summary that knows nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the summarized value of a field.
    pub fn set(&mut self, field: FieldId, value: V) {
        self.values.insert(field, value);
    }

    /// Builder form of [`FieldSummary::set`].
    #[must_use]
    pub fn with_field(mut self, field: FieldId, value: V) -> Self {
        self.set(field, value);
        self
    }

    /// Number of summarized fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no field is summarized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<V: AbstractValue> WholeProgramState<V> for FieldSummary<V> {
    fn field_value(&self, field: FieldId) -> V {
        self.values.get(&field).cloned().unwrap_or_else(V::top)
    }
}
