//! Abstract environments mapping registers and fields to abstract values.

use std::collections::BTreeMap;

use crate::{
    analysis::{AbstractValue, JoinSemiLattice, Lattice, MeetSemiLattice},
    ir::{FieldId, Reg},
};

/// Pseudo register holding the pending result of the last invoke or load-like operation,
/// read back by `move-result` and `move-result-pseudo`.
pub const RESULT_REGISTER: Reg = Reg(u32::MAX);

/// Point-wise map from registers and tracked fields to abstract values.
///
/// Unbound keys are ⊤. Binding any key to ⊥ collapses the whole environment to the bottom
/// state, which marks the program point as unreachable; bottom absorbs all later updates.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantEnvironment<V> {
    registers: BTreeMap<Reg, V>,
    fields: BTreeMap<FieldId, V>,
    bottom: bool,
}

impl<V: AbstractValue> Default for ConstantEnvironment<V> {
    fn default() -> Self {
        Self::top()
    }
}

impl<V: AbstractValue> ConstantEnvironment<V> {
    /// The environment without information.
    #[must_use]
    pub fn top() -> Self {
        Self {
            registers: BTreeMap::new(),
            fields: BTreeMap::new(),
            bottom: false,
        }
    }

    /// The unreachable environment.
    #[must_use]
    pub fn bottom() -> Self {
        Self {
            registers: BTreeMap::new(),
            fields: BTreeMap::new(),
            bottom: true,
        }
    }

    /// Returns `true` if this program point is unreachable.
    #[must_use]
    pub fn is_bottom(&self) -> bool {
        self.bottom
    }

    /// Returns `true` if nothing is known.
    #[must_use]
    pub fn is_top(&self) -> bool {
        !self.bottom && self.registers.is_empty() && self.fields.is_empty()
    }

    /// Collapses the environment to bottom.
    pub fn set_to_bottom(&mut self) {
        self.registers.clear();
        self.fields.clear();
        self.bottom = true;
    }

    /// Returns the value of a register.
    #[must_use]
    pub fn get(&self, reg: Reg) -> V {
        if self.bottom {
            return V::bottom();
        }
        self.registers.get(&reg).cloned().unwrap_or_else(V::top)
    }

    /// Binds a register.
    pub fn set(&mut self, reg: Reg, value: V) {
        Self::bind(&mut self.registers, &mut self.bottom, reg, value);
        if self.bottom {
            self.set_to_bottom();
        }
    }

    /// Returns the value of a tracked field.
    #[must_use]
    pub fn get_field(&self, field: FieldId) -> V {
        if self.bottom {
            return V::bottom();
        }
        self.fields.get(&field).cloned().unwrap_or_else(V::top)
    }

    /// Binds a tracked field.
    pub fn set_field(&mut self, field: FieldId, value: V) {
        Self::bind(&mut self.fields, &mut self.bottom, field, value);
        if self.bottom {
            self.set_to_bottom();
        }
    }

    /// Forgets every tracked field.
    pub fn clear_fields(&mut self) {
        self.fields.clear();
    }

    /// Iterates the non-top register bindings.
    pub fn registers(&self) -> impl Iterator<Item = (Reg, &V)> {
        self.registers.iter().map(|(r, v)| (*r, v))
    }

    fn bind<K: Ord>(map: &mut BTreeMap<K, V>, bottom: &mut bool, key: K, value: V) {
        if *bottom {
            return;
        }
        if value.is_bottom() {
            *bottom = true;
        } else if value.is_top() {
            map.remove(&key);
        } else {
            map.insert(key, value);
        }
    }

    fn join_maps<K: Ord + Copy>(a: &BTreeMap<K, V>, b: &BTreeMap<K, V>) -> BTreeMap<K, V> {
        a.iter()
            .filter_map(|(k, va)| {
                let joined = va.join(b.get(k)?);
                (!joined.is_top()).then_some((*k, joined))
            })
            .collect()
    }

    fn meet_maps<K: Ord + Copy>(
        a: &BTreeMap<K, V>,
        b: &BTreeMap<K, V>,
    ) -> Option<BTreeMap<K, V>> {
        let mut out = a.clone();
        for (k, vb) in b {
            let met = match a.get(k) {
                Some(va) => va.meet(vb),
                None => vb.clone(),
            };
            if met.is_bottom() {
                return None;
            }
            out.insert(*k, met);
        }
        Some(out)
    }
}

impl<V: AbstractValue> MeetSemiLattice for ConstantEnvironment<V> {
    fn meet(&self, other: &Self) -> Self {
        if self.bottom || other.bottom {
            return Self::bottom();
        }
        match (
            Self::meet_maps(&self.registers, &other.registers),
            Self::meet_maps(&self.fields, &other.fields),
        ) {
            (Some(registers), Some(fields)) => Self {
                registers,
                fields,
                bottom: false,
            },
            _ => Self::bottom(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.bottom
    }
}

impl<V: AbstractValue> JoinSemiLattice for ConstantEnvironment<V> {
    fn join(&self, other: &Self) -> Self {
        if self.bottom {
            return other.clone();
        }
        if other.bottom {
            return self.clone();
        }
        Self {
            registers: Self::join_maps(&self.registers, &other.registers),
            fields: Self::join_maps(&self.fields, &other.fields),
            bottom: false,
        }
    }

    fn is_top(&self) -> bool {
        ConstantEnvironment::is_top(self)
    }
}

impl<V: AbstractValue> Lattice for ConstantEnvironment<V> {
    fn top() -> Self {
        ConstantEnvironment::top()
    }

    fn bottom() -> Self {
        ConstantEnvironment::bottom()
    }
}
