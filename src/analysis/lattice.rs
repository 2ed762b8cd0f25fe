//! Lattice traits for abstract interpretation.
//!
//! A lattice defines how abstract values are compared and combined. This module provides
//! the traits every abstract domain in the crate implements, plus the default constant
//! domain.
//!
//! # Orientation
//!
//! - **Top (⊤)**: no information, any runtime value is possible
//! - **Bottom (⊥)**: no runtime value is possible; the program point is unreachable
//! - **Meet (∧)**: greatest lower bound, the values both operands allow
//! - **Join (∨)**: least upper bound, used where control flow paths merge
//!
//! Refining a value with a branch condition or a switch case key is a meet; a meet that
//! ends in bottom proves the path infeasible.

use std::fmt::Debug;

/// A meet semi-lattice with a meet (greatest lower bound) operation.
///
/// The meet operation must satisfy:
///
/// - **Idempotent**: `x.meet(x) = x`
/// - **Commutative**: `x.meet(y) = y.meet(x)`
/// - **Associative**: `x.meet(y.meet(z)) = (x.meet(y)).meet(z)`
pub trait MeetSemiLattice: Clone + Debug + PartialEq {
    /// Computes the meet (greatest lower bound) of two lattice elements.
    #[must_use]
    fn meet(&self, other: &Self) -> Self;

    /// Returns `true` if this is the bottom element.
    ///
    /// Once bottom is reached, further meets cannot change the value.
    fn is_bottom(&self) -> bool;
}

/// A join semi-lattice with a join (least upper bound) operation.
///
/// The join operation must satisfy:
///
/// - **Idempotent**: `x.join(x) = x`
/// - **Commutative**: `x.join(y) = y.join(x)`
/// - **Associative**: `x.join(y.join(z)) = (x.join(y)).join(z)`
pub trait JoinSemiLattice: Clone + Debug + PartialEq {
    /// Computes the join (least upper bound) of two lattice elements.
    #[must_use]
    fn join(&self, other: &Self) -> Self;

    /// Returns `true` if this is the top element.
    ///
    /// The top element is the identity for meet: `x.meet(top) = x`.
    fn is_top(&self) -> bool;
}

/// A complete lattice with both meet and join operations.
///
/// # Required Properties
///
/// - All properties of `MeetSemiLattice` and `JoinSemiLattice`
/// - **Absorption**: `x.meet(x.join(y)) = x` and `x.join(x.meet(y)) = x`
pub trait Lattice: MeetSemiLattice + JoinSemiLattice {
    /// Returns the top (⊤) element of the lattice.
    fn top() -> Self;

    /// Returns the bottom (⊥) element of the lattice.
    fn bottom() -> Self;
}

/// An abstract value domain usable for constant propagation.
///
/// Concrete domains are pluggable; they only have to expose their exact-constant states.
pub trait AbstractValue: Lattice + Send + Sync + 'static {
    /// Returns the singleton element describing exactly `value`.
    fn from_constant(value: i64) -> Self;

    /// Returns the constant this element describes, if it describes exactly one.
    fn constant_value(&self) -> Option<i64>;

    /// Returns `true` if every runtime value described by `self` is already equal to the
    /// runtime value described by `other`.
    ///
    /// Used to prove stores redundant: only two identical singletons qualify.
    fn runtime_equals(&self, other: &Self) -> bool {
        matches!(
            (self.constant_value(), other.constant_value()),
            (Some(a), Some(b)) if a == b
        )
    }
}

/// The flat constant lattice: ⊤, one element per integer constant, ⊥.
///
/// Object references use this domain too, with `Constant(0)` standing for `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConstantDomain {
    /// Any value
    #[default]
    Top,
    /// Exactly this value
    Constant(i64),
    /// No value
    Bottom,
}

impl MeetSemiLattice for ConstantDomain {
    fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Top, x) | (x, Self::Top) => *x,
            (Self::Constant(a), Self::Constant(b)) if a == b => Self::Constant(*a),
            _ => Self::Bottom,
        }
    }

    fn is_bottom(&self) -> bool {
        matches!(self, Self::Bottom)
    }
}

impl JoinSemiLattice for ConstantDomain {
    fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Bottom, x) | (x, Self::Bottom) => *x,
            (Self::Constant(a), Self::Constant(b)) if a == b => Self::Constant(*a),
            _ => Self::Top,
        }
    }

    fn is_top(&self) -> bool {
        matches!(self, Self::Top)
    }
}

impl Lattice for ConstantDomain {
    fn top() -> Self {
        Self::Top
    }

    fn bottom() -> Self {
        Self::Bottom
    }
}

impl AbstractValue for ConstantDomain {
    fn from_constant(value: i64) -> Self {
        Self::Constant(value)
    }

    fn constant_value(&self) -> Option<i64> {
        match self {
            Self::Constant(value) => Some(*value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meet() {
        let c1 = ConstantDomain::Constant(1);
        let c2 = ConstantDomain::Constant(2);
        assert_eq!(ConstantDomain::Top.meet(&c1), c1);
        assert_eq!(c1.meet(&c1), c1);
        assert!(c1.meet(&c2).is_bottom());
        assert!(ConstantDomain::Bottom.meet(&ConstantDomain::Top).is_bottom());
    }

    #[test]
    fn test_join() {
        let c1 = ConstantDomain::Constant(1);
        let c2 = ConstantDomain::Constant(2);
        assert_eq!(ConstantDomain::Bottom.join(&c1), c1);
        assert!(c1.join(&c2).is_top());
        assert_eq!(c2.join(&c2), c2);
    }

    #[test]
    fn test_absorption() {
        let values = [
            ConstantDomain::Top,
            ConstantDomain::Bottom,
            ConstantDomain::Constant(3),
            ConstantDomain::Constant(4),
        ];
        for x in values {
            for y in values {
                assert_eq!(x.meet(&x.join(&y)), x);
                assert_eq!(x.join(&x.meet(&y)), x);
            }
        }
    }

    #[test]
    fn test_runtime_equals_requires_singletons() {
        let seven = ConstantDomain::Constant(7);
        assert!(seven.runtime_equals(&ConstantDomain::Constant(7)));
        assert!(!seven.runtime_equals(&ConstantDomain::Constant(8)));
        assert!(!seven.runtime_equals(&ConstantDomain::Top));
        assert!(!ConstantDomain::Top.runtime_equals(&ConstantDomain::Top));
    }
}
