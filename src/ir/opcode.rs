//! Opcodes of the register-based intermediate representation.
//!
//! The opcode set mirrors the register machine the optimizer targets: constants, register
//! moves, field and array accesses, integer arithmetic, control flow and invokes. Operations
//! that may throw and produce a value (field gets, array gets, literal division) do not write
//! their destination directly; they are followed by a `move-result-pseudo` which carries the
//! destination register, so the pair can be treated as one unit when replaced.

use strum::{Display, EnumIter};

/// An operation code of the intermediate representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Opcode {
    /// No operation
    Nop,
    /// Load a 32-bit constant
    Const,
    /// Load a 64-bit constant
    ConstWide,
    /// Copy a 32-bit register
    Move,
    /// Copy a 64-bit register
    MoveWide,
    /// Copy an object register
    MoveObject,
    /// Fetch the 32-bit result of the preceding invoke
    MoveResult,
    /// Fetch the 64-bit result of the preceding invoke
    MoveResultWide,
    /// Fetch the object result of the preceding invoke
    MoveResultObject,
    /// Destination of the preceding load-like operation (32-bit)
    MoveResultPseudo,
    /// Destination of the preceding load-like operation (64-bit)
    MoveResultPseudoWide,
    /// Destination of the preceding load-like operation (object)
    MoveResultPseudoObject,
    /// Return without value
    ReturnVoid,
    /// Return a 32-bit value
    Return,
    /// Return a 64-bit value
    ReturnWide,
    /// Return an object
    ReturnObject,
    /// Unconditional jump
    Goto,
    /// Branch if `a == b`
    IfEq,
    /// Branch if `a != b`
    IfNe,
    /// Branch if `a < b`
    IfLt,
    /// Branch if `a >= b`
    IfGe,
    /// Branch if `a > b`
    IfGt,
    /// Branch if `a <= b`
    IfLe,
    /// Branch if `a == 0`
    IfEqz,
    /// Branch if `a != 0`
    IfNez,
    /// Branch if `a < 0`
    IfLtz,
    /// Branch if `a >= 0`
    IfGez,
    /// Branch if `a > 0`
    IfGtz,
    /// Branch if `a <= 0`
    IfLez,
    /// Multi-way branch on a 32-bit scrutinee
    Switch,
    /// Static field get (32-bit)
    Sget,
    /// Static field get (64-bit)
    SgetWide,
    /// Static field get (object)
    SgetObject,
    /// Static field put (32-bit)
    Sput,
    /// Static field put (64-bit)
    SputWide,
    /// Static field put (object)
    SputObject,
    /// Instance field get (32-bit)
    Iget,
    /// Instance field get (64-bit)
    IgetWide,
    /// Instance field get (object)
    IgetObject,
    /// Instance field put (32-bit)
    Iput,
    /// Instance field put (64-bit)
    IputWide,
    /// Instance field put (object)
    IputObject,
    /// Array element get
    Aget,
    /// Array element put
    Aput,
    /// `dest = a + b`
    AddInt,
    /// `dest = a - b`
    SubInt,
    /// `dest = a * b`
    MulInt,
    /// `dest = a + lit`
    AddIntLit,
    /// `dest = lit - a`
    RsubIntLit,
    /// `dest = a * lit`
    MulIntLit,
    /// `dest = a & lit`
    AndIntLit,
    /// `dest = a | lit`
    OrIntLit,
    /// `dest = a ^ lit`
    XorIntLit,
    /// `dest = a << lit`
    ShlIntLit,
    /// `dest = a >> lit` (arithmetic)
    ShrIntLit,
    /// `dest = a >>> lit` (logical)
    UshrIntLit,
    /// `dest = a / lit`, may throw
    DivIntLit,
    /// `dest = a % lit`, may throw
    RemIntLit,
    /// Allocate an instance of a type
    NewInstance,
    /// Invoke a static method
    InvokeStatic,
    /// Invoke a private method or constructor
    InvokeDirect,
    /// Invoke a virtual method
    InvokeVirtual,
    /// Invoke the super class implementation of a method
    InvokeSuper,
    /// Invoke an interface method
    InvokeInterface,
    /// Throw an exception
    Throw,
}

impl Opcode {
    /// Returns `true` for `const` and `const-wide`.
    #[must_use]
    pub fn is_const(self) -> bool {
        matches!(self, Self::Const | Self::ConstWide)
    }

    /// Returns `true` for plain register-to-register moves.
    #[must_use]
    pub fn is_move(self) -> bool {
        matches!(self, Self::Move | Self::MoveWide | Self::MoveObject)
    }

    /// Returns `true` for the `move-result` family following an invoke.
    #[must_use]
    pub fn is_move_result(self) -> bool {
        matches!(
            self,
            Self::MoveResult | Self::MoveResultWide | Self::MoveResultObject
        )
    }

    /// Returns `true` for the `move-result-pseudo` family.
    #[must_use]
    pub fn is_move_result_pseudo(self) -> bool {
        matches!(
            self,
            Self::MoveResultPseudo | Self::MoveResultPseudoWide | Self::MoveResultPseudoObject
        )
    }

    /// Returns `true` if this operation delivers its value through a trailing
    /// `move-result-pseudo`.
    #[must_use]
    pub fn has_move_result_pseudo(self) -> bool {
        self.is_sget()
            || self.is_iget()
            || self.is_div_rem_lit()
            || matches!(self, Self::Aget | Self::NewInstance)
    }

    /// Returns `true` for all return instructions.
    #[must_use]
    pub fn is_return(self) -> bool {
        matches!(
            self,
            Self::ReturnVoid | Self::Return | Self::ReturnWide | Self::ReturnObject
        )
    }

    /// Returns `true` for two-way conditional branches.
    #[must_use]
    pub fn is_conditional_branch(self) -> bool {
        self.is_two_register_test() || self.is_zero_test()
    }

    /// Returns `true` for the `if-<cmp>` forms comparing two registers.
    #[must_use]
    pub fn is_two_register_test(self) -> bool {
        matches!(
            self,
            Self::IfEq | Self::IfNe | Self::IfLt | Self::IfGe | Self::IfGt | Self::IfLe
        )
    }

    /// Returns `true` for the `if-<cmp>z` forms comparing against zero.
    #[must_use]
    pub fn is_zero_test(self) -> bool {
        matches!(
            self,
            Self::IfEqz | Self::IfNez | Self::IfLtz | Self::IfGez | Self::IfGtz | Self::IfLez
        )
    }

    /// Returns `true` for `switch`.
    #[must_use]
    pub fn is_switch(self) -> bool {
        self == Self::Switch
    }

    /// Returns `true` for instructions that end a block with more than one way out.
    #[must_use]
    pub fn is_branch(self) -> bool {
        self.is_conditional_branch() || self.is_switch()
    }

    /// Returns `true` for static field gets.
    #[must_use]
    pub fn is_sget(self) -> bool {
        matches!(self, Self::Sget | Self::SgetWide | Self::SgetObject)
    }

    /// Returns `true` for instance field gets.
    #[must_use]
    pub fn is_iget(self) -> bool {
        matches!(self, Self::Iget | Self::IgetWide | Self::IgetObject)
    }

    /// Returns `true` for static field puts.
    #[must_use]
    pub fn is_sput(self) -> bool {
        matches!(self, Self::Sput | Self::SputWide | Self::SputObject)
    }

    /// Returns `true` for instance field puts.
    #[must_use]
    pub fn is_iput(self) -> bool {
        matches!(self, Self::Iput | Self::IputWide | Self::IputObject)
    }

    /// Returns `true` for any static or instance field access.
    #[must_use]
    pub fn is_field_op(self) -> bool {
        self.is_sget() || self.is_iget() || self.is_sput() || self.is_iput()
    }

    /// Returns `true` for static field accesses.
    #[must_use]
    pub fn is_static_field_op(self) -> bool {
        self.is_sget() || self.is_sput()
    }

    /// Returns `true` for the literal arithmetic family, including division and remainder.
    #[must_use]
    pub fn is_arith_lit(self) -> bool {
        matches!(
            self,
            Self::AddIntLit
                | Self::RsubIntLit
                | Self::MulIntLit
                | Self::AndIntLit
                | Self::OrIntLit
                | Self::XorIntLit
                | Self::ShlIntLit
                | Self::ShrIntLit
                | Self::UshrIntLit
        ) || self.is_div_rem_lit()
    }

    /// Returns `true` for literal division and remainder, which may throw.
    #[must_use]
    pub fn is_div_rem_lit(self) -> bool {
        matches!(self, Self::DivIntLit | Self::RemIntLit)
    }

    /// Returns `true` for three-register arithmetic.
    #[must_use]
    pub fn is_binop(self) -> bool {
        matches!(self, Self::AddInt | Self::SubInt | Self::MulInt)
    }

    /// Returns `true` for all invoke kinds.
    #[must_use]
    pub fn is_invoke(self) -> bool {
        matches!(
            self,
            Self::InvokeStatic
                | Self::InvokeDirect
                | Self::InvokeVirtual
                | Self::InvokeSuper
                | Self::InvokeInterface
        )
    }

    /// Returns `true` if the value handled by this instruction is 64 bits wide.
    #[must_use]
    pub fn is_wide(self) -> bool {
        matches!(
            self,
            Self::ConstWide
                | Self::MoveWide
                | Self::MoveResultWide
                | Self::MoveResultPseudoWide
                | Self::ReturnWide
                | Self::SgetWide
                | Self::SputWide
                | Self::IgetWide
                | Self::IputWide
        )
    }

    /// Returns `true` if the value handled by this instruction is an object reference.
    #[must_use]
    pub fn is_object(self) -> bool {
        matches!(
            self,
            Self::MoveObject
                | Self::MoveResultObject
                | Self::MoveResultPseudoObject
                | Self::ReturnObject
                | Self::SgetObject
                | Self::SputObject
                | Self::IgetObject
                | Self::IputObject
        )
    }

    /// Returns `true` for opcodes that only exist in the intermediate representation and
    /// are never encoded.
    #[must_use]
    pub fn is_internal(self) -> bool {
        self.is_move_result_pseudo()
    }

    /// Returns `true` if the instruction can be removed when its destination is dead.
    ///
    /// Field gets, array gets and literal division may throw and are kept.
    #[must_use]
    pub fn is_pure(self) -> bool {
        self.is_const()
            || self.is_move()
            || self.is_move_result()
            || self.is_binop()
            || (self.is_arith_lit() && !self.is_div_rem_lit())
    }

    /// Estimated encoded size in 16-bit code units.
    ///
    /// Constants are sized by the literal they load, see
    /// [`crate::ir::Instruction::code_units`].
    #[must_use]
    pub fn code_units(self) -> usize {
        match self {
            _ if self.is_internal() => 0,
            Self::Nop | Self::ReturnVoid | Self::Goto | Self::Throw => 1,
            _ if self.is_move() || self.is_move_result() || self.is_return() => 1,
            Self::Const => 2,
            Self::ConstWide => 5,
            Self::Switch => 4,
            _ if self.is_invoke() => 3,
            _ => 2,
        }
    }

    /// Returns the `move-result-pseudo` variant matching the value kind of this operation.
    #[must_use]
    pub fn move_result_pseudo_for(self) -> Opcode {
        if self.is_wide() {
            Self::MoveResultPseudoWide
        } else if self.is_object() || self == Self::NewInstance {
            Self::MoveResultPseudoObject
        } else {
            Self::MoveResultPseudo
        }
    }

    /// Returns the `move` variant matching the value kind of this instruction.
    #[must_use]
    pub fn move_for(self) -> Opcode {
        if self.is_wide() {
            Self::MoveWide
        } else if self.is_object() {
            Self::MoveObject
        } else {
            Self::Move
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_branch_families_are_disjoint() {
        for op in Opcode::iter() {
            assert!(!(op.is_conditional_branch() && op.is_switch()), "{op}");
            if op.is_branch() {
                assert!(!op.is_pure(), "{op}");
            }
        }
    }

    #[test]
    fn test_move_result_pseudo_producers() {
        assert!(Opcode::Sget.has_move_result_pseudo());
        assert!(Opcode::IgetWide.has_move_result_pseudo());
        assert!(Opcode::Aget.has_move_result_pseudo());
        assert!(Opcode::DivIntLit.has_move_result_pseudo());
        assert!(!Opcode::AddIntLit.has_move_result_pseudo());
        assert_eq!(
            Opcode::SgetWide.move_result_pseudo_for(),
            Opcode::MoveResultPseudoWide
        );
        assert_eq!(
            Opcode::NewInstance.move_result_pseudo_for(),
            Opcode::MoveResultPseudoObject
        );
    }

    #[test]
    fn test_display_is_kebab_case() {
        assert_eq!(Opcode::MoveResultPseudo.to_string(), "move-result-pseudo");
        assert_eq!(Opcode::IfEqz.to_string(), "if-eqz");
    }

    #[test]
    fn test_internal_opcodes_are_free() {
        assert_eq!(Opcode::MoveResultPseudoObject.code_units(), 0);
        assert_eq!(Opcode::InvokeStatic.code_units(), 3);
    }
}
