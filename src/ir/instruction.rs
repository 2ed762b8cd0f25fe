//! Instructions and their operands.

use std::fmt;

use crate::ir::Opcode;

/// A virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub u32);

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Stable identity of an instruction within one method body.
///
/// Ids are handed out by the owning [`crate::ir::ControlFlowGraph`] and survive block splits
/// and instruction moves, which makes them usable as call-site keys across inlining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct InsnId(pub u32);

impl fmt::Display for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A symbolic reference to a field or method: owning class plus member name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberRef {
    /// Owning class descriptor, e.g. `Lcom/foo/Bar;`
    pub class: String,
    /// Member name
    pub name: String,
}

impl MemberRef {
    /// Creates a reference to `class.name`.
    pub fn new(class: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.name)
    }
}

/// The embedded operand of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Operand {
    /// No operand
    #[default]
    None,
    /// An integer literal
    Literal(i64),
    /// A field reference
    Field(MemberRef),
    /// A method reference
    Method(MemberRef),
    /// A type descriptor
    Type(String),
}

/// One operation of a method body.
///
/// Switch case keys are not stored on the instruction; they label the outgoing
/// [`crate::ir::EdgeKind::Branch`] edges of the block the switch terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Identity within the owning method, assigned on insertion
    pub id: InsnId,
    /// The operation
    pub opcode: Opcode,
    /// Register written by this instruction
    pub dest: Option<Reg>,
    /// Registers read by this instruction, in operand order
    pub srcs: Vec<Reg>,
    /// Literal, member or type operand
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction without registers or operand.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            id: InsnId::default(),
            opcode,
            dest: None,
            srcs: Vec::new(),
            operand: Operand::None,
        }
    }

    /// Creates the constant load `dest = value`, choosing the wide form when `wide` is set.
    #[must_use]
    pub fn constant(dest: Reg, value: i64, wide: bool) -> Self {
        let opcode = if wide { Opcode::ConstWide } else { Opcode::Const };
        Self::new(opcode).with_dest(dest).with_literal(value)
    }

    /// Creates a move of the given flavour.
    #[must_use]
    pub fn mov(opcode: Opcode, dest: Reg, src: Reg) -> Self {
        Self::new(opcode).with_dest(dest).with_src(src)
    }

    /// Sets the destination register.
    #[must_use]
    pub fn with_dest(mut self, dest: Reg) -> Self {
        self.dest = Some(dest);
        self
    }

    /// Appends a source register.
    #[must_use]
    pub fn with_src(mut self, src: Reg) -> Self {
        self.srcs.push(src);
        self
    }

    /// Appends several source registers.
    #[must_use]
    pub fn with_srcs(mut self, srcs: impl IntoIterator<Item = Reg>) -> Self {
        self.srcs.extend(srcs);
        self
    }

    /// Sets a literal operand.
    #[must_use]
    pub fn with_literal(mut self, value: i64) -> Self {
        self.operand = Operand::Literal(value);
        self
    }

    /// Sets a field operand.
    #[must_use]
    pub fn with_field(mut self, field: MemberRef) -> Self {
        self.operand = Operand::Field(field);
        self
    }

    /// Sets a method operand.
    #[must_use]
    pub fn with_method(mut self, method: MemberRef) -> Self {
        self.operand = Operand::Method(method);
        self
    }

    /// Sets a type operand.
    #[must_use]
    pub fn with_type(mut self, ty: impl Into<String>) -> Self {
        self.operand = Operand::Type(ty.into());
        self
    }

    /// Returns the literal operand, if any.
    #[must_use]
    pub fn literal(&self) -> Option<i64> {
        match self.operand {
            Operand::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the field operand, if any.
    #[must_use]
    pub fn field(&self) -> Option<&MemberRef> {
        match &self.operand {
            Operand::Field(field) => Some(field),
            _ => None,
        }
    }

    /// Returns the method operand, if any.
    #[must_use]
    pub fn method(&self) -> Option<&MemberRef> {
        match &self.operand {
            Operand::Method(method) => Some(method),
            _ => None,
        }
    }

    /// Returns the type operand, if any.
    #[must_use]
    pub fn type_ref(&self) -> Option<&str> {
        match &self.operand {
            Operand::Type(ty) => Some(ty),
            _ => None,
        }
    }

    /// Returns the `index`-th source register.
    #[must_use]
    pub fn src(&self, index: usize) -> Option<Reg> {
        self.srcs.get(index).copied()
    }

    /// Estimated encoded size in 16-bit code units.
    #[must_use]
    pub fn code_units(&self) -> usize {
        match (self.opcode, self.literal()) {
            (Opcode::Const, Some(value)) if (-8..8).contains(&value) => 1,
            (Opcode::Const, Some(value)) if i16::try_from(value).is_err() => 3,
            (Opcode::ConstWide, Some(value)) if i16::try_from(value).is_ok() => 2,
            (Opcode::ConstWide, Some(value)) if i32::try_from(value).is_ok() => 3,
            (opcode, _) => opcode.code_units(),
        }
    }

    /// Rewrites every register through `map`, destination included.
    pub fn rename_registers(&mut self, mut map: impl FnMut(Reg) -> Reg) {
        if let Some(dest) = self.dest {
            self.dest = Some(map(dest));
        }
        for src in &mut self.srcs {
            *src = map(*src);
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        let mut sep = " ";
        if let Some(dest) = self.dest {
            write!(f, "{sep}{dest}")?;
            sep = ", ";
        }
        for src in &self.srcs {
            write!(f, "{sep}{src}")?;
            sep = ", ";
        }
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Literal(value) => write!(f, "{sep}{value}"),
            Operand::Field(member) | Operand::Method(member) => write!(f, "{sep}{member}"),
            Operand::Type(ty) => write!(f, "{sep}{ty}"),
        }
    }
}
