//! Register-based intermediate representation.
//!
//! This module defines the code model every transformation in the crate operates on:
//!
//! - [`Opcode`] and [`Instruction`] - individual operations with registers and operands
//! - [`ControlFlowGraph`], [`Block`] and [`Edge`] - the per-method graph
//! - [`MethodBody`] and [`MethodBuilder`] - method code and a builder for it
//! - [`Program`] and [`Resolver`] - the class/method/field scope and symbol lookup
//!
//! # Example
//!
//! ```rust
//! use dexopt::ir::{AccessFlags, ClassDef, MethodBuilder, MethodDef, Program, Reg};
//!
//! let mut program = Program::new();
//! program.add_class(ClassDef::new("LFoo;"));
//! let body = MethodBuilder::new(1, []).build_with(|m| {
//!     m.block(0, |b| {
//!         b.const_(Reg(0), 1);
//!         b.ret(Reg(0));
//!     });
//! });
//! let id = program.add_method_with_body(
//!     MethodDef::new("LFoo;", "one", AccessFlags::PUBLIC | AccessFlags::STATIC),
//!     body,
//! );
//! assert!(program.has_body(id));
//! ```

mod body;
mod cfg;
mod instruction;
mod opcode;
mod program;

pub use body::{BlockBuilder, MethodBody, MethodBuilder, MethodScope};
pub use cfg::{Block, BlockId, ControlFlowGraph, Edge, EdgeKind, InsnLocation};
pub use instruction::{InsnId, Instruction, MemberRef, Operand, Reg};
pub use opcode::Opcode;
pub use program::{
    AccessFlags, ClassDef, FieldDef, FieldId, FieldSearch, MethodDef, MethodId, MethodSearch,
    Program, Resolver,
};
