//! Abstract interpretation infrastructure.
//!
//! This module provides the analyses the optimization passes are driven by:
//!
//! - [`lattice`] - Lattice traits, the [`AbstractValue`] contract and [`ConstantDomain`]
//! - [`environment`] - [`ConstantEnvironment`], register and field bindings per program point
//! - [`fixpoint`] - The [`FixpointIterator`] contract and a worklist implementation
//! - [`wps`] - Whole-program field values
//! - [`liveness`] - Backward register liveness
//!
//! # Usage
//!
//! ```rust
//! use dexopt::analysis::{
//!     ConstantDomain, ConstantEnvironment, ConstantTransfer, FieldSummary,
//!     FixpointIterator, IntraproceduralFixpoint,
//! };
//! use dexopt::ir::{BlockId, MethodBuilder, Opcode, Program, Reg};
//!
//! let program = Program::new();
//! let wps = FieldSummary::<ConstantDomain>::new();
//! let body = MethodBuilder::new(1, []).build_with(|m| {
//!     m.block(0, |b| {
//!         b.const_(Reg(0), 1);
//!         b.if_zero(Opcode::IfEqz, Reg(0), 2, 1);
//!     });
//!     m.block(1, |b| {
//!         b.return_void();
//!     });
//!     m.block(2, |b| {
//!         b.return_void();
//!     });
//! });
//!
//! let fixpoint = IntraproceduralFixpoint::analyze(
//!     &body,
//!     ConstantTransfer::new(&program, &wps),
//!     ConstantEnvironment::top(),
//! );
//! assert!(fixpoint.entry_state(BlockId(2)).is_bottom());
//! ```

pub mod environment;
pub mod fixpoint;
pub mod lattice;
pub mod liveness;
pub mod wps;

pub use environment::{ConstantEnvironment, RESULT_REGISTER};
pub use fixpoint::{ConstantTransfer, FixpointIterator, IntraproceduralFixpoint};
pub use lattice::{AbstractValue, ConstantDomain, JoinSemiLattice, Lattice, MeetSemiLattice};
pub use liveness::Liveness;
pub use wps::{FieldSummary, WholeProgramState};
