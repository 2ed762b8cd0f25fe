// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # dexopt
//!
//! Constant-propagation rewriting and bottom-up whole-program method inlining for
//! register-based bytecode.
//!
//! The crate works on a small register-machine IR ([`ir`]): methods are control flow graphs
//! of basic blocks, instructions read and write numbered registers, and a [`ir::Program`]
//! holds the classes, methods, fields and method bodies being optimized.
//!
//! ## Features
//!
//! - **Constant propagation** - A worklist fixpoint over a constant lattice drives a
//!   transform that materializes constants, removes redundant static stores and collapses
//!   decided branches and switches
//! - **Bottom-up inlining** - Callees are fully inlined and shrunk before their callers,
//!   recursion is cut along the call stack path, and every rejected call site is counted
//! - **Parallel scheduling** - Inlining jobs run on a priority worker pool gated by wait
//!   counters; the result is identical to a sequential run
//! - **Shrinking** - Constant propagation, common subexpression elimination, copy
//!   propagation and local dead code elimination clean up after every inlining step
//!
//! ## Quick Start
//!
//! ```rust
//! use dexopt::prelude::*;
//!
//! let mut program = Program::new();
//! program.add_class(ClassDef::new("LFoo;"));
//! let flags = AccessFlags::PUBLIC | AccessFlags::STATIC;
//! let answer = program.add_method_with_body(
//!     MethodDef::new("LFoo;", "answer", flags),
//!     MethodBuilder::new(1, []).build_with(|m| {
//!         m.block(0, |b| {
//!             b.const_(Reg(0), 42);
//!             b.ret(Reg(0));
//!         });
//!     }),
//! );
//! program.add_method_with_body(
//!     MethodDef::new("LFoo;", "main", flags).root(),
//!     MethodBuilder::new(1, []).build_with(|m| {
//!         m.block(0, |b| {
//!             b.invoke(Opcode::InvokeStatic, MemberRef::new("LFoo;", "answer"), []);
//!             b.move_result(Reg(0));
//!             b.ret(Reg(0));
//!         });
//!     }),
//! );
//!
//! let wps = FieldSummary::<ConstantDomain>::new();
//! let mut inliner = MultiMethodInliner::new(
//!     &program,
//!     &wps,
//!     [answer],
//!     InlinerConfig::default(),
//!     InlinerMode::WholeProgram,
//! );
//! inliner.inline_methods()?;
//! inliner.finalize()?;
//! println!("{}", inliner.get_info()?);
//! # Ok::<(), dexopt::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - Opcodes, instructions, control flow graphs, method bodies and the program model
//! - [`analysis`] - Lattices, environments, the constant fixpoint and liveness
//! - [`compiler`] - The constant propagation transform, the shrinking passes and the inliner
//! - [`utils`] - The priority worker pool
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Error Handling
//!
//! Only invariant violations are errors. A call site that cannot be inlined, or a branch
//! that cannot be decided, is left alone and counted:
//!
//! ```rust
//! use dexopt::Error;
//!
//! fn explain(error: &Error) -> &'static str {
//!     match error {
//!         Error::Malformed { .. } => "an upstream pass produced a broken graph",
//!         Error::LockError => "a worker panicked",
//!         _ => "other",
//!     }
//! }
//! # assert_eq!(explain(&Error::LockError), "a worker panicked");
//! ```

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use dexopt::prelude::*;
///
/// let config = InlinerConfig::default();
/// assert_eq!(config.num_threads, 0);
/// ```
pub mod prelude;

/// The intermediate representation the optimizations operate on.
///
/// - [`ir::Opcode`] / [`ir::Instruction`] - Register-based instructions
/// - [`ir::ControlFlowGraph`] / [`ir::MethodBody`] - Basic blocks and their edges
/// - [`ir::MethodBuilder`] - Closure-style construction of method bodies
/// - [`ir::Program`] / [`ir::Resolver`] - Definitions, bodies and symbol resolution
pub mod ir;

/// Abstract interpretation over method bodies.
///
/// See [`analysis::IntraproceduralFixpoint`] for the constant analysis and
/// [`analysis::WholeProgramState`] for whole-program field values.
pub mod analysis;

/// Optimization passes and the bottom-up inliner.
///
/// See [`compiler::Transform`] for constant propagation and
/// [`compiler::MultiMethodInliner`] for inlining.
pub mod compiler;

/// Supporting infrastructure.
pub mod utils;

/// `dexopt` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dexopt` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;
