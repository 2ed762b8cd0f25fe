//! # dexopt Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the dexopt library. Import this module to get quick access to the essential
//! types for building programs, running constant propagation and inlining.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dexopt operations
pub use crate::Error;

/// The result type used throughout dexopt
pub use crate::Result;

// ================================================================================================
// Intermediate Representation
// ================================================================================================

/// Instructions and their operands
pub use crate::ir::{InsnId, Instruction, MemberRef, Opcode, Operand, Reg};

/// Control flow graphs and method bodies
pub use crate::ir::{
    Block, BlockBuilder, BlockId, ControlFlowGraph, Edge, EdgeKind, MethodBody, MethodBuilder,
};

/// Program model and symbol resolution
pub use crate::ir::{
    AccessFlags, ClassDef, FieldDef, FieldId, MethodDef, MethodId, MethodSearch, Program,
    Resolver,
};

// ================================================================================================
// Analysis
// ================================================================================================

/// Lattices and the constant domain
pub use crate::analysis::{AbstractValue, ConstantDomain, JoinSemiLattice, Lattice, MeetSemiLattice};

/// Constant fixpoint and whole-program state
pub use crate::analysis::{
    ConstantEnvironment, ConstantTransfer, FieldSummary, FixpointIterator,
    IntraproceduralFixpoint, WholeProgramState,
};

// ================================================================================================
// Optimization
// ================================================================================================

/// Constant propagation transform
pub use crate::compiler::{Transform, TransformConfig, TransformStats};

/// Shrinking passes
pub use crate::compiler::{MethodPass, ShrinkStats, Shrinker, ShrinkerConfig};

/// Bottom-up inliner
pub use crate::compiler::{
    InlinerConfig, InlinerMode, InliningInfo, MultiMethodInliner, TrueVirtualCallers,
};

/// Change tracking
pub use crate::compiler::{EventKind, EventLog};
