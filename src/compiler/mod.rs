//! Optimization passes over method bodies and the bottom-up inliner.
//!
//! This module sits on top of [`crate::analysis`]: the constant fixpoint computed there
//! drives the [`Transform`], and the inliner re-runs the shrinking passes on every method
//! it touched.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     MultiMethodInliner                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  CallGraph                 Candidates linked by call site        │
//! │    └─ StackDepthOrder       (bottom-up, recursion cut)           │
//! │                                                                  │
//! │  Scheduler                 Wait counters + PriorityThreadPool    │
//! │    ├─ Postprocess           leaf callee ready                    │
//! │    ├─ InlineCaller          all callees finished                 │
//! │    └─ DelayedShrink         all callers finished                 │
//! │                                                                  │
//! │  Cost model                Inlinability + profitability          │
//! │  Splice                    Callee body into one call site        │
//! │                                                                  │
//! │  Shrinker                  Per-method cleanup, in order:         │
//! │    ├─ Transform             constant propagation                 │
//! │    ├─ CSE                   common subexpressions                │
//! │    ├─ Copy propagation      forward moves                        │
//! │    └─ Local DCE             dead instructions, dead blocks       │
//! │                                                                  │
//! │  EventLog                  Change tracking and diagnostics       │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod events;
pub mod inliner;
pub mod pass;
pub mod passes;
pub mod shrinker;

pub use events::{Event, EventBuilder, EventKind, EventLog};
pub use inliner::{
    CallGraph, InlinerConfig, InlinerMode, InliningInfo, MultiMethodInliner, Rejection, Splice,
    StackDepthOrder, TrueVirtualCallers,
};
pub use pass::MethodPass;
pub use passes::{
    CommonSubexpressionPass, CopyPropagationPass, CopyPropagationStats, CseStats, LocalDcePass,
    LocalDceStats, Transform, TransformConfig, TransformStats,
};
pub use shrinker::{ShrinkStats, Shrinker, ShrinkerConfig};
