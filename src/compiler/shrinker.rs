//! Post-inlining cleanup.
//!
//! The [`Shrinker`] re-runs the enabled shrinking passes on one method body, in a fixed
//! order:
//!
//! 1. Constant propagation ([`Transform`]), optionally seeded with constant arguments
//! 2. Common subexpression elimination
//! 3. Copy propagation
//! 4. Local dead code elimination
//!
//! Each pass exposes opportunities for the next: materialized constants and collapsed
//! branches leave dead definitions and unreachable blocks behind, CSE introduces moves that
//! copy propagation forwards, and copy propagation leaves dead moves for DCE.
//!
//! Per-pass statistics of all shrunk methods are aggregated behind one mutex, so a single
//! shrinker can be shared by every worker of the inliner.

use std::{ops::AddAssign, sync::Mutex};

use crate::{
    analysis::{
        AbstractValue, ConstantEnvironment, ConstantTransfer, IntraproceduralFixpoint,
        WholeProgramState,
    },
    compiler::{
        pass::MethodPass,
        passes::{
            CommonSubexpressionPass, CopyPropagationPass, CopyPropagationStats, CseStats,
            LocalDcePass, LocalDceStats, Transform, TransformConfig, TransformStats,
        },
        EventKind, EventLog,
    },
    ir::{MethodBody, MethodId, Program, Resolver},
    Error, Result,
};

/// Selects the passes the [`Shrinker`] runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShrinkerConfig {
    /// Run the constant propagation transform
    pub run_const_prop: bool,
    /// Run common subexpression elimination
    pub run_cse: bool,
    /// Run copy propagation
    pub run_copy_prop: bool,
    /// Run local dead code elimination
    pub run_local_dce: bool,
}

impl Default for ShrinkerConfig {
    fn default() -> Self {
        Self {
            run_const_prop: true,
            run_cse: true,
            run_copy_prop: true,
            run_local_dce: true,
        }
    }
}

impl ShrinkerConfig {
    /// A configuration with every pass disabled.
    #[must_use]
    pub fn none() -> Self {
        Self {
            run_const_prop: false,
            run_cse: false,
            run_copy_prop: false,
            run_local_dce: false,
        }
    }

    /// Returns `true` if at least one pass is enabled.
    #[must_use]
    pub fn any_enabled(&self) -> bool {
        self.run_const_prop || self.run_cse || self.run_copy_prop || self.run_local_dce
    }
}

/// Aggregated per-pass statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShrinkStats {
    /// Constant propagation results
    pub const_prop: TransformStats,
    /// Common subexpression elimination results
    pub cse: CseStats,
    /// Copy propagation results
    pub copy_prop: CopyPropagationStats,
    /// Dead code elimination results
    pub local_dce: LocalDceStats,
    /// Number of method bodies shrunk
    pub methods_shrunk: usize,
}

impl AddAssign for ShrinkStats {
    fn add_assign(&mut self, other: Self) {
        self.const_prop += other.const_prop;
        self.cse += other.cse;
        self.copy_prop += other.copy_prop;
        self.local_dce += other.local_dce;
        self.methods_shrunk += other.methods_shrunk;
    }
}

/// Runs the shrinking passes on method bodies and aggregates their statistics.
pub struct Shrinker {
    config: ShrinkerConfig,
    transform: TransformConfig,
    cse: CommonSubexpressionPass,
    copy_prop: CopyPropagationPass,
    local_dce: LocalDcePass,
    stats: Mutex<ShrinkStats>,
}

impl Shrinker {
    /// Creates a shrinker.
    ///
    /// # Arguments
    ///
    /// * `config` - The passes to run.
    /// * `transform` - Options of the constant propagation transform. The class under
    ///   initialization is filled in per method for initializers and constructors.
    #[must_use]
    pub fn new(config: ShrinkerConfig, transform: TransformConfig) -> Self {
        Self {
            config,
            transform,
            cse: CommonSubexpressionPass::new(),
            copy_prop: CopyPropagationPass::new(),
            local_dce: LocalDcePass::new(),
            stats: Mutex::new(ShrinkStats::default()),
        }
    }

    /// Returns the pass selection.
    #[must_use]
    pub fn config(&self) -> &ShrinkerConfig {
        &self.config
    }

    /// Returns a snapshot of the statistics aggregated so far.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a worker panicked while updating them.
    pub fn stats(&self) -> Result<ShrinkStats> {
        self.stats.lock().map(|s| *s).map_err(|_| Error::LockError)
    }

    /// Shrinks one method body.
    ///
    /// # Arguments
    ///
    /// * `program` - Scope and symbol resolution.
    /// * `wps` - Whole-program field values for constant propagation.
    /// * `method` - The method owning `body`, if any.
    /// * `body` - The body to shrink in place.
    /// * `arguments` - Values known for every call of the method, one per parameter
    ///   register, used as the entry state of constant propagation.
    /// * `events` - Change log to record into.
    ///
    /// # Returns
    ///
    /// The statistics of this one method; they are also added to the aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if a pass hits a structurally broken body.
    pub fn shrink_method<V: AbstractValue>(
        &self,
        program: &Program,
        wps: &dyn WholeProgramState<V>,
        method: Option<MethodId>,
        body: &mut MethodBody,
        arguments: Option<&[V]>,
        events: &EventLog,
    ) -> Result<ShrinkStats> {
        let before = body.estimate_code_units();
        let mut stats = ShrinkStats {
            methods_shrunk: 1,
            ..ShrinkStats::default()
        };

        if self.config.run_const_prop {
            stats.const_prop =
                self.propagate_constants(program, wps, method, body, arguments, events)?;
        }
        if self.config.run_cse {
            log::trace!("running {} on {:?}", self.cse.name(), method);
            stats.cse = self.cse.run(body, method, events);
        }
        if self.config.run_copy_prop {
            log::trace!("running {} on {:?}", self.copy_prop.name(), method);
            stats.copy_prop = self.copy_prop.run(body, method, events);
        }
        if self.config.run_local_dce {
            log::trace!("running {} on {:?}", self.local_dce.name(), method);
            stats.local_dce = self.local_dce.run(body, method, events)?;
        }

        let after = body.estimate_code_units();
        log::debug!("shrunk {:?}: {} -> {} code units", method, before, after);
        events
            .record(EventKind::MethodShrunk)
            .maybe_method(method)
            .message(format!("{before} -> {after} code units"));

        *self.stats.lock().map_err(|_| Error::LockError)? += stats;
        Ok(stats)
    }

    fn propagate_constants<V: AbstractValue>(
        &self,
        program: &Program,
        wps: &dyn WholeProgramState<V>,
        method: Option<MethodId>,
        body: &mut MethodBody,
        arguments: Option<&[V]>,
        events: &EventLog,
    ) -> Result<TransformStats> {
        let def = method.and_then(|id| program.method(id));
        let mut config = self.transform.clone();
        if let Some(def) = def {
            if def.is_class_initializer() {
                config.class_under_init = Some(def.class.clone());
            } else if def.is_constructor() {
                config.class_under_init = Some(def.class.clone());
                config.receiver = body.params.first().copied();
            }
        }

        let mut initial = ConstantEnvironment::top();
        if let Some(arguments) = arguments {
            for (&param, value) in body.params.iter().zip(arguments) {
                initial.set(param, value.clone());
            }
        }

        let transform = Transform::new(config);
        let resolver: &dyn Resolver = program;
        let fixpoint = IntraproceduralFixpoint::analyze(
            body,
            ConstantTransfer::new(resolver, wps)
                .with_class_under_init(transform.config().class_under_init.as_deref())
                .with_receiver(transform.config().receiver),
            initial,
        );
        transform.apply_recording(&fixpoint, wps, resolver, body, Some(events), method)
    }
}
