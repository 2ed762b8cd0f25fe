//! Bottom-up inlining of many methods.
//!
//! The [`MultiMethodInliner`] inlines candidate callees into their callers, processing
//! callees before the callers that call them so every caller receives callee bodies
//! that are already fully inlined and shrunk.
//!
//! # Architecture
//!
//! - [`callgraph`] - The [`CallGraph`] over the candidates and the stack-depth ordering
//! - `cost` - Inlinability predicates, the cost model and profitability
//! - [`inline`] - Splicing one callee body into one call site
//! - `scheduler` - Wait counters, priorities and the worker pool driving the run
//! - [`InlinerConfig`] / [`InliningInfo`] - Policy and statistics
//!
//! # Usage
//!
//! ```rust
//! use dexopt::analysis::{ConstantDomain, FieldSummary};
//! use dexopt::compiler::{InlinerConfig, InlinerMode, MultiMethodInliner};
//! use dexopt::ir::{AccessFlags, ClassDef, MemberRef, MethodBuilder, MethodDef, Opcode, Program, Reg};
//!
//! let mut program = Program::new();
//! program.add_class(ClassDef::new("LFoo;"));
//! let flags = AccessFlags::PUBLIC | AccessFlags::STATIC;
//! let callee = program.add_method_with_body(
//!     MethodDef::new("LFoo;", "seven", flags),
//!     MethodBuilder::new(1, []).build_with(|m| {
//!         m.block(0, |b| {
//!             b.const_(Reg(0), 7);
//!             b.ret(Reg(0));
//!         });
//!     }),
//! );
//! let caller = program.add_method_with_body(
//!     MethodDef::new("LFoo;", "main", flags).root(),
//!     MethodBuilder::new(1, []).build_with(|m| {
//!         m.block(0, |b| {
//!             b.invoke(Opcode::InvokeStatic, MemberRef::new("LFoo;", "seven"), []);
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
//!     [callee],
//!     InlinerConfig::default(),
//!     InlinerMode::WholeProgram,
//! );
//! inliner.inline_methods()?;
//! inliner.finalize()?;
//!
//! assert!(inliner.get_inlined()?.contains(&callee));
//! assert_eq!(inliner.get_info()?.calls_inlined, 1);
//! let calls_left = program.with_body(caller, |b| b.cfg.instructions().any(|i| i.opcode.is_invoke()));
//! assert_eq!(calls_left, Some(false));
//! # Ok::<(), dexopt::Error>(())
//! ```

pub mod callgraph;
mod config;
mod cost;
mod info;
pub mod inline;
mod scheduler;

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};

use dashmap::DashMap;

use crate::{
    analysis::{AbstractValue, ConstantDomain, WholeProgramState},
    compiler::{
        shrinker::{ShrinkStats, Shrinker},
        EventKind, EventLog,
    },
    ir::{
        AccessFlags, InsnId, Instruction, MethodBody, MethodId, MethodSearch, Opcode, Program,
        Resolver,
    },
    Error, Result,
};

pub use callgraph::{CallGraph, StackDepthOrder, TrueVirtualCallers};
pub use config::{InlinerConfig, InlinerMode};
pub use cost::Rejection;
pub use info::InliningInfo;
pub use inline::Splice;

use scheduler::ConstantArguments;

/// Bookkeeping shared by all jobs of a run.
#[derive(Debug, Default)]
struct InlinerState {
    /// Edges of callers still being processed
    pending: CallGraph,
    /// Direct methods to turn static in [`MultiMethodInliner::finalize`]
    make_static: BTreeSet<MethodId>,
    /// Callees inlined at least once
    inlined: BTreeSet<MethodId>,
}

/// Inlines candidate methods into their callers, bottom-up.
///
/// The inliner borrows the [`Program`] it rewrites; method bodies are checked out of the
/// program while a job works on them and put back afterwards.
///
/// Call [`MultiMethodInliner::finalize`] once all inlining is done: callees that call
/// private methods of their own class need those methods made static, and that
/// rewrite is not applied before.
pub struct MultiMethodInliner<'a, V: AbstractValue = ConstantDomain> {
    program: &'a Program,
    wps: &'a dyn WholeProgramState<V>,
    config: InlinerConfig,
    mode: InlinerMode,
    candidates: BTreeSet<MethodId>,
    true_virtual_callers: TrueVirtualCallers,
    caller_virtual_callee: HashMap<MethodId, HashMap<InsnId, MethodId>>,
    hot_methods: HashSet<MethodId>,
    /// The graph as built; profitability decisions only ever look at this one
    call_graph: CallGraph,
    state: Mutex<InlinerState>,
    info: Mutex<InliningInfo>,
    inlined_costs: DashMap<MethodId, Option<usize>>,
    should_inline: DashMap<MethodId, bool>,
    callee_constant_arguments: HashMap<MethodId, ConstantArguments<V>>,
    shrinker: Shrinker,
    events: EventLog,
    finalized: AtomicBool,
}

impl<'a, V: AbstractValue> MultiMethodInliner<'a, V> {
    /// Creates an inliner and builds its call graph.
    ///
    /// # Arguments
    ///
    /// * `program` - Scope to rewrite; also the symbol resolver.
    /// * `wps` - Whole-program field values used while shrinking.
    /// * `candidates` - Methods that may be inlined.
    /// * `config` - Inlining policy.
    /// * `mode` - Which caller/callee pairs are linked.
    pub fn new(
        program: &'a Program,
        wps: &'a dyn WholeProgramState<V>,
        candidates: impl IntoIterator<Item = MethodId>,
        config: InlinerConfig,
        mode: InlinerMode,
    ) -> Self {
        let candidates: BTreeSet<MethodId> = candidates.into_iter().collect();
        let true_virtual_callers = TrueVirtualCallers::new();
        let call_graph = CallGraph::build(program, &candidates, mode, &true_virtual_callers);
        let shrinker = Shrinker::new(config.shrinker.clone(), config.transform.clone());
        log::debug!(
            "{} mode inliner: {} candidates, {} call sites",
            mode,
            candidates.len(),
            call_graph.edge_count()
        );

        Self {
            program,
            wps,
            config,
            mode,
            candidates,
            true_virtual_callers,
            caller_virtual_callee: HashMap::new(),
            hot_methods: HashSet::new(),
            state: Mutex::new(InlinerState {
                pending: call_graph.clone(),
                ..InlinerState::default()
            }),
            call_graph,
            info: Mutex::new(InliningInfo::default()),
            inlined_costs: DashMap::new(),
            should_inline: DashMap::new(),
            callee_constant_arguments: HashMap::new(),
            shrinker,
            events: EventLog::new(),
            finalized: AtomicBool::new(false),
        }
    }

    /// Adds virtual call sites whose single target is known and rebuilds the call graph.
    ///
    /// These invokes are linked to the given callee instead of the resolver's answer, and
    /// the listed callees are only linked through them.
    #[must_use]
    pub fn with_true_virtual_callers(mut self, callers: TrueVirtualCallers) -> Self {
        let mut caller_virtual_callee: HashMap<MethodId, HashMap<InsnId, MethodId>> =
            HashMap::new();
        for (&callee, sites) in &callers {
            for (&caller, insns) in sites {
                let targets = caller_virtual_callee.entry(caller).or_default();
                for &insn in insns {
                    targets.insert(insn, callee);
                }
            }
        }
        self.caller_virtual_callee = caller_virtual_callee;
        self.true_virtual_callers = callers;
        self.call_graph = CallGraph::build(
            self.program,
            &self.candidates,
            self.mode,
            &self.true_virtual_callers,
        );
        self.state = Mutex::new(InlinerState {
            pending: self.call_graph.clone(),
            ..InlinerState::default()
        });
        self
    }

    /// Uses call counts from profiling. Methods called at least
    /// [`InlinerConfig::hot_method_min_call_count`] times are hot, and the presence of
    /// any hot method switches profitability to favour speed.
    #[must_use]
    pub fn with_method_profile(mut self, call_counts: &HashMap<MethodId, u64>) -> Self {
        self.hot_methods = call_counts
            .iter()
            .filter(|(_, count)| **count >= self.config.hot_method_min_call_count)
            .map(|(method, _)| *method)
            .collect();
        self
    }

    /// Returns the program being rewritten.
    #[must_use]
    pub fn program(&self) -> &'a Program {
        self.program
    }

    /// Returns the policy.
    #[must_use]
    pub fn config(&self) -> &InlinerConfig {
        &self.config
    }

    /// Returns the mode.
    #[must_use]
    pub fn mode(&self) -> InlinerMode {
        self.mode
    }

    /// Returns the call graph as built.
    #[must_use]
    pub fn call_graph(&self) -> &CallGraph {
        &self.call_graph
    }

    /// Returns `true` if profiling data marked at least one method hot.
    #[must_use]
    pub fn for_speed(&self) -> bool {
        !self.hot_methods.is_empty()
    }

    /// Returns the change log.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Returns the callees inlined at least once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a worker panicked.
    pub fn get_inlined(&self) -> Result<BTreeSet<MethodId>> {
        Ok(self.lock_state()?.inlined.clone())
    }

    /// Returns a snapshot of the statistics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a worker panicked.
    pub fn get_info(&self) -> Result<InliningInfo> {
        self.info
            .lock()
            .map(|info| info.clone())
            .map_err(|_| Error::LockError)
    }

    /// Returns the aggregated statistics of the shrinking passes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a worker panicked.
    pub fn get_shrink_stats(&self) -> Result<ShrinkStats> {
        self.shrinker.stats()
    }

    /// Number of call sites of callers that have not finished processing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a worker panicked.
    pub fn remaining_call_sites(&self) -> Result<usize> {
        Ok(self.lock_state()?.pending.edge_count())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, InlinerState>> {
        self.state.lock().map_err(|_| Error::LockError)
    }

    pub(crate) fn update_info(&self, f: impl FnOnce(&mut InliningInfo)) -> Result<()> {
        let mut info = self.info.lock().map_err(|_| Error::LockError)?;
        f(&mut info);
        Ok(())
    }

    pub(crate) fn mark_make_static(&self, methods: &[MethodId]) -> Result<()> {
        if methods.is_empty() {
            return Ok(());
        }
        self.lock_state()?.make_static.extend(methods.iter().copied());
        Ok(())
    }

    /// Resolves the method an invoke of `caller` calls, preferring known virtual targets.
    ///
    /// Targets of known virtual call sites only resolve through those sites.
    pub(crate) fn resolve_callee(&self, caller: MethodId, insn: &Instruction) -> Option<MethodId> {
        if let Some(&callee) = self
            .caller_virtual_callee
            .get(&caller)
            .and_then(|targets| targets.get(&insn.id))
        {
            return Some(callee);
        }
        let def = self
            .program
            .resolve_method(insn.method()?, MethodSearch::for_opcode(insn.opcode))?;
        (def.is_concrete() && !self.true_virtual_callers.contains_key(&def.id)).then_some(def.id)
    }

    /// Inlines into `caller` every call site of a method in `callees`.
    ///
    /// Profitability is not consulted; every call site still has to pass
    /// [`MultiMethodInliner::is_inlinable`]. Runs on the calling thread and must not be
    /// used for a caller that [`MultiMethodInliner::inline_methods`] is processing.
    ///
    /// # Returns
    ///
    /// The number of call sites inlined.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMethod`] if `caller` has no body, and
    /// [`Error::Malformed`] if splicing hits an inconsistent graph.
    pub fn inline_callees(&self, caller: MethodId, callees: &BTreeSet<MethodId>) -> Result<usize> {
        self.inline_into(caller, |callee, _| callees.contains(&callee))
    }

    /// Inlines the given call sites of `caller`.
    ///
    /// Works like [`MultiMethodInliner::inline_callees`], selecting call sites by
    /// instruction instead of by callee.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMethod`] if `caller` has no body, and
    /// [`Error::Malformed`] if splicing hits an inconsistent graph.
    pub fn inline_callees_at(&self, caller: MethodId, insns: &HashSet<InsnId>) -> Result<usize> {
        self.inline_into(caller, |_, insn| insns.contains(&insn))
    }

    pub(crate) fn inline_into(
        &self,
        caller: MethodId,
        select: impl Fn(MethodId, InsnId) -> bool,
    ) -> Result<usize> {
        let mut body = self
            .program
            .take_body(caller)
            .ok_or(Error::UnknownMethod(caller))?;
        let inlinables: Vec<(MethodId, InsnId)> = body
            .cfg
            .blocks()
            .flat_map(|block| block.instructions())
            .filter(|insn| insn.opcode.is_invoke())
            .filter_map(|insn| {
                let callee = self.resolve_callee(caller, insn)?;
                select(callee, insn.id).then_some((callee, insn.id))
            })
            .collect();

        let result = if inlinables.is_empty() {
            Ok(0)
        } else {
            self.inline_inlinables(caller, &mut body, &inlinables)
        };
        self.program.set_body(caller, body);
        result
    }

    /// Inlines the given call sites, in order, as far as each passes
    /// [`MultiMethodInliner::is_inlinable`].
    ///
    /// # Arguments
    ///
    /// * `caller` - The method owning `body`.
    /// * `body` - The caller's body, checked out of the program.
    /// * `inlinables` - `(callee, invoke)` pairs in program order.
    ///
    /// # Returns
    ///
    /// The number of call sites inlined.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if splicing hits an inconsistent graph.
    pub fn inline_inlinables(
        &self,
        caller: MethodId,
        body: &mut MethodBody,
        inlinables: &[(MethodId, InsnId)],
    ) -> Result<usize> {
        let caller_def = self
            .program
            .method(caller)
            .ok_or(Error::UnknownMethod(caller))?;
        let mut estimated = body.estimate_code_units();
        let mut info = InliningInfo::default();
        let mut make_static = Vec::new();
        let mut inlined = BTreeSet::new();

        for &(callee, insn) in inlinables {
            let callee_def = self.program.method(callee);
            let callee_body = self.program.clone_body(callee);
            let (Some(callee_def), Some(callee_body), Some(_)) =
                (callee_def, callee_body, body.cfg.find_instruction(insn))
            else {
                info.not_found += 1;
                continue;
            };

            let check =
                self.check_call_site(caller_def, callee_def, &callee_body, estimated, &mut info);
            if let Some(rejection) = check.rejection {
                rejection.record(&mut info);
                log::trace!("not inlining {} into {}: {}", callee_def, caller_def, rejection);
                self.events
                    .record(EventKind::CallSiteRejected)
                    .at(caller, insn)
                    .message(format!("{callee_def}: {rejection}"));
                continue;
            }

            let splice = inline::inline_call_site(body, insn, &callee_body)?;
            make_static.extend(check.make_static);
            estimated += self.get_inlined_cost(callee).unwrap_or(0);
            info.calls_inlined += 1;
            if splice.write_over_ins {
                info.write_over_ins += 1;
            }
            inlined.insert(callee);

            log::debug!("inlined {} into {}", callee_def, caller_def);
            self.events
                .record(EventKind::MethodInlined)
                .at(caller, insn)
                .message(format!("{callee_def}"));
        }

        let count = info.calls_inlined;
        {
            let mut state = self.lock_state()?;
            state.inlined.extend(inlined);
            state.make_static.extend(make_static);
        }
        self.update_info(|total| *total += info)?;
        Ok(count)
    }

    /// Turns every `invoke-direct` of a method collected for static conversion into
    /// `invoke-static` and makes those methods static and public.
    ///
    /// Only the first call does anything.
    ///
    /// # Returns
    ///
    /// The number of rewritten invoke instructions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a worker panicked.
    pub fn finalize(&self) -> Result<usize> {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }
        let make_static = std::mem::take(&mut self.lock_state()?.make_static);
        if make_static.is_empty() {
            return Ok(0);
        }
        self.invoke_direct_to_static(&make_static)
    }

    fn invoke_direct_to_static(&self, methods: &BTreeSet<MethodId>) -> Result<usize> {
        let targets: HashSet<_> = methods
            .iter()
            .filter_map(|id| self.program.method(*id))
            .map(|def| def.reference())
            .collect();

        let mut rewritten = 0;
        for def in self.program.methods() {
            rewritten += self
                .program
                .with_body_mut(def.id, |body| {
                    let mut count = 0;
                    for id in body.cfg.block_ids() {
                        let Some(block) = body.cfg.block_mut(id) else {
                            continue;
                        };
                        for insn in block.instructions_mut() {
                            if insn.opcode == Opcode::InvokeDirect
                                && insn.method().is_some_and(|m| targets.contains(m))
                            {
                                insn.opcode = Opcode::InvokeStatic;
                                count += 1;
                            }
                        }
                    }
                    count
                })
                .unwrap_or(0);
        }

        for &id in methods {
            let Some(def) = self.program.method(id) else {
                continue;
            };
            def.update_access(AccessFlags::STATIC | AccessFlags::PUBLIC, AccessFlags::PRIVATE);
            self.events
                .record(EventKind::MadeStatic)
                .method(id)
                .message(format!("{def}"));
        }
        log::debug!("made {} methods static, {} invokes rewritten", methods.len(), rewritten);
        Ok(rewritten)
    }
}

impl<V: AbstractValue> Drop for MultiMethodInliner<'_, V> {
    fn drop(&mut self) {
        if self.finalized.load(Ordering::Acquire) {
            return;
        }
        if let Ok(state) = self.state.get_mut() {
            if !state.make_static.is_empty() {
                log::warn!(
                    "inliner dropped without finalize; {} methods were not made static",
                    state.make_static.len()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::FieldSummary,
        ir::{ClassDef, MemberRef, MethodBuilder, MethodDef, Reg},
        test::factories::{call_chain_program, private_call_program},
    };

    fn invokes(program: &Program, method: MethodId) -> Vec<Opcode> {
        program
            .with_body(method, |body| {
                body.cfg
                    .instructions()
                    .filter(|insn| insn.opcode.is_invoke())
                    .map(|insn| insn.opcode)
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_chain_is_inlined_bottom_up() -> Result<()> {
        let (program, ids) = call_chain_program(3);
        let wps = FieldSummary::<ConstantDomain>::new();
        let mut inliner = MultiMethodInliner::new(
            &program,
            &wps,
            ids[1..].iter().copied(),
            InlinerConfig::default(),
            InlinerMode::WholeProgram,
        );
        inliner.inline_methods()?;
        inliner.finalize()?;

        let info = inliner.get_info()?;
        assert_eq!(info.calls_inlined, 3);
        assert_eq!(info.max_call_stack_depth, 3);
        assert_eq!(info.critical_path_length, 3);
        assert_eq!(inliner.get_inlined()?, ids[1..].iter().copied().collect());
        assert_eq!(inliner.remaining_call_sites()?, 0);
        assert!(invokes(&program, ids[0]).is_empty());
        let returns_seven = program
            .with_body(ids[0], |body| {
                body.cfg.instructions().any(|insn| insn.literal() == Some(7))
            })
            .unwrap_or(false);
        assert!(returns_seven);
        assert!(inliner.get_shrink_stats()?.methods_shrunk >= 4);
        Ok(())
    }

    #[test]
    fn test_finalize_makes_private_callee_static() -> Result<()> {
        let (program, main, helper, secret) = private_call_program();
        let wps = FieldSummary::<ConstantDomain>::new();
        let mut inliner = MultiMethodInliner::new(
            &program,
            &wps,
            [helper],
            InlinerConfig::default(),
            InlinerMode::WholeProgram,
        );
        inliner.inline_methods()?;
        assert_eq!(invokes(&program, main), vec![Opcode::InvokeDirect]);

        // main and the body of helper itself
        assert_eq!(inliner.finalize()?, 2);
        assert_eq!(inliner.finalize()?, 0);
        assert_eq!(invokes(&program, main), vec![Opcode::InvokeStatic]);
        let access = program
            .method(secret)
            .map_or(AccessFlags::empty(), MethodDef::access);
        assert!(access.contains(AccessFlags::STATIC | AccessFlags::PUBLIC));
        assert!(!access.contains(AccessFlags::PRIVATE));
        assert!(inliner.events().has(EventKind::MadeStatic));
        Ok(())
    }

    #[test]
    fn test_inline_callees_only_touches_named_callees() -> Result<()> {
        let (program, ids) = call_chain_program(2);
        let wps = FieldSummary::<ConstantDomain>::new();
        let inliner = MultiMethodInliner::new(
            &program,
            &wps,
            ids[1..].iter().copied(),
            InlinerConfig::default(),
            InlinerMode::WholeProgram,
        );

        let inlined = inliner.inline_callees(ids[0], &[ids[1]].into_iter().collect())?;
        assert_eq!(inlined, 1);
        assert_eq!(invokes(&program, ids[0]), vec![Opcode::InvokeStatic]);
        assert_eq!(inliner.get_info()?.calls_inlined, 1);
        assert!(matches!(
            inliner.inline_callees(MethodId(99), &BTreeSet::new()),
            Err(Error::UnknownMethod(_))
        ));
        Ok(())
    }

    #[test]
    fn test_rejected_call_site_is_left_alone() -> Result<()> {
        let mut program = Program::new();
        program.add_class(ClassDef::new("LFoo;"));
        let flags = AccessFlags::PUBLIC | AccessFlags::STATIC;
        let callee = program.add_method_with_body(
            MethodDef::new("LFoo;", "pinned", flags).dont_inline(),
            MethodBuilder::new(0, []).build_with(|m| {
                m.block(0, |b| {
                    b.return_void();
                });
            }),
        );
        let mut site = InsnId(0);
        let caller = program.add_method_with_body(
            MethodDef::new("LFoo;", "main", flags).root(),
            MethodBuilder::new(0, []).build_with(|m| {
                m.block(0, |b| {
                    site = b.invoke(Opcode::InvokeStatic, MemberRef::new("LFoo;", "pinned"), []);
                    b.return_void();
                });
            }),
        );
        let wps = FieldSummary::<ConstantDomain>::new();
        let inliner = MultiMethodInliner::new(
            &program,
            &wps,
            [callee],
            InlinerConfig::default(),
            InlinerMode::WholeProgram,
        );

        assert_eq!(inliner.inline_callees_at(caller, &[site].into_iter().collect())?, 0);
        assert_eq!(inliner.get_info()?.blacklisted, 1);
        assert_eq!(invokes(&program, caller).len(), 1);
        assert!(inliner.events().has(EventKind::CallSiteRejected));
        assert!(!inliner.is_inlinable(caller, callee, 0)?);
        Ok(())
    }

    #[test]
    fn test_mode_none_inlines_nothing() -> Result<()> {
        let (program, ids) = call_chain_program(2);
        let wps = FieldSummary::<ConstantDomain>::new();
        let mut inliner = MultiMethodInliner::new(
            &program,
            &wps,
            ids[1..].iter().copied(),
            InlinerConfig::default(),
            InlinerMode::None,
        );
        assert!(inliner.call_graph().is_empty());
        inliner.inline_methods()?;
        assert_eq!(inliner.get_info()?.calls_inlined, 0);
        assert_eq!(invokes(&program, ids[0]).len(), 1);
        Ok(())
    }

    #[test]
    fn test_known_virtual_target_is_inlined() -> Result<()> {
        let mut program = Program::new();
        program.add_class(ClassDef::new("LFoo;"));
        let speak = program.add_method_with_body(
            MethodDef::new("LFoo;", "speak", AccessFlags::PUBLIC),
            MethodBuilder::new(2, [Reg(1)]).build_with(|m| {
                m.block(0, |b| {
                    b.const_(Reg(0), 3);
                    b.ret(Reg(0));
                });
            }),
        );
        let mut site = InsnId(0);
        let main = program.add_method_with_body(
            MethodDef::new("LFoo;", "main", AccessFlags::PUBLIC | AccessFlags::STATIC).root(),
            MethodBuilder::new(1, [Reg(0)]).build_with(|m| {
                m.block(0, |b| {
                    site = b.invoke(
                        Opcode::InvokeVirtual,
                        MemberRef::new("LFoo;", "speak"),
                        [Reg(0)],
                    );
                    b.move_result(Reg(0));
                    b.ret(Reg(0));
                });
            }),
        );
        let mut virtual_callers = TrueVirtualCallers::new();
        virtual_callers
            .entry(speak)
            .or_default()
            .insert(main, [site].into_iter().collect());

        let wps = FieldSummary::<ConstantDomain>::new();
        let mut inliner = MultiMethodInliner::new(
            &program,
            &wps,
            [speak],
            InlinerConfig::default(),
            InlinerMode::WholeProgram,
        )
        .with_true_virtual_callers(virtual_callers);
        assert_eq!(inliner.call_graph().call_site_count(speak), 1);

        inliner.inline_methods()?;
        assert!(invokes(&program, main).is_empty());
        assert!(inliner.get_inlined()?.contains(&speak));
        Ok(())
    }

    #[test]
    fn test_method_profile_switches_to_speed() {
        let (program, ids) = call_chain_program(1);
        let wps = FieldSummary::<ConstantDomain>::new();
        let profile: HashMap<MethodId, u64> = [(ids[0], 10), (ids[1], 5_000)].into_iter().collect();
        let inliner = MultiMethodInliner::new(
            &program,
            &wps,
            [ids[1]],
            InlinerConfig::default(),
            InlinerMode::WholeProgram,
        )
        .with_method_profile(&profile);
        assert!(inliner.for_speed());
        assert!(inliner.should_inline_fast(ids[1]));
        assert!(!inliner.should_inline_fast(ids[0]));
    }
}
