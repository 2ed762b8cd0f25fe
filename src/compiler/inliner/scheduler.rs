//! Bottom-up scheduling of the inlining jobs.
//!
//! [`MultiMethodInliner::inline_methods`] turns the stack-depth order into a dependency
//! DAG and drives it through a [`PriorityThreadPool`]:
//!
//! - A caller's job starts once every callee in its pruned callee list has finished.
//! - A leaf callee (one that calls no candidate) is post-processed first; with delayed
//!   shrinking it is shrunk only after all of its callers finished.
//! - Completing a job decrements the wait counters of the jobs depending on it; a counter
//!   reaching zero submits the dependent job. No worker ever blocks on another job.
//!
//! Priorities grow with distance from the top-level callers, so the deepest callees run
//! first and the longest dependency chain starts as early as possible.

use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicUsize, Ordering},
};

use rayon::prelude::*;

use crate::{
    analysis::{
        AbstractValue, ConstantEnvironment, ConstantTransfer, FixpointIterator,
        IntraproceduralFixpoint, JoinSemiLattice,
    },
    compiler::inliner::{InliningInfo, MultiMethodInliner, StackDepthOrder},
    ir::{MethodBody, MethodDef, MethodId},
    utils::PriorityThreadPool,
    Error, Result,
};

/// Argument values joined over every call site of one callee.
#[derive(Debug, Clone)]
pub(crate) struct ConstantArguments<V> {
    /// Joined values, one per parameter; `None` until a reachable call site is seen
    values: Option<Vec<V>>,
    /// Call sites surveyed, reachable or not
    call_sites: usize,
}

impl<V> Default for ConstantArguments<V> {
    fn default() -> Self {
        Self {
            values: None,
            call_sites: 0,
        }
    }
}

impl<V: AbstractValue> ConstantArguments<V> {
    fn add(&mut self, values: Option<Vec<V>>) {
        self.call_sites += 1;
        let Some(values) = values else {
            return;
        };
        self.values = Some(match self.values.take() {
            None => values,
            Some(joined) => joined.iter().zip(&values).map(|(a, b)| a.join(b)).collect(),
        });
    }
}

/// Work items of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    /// A leaf callee is ready for its callers
    Postprocess(MethodId),
    /// Every callee of a caller finished; inline into it
    InlineCaller(MethodId),
    /// Every caller of a delayed leaf finished; shrink it
    DelayedShrink(MethodId),
}

/// The cycle-pruned dependency DAG with its countdown state.
#[derive(Debug, Default)]
struct Schedule {
    callee_callers: BTreeMap<MethodId, Vec<MethodId>>,
    caller_callees: BTreeMap<MethodId, Vec<MethodId>>,
    priorities: HashMap<MethodId, usize>,
    caller_wait_counts: HashMap<MethodId, AtomicUsize>,
    delayed_wait_counts: HashMap<MethodId, AtomicUsize>,
}

impl Schedule {
    fn new(order: &StackDepthOrder, delay_leaf_shrinking: bool) -> Self {
        let mut schedule = Self::default();
        for (caller, callees) in order.deepest_first() {
            schedule.caller_callees.insert(*caller, callees.clone());
            schedule
                .caller_wait_counts
                .insert(*caller, AtomicUsize::new(callees.len()));
            for callee in callees {
                schedule
                    .callee_callers
                    .entry(*callee)
                    .or_default()
                    .push(*caller);
            }
        }

        // deepest_first visits every caller before its pruned callees
        for (caller, _) in order.deepest_first() {
            let priority = schedule.priority_from_callers(*caller);
            schedule.priorities.insert(*caller, priority);
        }
        let leaves: Vec<MethodId> = schedule.leaves().collect();
        for leaf in leaves {
            let priority = schedule.priority_from_callers(leaf);
            schedule.priorities.insert(leaf, priority);
            if delay_leaf_shrinking {
                let callers = schedule.callers(leaf).len();
                schedule
                    .delayed_wait_counts
                    .insert(leaf, AtomicUsize::new(callers));
            }
        }
        schedule
    }

    fn priority_from_callers(&self, method: MethodId) -> usize {
        self.callers(method)
            .iter()
            .filter_map(|caller| self.priorities.get(caller))
            .map(|p| p + 1)
            .max()
            .unwrap_or(0)
    }

    /// Callees that are not callers themselves.
    fn leaves(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.callee_callers
            .keys()
            .copied()
            .filter(|callee| !self.caller_callees.contains_key(callee))
    }

    fn callers(&self, callee: MethodId) -> &[MethodId] {
        self.callee_callers.get(&callee).map_or(&[], Vec::as_slice)
    }

    fn callees(&self, caller: MethodId) -> &[MethodId] {
        self.caller_callees.get(&caller).map_or(&[], Vec::as_slice)
    }

    fn priority(&self, method: MethodId) -> usize {
        self.priorities.get(&method).copied().unwrap_or(0)
    }

    fn critical_path_length(&self) -> usize {
        self.priorities.values().copied().max().unwrap_or(0)
    }

    fn is_delayed(&self, method: MethodId) -> bool {
        self.delayed_wait_counts.contains_key(&method)
    }

    /// Submits the jobs that have no dependencies.
    fn kickoff(&self, pool: &PriorityThreadPool<Job>) -> Result<()> {
        for leaf in self.leaves() {
            pool.submit(self.priority(leaf), Job::Postprocess(leaf))?;
        }
        for (&caller, callees) in &self.caller_callees {
            if callees.is_empty() {
                pool.submit(self.priority(caller), Job::InlineCaller(caller))?;
            }
        }
        Ok(())
    }

    /// Decrements a wait counter.
    ///
    /// Returns `true` if this decrement released the method. Methods without a counter
    /// never are.
    fn count_down(counts: &HashMap<MethodId, AtomicUsize>, method: MethodId) -> Result<bool> {
        let Some(count) = counts.get(&method) else {
            return Ok(false);
        };
        let previous = count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| Error::GraphError(format!("wait counter of {method} underflowed")))?;
        Ok(previous == 1)
    }
}

impl<V: AbstractValue> MultiMethodInliner<'_, V> {
    /// Inlines all profitable call sites of the call graph, bottom-up.
    ///
    /// Runs on [`InlinerConfig::num_threads`](crate::compiler::InlinerConfig::num_threads)
    /// workers, or on the calling thread if it is 0; the result is the same either way.
    /// Callers that only occur inside a cycle with no outside caller are not processed.
    ///
    /// # Errors
    ///
    /// Returns the first error a job hit, [`Error::Malformed`] for an inconsistent method
    /// body and [`Error::GraphError`] for inconsistent scheduling state. No further jobs
    /// start after an error.
    pub fn inline_methods(&mut self) -> Result<()> {
        let order = self.call_graph.order();
        self.update_info(|info| {
            info.recursive += order.recursive;
            info.max_call_stack_depth = info.max_call_stack_depth.max(order.max_depth);
        })?;

        if self.config.use_call_site_constant_arguments
            && self.config.shrinks()
            && self.shrinker.config().run_const_prop
        {
            self.callee_constant_arguments = self.survey_constant_arguments()?;
        }

        let delay = self.config.shrinks() && self.config.delay_callee_shrinking;
        let schedule = Schedule::new(&order, delay);
        let critical_path_length = schedule.critical_path_length();
        self.update_info(|info| {
            info.critical_path_length = info.critical_path_length.max(critical_path_length);
        })?;

        let pool = PriorityThreadPool::new(self.config.num_threads);
        schedule.kickoff(&pool)?;
        log::debug!(
            "scheduling {} callers on {} threads, critical path {}",
            order.caller_count(),
            self.config.num_threads,
            critical_path_length
        );
        pool.run_to_completion(|pool, job| self.run_job(&schedule, pool, job))?;

        let waited = pool.waited()?.as_secs();
        self.update_info(|info| info.waited_seconds += waited)?;
        log::debug!("inlining done: {}", self.get_info()?);
        Ok(())
    }

    fn run_job(&self, schedule: &Schedule, pool: &PriorityThreadPool<Job>, job: Job) -> Result<()> {
        log::trace!("running {:?}", job);
        match job {
            Job::Postprocess(callee) => {
                if !schedule.is_delayed(callee) {
                    self.shrink_method(callee)?;
                }
                self.finish(schedule, pool, callee)
            }
            Job::InlineCaller(caller) => {
                let callees = schedule.callees(caller);
                self.caller_inline(caller, callees)?;
                self.shrink_method(caller)?;
                self.lock_state()?.pending.remove_caller(caller);
                for &callee in callees {
                    if Schedule::count_down(&schedule.delayed_wait_counts, callee)? {
                        pool.submit(schedule.priority(callee), Job::DelayedShrink(callee))?;
                    }
                }
                self.finish(schedule, pool, caller)
            }
            Job::DelayedShrink(callee) => self.shrink_method(callee),
        }
    }

    /// Releases the callers waiting for `method`.
    fn finish(
        &self,
        schedule: &Schedule,
        pool: &PriorityThreadPool<Job>,
        method: MethodId,
    ) -> Result<()> {
        for &caller in schedule.callers(method) {
            if Schedule::count_down(&schedule.caller_wait_counts, caller)? {
                pool.submit(schedule.priority(caller), Job::InlineCaller(caller))?;
            }
        }
        Ok(())
    }

    fn caller_inline(&self, caller: MethodId, callees: &[MethodId]) -> Result<usize> {
        let mut selected = Vec::with_capacity(callees.len());
        for &callee in callees {
            if self.should_inline(callee)? {
                selected.push(callee);
            }
        }
        if selected.is_empty() {
            return Ok(0);
        }
        self.inline_into(caller, |callee, _| selected.contains(&callee))
    }

    fn transfer_for<'b>(
        &'b self,
        def: &'b MethodDef,
        body: &MethodBody,
    ) -> ConstantTransfer<'b, V> {
        let transfer = ConstantTransfer::new(self.program, self.wps);
        if def.is_class_initializer() {
            transfer.with_class_under_init(Some(def.class.as_str()))
        } else if def.is_constructor() {
            transfer
                .with_class_under_init(Some(def.class.as_str()))
                .with_receiver(body.params.first().copied())
        } else {
            transfer
        }
    }

    /// Analyzes every caller of the graph and joins the argument values of its call sites
    /// per callee.
    fn survey_constant_arguments(&self) -> Result<HashMap<MethodId, ConstantArguments<V>>> {
        let callers: Vec<MethodId> = self.call_graph.callers_iter().collect();
        let surveys: Vec<_> = callers
            .par_iter()
            .map(|&caller| self.survey_caller(caller))
            .collect();

        let mut arguments: HashMap<MethodId, ConstantArguments<V>> = HashMap::new();
        let mut info = InliningInfo::default();
        for (unreachable_blocks, sites) in surveys.into_iter().flatten() {
            info.constant_invoke_callers_analyzed += 1;
            info.constant_invoke_callers_unreachable_blocks += unreachable_blocks;
            for (callee, values) in sites {
                arguments.entry(callee).or_default().add(values);
            }
        }
        log::debug!(
            "surveyed {} callers for constant arguments of {} callees",
            info.constant_invoke_callers_analyzed,
            arguments.len()
        );
        self.update_info(|total| *total += info)?;
        Ok(arguments)
    }

    /// Returns the number of unreachable blocks of `caller` and, per call site of a graph
    /// callee, the argument values if the site is reachable.
    #[allow(clippy::type_complexity)]
    fn survey_caller(&self, caller: MethodId) -> Option<(usize, Vec<(MethodId, Option<Vec<V>>)>)> {
        let def = self.program.method(caller)?;
        let callees = self.call_graph.callees(caller);
        self.program.with_body(caller, |body| {
            let fixpoint = IntraproceduralFixpoint::analyze(
                body,
                self.transfer_for(def, body),
                ConstantEnvironment::top(),
            );
            let mut sites = Vec::new();
            for block in body.cfg.blocks() {
                let mut env = fixpoint.entry_state(block.id());
                let reachable = !env.is_bottom();
                for insn in block.instructions() {
                    if insn.opcode.is_invoke() {
                        if let Some(callee) = self
                            .resolve_callee(caller, insn)
                            .filter(|callee| callees.contains(callee))
                        {
                            let values: Option<Vec<V>> =
                                reachable.then(|| insn.srcs.iter().map(|r| env.get(*r)).collect());
                            sites.push((callee, values));
                        }
                    }
                    if reachable {
                        fixpoint.analyze_instruction(insn, &mut env);
                    }
                }
            }
            (fixpoint.unreachable_block_count(body), sites)
        })
    }

    /// Joined argument values of `method`, if every one of its call sites was surveyed
    /// and nothing outside the call graph can call it.
    fn constant_arguments_for(&self, method: MethodId) -> Option<Vec<V>> {
        let def = self.program.method(method)?;
        if def.is_root || self.true_virtual_callers.contains_key(&method) {
            return None;
        }
        let arguments = self.callee_constant_arguments.get(&method)?;
        // callers pruned from the graph were not surveyed
        if arguments.call_sites != self.call_graph.program_call_site_count(method) {
            return None;
        }
        let values = arguments.values.as_ref()?;
        if values.iter().all(|v| v.is_top()) {
            return None;
        }
        Some(values.clone())
    }

    /// Shrinks one method, seeding constant propagation with its constant arguments.
    fn shrink_method(&self, method: MethodId) -> Result<()> {
        if !self.config.shrinks() {
            return Ok(());
        }
        let (Some(def), Some(mut body)) =
            (self.program.method(method), self.program.take_body(method))
        else {
            return Ok(());
        };

        let arguments = self.constant_arguments_for(method);
        if let Some(values) = &arguments {
            let mut initial = ConstantEnvironment::top();
            for (&param, value) in body.params.iter().zip(values) {
                initial.set(param, value.clone());
            }
            let fixpoint =
                IntraproceduralFixpoint::analyze(&body, self.transfer_for(def, &body), initial);
            let unreachable_blocks = fixpoint.unreachable_block_count(&body);
            self.update_info(|info| {
                info.constant_invoke_callees_analyzed += 1;
                info.constant_invoke_callees_unreachable_blocks += unreachable_blocks;
            })?;
        }

        let result = self.shrinker.shrink_method(
            self.program,
            self.wps,
            Some(method),
            &mut body,
            arguments.as_deref(),
            &self.events,
        );
        self.program.set_body(method, body);
        result.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ConstantDomain;
    use crate::compiler::inliner::CallGraph;

    fn order(edges: &[(u32, u32)]) -> StackDepthOrder {
        let mut graph = CallGraph::default();
        for &(caller, callee) in edges {
            graph.add_call_site(MethodId(caller), MethodId(callee));
        }
        graph.order()
    }

    #[test]
    fn test_priorities_grow_towards_leaves() {
        // 0 -> 1 -> 2, 0 -> 2
        let schedule = Schedule::new(&order(&[(0, 1), (1, 2), (0, 2)]), false);
        assert_eq!(schedule.priority(MethodId(0)), 0);
        assert_eq!(schedule.priority(MethodId(1)), 1);
        assert_eq!(schedule.priority(MethodId(2)), 2);
        assert_eq!(schedule.critical_path_length(), 2);
        assert_eq!(schedule.leaves().collect::<Vec<_>>(), vec![MethodId(2)]);
    }

    #[test]
    fn test_wait_counts_release_once() -> Result<()> {
        let schedule = Schedule::new(&order(&[(0, 1), (0, 2), (0, 1)]), true);
        let counts = &schedule.caller_wait_counts;
        assert!(!Schedule::count_down(counts, MethodId(0))?);
        assert!(Schedule::count_down(counts, MethodId(0))?);
        assert!(matches!(
            Schedule::count_down(counts, MethodId(0)),
            Err(Error::GraphError(_))
        ));
        assert!(schedule.is_delayed(MethodId(1)));
        assert!(!Schedule::count_down(counts, MethodId(7))?);
        Ok(())
    }

    #[test]
    fn test_kickoff_submits_independent_jobs() -> Result<()> {
        let schedule = Schedule::new(&order(&[(0, 1), (2, 3), (3, 2)]), false);
        let pool = PriorityThreadPool::new(0);
        schedule.kickoff(&pool)?;
        let jobs = std::sync::Mutex::new(Vec::new());
        pool.run_to_completion(|_, job| {
            jobs.lock().map_err(|_| Error::LockError)?.push(job);
            Ok(())
        })?;
        // the pure cycle 2 <-> 3 has no top-level caller and is never scheduled
        assert_eq!(
            jobs.into_inner().map_err(|_| Error::LockError)?,
            vec![Job::Postprocess(MethodId(1))]
        );
        Ok(())
    }

    #[test]
    fn test_constant_arguments_join_reachable_sites() {
        let mut arguments = ConstantArguments::<ConstantDomain>::default();
        arguments.add(Some(vec![ConstantDomain::Constant(1), ConstantDomain::Constant(2)]));
        arguments.add(None);
        arguments.add(Some(vec![ConstantDomain::Constant(1), ConstantDomain::Constant(3)]));
        assert_eq!(arguments.call_sites, 3);
        assert_eq!(
            arguments.values,
            Some(vec![ConstantDomain::Constant(1), ConstantDomain::Top])
        );
    }
}
