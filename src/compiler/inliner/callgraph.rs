//! Caller/callee relation over the inlining candidates.
//!
//! The [`CallGraph`] records one edge per call site, so the multiplicity of a callee in
//! [`CallGraph::callers`] is its number of call sites. Both directions are ordered maps,
//! which keeps every traversal, and therefore the inlining result, deterministic.
//!
//! [`CallGraph::order`] turns the graph, which may contain cycles, into the bottom-up
//! processing order: callers bucketed by the height of the call tree below them, with
//! recursive edges cut along the current call stack path.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    compiler::inliner::InlinerMode,
    ir::{InsnId, MethodId, MethodSearch, Program, Resolver},
};

/// Call sites whose target is known from virtual dispatch analysis:
/// `callee -> caller -> invoke instructions`.
pub type TrueVirtualCallers = BTreeMap<MethodId, BTreeMap<MethodId, BTreeSet<InsnId>>>;

/// Callers with their non-recursive callees, bucketed by stack depth.
#[derive(Debug, Default)]
pub struct StackDepthOrder {
    visited: HashMap<MethodId, usize>,
    /// `depth -> [(caller, distinct non-recursive callees)]`; each caller appears once
    pub by_depth: BTreeMap<usize, Vec<(MethodId, Vec<MethodId>)>>,
    /// Callee occurrences cut because they were already on the call stack path
    pub recursive: usize,
    /// Greatest depth over all top-level callers
    pub max_depth: usize,
}

impl StackDepthOrder {
    /// Iterates `(caller, callees)` from the deepest bucket to the shallowest.
    pub fn deepest_first(&self) -> impl Iterator<Item = &(MethodId, Vec<MethodId>)> {
        self.by_depth.values().rev().flatten()
    }

    /// Number of callers scheduled.
    #[must_use]
    pub fn caller_count(&self) -> usize {
        self.by_depth.values().map(Vec::len).sum()
    }
}

/// Directed, possibly cyclic, call graph restricted to inlining candidates.
#[derive(Debug, Default, Clone)]
pub struct CallGraph {
    callee_callers: BTreeMap<MethodId, Vec<MethodId>>,
    caller_callees: BTreeMap<MethodId, Vec<MethodId>>,
    /// Call sites per callee anywhere in the program, including the ones pruned by mode
    program_call_sites: BTreeMap<MethodId, usize>,
}

impl CallGraph {
    /// Builds the graph.
    ///
    /// # Arguments
    ///
    /// * `program` - Scope; every method with a body is scanned as a potential caller.
    /// * `candidates` - Methods that may be inlined.
    /// * `mode` - [`InlinerMode::None`] yields an empty graph, [`InlinerMode::SingleUnit`]
    ///   only links methods whose classes share a compilation unit.
    /// * `true_virtual_callers` - Virtual call sites with a known single target. Their
    ///   callees are linked only through these sites.
    #[must_use]
    pub fn build(
        program: &Program,
        candidates: &BTreeSet<MethodId>,
        mode: InlinerMode,
        true_virtual_callers: &TrueVirtualCallers,
    ) -> Self {
        let mut graph = Self::default();
        if mode == InlinerMode::None {
            return graph;
        }

        let same_unit = |caller: MethodId, callee: MethodId| {
            if mode != InlinerMode::SingleUnit {
                return true;
            }
            let unit = |id| {
                program
                    .method(id)
                    .and_then(|def| program.unit_of(&def.class))
                    .unwrap_or(0)
            };
            unit(caller) == unit(callee)
        };

        let virtual_sites: BTreeSet<(MethodId, InsnId)> = true_virtual_callers
            .values()
            .flat_map(|callers| {
                callers
                    .iter()
                    .flat_map(|(caller, insns)| insns.iter().map(move |insn| (*caller, *insn)))
            })
            .collect();

        for caller in program.methods() {
            let caller_id = caller.id;
            let callees: Vec<MethodId> = program
                .with_body(caller_id, |body| {
                    body.cfg
                        .instructions()
                        .filter(|insn| insn.opcode.is_invoke())
                        .filter(|insn| !virtual_sites.contains(&(caller_id, insn.id)))
                        .filter_map(|insn| {
                            let target = insn.method()?;
                            program.resolve_method(target, MethodSearch::for_opcode(insn.opcode))
                        })
                        .filter(|callee| {
                            callee.is_concrete()
                                && candidates.contains(&callee.id)
                                && !true_virtual_callers.contains_key(&callee.id)
                        })
                        .map(|callee| callee.id)
                        .collect()
                })
                .unwrap_or_default();

            for callee in callees {
                if same_unit(caller_id, callee) {
                    graph.add_call_site(caller_id, callee);
                } else {
                    graph.add_pruned_call_site(callee);
                }
            }
        }

        for (&callee, callers) in true_virtual_callers {
            for (&caller, insns) in callers {
                let linked = same_unit(caller, callee);
                for _ in insns {
                    if linked {
                        graph.add_call_site(caller, callee);
                    } else {
                        graph.add_pruned_call_site(callee);
                    }
                }
            }
        }

        graph
    }

    /// Records one call site.
    pub fn add_call_site(&mut self, caller: MethodId, callee: MethodId) {
        self.callee_callers.entry(callee).or_default().push(caller);
        self.caller_callees.entry(caller).or_default().push(callee);
        *self.program_call_sites.entry(callee).or_default() += 1;
    }

    fn add_pruned_call_site(&mut self, callee: MethodId) {
        *self.program_call_sites.entry(callee).or_default() += 1;
    }

    /// Callers of `callee`, one entry per call site.
    #[must_use]
    pub fn callers(&self, callee: MethodId) -> &[MethodId] {
        self.callee_callers.get(&callee).map_or(&[], Vec::as_slice)
    }

    /// Callees of `caller`, one entry per call site.
    #[must_use]
    pub fn callees(&self, caller: MethodId) -> &[MethodId] {
        self.caller_callees.get(&caller).map_or(&[], Vec::as_slice)
    }

    /// Number of call sites of `callee`.
    #[must_use]
    pub fn call_site_count(&self, callee: MethodId) -> usize {
        self.callers(callee).len()
    }

    /// Number of call sites of `callee` in the whole program when the graph was built.
    ///
    /// Unlike [`CallGraph::call_site_count`] this includes the sites left out by
    /// [`InlinerMode::SingleUnit`] and is not reduced by [`CallGraph::remove_caller`].
    #[must_use]
    pub fn program_call_site_count(&self, callee: MethodId) -> usize {
        self.program_call_sites.get(&callee).copied().unwrap_or(0)
    }

    /// Returns `true` if `method` calls at least one candidate.
    #[must_use]
    pub fn is_caller(&self, method: MethodId) -> bool {
        self.caller_callees.contains_key(&method)
    }

    /// Returns `true` if `method` is called by at least one method.
    #[must_use]
    pub fn is_callee(&self, method: MethodId) -> bool {
        self.callee_callers.contains_key(&method)
    }

    /// Iterates every caller in id order.
    pub fn callers_iter(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.caller_callees.keys().copied()
    }

    /// Iterates callers nobody calls, the roots of the bottom-up traversal.
    pub fn top_level_callers(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.callers_iter().filter(|caller| !self.is_callee(*caller))
    }

    /// Total number of call sites.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.caller_callees.values().map(Vec::len).sum()
    }

    /// Returns `true` if the graph has no edges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caller_callees.is_empty()
    }

    /// Drops every outgoing edge of a caller that finished processing. Callees left
    /// without callers disappear from the graph.
    pub fn remove_caller(&mut self, caller: MethodId) {
        let Some(callees) = self.caller_callees.remove(&caller) else {
            return;
        };
        for callee in callees {
            if let Some(callers) = self.callee_callers.get_mut(&callee) {
                callers.retain(|c| *c != caller);
                if callers.is_empty() {
                    self.callee_callers.remove(&callee);
                }
            }
        }
    }

    /// Computes the bottom-up order starting from every top-level caller.
    #[must_use]
    pub fn order(&self) -> StackDepthOrder {
        let mut order = StackDepthOrder::default();
        for caller in self.top_level_callers() {
            let mut call_stack = BTreeSet::new();
            let depth = self.compute_caller_nonrecursive_callees_by_stack_depth(
                caller,
                self.callees(caller),
                &mut call_stack,
                &mut order,
            );
            order.max_depth = order.max_depth.max(depth);
        }
        order
    }

    /// Collects the non-recursive callees of `caller`, recursing into callees that are
    /// callers themselves.
    ///
    /// # Arguments
    ///
    /// * `caller` - The method to process.
    /// * `callees` - Its callees, one entry per call site.
    /// * `call_stack` - Methods on the path from the traversal root to `caller`.
    /// * `order` - Accumulated result; a caller already visited is not traversed again.
    ///
    /// # Returns
    ///
    /// The stack depth of `caller`: one more than the deepest of its callees, 1 for a
    /// caller whose callees are all leaves.
    pub fn compute_caller_nonrecursive_callees_by_stack_depth(
        &self,
        caller: MethodId,
        callees: &[MethodId],
        call_stack: &mut BTreeSet<MethodId>,
        order: &mut StackDepthOrder,
    ) -> usize {
        if let Some(&depth) = order.visited.get(&caller) {
            return depth;
        }
        // a cycle back to `caller` sees depth 0
        order.visited.insert(caller, 0);
        call_stack.insert(caller);

        let mut nonrecursive = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack_depth = 0;
        for &callee in callees {
            if call_stack.contains(&callee) {
                order.recursive += 1;
                continue;
            }
            if self.is_caller(callee) {
                let depth = self.compute_caller_nonrecursive_callees_by_stack_depth(
                    callee,
                    self.callees(callee),
                    call_stack,
                    order,
                );
                stack_depth = stack_depth.max(depth);
            }
            if seen.insert(callee) {
                nonrecursive.push(callee);
            }
        }

        call_stack.remove(&caller);
        order
            .by_depth
            .entry(stack_depth)
            .or_default()
            .push((caller, nonrecursive));

        stack_depth += 1;
        order.visited.insert(caller, stack_depth);
        stack_depth
    }
}
