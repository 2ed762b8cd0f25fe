//! Inlining statistics.

use std::fmt;

/// Counters describing one inlining run.
///
/// Every call site that was looked at either increments `calls_inlined` or exactly one
/// rejection counter. The scheduling fields depend on wall time and thread interleaving;
/// all others are identical between sequential and parallel runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InliningInfo {
    /// Call sites replaced by the callee body
    pub calls_inlined: usize,
    /// Callees skipped because they were already on the call stack path
    pub recursive: usize,
    /// Deepest caller/callee chain found while ordering
    pub max_call_stack_depth: usize,
    /// Call sites whose callee body or invoke instruction vanished before inlining
    pub not_found: usize,

    /// Callee or caller excluded by policy
    pub blacklisted: usize,
    /// Callee throws or catches a type the caller cannot see
    pub throws: usize,
    /// Callee has several returns
    pub multi_ret: usize,
    /// Callee calls a direct method that cannot be made static
    pub need_vmethod: usize,
    /// Callee uses `invoke-super` outside its own class
    pub invoke_super: usize,
    /// Tail calls that had to fall back to parameter copies
    pub write_over_ins: usize,
    /// Callee calls an unresolvable virtual method of a program class
    pub escaped_virtual: usize,
    /// Unresolved virtual calls into library classes, assumed public
    pub known_public_methods: usize,
    /// Callee calls a method of a program class that does not resolve
    pub unresolved_methods: usize,
    /// Callee calls a non-public library method
    pub non_pub_virtual: usize,
    /// Callee accesses a field that does not resolve
    pub escaped_field: usize,
    /// Callee accesses a non-public library field
    pub non_pub_field: usize,
    /// Callee calls a non-public library constructor
    pub non_pub_ctor: usize,
    /// Callee references a class of another compilation unit
    pub cross_store: usize,
    /// Caller would exceed the size limit
    pub caller_too_large: usize,
    /// Callees not inlined because inlining everywhere would grow the code
    pub too_many_callers: usize,
    /// Callee reads a field that must stay in place
    pub version_sentinel: usize,

    /// Callers surveyed for constant arguments
    pub constant_invoke_callers_analyzed: usize,
    /// Unreachable blocks found in surveyed callers
    pub constant_invoke_callers_unreachable_blocks: usize,
    /// Callees shrunk with constant arguments
    pub constant_invoke_callees_analyzed: usize,
    /// Unreachable blocks found in callees given their constant arguments
    pub constant_invoke_callees_unreachable_blocks: usize,

    /// Time workers spent idle
    pub waited_seconds: u64,
    /// Highest scheduling priority, the length of the longest dependency chain
    pub critical_path_length: usize,
}

impl InliningInfo {
    /// Returns a copy with the fields that depend on timing cleared.
    #[must_use]
    pub fn without_timing(&self) -> Self {
        Self {
            waited_seconds: 0,
            ..self.clone()
        }
    }

    /// Total number of rejected call sites.
    #[must_use]
    pub fn rejected(&self) -> usize {
        self.blacklisted
            + self.throws
            + self.multi_ret
            + self.need_vmethod
            + self.invoke_super
            + self.escaped_virtual
            + self.unresolved_methods
            + self.non_pub_virtual
            + self.escaped_field
            + self.non_pub_field
            + self.non_pub_ctor
            + self.cross_store
            + self.caller_too_large
            + self.version_sentinel
    }
}

impl fmt::Display for InliningInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} calls inlined, {} rejected, {} recursive, {} with too many callers, \
             max depth {}, critical path {}",
            self.calls_inlined,
            self.rejected(),
            self.recursive,
            self.too_many_callers,
            self.max_call_stack_depth,
            self.critical_path_length
        )
    }
}

impl std::ops::AddAssign for InliningInfo {
    fn add_assign(&mut self, other: Self) {
        self.calls_inlined += other.calls_inlined;
        self.recursive += other.recursive;
        self.max_call_stack_depth = self.max_call_stack_depth.max(other.max_call_stack_depth);
        self.not_found += other.not_found;
        self.blacklisted += other.blacklisted;
        self.throws += other.throws;
        self.multi_ret += other.multi_ret;
        self.need_vmethod += other.need_vmethod;
        self.invoke_super += other.invoke_super;
        self.write_over_ins += other.write_over_ins;
        self.escaped_virtual += other.escaped_virtual;
        self.known_public_methods += other.known_public_methods;
        self.unresolved_methods += other.unresolved_methods;
        self.non_pub_virtual += other.non_pub_virtual;
        self.escaped_field += other.escaped_field;
        self.non_pub_field += other.non_pub_field;
        self.non_pub_ctor += other.non_pub_ctor;
        self.cross_store += other.cross_store;
        self.caller_too_large += other.caller_too_large;
        self.too_many_callers += other.too_many_callers;
        self.version_sentinel += other.version_sentinel;
        self.constant_invoke_callers_analyzed += other.constant_invoke_callers_analyzed;
        self.constant_invoke_callers_unreachable_blocks +=
            other.constant_invoke_callers_unreachable_blocks;
        self.constant_invoke_callees_analyzed += other.constant_invoke_callees_analyzed;
        self.constant_invoke_callees_unreachable_blocks +=
            other.constant_invoke_callees_unreachable_blocks;
        self.waited_seconds += other.waited_seconds;
        self.critical_path_length = self.critical_path_length.max(other.critical_path_length);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sums_counters_and_keeps_maxima() {
        let mut total = InliningInfo {
            calls_inlined: 2,
            max_call_stack_depth: 4,
            ..InliningInfo::default()
        };
        total += InliningInfo {
            calls_inlined: 1,
            throws: 1,
            max_call_stack_depth: 2,
            waited_seconds: 3,
            ..InliningInfo::default()
        };
        assert_eq!(total.calls_inlined, 3);
        assert_eq!(total.max_call_stack_depth, 4);
        assert_eq!(total.rejected(), 1);
        assert_eq!(total.without_timing().waited_seconds, 0);
        assert!(total.to_string().starts_with("3 calls inlined, 1 rejected"));
    }
}
