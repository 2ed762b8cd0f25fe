//! Inliner configuration.

use std::collections::HashSet;

use crate::{
    compiler::{passes::TransformConfig, shrinker::ShrinkerConfig},
    ir::MemberRef,
};

/// Which caller/callee pairs the inliner links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum InlinerMode {
    /// No call graph is built; bulk inlining does nothing
    #[strum(serialize = "none")]
    None,
    /// Any caller may inline any candidate
    #[default]
    #[strum(serialize = "whole-program")]
    WholeProgram,
    /// Callers only inline candidates defined in their own compilation unit
    #[strum(serialize = "single-unit")]
    SingleUnit,
}

/// Policy of the [`crate::compiler::MultiMethodInliner`].
///
/// # Examples
///
/// ```rust
/// use dexopt::compiler::InlinerConfig;
///
/// let config = InlinerConfig {
///     num_threads: 4,
///     delay_callee_shrinking: false,
///     ..InlinerConfig::default()
/// };
/// assert!(config.shrinking_enabled);
/// assert_eq!(config.max_caller_size, 1 << 15);
/// ```
#[derive(Debug, Clone)]
pub struct InlinerConfig {
    /// Options of the constant propagation transform run while shrinking
    pub transform: TransformConfig,
    /// Passes run while shrinking
    pub shrinker: ShrinkerConfig,
    /// Shrink methods after inlining
    pub shrinking_enabled: bool,
    /// Shrink leaf callees only after every caller inlined them
    pub delay_callee_shrinking: bool,
    /// Maximum estimated caller size, in code units, after inlining
    pub max_caller_size: usize,
    /// Slack added to size estimates
    pub instruction_buffer: usize,
    /// Reject call sites that would grow the caller beyond `max_caller_size`
    pub enforce_method_size_limit: bool,
    /// Classes whose methods are exempt from the caller size limit
    pub no_size_limit_callers: HashSet<String>,
    /// Callees with more call sites than this are not inlined unless they are cheaper
    /// than a call
    pub max_callee_call_sites: usize,
    /// Classes whose methods are never inlined
    pub callee_blacklist: HashSet<String>,
    /// Classes whose methods never inline anything
    pub caller_blacklist: HashSet<String>,
    /// Allow inlining callees that throw
    pub throws_inline: bool,
    /// Allow inlining callees with more than one return
    pub multiple_callee_returns: bool,
    /// Fields whose reads must stay in their declaring method
    pub version_sentinel_fields: HashSet<MemberRef>,
    /// Seed the shrinking of callees with the arguments known at all their call sites
    pub use_call_site_constant_arguments: bool,
    /// Call count at which a profiled method counts as hot
    pub hot_method_min_call_count: u64,
    /// Worker threads; 0 runs everything on the calling thread
    pub num_threads: usize,
}

impl Default for InlinerConfig {
    fn default() -> Self {
        Self {
            transform: TransformConfig::default(),
            shrinker: ShrinkerConfig::default(),
            shrinking_enabled: true,
            delay_callee_shrinking: true,
            max_caller_size: 1 << 15,
            instruction_buffer: 1 << 12,
            enforce_method_size_limit: true,
            no_size_limit_callers: HashSet::new(),
            max_callee_call_sites: 64,
            callee_blacklist: HashSet::new(),
            caller_blacklist: HashSet::new(),
            throws_inline: true,
            multiple_callee_returns: true,
            version_sentinel_fields: HashSet::new(),
            use_call_site_constant_arguments: true,
            hot_method_min_call_count: 1000,
            num_threads: 0,
        }
    }
}

impl InlinerConfig {
    /// Returns `true` if shrinking runs and at least one shrinking pass is enabled.
    #[must_use]
    pub fn shrinks(&self) -> bool {
        self.shrinking_enabled && self.shrinker.any_enabled()
    }
}
