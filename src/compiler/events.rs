//! Change tracking for the optimization passes.
//!
//! Every rewrite performed by a pass, and every decision taken by the inliner, can be
//! recorded as an [`Event`] in an [`EventLog`]. The log is append-only and lock-free, so
//! concurrent inliner jobs record into one shared log without coordination. Events can be
//! inspected for debugging or safely ignored when not needed.
//!
//! # Architecture
//!
//! - [`Event`] - A single recorded event
//! - [`EventLog`] - Collection of events with query and summary capabilities
//! - [`EventBuilder`] - Fluent API for creating events; records itself when dropped
//!
//! # Example
//!
//! ```rust
//! use dexopt::compiler::{EventKind, EventLog};
//! use dexopt::ir::MethodId;
//!
//! let log = EventLog::new();
//! log.record(EventKind::BranchRemoved)
//!     .method(MethodId(3))
//!     .message("if-eqz v0 always taken");
//! log.record(EventKind::ConstantMaterialized);
//!
//! assert_eq!(log.count_kind(EventKind::BranchRemoved), 1);
//! assert_eq!(log.summary(), "1 branch removed, 1 constant materialized");
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use crate::ir::{InsnId, MethodId};

/// The kind of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A move or load was replaced by a constant load
    ConstantMaterialized,
    /// A field store writing the value already present was deleted
    StoreRemoved,
    /// A conditional branch with a statically known outcome was removed
    BranchRemoved,
    /// A switch was collapsed to a jump or deleted
    SwitchSimplified,
    /// A call site was replaced by the callee body
    MethodInlined,
    /// A call site was left alone
    CallSiteRejected,
    /// A dead instruction was removed
    InstructionRemoved,
    /// A register use was forwarded to the source of a copy
    CopyPropagated,
    /// A recomputation was replaced by a move from an earlier result
    ExpressionEliminated,
    /// An unreachable block was removed
    BlockRemoved,
    /// The shrinking pipeline ran on a method
    MethodShrunk,
    /// A private method was turned static for relocated call sites
    MadeStatic,
}

impl EventKind {
    /// Returns a short human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::ConstantMaterialized => "constant materialized",
            Self::StoreRemoved => "store removed",
            Self::BranchRemoved => "branch removed",
            Self::SwitchSimplified => "switch simplified",
            Self::MethodInlined => "method inlined",
            Self::CallSiteRejected => "call site rejected",
            Self::InstructionRemoved => "instruction removed",
            Self::CopyPropagated => "copy propagated",
            Self::ExpressionEliminated => "expression eliminated",
            Self::BlockRemoved => "block removed",
            Self::MethodShrunk => "method shrunk",
            Self::MadeStatic => "made static",
        }
    }

    /// Returns `true` if the event describes a change to code.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        !matches!(self, Self::CallSiteRejected | Self::MethodShrunk)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single recorded event.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened
    pub kind: EventKind,
    /// The method that was changed
    pub method: Option<MethodId>,
    /// The instruction the event is about
    pub location: Option<InsnId>,
    /// Free-form detail
    pub message: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Builder returned by [`EventLog::record`]; the event is appended when it is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    method: Option<MethodId>,
    location: Option<InsnId>,
    message: Option<String>,
}

impl EventBuilder<'_> {
    /// Sets method and instruction.
    pub fn at(mut self, method: MethodId, location: InsnId) -> Self {
        self.method = Some(method);
        self.location = Some(location);
        self
    }

    /// Sets the method.
    pub fn method(mut self, method: MethodId) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets the method if one is known.
    pub fn maybe_method(mut self, method: Option<MethodId>) -> Self {
        self.method = method.or(self.method);
        self
    }

    /// Sets the instruction.
    pub fn location(mut self, location: InsnId) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the message.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());
        self.log.events.push(Event {
            kind: self.kind,
            method: self.method.take(),
            location: self.location.take(),
            message,
        });
    }
}

/// Append-only, thread-safe collection of events.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let new_log = Self::new();
        new_log.merge(self);
        new_log
    }
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts recording an event of `kind`.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder {
            log: self,
            kind,
            method: None,
            location: None,
            message: None,
        }
    }

    /// Appends copies of all events of `other`.
    pub fn merge(&self, other: &EventLog) {
        for (_, event) in &other.events {
            self.events.push(event.clone());
        }
    }

    /// Returns `true` if an event of `kind` was recorded.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Returns `true` if an event of any of `kinds` was recorded.
    #[must_use]
    pub fn has_any(&self, kinds: &[EventKind]) -> bool {
        self.events.iter().any(|(_, e)| kinds.contains(&e.kind))
    }

    /// Number of events of `kind`.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Iterates all events in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Iterates the events of one kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(move |(_, e)| (e.kind == kind).then_some(e))
    }

    /// Iterates the events of one method.
    pub fn filter_method(&self, method: MethodId) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(move |(_, e)| (e.method == Some(method)).then_some(e))
    }

    /// Counts events per kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Number of distinct methods with at least one event.
    #[must_use]
    pub fn methods_affected(&self) -> usize {
        self.events
            .iter()
            .filter_map(|(_, e)| e.method)
            .collect::<HashSet<_>>()
            .len()
    }

    /// One-line summary of the transformation counts, sorted by text.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_on_drop() {
        let log = EventLog::new();
        {
            let _builder = log.record(EventKind::StoreRemoved).at(MethodId(1), InsnId(4));
            assert!(log.is_empty());
        }
        assert_eq!(log.len(), 1);
        let event = log.iter().next().unwrap();
        assert_eq!(event.location, Some(InsnId(4)));
        assert_eq!(event.message, "store removed");
    }

    #[test]
    fn test_queries() {
        let log = EventLog::new();
        log.record(EventKind::MethodInlined).method(MethodId(1));
        log.record(EventKind::MethodInlined).method(MethodId(2));
        log.record(EventKind::CallSiteRejected)
            .method(MethodId(2))
            .message("blacklisted");

        assert!(log.has_any(&[EventKind::BlockRemoved, EventKind::MethodInlined]));
        assert!(!log.has(EventKind::BlockRemoved));
        assert_eq!(log.count_by_kind()[&EventKind::MethodInlined], 2);
        assert_eq!(log.filter_method(MethodId(2)).count(), 2);
        assert_eq!(log.methods_affected(), 2);
        assert_eq!(log.summary(), "2 method inlined");
    }

    #[test]
    fn test_concurrent_recording() {
        let log = EventLog::new();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        log.record(EventKind::CopyPropagated);
                    }
                });
            }
        });
        assert_eq!(log.count_kind(EventKind::CopyPropagated), 400);
    }

    #[test]
    fn test_clone_and_merge() {
        let log = EventLog::new();
        log.record(EventKind::BlockRemoved);
        let copy = log.clone();
        copy.merge(&log);
        assert_eq!(copy.len(), 2);
        assert_eq!(log.len(), 1);
    }
}
