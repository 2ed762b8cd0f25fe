//! Inlinability predicates and the size-based profitability model.
//!
//! [`MultiMethodInliner::is_inlinable`] decides whether a single call site can be inlined
//! safely; it runs the predicates below in a fixed order and stops at the first
//! rejection, which is counted in [`InliningInfo`]. [`MultiMethodInliner::should_inline`]
//! decides, once per callee, whether inlining it everywhere is worth the code growth.

use dashmap::mapref::entry::Entry;

use crate::{
    analysis::AbstractValue,
    compiler::inliner::{InliningInfo, MultiMethodInliner},
    ir::{
        FieldSearch, Instruction, MethodBody, MethodDef, MethodId, MethodSearch, Opcode,
        Resolver,
    },
    Error, Result,
};

/// Code units of a call: the invoke itself.
pub(crate) const INVOKE_COST: usize = 3;
/// Code units a method costs beyond its instructions (header, references).
pub(crate) const METHOD_OVERHEAD: usize = 16;

/// Reason a call site was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Rejection {
    /// Callee excluded by policy
    Blacklisted,
    /// Caller excluded by policy
    CallerBlacklisted,
    /// Callee throws, or catches a type the caller cannot see
    Throws,
    /// Callee has several returns
    MultiRet,
    /// Callee calls a direct method that cannot be made static
    NeedVmethod,
    /// Callee uses `invoke-super` on behalf of another class
    InvokeSuper,
    /// Callee calls an unresolvable virtual method of a program class
    EscapedVirtual,
    /// Callee calls an unresolvable static or interface method of a program class
    UnresolvedMethods,
    /// Callee calls a non-public library method
    NonPubVirtual,
    /// Callee accesses an unresolvable field
    EscapedField,
    /// Callee accesses a non-public library field
    NonPubField,
    /// Callee constructs a library object through a non-public constructor
    NonPubCtor,
    /// Callee references a class of a compilation unit the caller cannot see
    CrossStore,
    /// The caller would grow beyond the size limit
    CallerTooLarge,
    /// Callee reads a field whose read must stay where it is
    VersionSentinel,
}

impl Rejection {
    /// Increments the counter belonging to this reason.
    pub fn record(self, info: &mut InliningInfo) {
        let counter = match self {
            Self::Blacklisted | Self::CallerBlacklisted => &mut info.blacklisted,
            Self::Throws => &mut info.throws,
            Self::MultiRet => &mut info.multi_ret,
            Self::NeedVmethod => &mut info.need_vmethod,
            Self::InvokeSuper => &mut info.invoke_super,
            Self::EscapedVirtual => &mut info.escaped_virtual,
            Self::UnresolvedMethods => &mut info.unresolved_methods,
            Self::NonPubVirtual => &mut info.non_pub_virtual,
            Self::EscapedField => &mut info.escaped_field,
            Self::NonPubField => &mut info.non_pub_field,
            Self::NonPubCtor => &mut info.non_pub_ctor,
            Self::CrossStore => &mut info.cross_store,
            Self::CallerTooLarge => &mut info.caller_too_large,
            Self::VersionSentinel => &mut info.version_sentinel,
        };
        *counter += 1;
    }
}

/// Outcome of checking one call site.
#[derive(Debug, Default)]
pub(crate) struct SiteCheck {
    pub rejection: Option<Rejection>,
    /// Direct methods the callee calls that must become static for the call to move
    pub make_static: Vec<MethodId>,
}

/// Estimated code units a copy of `body` adds at a call site.
///
/// Returns turn into moves and jumps; all but one of them need a jump.
pub(crate) fn inlined_cost(body: &MethodBody) -> usize {
    let instructions: usize = body
        .cfg
        .instructions()
        .filter(|insn| !insn.opcode.is_return())
        .map(Instruction::code_units)
        .sum();
    instructions + body.return_count().saturating_sub(1)
}

impl<V: AbstractValue> MultiMethodInliner<'_, V> {
    /// Decides whether `callee` may be inlined into `caller`.
    ///
    /// Rejections are counted in [`InliningInfo`]; an accepted call site records the
    /// direct methods that need static conversion for [`MultiMethodInliner::finalize`].
    ///
    /// # Arguments
    ///
    /// * `caller` - The method containing the call.
    /// * `callee` - The called method.
    /// * `estimated_caller_size` - Current size estimate of the caller in code units.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMethod`] if either method is not defined, and
    /// [`Error::LockError`] if shared state is poisoned.
    pub fn is_inlinable(
        &self,
        caller: MethodId,
        callee: MethodId,
        estimated_caller_size: usize,
    ) -> Result<bool> {
        let caller_def = self
            .program
            .method(caller)
            .ok_or(Error::UnknownMethod(caller))?;
        let callee_def = self
            .program
            .method(callee)
            .ok_or(Error::UnknownMethod(callee))?;
        let body = self
            .program
            .clone_body(callee)
            .ok_or(Error::UnknownMethod(callee))?;

        let mut info = InliningInfo::default();
        let check = self.check_call_site(
            caller_def,
            callee_def,
            &body,
            estimated_caller_size,
            &mut info,
        );
        if let Some(rejection) = check.rejection {
            rejection.record(&mut info);
        } else {
            self.mark_make_static(&check.make_static)?;
        }
        self.update_info(|total| *total += info)?;
        Ok(check.rejection.is_none())
    }

    pub(crate) fn check_call_site(
        &self,
        caller: &MethodDef,
        callee: &MethodDef,
        body: &MethodBody,
        estimated_caller_size: usize,
        info: &mut InliningInfo,
    ) -> SiteCheck {
        let mut check = SiteCheck::default();
        check.rejection = if self.cross_store_reference(caller, body) {
            Some(Rejection::CrossStore)
        } else if self.is_blacklisted(callee) {
            Some(Rejection::Blacklisted)
        } else if self.caller_is_blacklisted(caller) {
            Some(Rejection::CallerBlacklisted)
        } else if self.has_external_catch(body) {
            Some(Rejection::Throws)
        } else if let Some(rejection) =
            self.cannot_inline_opcodes(caller, callee, body, info, &mut check.make_static)
        {
            Some(rejection)
        } else if !callee.force_inline
            && self.caller_too_large(caller, estimated_caller_size, callee.id)
        {
            Some(Rejection::CallerTooLarge)
        } else {
            None
        };
        if check.rejection.is_some() {
            check.make_static.clear();
        }
        check
    }

    /// Returns `true` if policy forbids inlining `callee` anywhere.
    ///
    /// Besides explicit exclusions, the generated `values`/`valueOf` of enums are kept
    /// since library code looks them up by name.
    #[must_use]
    pub fn is_blacklisted(&self, callee: &MethodDef) -> bool {
        if callee.dont_inline || self.config.callee_blacklist.contains(&callee.class) {
            return true;
        }
        self.program
            .class(&callee.class)
            .is_some_and(|class| class.is_enum())
            && matches!(callee.name.as_str(), "values" | "valueOf")
    }

    /// Returns `true` if policy forbids inlining anything into `caller`.
    #[must_use]
    pub fn caller_is_blacklisted(&self, caller: &MethodDef) -> bool {
        self.config.caller_blacklist.contains(&caller.class)
    }

    /// Returns `true` if the callee catches a type that is not visible everywhere.
    ///
    /// Types unknown to the program are treated as not visible.
    #[must_use]
    pub fn has_external_catch(&self, callee: &MethodBody) -> bool {
        callee.catch_types.iter().any(|ty| match self.program.class(ty) {
            Some(class) => class.is_external && !class.is_public(),
            None => true,
        })
    }

    fn cannot_inline_opcodes(
        &self,
        caller: &MethodDef,
        callee: &MethodDef,
        body: &MethodBody,
        info: &mut InliningInfo,
        make_static: &mut Vec<MethodId>,
    ) -> Option<Rejection> {
        let mut returns = 0;
        for insn in body.cfg.instructions() {
            if let Some(rejection) = self.create_vmethod(insn, caller, callee, make_static) {
                return Some(rejection);
            }
            if Self::nonrelocatable_invoke_super(insn, caller, callee) {
                return Some(Rejection::InvokeSuper);
            }
            if let Some(rejection) = self.unknown_virtual(insn, info) {
                return Some(rejection);
            }
            if self.unresolved_method(insn) {
                return Some(Rejection::UnresolvedMethods);
            }
            if let Some(rejection) = self.unknown_field(insn) {
                return Some(rejection);
            }
            if !self.config.throws_inline && insn.opcode == Opcode::Throw {
                return Some(Rejection::Throws);
            }
            if self.check_version_sentinel(insn) {
                return Some(Rejection::VersionSentinel);
            }
            if insn.opcode.is_return() {
                returns += 1;
            }
        }
        if returns > 1 && !self.config.multiple_callee_returns {
            return Some(Rejection::MultiRet);
        }
        None
    }

    /// A private method called with `invoke-direct` stays callable from another class only
    /// if it becomes static and public.
    fn create_vmethod(
        &self,
        insn: &Instruction,
        caller: &MethodDef,
        callee: &MethodDef,
        make_static: &mut Vec<MethodId>,
    ) -> Option<Rejection> {
        if insn.opcode != Opcode::InvokeDirect {
            return None;
        }
        let Some(method) = insn
            .method()
            .and_then(|target| self.program.resolve_method(target, MethodSearch::Direct))
        else {
            return Some(Rejection::NeedVmethod);
        };
        if caller.class == callee.class {
            return None;
        }
        if method.is_constructor() {
            if !method.is_concrete() && !method.is_public() {
                return Some(Rejection::NonPubCtor);
            }
            return None;
        }
        if method.is_root || !method.is_concrete() {
            return Some(Rejection::NeedVmethod);
        }
        make_static.push(method.id);
        None
    }

    fn nonrelocatable_invoke_super(
        insn: &Instruction,
        caller: &MethodDef,
        callee: &MethodDef,
    ) -> bool {
        insn.opcode == Opcode::InvokeSuper && caller.class != callee.class
    }

    fn unknown_virtual(&self, insn: &Instruction, info: &mut InliningInfo) -> Option<Rejection> {
        if insn.opcode != Opcode::InvokeVirtual {
            return None;
        }
        let target = insn.method()?;
        match self.program.resolve_method(target, MethodSearch::Virtual) {
            None => {
                let internal = self
                    .program
                    .class(&target.class)
                    .is_some_and(|class| !class.is_external);
                if internal {
                    Some(Rejection::EscapedVirtual)
                } else {
                    info.known_public_methods += 1;
                    None
                }
            }
            Some(method) if !method.is_concrete() && !method.is_public() => {
                Some(Rejection::NonPubVirtual)
            }
            Some(_) => None,
        }
    }

    fn unresolved_method(&self, insn: &Instruction) -> bool {
        if !matches!(insn.opcode, Opcode::InvokeStatic | Opcode::InvokeInterface) {
            return false;
        }
        let Some(target) = insn.method() else {
            return false;
        };
        self.program
            .resolve_method(target, MethodSearch::for_opcode(insn.opcode))
            .is_none()
            && self
                .program
                .class(&target.class)
                .is_some_and(|class| !class.is_external)
    }

    fn unknown_field(&self, insn: &Instruction) -> Option<Rejection> {
        if !insn.opcode.is_field_op() {
            return None;
        }
        let field = insn.field()?;
        match self
            .program
            .resolve_field(field, FieldSearch::for_opcode(insn.opcode))
        {
            None => Some(Rejection::EscapedField),
            Some(def) if !def.is_concrete() && !def.is_public() => Some(Rejection::NonPubField),
            Some(_) => None,
        }
    }

    fn check_version_sentinel(&self, insn: &Instruction) -> bool {
        insn.opcode.is_sget()
            && insn
                .field()
                .is_some_and(|field| self.config.version_sentinel_fields.contains(field))
    }

    /// Returns `true` if the callee references a class the caller's compilation unit
    /// cannot see. Unit 0 is visible to every unit.
    #[must_use]
    pub fn cross_store_reference(&self, caller: &MethodDef, callee: &MethodBody) -> bool {
        let caller_unit = self.program.unit_of(&caller.class).unwrap_or(0);
        callee.cfg.instructions().any(|insn| {
            let class = insn
                .method()
                .or_else(|| insn.field())
                .map(|member| member.class.as_str())
                .or_else(|| insn.type_ref());
            class
                .and_then(|class| self.program.unit_of(class))
                .is_some_and(|unit| unit != 0 && unit != caller_unit)
        })
    }

    /// Returns `true` if inlining `callee` would push `caller` over the size limit.
    #[must_use]
    pub fn caller_too_large(
        &self,
        caller: &MethodDef,
        estimated_caller_size: usize,
        callee: MethodId,
    ) -> bool {
        if !self.config.enforce_method_size_limit
            || self.config.no_size_limit_callers.contains(&caller.class)
        {
            return false;
        }
        self.is_estimate_over_max(estimated_caller_size, callee, self.config.max_caller_size)
    }

    /// Returns `true` if the caller estimate plus the callee's inlined cost and the
    /// instruction buffer exceeds `max`.
    #[must_use]
    pub fn is_estimate_over_max(
        &self,
        estimated_caller_size: usize,
        callee: MethodId,
        max: usize,
    ) -> bool {
        let cost = self.get_inlined_cost(callee).unwrap_or(usize::MAX);
        estimated_caller_size
            .saturating_add(cost)
            .saturating_add(self.config.instruction_buffer)
            > max
    }

    /// Estimated code units one inlined copy of `callee` adds, memoized per callee.
    ///
    /// Returns `None` for methods without a body.
    pub fn get_inlined_cost(&self, callee: MethodId) -> Option<usize> {
        if let Some(cost) = self.inlined_costs.get(&callee) {
            return *cost;
        }
        let cost = self.program.with_body(callee, inlined_cost);
        *self.inlined_costs.entry(callee).or_insert(cost)
    }

    /// Decisions that need no size estimate.
    ///
    /// When profiling data marks hot methods, hot and force-inlined callees pass and the
    /// rest is left to [`MultiMethodInliner::too_many_callers`]. Otherwise a callee passes
    /// when it is force-inlined, or when it has a single call site and can be deleted once
    /// inlined.
    #[must_use]
    pub fn should_inline_fast(&self, callee: MethodId) -> bool {
        let Some(def) = self.program.method(callee) else {
            return false;
        };
        if def.force_inline {
            return true;
        }
        if self.for_speed() {
            return self.hot_methods.contains(&callee);
        }
        self.call_graph.call_site_count(callee) == 1 && self.can_delete(def)
    }

    /// Returns `true` if inlining `callee` at every call site grows the code more than
    /// keeping the calls.
    #[must_use]
    pub fn too_many_callers(&self, callee: MethodId) -> bool {
        let call_sites = self.call_graph.call_site_count(callee);
        if call_sites <= 1 {
            return false;
        }
        let Some(cost) = self.get_inlined_cost(callee) else {
            return true;
        };
        if cost <= INVOKE_COST {
            return false;
        }
        if call_sites > self.config.max_callee_call_sites {
            return true;
        }
        let inlined = call_sites * cost;
        let mut kept = call_sites * INVOKE_COST;
        if self
            .program
            .method(callee)
            .is_some_and(|def| self.can_delete(def))
        {
            kept += cost + METHOD_OVERHEAD;
        }
        inlined > kept
    }

    /// Profitability of inlining `callee` at its call sites, memoized per callee.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the statistics are poisoned.
    pub fn should_inline(&self, callee: MethodId) -> Result<bool> {
        if let Some(decision) = self.should_inline.get(&callee) {
            return Ok(*decision);
        }
        let rejected = !self.should_inline_fast(callee) && self.too_many_callers(callee);
        match self.should_inline.entry(callee) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => {
                entry.insert(!rejected);
                if rejected {
                    log::trace!("not inlining {}: too many callers", callee);
                    self.update_info(|info| info.too_many_callers += 1)?;
                }
                Ok(!rejected)
            }
        }
    }

    /// A callee can disappear after being inlined everywhere unless something outside
    /// the call graph may still call it.
    fn can_delete(&self, callee: &MethodDef) -> bool {
        !callee.is_root
            && !callee.is_class_initializer()
            && !self.true_virtual_callers.contains_key(&callee.id)
    }
}
