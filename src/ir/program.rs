//! Program model: classes, methods, fields, and symbol resolution.
//!
//! A [`Program`] is the scope an optimization run works on. Definitions are immutable after
//! construction except for method access flags, which are atomic so that finalization steps
//! can widen visibility through a shared reference. Method bodies live in a concurrent map
//! and are checked out by the job that transforms them.

use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

use bitflags::bitflags;
use dashmap::DashMap;

use crate::ir::{MemberRef, MethodBody, Opcode};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Access flags of classes, methods and fields
    pub struct AccessFlags: u32 {
        /// Visible everywhere
        const PUBLIC = 0x0001;
        /// Visible only within the defining class
        const PRIVATE = 0x0002;
        /// Visible to the package and subclasses
        const PROTECTED = 0x0004;
        /// No receiver
        const STATIC = 0x0008;
        /// Not overridable / not reassignable
        const FINAL = 0x0010;
        /// Class is an interface
        const INTERFACE = 0x0200;
        /// No implementation
        const ABSTRACT = 0x0400;
        /// Class is an enum
        const ENUM = 0x4000;
        /// Method is a constructor
        const CONSTRUCTOR = 0x1_0000;
    }
}

/// Index of a method definition within a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// Index of a field definition within a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

/// A class definition.
#[derive(Debug, Clone)]
pub struct ClassDef {
    /// Class descriptor
    pub name: String,
    /// Super class descriptor
    pub super_class: Option<String>,
    /// Access flags
    pub access: AccessFlags,
    /// Defined outside the program (library or platform class)
    pub is_external: bool,
    /// Compilation unit (store) holding this class; unit 0 is visible to every unit
    pub unit: usize,
}

impl ClassDef {
    /// Creates a public, internal class in unit 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_class: None,
            access: AccessFlags::PUBLIC,
            is_external: false,
            unit: 0,
        }
    }

    /// Sets the super class.
    #[must_use]
    pub fn extends(mut self, super_class: impl Into<String>) -> Self {
        self.super_class = Some(super_class.into());
        self
    }

    /// Sets the access flags.
    #[must_use]
    pub fn with_access(mut self, access: AccessFlags) -> Self {
        self.access = access;
        self
    }

    /// Marks the class as defined outside the program.
    #[must_use]
    pub fn external(mut self) -> Self {
        self.is_external = true;
        self
    }

    /// Places the class into a compilation unit.
    #[must_use]
    pub fn in_unit(mut self, unit: usize) -> Self {
        self.unit = unit;
        self
    }

    /// Returns `true` for public classes.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.access.contains(AccessFlags::PUBLIC)
    }

    /// Returns `true` for enum classes.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.access.contains(AccessFlags::ENUM)
    }
}

/// A method definition.
#[derive(Debug)]
pub struct MethodDef {
    /// Index within the owning program
    pub id: MethodId,
    /// Owning class descriptor
    pub class: String,
    /// Method name
    pub name: String,
    access: AtomicU32,
    /// Kept as an entry point; may be called from outside the program
    pub is_root: bool,
    /// Declared but not defined in the program
    pub is_external: bool,
    /// Always inline regardless of size
    pub force_inline: bool,
    /// Never inline
    pub dont_inline: bool,
}

impl MethodDef {
    /// Creates a non-root, internal method.
    pub fn new(class: impl Into<String>, name: impl Into<String>, access: AccessFlags) -> Self {
        Self {
            id: MethodId(0),
            class: class.into(),
            name: name.into(),
            access: AtomicU32::new(access.bits()),
            is_root: false,
            is_external: false,
            force_inline: false,
            dont_inline: false,
        }
    }

    /// Marks the method as an entry point.
    #[must_use]
    pub fn root(mut self) -> Self {
        self.is_root = true;
        self
    }

    /// Marks the method as declared outside the program.
    #[must_use]
    pub fn external(mut self) -> Self {
        self.is_external = true;
        self
    }

    /// Forces inlining of this method.
    #[must_use]
    pub fn force_inline(mut self) -> Self {
        self.force_inline = true;
        self
    }

    /// Forbids inlining of this method.
    #[must_use]
    pub fn dont_inline(mut self) -> Self {
        self.dont_inline = true;
        self
    }

    /// Returns the current access flags.
    #[must_use]
    pub fn access(&self) -> AccessFlags {
        AccessFlags::from_bits_truncate(self.access.load(Ordering::Acquire))
    }

    /// Adds and removes access flags atomically.
    pub fn update_access(&self, add: AccessFlags, remove: AccessFlags) {
        let mut current = self.access.load(Ordering::Acquire);
        loop {
            let next = (current | add.bits()) & !remove.bits();
            match self.access.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access().contains(AccessFlags::STATIC)
    }

    /// Returns `true` for public methods.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.access().contains(AccessFlags::PUBLIC)
    }

    /// Returns `true` for constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>" || self.access().contains(AccessFlags::CONSTRUCTOR)
    }

    /// Returns `true` for static initializers.
    #[must_use]
    pub fn is_class_initializer(&self) -> bool {
        self.name == "<clinit>"
    }

    /// Returns `true` if the method is defined inside the program.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        !self.is_external
    }

    /// Returns a symbolic reference to this method.
    #[must_use]
    pub fn reference(&self) -> MemberRef {
        MemberRef::new(self.class.clone(), self.name.clone())
    }
}

impl fmt::Display for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.name)
    }
}

/// A field definition.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Index within the owning program
    pub id: FieldId,
    /// Owning class descriptor
    pub class: String,
    /// Field name
    pub name: String,
    /// Access flags
    pub access: AccessFlags,
    /// Declared but not defined in the program
    pub is_external: bool,
}

impl FieldDef {
    /// Creates an internal field.
    pub fn new(class: impl Into<String>, name: impl Into<String>, access: AccessFlags) -> Self {
        Self {
            id: FieldId(0),
            class: class.into(),
            name: name.into(),
            access,
            is_external: false,
        }
    }

    /// Marks the field as declared outside the program.
    #[must_use]
    pub fn external(mut self) -> Self {
        self.is_external = true;
        self
    }

    /// Returns `true` for static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }

    /// Returns `true` for public fields.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.access.contains(AccessFlags::PUBLIC)
    }

    /// Returns `true` if the field is defined inside the program.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        !self.is_external
    }
}

/// How a method reference is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodSearch {
    /// Private methods and constructors of exactly the referenced class
    Direct,
    /// Static methods, searching super classes
    Static,
    /// Instance methods, searching super classes
    Virtual,
    /// Instance methods starting at the referenced class, searching super classes
    Super,
    /// Interface methods
    Interface,
    /// Any method, searching super classes
    Any,
}

impl MethodSearch {
    /// Returns the search matching an invoke opcode.
    #[must_use]
    pub fn for_opcode(opcode: Opcode) -> Self {
        match opcode {
            Opcode::InvokeDirect => Self::Direct,
            Opcode::InvokeStatic => Self::Static,
            Opcode::InvokeVirtual => Self::Virtual,
            Opcode::InvokeSuper => Self::Super,
            Opcode::InvokeInterface => Self::Interface,
            _ => Self::Any,
        }
    }
}

/// How a field reference is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldSearch {
    /// Static fields
    Static,
    /// Instance fields
    Instance,
    /// Either kind
    Any,
}

impl FieldSearch {
    /// Returns the search matching a field opcode.
    #[must_use]
    pub fn for_opcode(opcode: Opcode) -> Self {
        if opcode.is_static_field_op() {
            Self::Static
        } else if opcode.is_field_op() {
            Self::Instance
        } else {
            Self::Any
        }
    }
}

/// Symbol resolution from references to definitions.
pub trait Resolver: Send + Sync {
    /// Resolves a method reference, or returns `None` if no definition matches.
    fn resolve_method(&self, method: &MemberRef, search: MethodSearch) -> Option<&MethodDef>;

    /// Resolves a field reference, or returns `None` if no definition matches.
    fn resolve_field(&self, field: &MemberRef, search: FieldSearch) -> Option<&FieldDef>;
}

/// The set of classes, methods and fields being optimized.
#[derive(Debug, Default)]
pub struct Program {
    classes: Vec<ClassDef>,
    class_index: HashMap<String, usize>,
    methods: Vec<MethodDef>,
    method_index: HashMap<(String, String), MethodId>,
    fields: Vec<FieldDef>,
    field_index: HashMap<(String, String), FieldId>,
    bodies: DashMap<MethodId, MethodBody>,
}

impl Program {
    /// Creates an empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class definition, replacing an earlier one of the same name.
    pub fn add_class(&mut self, class: ClassDef) {
        if let Some(&index) = self.class_index.get(&class.name) {
            self.classes[index] = class;
        } else {
            self.class_index.insert(class.name.clone(), self.classes.len());
            self.classes.push(class);
        }
    }

    /// Adds a method definition without code.
    pub fn add_method(&mut self, mut method: MethodDef) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        method.id = id;
        self.method_index
            .insert((method.class.clone(), method.name.clone()), id);
        self.methods.push(method);
        id
    }

    /// Adds a method definition together with its body.
    pub fn add_method_with_body(&mut self, method: MethodDef, body: MethodBody) -> MethodId {
        let id = self.add_method(method);
        self.bodies.insert(id, body);
        id
    }

    /// Adds a field definition.
    pub fn add_field(&mut self, mut field: FieldDef) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        field.id = id;
        self.field_index
            .insert((field.class.clone(), field.name.clone()), id);
        self.fields.push(field);
        id
    }

    /// Looks up a class by descriptor.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.class_index.get(name).map(|&index| &self.classes[index])
    }

    /// Iterates all classes.
    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.iter()
    }

    /// Looks up a method definition.
    #[must_use]
    pub fn method(&self, id: MethodId) -> Option<&MethodDef> {
        self.methods.get(id.0 as usize)
    }

    /// Iterates all method definitions in definition order.
    pub fn methods(&self) -> impl Iterator<Item = &MethodDef> {
        self.methods.iter()
    }

    /// Finds a method declared exactly in `class`.
    #[must_use]
    pub fn find_method(&self, class: &str, name: &str) -> Option<MethodId> {
        self.method_index
            .get(&(class.to_string(), name.to_string()))
            .copied()
    }

    /// Looks up a field definition.
    #[must_use]
    pub fn field(&self, id: FieldId) -> Option<&FieldDef> {
        self.fields.get(id.0 as usize)
    }

    /// Finds a field declared exactly in `class`.
    #[must_use]
    pub fn find_field(&self, class: &str, name: &str) -> Option<FieldId> {
        self.field_index
            .get(&(class.to_string(), name.to_string()))
            .copied()
    }

    /// Returns the compilation unit of a class; unknown classes are reported as `None`.
    #[must_use]
    pub fn unit_of(&self, class: &str) -> Option<usize> {
        self.class(class).map(|c| c.unit)
    }

    /// Returns `true` if the method has a body.
    #[must_use]
    pub fn has_body(&self, id: MethodId) -> bool {
        self.bodies.contains_key(&id)
    }

    /// Runs `f` on a method body.
    pub fn with_body<R>(&self, id: MethodId, f: impl FnOnce(&MethodBody) -> R) -> Option<R> {
        self.bodies.get(&id).map(|body| f(&body))
    }

    /// Runs `f` on a method body mutably.
    pub fn with_body_mut<R>(
        &self,
        id: MethodId,
        f: impl FnOnce(&mut MethodBody) -> R,
    ) -> Option<R> {
        self.bodies.get_mut(&id).map(|mut body| f(&mut body))
    }

    /// Checks a body out of the program. The caller is expected to put it back with
    /// [`Program::set_body`].
    pub fn take_body(&self, id: MethodId) -> Option<MethodBody> {
        self.bodies.remove(&id).map(|(_, body)| body)
    }

    /// Stores a body for a method.
    pub fn set_body(&self, id: MethodId, body: MethodBody) {
        self.bodies.insert(id, body);
    }

    /// Returns a copy of a method body.
    #[must_use]
    pub fn clone_body(&self, id: MethodId) -> Option<MethodBody> {
        self.with_body(id, Clone::clone)
    }

    /// Walks `class` and its super classes, returning the first hit of `lookup`.
    fn walk_hierarchy<T>(
        &self,
        class: &str,
        mut lookup: impl FnMut(&str) -> Option<T>,
    ) -> Option<T> {
        let mut current = Some(class.to_string());
        let mut depth = 0;
        while let Some(name) = current {
            if let Some(hit) = lookup(&name) {
                return Some(hit);
            }
            depth += 1;
            if depth > self.classes.len() {
                return None;
            }
            current = self.class(&name).and_then(|c| c.super_class.clone());
        }
        None
    }
}

impl Resolver for Program {
    fn resolve_method(&self, method: &MemberRef, search: MethodSearch) -> Option<&MethodDef> {
        let accepts = |def: &MethodDef| match search {
            MethodSearch::Static => def.is_static(),
            MethodSearch::Direct | MethodSearch::Virtual | MethodSearch::Super
            | MethodSearch::Interface => !def.is_static(),
            MethodSearch::Any => true,
        };
        let lookup = |class: &str| {
            self.find_method(class, &method.name)
                .and_then(|id| self.method(id))
                .filter(|def| accepts(*def))
        };
        if search == MethodSearch::Direct {
            return lookup(&method.class);
        }
        self.walk_hierarchy(&method.class, lookup)
    }

    fn resolve_field(&self, field: &MemberRef, search: FieldSearch) -> Option<&FieldDef> {
        self.walk_hierarchy(&field.class, |class| {
            self.find_field(class, &field.name)
                .and_then(|id| self.field(id))
                .filter(|def| match search {
                    FieldSearch::Static => def.is_static(),
                    FieldSearch::Instance => !def.is_static(),
                    FieldSearch::Any => true,
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> Program {
        let mut program = Program::new();
        program.add_class(ClassDef::new("LBase;"));
        program.add_class(ClassDef::new("LDerived;").extends("LBase;"));
        program.add_method(MethodDef::new("LBase;", "run", AccessFlags::PUBLIC));
        program.add_method(MethodDef::new(
            "LBase;",
            "helper",
            AccessFlags::PUBLIC | AccessFlags::STATIC,
        ));
        program.add_field(FieldDef::new(
            "LBase;",
            "count",
            AccessFlags::PUBLIC | AccessFlags::STATIC,
        ));
        program
    }

    #[test]
    fn test_virtual_resolution_walks_super_classes() {
        let program = hierarchy();
        let run = MemberRef::new("LDerived;", "run");
        let def = program.resolve_method(&run, MethodSearch::Virtual).unwrap();
        assert_eq!(def.class, "LBase;");
        assert!(program.resolve_method(&run, MethodSearch::Direct).is_none());
        assert!(program.resolve_method(&run, MethodSearch::Static).is_none());
    }

    #[test]
    fn test_static_and_field_resolution() {
        let program = hierarchy();
        let helper = MemberRef::new("LDerived;", "helper");
        assert!(program.resolve_method(&helper, MethodSearch::Static).is_some());
        let count = MemberRef::new("LDerived;", "count");
        assert!(program.resolve_field(&count, FieldSearch::Static).is_some());
        assert!(program.resolve_field(&count, FieldSearch::Instance).is_none());
    }

    #[test]
    fn test_update_access() {
        let method = MethodDef::new("LFoo;", "bar", AccessFlags::PRIVATE);
        method.update_access(
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            AccessFlags::PRIVATE,
        );
        assert!(method.is_public());
        assert!(method.is_static());
        assert!(!method.access().contains(AccessFlags::PRIVATE));
    }

    #[test]
    fn test_body_checkout() {
        let mut program = Program::new();
        let id = program.add_method_with_body(
            MethodDef::new("LFoo;", "bar", AccessFlags::PUBLIC),
            MethodBody::new(1, vec![], true),
        );
        let body = program.take_body(id).unwrap();
        assert!(!program.has_body(id));
        program.set_body(id, body);
        assert_eq!(program.with_body(id, |b| b.registers_size), Some(1));
    }
}
