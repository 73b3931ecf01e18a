use std::fmt;

use crate::util::fast_map::FastHashMap;

/// Interned identifier of a class declaration inside a [`ClassGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub(crate) u32);

/// Interned identifier of a member function declaration inside a [`ClassGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub(crate) u32);

impl ClassId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl MethodId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One entry of a class's direct base list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BaseSpec {
    pub class: ClassId,
    pub is_virtual: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Method,
    Destructor,
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub id: ClassId,
    pub name: String,
    /// Direct bases in declaration order
    pub bases: Vec<BaseSpec>,
    /// Member functions in declaration order
    pub methods: Vec<MethodId>,
    /// Bytes occupied by data members (laid out after the bases)
    pub data_size: u64,
    pub data_align: u64,
    /// All virtual bases, direct or indirect. A base's own virtual bases precede it.
    pub vbases: Vec<ClassId>,
    /// Declares or inherits at least one virtual member function
    pub is_polymorphic: bool,
    /// Polymorphic or has virtual bases; such classes need a vtable
    pub is_dynamic: bool,
}

impl ClassDecl {
    pub fn has_vbases(&self) -> bool {
        !self.vbases.is_empty()
    }

    pub fn non_virtual_bases(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.bases.iter().filter(|b| !b.is_virtual).map(|b| b.class)
    }

    /// Whether `base` is listed as a direct virtual base.
    pub fn is_direct_vbase(&self, base: ClassId) -> bool {
        self.bases.iter().any(|b| b.is_virtual && b.class == base)
    }
}

#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub id: MethodId,
    pub parent: ClassId,
    pub name: String,
    /// Parameter type spellings; together with `name` they form the override signature
    pub params: Vec<String>,
    pub kind: MethodKind,
    pub is_virtual: bool,
    pub is_pure: bool,
    /// Class returned by pointer or reference, when the return type may be covariant
    pub returns: Option<ClassId>,
    /// Methods this one directly overrides
    pub overridden: Vec<MethodId>,
    /// Transitive closure of `overridden`
    pub(crate) overridden_closure: Vec<MethodId>,
}

impl MethodDecl {
    pub fn is_destructor(&self) -> bool {
        self.kind == MethodKind::Destructor
    }

    /// Methods with the same signature may share a vcall offset.
    pub fn same_signature(&self, other: &MethodDecl) -> bool {
        if self.is_destructor() || other.is_destructor() {
            return self.kind == other.kind;
        }
        self.name == other.name && self.params == other.params
    }
}

/// Finalized class/method declaration graph consumed by the layout algorithms.
///
/// Classes are stored in declaration order and a class may only name bases
/// declared before it, so iterating `classes()` visits bases before derived
/// classes.
#[derive(Debug, Clone, Default)]
pub struct ClassGraph {
    pub(crate) classes: Vec<ClassDecl>,
    pub(crate) methods: Vec<MethodDecl>,
    pub(crate) by_name: FastHashMap<String, ClassId>,
}

impl ClassGraph {
    pub fn class(&self, id: ClassId) -> &ClassDecl {
        &self.classes[id.index()]
    }

    pub fn method(&self, id: MethodId) -> &MethodDecl {
        &self.methods[id.index()]
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDecl> {
        self.classes.iter()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    /// Find a member function of `class` by name (first declaration wins).
    pub fn find_method(&self, class: ClassId, name: &str) -> Option<MethodId> {
        self.class(class)
            .methods
            .iter()
            .copied()
            .find(|m| self.method(*m).name == name)
    }

    pub fn destructor(&self, class: ClassId) -> Option<MethodId> {
        self.class(class)
            .methods
            .iter()
            .copied()
            .find(|m| self.method(*m).is_destructor())
    }

    /// Virtual member functions declared directly in `class`, in declaration order.
    pub fn virtual_methods(&self, class: ClassId) -> impl Iterator<Item = MethodId> + '_ {
        self.class(class)
            .methods
            .iter()
            .copied()
            .filter(|m| self.method(*m).is_virtual)
    }

    /// Whether `derived` (transitively) overrides `base`.
    pub fn overrides(&self, derived: MethodId, base: MethodId) -> bool {
        self.method(derived).overridden_closure.contains(&base)
    }

    /// All methods transitively overridden by `method`.
    pub fn overridden_closure(&self, method: MethodId) -> &[MethodId] {
        &self.method(method).overridden_closure
    }

    pub fn class_name(&self, id: ClassId) -> &str {
        &self.class(id).name
    }

    /// Qualified spelling used in logs and dumps, e.g. `B::f` or `B::~B`.
    pub fn method_name(&self, id: MethodId) -> String {
        let method = self.method(id);
        let class = self.class_name(method.parent);
        match method.kind {
            MethodKind::Destructor => format!("{class}::~{class}"),
            MethodKind::Method => format!("{class}::{}", method.name),
        }
    }

    pub fn display_method(&self, id: MethodId) -> impl fmt::Display + '_ {
        DisplayMethod { graph: self, id }
    }
}

struct DisplayMethod<'g> {
    graph: &'g ClassGraph,
    id: MethodId,
}

impl fmt::Display for DisplayMethod<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = self.graph.method(self.id);
        write!(f, "{}({})", self.graph.method_name(self.id), method.params.join(", "))?;
        if method.is_pure {
            write!(f, " [pure]")?;
        }
        Ok(())
    }
}
