use anyhow::{Result, anyhow, bail};

use super::graph::{BaseSpec, ClassDecl, ClassGraph, ClassId, MethodDecl, MethodId, MethodKind};
use crate::util::fast_map::{FastHashSet, fast_hash_set_new};

impl BaseSpec {
    pub fn direct(class: ClassId) -> Self {
        Self {
            class,
            is_virtual: false,
        }
    }

    pub fn virtual_base(class: ClassId) -> Self {
        Self {
            class,
            is_virtual: true,
        }
    }
}

/// Description of a member function handed to [`ClassGraphBuilder::add_method`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpec {
    pub name: String,
    pub params: Vec<String>,
    pub kind: MethodKind,
    pub is_virtual: bool,
    pub is_pure: bool,
    pub returns: Option<ClassId>,
    /// Explicit override targets; when empty, overrides are resolved by signature
    pub overrides: Vec<MethodId>,
}

impl MethodSpec {
    /// A non-virtual member function (it may still become virtual by overriding).
    pub fn method(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
            kind: MethodKind::Method,
            is_virtual: false,
            is_pure: false,
            returns: None,
            overrides: Vec::new(),
        }
    }

    pub fn virtual_method(name: &str) -> Self {
        Self {
            is_virtual: true,
            ..Self::method(name)
        }
    }

    pub fn destructor() -> Self {
        Self {
            kind: MethodKind::Destructor,
            ..Self::method("~")
        }
    }

    pub fn virtual_destructor() -> Self {
        Self {
            is_virtual: true,
            ..Self::destructor()
        }
    }

    pub fn pure(mut self) -> Self {
        self.is_virtual = true;
        self.is_pure = true;
        self
    }

    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn returns(mut self, class: ClassId) -> Self {
        self.returns = Some(class);
        self
    }

    pub fn overriding(mut self, method: MethodId) -> Self {
        self.overrides.push(method);
        self
    }
}

/// Incrementally assembles a [`ClassGraph`].
///
/// Bases have to be added before the classes deriving from them, which keeps
/// the graph acyclic without a separate check.
#[derive(Debug, Default)]
pub struct ClassGraphBuilder {
    graph: ClassGraph,
    explicit_overrides: Vec<bool>,
}

impl ClassGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&mut self, name: &str, bases: Vec<BaseSpec>) -> Result<ClassId> {
        if self.graph.by_name.contains_key(name) {
            bail!("class '{}' is declared twice", name);
        }
        let mut seen = fast_hash_set_new();
        for base in &bases {
            self.check_class(base.class)?;
            if !seen.insert(base.class) {
                bail!(
                    "class '{}' lists base '{}' more than once",
                    name,
                    self.graph.class_name(base.class)
                );
            }
        }
        let id = ClassId(self.graph.classes.len() as u32);
        self.graph.classes.push(ClassDecl {
            id,
            name: name.to_string(),
            bases,
            methods: Vec::new(),
            data_size: 0,
            data_align: 1,
            vbases: Vec::new(),
            is_polymorphic: false,
            is_dynamic: false,
        });
        self.graph.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Record the footprint of the class's data members.
    pub fn set_data(&mut self, class: ClassId, size: u64, align: u64) -> Result<()> {
        self.check_class(class)?;
        if align == 0 || !align.is_power_of_two() {
            bail!("alignment {} of '{}' is not a power of two", align, self.graph.class_name(class));
        }
        let decl = &mut self.graph.classes[class.index()];
        decl.data_size = size;
        decl.data_align = align;
        Ok(())
    }

    pub fn add_method(&mut self, class: ClassId, spec: MethodSpec) -> Result<MethodId> {
        self.check_class(class)?;
        if spec.kind == MethodKind::Destructor && self.graph.destructor(class).is_some() {
            bail!("class '{}' declares more than one destructor", self.graph.class_name(class));
        }
        if let Some(ret) = spec.returns {
            self.check_class(ret)?;
        }
        for target in &spec.overrides {
            let target_decl = self
                .graph
                .methods
                .get(target.index())
                .ok_or_else(|| anyhow!("unknown overridden method #{}", target.0))?;
            if !self.is_base_of(target_decl.parent, class) {
                bail!(
                    "'{}' cannot override '{}': '{}' is not a base of '{}'",
                    spec.name,
                    self.graph.method_name(*target),
                    self.graph.class_name(target_decl.parent),
                    self.graph.class_name(class)
                );
            }
        }
        let id = MethodId(self.graph.methods.len() as u32);
        self.explicit_overrides.push(!spec.overrides.is_empty());
        self.graph.methods.push(MethodDecl {
            id,
            parent: class,
            name: spec.name,
            params: spec.params,
            kind: spec.kind,
            is_virtual: spec.is_virtual || !spec.overrides.is_empty(),
            is_pure: spec.is_pure,
            returns: spec.returns,
            overridden: spec.overrides,
            overridden_closure: Vec::new(),
        });
        self.graph.classes[class.index()].methods.push(id);
        Ok(id)
    }

    /// Resolve overrides and derived class facts, producing the finished graph.
    pub fn finish(mut self) -> Result<ClassGraph> {
        for idx in 0..self.graph.classes.len() {
            let class = ClassId(idx as u32);
            self.resolve_overrides(class);
            self.compute_class_facts(class);
        }
        for method in &self.graph.methods {
            if method.is_pure && !method.is_virtual {
                bail!("pure method '{}' must be virtual", self.graph.method_name(method.id));
            }
        }
        Ok(self.graph)
    }

    /// The graph assembled so far; override facts are filled in by `finish`.
    pub fn graph(&self) -> &ClassGraph {
        &self.graph
    }

    fn check_class(&self, class: ClassId) -> Result<()> {
        if class.index() >= self.graph.classes.len() {
            bail!("unknown class #{}", class.0);
        }
        Ok(())
    }

    fn is_base_of(&self, base: ClassId, derived: ClassId) -> bool {
        self.graph
            .class(derived)
            .bases
            .iter()
            .any(|b| b.class == base || self.is_base_of(base, b.class))
    }

    fn resolve_overrides(&mut self, class: ClassId) {
        let methods = self.graph.class(class).methods.clone();
        for method in methods {
            if !self.explicit_overrides[method.index()] {
                let mut found = Vec::new();
                for base in self.graph.class(class).bases.clone() {
                    self.nearest_virtual_matching(base.class, method, &mut found);
                }
                if !found.is_empty() {
                    let decl = &mut self.graph.methods[method.index()];
                    decl.is_virtual = true;
                    decl.overridden = found;
                }
            }

            let mut closure: Vec<MethodId> = Vec::new();
            let mut seen: FastHashSet<MethodId> = fast_hash_set_new();
            for direct in self.graph.method(method).overridden.clone() {
                if seen.insert(direct) {
                    closure.push(direct);
                }
                for indirect in self.graph.method(direct).overridden_closure.iter() {
                    if seen.insert(*indirect) {
                        closure.push(*indirect);
                    }
                }
            }
            self.graph.methods[method.index()].overridden_closure = closure;
        }
    }

    /// Nearest virtual member of `class` or its bases with the same signature
    /// as `method`; searching stops at the first match on each path.
    fn nearest_virtual_matching(&self, class: ClassId, method: MethodId, out: &mut Vec<MethodId>) {
        let needle = self.graph.method(method);
        let hit = self.graph.class(class).methods.iter().copied().find(|candidate| {
            let candidate = self.graph.method(*candidate);
            candidate.is_virtual && candidate.same_signature(needle)
        });
        match hit {
            Some(hit) => {
                if !out.contains(&hit) {
                    out.push(hit);
                }
            }
            None => {
                for base in &self.graph.class(class).bases {
                    self.nearest_virtual_matching(base.class, method, out);
                }
            }
        }
    }

    fn compute_class_facts(&mut self, class: ClassId) {
        let decl = self.graph.class(class);
        let mut vbases = Vec::new();
        let mut seen = fast_hash_set_new();
        let mut polymorphic = decl.methods.iter().any(|m| self.graph.method(*m).is_virtual);
        for base in &decl.bases {
            let base_decl = self.graph.class(base.class);
            polymorphic |= base_decl.is_polymorphic;
            for vb in &base_decl.vbases {
                if seen.insert(*vb) {
                    vbases.push(*vb);
                }
            }
            if base.is_virtual && seen.insert(base.class) {
                vbases.push(base.class);
            }
        }
        let decl = &mut self.graph.classes[class.index()];
        decl.is_dynamic = polymorphic || !vbases.is_empty();
        decl.is_polymorphic = polymorphic;
        decl.vbases = vbases;
    }
}
