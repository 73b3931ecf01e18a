use super::graph::{ClassGraph, ClassId};

/// One step of an inheritance path: `class` names `base` in its base list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathElement {
    pub class: ClassId,
    pub base: ClassId,
    pub is_virtual: bool,
}

/// Derived-to-base walk through direct base specifiers.
pub type BasePath = Vec<PathElement>;

impl ClassGraph {
    /// Whether `base` is a proper (direct or indirect) base of `derived`.
    pub fn is_derived_from(&self, derived: ClassId, base: ClassId) -> bool {
        self.class(derived)
            .bases
            .iter()
            .any(|b| b.class == base || self.is_derived_from(b.class, base))
    }

    /// Every inheritance path from `derived` down to `base`, in base-list order.
    pub fn base_paths(&self, derived: ClassId, base: ClassId) -> Vec<BasePath> {
        self.paths_to_first(derived, |class| class == base)
    }

    /// Paths from `derived` to the nearest bases accepted by `pred`.
    ///
    /// Each path ends at the first accepted class; the walk does not look
    /// through an accepted base for further matches.
    pub fn paths_to_first<F>(&self, derived: ClassId, pred: F) -> Vec<BasePath>
    where
        F: Fn(ClassId) -> bool,
    {
        let mut out = Vec::new();
        let mut current = Vec::new();
        self.collect_paths(derived, &pred, &mut current, &mut out);
        out
    }

    fn collect_paths<F>(&self, class: ClassId, pred: &F, current: &mut BasePath, out: &mut Vec<BasePath>)
    where
        F: Fn(ClassId) -> bool,
    {
        for spec in &self.class(class).bases {
            current.push(PathElement {
                class,
                base: spec.class,
                is_virtual: spec.is_virtual,
            });
            if pred(spec.class) {
                out.push(current.clone());
            } else {
                self.collect_paths(spec.class, pred, current, out);
            }
            current.pop();
        }
    }

    /// Whether `derived` reaches `base` through a path containing a virtual step.
    pub fn is_morally_virtual_base(&self, derived: ClassId, base: ClassId) -> bool {
        self.class(derived).vbases.contains(&base)
            || self
                .base_paths(derived, base)
                .iter()
                .any(|path| path.iter().any(|step| step.is_virtual))
    }
}
