use tracing::warn;

use super::RecordLayouts;
use crate::decl::{BasePath, ClassGraph, ClassId, MethodId};

/// Distance from a derived class to one of its base subobjects: an optional
/// virtual base hop followed by a fixed non-virtual offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BaseOffset {
    pub derived: Option<ClassId>,
    /// The last virtual base crossed on the path, if any
    pub virtual_base: Option<ClassId>,
    /// Offset from `virtual_base` (or from `derived` when there is none)
    pub non_virtual: i64,
}

impl BaseOffset {
    pub fn is_empty(&self) -> bool {
        self.virtual_base.is_none() && self.non_virtual == 0
    }
}

impl RecordLayouts {
    /// Offset of the base reached by walking `path` from `derived`.
    ///
    /// Only the steps after the last virtual hop contribute to the
    /// non-virtual part; everything before it is captured by the hop itself.
    pub fn offset_along_path(&self, derived: ClassId, path: &BasePath) -> BaseOffset {
        let start = path.iter().rposition(|step| step.is_virtual);
        let virtual_base = start.map(|idx| path[idx].base);
        let first_non_virtual = start.map_or(0, |idx| idx + 1);
        let non_virtual = path[first_non_virtual..]
            .iter()
            .map(|step| self.get(step.class).base_offset(step.base))
            .sum();
        BaseOffset {
            derived: Some(derived),
            virtual_base,
            non_virtual,
        }
    }

    /// Offset of `base` inside `derived`, following the first inheritance path.
    ///
    /// `base` must be a proper base of `derived`.
    pub fn base_offset_of(&self, graph: &ClassGraph, derived: ClassId, base: ClassId) -> BaseOffset {
        let paths = graph.base_paths(derived, base);
        match paths.first() {
            Some(path) => self.offset_along_path(derived, path),
            None => panic!(
                "'{}' is not derived from '{}'",
                graph.class_name(derived),
                graph.class_name(base)
            ),
        }
    }

    /// Adjustment needed to turn the covariant return value of `derived_md`
    /// into the return type of the overridden `base_md`.
    pub fn return_adjustment_offset(&self, graph: &ClassGraph, derived_md: MethodId, base_md: MethodId) -> BaseOffset {
        let (Some(derived_ret), Some(base_ret)) = (graph.method(derived_md).returns, graph.method(base_md).returns) else {
            return BaseOffset::default();
        };
        if derived_ret == base_ret {
            return BaseOffset::default();
        }
        if !graph.is_derived_from(derived_ret, base_ret) {
            warn!(
                overrider = %graph.method_name(derived_md),
                overridden = %graph.method_name(base_md),
                "return type is not covariant; ignoring return adjustment"
            );
            return BaseOffset::default();
        }
        self.base_offset_of(graph, derived_ret, base_ret)
    }
}
