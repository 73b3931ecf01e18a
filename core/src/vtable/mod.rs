//! Convention-independent vtable model: slots, grouped tables, thunks and
//! final overriders.

mod component;
mod context;
mod layout;
mod overriders;
mod thunk;

#[cfg(test)]
mod vtable_test;

pub use component::*;
pub use context::*;
pub use layout::*;
pub use overriders::*;
pub use thunk::*;

use crate::decl::{ClassGraph, ClassId, MethodId};

/// Method overridden by `method` in the nearest of `bases`.
///
/// `bases` is ordered from the most distant base to the closest one.
pub(crate) fn find_nearest_overridden_method(
    graph: &ClassGraph,
    method: MethodId,
    bases: &[ClassId],
) -> Option<MethodId> {
    let overridden = graph.overridden_closure(method);
    bases.iter().rev().find_map(|base| {
        overridden
            .iter()
            .copied()
            .find(|m| graph.method(*m).parent == *base)
    })
}
