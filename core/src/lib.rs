pub mod config;
pub mod decl;
pub mod record;
pub mod util;
pub mod vtable;

// ABI-specific layout engines
pub mod itanium;
pub mod microsoft;

pub use config::{AbiKind, AbiOptions, LayoutConfig};
pub use decl::{ClassGraph, ClassGraphBuilder, ClassId, MethodId};
pub use itanium::ItaniumVTableContext;
pub use microsoft::MicrosoftVTableContext;
pub use vtable::{GlobalDecl, VTableComponent, VTableContext, VTableLayout};

/// Build the layout engine for `abi` behind the shared interface.
///
/// Callers that need convention-specific queries construct
/// [`ItaniumVTableContext`] or [`MicrosoftVTableContext`] directly.
pub fn vtable_context<'g>(graph: &'g ClassGraph, abi: AbiKind, options: AbiOptions) -> Box<dyn VTableContext + 'g> {
    match abi {
        AbiKind::Itanium => Box::new(ItaniumVTableContext::new(graph, options)),
        AbiKind::Microsoft => Box::new(MicrosoftVTableContext::new(graph, options)),
    }
}
