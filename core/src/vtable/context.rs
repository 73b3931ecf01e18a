use crate::config::AbiKind;
use crate::decl::MethodId;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};

use super::component::GlobalDecl;
use super::thunk::ThunkInfo;

/// Behaviour shared by the Itanium and Microsoft layout engines.
///
/// Convention-specific queries live on the concrete context types.
pub trait VTableContext {
    fn abi(&self) -> AbiKind;

    /// Every distinct thunk needed to call `decl` through a base-class vtable.
    ///
    /// Computes the layout information of the declaring class on first use.
    /// `None` means the method needs no thunks.
    fn thunk_info(&mut self, decl: GlobalDecl) -> Option<&[ThunkInfo]>;
}

/// Per-method thunk lists collected while building vtables.
#[derive(Debug, Clone)]
pub struct ThunkRegistry {
    thunks: FastHashMap<MethodId, Vec<ThunkInfo>>,
}

impl Default for ThunkRegistry {
    fn default() -> Self {
        Self {
            thunks: fast_hash_map_new(),
        }
    }
}

impl ThunkRegistry {
    /// Record `thunk` for `method` unless an identical one is already known.
    pub fn add(&mut self, method: MethodId, thunk: ThunkInfo) {
        let list = self.thunks.entry(method).or_default();
        if !list.contains(&thunk) {
            list.push(thunk);
        }
    }

    pub fn get(&self, method: MethodId) -> Option<&[ThunkInfo]> {
        self.thunks.get(&method).map(|v| v.as_slice())
    }

    /// Fold in every thunk of `other` that is not known yet.
    pub fn merge(&mut self, other: ThunkRegistry) {
        for (method, list) in other.thunks {
            for thunk in list {
                self.add(method, thunk);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.thunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thunks.is_empty()
    }
}
