use std::cmp::Ordering;

use crate::decl::ClassId;

/// Where a virtual method's slot lives: which vftable (identified by the
/// vbtable index of its virtual base and the vfptr offset within it) and the
/// slot index inside that table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodVFTableLocation {
    /// Zero when the vfptr is not inside a virtual base
    pub vbtable_index: u32,
    pub vbase: Option<ClassId>,
    /// Offset of the vfptr from the start of `vbase` (or the complete object)
    pub vfptr_offset: i64,
    /// Slot index, not counting the RTTI slot
    pub index: u64,
}

impl Ord for MethodVFTableLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.vbtable_index
            .cmp(&other.vbtable_index)
            .then(self.vfptr_offset.cmp(&other.vfptr_offset))
            .then(self.index.cmp(&other.index))
            .then(self.vbase.cmp(&other.vbase))
    }
}

impl PartialOrd for MethodVFTableLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
