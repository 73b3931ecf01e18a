use crate::decl::MethodId;

/// Adjustment applied to `this` before entering the final overrider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ThisAdjustment {
    pub non_virtual: i64,
    /// Itanium: offset (relative to the address point) of the vcall offset to add
    pub vcall_offset_offset: i64,
}

impl ThisAdjustment {
    pub fn is_empty(&self) -> bool {
        self.non_virtual == 0 && self.vcall_offset_offset == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VirtualReturnAdjustment {
    #[default]
    None,
    Itanium {
        /// Offset (relative to the address point) of the vbase offset to add
        vbase_offset_offset: i64,
    },
    Microsoft {
        vbptr_offset: i64,
        vb_index: u32,
    },
}

/// Adjustment applied to a covariant return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ReturnAdjustment {
    pub non_virtual: i64,
    pub virtual_adjustment: VirtualReturnAdjustment,
}

impl ReturnAdjustment {
    pub fn is_empty(&self) -> bool {
        self.non_virtual == 0 && self.virtual_adjustment == VirtualReturnAdjustment::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ThunkInfo {
    pub this: ThisAdjustment,
    pub ret: ReturnAdjustment,
    /// The method that created the slot, when it differs from the slot's target.
    pub method: Option<MethodId>,
}

impl ThunkInfo {
    pub fn new(this: ThisAdjustment, ret: ReturnAdjustment, method: Option<MethodId>) -> Self {
        Self { this, ret, method }
    }

    pub fn is_empty(&self) -> bool {
        self.this.is_empty() && self.ret.is_empty() && self.method.is_none()
    }
}
