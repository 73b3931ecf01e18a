//! Object layout of class declarations: base subobject offsets, sizes and the
//! placement of virtual table pointers.
//!
//! Both vtable algorithms consult these layouts but never mutate them. The
//! rules are a reference model of what a compiler's record layout pass
//! produces for classes made of bases plus an opaque block of data members.

mod itanium;
mod microsoft;
mod offsets;


pub use offsets::*;

use tracing::debug;

use crate::config::{AbiKind, AbiOptions};
use crate::decl::{ClassGraph, ClassId};
use crate::util::fast_map::FastHashMap;

/// Layout of a single class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub size: i64,
    pub align: i64,
    /// Size of the class without its virtual bases
    pub nv_size: i64,
    pub nv_align: i64,
    /// Non-virtual base sharing the class's vtable pointer at offset zero
    pub primary_base: Option<ClassId>,
    /// The class allocates its own vtable pointer (vfptr for Microsoft)
    pub has_own_vfptr: bool,
    /// Microsoft only: offset of the vbptr, own or inherited
    pub vbptr_offset: Option<i64>,
    /// Microsoft only: the non-virtual base whose vbptr is reused
    pub base_sharing_vbptr: Option<ClassId>,
    pub(crate) base_offsets: FastHashMap<ClassId, i64>,
    pub(crate) vbase_offsets: FastHashMap<ClassId, i64>,
}

impl RecordLayout {
    /// Offset of a direct non-virtual base.
    pub fn base_offset(&self, base: ClassId) -> i64 {
        match self.base_offsets.get(&base) {
            Some(offset) => *offset,
            None => panic!("class #{} is not a direct non-virtual base", base.index()),
        }
    }

    /// Offset of a (direct or indirect) virtual base within the complete object.
    pub fn vbase_offset(&self, vbase: ClassId) -> i64 {
        match self.vbase_offsets.get(&vbase) {
            Some(offset) => *offset,
            None => panic!("class #{} is not a virtual base", vbase.index()),
        }
    }

    pub fn has_vbptr(&self) -> bool {
        self.vbptr_offset.is_some()
    }

    pub fn has_own_vbptr(&self) -> bool {
        self.vbptr_offset.is_some() && self.base_sharing_vbptr.is_none()
    }

    /// A vfptr sits at offset zero and derived classes may append to its table.
    pub fn has_extendable_vfptr(&self) -> bool {
        self.has_own_vfptr || self.primary_base.is_some()
    }
}

/// Layouts of every class in a graph for one ABI.
#[derive(Debug, Clone)]
pub struct RecordLayouts {
    abi: AbiKind,
    options: AbiOptions,
    layouts: Vec<RecordLayout>,
}

impl RecordLayouts {
    /// Lay out every class; bases are always visited before derived classes.
    pub fn compute(graph: &ClassGraph, abi: AbiKind, options: AbiOptions) -> Self {
        let mut out = Self {
            abi,
            options,
            layouts: Vec::with_capacity(graph.class_count()),
        };
        for class in graph.classes() {
            let layout = match abi {
                AbiKind::Itanium => itanium::layout_class(graph, &out, class.id),
                AbiKind::Microsoft => microsoft::layout_class(graph, &out, class.id),
            };
            debug!(
                class = %class.name,
                %abi,
                size = layout.size,
                nv_size = layout.nv_size,
                "laid out record"
            );
            out.layouts.push(layout);
        }
        out
    }

    pub fn get(&self, class: ClassId) -> &RecordLayout {
        &self.layouts[class.index()]
    }

    pub fn abi(&self) -> AbiKind {
        self.abi
    }

    pub fn options(&self) -> &AbiOptions {
        &self.options
    }

    pub fn pointer_bytes(&self) -> i64 {
        self.options.pointer_bytes()
    }
}

/// Running cursor used while placing subobjects and data.
pub(crate) struct Placement {
    pub(crate) cursor: i64,
    pub(crate) align: i64,
}

impl Placement {
    pub(crate) fn new() -> Self {
        Self { cursor: 0, align: 1 }
    }

    /// Place a block of `size` bytes at the next `align`-aligned offset.
    pub(crate) fn place(&mut self, size: i64, align: i64) -> i64 {
        let offset = align_to(self.cursor, align);
        self.cursor = offset + size;
        self.align = self.align.max(align);
        offset
    }

    pub(crate) fn place_data(&mut self, size: u64, align: u64) {
        if size > 0 {
            self.place(size as i64, align as i64);
        } else {
            self.align = self.align.max(align as i64);
        }
    }

    /// Final object size: never zero, rounded to the overall alignment.
    pub(crate) fn finish_size(&self) -> i64 {
        align_to(self.cursor.max(1), self.align)
    }
}

#[inline]
pub(crate) fn align_to(value: i64, align: i64) -> i64 {
    debug_assert!(align > 0 && (align & (align - 1)) == 0, "alignment must be a power of two");
    (value + align - 1) & !(align - 1)
}
