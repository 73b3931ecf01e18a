use super::{Placement, RecordLayout, RecordLayouts};
use crate::decl::{ClassGraph, ClassId};
use crate::util::fast_map::fast_hash_map_new;

pub(super) fn layout_class(graph: &ClassGraph, done: &RecordLayouts, id: ClassId) -> RecordLayout {
    let decl = graph.class(id);
    let ptr = done.pointer_bytes();

    let mut primary_base = None;
    let mut base_sharing_vbptr = None;
    let mut needs_vbptr = false;
    let mut has_polymorphic_base = false;
    for base in &decl.bases {
        has_polymorphic_base |= graph.class(base.class).is_polymorphic;
        if base.is_virtual {
            needs_vbptr = true;
            continue;
        }
        let layout = done.get(base.class);
        if base_sharing_vbptr.is_none() && layout.has_vbptr() {
            base_sharing_vbptr = Some(base.class);
            needs_vbptr = true;
        }
        if primary_base.is_none() && layout.has_extendable_vfptr() {
            primary_base = Some(base.class);
        }
    }

    // A fresh vfptr is needed when nothing can be extended and the class
    // would put something in a vftable.
    let has_own_vfptr = decl.is_polymorphic
        && (!has_polymorphic_base
            || (primary_base.is_none()
                && decl.methods.iter().any(|m| {
                    let method = graph.method(*m);
                    method.is_virtual && method.overridden.is_empty()
                })));

    let mut place = Placement::new();
    let mut base_offsets = fast_hash_map_new();
    if has_own_vfptr {
        place.place(ptr, ptr);
    }

    // Bases with a leading vfptr come first, then everything else.
    for leading in [true, false] {
        for base in decl.non_virtual_bases() {
            let layout = done.get(base);
            if layout.has_extendable_vfptr() != leading {
                continue;
            }
            base_offsets.insert(base, place.place(layout.nv_size, layout.nv_align));
        }
    }

    let vbptr_offset = match (needs_vbptr, base_sharing_vbptr) {
        (false, _) => None,
        (true, Some(shared)) => {
            let inherited = done.get(shared).vbptr_offset.unwrap_or_default();
            Some(base_offsets[&shared] + inherited)
        }
        (true, None) => Some(place.place(ptr, ptr)),
    };

    place.place_data(decl.data_size, decl.data_align);
    let nv_size = place.cursor;
    let nv_align = place.align;

    let mut vbase_offsets = fast_hash_map_new();
    for vbase in &decl.vbases {
        let layout = done.get(*vbase);
        vbase_offsets.insert(*vbase, place.place(layout.nv_size, layout.nv_align));
    }

    RecordLayout {
        size: place.finish_size(),
        align: place.align,
        nv_size,
        nv_align,
        primary_base,
        has_own_vfptr,
        vbptr_offset,
        base_sharing_vbptr,
        base_offsets,
        vbase_offsets,
    }
}
