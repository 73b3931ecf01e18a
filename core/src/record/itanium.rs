use super::{Placement, RecordLayout, RecordLayouts};
use crate::decl::{ClassGraph, ClassId};
use crate::util::fast_map::{FastHashMap, FastHashSet, fast_hash_map_new, fast_hash_set_new};

pub(super) fn layout_class(graph: &ClassGraph, done: &RecordLayouts, id: ClassId) -> RecordLayout {
    let decl = graph.class(id);
    let ptr = done.pointer_bytes();

    let primary_base = decl
        .bases
        .iter()
        .find(|b| !b.is_virtual && graph.class(b.class).is_dynamic)
        .map(|b| b.class);
    let has_own_vfptr = decl.is_dynamic && primary_base.is_none();

    let mut place = Placement::new();
    let mut base_offsets = fast_hash_map_new();

    if has_own_vfptr {
        place.place(ptr, ptr);
    }
    if let Some(primary) = primary_base {
        let layout = done.get(primary);
        base_offsets.insert(primary, place.place(layout.nv_size, layout.nv_align));
    }
    for base in decl.non_virtual_bases() {
        if Some(base) == primary_base {
            continue;
        }
        let layout = done.get(base);
        base_offsets.insert(base, place.place(layout.nv_size, layout.nv_align));
    }
    place.place_data(decl.data_size, decl.data_align);

    let nv_size = place.cursor;
    let nv_align = place.align;

    let mut vbase_offsets = fast_hash_map_new();
    let mut visited = fast_hash_set_new();
    place_virtual_bases(graph, done, id, &mut place, &mut visited, &mut vbase_offsets);

    RecordLayout {
        size: place.finish_size(),
        align: place.align,
        nv_size,
        nv_align,
        primary_base,
        has_own_vfptr,
        vbptr_offset: None,
        base_sharing_vbptr: None,
        base_offsets,
        vbase_offsets,
    }
}

/// Virtual bases go after all non-virtual data, in inheritance-graph preorder.
fn place_virtual_bases(
    graph: &ClassGraph,
    done: &RecordLayouts,
    class: ClassId,
    place: &mut Placement,
    visited: &mut FastHashSet<ClassId>,
    out: &mut FastHashMap<ClassId, i64>,
) {
    for base in &graph.class(class).bases {
        if base.is_virtual && visited.insert(base.class) {
            let layout = done.get(base.class);
            out.insert(base.class, place.place(layout.nv_size, layout.nv_align));
        }
        if graph.class(base.class).has_vbases() {
            place_virtual_bases(graph, done, base.class, place, visited, out);
        }
    }
}
