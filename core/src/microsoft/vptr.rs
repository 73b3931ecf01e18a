use std::collections::BTreeSet;

use tracing::{trace, warn};

use crate::decl::{ClassGraph, ClassId};
use crate::record::RecordLayouts;
use crate::util::fast_map::{FastHashMap, FastHashSet, fast_hash_map_new, fast_hash_set_new};
use crate::vtable::{BaseSubobject, FinalOverriders};

/// One vfptr or vbptr of a class, and how to reach it from the complete object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VPtrInfo {
    /// Subobject holding the pointer; a derived class extending this
    /// table replaces it with itself
    pub object_with_vptr: ClassId,
    /// Class that first introduced the pointer
    pub introducing_object: ClassId,
    /// Offset of the pointer from the start of its containing virtual base
    /// (or of the complete object when there is none)
    pub non_virtual_offset: i64,
    /// Bases used to disambiguate this table from others with the same introducing object
    pub mangled_path: Vec<ClassId>,
    /// Base to append to `mangled_path` if it turns out to be ambiguous
    pub next_base_to_mangle: Option<ClassId>,
    /// Virtual bases crossed on the way to the pointer, innermost first
    pub containing_vbases: Vec<ClassId>,
    /// Classes from the complete object down to the introducing object
    pub path_to_introducing_object: Vec<ClassId>,
    /// Offset of the pointer in the most derived class
    pub full_offset_in_mdc: i64,
}

impl VPtrInfo {
    pub fn new(class: ClassId) -> Self {
        Self {
            object_with_vptr: class,
            introducing_object: class,
            non_virtual_offset: 0,
            mangled_path: Vec::new(),
            next_base_to_mangle: None,
            containing_vbases: Vec::new(),
            path_to_introducing_object: Vec::new(),
            full_offset_in_mdc: 0,
        }
    }

    /// The virtual base whose layout contains this pointer, if any.
    pub fn vbase_with_vptr(&self) -> Option<ClassId> {
        self.containing_vbases.first().copied()
    }
}

/// vbtable indices and vbptr paths of one class.
#[derive(Debug, Clone, Default)]
pub struct VirtualBaseInfo {
    /// Index of each virtual base in the class's vbtable; slot 0 is the
    /// vbptr's own offset, so indices start at 1
    pub vbtable_indices: FastHashMap<ClassId, u32>,
    pub vbptr_paths: Vec<VPtrInfo>,
}

/// Enumerate the vfptrs (or vbptrs) of `class` from those of its bases.
pub(crate) fn compute_vtable_paths<F>(
    graph: &ClassGraph,
    records: &RecordLayouts,
    class: ClassId,
    for_vbtables: bool,
    mut base_paths: F,
) -> Vec<VPtrInfo>
where
    F: FnMut(ClassId) -> Vec<VPtrInfo>,
{
    let layout = records.get(class);
    let mut paths = Vec::new();

    let has_own = if for_vbtables {
        layout.has_own_vbptr()
    } else {
        layout.has_own_vfptr
    };
    if has_own {
        paths.push(VPtrInfo::new(class));
    }

    // Paths through a virtual base already reached on another route are dropped.
    let mut vbases_seen: FastHashSet<ClassId> = fast_hash_set_new();
    for spec in &graph.class(class).bases {
        let base = spec.class;
        if spec.is_virtual && vbases_seen.contains(&base) {
            continue;
        }
        if !graph.class(base).is_dynamic {
            continue;
        }

        let extended_base = if for_vbtables {
            layout.base_sharing_vbptr
        } else {
            layout.primary_base
        };
        for mut path in base_paths(base) {
            if path.containing_vbases.iter().any(|vb| vbases_seen.contains(vb)) {
                continue;
            }

            if path.mangled_path.last() != Some(&base) {
                path.next_base_to_mangle = Some(base);
            }

            // New methods or bases extend the primary table.
            if path.object_with_vptr == base && Some(base) == extended_base {
                path.object_with_vptr = class;
            }

            if spec.is_virtual {
                path.containing_vbases.push(base);
            } else if path.containing_vbases.is_empty() {
                path.non_virtual_offset += layout.base_offset(base);
            }

            path.full_offset_in_mdc = path.non_virtual_offset;
            if let Some(vbase) = path.vbase_with_vptr() {
                path.full_offset_in_mdc += layout.vbase_offset(vbase);
            }
            paths.push(path);
        }

        if spec.is_virtual {
            vbases_seen.insert(base);
        }
        // A direct base brings all of its virtual bases along.
        vbases_seen.extend(graph.class(base).vbases.iter().copied());
    }

    while rebucket_paths(graph, &mut paths) {}

    for path in &paths {
        trace!(
            class = %graph.class_name(class),
            introducing = %graph.class_name(path.introducing_object),
            offset = path.full_offset_in_mdc,
            vbtable = for_vbtables,
            "vptr path"
        );
    }
    paths
}

/// Extend every path whose mangled path collides with another one.
fn rebucket_paths(graph: &ClassGraph, paths: &mut [VPtrInfo]) -> bool {
    let mut buckets: FastHashMap<Vec<ClassId>, Vec<usize>> = fast_hash_map_new();
    for (idx, path) in paths.iter().enumerate() {
        buckets.entry(path.mangled_path.clone()).or_default().push(idx);
    }

    let mut changed = false;
    for members in buckets.values() {
        if members.len() < 2 {
            continue;
        }
        let mut extended = false;
        for idx in members {
            let path = &mut paths[*idx];
            if let Some(next) = path.next_base_to_mangle.take() {
                path.mangled_path.push(next);
                extended = true;
            }
        }
        if !extended {
            warn!(
                introducing = %graph.class_name(paths[members[0]].introducing_object),
                paths = members.len(),
                "ambiguous vptr paths cannot be disambiguated"
            );
        }
        changed |= extended;
    }
    changed
}

type FullPath = Vec<BaseSubobject>;

fn find_paths_to_subobject(
    graph: &ClassGraph,
    records: &RecordLayouts,
    most_derived: ClassId,
    class: ClassId,
    offset: i64,
    target: BaseSubobject,
    current: &mut FullPath,
    out: &mut Vec<FullPath>,
) {
    if BaseSubobject::new(class, offset) == target {
        out.push(current.clone());
        return;
    }
    let layout = records.get(class);
    for spec in &graph.class(class).bases {
        let new_offset = if spec.is_virtual {
            records.get(most_derived).vbase_offset(spec.class)
        } else {
            offset + layout.base_offset(spec.class)
        };
        current.push(BaseSubobject::new(spec.class, new_offset));
        find_paths_to_subobject(graph, records, most_derived, spec.class, new_offset, target, current, out);
        current.pop();
    }
}

/// Drop paths whose subobjects all appear in some other path.
fn remove_redundant_paths(paths: &mut Vec<FullPath>) {
    let mut idx = 0;
    while idx < paths.len() {
        let redundant = paths
            .iter()
            .enumerate()
            .any(|(other, path)| other != idx && paths[idx].iter().all(|bso| path.contains(bso)));
        if redundant {
            paths.remove(idx);
        } else {
            idx += 1;
        }
    }
}

/// Offset of the last subobject of `path`, measured from its first element.
fn offset_of_full_path(graph: &ClassGraph, records: &RecordLayouts, top: ClassId, path: &FullPath) -> i64 {
    let top_layout = records.get(top);
    let mut class = top;
    let mut offset = 0;
    for bso in path.iter().skip(1) {
        let is_virtual = graph
            .class(class)
            .bases
            .iter()
            .any(|b| b.class == bso.base && b.is_virtual);
        offset = if is_virtual {
            top_layout.vbase_offset(bso.base)
        } else {
            offset + records.get(class).base_offset(bso.base)
        };
        class = bso.base;
    }
    offset
}

/// Pick the path that introduces the most covariant overrides, or the first one.
fn select_best_path<'p>(
    graph: &ClassGraph,
    records: &RecordLayouts,
    class: ClassId,
    info: &VPtrInfo,
    paths: &'p [FullPath],
) -> Option<&'p FullPath> {
    match paths.len() {
        0 => return None,
        1 => return paths.first(),
        _ => {}
    }

    let mut best = None;
    let mut last_overrides = BTreeSet::new();
    for path in paths {
        let top = path[0].base;
        let base_offset = offset_of_full_path(graph, records, top, path);
        let overriders = FinalOverriders::new(graph, records, top, 0, top);

        let mut current = BTreeSet::new();
        for method in graph.virtual_methods(info.introducing_object) {
            let overrider = overriders.get(method, base_offset).method;
            if records.return_adjustment_offset(graph, overrider, method).is_empty() {
                continue;
            }
            // Overriders outside this path were not introduced by it.
            let parent = graph.method(overrider).parent;
            if !path.iter().any(|bso| bso.base == parent) {
                continue;
            }
            current.insert(overrider);
        }

        if current.difference(&last_overrides).next().is_none() {
            continue;
        }
        if last_overrides.difference(&current).next().is_none() {
            best = Some(path);
            last_overrides = current;
        } else {
            warn!(
                class = %graph.class_name(class),
                introducing = %graph.class_name(info.introducing_object),
                "vftable paths introduce conflicting covariant overrides"
            );
            return best;
        }
    }
    best.or(paths.first())
}

/// Fill `path_to_introducing_object` for every vfptr path of `class`.
pub(crate) fn compute_full_paths_for_vftables(
    graph: &ClassGraph,
    records: &RecordLayouts,
    class: ClassId,
    paths: &mut [VPtrInfo],
) {
    for info in paths.iter_mut() {
        let mut full_paths = Vec::new();
        let mut current = Vec::new();
        let target = BaseSubobject::new(info.introducing_object, info.full_offset_in_mdc);
        find_paths_to_subobject(graph, records, class, class, 0, target, &mut current, &mut full_paths);
        remove_redundant_paths(&mut full_paths);

        info.path_to_introducing_object = select_best_path(graph, records, class, info, &full_paths)
            .map(|best| best.iter().map(|bso| bso.base).collect())
            .unwrap_or_default();
    }
}

/// Memoized vbtable layouts (indices plus vbptr paths) per class.
#[derive(Debug)]
pub(crate) struct VBaseInfoCache {
    infos: FastHashMap<ClassId, VirtualBaseInfo>,
}

impl VBaseInfoCache {
    pub(crate) fn new() -> Self {
        Self {
            infos: fast_hash_map_new(),
        }
    }

    pub(crate) fn compute(&mut self, graph: &ClassGraph, records: &RecordLayouts, class: ClassId) -> &VirtualBaseInfo {
        if !self.infos.contains_key(&class) {
            let vbptr_paths = compute_vtable_paths(graph, records, class, true, |base| {
                self.compute(graph, records, base).vbptr_paths.clone()
            });

            // Indices inherited through the shared vbptr stay put.
            let mut vbtable_indices = match records.get(class).base_sharing_vbptr {
                Some(shared) => self.compute(graph, records, shared).vbtable_indices.clone(),
                None => fast_hash_map_new(),
            };
            let mut next = 1 + vbtable_indices.len() as u32;
            for vbase in &graph.class(class).vbases {
                if !vbtable_indices.contains_key(vbase) {
                    vbtable_indices.insert(*vbase, next);
                    next += 1;
                }
            }
            self.infos.insert(
                class,
                VirtualBaseInfo {
                    vbtable_indices,
                    vbptr_paths,
                },
            );
        }
        &self.infos[&class]
    }

    /// Index of `vbase` in the vbtable of `derived`.
    pub(crate) fn vbtable_index(
        &mut self,
        graph: &ClassGraph,
        records: &RecordLayouts,
        derived: ClassId,
        vbase: ClassId,
    ) -> u32 {
        match self.compute(graph, records, derived).vbtable_indices.get(&vbase) {
            Some(index) => *index,
            None => panic!(
                "'{}' is not a virtual base of '{}'",
                graph.class_name(vbase),
                graph.class_name(derived)
            ),
        }
    }
}

/// Memoized vfptr paths (with full paths to the introducing object) per class.
#[derive(Debug)]
pub(crate) struct VFPtrPathCache {
    paths: FastHashMap<ClassId, Vec<VPtrInfo>>,
}

impl VFPtrPathCache {
    pub(crate) fn new() -> Self {
        Self {
            paths: fast_hash_map_new(),
        }
    }

    pub(crate) fn compute(&mut self, graph: &ClassGraph, records: &RecordLayouts, class: ClassId) -> &[VPtrInfo] {
        if !self.paths.contains_key(&class) {
            let mut paths = compute_vtable_paths(graph, records, class, false, |base| {
                self.compute(graph, records, base).to_vec()
            });
            compute_full_paths_for_vftables(graph, records, class, &mut paths);
            self.paths.insert(class, paths);
        }
        &self.paths[&class]
    }
}
