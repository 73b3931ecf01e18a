//! Microsoft C++ ABI vtable layout: one vftable per vfptr, vbtables for
//! virtual base displacements, and method locations addressed by
//! (vbtable index, vfptr offset, slot index).

mod builder;
mod location;
mod vptr;

#[cfg(test)]
mod microsoft_test;

pub use location::MethodVFTableLocation;
pub use vptr::{VPtrInfo, VirtualBaseInfo};

use std::collections::hash_map::Entry;

use tracing::debug;

use crate::config::{AbiKind, AbiOptions};
use crate::decl::{ClassGraph, ClassId};
use crate::record::RecordLayouts;
use crate::util::fast_map::{FastHashMap, FastHashSet, fast_hash_map_new, fast_hash_set_new};
use crate::vtable::{DtorKind, GlobalDecl, ThunkInfo, ThunkRegistry, VTableContext, VTableLayout};

use builder::VFTableBuilder;
use vptr::{VBaseInfoCache, VFPtrPathCache};

/// Lazily computed Microsoft vftable and vbtable information for the classes
/// of one graph.
pub struct MicrosoftVTableContext<'g> {
    graph: &'g ClassGraph,
    records: RecordLayouts,
    vfptr_paths: VFPtrPathCache,
    vbase_infos: VBaseInfoCache,
    /// Classes whose vftables have been built
    computed: FastHashSet<ClassId>,
    vftable_layouts: FastHashMap<(ClassId, i64), VTableLayout>,
    method_locations: FastHashMap<GlobalDecl, MethodVFTableLocation>,
    thunks: ThunkRegistry,
    computations: usize,
}

impl<'g> MicrosoftVTableContext<'g> {
    pub fn new(graph: &'g ClassGraph, options: AbiOptions) -> Self {
        let records = RecordLayouts::compute(graph, AbiKind::Microsoft, options);
        Self {
            graph,
            records,
            vfptr_paths: VFPtrPathCache::new(),
            vbase_infos: VBaseInfoCache::new(),
            computed: fast_hash_set_new(),
            vftable_layouts: fast_hash_map_new(),
            method_locations: fast_hash_map_new(),
            thunks: ThunkRegistry::default(),
            computations: 0,
        }
    }

    pub fn graph(&self) -> &'g ClassGraph {
        self.graph
    }

    pub fn records(&self) -> &RecordLayouts {
        &self.records
    }

    /// How many classes have had their vftables built so far.
    pub fn computation_count(&self) -> usize {
        self.computations
    }

    /// Every vfptr of `class`, one per vftable.
    pub fn vfptr_offsets(&mut self, class: ClassId) -> &[VPtrInfo] {
        self.compute_vtable_related_information(class);
        self.vfptr_paths.compute(self.graph, &self.records, class)
    }

    /// The vftable reached through the vfptr at `vfptr_offset` in `class`.
    pub fn vftable_layout(&mut self, class: ClassId, vfptr_offset: i64) -> &VTableLayout {
        self.compute_vtable_related_information(class);
        match self.vftable_layouts.get(&(class, vfptr_offset)) {
            Some(layout) => layout,
            None => panic!(
                "Couldn't find a VFTable at offset {} in '{}'",
                vfptr_offset,
                self.graph.class_name(class)
            ),
        }
    }

    /// Location of a virtual method's slot. Destructors are only addressable
    /// through their deleting variant.
    pub fn method_vftable_location(&mut self, decl: GlobalDecl) -> MethodVFTableLocation {
        let graph = self.graph;
        let method = graph.method(decl.method);
        assert!(method.is_virtual, "Only use this method for virtual methods or dtors");
        if method.is_destructor() {
            assert_eq!(
                decl.dtor,
                Some(DtorKind::Deleting),
                "only the deleting destructor has a vftable slot"
            );
        }
        if let Some(location) = self.method_locations.get(&decl) {
            return *location;
        }
        self.compute_vtable_related_information(method.parent);
        match self.method_locations.get(&decl) {
            Some(location) => *location,
            None => panic!("Did not find a vftable slot for {}", graph.method_name(decl.method)),
        }
    }

    /// Index of `vbase` in the vbtable of `derived`; indices start at 1.
    pub fn vbtable_index(&mut self, derived: ClassId, vbase: ClassId) -> u32 {
        self.vbase_infos.vbtable_index(self.graph, &self.records, derived, vbase)
    }

    /// Every vbptr of `class`, one per vbtable.
    pub fn enumerate_vbtables(&mut self, class: ClassId) -> &[VPtrInfo] {
        &self.vbase_infos.compute(self.graph, &self.records, class).vbptr_paths
    }

    /// Contents of the vbtable described by `vbtable` within `class`: the
    /// negated vbptr offset, then each virtual base's displacement from the
    /// vbptr, in vbtable index order.
    pub fn vbtable_offsets(&mut self, class: ClassId, vbtable: &VPtrInfo) -> Vec<i64> {
        let graph = self.graph;
        let records = &self.records;
        let object = vbtable.object_with_vptr;
        let vbptr_offset = records.get(vbtable.introducing_object).vbptr_offset.unwrap_or_default();
        let derived_layout = records.get(class);

        let mut complete_vbptr_offset = vbtable.non_virtual_offset + vbptr_offset;
        if let Some(vbase) = vbtable.vbase_with_vptr() {
            complete_vbptr_offset += derived_layout.vbase_offset(vbase);
        }

        let vbases = &graph.class(object).vbases;
        let mut offsets = vec![None; 1 + vbases.len()];
        offsets[0] = Some(-vbptr_offset);
        for vbase in vbases {
            let offset = derived_layout.vbase_offset(*vbase) - complete_vbptr_offset;
            let index = self.vbase_infos.vbtable_index(graph, records, object, *vbase) as usize;
            assert!(offsets[index].is_none(), "The same vbindex seen twice?");
            offsets[index] = Some(offset);
        }
        offsets.into_iter().map(Option::unwrap_or_default).collect()
    }

    fn compute_vtable_related_information(&mut self, class: ClassId) {
        if self.computed.contains(&class) {
            return;
        }
        let graph = self.graph;
        let paths = self.vfptr_paths.compute(graph, &self.records, class).to_vec();

        let mut new_locations: FastHashMap<GlobalDecl, MethodVFTableLocation> = fast_hash_map_new();
        for vfptr in &paths {
            let built = VFTableBuilder::new(graph, &self.records, &mut self.vbase_infos, class, vfptr).build();
            debug!(
                class = %graph.class_name(class),
                vfptr_offset = vfptr.full_offset_in_mdc,
                slots = built.layout.components().len(),
                thunks = built.layout.thunks().len(),
                "built vftable"
            );

            let previous = self
                .vftable_layouts
                .insert((class, vfptr.full_offset_in_mdc), built.layout);
            assert!(previous.is_none(), "two vfptrs at the same offset");
            self.thunks.merge(built.thunks);

            // A method reachable through several vftables uses the one that sorts first.
            for (decl, location) in built.locations {
                match new_locations.entry(decl) {
                    Entry::Vacant(slot) => {
                        slot.insert(location);
                    }
                    Entry::Occupied(mut slot) => {
                        if location < *slot.get() {
                            slot.insert(location);
                        }
                    }
                }
            }
        }

        for (decl, location) in new_locations {
            self.method_locations.entry(decl).or_insert(location);
        }
        self.computed.insert(class);
        self.computations += 1;
    }
}

impl VTableContext for MicrosoftVTableContext<'_> {
    fn abi(&self) -> AbiKind {
        AbiKind::Microsoft
    }

    fn thunk_info(&mut self, decl: GlobalDecl) -> Option<&[ThunkInfo]> {
        // The complete destructor is never virtual in this ABI.
        if decl.dtor == Some(DtorKind::Complete) {
            return None;
        }
        let graph = self.graph;
        let method = graph.method(decl.method);
        if !method.is_virtual {
            return None;
        }
        self.compute_vtable_related_information(method.parent);
        self.thunks.get(decl.method)
    }
}
