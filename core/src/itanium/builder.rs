use std::collections::BTreeMap;

use tracing::trace;

use super::VBaseOffsetOffsetCache;
use super::vcall::{VCallAndVBaseOffsetBuilder, VCallOffsetMap};
use crate::decl::{ClassGraph, ClassId, MethodId};
use crate::record::{BaseOffset, RecordLayouts};
use crate::util::fast_map::{FastHashMap, FastHashSet, fast_hash_map_new, fast_hash_set_new};
use crate::vtable::{
    AddressPointLocation, AddressPointsMap, BaseSubobject, DtorKind, FinalOverriders, GlobalDecl, OverriderInfo,
    ReturnAdjustment, ThisAdjustment, ThunkInfo, ThunkRegistry, VTableComponent, VTableLayout,
    VirtualReturnAdjustment, find_nearest_overridden_method,
};

#[derive(Debug, Clone, Copy)]
struct MethodInfo {
    /// Offset of the subobject that owns the slot, in the most derived class
    base_offset: i64,
    base_offset_in_layout_class: i64,
    /// Absolute slot index within the group
    vtable_index: usize,
}

/// Everything produced while laying out one vtable group.
pub(crate) struct VTableBuild {
    pub(crate) layout: VTableLayout,
    /// Method indices relative to the primary address point
    pub(crate) method_vtable_indices: FastHashMap<GlobalDecl, i64>,
    pub(crate) thunks: ThunkRegistry,
    /// Vbase offset offsets of the most derived class's primary table
    pub(crate) vbase_offset_offsets: FastHashMap<ClassId, i64>,
}

/// Lays out the vtable group of a most derived class, or a construction
/// vtable group when the most derived class is embedded in a layout class.
pub(crate) struct ItaniumVTableBuilder<'a> {
    graph: &'a ClassGraph,
    records: &'a RecordLayouts,
    vbase_cache: &'a mut VBaseOffsetOffsetCache,
    most_derived: ClassId,
    most_derived_offset: i64,
    most_derived_is_virtual: bool,
    layout_class: ClassId,
    overriders: FinalOverriders,

    vcall_offsets_for_vbases: FastHashMap<ClassId, VCallOffsetMap>,
    vbase_offset_offsets: FastHashMap<ClassId, i64>,
    components: Vec<VTableComponent>,
    vtable_indices: Vec<usize>,
    address_points: AddressPointsMap,
    method_info: FastHashMap<MethodId, MethodInfo>,
    /// Maps a method to the one it replaced in `method_info`
    original_methods: FastHashMap<MethodId, MethodId>,
    method_vtable_indices: FastHashMap<GlobalDecl, i64>,
    vtable_thunks: BTreeMap<usize, ThunkInfo>,
    thunks: ThunkRegistry,
}

impl<'a> ItaniumVTableBuilder<'a> {
    pub(crate) fn new(
        graph: &'a ClassGraph,
        records: &'a RecordLayouts,
        vbase_cache: &'a mut VBaseOffsetOffsetCache,
        most_derived: ClassId,
        most_derived_offset: i64,
        most_derived_is_virtual: bool,
        layout_class: ClassId,
    ) -> Self {
        let overriders = FinalOverriders::new(graph, records, most_derived, most_derived_offset, layout_class);
        Self {
            graph,
            records,
            vbase_cache,
            most_derived,
            most_derived_offset,
            most_derived_is_virtual,
            layout_class,
            overriders,
            vcall_offsets_for_vbases: fast_hash_map_new(),
            vbase_offset_offsets: fast_hash_map_new(),
            components: Vec::new(),
            vtable_indices: Vec::new(),
            address_points: fast_hash_map_new(),
            method_info: fast_hash_map_new(),
            original_methods: fast_hash_map_new(),
            method_vtable_indices: fast_hash_map_new(),
            vtable_thunks: BTreeMap::new(),
            thunks: ThunkRegistry::default(),
        }
    }

    pub(crate) fn build(mut self) -> VTableBuild {
        let graph = self.graph;
        assert!(
            graph.class(self.most_derived).is_dynamic,
            "'{}' has no vtable",
            graph.class_name(self.most_derived)
        );

        self.layout_primary_and_secondary_vtables(
            BaseSubobject::new(self.most_derived, 0),
            false,
            self.most_derived_is_virtual,
            self.most_derived_offset,
        );
        let mut visited = fast_hash_set_new();
        self.layout_vtables_for_virtual_bases(self.most_derived, &mut visited);

        let thunks = self.vtable_thunks.into_iter().collect();
        VTableBuild {
            layout: VTableLayout::new(self.vtable_indices, self.components, thunks, self.address_points),
            method_vtable_indices: self.method_vtable_indices,
            thunks: self.thunks,
            vbase_offset_offsets: self.vbase_offset_offsets,
        }
    }

    fn is_building_construction_vtable(&self) -> bool {
        self.most_derived != self.layout_class
    }

    fn layout_primary_and_secondary_vtables(
        &mut self,
        base: BaseSubobject,
        base_is_morally_virtual: bool,
        base_is_virtual_in_layout_class: bool,
        offset_in_layout_class: i64,
    ) {
        let graph = self.graph;
        let records = self.records;
        assert!(graph.class(base.base).is_dynamic, "class does not have a vtable");

        let vtable_index = self.components.len();
        self.vtable_indices.push(vtable_index);

        {
            let offsets = VCallAndVBaseOffsetBuilder::build(
                graph,
                records,
                self.layout_class,
                Some(&self.overriders),
                base,
                base_is_virtual_in_layout_class,
                offset_in_layout_class,
            );
            self.components.extend(offsets.components());

            if base_is_virtual_in_layout_class && !offsets.vcall_offsets.is_empty() {
                let known = self.vcall_offsets_for_vbases.entry(base.base).or_default();
                if known.is_empty() {
                    *known = offsets.vcall_offsets.clone();
                }
            }
            if base.base == self.most_derived {
                self.vbase_offset_offsets = offsets.vbase_offset_offsets.clone();
            }
        }

        let offset_to_top = self.most_derived_offset - offset_in_layout_class;
        self.components.push(VTableComponent::make_offset_to_top(offset_to_top));
        self.components.push(VTableComponent::make_rtti(self.most_derived));

        let address_point = self.components.len();

        let mut primary_bases = Vec::new();
        self.add_methods(base, offset_in_layout_class, &mut primary_bases);

        if base.base == self.most_derived {
            for (method, info) in &self.method_info {
                let index = info.vtable_index as i64 - address_point as i64;
                if graph.method(*method).is_destructor() {
                    self.method_vtable_indices
                        .insert(GlobalDecl::dtor(*method, DtorKind::Complete), index);
                    self.method_vtable_indices
                        .insert(GlobalDecl::dtor(*method, DtorKind::Deleting), index + 1);
                } else {
                    self.method_vtable_indices.insert(GlobalDecl::method(*method), index);
                }
            }
        }

        self.compute_this_adjustments();

        // Every class along the primary chain shares this address point.
        let location = AddressPointLocation {
            vtable_index: self.vtable_indices.len() - 1,
            address_point_index: address_point - vtable_index,
        };
        let mut class = base.base;
        loop {
            self.address_points
                .insert(BaseSubobject::new(class, offset_in_layout_class), location);
            match records.get(class).primary_base {
                Some(primary) => class = primary,
                None => break,
            }
        }

        trace!(
            class = %graph.class_name(self.most_derived),
            base = %graph.class_name(base.base),
            offset = offset_in_layout_class,
            slots = self.components.len() - vtable_index,
            "laid out vtable"
        );

        self.layout_secondary_vtables(base, base_is_morally_virtual, offset_in_layout_class);
    }

    fn add_methods(
        &mut self,
        base: BaseSubobject,
        base_offset_in_layout_class: i64,
        primary_bases: &mut Vec<ClassId>,
    ) {
        let graph = self.graph;
        let records = self.records;
        let class = base.base;

        if let Some(primary) = records.get(class).primary_base {
            self.add_methods(BaseSubobject::new(primary, base.offset), base_offset_in_layout_class, primary_bases);
            assert!(!primary_bases.contains(&primary), "Found a duplicate primary base!");
            primary_bases.push(primary);
        }

        let mut new_methods = Vec::new();
        for method in graph.virtual_methods(class) {
            let overrider = self.overriders.get(method, base.offset);

            if let Some(overridden) = find_nearest_overridden_method(graph, method, primary_bases) {
                // Reuse the slot unless the return type needs a different adjustment.
                if records.return_adjustment_offset(graph, method, overridden).is_empty() {
                    let overridden_info = match self.method_info.get(&overridden) {
                        Some(info) => *info,
                        None => panic!("Did not find the overridden method {}!", graph.method_name(overridden)),
                    };
                    self.method_info.insert(
                        method,
                        MethodInfo {
                            base_offset: base.offset,
                            base_offset_in_layout_class,
                            vtable_index: overridden_info.vtable_index,
                        },
                    );
                    self.method_info.remove(&overridden);
                    self.original_methods.insert(method, overridden);

                    // The overridden slot may still be reached through a
                    // virtual base; record a thunk for the overrider then.
                    if !self.is_building_construction_vtable() && overridden != method {
                        let this = self.compute_this_adjustment(overridden, base_offset_in_layout_class, overrider);
                        if this.vcall_offset_offset != 0 && graph.method(overrider.method).parent == self.most_derived {
                            let offset = records.return_adjustment_offset(graph, overrider.method, overridden);
                            let ret = self.compute_return_adjustment(offset);
                            self.thunks.add(overrider.method, ThunkInfo::new(this, ret, None));
                        }
                    }
                    continue;
                }
            }
            new_methods.push(method);
        }

        for method in new_methods {
            let overrider = self.overriders.get(method, base.offset);
            self.method_info.insert(
                method,
                MethodInfo {
                    base_offset: base.offset,
                    base_offset_in_layout_class,
                    vtable_index: self.components.len(),
                },
            );

            let offset = if graph.method(overrider.method).is_pure {
                BaseOffset::default()
            } else {
                records.return_adjustment_offset(graph, overrider.method, method)
            };
            let ret = self.compute_return_adjustment(offset);
            if !ret.is_empty() {
                self.vtable_thunks.entry(self.components.len()).or_default().method = Some(method);
            }
            self.add_method(overrider.method, ret);
        }
    }

    fn add_method(&mut self, method: MethodId, ret: ReturnAdjustment) {
        let decl = self.graph.method(method);
        if decl.is_destructor() {
            assert!(ret.is_empty(), "Destructor can't have return adjustment!");
            self.components.push(VTableComponent::make_complete_dtor(decl));
            self.components.push(VTableComponent::make_deleting_dtor(decl));
        } else {
            if !ret.is_empty() {
                self.vtable_thunks.entry(self.components.len()).or_default().ret = ret;
            }
            self.components.push(VTableComponent::make_function(decl));
        }
    }

    fn compute_return_adjustment(&mut self, offset: BaseOffset) -> ReturnAdjustment {
        let mut adjustment = ReturnAdjustment::default();
        if offset.is_empty() {
            return adjustment;
        }
        if let (Some(vbase), Some(derived)) = (offset.virtual_base, offset.derived) {
            let vbase_offset_offset = if derived == self.most_derived {
                match self.vbase_offset_offsets.get(&vbase) {
                    Some(v) => *v,
                    None => panic!("missing vbase offset offset for '{}'", self.graph.class_name(vbase)),
                }
            } else {
                self.vbase_cache.get_or_compute(self.graph, self.records, derived, vbase)
            };
            adjustment.virtual_adjustment = VirtualReturnAdjustment::Itanium { vbase_offset_offset };
        }
        adjustment.non_virtual = offset.non_virtual;
        adjustment
    }

    fn compute_this_adjustment_base_offset(&self, base: BaseSubobject, derived: BaseSubobject) -> BaseOffset {
        if base.base == derived.base {
            return BaseOffset::default();
        }
        let layout_class_layout = self.records.get(self.layout_class);
        for path in self.graph.base_paths(derived.base, base.base) {
            let offset = self.records.offset_along_path(derived.base, &path);
            let mut offset_to_base = offset.non_virtual;
            match offset.virtual_base {
                // The virtual base's position in the layout class anchors the path.
                Some(vbase) => offset_to_base += layout_class_layout.vbase_offset(vbase),
                None => offset_to_base += derived.offset,
            }
            if offset_to_base == base.offset {
                // `this` moves from the base to the derived class.
                return BaseOffset {
                    non_virtual: -offset.non_virtual,
                    ..offset
                };
            }
        }
        BaseOffset::default()
    }

    fn compute_this_adjustment(
        &mut self,
        method: MethodId,
        base_offset_in_layout_class: i64,
        overrider: OverriderInfo,
    ) -> ThisAdjustment {
        let graph = self.graph;
        let records = self.records;
        if graph.method(overrider.method).is_pure {
            return ThisAdjustment::default();
        }

        let overridden_base = BaseSubobject::new(graph.method(method).parent, base_offset_in_layout_class);
        let overrider_base = BaseSubobject::new(graph.method(overrider.method).parent, overrider.offset);
        let offset = self.compute_this_adjustment_base_offset(overridden_base, overrider_base);
        if offset.is_empty() {
            return ThisAdjustment::default();
        }

        let mut adjustment = ThisAdjustment::default();
        if let Some(vbase) = offset.virtual_base {
            let most_derived = self.most_derived;
            let vcall_offsets = self.vcall_offsets_for_vbases.entry(vbase).or_default();
            if vcall_offsets.is_empty() {
                // Not seen as a primary table yet; build the offsets on their own.
                let builder = VCallAndVBaseOffsetBuilder::build(
                    graph,
                    records,
                    most_derived,
                    None,
                    BaseSubobject::new(vbase, 0),
                    true,
                    0,
                );
                *vcall_offsets = builder.vcall_offsets;
            }
            adjustment.vcall_offset_offset = vcall_offsets.get(graph, method);
        }
        adjustment.non_virtual = offset.non_virtual;
        adjustment
    }

    fn find_original_method(&self, mut method: MethodId) -> MethodId {
        while let Some(original) = self.original_methods.get(&method) {
            method = *original;
        }
        method
    }

    fn compute_this_adjustments(&mut self) {
        let graph = self.graph;
        let mut entries: Vec<(MethodId, MethodInfo)> = self.method_info.drain().collect();
        entries.sort_by_key(|(_, info)| info.vtable_index);

        for (method, info) in entries {
            let index = info.vtable_index;
            if matches!(self.components[index], VTableComponent::UnusedFunctionPointer(_)) {
                continue;
            }
            let overrider = self.overriders.get(method, info.base_offset);

            // Nothing to adjust when the overrider lives in the same subobject.
            if info.base_offset_in_layout_class == overrider.offset
                && self.vtable_thunks.get(&index).is_none_or(|t| t.ret.is_empty())
            {
                continue;
            }

            let this = self.compute_this_adjustment(method, info.base_offset_in_layout_class, overrider);
            if this.is_empty() {
                continue;
            }

            let original = self.find_original_method(method);
            let mut set_this_adjustment = |slot: usize| {
                let thunk = self.vtable_thunks.entry(slot).or_insert_with(|| ThunkInfo {
                    method: Some(original),
                    ..ThunkInfo::default()
                });
                thunk.this = this;
            };
            set_this_adjustment(index);
            if graph.method(method).is_destructor() {
                set_this_adjustment(index + 1);
            }
        }

        // Construction vtables do not contribute thunks.
        if self.is_building_construction_vtable() {
            return;
        }

        for (index, thunk) in &self.vtable_thunks {
            let method = match self.components[*index] {
                VTableComponent::FunctionPointer(m) | VTableComponent::CompleteDtorPointer(m) => m,
                // Already recorded for the complete destructor.
                VTableComponent::DeletingDtorPointer(_) => continue,
                other => panic!("Unexpected vtable component kind {:?}", other.kind()),
            };
            if graph.method(method).parent == self.most_derived {
                self.thunks.add(method, *thunk);
            }
        }
    }

    fn layout_secondary_vtables(&mut self, base: BaseSubobject, base_is_morally_virtual: bool, offset_in_layout_class: i64) {
        let graph = self.graph;
        let records = self.records;
        let layout = records.get(base.base);
        let primary = layout.primary_base;

        for base_class in graph.class(base.base).non_virtual_bases() {
            let decl = graph.class(base_class);
            if !decl.is_dynamic {
                continue;
            }
            // Construction vtables only need secondary tables that can reach a virtual base.
            if self.is_building_construction_vtable() && !base_is_morally_virtual && !decl.has_vbases() {
                continue;
            }

            let relative = layout.base_offset(base_class);
            let base_offset = base.offset + relative;
            let base_offset_in_layout_class = offset_in_layout_class + relative;

            if Some(base_class) == primary {
                // Shares the primary table; look further down for secondaries.
                self.layout_secondary_vtables(
                    BaseSubobject::new(base_class, base_offset),
                    base_is_morally_virtual,
                    base_offset_in_layout_class,
                );
                continue;
            }

            self.layout_primary_and_secondary_vtables(
                BaseSubobject::new(base_class, base_offset),
                base_is_morally_virtual,
                false,
                base_offset_in_layout_class,
            );
        }
    }

    fn layout_vtables_for_virtual_bases(&mut self, class: ClassId, visited: &mut FastHashSet<ClassId>) {
        let graph = self.graph;
        for spec in &graph.class(class).bases {
            if spec.is_virtual && graph.class(spec.class).is_dynamic && visited.insert(spec.class) {
                let base_offset = self.records.get(self.most_derived).vbase_offset(spec.class);
                let offset_in_layout_class = self.records.get(self.layout_class).vbase_offset(spec.class);
                self.layout_primary_and_secondary_vtables(
                    BaseSubobject::new(spec.class, base_offset),
                    true,
                    true,
                    offset_in_layout_class,
                );
            }
            if graph.class(spec.class).has_vbases() {
                self.layout_vtables_for_virtual_bases(spec.class, visited);
            }
        }
    }
}
