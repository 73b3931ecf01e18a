use std::collections::BTreeMap;

use super::location::MethodVFTableLocation;
use super::vptr::{VBaseInfoCache, VPtrInfo};
use crate::decl::{ClassGraph, ClassId, MethodId};
use crate::record::{BaseOffset, RecordLayouts};
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::vtable::{
    AddressPointLocation, BaseSubobject, DtorKind, FinalOverriders, GlobalDecl, OverriderInfo, ReturnAdjustment,
    ThisAdjustment, ThunkInfo, ThunkRegistry, VTableComponent, VTableLayout, VirtualReturnAdjustment,
    find_nearest_overridden_method,
};

#[derive(Debug, Clone, Copy)]
struct MethodInfo {
    vbtable_index: u32,
    /// Slot index, not counting the RTTI slot
    vftable_index: u64,
    /// Replaced by a return-adjusting slot further down the chain
    shadowed: bool,
    /// Occupies a slot added for a return adjustment
    uses_extra_slot: bool,
}

pub(crate) struct VFTableBuild {
    pub(crate) layout: VTableLayout,
    pub(crate) locations: FastHashMap<GlobalDecl, MethodVFTableLocation>,
    pub(crate) thunks: ThunkRegistry,
}

/// Lays out the single vftable reached through one vfptr of a class.
pub(crate) struct VFTableBuilder<'a> {
    graph: &'a ClassGraph,
    records: &'a RecordLayouts,
    vbase_infos: &'a mut VBaseInfoCache,
    most_derived: ClassId,
    which: &'a VPtrInfo,
    overriders: FinalOverriders,
    has_rtti_component: bool,

    components: Vec<VTableComponent>,
    method_info: FastHashMap<MethodId, MethodInfo>,
    vtable_thunks: BTreeMap<usize, ThunkInfo>,
    thunks: ThunkRegistry,
}

impl<'a> VFTableBuilder<'a> {
    pub(crate) fn new(
        graph: &'a ClassGraph,
        records: &'a RecordLayouts,
        vbase_infos: &'a mut VBaseInfoCache,
        most_derived: ClassId,
        which: &'a VPtrInfo,
    ) -> Self {
        Self {
            graph,
            records,
            vbase_infos,
            most_derived,
            which,
            overriders: FinalOverriders::new(graph, records, most_derived, 0, most_derived),
            has_rtti_component: records.options().rtti_data,
            components: Vec::new(),
            method_info: fast_hash_map_new(),
            vtable_thunks: BTreeMap::new(),
            thunks: ThunkRegistry::default(),
        }
    }

    pub(crate) fn build(mut self) -> VFTableBuild {
        if self.has_rtti_component {
            self.components.push(VTableComponent::make_rtti(self.most_derived));
        }
        let mut visited_bases = Vec::new();
        self.add_methods(BaseSubobject::new(self.most_derived, 0), 0, None, &mut visited_bases);
        assert!(!self.components.is_empty(), "vftable can't be empty");

        let which = self.which;
        let mut locations = fast_hash_map_new();
        for (method, info) in &self.method_info {
            // Only methods of the most derived class that still own their slot.
            if self.graph.method(*method).parent != self.most_derived || info.shadowed {
                continue;
            }
            let location = MethodVFTableLocation {
                vbtable_index: info.vbtable_index,
                vbase: which.vbase_with_vptr(),
                vfptr_offset: which.non_virtual_offset,
                index: info.vftable_index,
            };
            let decl = if self.graph.method(*method).is_destructor() {
                GlobalDecl::dtor(*method, DtorKind::Deleting)
            } else {
                GlobalDecl::method(*method)
            };
            locations.insert(decl, location);
        }

        let address_point = AddressPointLocation {
            vtable_index: 0,
            address_point_index: usize::from(self.has_rtti_component),
        };
        let mut address_points = fast_hash_map_new();
        for subobject in self.subobjects_sharing_vfptr() {
            address_points.insert(subobject, address_point);
        }

        let thunks = self.vtable_thunks.into_iter().collect();
        VFTableBuild {
            layout: VTableLayout::new(vec![0], self.components, thunks, address_points),
            locations,
            thunks: self.thunks,
        }
    }

    /// Every subobject that finds this vftable through the vfptr at
    /// `full_offset_in_mdc`: the classes on the path to the introducing
    /// object placed at that offset, and their primary chains.
    fn subobjects_sharing_vfptr(&self) -> Vec<BaseSubobject> {
        let graph = self.graph;
        let records = self.records;
        let which = self.which;
        let target = which.full_offset_in_mdc;

        let mut on_path = vec![(self.most_derived, 0)];
        let mut class = self.most_derived;
        let mut offset = 0;
        for &next in &which.path_to_introducing_object {
            offset = if graph.class(class).is_direct_vbase(next) {
                records.get(self.most_derived).vbase_offset(next)
            } else {
                offset + records.get(class).base_offset(next)
            };
            class = next;
            on_path.push((class, offset));
        }

        let mut subobjects = vec![
            BaseSubobject::new(which.object_with_vptr, target),
            BaseSubobject::new(which.introducing_object, target),
        ];
        for (class, offset) in on_path {
            if offset != target {
                continue;
            }
            let mut current = Some(class);
            while let Some(base) = current {
                let subobject = BaseSubobject::new(base, target);
                if !subobjects.contains(&subobject) {
                    subobjects.push(subobject);
                }
                current = records.get(base).primary_base;
            }
        }
        subobjects
    }

    fn add_methods(
        &mut self,
        base: BaseSubobject,
        base_depth: usize,
        last_vbase: Option<ClassId>,
        visited_bases: &mut Vec<ClassId>,
    ) {
        let graph = self.graph;
        let records = self.records;
        let class = base.base;
        if !graph.class(class).is_polymorphic {
            return;
        }
        let layout = records.get(class);

        // Follow the path to the introducing object first, then the primary chain.
        let mut next = None;
        if let Some(next_base) = self.which.path_to_introducing_object.get(base_depth).copied() {
            if graph.class(class).is_direct_vbase(next_base) {
                let offset = records.get(self.most_derived).vbase_offset(next_base);
                next = Some((next_base, offset, Some(next_base)));
            } else {
                next = Some((next_base, base.offset + layout.base_offset(next_base), last_vbase));
            }
        } else if let Some(primary) = layout.primary_base {
            next = Some((primary, base.offset, last_vbase));
        }

        if let Some((next_base, next_offset, next_last_vbase)) = next {
            self.add_methods(
                BaseSubobject::new(next_base, next_offset),
                base_depth + 1,
                next_last_vbase,
                visited_bases,
            );
            assert!(!visited_bases.contains(&next_base), "Found a duplicate primary base!");
            visited_bases.push(next_base);
        }

        for method in group_new_virtual_overloads(graph, class) {
            let overrider = self.overriders.get(method, base.offset);
            let overridden = find_nearest_overridden_method(graph, method, visited_bases);

            let this_offset = self.compute_this_offset(overrider);
            let this = ThisAdjustment {
                non_virtual: this_offset - self.which.full_offset_in_mdc,
                vcall_offset_offset: 0,
            };

            let mut vbtable_index = match last_vbase {
                Some(vbase) => self.vbase_infos.vbtable_index(graph, records, self.most_derived, vbase),
                None => 0,
            };
            let mut return_adjusting_thunk = false;
            let mut force_return_adjustment_mangling = false;

            if let Some(overridden) = overridden {
                // The overridden method went to a different vftable.
                let Some(overridden_info) = self.method_info.get_mut(&overridden) else {
                    continue;
                };
                vbtable_index = overridden_info.vbtable_index;

                // Once a chain of overrides needs an extra slot, every later override does too.
                return_adjusting_thunk = !records.return_adjustment_offset(graph, method, overridden).is_empty()
                    || overridden_info.uses_extra_slot;
                if !return_adjusting_thunk {
                    let info = MethodInfo {
                        vbtable_index,
                        vftable_index: overridden_info.vftable_index,
                        shadowed: false,
                        uses_extra_slot: false,
                    };
                    self.method_info.remove(&overridden);
                    let previous = self.method_info.insert(method, info);
                    assert!(previous.is_none(), "Should not have method info for this method yet!");
                    continue;
                }

                overridden_info.shadowed = true;
                force_return_adjustment_mangling = !(method == overrider.method && this.is_empty());
            } else if base.offset != self.which.full_offset_in_mdc || !graph.method(method).overridden.is_empty() {
                // Belongs to another vftable of this class.
                continue;
            }

            let vftable_index = self.components.len() - usize::from(self.has_rtti_component);
            let previous = self.method_info.insert(
                method,
                MethodInfo {
                    vbtable_index,
                    vftable_index: vftable_index as u64,
                    shadowed: false,
                    uses_extra_slot: return_adjusting_thunk,
                },
            );
            assert!(previous.is_none(), "Should not have method info for this method yet!");

            let offset = if graph.method(overrider.method).is_pure {
                BaseOffset::default()
            } else {
                records.return_adjustment_offset(graph, overrider.method, method)
            };
            let mut ret = ReturnAdjustment::default();
            if !offset.is_empty() {
                force_return_adjustment_mangling = true;
                ret.non_virtual = offset.non_virtual;
                if let (Some(vbase), Some(derived)) = (offset.virtual_base, offset.derived) {
                    ret.virtual_adjustment = VirtualReturnAdjustment::Microsoft {
                        vbptr_offset: records.get(derived).vbptr_offset.unwrap_or_default(),
                        vb_index: self.vbase_infos.vbtable_index(graph, records, derived, vbase),
                    };
                }
            }

            let thunk = ThunkInfo::new(this, ret, force_return_adjustment_mangling.then_some(method));
            self.add_method(overrider.method, thunk);
        }
    }

    fn add_method(&mut self, method: MethodId, thunk: ThunkInfo) {
        if !thunk.is_empty() {
            self.vtable_thunks.insert(self.components.len(), thunk);
            self.thunks.add(method, thunk);
        }
        let decl = self.graph.method(method);
        if decl.is_destructor() {
            assert!(thunk.ret.is_empty(), "Destructor can't have return adjustment!");
            self.components.push(VTableComponent::make_deleting_dtor(decl));
        } else {
            self.components.push(VTableComponent::make_function(decl));
        }
    }

    /// Offset in the most derived class that the overrider expects as `this`.
    ///
    /// Among the least derived bases declaring the method, the smallest
    /// offset wins, so a non-virtual base is preferred over a virtual one.
    fn compute_this_offset(&self, overrider: OverriderInfo) -> i64 {
        let graph = self.graph;
        let records = self.records;

        let mut roots: Vec<ClassId> = Vec::new();
        for overridden in graph.overridden_closure(overrider.method) {
            let decl = graph.method(*overridden);
            if decl.overridden.is_empty() && !roots.contains(&decl.parent) {
                roots.push(decl.parent);
            }
        }
        if roots.is_empty() {
            return overrider.offset;
        }

        let overrider_class = graph.method(overrider.method).parent;
        let overrider_layout = records.get(overrider_class);
        let is_destructor = graph.method(overrider.method).is_destructor();

        let mut best: Option<i64> = None;
        for path in graph.paths_to_first(overrider_class, |class| roots.contains(&class)) {
            let mut this_offset = overrider.offset;
            let mut last_vbase_offset = 0;
            for step in &path {
                if step.is_virtual {
                    // The overrider casts with the static offset of the vbase in its own class.
                    this_offset = overrider.offset + overrider_layout.vbase_offset(step.base);
                    last_vbase_offset = this_offset;
                } else {
                    this_offset += records.get(step.class).base_offset(step.base);
                }
            }

            if is_destructor {
                this_offset = if last_vbase_offset == 0 {
                    overrider.offset
                } else {
                    last_vbase_offset
                };
            }

            best = Some(best.map_or(this_offset, |b| b.min(this_offset)));
        }

        match best {
            Some(offset) => offset,
            None => panic!("Method not found in the given subobject?"),
        }
    }
}

/// Virtual methods of `class` in vftable order: groups of same-named
/// methods in order of first declaration, each group reversed.
fn group_new_virtual_overloads(graph: &ClassGraph, class: ClassId) -> Vec<MethodId> {
    let mut groups: Vec<Vec<MethodId>> = Vec::new();
    let mut group_index: FastHashMap<&str, usize> = fast_hash_map_new();
    for method in &graph.class(class).methods {
        let decl = graph.method(*method);
        let idx = *group_index.entry(decl.name.as_str()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        if decl.is_virtual {
            groups[idx].push(*method);
        }
    }
    groups.into_iter().flat_map(|group| group.into_iter().rev()).collect()
}
