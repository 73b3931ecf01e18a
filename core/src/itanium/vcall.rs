use crate::decl::{ClassGraph, ClassId, MethodId};
use crate::record::RecordLayouts;
use crate::util::fast_map::{FastHashMap, FastHashSet, fast_hash_map_new, fast_hash_set_new};
use crate::vtable::{BaseSubobject, FinalOverriders, VTableComponent};

/// Vcall offset offsets of a virtual base, keyed by method signature.
///
/// Methods with the same signature share one vcall offset, so lookups go
/// by signature rather than by declaration.
#[derive(Debug, Clone, Default)]
pub(crate) struct VCallOffsetMap {
    offsets: Vec<(MethodId, i64)>,
}

impl VCallOffsetMap {
    /// Returns false if a method with the same signature already has an offset.
    pub(crate) fn add(&mut self, graph: &ClassGraph, method: MethodId, offset_offset: i64) -> bool {
        let decl = graph.method(method);
        if self
            .offsets
            .iter()
            .any(|(m, _)| graph.method(*m).same_signature(decl))
        {
            return false;
        }
        self.offsets.push((method, offset_offset));
        true
    }

    pub(crate) fn get(&self, graph: &ClassGraph, method: MethodId) -> i64 {
        let decl = graph.method(method);
        match self
            .offsets
            .iter()
            .find(|(m, _)| graph.method(*m).same_signature(decl))
        {
            Some((_, offset)) => *offset,
            None => panic!("Did not find vcall offset for {}", graph.method_name(method)),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Builds the vcall and vbase offsets that precede the offset-to-top slot of
/// one vtable.
pub(crate) struct VCallAndVBaseOffsetBuilder<'a> {
    graph: &'a ClassGraph,
    records: &'a RecordLayouts,
    layout_class: ClassId,
    /// Absent when only the offset offsets are wanted
    overriders: Option<&'a FinalOverriders>,
    /// Collected in reverse; the vtable stores them last-added-first
    components: Vec<VTableComponent>,
    pub(crate) vcall_offsets: VCallOffsetMap,
    pub(crate) vbase_offset_offsets: FastHashMap<ClassId, i64>,
    visited_vbases: FastHashSet<ClassId>,
}

impl<'a> VCallAndVBaseOffsetBuilder<'a> {
    pub(crate) fn build(
        graph: &'a ClassGraph,
        records: &'a RecordLayouts,
        layout_class: ClassId,
        overriders: Option<&'a FinalOverriders>,
        base: BaseSubobject,
        base_is_virtual: bool,
        offset_in_layout_class: i64,
    ) -> Self {
        let mut builder = Self {
            graph,
            records,
            layout_class,
            overriders,
            components: Vec::new(),
            vcall_offsets: VCallOffsetMap::default(),
            vbase_offset_offsets: fast_hash_map_new(),
            visited_vbases: fast_hash_set_new(),
        };
        builder.add_vcall_and_vbase_offsets(base, base_is_virtual, offset_in_layout_class);
        builder
    }

    /// Offsets in vtable order (furthest from the address point first).
    pub(crate) fn components(&self) -> impl Iterator<Item = VTableComponent> + '_ {
        self.components.iter().rev().copied()
    }

    /// Offset of the next slot relative to the address point, skipping the
    /// RTTI and offset-to-top slots.
    fn current_offset_offset(&self) -> i64 {
        -((3 + self.components.len()) as i64) * self.records.pointer_bytes()
    }

    fn add_vcall_and_vbase_offsets(&mut self, base: BaseSubobject, base_is_virtual: bool, real_base_offset: i64) {
        if let Some(primary) = self.records.get(base.base).primary_base {
            self.add_vcall_and_vbase_offsets(BaseSubobject::new(primary, base.offset), false, real_base_offset);
        }
        self.add_vbase_offsets(base.base, real_base_offset);

        // Only virtual bases get vcall offsets.
        if base_is_virtual {
            self.add_vcall_offsets(base, real_base_offset);
        }
    }

    fn add_vcall_offsets(&mut self, base: BaseSubobject, vbase_offset: i64) {
        let graph = self.graph;
        let class = base.base;
        let layout = self.records.get(class);
        let primary = layout.primary_base;

        if let Some(primary) = primary {
            self.add_vcall_offsets(BaseSubobject::new(primary, base.offset), vbase_offset);
        }

        for method in graph.virtual_methods(class) {
            let offset_offset = self.current_offset_offset();
            if !self.vcall_offsets.add(graph, method, offset_offset) {
                continue;
            }
            let offset = match self.overriders {
                // Distance from the virtual base to the overriding subobject.
                Some(overriders) => overriders.get(method, base.offset).offset - vbase_offset,
                None => 0,
            };
            self.components.push(VTableComponent::make_vcall_offset(offset));
        }

        for base_class in graph.class(class).non_virtual_bases() {
            if Some(base_class) == primary {
                continue;
            }
            let offset = base.offset + layout.base_offset(base_class);
            self.add_vcall_offsets(BaseSubobject::new(base_class, offset), vbase_offset);
        }
    }

    fn add_vbase_offsets(&mut self, class: ClassId, offset_in_layout_class: i64) {
        let graph = self.graph;
        let layout_class_layout = self.records.get(self.layout_class);
        for spec in &graph.class(class).bases {
            if spec.is_virtual && self.visited_vbases.insert(spec.class) {
                let offset = layout_class_layout.vbase_offset(spec.class) - offset_in_layout_class;
                let offset_offset = self.current_offset_offset();
                let previous = self.vbase_offset_offsets.insert(spec.class, offset_offset);
                assert!(previous.is_none(), "vbase offset offset already exists!");
                self.components.push(VTableComponent::make_vbase_offset(offset));
            }
            if graph.class(spec.class).has_vbases() {
                self.add_vbase_offsets(spec.class, offset_in_layout_class);
            }
        }
    }
}
