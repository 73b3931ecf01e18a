//! Itanium C++ ABI vtable layout: one vtable group per dynamic class, with
//! vcall/vbase offsets, offset-to-top and RTTI slots ahead of each address
//! point, plus construction vtables for subobjects under construction.

mod builder;
mod vcall;


use tracing::debug;

use crate::config::{AbiKind, AbiOptions};
use crate::decl::{ClassGraph, ClassId};
use crate::record::RecordLayouts;
use crate::util::fast_map::{FastHashMap, FastHashSet, fast_hash_map_new, fast_hash_set_new};
use crate::vtable::{BaseSubobject, GlobalDecl, ThunkInfo, ThunkRegistry, VTableContext, VTableLayout};

use builder::ItaniumVTableBuilder;
use vcall::VCallAndVBaseOffsetBuilder;

/// Vbase offset offsets keyed by (class, virtual base), filled lazily.
#[derive(Debug)]
pub(crate) struct VBaseOffsetOffsetCache {
    offsets: FastHashMap<(ClassId, ClassId), i64>,
    computed: FastHashSet<ClassId>,
}

impl VBaseOffsetOffsetCache {
    fn new() -> Self {
        Self {
            offsets: fast_hash_map_new(),
            computed: fast_hash_set_new(),
        }
    }

    fn lookup(&mut self, graph: &ClassGraph, records: &RecordLayouts, class: ClassId, vbase: ClassId) -> Option<i64> {
        if self.computed.insert(class) {
            let builder = VCallAndVBaseOffsetBuilder::build(
                graph,
                records,
                class,
                None,
                BaseSubobject::new(class, 0),
                false,
                0,
            );
            for (base, offset_offset) in builder.vbase_offset_offsets {
                self.offsets.entry((class, base)).or_insert(offset_offset);
            }
        }
        self.offsets.get(&(class, vbase)).copied()
    }

    pub(crate) fn get_or_compute(
        &mut self,
        graph: &ClassGraph,
        records: &RecordLayouts,
        class: ClassId,
        vbase: ClassId,
    ) -> i64 {
        match self.lookup(graph, records, class, vbase) {
            Some(offset_offset) => offset_offset,
            None => panic!(
                "Did not find vbase offset offset for '{}' in '{}'",
                graph.class_name(vbase),
                graph.class_name(class)
            ),
        }
    }

    fn record(&mut self, class: ClassId, offsets: FastHashMap<ClassId, i64>) {
        for (vbase, offset_offset) in offsets {
            self.offsets.entry((class, vbase)).or_insert(offset_offset);
        }
        self.computed.insert(class);
    }
}

/// Lazily computed Itanium vtable information for the classes of one graph.
///
/// Each class's group is built at most once; later queries read the cache.
pub struct ItaniumVTableContext<'g> {
    graph: &'g ClassGraph,
    records: RecordLayouts,
    layouts: FastHashMap<ClassId, VTableLayout>,
    method_vtable_indices: FastHashMap<GlobalDecl, i64>,
    vbase_offset_offsets: VBaseOffsetOffsetCache,
    thunks: ThunkRegistry,
    computations: usize,
}

impl<'g> ItaniumVTableContext<'g> {
    pub fn new(graph: &'g ClassGraph, options: AbiOptions) -> Self {
        let records = RecordLayouts::compute(graph, AbiKind::Itanium, options);
        Self {
            graph,
            records,
            layouts: fast_hash_map_new(),
            method_vtable_indices: fast_hash_map_new(),
            vbase_offset_offsets: VBaseOffsetOffsetCache::new(),
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

    /// How many vtable groups have been built so far.
    pub fn computation_count(&self) -> usize {
        self.computations
    }

    pub fn vtable_layout(&mut self, class: ClassId) -> &VTableLayout {
        self.compute_vtable_related_information(class);
        &self.layouts[&class]
    }

    /// Slot index of a virtual method relative to its class's address point.
    ///
    /// Destructors need an explicit variant; the deleting one sits right
    /// after the complete one.
    pub fn method_vtable_index(&mut self, decl: GlobalDecl) -> i64 {
        let graph = self.graph;
        let method = graph.method(decl.method);
        assert!(method.is_virtual, "'{}' is not virtual", graph.method_name(decl.method));
        assert_eq!(
            method.is_destructor(),
            decl.dtor.is_some(),
            "destructor variant must be given exactly for destructors"
        );
        if let Some(index) = self.method_vtable_indices.get(&decl) {
            return *index;
        }
        self.compute_vtable_related_information(method.parent);
        match self.method_vtable_indices.get(&decl) {
            Some(index) => *index,
            None => panic!("Did not find index for {}!", graph.method_name(decl.method)),
        }
    }

    /// Offset (relative to `class`'s address point) of the slot holding the
    /// offset of `vbase`, or zero when `class` stores none for it.
    pub fn virtual_base_offset_offset(&mut self, class: ClassId, vbase: ClassId) -> i64 {
        self.find_virtual_base_offset_offset(class, vbase).unwrap_or(0)
    }

    /// Like [`Self::virtual_base_offset_offset`], but reports a missing
    /// entry explicitly. Only virtual bases of `class` have one.
    pub fn find_virtual_base_offset_offset(&mut self, class: ClassId, vbase: ClassId) -> Option<i64> {
        let graph = self.graph;
        if !graph.class(class).vbases.contains(&vbase) {
            return None;
        }
        self.vbase_offset_offsets.lookup(graph, &self.records, class, vbase)
    }

    /// Vtable group used while `base` (at `base_offset`) is under construction
    /// inside `layout_class`. Not cached.
    pub fn create_construction_vtable_layout(
        &mut self,
        base: ClassId,
        base_offset: i64,
        base_is_virtual: bool,
        layout_class: ClassId,
    ) -> VTableLayout {
        let graph = self.graph;
        assert!(
            base == layout_class || graph.is_derived_from(layout_class, base),
            "'{}' is not a base of '{}'",
            graph.class_name(base),
            graph.class_name(layout_class)
        );
        let built = ItaniumVTableBuilder::new(
            graph,
            &self.records,
            &mut self.vbase_offset_offsets,
            base,
            base_offset,
            base_is_virtual,
            layout_class,
        )
        .build();
        debug!(
            class = %graph.class_name(base),
            layout_class = %graph.class_name(layout_class),
            offset = base_offset,
            slots = built.layout.components().len(),
            tables = built.layout.table_count(),
            "built construction vtable"
        );
        built.layout
    }

    fn compute_vtable_related_information(&mut self, class: ClassId) {
        if self.layouts.contains_key(&class) {
            return;
        }
        let graph = self.graph;
        let built = ItaniumVTableBuilder::new(
            graph,
            &self.records,
            &mut self.vbase_offset_offsets,
            class,
            0,
            false,
            class,
        )
        .build();
        self.computations += 1;

        debug!(
            class = %graph.class_name(class),
            slots = built.layout.components().len(),
            tables = built.layout.table_count(),
            thunks = built.layout.thunks().len(),
            "built vtable group"
        );

        for (decl, index) in built.method_vtable_indices {
            self.method_vtable_indices.entry(decl).or_insert(index);
        }
        self.thunks.merge(built.thunks);
        self.vbase_offset_offsets.record(class, built.vbase_offset_offsets);
        self.layouts.insert(class, built.layout);
    }
}

impl VTableContext for ItaniumVTableContext<'_> {
    fn abi(&self) -> AbiKind {
        AbiKind::Itanium
    }

    fn thunk_info(&mut self, decl: GlobalDecl) -> Option<&[ThunkInfo]> {
        let graph = self.graph;
        let method = graph.method(decl.method);
        if !method.is_virtual {
            return None;
        }
        self.compute_vtable_related_information(method.parent);
        self.thunks.get(decl.method)
    }
}
