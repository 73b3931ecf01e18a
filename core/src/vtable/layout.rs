use std::fmt;

use crate::decl::{ClassGraph, ClassId};
use crate::util::fast_map::{FastHashMap, sorted_entries};

use super::component::VTableComponent;
use super::thunk::ThunkInfo;

/// A base class subobject: the class plus its offset inside some enclosing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BaseSubobject {
    pub base: ClassId,
    pub offset: i64,
}

impl BaseSubobject {
    pub fn new(base: ClassId, offset: i64) -> Self {
        Self { base, offset }
    }
}

/// Where a vtable pointer for some subobject points: table number plus slot
/// index within that table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressPointLocation {
    pub vtable_index: usize,
    pub address_point_index: usize,
}

pub type AddressPointsMap = FastHashMap<BaseSubobject, AddressPointLocation>;

/// An ordered group of one or more vtables stored back to back.
///
/// Built once by a layout algorithm and read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct VTableLayout {
    /// Start of every table; empty means a single table starting at zero
    vtable_indices: Vec<usize>,
    components: Vec<VTableComponent>,
    /// Sorted by slot index
    thunks: Vec<(usize, ThunkInfo)>,
    address_points: AddressPointsMap,
    primary_virtual_methods: usize,
}

impl VTableLayout {
    pub fn new(
        vtable_indices: Vec<usize>,
        components: Vec<VTableComponent>,
        mut thunks: Vec<(usize, ThunkInfo)>,
        address_points: AddressPointsMap,
    ) -> Self {
        let vtable_indices = if vtable_indices.len() <= 1 {
            if let Some(first) = vtable_indices.first() {
                assert_eq!(*first, 0, "the first vtable must start at slot zero");
            }
            Vec::new()
        } else {
            vtable_indices
        };
        assert!(
            vtable_indices.first().is_none_or(|first| *first == 0),
            "the first vtable must start at slot zero"
        );
        assert!(
            vtable_indices.windows(2).all(|w| w[0] <= w[1]),
            "vtable start indices must be ascending"
        );
        assert!(
            vtable_indices.iter().all(|idx| *idx <= components.len()),
            "vtable start index out of range"
        );

        thunks.sort_by_key(|(idx, _)| *idx);
        assert!(
            thunks.windows(2).all(|w| w[0].0 != w[1].0),
            "a slot may carry at most one thunk"
        );
        assert!(
            thunks.iter().all(|(idx, _)| *idx < components.len()),
            "thunk slot out of range"
        );

        let table_count = vtable_indices.len().max(1);
        let primary_end = vtable_indices.get(1).copied().unwrap_or(components.len());
        let primary_virtual_methods = components[..primary_end]
            .iter()
            .filter(|c| c.is_function_pointer_kind())
            .count();

        let layout = Self {
            vtable_indices,
            components,
            thunks,
            address_points,
            primary_virtual_methods,
        };
        for (subobject, location) in &layout.address_points {
            assert!(
                location.vtable_index < table_count,
                "address point of {:?} names a missing table",
                subobject
            );
            assert!(
                location.address_point_index <= layout.table_size(location.vtable_index),
                "address point of {:?} is past the end of its table",
                subobject
            );
        }
        layout
    }

    pub fn table_count(&self) -> usize {
        self.vtable_indices.len().max(1)
    }

    pub fn table_start(&self, table: usize) -> usize {
        if self.vtable_indices.is_empty() {
            assert_eq!(table, 0, "vtable index out of range");
            return 0;
        }
        self.vtable_indices[table]
    }

    pub fn table_size(&self, table: usize) -> usize {
        if self.vtable_indices.is_empty() {
            assert_eq!(table, 0, "vtable index out of range");
            return self.components.len();
        }
        let end = self
            .vtable_indices
            .get(table + 1)
            .copied()
            .unwrap_or(self.components.len());
        end - self.vtable_indices[table]
    }

    pub fn table(&self, table: usize) -> &[VTableComponent] {
        let start = self.table_start(table);
        &self.components[start..start + self.table_size(table)]
    }

    /// Location of the vtable pointer for `base`. Every subobject that has
    /// a vtable in this group has an address point.
    pub fn address_point(&self, base: BaseSubobject) -> AddressPointLocation {
        match self.address_points.get(&base) {
            Some(location) => *location,
            None => panic!("Did not find address point for {:?}", base),
        }
    }

    pub fn find_address_point(&self, base: BaseSubobject) -> Option<AddressPointLocation> {
        self.address_points.get(&base).copied()
    }

    pub fn address_points(&self) -> &AddressPointsMap {
        &self.address_points
    }

    /// Address points ordered by subobject, for stable output.
    pub fn sorted_address_points(&self) -> Vec<(BaseSubobject, AddressPointLocation)> {
        sorted_entries(&self.address_points)
    }

    pub fn components(&self) -> &[VTableComponent] {
        &self.components
    }

    pub fn thunks(&self) -> &[(usize, ThunkInfo)] {
        &self.thunks
    }

    /// Thunk attached to the slot at `index`, if any.
    pub fn thunk_at(&self, index: usize) -> Option<&ThunkInfo> {
        self.thunks
            .binary_search_by_key(&index, |(idx, _)| *idx)
            .ok()
            .map(|pos| &self.thunks[pos].1)
    }

    /// Number of function-pointer slots in the first table.
    pub fn primary_virtual_method_count(&self) -> usize {
        self.primary_virtual_methods
    }

    pub fn display<'a>(&'a self, graph: &'a ClassGraph) -> impl fmt::Display + 'a {
        DisplayLayout { layout: self, graph }
    }
}

struct DisplayLayout<'a> {
    layout: &'a VTableLayout,
    graph: &'a ClassGraph,
}

impl fmt::Display for DisplayLayout<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.graph;
        for table in 0..self.layout.table_count() {
            let start = self.layout.table_start(table);
            writeln!(f, "vtable #{table} ({} entries)", self.layout.table_size(table))?;
            for (i, component) in self.layout.table(table).iter().enumerate() {
                write!(f, "  {:>4} | ", start + i)?;
                match component {
                    VTableComponent::VCallOffset(o) => write!(f, "vcall_offset ({o})")?,
                    VTableComponent::VBaseOffset(o) => write!(f, "vbase_offset ({o})")?,
                    VTableComponent::OffsetToTop(o) => write!(f, "offset_to_top ({o})")?,
                    VTableComponent::Rtti(c) => write!(f, "{} RTTI", graph.class_name(*c))?,
                    VTableComponent::FunctionPointer(m) => write!(f, "{}", graph.display_method(*m))?,
                    VTableComponent::CompleteDtorPointer(m) => {
                        write!(f, "{} [complete]", graph.method_name(*m))?
                    }
                    VTableComponent::DeletingDtorPointer(m) => {
                        write!(f, "{} [deleting]", graph.method_name(*m))?
                    }
                    VTableComponent::UnusedFunctionPointer(m) => {
                        write!(f, "{} [unused]", graph.method_name(*m))?
                    }
                }
                if let Some(thunk) = self.layout.thunk_at(start + i) {
                    if !thunk.this.is_empty() {
                        write!(
                            f,
                            "\n         [this adjustment: {} non-virtual, {} vcall offset offset]",
                            thunk.this.non_virtual, thunk.this.vcall_offset_offset
                        )?;
                    }
                    if !thunk.ret.is_empty() {
                        write!(
                            f,
                            "\n         [return adjustment: {} non-virtual, {:?}]",
                            thunk.ret.non_virtual, thunk.ret.virtual_adjustment
                        )?;
                    }
                }
                writeln!(f)?;
            }
        }
        for (base, location) in self.layout.sorted_address_points() {
            writeln!(
                f,
                "address point {} at {}: vtable #{}, index {}",
                graph.class_name(base.base),
                base.offset,
                location.vtable_index,
                location.address_point_index
            )?;
        }
        Ok(())
    }
}
