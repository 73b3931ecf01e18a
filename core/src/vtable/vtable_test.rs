#[cfg(test)]
mod tests {
    use crate::config::{AbiKind, AbiOptions};
    use crate::decl::{BaseSpec, ClassGraph, ClassGraphBuilder, ClassId, MethodId, MethodSpec};
    use crate::record::RecordLayouts;
    use crate::util::fast_map::fast_hash_map_new;
    use crate::vtable::{
        AddressPointLocation, BaseSubobject, ComponentKind, DtorKind, FinalOverriders, GlobalDecl, ThisAdjustment,
        ThunkInfo, ThunkRegistry, VTableComponent, VTableLayout, find_nearest_overridden_method,
    };
    use anyhow::Result;

    fn simple() -> Result<(ClassGraph, ClassId, MethodId, MethodId)> {
        let mut b = ClassGraphBuilder::new();
        let a = b.add_class("A", vec![])?;
        let f = b.add_method(a, MethodSpec::virtual_method("f"))?;
        let dtor = b.add_method(a, MethodSpec::virtual_destructor())?;
        Ok((b.finish()?, a, f, dtor))
    }

    #[test]
    fn test_component_accessors() -> Result<()> {
        let (graph, a, f, dtor) = simple()?;
        let offset = VTableComponent::make_vbase_offset(-16);
        assert_eq!(offset.kind(), ComponentKind::VBaseOffset);
        assert_eq!(offset.vbase_offset(), -16);

        let rtti = VTableComponent::make_rtti(a);
        assert!(rtti.is_rtti_kind());
        assert_eq!(rtti.rtti_decl(), a);

        let func = VTableComponent::make_function(graph.method(f));
        assert!(func.is_used_function_pointer_kind());
        assert_eq!(func.function_decl(), f);
        assert_eq!(func.global_decl(), GlobalDecl::method(f));

        let deleting = VTableComponent::make_deleting_dtor(graph.method(dtor));
        assert!(deleting.is_destructor_kind());
        assert_eq!(deleting.destructor_decl(), dtor);
        assert_eq!(deleting.global_decl(), GlobalDecl::dtor(dtor, DtorKind::Deleting));

        let unused = VTableComponent::make_unused_function(graph.method(f));
        assert!(unused.is_function_pointer_kind());
        assert!(!unused.is_used_function_pointer_kind());
        assert_eq!(unused.unused_function_decl(), f);
        Ok(())
    }

    #[test]
    #[should_panic(expected = "expected VCallOffset")]
    fn test_wrong_kind_accessor_panics() {
        VTableComponent::make_offset_to_top(8).vcall_offset();
    }

    #[test]
    #[should_panic(expected = "Don't use make_function with destructors!")]
    fn test_make_function_rejects_destructor() {
        let (graph, _, _, dtor) = simple().expect("graph");
        VTableComponent::make_function(graph.method(dtor));
    }

    #[test]
    #[should_panic(expected = "Offset is too big!")]
    fn test_offset_out_of_range_panics() {
        VTableComponent::make_vcall_offset(1 << 56);
    }

    #[test]
    fn test_layout_tables_and_address_points() -> Result<()> {
        let (graph, a, f, _) = simple()?;
        let components = vec![
            VTableComponent::make_offset_to_top(0),
            VTableComponent::make_rtti(a),
            VTableComponent::make_function(graph.method(f)),
            VTableComponent::make_offset_to_top(-8),
            VTableComponent::make_rtti(a),
            VTableComponent::make_function(graph.method(f)),
        ];
        let mut points = fast_hash_map_new();
        let primary = AddressPointLocation {
            vtable_index: 0,
            address_point_index: 2,
        };
        let secondary = AddressPointLocation {
            vtable_index: 1,
            address_point_index: 2,
        };
        points.insert(BaseSubobject::new(a, 0), primary);
        points.insert(BaseSubobject::new(a, 8), secondary);
        let thunk = ThunkInfo {
            this: ThisAdjustment {
                non_virtual: -8,
                vcall_offset_offset: 0,
            },
            ..ThunkInfo::default()
        };
        let layout = VTableLayout::new(vec![0, 3], components, vec![(5, thunk)], points);

        assert_eq!(layout.table_count(), 2);
        assert_eq!(layout.table_start(1), 3);
        assert_eq!(layout.table_size(0) + layout.table_size(1), layout.components().len());
        assert_eq!(layout.address_point(BaseSubobject::new(a, 8)), secondary);
        assert_eq!(layout.find_address_point(BaseSubobject::new(a, 16)), None);
        assert_eq!(layout.thunk_at(5), Some(&thunk));
        assert_eq!(layout.thunk_at(2), None);
        assert_eq!(layout.primary_virtual_method_count(), 1);

        let dump = layout.display(&graph).to_string();
        assert!(dump.contains("vtable #1 (3 entries)"));
        assert!(dump.contains("this adjustment: -8 non-virtual"));
        assert!(dump.contains("address point A at 8: vtable #1, index 2"));
        Ok(())
    }

    #[test]
    fn test_single_table_shorthand() -> Result<()> {
        let (graph, a, f, _) = simple()?;
        let layout = VTableLayout::new(
            vec![0],
            vec![VTableComponent::make_rtti(a), VTableComponent::make_function(graph.method(f))],
            Vec::new(),
            fast_hash_map_new(),
        );
        assert_eq!(layout.table_count(), 1);
        assert_eq!(layout.table_start(0), 0);
        assert_eq!(layout.table_size(0), 2);
        Ok(())
    }

    #[test]
    #[should_panic(expected = "Did not find address point")]
    fn test_missing_address_point_panics() {
        let (_, a, _, _) = simple().expect("graph");
        let layout = VTableLayout::new(Vec::new(), Vec::new(), Vec::new(), fast_hash_map_new());
        layout.address_point(BaseSubobject::new(a, 0));
    }

    #[test]
    fn test_thunks_are_sorted_and_registry_deduplicates() -> Result<()> {
        let (graph, a, f, _) = simple()?;
        let components = vec![
            VTableComponent::make_function(graph.method(f)),
            VTableComponent::make_function(graph.method(f)),
        ];
        let first = ThunkInfo {
            this: ThisAdjustment {
                non_virtual: -4,
                vcall_offset_offset: 0,
            },
            ..ThunkInfo::default()
        };
        let second = ThunkInfo {
            this: ThisAdjustment {
                non_virtual: -8,
                vcall_offset_offset: 0,
            },
            ..ThunkInfo::default()
        };
        let layout = VTableLayout::new(Vec::new(), components, vec![(1, second), (0, first)], fast_hash_map_new());
        assert_eq!(layout.thunks(), &[(0, first), (1, second)]);

        let mut registry = ThunkRegistry::default();
        registry.add(f, first);
        registry.add(f, first);
        registry.add(f, second);
        assert_eq!(registry.get(f), Some(&[first, second][..]));

        let mut other = ThunkRegistry::default();
        other.add(f, second);
        registry.merge(other);
        assert_eq!(registry.get(f).map(|t| t.len()), Some(2));
        assert!(registry.get(graph.destructor(a).expect("dtor")).is_none());
        Ok(())
    }

    #[test]
    fn test_final_overrider_in_diamond() -> Result<()> {
        // V { f } <-virtual- L { f }, R <- D
        let mut b = ClassGraphBuilder::new();
        let v = b.add_class("V", vec![])?;
        let vf = b.add_method(v, MethodSpec::virtual_method("f"))?;
        let vg = b.add_method(v, MethodSpec::virtual_method("g"))?;
        let l = b.add_class("L", vec![BaseSpec::virtual_base(v)])?;
        let lf = b.add_method(l, MethodSpec::method("f"))?;
        let r = b.add_class("R", vec![BaseSpec::virtual_base(v)])?;
        b.set_data(r, 4, 4)?;
        let d = b.add_class("D", vec![BaseSpec::direct(l), BaseSpec::direct(r)])?;
        let graph = b.finish()?;

        let records = RecordLayouts::compute(&graph, AbiKind::Itanium, AbiOptions::default());
        let overriders = FinalOverriders::new(&graph, &records, d, 0, d);
        let v_offset = records.get(d).vbase_offset(v);

        let f = overriders.get(vf, v_offset);
        assert_eq!(f.method, lf);
        assert_eq!(f.offset, 0);
        let g = overriders.get(vg, v_offset);
        assert_eq!(g.method, vg);
        assert_eq!(g.offset, v_offset);
        Ok(())
    }

    #[test]
    fn test_nearest_overridden_method_prefers_closest_base() -> Result<()> {
        let mut b = ClassGraphBuilder::new();
        let a = b.add_class("A", vec![])?;
        let af = b.add_method(a, MethodSpec::virtual_method("f"))?;
        let bb = b.add_class("B", vec![BaseSpec::direct(a)])?;
        let bf = b.add_method(bb, MethodSpec::method("f"))?;
        let c = b.add_class("C", vec![BaseSpec::direct(bb)])?;
        let cf = b.add_method(c, MethodSpec::method("f"))?;
        let graph = b.finish()?;

        assert_eq!(find_nearest_overridden_method(&graph, cf, &[a, bb]), Some(bf));
        assert_eq!(find_nearest_overridden_method(&graph, cf, &[a]), Some(af));
        assert_eq!(find_nearest_overridden_method(&graph, cf, &[]), None);
        Ok(())
    }
}
