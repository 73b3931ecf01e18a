#[cfg(test)]
mod tests {
    use crate::config::AbiOptions;
    use crate::decl::{BaseSpec, ClassGraph, ClassGraphBuilder, ClassId, MethodId, MethodSpec};
    use crate::microsoft::{MethodVFTableLocation, MicrosoftVTableContext};
    use crate::vtable::{BaseSubobject, DtorKind, GlobalDecl, VTableComponent, VTableContext};
    use anyhow::Result;

    struct Multiple {
        graph: ClassGraph,
        a: ClassId,
        b: ClassId,
        c: ClassId,
        af: MethodId,
        bg: MethodId,
        cg: MethodId,
        ch: MethodId,
    }

    /// A { f } and B { g }, each with 4 bytes of data, under C { g, h }.
    fn multiple() -> Result<Multiple> {
        let mut b = ClassGraphBuilder::new();
        let a = b.add_class("A", vec![])?;
        b.set_data(a, 4, 4)?;
        let af = b.add_method(a, MethodSpec::virtual_method("f"))?;
        let bb = b.add_class("B", vec![])?;
        b.set_data(bb, 4, 4)?;
        let bg = b.add_method(bb, MethodSpec::virtual_method("g"))?;
        let c = b.add_class("C", vec![BaseSpec::direct(a), BaseSpec::direct(bb)])?;
        let cg = b.add_method(c, MethodSpec::method("g"))?;
        let ch = b.add_method(c, MethodSpec::virtual_method("h"))?;
        Ok(Multiple {
            graph: b.finish()?,
            a,
            b: bb,
            c,
            af,
            bg,
            cg,
            ch,
        })
    }

    fn no_rtti() -> AbiOptions {
        AbiOptions {
            rtti_data: false,
            ..AbiOptions::default()
        }
    }

    #[test]
    fn test_unrelated_bases_get_separate_vftables() -> Result<()> {
        let Multiple {
            graph, a, b, c, af, cg, ch, ..
        } = multiple()?;
        let mut ctx = MicrosoftVTableContext::new(&graph, no_rtti());

        let offsets: Vec<i64> = ctx.vfptr_offsets(c).iter().map(|p| p.full_offset_in_mdc).collect();
        assert_eq!(offsets, vec![0, 16]);
        let introducing: Vec<ClassId> = ctx.vfptr_offsets(c).iter().map(|p| p.introducing_object).collect();
        assert_eq!(introducing, vec![a, b]);

        let primary = ctx.vftable_layout(c, 0).clone();
        assert_eq!(
            primary.components(),
            &[VTableComponent::FunctionPointer(af), VTableComponent::FunctionPointer(ch)]
        );
        assert_eq!(primary.address_point(BaseSubobject::new(c, 0)).address_point_index, 0);
        assert_eq!(primary.address_point(BaseSubobject::new(a, 0)).address_point_index, 0);

        let secondary = ctx.vftable_layout(c, 16).clone();
        // The overrider expects `this` to point at B, so the slot needs no thunk.
        assert_eq!(secondary.components(), &[VTableComponent::FunctionPointer(cg)]);
        assert!(secondary.thunks().is_empty());
        assert!(ctx.thunk_info(GlobalDecl::method(cg)).is_none());
        assert_eq!(ctx.computation_count(), 1);
        Ok(())
    }

    #[test]
    fn test_method_locations() -> Result<()> {
        let Multiple {
            graph, cg, ch, af, bg, ..
        } = multiple()?;
        let mut ctx = MicrosoftVTableContext::new(&graph, AbiOptions::default());

        assert_eq!(
            ctx.method_vftable_location(GlobalDecl::method(ch)),
            MethodVFTableLocation {
                vbtable_index: 0,
                vbase: None,
                vfptr_offset: 0,
                index: 1,
            }
        );
        assert_eq!(
            ctx.method_vftable_location(GlobalDecl::method(cg)),
            MethodVFTableLocation {
                vbtable_index: 0,
                vbase: None,
                vfptr_offset: 16,
                index: 0,
            }
        );
        assert_eq!(ctx.method_vftable_location(GlobalDecl::method(af)).index, 0);
        // Locations are recorded by the declaring class.
        assert_eq!(ctx.method_vftable_location(GlobalDecl::method(bg)).vfptr_offset, 0);
        assert_eq!(ctx.computation_count(), 3);
        Ok(())
    }

    #[test]
    fn test_rtti_slot_follows_options() -> Result<()> {
        let Multiple { graph, c, af, ch, .. } = multiple()?;

        let mut with_rtti = MicrosoftVTableContext::new(&graph, AbiOptions::default());
        let layout = with_rtti.vftable_layout(c, 0).clone();
        assert_eq!(
            layout.components(),
            &[
                VTableComponent::Rtti(c),
                VTableComponent::FunctionPointer(af),
                VTableComponent::FunctionPointer(ch),
            ]
        );
        assert_eq!(layout.address_point(BaseSubobject::new(c, 0)).address_point_index, 1);
        // Slot indices never count the RTTI slot.
        assert_eq!(with_rtti.method_vftable_location(GlobalDecl::method(ch)).index, 1);

        let mut without = MicrosoftVTableContext::new(&graph, no_rtti());
        assert_eq!(without.vftable_layout(c, 0).components().len(), 2);
        assert_eq!(without.method_vftable_location(GlobalDecl::method(ch)).index, 1);
        Ok(())
    }

    #[test]
    fn test_deleting_destructor_slot() -> Result<()> {
        let mut b = ClassGraphBuilder::new();
        let a = b.add_class("A", vec![])?;
        let dtor = b.add_method(a, MethodSpec::virtual_destructor())?;
        let f = b.add_method(a, MethodSpec::virtual_method("f"))?;
        let graph = b.finish()?;
        let mut ctx = MicrosoftVTableContext::new(&graph, no_rtti());

        assert_eq!(
            ctx.vftable_layout(a, 0).components(),
            &[VTableComponent::DeletingDtorPointer(dtor), VTableComponent::FunctionPointer(f)]
        );
        assert_eq!(
            ctx.method_vftable_location(GlobalDecl::dtor(dtor, DtorKind::Deleting)).index,
            0
        );
        assert_eq!(ctx.method_vftable_location(GlobalDecl::method(f)).index, 1);
        assert!(ctx.thunk_info(GlobalDecl::dtor(dtor, DtorKind::Complete)).is_none());
        Ok(())
    }

    #[test]
    fn test_overloads_grouped_and_reversed() -> Result<()> {
        let mut b = ClassGraphBuilder::new();
        let a = b.add_class("A", vec![])?;
        let f_int = b.add_method(a, MethodSpec::virtual_method("f").params(["int"]))?;
        let g = b.add_method(a, MethodSpec::virtual_method("g"))?;
        let f_double = b.add_method(a, MethodSpec::virtual_method("f").params(["double"]))?;
        let graph = b.finish()?;
        let mut ctx = MicrosoftVTableContext::new(&graph, no_rtti());

        assert_eq!(
            ctx.vftable_layout(a, 0).components(),
            &[
                VTableComponent::FunctionPointer(f_double),
                VTableComponent::FunctionPointer(f_int),
                VTableComponent::FunctionPointer(g),
            ]
        );
        Ok(())
    }

    struct SameIntroducer {
        graph: ClassGraph,
        a: ClassId,
        b: ClassId,
        c: ClassId,
        d: ClassId,
        df: MethodId,
    }

    /// B and C both derive from A { f }; D : B, C overrides f.
    fn same_introducer() -> Result<SameIntroducer> {
        let mut b = ClassGraphBuilder::new();
        let a = b.add_class("A", vec![])?;
        b.add_method(a, MethodSpec::virtual_method("f"))?;
        let bb = b.add_class("B", vec![BaseSpec::direct(a)])?;
        let c = b.add_class("C", vec![BaseSpec::direct(a)])?;
        let d = b.add_class("D", vec![BaseSpec::direct(bb), BaseSpec::direct(c)])?;
        let df = b.add_method(d, MethodSpec::method("f"))?;
        Ok(SameIntroducer {
            graph: b.finish()?,
            a,
            b: bb,
            c,
            d,
            df,
        })
    }

    #[test]
    fn test_same_introducer_paths_are_mangled_apart() -> Result<()> {
        let SameIntroducer { graph, a, b, c, d, .. } = same_introducer()?;
        let mut ctx = MicrosoftVTableContext::new(&graph, no_rtti());

        let paths = ctx.vfptr_offsets(d).to_vec();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].full_offset_in_mdc, 0);
        assert_eq!(paths[1].full_offset_in_mdc, 8);
        assert_eq!(paths[0].introducing_object, a);
        assert_eq!(paths[1].introducing_object, a);
        assert_eq!(paths[0].mangled_path, vec![b]);
        assert_eq!(paths[1].mangled_path, vec![c]);
        Ok(())
    }

    #[test]
    fn test_every_subobject_sharing_vfptr_has_address_point() -> Result<()> {
        let SameIntroducer { graph, a, b, c, d, .. } = same_introducer()?;
        let mut ctx = MicrosoftVTableContext::new(&graph, no_rtti());

        let primary = ctx.vftable_layout(d, 0).clone();
        for class in [d, b, a] {
            assert_eq!(primary.address_point(BaseSubobject::new(class, 0)).address_point_index, 0);
        }
        assert_eq!(primary.find_address_point(BaseSubobject::new(c, 8)), None);

        let secondary = ctx.vftable_layout(d, 8).clone();
        for class in [c, a] {
            assert_eq!(secondary.address_point(BaseSubobject::new(class, 8)).address_point_index, 0);
        }
        assert_eq!(secondary.find_address_point(BaseSubobject::new(b, 0)), None);
        Ok(())
    }

    #[test]
    fn test_secondary_vftable_adjusts_this() -> Result<()> {
        let SameIntroducer { graph, d, df, .. } = same_introducer()?;
        let mut ctx = MicrosoftVTableContext::new(&graph, no_rtti());

        let primary = ctx.vftable_layout(d, 0).clone();
        assert_eq!(primary.components(), &[VTableComponent::FunctionPointer(df)]);
        assert!(primary.thunks().is_empty());

        let secondary = ctx.vftable_layout(d, 8).clone();
        assert_eq!(secondary.components(), &[VTableComponent::FunctionPointer(df)]);
        let thunk = secondary.thunk_at(0).expect("D::f is entered through C");
        assert_eq!(thunk.this.non_virtual, -8);
        assert!(thunk.ret.is_empty());

        let thunks = ctx.thunk_info(GlobalDecl::method(df)).expect("D::f has a thunk");
        assert_eq!(thunks.len(), 1);
        assert_eq!(thunks[0].this.non_virtual, -8);
        assert_eq!(ctx.method_vftable_location(GlobalDecl::method(df)).vfptr_offset, 0);
        Ok(())
    }

    #[test]
    fn test_covariant_override_chain_takes_extra_slots() -> Result<()> {
        // Q : P2, P puts P at offset 8, so returning Q where P is expected needs +8.
        let mut b = ClassGraphBuilder::new();
        let p = b.add_class("P", vec![])?;
        b.set_data(p, 8, 8)?;
        let p2 = b.add_class("P2", vec![])?;
        b.set_data(p2, 8, 8)?;
        let q = b.add_class("Q", vec![BaseSpec::direct(p2), BaseSpec::direct(p)])?;
        let a = b.add_class("A", vec![])?;
        let aget = b.add_method(a, MethodSpec::virtual_method("get").returns(p))?;
        let bb = b.add_class("B", vec![BaseSpec::direct(a)])?;
        let bget = b.add_method(bb, MethodSpec::method("get").returns(q))?;
        let c = b.add_class("C", vec![BaseSpec::direct(bb)])?;
        let cget = b.add_method(c, MethodSpec::method("get").returns(q))?;
        let graph = b.finish()?;
        let mut ctx = MicrosoftVTableContext::new(&graph, no_rtti());

        let layout = ctx.vftable_layout(bb, 0).clone();
        assert_eq!(
            layout.components(),
            &[VTableComponent::FunctionPointer(bget), VTableComponent::FunctionPointer(bget)]
        );
        let thunk = layout.thunk_at(0).expect("A's slot adjusts the return value");
        assert_eq!(thunk.ret.non_virtual, 8);
        assert_eq!(thunk.method, Some(aget));
        assert!(layout.thunk_at(1).is_none());
        assert_eq!(ctx.method_vftable_location(GlobalDecl::method(bget)).index, 1);

        // C::get returns the same type as B::get, yet still needs its own slot.
        let layout = ctx.vftable_layout(c, 0).clone();
        assert_eq!(layout.components(), &[VTableComponent::FunctionPointer(cget); 3]);
        assert_eq!(layout.thunk_at(0).map(|t| t.ret.non_virtual), Some(8));
        let through_b = layout.thunk_at(1).expect("B's slot is named after B::get");
        assert!(through_b.ret.is_empty());
        assert_eq!(through_b.method, Some(bget));
        assert!(layout.thunk_at(2).is_none());
        assert_eq!(ctx.method_vftable_location(GlobalDecl::method(cget)).index, 2);
        Ok(())
    }

    #[test]
    fn test_vbtable_indices_start_at_one() -> Result<()> {
        let mut b = ClassGraphBuilder::new();
        let v1 = b.add_class("V1", vec![])?;
        b.set_data(v1, 4, 4)?;
        let v2 = b.add_class("V2", vec![])?;
        b.set_data(v2, 4, 4)?;
        let e = b.add_class("E", vec![BaseSpec::virtual_base(v1), BaseSpec::virtual_base(v2)])?;
        let v3 = b.add_class("V3", vec![])?;
        b.set_data(v3, 4, 4)?;
        let f = b.add_class("F", vec![BaseSpec::direct(e), BaseSpec::virtual_base(v3)])?;
        let graph = b.finish()?;
        let mut ctx = MicrosoftVTableContext::new(&graph, AbiOptions::default());

        assert_eq!(ctx.vbtable_index(e, v1), 1);
        assert_eq!(ctx.vbtable_index(e, v2), 2);
        // F shares E's vbptr, so E's indices carry over.
        assert_eq!(ctx.vbtable_index(f, v1), 1);
        assert_eq!(ctx.vbtable_index(f, v2), 2);
        assert_eq!(ctx.vbtable_index(f, v3), 3);
        assert_eq!(ctx.enumerate_vbtables(f).len(), 1);
        Ok(())
    }

    #[test]
    fn test_vbtable_offsets_in_diamond() -> Result<()> {
        let mut b = ClassGraphBuilder::new();
        let v = b.add_class("V", vec![])?;
        b.set_data(v, 4, 4)?;
        let l = b.add_class("L", vec![BaseSpec::virtual_base(v)])?;
        b.set_data(l, 4, 4)?;
        let r = b.add_class("R", vec![BaseSpec::virtual_base(v)])?;
        b.set_data(r, 4, 4)?;
        let d = b.add_class("D", vec![BaseSpec::direct(l), BaseSpec::direct(r)])?;
        let graph = b.finish()?;
        let mut ctx = MicrosoftVTableContext::new(&graph, AbiOptions::default());

        let own = ctx.enumerate_vbtables(l).to_vec();
        assert_eq!(own.len(), 1);
        assert_eq!(ctx.vbtable_offsets(l, &own[0]), vec![0, 12]);

        let vbtables = ctx.enumerate_vbtables(d).to_vec();
        assert_eq!(vbtables.len(), 2);
        assert_eq!(vbtables[0].object_with_vptr, d);
        assert_eq!(vbtables[0].introducing_object, l);
        assert_eq!(vbtables[1].introducing_object, r);
        assert_eq!(vbtables[1].non_virtual_offset, 16);
        assert_eq!(ctx.vbtable_offsets(d, &vbtables[0]), vec![0, 28]);
        assert_eq!(ctx.vbtable_offsets(d, &vbtables[1]), vec![0, 12]);
        assert_eq!(ctx.vbtable_index(d, v), 1);
        Ok(())
    }

    #[test]
    fn test_method_in_virtual_base_records_vbase() -> Result<()> {
        let mut b = ClassGraphBuilder::new();
        let v = b.add_class("V", vec![])?;
        b.add_method(v, MethodSpec::virtual_method("f"))?;
        let derived = b.add_class("B", vec![BaseSpec::virtual_base(v)])?;
        let bf = b.add_method(derived, MethodSpec::method("f"))?;
        let graph = b.finish()?;
        let mut ctx = MicrosoftVTableContext::new(&graph, AbiOptions::default());

        let paths = ctx.vfptr_offsets(derived).to_vec();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].vbase_with_vptr(), Some(v));

        let location = ctx.method_vftable_location(GlobalDecl::method(bf));
        assert_eq!(location.vbtable_index, 1);
        assert_eq!(location.vbase, Some(v));
        assert_eq!(location.vfptr_offset, 0);
        assert_eq!(location.index, 0);
        Ok(())
    }

    #[test]
    fn test_locations_sort_by_vbtable_then_offset() {
        let near = MethodVFTableLocation {
            vbtable_index: 0,
            vbase: None,
            vfptr_offset: 16,
            index: 3,
        };
        let far = MethodVFTableLocation {
            vbtable_index: 1,
            vbase: None,
            vfptr_offset: 0,
            index: 0,
        };
        let first = MethodVFTableLocation {
            vfptr_offset: 0,
            ..near
        };
        assert!(near < far);
        assert!(first < near);
    }

    #[test]
    #[should_panic(expected = "Couldn't find a VFTable at offset")]
    fn test_missing_vftable_panics() {
        let Multiple { graph, c, .. } = multiple().expect("graph");
        let mut ctx = MicrosoftVTableContext::new(&graph, AbiOptions::default());
        ctx.vftable_layout(c, 8);
    }
}
