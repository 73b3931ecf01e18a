use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::Lazy;
use tempfile::tempdir;
use tracing_subscriber::EnvFilter;
use vtlayout_core::decl::HierarchySpec;
use vtlayout_core::itanium::ItaniumVTableContext;
use vtlayout_core::microsoft::MicrosoftVTableContext;
use vtlayout_core::vtable::{DtorKind, GlobalDecl, VTableContext};
use vtlayout_core::{AbiKind, AbiOptions, LayoutConfig, vtable_context};

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn test_multiple_inheritance_fixture() -> Result<()> {
    Lazy::force(&TRACING);
    let config = LayoutConfig::from_file(&fixture("multiple.toml"))?;
    assert_eq!(config.abi, AbiKind::Itanium);
    let graph = config.graph()?;
    let c = graph.lookup("C").expect("C is declared");
    let cf = graph.find_method(c, "f").expect("C::f");
    let cg = graph.find_method(c, "g").expect("C::g");

    let mut itanium = ItaniumVTableContext::new(&graph, config.options);
    let layout = itanium.vtable_layout(c);
    assert_eq!(layout.table_count(), 2);
    assert_eq!(layout.components().len(), 7);
    assert_eq!(itanium.method_vtable_index(GlobalDecl::method(cf)), 0);
    assert_eq!(itanium.method_vtable_index(GlobalDecl::method(cg)), 1);

    let mut microsoft = MicrosoftVTableContext::new(&graph, config.options);
    let offsets: Vec<i64> = microsoft.vfptr_offsets(c).iter().map(|p| p.full_offset_in_mdc).collect();
    assert_eq!(offsets, vec![0, 16]);
    assert_eq!(microsoft.method_vftable_location(GlobalDecl::method(cg)).vfptr_offset, 16);
    Ok(())
}

#[test]
fn test_factory_dispatches_on_abi() -> Result<()> {
    Lazy::force(&TRACING);
    let config = LayoutConfig::from_file(&fixture("multiple.toml"))?;
    let graph = config.graph()?;
    let cg = graph
        .find_method(graph.lookup("C").expect("C"), "g")
        .expect("C::g");

    let mut itanium = vtable_context(&graph, AbiKind::Itanium, config.options);
    assert_eq!(itanium.abi(), AbiKind::Itanium);
    let thunks = itanium.thunk_info(GlobalDecl::method(cg)).expect("C::g is reached through B");
    assert_eq!(thunks[0].this.non_virtual, -16);

    // The overrider already expects `this` at B.
    let mut microsoft = vtable_context(&graph, AbiKind::Microsoft, config.options);
    assert_eq!(microsoft.abi(), AbiKind::Microsoft);
    assert!(microsoft.thunk_info(GlobalDecl::method(cg)).is_none());
    Ok(())
}

#[test]
fn test_virtual_diamond_fixture() -> Result<()> {
    Lazy::force(&TRACING);
    let config = LayoutConfig::from_file(&fixture("virtual_diamond.toml"))?;
    assert_eq!(config.abi, AbiKind::Microsoft);
    assert_eq!(config.options, AbiOptions::default());
    let graph = config.graph()?;
    let v = graph.lookup("V").expect("V");
    let l = graph.lookup("L").expect("L");
    let d = graph.lookup("D").expect("D");
    let dtor = graph.destructor(d).expect("D has a destructor");

    let mut microsoft = MicrosoftVTableContext::new(&graph, config.options);
    // Only V owns a vfptr; R's path through V is a duplicate.
    let paths = microsoft.vfptr_offsets(d).to_vec();
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].full_offset_in_mdc, 32);
    let location = microsoft.method_vftable_location(GlobalDecl::dtor(dtor, DtorKind::Deleting));
    assert_eq!(location.vbase, Some(v));
    assert_eq!(location.vbtable_index, 1);

    let vbtables = microsoft.enumerate_vbtables(d).to_vec();
    assert_eq!(vbtables.len(), 2);
    assert_eq!(microsoft.vbtable_offsets(d, &vbtables[0]), vec![0, 32]);
    assert_eq!(microsoft.vbtable_offsets(d, &vbtables[1]), vec![0, 16]);

    let mut itanium = ItaniumVTableContext::new(&graph, config.options);
    assert_eq!(itanium.method_vtable_index(GlobalDecl::dtor(dtor, DtorKind::Complete)), 1);
    assert_eq!(itanium.method_vtable_index(GlobalDecl::dtor(dtor, DtorKind::Deleting)), 2);
    assert_eq!(itanium.virtual_base_offset_offset(d, v), -24);
    assert_eq!(itanium.virtual_base_offset_offset(l, v), -24);
    Ok(())
}

#[test]
fn test_config_from_temp_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("layout.toml");
    fs::write(
        &path,
        r#"
            abi = "microsoft"

            [options]
            pointer_width = 4
            rtti_data = false

            [[class]]
            name = "A"
            [[class.method]]
            name = "f"
            virtual = true
        "#,
    )?;
    let config = LayoutConfig::from_file(&path)?;
    assert_eq!(config.options.pointer_width, 4);
    assert!(!config.options.rtti_data);

    let graph = config.graph()?;
    let a = graph.lookup("A").expect("A");
    let mut ctx = MicrosoftVTableContext::new(&graph, config.options);
    assert_eq!(ctx.vftable_layout(a, 0).components().len(), 1);
    assert_eq!(ctx.records().get(a).size, 4);
    Ok(())
}

#[test]
fn test_config_rejects_bad_pointer_width() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[options]\npointer_width = 2\n")?;
    let err = LayoutConfig::from_file(&path).expect_err("pointer width 2 is unsupported");
    assert!(format!("{:#}", err).contains("unsupported pointer width 2"));
    Ok(())
}

#[test]
fn test_hierarchy_loads_from_json() -> Result<()> {
    let spec: HierarchySpec = serde_json::from_str(
        r#"{
            "class": [
                { "name": "A", "method": [{ "name": "f", "virtual": true }] },
                { "name": "B", "bases": [{ "name": "A", "virtual": true }] }
            ]
        }"#,
    )?;
    let from_toml = HierarchySpec::from_toml_str(
        r#"
            [[class]]
            name = "A"
            [[class.method]]
            name = "f"
            virtual = true

            [[class]]
            name = "B"
            bases = [{ name = "A", virtual = true }]
        "#,
    )?;

    let json_graph = spec.to_graph()?;
    let toml_graph = from_toml.to_graph()?;
    let b = json_graph.lookup("B").expect("B");
    assert_eq!(json_graph.class(b).vbases, toml_graph.class(b).vbases);

    let mut json_ctx = ItaniumVTableContext::new(&json_graph, AbiOptions::default());
    let mut toml_ctx = ItaniumVTableContext::new(&toml_graph, AbiOptions::default());
    assert_eq!(
        json_ctx.vtable_layout(b).components().len(),
        toml_ctx.vtable_layout(b).components().len()
    );
    Ok(())
}
