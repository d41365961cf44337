//! Parses and validates every built-in shader variant without a GPU.

use wgpu_frame_graph::renderer::{ShaderLibrary, ShaderVariant};

fn validate(source: &str) -> Result<naga::Module, String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| err.emit_to_string(source))?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    )
    .validate(&module)
    .map_err(|err| err.emit_to_string(source))?;
    Ok(module)
}

fn entry_points(module: &naga::Module) -> Vec<(&str, naga::ShaderStage)> {
    module
        .entry_points
        .iter()
        .map(|entry| (entry.name.as_str(), entry.stage))
        .collect()
}

#[test]
fn every_variant_parses_and_validates() {
    let library = ShaderLibrary::new();
    let failures: Vec<String> = ShaderVariant::ALL
        .iter()
        .filter_map(|&variant| {
            validate(&library.source(variant))
                .err()
                .map(|err| format!("{variant:?}:\n{err}"))
        })
        .collect();
    assert!(failures.is_empty(), "{}", failures.join("\n\n"));
}

#[test]
fn variants_expose_the_entry_points_pipelines_use() {
    use naga::ShaderStage::{Compute, Fragment, Vertex};

    let library = ShaderLibrary::new();
    let expected: &[(ShaderVariant, &[(&str, naga::ShaderStage)])] = &[
        (ShaderVariant::Standard, &[("vs_main", Vertex), ("fs_main", Fragment)]),
        (ShaderVariant::TerrainPbr, &[("vs_main", Vertex), ("fs_main", Fragment)]),
        (ShaderVariant::ShadowDepth, &[("vs_main", Vertex)]),
        (
            ShaderVariant::Bloom,
            &[("vs_main", Vertex), ("fs_bright", Fragment), ("fs_blur", Fragment)],
        ),
        (ShaderVariant::TileCulling, &[("cull_lights", Compute)]),
        (ShaderVariant::ParticleUpdate, &[("update_particles", Compute)]),
        (ShaderVariant::IblPrefilter, &[("main", Compute)]),
    ];
    for (variant, entries) in expected {
        let source = library.source(*variant);
        let module = validate(&source).unwrap_or_else(|err| panic!("{variant:?}: {err}"));
        let found = entry_points(&module);
        for entry in *entries {
            assert!(found.contains(entry), "{variant:?} lacks {entry:?}");
        }
    }
}

#[test]
fn a_broken_override_is_reported() {
    let mut library = ShaderLibrary::new();
    library.set_override(ShaderVariant::Skybox, "fn vs_main( {");
    assert!(validate(&library.source(ShaderVariant::Skybox)).is_err());
}
