//! WGSL sources for every pipeline, assembled from shared chunks.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::error::RendererError;

const COMMON: &str = include_str!("../shader/common.wgsl");
const CUBE_FACES: &str = include_str!("../shader/cube_faces.wgsl");
const FRAME_BINDINGS: &str = include_str!("../shader/frame_bindings.wgsl");
const OBJECT_BINDINGS: &str = include_str!("../shader/object_bindings.wgsl");
const MATERIAL_BINDINGS: &str = include_str!("../shader/material_bindings.wgsl");
const LIGHTING: &str = include_str!("../shader/lighting.wgsl");
const MATERIAL_STANDARD: &str = include_str!("../shader/material_standard.wgsl");
const MATERIAL_PBR: &str = include_str!("../shader/material_pbr.wgsl");
const MESH_VERTEX: &str = include_str!("../shader/mesh_vertex.wgsl");
const TERRAIN_VERTEX: &str = include_str!("../shader/terrain_vertex.wgsl");
const FORWARD_FRAGMENT: &str = include_str!("../shader/forward_fragment.wgsl");
const GBUFFER_FRAGMENT: &str = include_str!("../shader/gbuffer_fragment.wgsl");
const SHADOW_DEPTH: &str = include_str!("../shader/shadow_depth.wgsl");
const POINT_SHADOW: &str = include_str!("../shader/point_shadow.wgsl");
const VSM_BLUR: &str = include_str!("../shader/vsm_blur.wgsl");
const SSAO: &str = include_str!("../shader/ssao.wgsl");
const SSAO_BLUR: &str = include_str!("../shader/ssao_blur.wgsl");
const BLOOM: &str = include_str!("../shader/bloom.wgsl");
const COMPOSITE: &str = include_str!("../shader/composite.wgsl");
const SKYBOX: &str = include_str!("../shader/skybox.wgsl");
const PARTICLE_UPDATE: &str = include_str!("../shader/particle_update.wgsl");
const PARTICLE_RENDER: &str = include_str!("../shader/particle_render.wgsl");
const TILE_CULLING: &str = include_str!("../shader/tile_culling.wgsl");
const DEBUG_OVERLAY: &str = include_str!("../shader/debug_overlay.wgsl");
const IBL_COMMON: &str = include_str!("../shader/ibl_common.wgsl");
const IBL_EQUIRECT: &str = include_str!("../shader/ibl_equirect.wgsl");
const IBL_IRRADIANCE: &str = include_str!("../shader/ibl_irradiance.wgsl");
const IBL_PREFILTER: &str = include_str!("../shader/ibl_prefilter.wgsl");
const IBL_BRDF: &str = include_str!("../shader/ibl_brdf.wgsl");
const BLIT: &str = include_str!("../shader/blit.wgsl");

/// Every shader program the renderer compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderVariant {
    Standard,
    Pbr,
    TerrainStandard,
    TerrainPbr,
    GeometryPrepass,
    TerrainPrepass,
    ShadowDepth,
    PointShadowMoments,
    VsmBlur,
    Ssao,
    SsaoBlur,
    Bloom,
    Composite,
    Skybox,
    ParticleUpdate,
    ParticleRender,
    TileCulling,
    DebugOverlay,
    IblEquirectToCube,
    IblIrradiance,
    IblPrefilter,
    IblBrdfLut,
    Mipmap,
}

impl ShaderVariant {
    pub const ALL: [ShaderVariant; 23] = [
        ShaderVariant::Standard,
        ShaderVariant::Pbr,
        ShaderVariant::TerrainStandard,
        ShaderVariant::TerrainPbr,
        ShaderVariant::GeometryPrepass,
        ShaderVariant::TerrainPrepass,
        ShaderVariant::ShadowDepth,
        ShaderVariant::PointShadowMoments,
        ShaderVariant::VsmBlur,
        ShaderVariant::Ssao,
        ShaderVariant::SsaoBlur,
        ShaderVariant::Bloom,
        ShaderVariant::Composite,
        ShaderVariant::Skybox,
        ShaderVariant::ParticleUpdate,
        ShaderVariant::ParticleRender,
        ShaderVariant::TileCulling,
        ShaderVariant::DebugOverlay,
        ShaderVariant::IblEquirectToCube,
        ShaderVariant::IblIrradiance,
        ShaderVariant::IblPrefilter,
        ShaderVariant::IblBrdfLut,
        ShaderVariant::Mipmap,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ShaderVariant::Standard => "StandardShader",
            ShaderVariant::Pbr => "PbrShader",
            ShaderVariant::TerrainStandard => "TerrainStandardShader",
            ShaderVariant::TerrainPbr => "TerrainPbrShader",
            ShaderVariant::GeometryPrepass => "GeometryPrepassShader",
            ShaderVariant::TerrainPrepass => "TerrainPrepassShader",
            ShaderVariant::ShadowDepth => "ShadowDepthShader",
            ShaderVariant::PointShadowMoments => "PointShadowMomentsShader",
            ShaderVariant::VsmBlur => "VsmBlurShader",
            ShaderVariant::Ssao => "SsaoShader",
            ShaderVariant::SsaoBlur => "SsaoBlurShader",
            ShaderVariant::Bloom => "BloomShader",
            ShaderVariant::Composite => "CompositeShader",
            ShaderVariant::Skybox => "SkyboxShader",
            ShaderVariant::ParticleUpdate => "ParticleUpdateShader",
            ShaderVariant::ParticleRender => "ParticleRenderShader",
            ShaderVariant::TileCulling => "TileCullingShader",
            ShaderVariant::DebugOverlay => "DebugOverlayShader",
            ShaderVariant::IblEquirectToCube => "IblEquirectToCubeShader",
            ShaderVariant::IblIrradiance => "IblIrradianceShader",
            ShaderVariant::IblPrefilter => "IblPrefilterShader",
            ShaderVariant::IblBrdfLut => "IblBrdfLutShader",
            ShaderVariant::Mipmap => "MipmapShader",
        }
    }

    /// Chunks concatenated, in order, to form the built-in source.
    fn chunks(self) -> &'static [&'static str] {
        match self {
            ShaderVariant::Standard => &[
                COMMON,
                CUBE_FACES,
                FRAME_BINDINGS,
                OBJECT_BINDINGS,
                MATERIAL_BINDINGS,
                LIGHTING,
                MATERIAL_STANDARD,
                MESH_VERTEX,
                FORWARD_FRAGMENT,
            ],
            ShaderVariant::Pbr => &[
                COMMON,
                CUBE_FACES,
                FRAME_BINDINGS,
                OBJECT_BINDINGS,
                MATERIAL_BINDINGS,
                LIGHTING,
                MATERIAL_PBR,
                MESH_VERTEX,
                FORWARD_FRAGMENT,
            ],
            ShaderVariant::TerrainStandard => &[
                COMMON,
                CUBE_FACES,
                FRAME_BINDINGS,
                OBJECT_BINDINGS,
                MATERIAL_BINDINGS,
                LIGHTING,
                MATERIAL_STANDARD,
                TERRAIN_VERTEX,
                FORWARD_FRAGMENT,
            ],
            ShaderVariant::TerrainPbr => &[
                COMMON,
                CUBE_FACES,
                FRAME_BINDINGS,
                OBJECT_BINDINGS,
                MATERIAL_BINDINGS,
                LIGHTING,
                MATERIAL_PBR,
                TERRAIN_VERTEX,
                FORWARD_FRAGMENT,
            ],
            ShaderVariant::GeometryPrepass => &[
                COMMON,
                FRAME_BINDINGS,
                OBJECT_BINDINGS,
                MATERIAL_BINDINGS,
                MESH_VERTEX,
                GBUFFER_FRAGMENT,
            ],
            ShaderVariant::TerrainPrepass => &[
                COMMON,
                FRAME_BINDINGS,
                OBJECT_BINDINGS,
                MATERIAL_BINDINGS,
                TERRAIN_VERTEX,
                GBUFFER_FRAGMENT,
            ],
            ShaderVariant::ShadowDepth => &[COMMON, OBJECT_BINDINGS, SHADOW_DEPTH],
            ShaderVariant::PointShadowMoments => &[COMMON, OBJECT_BINDINGS, POINT_SHADOW],
            ShaderVariant::VsmBlur => &[COMMON, CUBE_FACES, VSM_BLUR],
            ShaderVariant::Ssao => &[COMMON, FRAME_BINDINGS, SSAO],
            ShaderVariant::SsaoBlur => &[COMMON, SSAO_BLUR],
            ShaderVariant::Bloom => &[COMMON, BLOOM],
            ShaderVariant::Composite => &[COMMON, COMPOSITE],
            ShaderVariant::Skybox => &[COMMON, FRAME_BINDINGS, SKYBOX],
            ShaderVariant::ParticleUpdate => &[COMMON, PARTICLE_UPDATE],
            ShaderVariant::ParticleRender => &[COMMON, FRAME_BINDINGS, PARTICLE_RENDER],
            ShaderVariant::TileCulling => &[COMMON, TILE_CULLING],
            ShaderVariant::DebugOverlay => &[COMMON, FRAME_BINDINGS, DEBUG_OVERLAY],
            ShaderVariant::IblEquirectToCube => &[COMMON, IBL_COMMON, IBL_EQUIRECT],
            ShaderVariant::IblIrradiance => &[COMMON, IBL_COMMON, IBL_IRRADIANCE],
            ShaderVariant::IblPrefilter => &[COMMON, IBL_COMMON, IBL_PREFILTER],
            ShaderVariant::IblBrdfLut => &[COMMON, IBL_COMMON, IBL_BRDF],
            ShaderVariant::Mipmap => &[BLIT],
        }
    }
}

/// Supplies shader source per variant. Built-in sources can be replaced
/// with [`ShaderLibrary::set_override`], e.g. for hot-reload experiments.
#[derive(Debug, Clone, Default)]
pub struct ShaderLibrary {
    overrides: HashMap<ShaderVariant, String>,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_override(&mut self, variant: ShaderVariant, source: impl Into<String>) {
        self.overrides.insert(variant, source.into());
    }

    pub fn clear_override(&mut self, variant: ShaderVariant) {
        self.overrides.remove(&variant);
    }

    pub fn source(&self, variant: ShaderVariant) -> Cow<'_, str> {
        match self.overrides.get(&variant) {
            Some(source) => Cow::Borrowed(source.as_str()),
            None => Cow::Owned(variant.chunks().join("\n")),
        }
    }

    /// Compiles `variant`. Validation failures are returned instead of
    /// reaching the device's uncaptured error handler.
    pub fn module(
        &self,
        device: &wgpu::Device,
        variant: ShaderVariant,
    ) -> Result<wgpu::ShaderModule, RendererError> {
        let source = self.source(variant);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(variant.label()),
            source: wgpu::ShaderSource::Wgsl(source),
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            log::error!("{} failed to compile: {}", variant.label(), error);
            return Err(RendererError::Shader {
                variant,
                message: error.to_string(),
            });
        }
        log::debug!("Compiled {}", variant.label());
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_source() {
        let library = ShaderLibrary::new();
        for variant in ShaderVariant::ALL {
            assert!(!library.source(variant).trim().is_empty(), "{variant:?}");
        }
    }

    #[test]
    fn overrides_replace_built_in_source() {
        let mut library = ShaderLibrary::new();
        library.set_override(ShaderVariant::Skybox, "// custom");
        assert_eq!(library.source(ShaderVariant::Skybox), "// custom");
        library.clear_override(ShaderVariant::Skybox);
        assert!(library.source(ShaderVariant::Skybox).contains("fn vs_main"));
    }

    #[test]
    fn forward_variants_share_lighting() {
        let library = ShaderLibrary::new();
        for variant in [
            ShaderVariant::Standard,
            ShaderVariant::Pbr,
            ShaderVariant::TerrainStandard,
            ShaderVariant::TerrainPbr,
        ] {
            let source = library.source(variant);
            assert!(source.contains("fn shade_point_lights"), "{variant:?}");
            assert!(source.contains("fn surface_color"), "{variant:?}");
        }
    }

    #[test]
    fn labels_are_unique() {
        let mut labels: Vec<_> = ShaderVariant::ALL.iter().map(|v| v.label()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), ShaderVariant::ALL.len());
    }
}
