use bitflags::bitflags;
use glam::Vec4;

use crate::asset::TextureHandle;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MaterialFlags: u32 {
        const BASE_COLOR_MAP = 1 << 0;
        const NORMAL_MAP = 1 << 1;
        /// Specular map for classic materials, metallic map for PBR.
        const SPECULAR_MAP = 1 << 2;
        const ROUGHNESS_MAP = 1 << 3;
        const OCCLUSION_MAP = 1 << 4;
        const HEIGHT_MAP = 1 << 5;
        const UNLIT = 1 << 6;
    }
}

/// Number of texture slots in the material bind group.
pub const MATERIAL_TEXTURE_SLOTS: usize = 6;

/// Texture slot meaning, in bind group order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSlot {
    BaseColor = 0,
    Normal = 1,
    SpecularOrMetallic = 2,
    Roughness = 3,
    Occlusion = 4,
    Height = 5,
}

/// Blinn-Phong material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassicMaterial {
    pub diffuse: Option<TextureHandle>,
    pub normal: Option<TextureHandle>,
    pub specular: Option<TextureHandle>,
    pub base_color: Vec4,
    pub specular_strength: f32,
    pub shininess: f32,
    pub flags: MaterialFlags,
}

impl Default for ClassicMaterial {
    fn default() -> Self {
        Self {
            diffuse: None,
            normal: None,
            specular: None,
            base_color: Vec4::ONE,
            specular_strength: 0.5,
            shininess: 32.0,
            flags: MaterialFlags::empty(),
        }
    }
}

/// Metallic-roughness material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PbrMaterial {
    pub albedo: Option<TextureHandle>,
    pub normal: Option<TextureHandle>,
    pub metallic: Option<TextureHandle>,
    pub roughness: Option<TextureHandle>,
    pub ao: Option<TextureHandle>,
    pub height: Option<TextureHandle>,
    pub base_color: Vec4,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub ao_strength: f32,
    pub height_scale: f32,
    pub flags: MaterialFlags,
}

impl Default for PbrMaterial {
    fn default() -> Self {
        Self {
            albedo: None,
            normal: None,
            metallic: None,
            roughness: None,
            ao: None,
            height: None,
            base_color: Vec4::ONE,
            metallic_factor: 0.0,
            roughness_factor: 0.5,
            ao_strength: 1.0,
            height_scale: 1.0,
            flags: MaterialFlags::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Material {
    Classic(ClassicMaterial),
    Pbr(PbrMaterial),
}

impl Material {
    pub fn is_pbr(&self) -> bool {
        matches!(self, Material::Pbr(_))
    }

    pub fn textures(&self) -> [Option<TextureHandle>; MATERIAL_TEXTURE_SLOTS] {
        match self {
            Material::Classic(m) => [m.diffuse, m.normal, m.specular, None, None, None],
            Material::Pbr(m) => [m.albedo, m.normal, m.metallic, m.roughness, m.ao, m.height],
        }
    }

    /// User flags plus one bit per bound texture slot.
    pub fn flags(&self) -> MaterialFlags {
        let user = match self {
            Material::Classic(m) => m.flags,
            Material::Pbr(m) => m.flags,
        };
        let slot_bits = [
            MaterialFlags::BASE_COLOR_MAP,
            MaterialFlags::NORMAL_MAP,
            MaterialFlags::SPECULAR_MAP,
            MaterialFlags::ROUGHNESS_MAP,
            MaterialFlags::OCCLUSION_MAP,
            MaterialFlags::HEIGHT_MAP,
        ];
        self.textures()
            .iter()
            .zip(slot_bits)
            .filter(|(texture, _)| texture.is_some())
            .fold(user, |flags, (_, bit)| flags | bit)
    }

    pub fn base_color(&self) -> Vec4 {
        match self {
            Material::Classic(m) => m.base_color,
            Material::Pbr(m) => m.base_color,
        }
    }

    /// Scalar factors as laid out in the object buffer.
    pub fn params(&self) -> [f32; 4] {
        match self {
            Material::Classic(m) => [m.specular_strength, m.shininess.max(1.0), 0.0, 0.0],
            Material::Pbr(m) => [
                m.metallic_factor.clamp(0.0, 1.0),
                m.roughness_factor.clamp(0.04, 1.0),
                m.ao_strength.clamp(0.0, 1.0),
                m.height_scale,
            ],
        }
    }
}

/// "Current material" the scene edits between draws. Draw calls snapshot
/// the classic or PBR half depending on the renderer's PBR mode.
#[derive(Debug, Clone, Default)]
pub struct MaterialState {
    pub classic: ClassicMaterial,
    pub pbr: PbrMaterial,
}

impl MaterialState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self, pbr_mode: bool) -> Material {
        if pbr_mode {
            Material::Pbr(self.pbr)
        } else {
            Material::Classic(self.classic)
        }
    }

    pub fn set_diffuse(&mut self, texture: Option<TextureHandle>) {
        self.classic.diffuse = texture;
    }

    pub fn set_specular(&mut self, texture: Option<TextureHandle>) {
        self.classic.specular = texture;
    }

    /// Normal maps are shared by both material models.
    pub fn set_normal(&mut self, texture: Option<TextureHandle>) {
        self.classic.normal = texture;
        self.pbr.normal = texture;
    }

    pub fn set_albedo(&mut self, texture: Option<TextureHandle>) {
        self.pbr.albedo = texture;
    }

    pub fn set_metallic(&mut self, texture: Option<TextureHandle>) {
        self.pbr.metallic = texture;
    }

    pub fn set_roughness(&mut self, texture: Option<TextureHandle>) {
        self.pbr.roughness = texture;
    }

    pub fn set_ao(&mut self, texture: Option<TextureHandle>) {
        self.pbr.ao = texture;
    }

    pub fn set_height(&mut self, texture: Option<TextureHandle>) {
        self.pbr.height = texture;
    }

    pub fn set_base_color(&mut self, color: Vec4) {
        self.classic.base_color = color;
        self.pbr.base_color = color;
    }

    pub fn set_shininess(&mut self, shininess: f32, specular_strength: f32) {
        self.classic.shininess = shininess;
        self.classic.specular_strength = specular_strength;
    }

    pub fn set_pbr_factors(&mut self, metallic: f32, roughness: f32) {
        self.pbr.metallic_factor = metallic;
        self.pbr.roughness_factor = roughness;
    }

    pub fn set_unlit(&mut self, unlit: bool) {
        self.classic.flags.set(MaterialFlags::UNLIT, unlit);
        self.pbr.flags.set(MaterialFlags::UNLIT, unlit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Handle;

    #[test]
    fn flags_track_bound_textures() {
        let mut state = MaterialState::default();
        state.set_diffuse(Some(Handle::new(3)));
        state.set_normal(Some(Handle::new(4)));

        let classic = state.snapshot(false);
        assert_eq!(
            classic.flags(),
            MaterialFlags::BASE_COLOR_MAP | MaterialFlags::NORMAL_MAP
        );

        let pbr = state.snapshot(true);
        assert_eq!(pbr.flags(), MaterialFlags::NORMAL_MAP);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut state = MaterialState::default();
        state.set_albedo(Some(Handle::new(1)));
        state.set_unlit(true);
        state.reset();
        assert_eq!(state.snapshot(true), Material::Pbr(PbrMaterial::default()));
    }

    #[test]
    fn pbr_roughness_is_clamped_away_from_zero() {
        let material = Material::Pbr(PbrMaterial {
            roughness_factor: 0.0,
            ..PbrMaterial::default()
        });
        assert_eq!(material.params()[1], 0.04);
    }
}
