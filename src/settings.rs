use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::renderer::light_culling::MAX_LIGHTS_PER_TILE;
use crate::renderer::shadows::cascade::MAX_CASCADE_BANDS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "RenderSettings::default_shadow_map_size")]
    pub shadow_map_size: u32,
    #[serde(default = "RenderSettings::default_point_shadow_size")]
    pub point_shadow_size: u32,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub present_mode: PresentModeSetting,
    #[serde(default)]
    pub shadows: ShadowSettings,
    #[serde(default = "RenderSettings::default_max_lights_per_tile")]
    pub max_lights_per_tile: u32,
    #[serde(default)]
    pub ssao: SsaoSettings,
    #[serde(default)]
    pub bloom: BloomSettings,
    #[serde(default = "RenderSettings::default_exposure")]
    pub exposure: f32,
    #[serde(default = "RenderSettings::default_ambient")]
    pub ambient: [f32; 3],
    #[serde(default)]
    pub fog: FogSettings,
    #[serde(default)]
    pub tessellation: TessellationSettings,
    /// Equirectangular HDR image used for image-based lighting and the sky.
    #[serde(default)]
    pub environment_map: Option<String>,
    #[serde(default)]
    pub pbr: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            shadow_map_size: Self::default_shadow_map_size(),
            point_shadow_size: Self::default_point_shadow_size(),
            resolution: Resolution::default(),
            present_mode: PresentModeSetting::default(),
            shadows: ShadowSettings::default(),
            max_lights_per_tile: Self::default_max_lights_per_tile(),
            ssao: SsaoSettings::default(),
            bloom: BloomSettings::default(),
            exposure: Self::default_exposure(),
            ambient: Self::default_ambient(),
            fog: FogSettings::default(),
            tessellation: TessellationSettings::default(),
            environment_map: None,
            pbr: false,
        }
    }
}

impl RenderSettings {
    pub fn load() -> Self {
        Self::load_from_path("settings.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RenderSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded render settings from {:?}", path);
                    settings.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default render settings.",
                        path, err
                    );
                    RenderSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        }
    }

    /// Replaces out-of-range values with their defaults, logging each fix.
    pub fn validate(mut self) -> Self {
        if self.shadow_map_size == 0 {
            warn!("Shadow map size must be greater than zero. Using default value.");
            self.shadow_map_size = Self::default_shadow_map_size();
        }

        if self.point_shadow_size == 0 {
            warn!("Point shadow size must be greater than zero. Using default value.");
            self.point_shadow_size = Self::default_point_shadow_size();
        }

        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        if let Err(reason) = self.shadows.check_cascade_splits() {
            warn!("{reason}. Using default cascade splits.");
            self.shadows.cascade_splits = ShadowSettings::default_cascade_splits();
        }

        if self.shadows.cascade_z_multipliers.is_empty()
            || self
                .shadows
                .cascade_z_multipliers
                .iter()
                .any(|m| !(m.is_finite() && *m >= 1.0))
        {
            warn!("Cascade Z multipliers must be finite and >= 1. Using defaults.");
            self.shadows.cascade_z_multipliers = ShadowSettings::default_z_multipliers();
        }

        if self.max_lights_per_tile == 0 || self.max_lights_per_tile > MAX_LIGHTS_PER_TILE {
            warn!(
                "max_lights_per_tile must be in 1..={}. Using default value.",
                MAX_LIGHTS_PER_TILE
            );
            self.max_lights_per_tile = Self::default_max_lights_per_tile();
        }

        if self.ssao.kernel_size == 0 || self.ssao.kernel_size > SsaoSettings::MAX_KERNEL_SIZE {
            warn!(
                "SSAO kernel size must be in 1..={}. Using default value.",
                SsaoSettings::MAX_KERNEL_SIZE
            );
            self.ssao.kernel_size = SsaoSettings::default().kernel_size;
        }

        if !(self.exposure.is_finite() && self.exposure > 0.0) {
            warn!("Exposure must be positive. Using default value.");
            self.exposure = Self::default_exposure();
        }

        let tess = &self.tessellation;
        if tess.min_level == 0
            || tess.min_level > tess.max_level
            || tess.max_level > TessellationSettings::LEVEL_CEILING
            || !(tess.min_distance < tess.max_distance)
        {
            warn!("Tessellation range is inverted or out of bounds. Using defaults.");
            self.tessellation = TessellationSettings::default();
        }

        self
    }

    pub fn present_mode(&self, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
        let desired = self.present_mode.to_wgpu();
        if available.contains(&desired) {
            return desired;
        }

        warn!(
            "Requested present mode {:?} is not supported. Falling back to FIFO.",
            desired
        );

        if available.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            available
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo)
        }
    }

    const fn default_shadow_map_size() -> u32 {
        2048
    }

    const fn default_point_shadow_size() -> u32 {
        512
    }

    const fn default_max_lights_per_tile() -> u32 {
        MAX_LIGHTS_PER_TILE
    }

    const fn default_exposure() -> f32 {
        1.0
    }

    const fn default_ambient() -> [f32; 3] {
        [0.03, 0.03, 0.035]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeSetting {
    #[default]
    Fifo,
    FifoRelaxed,
    Immediate,
    Mailbox,
    AutoVsync,
    AutoNoVsync,
}

impl PresentModeSetting {
    fn to_wgpu(&self) -> wgpu::PresentMode {
        match self {
            PresentModeSetting::Fifo => wgpu::PresentMode::Fifo,
            PresentModeSetting::FifoRelaxed => wgpu::PresentMode::FifoRelaxed,
            PresentModeSetting::Immediate => wgpu::PresentMode::Immediate,
            PresentModeSetting::Mailbox => wgpu::PresentMode::Mailbox,
            PresentModeSetting::AutoVsync => wgpu::PresentMode::AutoVsync,
            PresentModeSetting::AutoNoVsync => wgpu::PresentMode::AutoNoVsync,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowSettings {
    /// Cascade far thresholds as fractions of the camera far plane.
    #[serde(default = "ShadowSettings::default_cascade_splits")]
    pub cascade_splits: Vec<f32>,
    /// Light-space Z padding per cascade band; the last entry repeats.
    #[serde(default = "ShadowSettings::default_z_multipliers")]
    pub cascade_z_multipliers: Vec<f32>,
    #[serde(default = "ShadowSettings::default_bias_min")]
    pub bias_min: f32,
    #[serde(default = "ShadowSettings::default_bias_max")]
    pub bias_max: f32,
    #[serde(default = "ShadowSettings::default_point_near")]
    pub point_near: f32,
    #[serde(default = "ShadowSettings::default_min_variance")]
    pub vsm_min_variance: f32,
    #[serde(default = "ShadowSettings::default_light_bleed")]
    pub vsm_light_bleed_reduction: f32,
    #[serde(default = "ShadowSettings::default_blur_sigma")]
    pub vsm_blur_sigma: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            cascade_splits: Self::default_cascade_splits(),
            cascade_z_multipliers: Self::default_z_multipliers(),
            bias_min: Self::default_bias_min(),
            bias_max: Self::default_bias_max(),
            point_near: Self::default_point_near(),
            vsm_min_variance: Self::default_min_variance(),
            vsm_light_bleed_reduction: Self::default_light_bleed(),
            vsm_blur_sigma: Self::default_blur_sigma(),
        }
    }
}

impl ShadowSettings {
    /// Thresholds must be strictly increasing, inside `(0, 1)`, and leave
    /// room for at most [`MAX_CASCADE_BANDS`] bands.
    pub fn check_cascade_splits(&self) -> Result<(), String> {
        let splits = &self.cascade_splits;
        if splits.len() + 1 > MAX_CASCADE_BANDS {
            return Err(format!(
                "{} cascade splits exceed the {} band limit",
                splits.len(),
                MAX_CASCADE_BANDS
            ));
        }
        if splits.iter().any(|s| !(s.is_finite() && *s > 0.0 && *s < 1.0)) {
            return Err("cascade splits must lie strictly between 0 and 1".into());
        }
        if splits.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err("cascade splits must be strictly increasing".into());
        }
        Ok(())
    }

    fn default_cascade_splits() -> Vec<f32> {
        vec![0.02, 0.04, 0.1, 0.5]
    }

    fn default_z_multipliers() -> Vec<f32> {
        vec![10.0]
    }

    const fn default_bias_min() -> f32 {
        0.0005
    }

    const fn default_bias_max() -> f32 {
        0.005
    }

    const fn default_point_near() -> f32 {
        0.05
    }

    const fn default_min_variance() -> f32 {
        0.00002
    }

    const fn default_light_bleed() -> f32 {
        0.2
    }

    const fn default_blur_sigma() -> f32 {
        1.5
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsaoSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "SsaoSettings::default_kernel_size")]
    pub kernel_size: u32,
    #[serde(default = "SsaoSettings::default_radius")]
    pub radius: f32,
    #[serde(default = "SsaoSettings::default_bias")]
    pub bias: f32,
    #[serde(default = "SsaoSettings::default_power")]
    pub power: f32,
}

impl SsaoSettings {
    pub const MAX_KERNEL_SIZE: u32 = 64;

    const fn default_kernel_size() -> u32 {
        32
    }

    const fn default_radius() -> f32 {
        0.5
    }

    const fn default_bias() -> f32 {
        0.025
    }

    const fn default_power() -> f32 {
        2.0
    }
}

impl Default for SsaoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            kernel_size: Self::default_kernel_size(),
            radius: Self::default_radius(),
            bias: Self::default_bias(),
            power: Self::default_power(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "BloomSettings::default_threshold")]
    pub threshold: f32,
    #[serde(default = "BloomSettings::default_iterations")]
    pub iterations: u32,
    #[serde(default = "BloomSettings::default_intensity")]
    pub intensity: f32,
}

impl BloomSettings {
    const fn default_threshold() -> f32 {
        1.0
    }

    const fn default_iterations() -> u32 {
        5
    }

    const fn default_intensity() -> f32 {
        0.6
    }
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: Self::default_threshold(),
            iterations: Self::default_iterations(),
            intensity: Self::default_intensity(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FogMode {
    #[default]
    None,
    Linear,
    Exponential,
    ExponentialSquared,
}

impl FogMode {
    pub fn as_u32(self) -> u32 {
        match self {
            FogMode::None => 0,
            FogMode::Linear => 1,
            FogMode::Exponential => 2,
            FogMode::ExponentialSquared => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FogSettings {
    #[serde(default)]
    pub mode: FogMode,
    #[serde(default = "FogSettings::default_color")]
    pub color: [f32; 3],
    #[serde(default = "FogSettings::default_density")]
    pub density: f32,
    #[serde(default = "FogSettings::default_start")]
    pub start: f32,
    #[serde(default = "FogSettings::default_end")]
    pub end: f32,
}

impl FogSettings {
    const fn default_color() -> [f32; 3] {
        [0.6, 0.65, 0.7]
    }

    const fn default_density() -> f32 {
        0.01
    }

    const fn default_start() -> f32 {
        20.0
    }

    const fn default_end() -> f32 {
        200.0
    }
}

impl Default for FogSettings {
    fn default() -> Self {
        Self {
            mode: FogMode::None,
            color: Self::default_color(),
            density: Self::default_density(),
            start: Self::default_start(),
            end: Self::default_end(),
        }
    }
}

/// Distance-driven terrain subdivision range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TessellationSettings {
    #[serde(default = "TessellationSettings::default_min_level")]
    pub min_level: u32,
    #[serde(default = "TessellationSettings::default_max_level")]
    pub max_level: u32,
    #[serde(default = "TessellationSettings::default_min_distance")]
    pub min_distance: f32,
    #[serde(default = "TessellationSettings::default_max_distance")]
    pub max_distance: f32,
}

impl TessellationSettings {
    pub const LEVEL_CEILING: u32 = 64;

    const fn default_min_level() -> u32 {
        2
    }

    const fn default_max_level() -> u32 {
        32
    }

    const fn default_min_distance() -> f32 {
        10.0
    }

    const fn default_max_distance() -> f32 {
        400.0
    }
}

impl Default for TessellationSettings {
    fn default() -> Self {
        Self {
            min_level: Self::default_min_level(),
            max_level: Self::default_max_level(),
            min_distance: Self::default_min_distance(),
            max_distance: Self::default_max_distance(),
        }
    }
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_settings() -> RenderSettings {
        RenderSettings {
            shadow_map_size: 0,
            point_shadow_size: 0,
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            present_mode: PresentModeSetting::Immediate,
            shadows: ShadowSettings {
                cascade_splits: vec![0.3, 0.2],
                cascade_z_multipliers: vec![],
                ..ShadowSettings::default()
            },
            max_lights_per_tile: 0,
            exposure: -1.0,
            tessellation: TessellationSettings {
                min_level: 16,
                max_level: 4,
                ..TessellationSettings::default()
            },
            ..RenderSettings::default()
        }
    }

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let validated = invalid_settings().validate();
        let defaults = RenderSettings::default();

        assert_eq!(validated.shadow_map_size, defaults.shadow_map_size);
        assert_eq!(validated.point_shadow_size, defaults.point_shadow_size);
        assert_eq!(validated.resolution.width, Resolution::default().width);
        assert_eq!(validated.resolution.height, Resolution::default().height);
        assert_eq!(
            validated.shadows.cascade_splits,
            defaults.shadows.cascade_splits
        );
        assert_eq!(
            validated.shadows.cascade_z_multipliers,
            defaults.shadows.cascade_z_multipliers
        );
        assert_eq!(validated.max_lights_per_tile, defaults.max_lights_per_tile);
        assert_eq!(validated.exposure, defaults.exposure);
        assert_eq!(validated.tessellation.min_level, defaults.tessellation.min_level);
        assert_eq!(validated.tessellation.max_level, defaults.tessellation.max_level);
    }

    #[test]
    fn validate_preserves_valid_values() {
        let valid = RenderSettings {
            shadow_map_size: 1024,
            max_lights_per_tile: 64,
            shadows: ShadowSettings {
                cascade_splits: vec![0.1, 0.3],
                ..ShadowSettings::default()
            },
            resolution: Resolution {
                width: 1920,
                height: 1080,
            },
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let validated = valid.clone().validate();

        assert_eq!(validated.shadow_map_size, valid.shadow_map_size);
        assert_eq!(validated.max_lights_per_tile, 64);
        assert_eq!(validated.shadows.cascade_splits, vec![0.1, 0.3]);
        assert_eq!(validated.resolution.width, valid.resolution.width);
        assert_eq!(validated.resolution.height, valid.resolution.height);
    }

    #[test]
    fn cascade_splits_reject_duplicates_and_out_of_range() {
        let mut shadows = ShadowSettings::default();
        shadows.cascade_splits = vec![0.1, 0.1];
        assert!(shadows.check_cascade_splits().is_err());

        shadows.cascade_splits = vec![0.1, 1.5];
        assert!(shadows.check_cascade_splits().is_err());

        shadows.cascade_splits = vec![0.05, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        assert!(shadows.check_cascade_splits().is_err());

        shadows.cascade_splits = vec![];
        assert!(shadows.check_cascade_splits().is_ok());
    }

    #[test]
    fn partial_json_fills_missing_fields_with_defaults() {
        let json = r#"{ "exposure": 2.5, "fog": { "mode": "exponential_squared" } }"#;
        let settings: RenderSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.exposure, 2.5);
        assert_eq!(settings.fog.mode, FogMode::ExponentialSquared);
        assert_eq!(settings.fog.density, FogSettings::default().density);
        assert_eq!(settings.shadow_map_size, RenderSettings::default().shadow_map_size);
        assert!(settings.ssao.enabled);
    }

    #[test]
    fn present_mode_returns_desired_when_available() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let available = [
            wgpu::PresentMode::Fifo,
            wgpu::PresentMode::Mailbox,
            wgpu::PresentMode::Immediate,
        ];

        assert_eq!(
            settings.present_mode(&available),
            wgpu::PresentMode::Mailbox
        );
    }

    #[test]
    fn present_mode_falls_back_to_fifo_when_desired_missing() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let available = [wgpu::PresentMode::Fifo, wgpu::PresentMode::Immediate];

        assert_eq!(settings.present_mode(&available), wgpu::PresentMode::Fifo);
    }

    #[test]
    fn load_from_missing_path_uses_defaults() {
        let settings = RenderSettings::load_from_path("definitely/not/here/settings.json");
        assert_eq!(settings.exposure, RenderSettings::default().exposure);
    }
}
