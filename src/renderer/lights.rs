use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::math::safe_normalize;

pub const MAX_POINT_LIGHTS: usize = 1024;
pub const MAX_SHADOW_POINT_LIGHTS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    /// Distance beyond which the light contributes nothing.
    pub range: f32,
    pub color: Vec3,
    pub intensity: f32,
    pub active: bool,
    /// Slot in the point shadow atlas, or -1.
    pub shadow_index: i32,
}

impl PointLight {
    const INACTIVE: Self = Self {
        position: Vec3::ZERO,
        range: 0.0,
        color: Vec3::ZERO,
        intensity: 0.0,
        active: false,
        shadow_index: -1,
    };
}

/// Arguments for [`LightSet::add_point`].
#[derive(Clone, Copy, Debug)]
pub struct PointLightDesc {
    pub position: Vec3,
    pub range: f32,
    pub color: Vec3,
    pub intensity: f32,
    pub casts_shadows: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels in (from the light towards the scene).
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub active: bool,
    pub casts_shadows: bool,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::NEG_Y,
            color: Vec3::ONE,
            intensity: 0.0,
            active: false,
            casts_shadows: false,
        }
    }
}

/// Per-frame light list with fixed capacity. Lights are registered between
/// `begin_frame` and `end_frame` and all deactivated again at frame reset.
pub struct LightSet {
    points: Vec<PointLight>,
    active_points: usize,
    shadow_slots_used: usize,
    directional: DirectionalLight,
    rejected_points: u32,
    rejected_shadows: u32,
}

impl LightSet {
    pub fn new() -> Self {
        Self {
            points: vec![PointLight::INACTIVE; MAX_POINT_LIGHTS],
            active_points: 0,
            shadow_slots_used: 0,
            directional: DirectionalLight::default(),
            rejected_points: 0,
            rejected_shadows: 0,
        }
    }

    /// Registers a point light and returns its index, or `None` when the
    /// light list is full or the description is unusable.
    ///
    /// Shadow slots go to the first [`MAX_SHADOW_POINT_LIGHTS`] lights that
    /// ask for one; later requests keep the light but without a shadow.
    pub fn add_point(&mut self, desc: PointLightDesc) -> Option<usize> {
        if !(desc.range.is_finite() && desc.range > 0.0) || !desc.position.is_finite() {
            log::warn!(
                "Ignoring point light with invalid range {} or position {:?}",
                desc.range,
                desc.position
            );
            return None;
        }

        if self.active_points >= MAX_POINT_LIGHTS {
            if self.rejected_points == 0 {
                log::warn!(
                    "Point light capacity ({}) exceeded; extra lights are dropped this frame",
                    MAX_POINT_LIGHTS
                );
            }
            self.rejected_points += 1;
            return None;
        }

        let shadow_index = if desc.casts_shadows {
            if self.shadow_slots_used < MAX_SHADOW_POINT_LIGHTS {
                self.shadow_slots_used += 1;
                (self.shadow_slots_used - 1) as i32
            } else {
                if self.rejected_shadows == 0 {
                    log::warn!(
                        "Shadow-casting point light capacity ({}) exceeded; extra lights render unshadowed",
                        MAX_SHADOW_POINT_LIGHTS
                    );
                }
                self.rejected_shadows += 1;
                -1
            }
        } else {
            -1
        };

        let index = self.active_points;
        self.points[index] = PointLight {
            position: desc.position,
            range: desc.range,
            color: desc.color,
            intensity: desc.intensity.max(0.0),
            active: true,
            shadow_index,
        };
        self.active_points += 1;
        Some(index)
    }

    pub fn set_directional(
        &mut self,
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        casts_shadows: bool,
    ) {
        if self.directional.active {
            log::debug!("Replacing this frame's directional light");
        }
        self.directional = DirectionalLight {
            direction: safe_normalize(direction, Vec3::NEG_Y),
            color,
            intensity: intensity.max(0.0),
            active: true,
            casts_shadows,
        };
    }

    /// Deactivates every light and frees all shadow slots.
    pub fn reset(&mut self) {
        for light in &mut self.points[..self.active_points] {
            *light = PointLight::INACTIVE;
        }
        self.active_points = 0;
        self.shadow_slots_used = 0;
        self.directional = DirectionalLight::default();
        self.rejected_points = 0;
        self.rejected_shadows = 0;
    }

    pub fn point_lights(&self) -> &[PointLight] {
        &self.points[..self.active_points]
    }

    pub fn active_point_count(&self) -> usize {
        self.points.iter().filter(|light| light.active).count()
    }

    /// Active lights holding a shadow slot, as `(light index, slot)`.
    pub fn shadow_casters(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.point_lights()
            .iter()
            .enumerate()
            .filter(|(_, light)| light.shadow_index >= 0)
            .map(|(index, light)| (index, light.shadow_index as usize))
    }

    pub fn shadow_slots_used(&self) -> usize {
        self.shadow_slots_used
    }

    pub fn directional(&self) -> &DirectionalLight {
        &self.directional
    }

    pub fn rejected_points(&self) -> u32 {
        self.rejected_points
    }

    pub fn rejected_shadows(&self) -> u32 {
        self.rejected_shadows
    }

    pub fn gpu_points(&self, shadow_near: f32) -> Vec<PointLightRaw> {
        self.point_lights()
            .iter()
            .map(|light| PointLightRaw::from_light(light, shadow_near))
            .collect()
    }
}

impl Default for LightSet {
    fn default() -> Self {
        Self::new()
    }
}

/// GPU layout of one entry in the point light storage buffer.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct PointLightRaw {
    pub position_range: [f32; 4],
    pub color_intensity: [f32; 4],
    /// x = shadow slot (-1 for none), y = shadow near, z = shadow far.
    pub shadow: [f32; 4],
}

impl PointLightRaw {
    pub fn from_light(light: &PointLight, shadow_near: f32) -> Self {
        Self {
            position_range: [
                light.position.x,
                light.position.y,
                light.position.z,
                light.range,
            ],
            color_intensity: [light.color.x, light.color.y, light.color.z, light.intensity],
            shadow: [light.shadow_index as f32, shadow_near, light.range, 0.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(casts_shadows: bool) -> PointLightDesc {
        PointLightDesc {
            position: Vec3::new(1.0, 2.0, 3.0),
            range: 10.0,
            color: Vec3::ONE,
            intensity: 5.0,
            casts_shadows,
        }
    }

    #[test]
    fn excess_point_lights_are_rejected() {
        let mut lights = LightSet::new();
        for _ in 0..MAX_POINT_LIGHTS {
            assert!(lights.add_point(desc(false)).is_some());
        }
        assert!(lights.add_point(desc(false)).is_none());
        assert_eq!(lights.active_point_count(), MAX_POINT_LIGHTS);
        assert_eq!(lights.rejected_points(), 1);
    }

    #[test]
    fn shadow_slots_are_assigned_in_order_then_exhausted() {
        let mut lights = LightSet::new();
        let indices: Vec<_> = (0..MAX_SHADOW_POINT_LIGHTS + 2)
            .map(|_| lights.add_point(desc(true)).unwrap())
            .collect();

        let slots: Vec<i32> = indices
            .iter()
            .map(|&i| lights.point_lights()[i].shadow_index)
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 3, -1, -1]);
        assert_eq!(lights.shadow_casters().count(), MAX_SHADOW_POINT_LIGHTS);
    }

    #[test]
    fn reset_deactivates_everything() {
        let mut lights = LightSet::new();
        lights.add_point(desc(true));
        lights.set_directional(Vec3::new(0.0, -2.0, 0.0), Vec3::ONE, 3.0, true);
        lights.reset();
        assert_eq!(lights.active_point_count(), 0);
        assert_eq!(lights.shadow_slots_used(), 0);
        assert!(!lights.directional().active);
    }

    #[test]
    fn directional_direction_is_normalized() {
        let mut lights = LightSet::new();
        lights.set_directional(Vec3::new(0.0, -2.0, 0.0), Vec3::ONE, 3.0, true);
        assert!(lights.directional().direction.abs_diff_eq(Vec3::NEG_Y, 1e-6));
    }

    #[test]
    fn invalid_range_is_rejected_without_consuming_capacity() {
        let mut lights = LightSet::new();
        let mut bad = desc(true);
        bad.range = 0.0;
        assert!(lights.add_point(bad).is_none());
        assert_eq!(lights.point_lights().len(), 0);
        assert_eq!(lights.shadow_slots_used(), 0);
    }

    #[test]
    fn raw_light_is_48_bytes() {
        assert_eq!(std::mem::size_of::<PointLightRaw>(), 48);
    }
}
