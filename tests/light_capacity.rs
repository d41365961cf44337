use glam::Vec3;

use wgpu_frame_graph::renderer::lights::LightSet;
use wgpu_frame_graph::renderer::{PointLightDesc, MAX_POINT_LIGHTS, MAX_SHADOW_POINT_LIGHTS};

fn light(casts_shadows: bool) -> PointLightDesc {
    PointLightDesc {
        position: Vec3::new(1.0, 2.0, 3.0),
        range: 5.0,
        color: Vec3::ONE,
        intensity: 2.0,
        casts_shadows,
    }
}

#[test]
fn active_lights_never_exceed_capacity() {
    let mut set = LightSet::new();
    let accepted = (0..MAX_POINT_LIGHTS + 37)
        .filter(|_| set.add_point(light(false)).is_some())
        .count();
    assert_eq!(accepted, MAX_POINT_LIGHTS);
    assert_eq!(set.active_point_count(), MAX_POINT_LIGHTS);
    assert_eq!(set.rejected_points(), 37);
}

#[test]
fn shadow_slots_are_capped_but_lights_are_kept() {
    let mut set = LightSet::new();
    let indices: Vec<_> = (0..MAX_SHADOW_POINT_LIGHTS + 3)
        .map(|_| set.add_point(light(true)))
        .collect();
    assert!(indices.iter().all(Option::is_some));
    assert_eq!(set.shadow_slots_used(), MAX_SHADOW_POINT_LIGHTS);
    assert_eq!(set.rejected_shadows(), 3);

    let slots: Vec<i32> = set.point_lights().iter().map(|l| l.shadow_index).collect();
    assert_eq!(&slots[..MAX_SHADOW_POINT_LIGHTS], &[0, 1, 2, 3]);
    assert!(slots[MAX_SHADOW_POINT_LIGHTS..].iter().all(|&s| s == -1));
}

#[test]
fn reset_frees_capacity_for_the_next_frame() {
    let mut set = LightSet::new();
    for _ in 0..MAX_POINT_LIGHTS {
        set.add_point(light(true));
    }
    set.reset();
    assert_eq!(set.active_point_count(), 0);
    assert_eq!(set.shadow_slots_used(), 0);
    assert!(set.add_point(light(true)).is_some());
}
