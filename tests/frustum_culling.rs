use glam::{Mat4, Vec3, Vec4};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use wgpu_frame_graph::math::{Aabb, Frustum};
use wgpu_frame_graph::renderer::FrameCamera;

fn camera() -> FrameCamera {
    FrameCamera::look_at(
        Vec3::new(2.0, 3.0, 8.0),
        Vec3::ZERO,
        Vec3::Y,
        60f32.to_radians(),
        16.0 / 9.0,
        0.1,
        50.0,
    )
}

fn unproject(inverse_view_proj: &Mat4, ndc: Vec3) -> Vec3 {
    let world: Vec4 = *inverse_view_proj * ndc.extend(1.0);
    world.truncate() / world.w
}

#[test]
fn boxes_around_points_inside_the_frustum_are_never_culled() {
    let cam = camera();
    let view_proj = cam.view_proj();
    let inverse = view_proj.inverse();
    let frustum = Frustum::from_view_proj(&view_proj);
    let mut rng = SmallRng::seed_from_u64(7);

    for _ in 0..2000 {
        let ndc = Vec3::new(
            rng.gen_range(-0.99..0.99),
            rng.gen_range(-0.99..0.99),
            rng.gen_range(0.01..0.99),
        );
        let point = unproject(&inverse, ndc);
        let half = Vec3::splat(rng.gen_range(0.001..2.0));
        let aabb = Aabb::from_center_extents(point, half);
        assert!(frustum.is_aabb_visible(&aabb), "culled box around {point:?}");
    }
}

#[test]
fn boxes_straddling_a_plane_stay_visible() {
    let cam = camera();
    let frustum = Frustum::from_view_proj(&cam.view_proj());
    let inside = unproject(&cam.view_proj().inverse(), Vec3::new(0.98, 0.0, 0.5));
    let outside = unproject(&cam.view_proj().inverse(), Vec3::new(1.5, 0.0, 0.5));
    let aabb = Aabb::new(inside, outside);
    assert!(frustum.is_aabb_visible(&aabb));
}

#[test]
fn boxes_behind_the_camera_are_culled() {
    let cam = camera();
    let frustum = Frustum::from_view_proj(&cam.view_proj());
    let behind = Vec3::new(2.0, 3.0, 8.0) + Vec3::new(2.0, 3.0, 8.0).normalize() * 5.0;
    let aabb = Aabb::from_center_extents(behind, Vec3::splat(0.5));
    assert!(!frustum.is_aabb_visible(&aabb));
}

#[test]
fn boxes_beyond_the_far_plane_are_culled() {
    let cam = camera();
    let frustum = Frustum::from_view_proj(&cam.view_proj());
    let far_away = -Vec3::new(2.0, 3.0, 8.0).normalize() * 200.0;
    let aabb = Aabb::from_center_extents(far_away, Vec3::splat(1.0));
    assert!(!frustum.is_aabb_visible(&aabb));
}

#[test]
fn expanding_an_aabb_never_shrinks_it() {
    let mut rng = SmallRng::seed_from_u64(11);
    let mut aabb = Aabb::from_point(Vec3::ZERO);
    for _ in 0..500 {
        let before = aabb;
        let point = Vec3::new(
            rng.gen_range(-10.0..10.0),
            rng.gen_range(-10.0..10.0),
            rng.gen_range(-10.0..10.0),
        );
        if rng.gen_bool(0.5) {
            aabb.expand_point(point);
            assert!(aabb.contains_point(point));
        } else {
            let other = Aabb::from_center_extents(point, Vec3::splat(rng.gen_range(0.0..1.0)));
            aabb.expand_aabb(&other);
            assert!(aabb.contains_aabb(&other));
        }
        assert!(aabb.contains_aabb(&before));
        assert!(aabb.min.cmple(aabb.max).all());
    }
}

#[test]
fn transformed_aabb_contains_every_transformed_corner() {
    let local = Aabb::new(Vec3::new(-1.0, 0.0, -0.5), Vec3::new(1.0, 2.0, 0.5));
    let transform = Mat4::from_scale_rotation_translation(
        Vec3::new(2.0, 1.0, 3.0),
        glam::Quat::from_rotation_y(0.7) * glam::Quat::from_rotation_x(0.3),
        Vec3::new(5.0, -2.0, 1.0),
    );
    let world = local.transformed(&transform);
    for corner in local.corners() {
        let p = transform.transform_point3(corner);
        let eps = Vec3::splat(1e-4);
        assert!(p.cmpge(world.min - eps).all() && p.cmple(world.max + eps).all());
    }
}
