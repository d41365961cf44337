use glam::{Vec3, Vec4Swizzles};

use wgpu_frame_graph::renderer::shadows::cascade::{frustum_corners_world, CascadePlanner};
use wgpu_frame_graph::renderer::FrameCamera;
use wgpu_frame_graph::RendererError;

fn camera() -> FrameCamera {
    FrameCamera::look_at(
        Vec3::new(0.0, 4.0, 10.0),
        Vec3::ZERO,
        Vec3::Y,
        50f32.to_radians(),
        1.5,
        0.5,
        100.0,
    )
}

#[test]
fn n_thresholds_give_n_plus_one_cascades() {
    let cam = camera();
    for splits in [vec![], vec![0.2], vec![0.1, 0.3], vec![0.05, 0.15, 0.4]] {
        let planner = CascadePlanner::new(&cam, Vec3::new(-0.3, -1.0, -0.2), &splits, &[])
            .expect("valid splits");
        assert_eq!(planner.cascade_matrices().len(), splits.len() + 1);
        assert_eq!(planner.bands().len(), splits.len() + 1);
    }
}

#[test]
fn bands_are_continuous_and_cover_the_view_range() {
    let cam = camera();
    let planner =
        CascadePlanner::new(&cam, Vec3::new(0.2, -1.0, 0.1), &[0.1, 0.25, 0.6], &[]).expect("valid");
    let bands = planner.bands();
    assert_eq!(bands[0].near, cam.near);
    assert_eq!(bands.last().map(|b| b.far), Some(cam.far));
    for pair in bands.windows(2) {
        assert_eq!(pair[0].far, pair[1].near);
        assert!(pair[0].near < pair[0].far);
    }
}

#[test]
fn each_band_fits_inside_its_light_clip_volume() {
    let cam = camera();
    let planner =
        CascadePlanner::new(&cam, Vec3::new(-0.5, -1.0, 0.3), &[0.1, 0.3], &[]).expect("valid");
    let matrices = planner.cascade_matrices();
    for (band, matrix) in planner.bands().iter().zip(&matrices) {
        let sub = glam::Mat4::perspective_rh(cam.fov_y, cam.aspect, band.near, band.far) * cam.view;
        for corner in frustum_corners_world(&sub) {
            let clip = *matrix * corner.extend(1.0);
            let ndc = clip.xyz() / clip.w;
            let eps = 1e-3;
            assert!(ndc.x.abs() <= 1.0 + eps && ndc.y.abs() <= 1.0 + eps, "{ndc:?}");
            assert!(ndc.z >= -eps && ndc.z <= 1.0 + eps, "{ndc:?}");
        }
    }
}

#[test]
fn non_increasing_thresholds_are_rejected() {
    let cam = camera();
    let result = CascadePlanner::with_thresholds(&cam, Vec3::NEG_Y, vec![20.0, 10.0], &[]);
    assert!(matches!(result, Err(RendererError::InvalidConfig(_))));
    let result = CascadePlanner::with_thresholds(&cam, Vec3::NEG_Y, vec![10.0, 10.0], &[]);
    assert!(matches!(result, Err(RendererError::InvalidConfig(_))));
}

#[test]
fn vertical_light_still_produces_finite_matrices() {
    let cam = camera();
    let planner = CascadePlanner::new(&cam, Vec3::NEG_Y, &[0.2], &[]).expect("valid");
    for matrix in planner.cascade_matrices() {
        assert!(matrix.is_finite());
    }
}
