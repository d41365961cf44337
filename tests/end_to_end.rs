//! Renders whole frames on a headless device. Skipped when the machine has
//! no usable adapter.

use glam::{Mat4, Vec3, Vec4Swizzles};

use wgpu_frame_graph::renderer::lights::LightSet;
use wgpu_frame_graph::renderer::{
    cube_mesh, plane_mesh, sphere_mesh, EmitterDesc, FrameCamera, PointLightDesc, Renderer,
    Texture,
};
use wgpu_frame_graph::renderer::light_culling::MAX_LIGHTS_PER_TILE;
use wgpu_frame_graph::renderer::shadows::sampling::select_cascade;
use wgpu_frame_graph::RenderSettings;

const WIDTH: u32 = 256;
const HEIGHT: u32 = 144;

fn headless() -> Option<Renderer> {
    let _ = env_logger::builder().is_test(true).try_init();
    match pollster::block_on(Renderer::new_headless(WIDTH, HEIGHT, RenderSettings::default())) {
        Ok(renderer) => Some(renderer),
        Err(err) => {
            log::warn!("skipping headless test: {err}");
            None
        }
    }
}

fn camera() -> FrameCamera {
    FrameCamera::look_at(
        Vec3::new(0.0, 4.0, 10.0),
        Vec3::ZERO,
        Vec3::Y,
        60f32.to_radians(),
        WIDTH as f32 / HEIGHT as f32,
        0.1,
        100.0,
    )
}

fn point_lights() -> Vec<PointLightDesc> {
    (0..24)
        .map(|i| {
            let angle = i as f32 * 0.26;
            PointLightDesc {
                position: Vec3::new(angle.cos() * 5.0, 1.0, angle.sin() * 5.0),
                range: 3.0,
                color: Vec3::new(1.0, 0.8, 0.6),
                intensity: 2.0,
                casts_shadows: i < 2,
            }
        })
        .collect()
}

const CUBE_CENTER: Vec3 = Vec3::new(0.0, 0.5, 0.0);

fn cube_light() -> PointLightDesc {
    PointLightDesc {
        position: Vec3::new(0.0, 1.5, 0.0),
        range: 3.0,
        color: Vec3::ONE,
        intensity: 3.0,
        casts_shadows: false,
    }
}

fn flat_heightmap(size: u32) -> Vec<f32> {
    (0..size * size).flat_map(|_| [0.25, 0.0, 0.0, 1.0]).collect()
}

#[test]
fn full_frame_renders_and_reports_stats() {
    let Some(mut renderer) = headless() else {
        return;
    };

    let (cube_vertices, cube_indices) = cube_mesh();
    let cube = renderer.add_mesh(&cube_vertices, &cube_indices);
    let (sphere_vertices, sphere_indices) = sphere_mesh(24, 16);
    let sphere = renderer.add_mesh(&sphere_vertices, &sphere_indices);
    let (plane_vertices, plane_indices) = plane_mesh(20.0, 4);
    let ground = renderer.add_mesh(&plane_vertices, &plane_indices);

    let heights = flat_heightmap(32);
    let heightmap = Texture::from_rgba32f(
        renderer.device(),
        renderer.queue(),
        &heights,
        32,
        32,
        Some("TestHeightmap"),
    );
    let heightmap = renderer.add_texture(heightmap);
    let emitter = renderer.spawn_emitter(EmitterDesc {
        position: Vec3::new(0.0, 0.5, 0.0),
        max_particles: 256,
        ..EmitterDesc::default()
    });

    let mut cube_light_index = None;
    for frame in 0..3 {
        renderer.begin_frame(camera(), 1.0 / 60.0);
        renderer.add_dir_light(Vec3::new(-0.4, -1.0, -0.3), Vec3::ONE, 1.0, true);
        for desc in point_lights() {
            renderer.add_point_light(desc);
        }
        cube_light_index = renderer.add_point_light(cube_light());
        renderer.draw_mesh(ground, Mat4::IDENTITY);
        renderer.draw_mesh(cube, Mat4::from_translation(CUBE_CENTER));
        renderer.draw_mesh(sphere, Mat4::from_translation(Vec3::new(2.0, 1.0, 0.0)));
        // Far behind the camera.
        renderer.draw_mesh(sphere, Mat4::from_translation(Vec3::new(0.0, 0.0, 80.0)));
        renderer.draw_terrain(
            heightmap,
            Mat4::from_translation(Vec3::new(-30.0, -1.0, -60.0)) * Mat4::from_scale(Vec3::splat(20.0)),
            4,
            2.0,
        );
        renderer.draw_particles(emitter);
        renderer.end_frame().expect("frame should render");

        let stats = renderer.stats();
        assert_eq!(stats.culled_draws, 1, "frame {frame}");
        assert_eq!(stats.active_point_lights, 25);
        assert_eq!(stats.point_shadow_casters, 2);
        assert_eq!(stats.rejected_point_lights, 0);
        assert!(stats.terrain_patches > 0);
        assert!(stats.main_draw_calls >= 3);
        assert!(stats.cascade_draw_calls > 0);
        assert!(stats.point_shadow_draw_calls > 0);
    }

    let pixels = renderer.read_frame().expect("frame readback");
    assert_eq!(pixels.len(), (WIDTH * HEIGHT * 4) as usize);
    assert!(pixels.chunks_exact(4).any(|px| px[0] > 0 || px[1] > 0 || px[2] > 0));

    // The cascade band that holds the cube was rendered into.
    let cam = camera();
    let thresholds: Vec<f32> = renderer
        .settings()
        .shadows
        .cascade_splits
        .iter()
        .map(|split| split * cam.far)
        .collect();
    let band = select_cascade(cam.view_depth(CUBE_CENTER), &thresholds);
    let depths = renderer
        .read_cascade_layer(band as u32)
        .expect("cascade readback");
    assert!(!depths.is_empty());
    assert!(depths.iter().any(|&d| d < 1.0), "band {band} is still clear");

    // The tile under the cube's projected centre lists the light above it.
    let cube_light_index = cube_light_index.expect("cube light accepted") as u32;
    let clip = cam.view_proj() * CUBE_CENTER.extend(1.0);
    let ndc = clip.xyz() / clip.w;
    let pixel = glam::Vec2::new(
        (ndc.x * 0.5 + 0.5) * WIDTH as f32,
        (0.5 - ndc.y * 0.5) * HEIGHT as f32,
    );
    let tiles = renderer.read_tile_grid().expect("tile readback");
    let (tx, ty) = tiles.grid.tile_of_pixel(pixel).expect("cube is on screen");
    assert!(
        tiles.lights_in_tile(tx, ty).contains(&cube_light_index),
        "tile ({tx}, {ty}) misses light {cube_light_index}"
    );
}

#[test]
fn gpu_tile_lists_agree_with_cpu_reference() {
    let Some(mut renderer) = headless() else {
        return;
    };
    let cam = camera();

    renderer.begin_frame(cam, 1.0 / 60.0);
    let mut reference = LightSet::new();
    for desc in point_lights() {
        renderer.add_point_light(desc);
        reference.add_point(desc);
    }
    renderer.end_frame().expect("frame should render");

    let gpu = renderer.read_tile_grid().expect("tile readback");
    let cpu = gpu
        .grid
        .cull_cpu(reference.point_lights(), &cam, MAX_LIGHTS_PER_TILE);

    assert_eq!(gpu.overflow, 0);
    assert_eq!(gpu.counts.len(), cpu.counts.len());

    let mut matching = 0;
    for ty in 0..gpu.grid.tiles_y {
        for tx in 0..gpu.grid.tiles_x {
            let gpu_list = gpu.lights_in_tile(tx, ty);
            assert!(gpu_list.windows(2).all(|pair| pair[0] < pair[1]));
            if gpu_list == cpu.lights_in_tile(tx, ty) {
                matching += 1;
            }
        }
    }
    // Float rounding may flip a light that grazes a tile edge.
    let tiles = gpu.grid.tile_count() as f32;
    assert!(matching as f32 >= tiles * 0.95, "{matching} of {tiles} tiles match");
}

#[test]
fn frame_without_lights_leaves_every_tile_empty() {
    let Some(mut renderer) = headless() else {
        return;
    };
    let cam = camera();
    renderer.begin_frame(cam, 1.0 / 60.0);
    renderer.end_frame().expect("frame should render");

    let gpu = renderer.read_tile_grid().expect("tile readback");
    let cpu = gpu.grid.cull_cpu(&[], &cam, MAX_LIGHTS_PER_TILE);
    assert!(gpu.counts.iter().all(|&c| c == 0));
    assert_eq!(gpu.overflow, 0);
    assert_eq!(gpu.counts, cpu.counts);
}

#[test]
fn resize_rebuilds_targets() {
    let Some(mut renderer) = headless() else {
        return;
    };
    renderer.resize(128, 96).expect("resize");
    assert_eq!(renderer.size(), (128, 96));

    renderer.begin_frame(camera(), 1.0 / 60.0);
    renderer.end_frame().expect("empty frame");
    let pixels = renderer.read_frame().expect("frame readback");
    assert_eq!(pixels.len(), 128 * 96 * 4);
}
