use glam::{Vec2, Vec3, Vec4Swizzles};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use wgpu_frame_graph::renderer::light_culling::{MAX_LIGHTS_PER_TILE, TILE_SIZE};
use wgpu_frame_graph::renderer::lights::{LightSet, PointLight};
use wgpu_frame_graph::renderer::{FrameCamera, PointLightDesc, TileGrid};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 180;

fn camera() -> FrameCamera {
    FrameCamera::look_at(
        Vec3::new(0.0, 2.0, 12.0),
        Vec3::ZERO,
        Vec3::Y,
        60f32.to_radians(),
        WIDTH as f32 / HEIGHT as f32,
        0.1,
        100.0,
    )
}

fn random_lights(count: usize, seed: u64) -> Vec<PointLight> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut set = LightSet::new();
    for _ in 0..count {
        set.add_point(PointLightDesc {
            position: Vec3::new(
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-3.0..5.0),
                rng.gen_range(-10.0..10.0),
            ),
            range: rng.gen_range(0.5..4.0),
            color: Vec3::ONE,
            intensity: 1.0,
            casts_shadows: false,
        });
    }
    set.point_lights().to_vec()
}

fn pixel_of(cam: &FrameCamera, world: Vec3) -> Option<Vec2> {
    let clip = cam.view_proj() * world.extend(1.0);
    if clip.w <= cam.near {
        return None;
    }
    let ndc = clip.xyz() / clip.w;
    if ndc.x.abs() >= 1.0 || ndc.y.abs() >= 1.0 || !(0.0..=1.0).contains(&ndc.z) {
        return None;
    }
    Some(Vec2::new(
        (ndc.x * 0.5 + 0.5) * WIDTH as f32,
        (0.5 - ndc.y * 0.5) * HEIGHT as f32,
    ))
}

#[test]
fn every_light_reaching_a_pixel_is_listed_for_its_tile() {
    let cam = camera();
    let lights = random_lights(150, 3);
    let grid = TileGrid::new(WIDTH, HEIGHT);
    let result = grid.cull_cpu(&lights, &cam, MAX_LIGHTS_PER_TILE);
    assert_eq!(result.overflow, 0);

    // Sample points well inside lights that sit far enough from the camera
    // for the projected circle to bound them.
    let mut rng = SmallRng::seed_from_u64(5);
    let mut checked = 0;
    for (index, light) in lights.iter().enumerate() {
        if cam.view_depth(light.position) < 3.0 * light.range {
            continue;
        }
        for _ in 0..16 {
            let direction = Vec3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            )
            .normalize_or_zero();
            let offset = direction * light.range * 0.3;
            let Some(pixel) = pixel_of(&cam, light.position + offset) else {
                continue;
            };
            let Some((tx, ty)) = grid.tile_of_pixel(pixel) else {
                continue;
            };
            assert!(
                result.lights_in_tile(tx, ty).contains(&(index as u32)),
                "light {index} missing from tile ({tx}, {ty})"
            );
            checked += 1;
        }
    }
    assert!(checked > 50);
}

#[test]
fn tile_lists_are_sorted_and_unique() {
    let cam = camera();
    let lights = random_lights(500, 9);
    let grid = TileGrid::new(WIDTH, HEIGHT);
    let result = grid.cull_cpu(&lights, &cam, MAX_LIGHTS_PER_TILE);
    for ty in 0..grid.tiles_y {
        for tx in 0..grid.tiles_x {
            let list = result.lights_in_tile(tx, ty);
            assert!(list.windows(2).all(|w| w[0] < w[1]));
        }
    }
}

#[test]
fn overflowing_tiles_keep_the_lowest_indices() {
    let cam = camera();
    let mut set = LightSet::new();
    for i in 0..40 {
        set.add_point(PointLightDesc {
            position: Vec3::new(0.0, 0.0, 10.0 - i as f32 * 0.01),
            range: 3.0,
            color: Vec3::ONE,
            intensity: 1.0,
            casts_shadows: false,
        });
    }
    let grid = TileGrid::new(WIDTH, HEIGHT);
    let capacity = 8;
    let result = grid.cull_cpu(set.point_lights(), &cam, capacity);

    assert!(result.counts.iter().all(|&c| c <= capacity));
    assert!(result.overflow > 0);
    let center = grid
        .tile_of_pixel(Vec2::new(WIDTH as f32 / 2.0, HEIGHT as f32 / 2.0))
        .expect("center tile");
    assert_eq!(
        result.lights_in_tile(center.0, center.1),
        &[0, 1, 2, 3, 4, 5, 6, 7]
    );
}

#[test]
fn light_straddling_the_near_plane_touches_every_tile() {
    let cam = camera();
    let mut set = LightSet::new();
    set.add_point(PointLightDesc {
        position: Vec3::new(0.0, 2.0, 12.05),
        range: 1.0,
        color: Vec3::ONE,
        intensity: 1.0,
        casts_shadows: false,
    });
    let grid = TileGrid::new(WIDTH, HEIGHT);
    let result = grid.cull_cpu(set.point_lights(), &cam, MAX_LIGHTS_PER_TILE);
    assert!(result.counts.iter().all(|&c| c == 1));
}

#[test]
fn grid_covers_partial_edge_tiles() {
    let grid = TileGrid::new(WIDTH, HEIGHT);
    assert_eq!(grid.tiles_x, WIDTH.div_ceil(TILE_SIZE));
    assert_eq!(grid.tiles_y, HEIGHT.div_ceil(TILE_SIZE));
    let (min, max) = grid.tile_rect(grid.tiles_x - 1, grid.tiles_y - 1);
    assert_eq!(max, Vec2::new(WIDTH as f32, HEIGHT as f32));
    assert!(min.x < max.x && min.y < max.y);
}

#[test]
fn light_on_a_tile_boundary_lands_in_exactly_the_two_tiles() {
    let cam = FrameCamera::look_at(
        Vec3::ZERO,
        Vec3::NEG_Z,
        Vec3::Y,
        60f32.to_radians(),
        WIDTH as f32 / HEIGHT as f32,
        0.1,
        100.0,
    );
    // Pixel (160, 88): the border between tiles (9, 5) and (10, 5), half a
    // tile away from the rows above and below.
    let depth = 20.0;
    let ndc_y = 1.0 - 88.0 / HEIGHT as f32 * 2.0;
    let y = ndc_y * depth * 30f32.to_radians().tan();
    let mut set = LightSet::new();
    set.add_point(PointLightDesc {
        position: Vec3::new(0.0, y, -depth),
        // Projects to a circle of roughly 4 px.
        range: 0.5,
        color: Vec3::ONE,
        intensity: 1.0,
        casts_shadows: false,
    });

    let grid = TileGrid::new(WIDTH, HEIGHT);
    let result = grid.cull_cpu(set.point_lights(), &cam, MAX_LIGHTS_PER_TILE);
    for ty in 0..grid.tiles_y {
        for tx in 0..grid.tiles_x {
            let expected: &[u32] = if ty == 5 && (tx == 9 || tx == 10) { &[0] } else { &[] };
            assert_eq!(result.lights_in_tile(tx, ty), expected, "tile ({tx}, {ty})");
        }
    }
    assert_eq!(result.counts.iter().sum::<u32>(), 2);
}

#[test]
fn no_lights_leaves_every_tile_empty() {
    let grid = TileGrid::new(WIDTH, HEIGHT);
    let result = grid.cull_cpu(&[], &camera(), MAX_LIGHTS_PER_TILE);
    assert_eq!(result.counts.len(), grid.tile_count() as usize);
    assert!(result.counts.iter().all(|&c| c == 0));
    assert_eq!(result.overflow, 0);
    assert_eq!(result.max_count(), 0);
}
