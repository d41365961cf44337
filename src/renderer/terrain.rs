//! Heightmap terrain split into camera-distance tessellated patches.
//!
//! wgpu exposes no tessellation stages, so each patch is drawn as an
//! instanced grid whose resolution comes from its corners' camera distance.
//! Edge levels are derived from the two corners an edge shares with its
//! neighbour, and edge vertices snap to that level's grid, so adjacent
//! patches of different levels meet without cracks.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

use crate::math::{Aabb, Frustum};
use crate::settings::TessellationSettings;

pub const MAX_TERRAIN_PATCHES: u32 = 64;

/// One terrain patch as read by the terrain vertex shader.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct PatchData {
    /// x, y = patch origin in terrain uv, z = patch size in uv, w = height scale.
    pub rect: [f32; 4],
    /// Edge levels for the -x, +x, -z and +z edges.
    pub levels: [u32; 4],
    /// x = object index, y = interior level.
    pub info: [u32; 4],
}

impl PatchData {
    pub fn level(&self) -> u32 {
        self.info[1]
    }

    pub fn vertex_count(&self) -> u32 {
        patch_vertex_count(self.level())
    }
}

pub fn patch_vertex_count(level: u32) -> u32 {
    level * level * 6
}

/// Linear falloff from `max_level` at `min_distance` to `min_level` at
/// `max_distance`, rounded to the nearest power of two inside the range so
/// a coarser edge level always divides a finer one.
pub fn level_for_distance(distance: f32, settings: &TessellationSettings) -> u32 {
    let span = (settings.max_distance - settings.min_distance).max(f32::EPSILON);
    let t = ((distance - settings.min_distance) / span).clamp(0.0, 1.0);
    let levels = (settings.max_level - settings.min_level) as f32;
    let level = (settings.max_level as f32 - t * levels).max(1.0);

    let lowest = settings.min_level.max(1).next_power_of_two().trailing_zeros();
    let highest = settings.max_level.max(1).ilog2().max(lowest);
    let exponent = (level.log2().round() as u32).clamp(lowest, highest);
    1 << exponent
}

/// Grid position, in `[0, 1]²` patch space, of vertex `index` of a patch
/// drawn at `level` with the given edge levels. Mirrors `terrain_vertex.wgsl`.
pub fn patch_vertex(level: u32, edges: [u32; 4], index: u32) -> Vec2 {
    const CORNERS: [(u32, u32); 6] = [(0, 0), (0, 1), (1, 0), (1, 0), (0, 1), (1, 1)];
    let level = level.max(1);
    let quad = index / 6;
    let (dx, dz) = CORNERS[(index % 6) as usize];
    let x = quad % level + dx;
    let z = quad / level + dz;
    let mut t = Vec2::new(x as f32, z as f32) / level as f32;

    if x == 0 {
        t.y = snap(t.y, edges[0]);
    } else if x == level {
        t.y = snap(t.y, edges[1]);
    }
    if z == 0 {
        t.x = snap(t.x, edges[2]);
    } else if z == level {
        t.x = snap(t.x, edges[3]);
    }
    t
}

fn snap(t: f32, level: u32) -> f32 {
    let level = level.max(1) as f32;
    (t * level + 0.5).floor() / level
}

/// Local-space placement of a terrain draw.
#[derive(Debug, Clone, Copy)]
pub struct TerrainLayout {
    pub transform: Mat4,
    pub patches: u32,
    pub height_scale: f32,
}

impl TerrainLayout {
    fn side(&self) -> u32 {
        self.patches.clamp(1, MAX_TERRAIN_PATCHES)
    }

    /// World position of grid corner `(i, j)` at mid height.
    fn corner(&self, i: u32, j: u32) -> Vec3 {
        let n = self.side() as f32;
        let local = Vec3::new(
            i as f32 / n - 0.5,
            self.height_scale * 0.5,
            j as f32 / n - 0.5,
        );
        self.transform.transform_point3(local)
    }

    fn patch_aabb(&self, i: u32, j: u32) -> Aabb {
        let n = self.side() as f32;
        let min = Vec3::new(i as f32 / n - 0.5, 0.0, j as f32 / n - 0.5);
        let max = Vec3::new(
            (i + 1) as f32 / n - 0.5,
            self.height_scale.max(0.0),
            (j + 1) as f32 / n - 0.5,
        );
        Aabb::new(min, max).transformed(&self.transform)
    }
}

/// Builds the visible patches of one terrain draw. Patches outside
/// `frustum` are dropped; pass `None` to keep all of them.
pub fn plan_patches(
    layout: &TerrainLayout,
    camera_position: Vec3,
    frustum: Option<&Frustum>,
    settings: &TessellationSettings,
    object_index: u32,
) -> Vec<PatchData> {
    let n = layout.side();
    let corners = n + 1;
    let distances: Vec<f32> = (0..corners)
        .flat_map(|j| (0..corners).map(move |i| (i, j)))
        .map(|(i, j)| layout.corner(i, j).distance(camera_position))
        .collect();
    let distance = |i: u32, j: u32| distances[(j * corners + i) as usize];
    let edge_level = |a: f32, b: f32| level_for_distance((a + b) * 0.5, settings);

    let size = 1.0 / n as f32;
    let mut patches = Vec::with_capacity((n * n) as usize);
    for j in 0..n {
        for i in 0..n {
            if let Some(frustum) = frustum {
                if !frustum.is_aabb_visible(&layout.patch_aabb(i, j)) {
                    continue;
                }
            }
            let levels = [
                edge_level(distance(i, j), distance(i, j + 1)),
                edge_level(distance(i + 1, j), distance(i + 1, j + 1)),
                edge_level(distance(i, j), distance(i + 1, j)),
                edge_level(distance(i, j + 1), distance(i + 1, j + 1)),
            ];
            let level = levels.iter().copied().max().unwrap_or(settings.min_level);
            patches.push(PatchData {
                rect: [i as f32 * size, j as f32 * size, size, layout.height_scale],
                levels,
                info: [object_index, level, 0, 0],
            });
        }
    }
    patches
}

/// Patches of one level, drawn with a single instanced call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchGroup {
    pub level: u32,
    pub instances: Range<u32>,
}

/// Sorts `patches` by level and returns one group per level, with instance
/// ranges offset by `base`.
pub fn group_by_level(patches: &mut [PatchData], base: u32) -> Vec<PatchGroup> {
    patches.sort_by_key(PatchData::level);
    let mut groups: Vec<PatchGroup> = Vec::new();
    for (index, patch) in patches.iter().enumerate() {
        let instance = base + index as u32;
        match groups.last_mut() {
            Some(group) if group.level == patch.level() => group.instances.end = instance + 1,
            _ => groups.push(PatchGroup {
                level: patch.level(),
                instances: instance..instance + 1,
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TessellationSettings {
        TessellationSettings {
            min_level: 2,
            max_level: 32,
            min_distance: 10.0,
            max_distance: 100.0,
        }
    }

    fn layout(patches: u32) -> TerrainLayout {
        TerrainLayout {
            transform: Mat4::from_scale(Vec3::new(200.0, 1.0, 200.0)),
            patches,
            height_scale: 10.0,
        }
    }

    #[test]
    fn level_clamps_to_range() {
        let s = settings();
        assert_eq!(level_for_distance(0.0, &s), 32);
        assert_eq!(level_for_distance(10.0, &s), 32);
        assert_eq!(level_for_distance(100.0, &s), 2);
        assert_eq!(level_for_distance(1.0e6, &s), 2);
        let mid = level_for_distance(55.0, &s);
        assert!(mid > 2 && mid < 32);
    }

    #[test]
    fn levels_are_powers_of_two() {
        let s = settings();
        for step in 0..400 {
            let level = level_for_distance(step as f32 * 0.5, &s);
            assert!(level.is_power_of_two(), "distance {}: {level}", step as f32 * 0.5);
        }
        let odd = TessellationSettings {
            min_level: 3,
            max_level: 40,
            ..s
        };
        for step in 0..400 {
            let level = level_for_distance(step as f32 * 0.5, &odd);
            assert!(level.is_power_of_two());
            assert!((4..=32).contains(&level));
        }
    }

    #[test]
    fn level_never_increases_with_distance() {
        let s = settings();
        let mut previous = u32::MAX;
        for step in 0..200 {
            let level = level_for_distance(step as f32, &s);
            assert!(level <= previous);
            previous = level;
        }
    }

    #[test]
    fn shared_edges_agree_between_neighbours() {
        let patches = plan_patches(&layout(8), Vec3::new(-60.0, 5.0, 20.0), None, &settings(), 3);
        assert_eq!(patches.len(), 64);
        for j in 0..8usize {
            for i in 0..7usize {
                let left = &patches[j * 8 + i];
                let right = &patches[j * 8 + i + 1];
                assert_eq!(left.levels[1], right.levels[0]);
            }
        }
        for j in 0..7usize {
            for i in 0..8usize {
                let near = &patches[j * 8 + i];
                let far = &patches[(j + 1) * 8 + i];
                assert_eq!(near.levels[3], far.levels[2]);
            }
        }
        assert!(patches.iter().all(|p| p.info[0] == 3));
    }

    #[test]
    fn interior_level_is_the_finest_edge() {
        let patches = plan_patches(&layout(4), Vec3::new(0.0, 5.0, 0.0), None, &settings(), 0);
        for patch in &patches {
            assert_eq!(patch.level(), *patch.levels.iter().max().unwrap());
        }
    }

    #[test]
    fn patches_behind_the_camera_are_culled() {
        let eye = Vec3::new(0.0, 20.0, 0.0);
        let view = Mat4::look_at_rh(eye, Vec3::new(0.0, 0.0, -50.0), Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 500.0);
        let frustum = Frustum::from_view_proj(&(proj * view));

        let all = plan_patches(&layout(8), eye, None, &settings(), 0);
        let visible = plan_patches(&layout(8), eye, Some(&frustum), &settings(), 0);
        assert!(!visible.is_empty());
        assert!(visible.len() < all.len());
    }

    #[test]
    fn snapped_edge_vertices_match_a_coarser_neighbour() {
        // Fine patch (level 8) next to a patch whose shared edge is level 2.
        let fine_edges = [2, 8, 8, 8];
        let coarse_edges = [2, 2, 2, 2];
        let on_fine_edge: Vec<f32> = (0..patch_vertex_count(8))
            .map(|i| patch_vertex(8, fine_edges, i))
            .filter(|t| t.x == 0.0)
            .map(|t| t.y)
            .collect();
        let on_coarse_edge: Vec<f32> = (0..patch_vertex_count(2))
            .map(|i| patch_vertex(2, coarse_edges, i))
            .filter(|t| t.x == 1.0)
            .map(|t| t.y)
            .collect();
        for y in &on_fine_edge {
            assert!(on_coarse_edge.iter().any(|c| (c - y).abs() < 1e-6), "{y}");
        }
    }

    #[test]
    fn grid_triangles_face_up() {
        for quad in 0..4 {
            let a = patch_vertex(2, [2; 4], quad * 6);
            let b = patch_vertex(2, [2; 4], quad * 6 + 1);
            let c = patch_vertex(2, [2; 4], quad * 6 + 2);
            let ab = Vec3::new(b.x - a.x, 0.0, b.y - a.y);
            let ac = Vec3::new(c.x - a.x, 0.0, c.y - a.y);
            assert!(ab.cross(ac).y > 0.0);
        }
    }

    #[test]
    fn grouping_produces_contiguous_ranges() {
        let mut patches: Vec<PatchData> = [4u32, 2, 4, 8, 2]
            .iter()
            .map(|level| PatchData {
                rect: [0.0; 4],
                levels: [*level; 4],
                info: [0, *level, 0, 0],
            })
            .collect();
        let groups = group_by_level(&mut patches, 10);
        assert_eq!(
            groups,
            vec![
                PatchGroup { level: 2, instances: 10..12 },
                PatchGroup { level: 4, instances: 12..14 },
                PatchGroup { level: 8, instances: 14..15 },
            ]
        );
    }

    #[test]
    fn patch_data_is_48_bytes() {
        assert_eq!(std::mem::size_of::<PatchData>(), 48);
    }
}
