//! Tiled forward+ light assignment.
//!
//! The screen is split into `TILE_SIZE` pixel tiles and every tile gets the
//! list of point lights whose projected influence circle touches it. The GPU
//! stage runs one 16x16 workgroup per tile; [`TileGrid::cull_cpu`] is the
//! reference implementation of the same math.
//!
//! Overflow is deterministic: each tile keeps the lowest-indexed lights up
//! to its capacity and counts the rest in a frame-wide overflow counter.

use std::mem;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec4Swizzles};

use crate::error::RendererError;
use crate::renderer::binding::{BoundPass, FrameResource, PassBindings, ResourceRegistry};
use crate::renderer::camera::FrameCamera;
use crate::renderer::internal::readback;
use crate::renderer::lights::{PointLight, MAX_POINT_LIGHTS};
use crate::renderer::shaders::{ShaderLibrary, ShaderVariant};

pub const TILE_SIZE: u32 = 16;
/// Stride of one tile's slice in the index buffer and the hard cap on the
/// configurable per-tile capacity.
pub const MAX_LIGHTS_PER_TILE: u32 = 256;

/// Where a light's influence sphere lands on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScreenFootprint {
    /// Entirely behind the near plane.
    Hidden,
    /// Straddles the near plane; treated as touching every tile.
    Everywhere,
    Circle { center: Vec2, radius: f32 },
}

/// Projects a light's influence sphere to a pixel-space circle.
pub fn project_light(
    light: &PointLight,
    view: &Mat4,
    proj: &Mat4,
    near: f32,
    viewport: Vec2,
) -> ScreenFootprint {
    let view_pos = *view * light.position.extend(1.0);
    let depth = -view_pos.z;
    if depth + light.range < near {
        return ScreenFootprint::Hidden;
    }
    if depth < near {
        return ScreenFootprint::Everywhere;
    }

    let clip = *proj * view_pos;
    let ndc = clip.xy() / clip.w;
    let center = Vec2::new(
        (ndc.x * 0.5 + 0.5) * viewport.x,
        (0.5 - ndc.y * 0.5) * viewport.y,
    );
    let radius = light.range * proj.y_axis.y / depth * (viewport.y * 0.5);
    ScreenFootprint::Circle { center, radius }
}

/// Whether a circle reaches the rectangle `[min, max]`: squared distance
/// from the centre to the nearest point of the rectangle against radius².
pub fn circle_touches_rect(center: Vec2, radius: f32, min: Vec2, max: Vec2) -> bool {
    let nearest = center.clamp(min, max);
    center.distance_squared(nearest) <= radius * radius
}

/// Screen partition into tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub width: u32,
    pub height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
}

impl TileGrid {
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            tiles_x: width.div_ceil(TILE_SIZE),
            tiles_y: height.div_ceil(TILE_SIZE),
        }
    }

    pub fn tile_count(&self) -> u32 {
        self.tiles_x * self.tiles_y
    }

    /// Pixel rectangle of a tile, clipped to the screen.
    pub fn tile_rect(&self, tile_x: u32, tile_y: u32) -> (Vec2, Vec2) {
        let min = Vec2::new((tile_x * TILE_SIZE) as f32, (tile_y * TILE_SIZE) as f32);
        let max = Vec2::new(
            ((tile_x + 1) * TILE_SIZE).min(self.width) as f32,
            ((tile_y + 1) * TILE_SIZE).min(self.height) as f32,
        );
        (min, max)
    }

    pub fn tile_of_pixel(&self, pixel: Vec2) -> Option<(u32, u32)> {
        if pixel.x < 0.0 || pixel.y < 0.0 {
            return None;
        }
        let (x, y) = (pixel.x as u32 / TILE_SIZE, pixel.y as u32 / TILE_SIZE);
        (x < self.tiles_x && y < self.tiles_y).then_some((x, y))
    }

    /// Reference culling with the same math and overflow policy as the
    /// compute shader.
    pub fn cull_cpu(
        &self,
        lights: &[PointLight],
        camera: &FrameCamera,
        max_per_tile: u32,
    ) -> TileLightGrid {
        let capacity = max_per_tile.min(MAX_LIGHTS_PER_TILE);
        let viewport = Vec2::new(self.width as f32, self.height as f32);
        let proj = camera.projection();
        let footprints: Vec<ScreenFootprint> = lights
            .iter()
            .map(|light| {
                if light.active {
                    project_light(light, &camera.view, &proj, camera.near, viewport)
                } else {
                    ScreenFootprint::Hidden
                }
            })
            .collect();

        let mut grid = TileLightGrid::empty(*self);
        for tile_y in 0..self.tiles_y {
            for tile_x in 0..self.tiles_x {
                let (min, max) = self.tile_rect(tile_x, tile_y);
                let tile = (tile_y * self.tiles_x + tile_x) as usize;
                let base = tile * MAX_LIGHTS_PER_TILE as usize;
                for (index, footprint) in footprints.iter().enumerate() {
                    let touches = match *footprint {
                        ScreenFootprint::Hidden => false,
                        ScreenFootprint::Everywhere => true,
                        ScreenFootprint::Circle { center, radius } => {
                            circle_touches_rect(center, radius, min, max)
                        }
                    };
                    if !touches {
                        continue;
                    }
                    let count = grid.counts[tile];
                    if count < capacity {
                        grid.indices[base + count as usize] = index as u32;
                        grid.counts[tile] += 1;
                    } else {
                        grid.overflow += 1;
                    }
                }
            }
        }
        grid
    }
}

/// Result of light culling: per-tile counts plus a flat index array with a
/// fixed stride of [`MAX_LIGHTS_PER_TILE`] per tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileLightGrid {
    pub grid: TileGrid,
    pub counts: Vec<u32>,
    pub indices: Vec<u32>,
    pub overflow: u32,
}

impl TileLightGrid {
    pub fn empty(grid: TileGrid) -> Self {
        let tiles = grid.tile_count() as usize;
        Self {
            grid,
            counts: vec![0; tiles],
            indices: vec![0; tiles * MAX_LIGHTS_PER_TILE as usize],
            overflow: 0,
        }
    }

    pub fn lights_in_tile(&self, tile_x: u32, tile_y: u32) -> &[u32] {
        let tile = (tile_y * self.grid.tiles_x + tile_x) as usize;
        let base = tile * MAX_LIGHTS_PER_TILE as usize;
        let count = self.counts.get(tile).copied().unwrap_or(0) as usize;
        &self.indices[base..base + count.min(MAX_LIGHTS_PER_TILE as usize)]
    }

    pub fn max_count(&self) -> u32 {
        self.counts.iter().copied().max().unwrap_or(0)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct CullingParams {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    /// x = width, y = height, z = near.
    pub viewport: [f32; 4],
    /// x = tiles across, y = tiles down, z = capacity, w = light count.
    pub tiles: [u32; 4],
}

impl CullingParams {
    pub fn new(camera: &FrameCamera, grid: TileGrid, capacity: u32, light_count: u32) -> Self {
        Self {
            view: camera.view.to_cols_array_2d(),
            proj: camera.projection().to_cols_array_2d(),
            viewport: [grid.width as f32, grid.height as f32, camera.near, 0.0],
            tiles: [
                grid.tiles_x,
                grid.tiles_y,
                capacity.min(MAX_LIGHTS_PER_TILE),
                light_count,
            ],
        }
    }
}

pub(crate) fn culling_bindings() -> PassBindings {
    PassBindings::new("TileCullingBindings", wgpu::ShaderStages::COMPUTE)
        .read(FrameResource::PointLights)
        .read(FrameResource::CullingParams)
        .read_write(FrameResource::TileLightCounts)
        .read_write(FrameResource::TileLightIndices)
        .read_write(FrameResource::TileOverflow)
}

/// GPU side of the stage: the compute pipeline plus the tile buffers,
/// which are recreated whenever the screen size changes.
pub(crate) struct LightCullingStage {
    pipeline: wgpu::ComputePipeline,
    bindings: BoundPass,
    params_buffer: wgpu::Buffer,
    counts: wgpu::Buffer,
    indices: wgpu::Buffer,
    overflow: wgpu::Buffer,
    grid: TileGrid,
    capacity: u32,
}

impl LightCullingStage {
    pub(crate) fn new(
        device: &wgpu::Device,
        shaders: &ShaderLibrary,
        grid: TileGrid,
        capacity: u32,
    ) -> Result<Self, RendererError> {
        let shader = shaders.module(device, ShaderVariant::TileCulling)?;
        let bindings = BoundPass::new(device, culling_bindings());

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("TileCullingPipelineLayout"),
            bind_group_layouts: &[bindings.layout()],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("TileCullingPipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("cull_lights"),
            compilation_options: Default::default(),
            cache: None,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("CullingParamsBuffer"),
            size: mem::size_of::<CullingParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let (counts, indices) = Self::create_tile_buffers(device, grid);
        let overflow = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("TileOverflowBuffer"),
            size: 16,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        log::info!(
            "Light culling: {}x{} tiles, {} lights per tile",
            grid.tiles_x,
            grid.tiles_y,
            capacity
        );

        Ok(Self {
            pipeline,
            bindings,
            params_buffer,
            counts,
            indices,
            overflow,
            grid,
            capacity: capacity.min(MAX_LIGHTS_PER_TILE),
        })
    }

    fn create_tile_buffers(device: &wgpu::Device, grid: TileGrid) -> (wgpu::Buffer, wgpu::Buffer) {
        let usage =
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
        let counts = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("TileLightCountsBuffer"),
            size: (grid.tile_count() as u64 * 4).max(16),
            usage,
            mapped_at_creation: false,
        });
        let indices = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("TileLightIndicesBuffer"),
            size: grid.tile_count() as u64 * MAX_LIGHTS_PER_TILE as u64 * 4,
            usage,
            mapped_at_creation: false,
        });
        (counts, indices)
    }

    pub(crate) fn grid(&self) -> TileGrid {
        self.grid
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }

    pub(crate) fn resize(&mut self, device: &wgpu::Device, grid: TileGrid) {
        if grid == self.grid {
            return;
        }
        let (counts, indices) = Self::create_tile_buffers(device, grid);
        self.counts = counts;
        self.indices = indices;
        self.grid = grid;
    }

    pub(crate) fn register(&self, registry: &mut ResourceRegistry) {
        registry.insert_buffer(FrameResource::CullingParams, &self.params_buffer);
        registry.insert_buffer(FrameResource::TileLightCounts, &self.counts);
        registry.insert_buffer(FrameResource::TileLightIndices, &self.indices);
        registry.insert_buffer(FrameResource::TileOverflow, &self.overflow);
    }

    pub(crate) fn prepare(&self, queue: &wgpu::Queue, camera: &FrameCamera, light_count: u32) {
        let params = CullingParams::new(
            camera,
            self.grid,
            self.capacity,
            light_count.min(MAX_POINT_LIGHTS as u32),
        );
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
        queue.write_buffer(&self.overflow, 0, bytemuck::bytes_of(&[0u32; 4]));
    }

    /// Records the culling dispatch in its own compute pass; the pass
    /// boundary orders its writes before the main pass reads them.
    pub(crate) fn dispatch(
        &mut self,
        device: &wgpu::Device,
        registry: &ResourceRegistry,
        encoder: &mut wgpu::CommandEncoder,
    ) -> Result<(), RendererError> {
        self.bindings.refresh(device, registry)?;
        let Some(bind_group) = self.bindings.bind_group() else {
            return Ok(());
        };

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("TileCullingPass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(self.grid.tiles_x, self.grid.tiles_y, 1);
        Ok(())
    }

    /// Blocking readback of the last culling result.
    pub(crate) fn read_back(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<TileLightGrid, RendererError> {
        let tiles = self.grid.tile_count() as u64;
        let counts = readback::read_buffer(device, queue, &self.counts, tiles * 4)?;
        let indices = readback::read_buffer(
            device,
            queue,
            &self.indices,
            tiles * MAX_LIGHTS_PER_TILE as u64 * 4,
        )?;
        let overflow = readback::read_buffer(device, queue, &self.overflow, 4)?;

        Ok(TileLightGrid {
            grid: self.grid,
            counts: bytemuck::pod_collect_to_vec(&counts),
            indices: bytemuck::pod_collect_to_vec(&indices),
            overflow: bytemuck::pod_read_unaligned(&overflow[..4]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn light(position: Vec3, range: f32) -> PointLight {
        PointLight {
            position,
            range,
            color: Vec3::ONE,
            intensity: 1.0,
            active: true,
            shadow_index: -1,
        }
    }

    fn camera(aspect: f32) -> FrameCamera {
        FrameCamera::look_at(
            Vec3::ZERO,
            Vec3::NEG_Z,
            Vec3::Y,
            std::f32::consts::FRAC_PI_2,
            aspect,
            0.1,
            100.0,
        )
    }

    #[test]
    fn grid_rounds_partial_tiles_up() {
        let grid = TileGrid::new(33, 17);
        assert_eq!((grid.tiles_x, grid.tiles_y), (3, 2));
        let (min, max) = grid.tile_rect(2, 1);
        assert_eq!(min, Vec2::new(32.0, 16.0));
        assert_eq!(max, Vec2::new(33.0, 17.0));
    }

    #[test]
    fn light_on_axis_projects_to_screen_centre() {
        let cam = camera(1.0);
        let footprint = project_light(
            &light(Vec3::new(0.0, 0.0, -10.0), 1.0),
            &cam.view,
            &cam.projection(),
            cam.near,
            Vec2::new(100.0, 100.0),
        );
        let ScreenFootprint::Circle { center, radius } = footprint else {
            panic!("expected a circle, got {footprint:?}");
        };
        assert!(center.abs_diff_eq(Vec2::new(50.0, 50.0), 1e-3));
        // range / depth * half height at a 90 degree FOV
        assert!((radius - 5.0).abs() < 1e-3);
    }

    #[test]
    fn lights_behind_the_camera_are_hidden() {
        let cam = camera(1.0);
        let footprint = project_light(
            &light(Vec3::new(0.0, 0.0, 10.0), 1.0),
            &cam.view,
            &cam.projection(),
            cam.near,
            Vec2::splat(64.0),
        );
        assert_eq!(footprint, ScreenFootprint::Hidden);
    }

    #[test]
    fn lights_around_the_camera_touch_every_tile() {
        let grid = TileGrid::new(64, 64);
        let result = grid.cull_cpu(&[light(Vec3::ZERO, 5.0)], &camera(1.0), 16);
        assert!(result.counts.iter().all(|&count| count == 1));
    }

    #[test]
    fn circle_rect_test_uses_nearest_point() {
        let min = Vec2::ZERO;
        let max = Vec2::splat(16.0);
        assert!(circle_touches_rect(Vec2::new(20.0, 8.0), 4.0, min, max));
        assert!(!circle_touches_rect(Vec2::new(20.0, 8.0), 3.9, min, max));
        // Diagonal: nearest point is the corner.
        assert!(!circle_touches_rect(Vec2::new(19.0, 19.0), 4.0, min, max));
        assert!(circle_touches_rect(Vec2::new(19.0, 19.0), 4.5, min, max));
    }

    #[test]
    fn overflow_keeps_lowest_indices() {
        let grid = TileGrid::new(16, 16);
        let lights: Vec<_> = (0..10)
            .map(|_| light(Vec3::new(0.0, 0.0, -5.0), 2.0))
            .collect();
        let result = grid.cull_cpu(&lights, &camera(1.0), 4);
        assert_eq!(result.lights_in_tile(0, 0), &[0, 1, 2, 3]);
        assert_eq!(result.overflow, 6);
    }

    #[test]
    fn inactive_lights_are_skipped() {
        let grid = TileGrid::new(32, 32);
        let mut off = light(Vec3::new(0.0, 0.0, -5.0), 2.0);
        off.active = false;
        let result = grid.cull_cpu(&[off], &camera(1.0), 8);
        assert_eq!(result.max_count(), 0);
    }
}
