use glam::Vec3;
use wgpu::util::DeviceExt;

use crate::math::Aabb;
use crate::renderer::Vertex;

/// GPU mesh with its precomputed local-space bounds.
#[derive(Debug)]
pub struct Mesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    local_aabb: Aabb,
}

impl Mesh {
    pub fn from_vertices(device: &wgpu::Device, vertices: &[Vertex], indices: &[u32]) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("VertexBuffer"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("IndexBuffer"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            local_aabb: local_bounds(vertices),
        }
    }

    pub fn vertex_buffer(&self) -> &wgpu::Buffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &wgpu::Buffer {
        &self.index_buffer
    }

    pub fn index_format(&self) -> wgpu::IndexFormat {
        wgpu::IndexFormat::Uint32
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn local_aabb(&self) -> Aabb {
        self.local_aabb
    }
}

/// Bounds of the vertex positions; a unit point box for empty input.
pub fn local_bounds(vertices: &[Vertex]) -> Aabb {
    Aabb::from_points(vertices.iter().map(|v| Vec3::from(v.pos)))
        .unwrap_or_else(|| Aabb::from_point(Vec3::ZERO))
}
