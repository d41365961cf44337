use super::vertex::{v, Vertex};
use glam::Vec3;
use std::f32::consts::PI;

/// UV sphere of radius 1 centred on the origin, wound counter-clockwise
/// when seen from outside.
pub fn sphere_mesh(segments: u32, rings: u32) -> (Vec<Vertex>, Vec<u32>) {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let mut vertices = Vec::with_capacity(((rings + 1) * (segments + 1)) as usize);
    let mut indices = Vec::with_capacity((rings * segments * 6) as usize);

    for ring in 0..=rings {
        let phi = PI * ring as f32 / rings as f32;
        let y = phi.cos();
        let ring_radius = phi.sin();

        for segment in 0..=segments {
            let theta = 2.0 * PI * segment as f32 / segments as f32;
            let x = ring_radius * theta.cos();
            let z = ring_radius * theta.sin();

            let u = segment as f32 / segments as f32;
            let tex_v = ring as f32 / rings as f32;
            let tangent = [-theta.sin(), 0.0, theta.cos(), 1.0];

            vertices.push(v([x, y, z], [x, y, z], [u, tex_v], tangent));
        }
    }

    for ring in 0..rings {
        for segment in 0..segments {
            let current = ring * (segments + 1) + segment;
            let next = current + segments + 1;

            indices.extend_from_slice(&[current, current + 1, next]);
            indices.extend_from_slice(&[current + 1, next + 1, next]);
        }
    }

    (vertices, indices)
}

/// Unit cube centred on the origin with per-face normals and tangents.
pub fn cube_mesh() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, tangent); the bitangent is normal x tangent.
    let faces = [
        (Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_X, Vec3::Z),
        (Vec3::Y, Vec3::X),
        (Vec3::NEG_Y, Vec3::X),
        (Vec3::Z, Vec3::X),
        (Vec3::NEG_Z, Vec3::NEG_X),
    ];

    let mut verts = Vec::with_capacity(24);
    for (normal, tangent) in faces {
        let bitangent = normal.cross(tangent);
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        for (s, t) in corners {
            let pos = (normal + tangent * s + bitangent * t) * 0.5;
            let uv = [(s + 1.0) * 0.5, 1.0 - (t + 1.0) * 0.5];
            verts.push(v(
                pos.to_array(),
                normal.to_array(),
                uv,
                [tangent.x, tangent.y, tangent.z, 1.0],
            ));
        }
    }

    let idx = (0..6u32)
        .flat_map(|f| {
            let o = f * 4;
            [o, o + 1, o + 2, o, o + 2, o + 3]
        })
        .collect::<Vec<_>>();

    (verts, idx)
}

/// Flat `size` x `size` plane in XZ facing +Y, split into
/// `subdivisions` quads per side.
pub fn plane_mesh(size: f32, subdivisions: u32) -> (Vec<Vertex>, Vec<u32>) {
    let cells = subdivisions.max(1);
    let half = size * 0.5;
    let mut verts = Vec::with_capacity(((cells + 1) * (cells + 1)) as usize);

    for row in 0..=cells {
        for col in 0..=cells {
            let u = col as f32 / cells as f32;
            let t = row as f32 / cells as f32;
            verts.push(v(
                [-half + u * size, 0.0, -half + t * size],
                [0.0, 1.0, 0.0],
                [u, t],
                [1.0, 0.0, 0.0, 1.0],
            ));
        }
    }

    let mut idx = Vec::with_capacity((cells * cells * 6) as usize);
    for row in 0..cells {
        for col in 0..cells {
            let a = row * (cells + 1) + col;
            let b = a + cells + 1;
            idx.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }

    (verts, idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_normal(verts: &[Vertex], tri: &[u32]) -> Vec3 {
        let p = |i: u32| Vec3::from(verts[i as usize].pos);
        (p(tri[1]) - p(tri[0])).cross(p(tri[2]) - p(tri[0]))
    }

    #[test]
    fn cube_counts_look_right() {
        let (v, i) = cube_mesh();
        assert_eq!(v.len(), 24);
        assert_eq!(i.len(), 36);
    }

    #[test]
    fn cube_faces_wind_outward() {
        let (verts, idx) = cube_mesh();
        for tri in idx.chunks(3) {
            let winding = triangle_normal(&verts, tri);
            let normal = Vec3::from(verts[tri[0] as usize].normal);
            assert!(winding.dot(normal) > 0.0);
        }
    }

    #[test]
    fn sphere_faces_wind_outward() {
        let (verts, idx) = sphere_mesh(16, 8);
        for tri in idx.chunks(3) {
            let winding = triangle_normal(&verts, tri);
            // Pole triangles are degenerate.
            if winding.length() < 1e-6 {
                continue;
            }
            let centroid: Vec3 = tri
                .iter()
                .map(|&i| Vec3::from(verts[i as usize].pos))
                .sum::<Vec3>()
                / 3.0;
            assert!(winding.dot(centroid) > 0.0);
        }
    }

    #[test]
    fn plane_faces_up() {
        let (verts, idx) = plane_mesh(10.0, 4);
        assert_eq!(verts.len(), 25);
        for tri in idx.chunks(3) {
            assert!(triangle_normal(&verts, tri).y > 0.0);
        }
    }
}
