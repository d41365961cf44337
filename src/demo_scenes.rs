use glam::{Mat4, Quat, Vec3, Vec4};
use winit::keyboard::{Key, NamedKey};

use wgpu_frame_graph::asset::{MeshHandle, TextureHandle};
use wgpu_frame_graph::renderer::{
    cube_mesh, plane_mesh, sphere_mesh, EmitterDesc, EmitterId, FrameCamera, PointLightDesc,
    Texture,
};
use wgpu_frame_graph::{Renderer, RendererError, SceneDriver};

const HEIGHTMAP_SIZE: u32 = 128;
const ORBIT_RADIUS: f32 = 14.0;

/// Orbiting camera over a terrain with a ring of spheres, a few shadowed
/// point lights, a swarm of small unshadowed ones and a particle fountain.
///
/// F1 toggles the tile heatmap, P switches between classic and PBR shading,
/// B toggles bloom.
pub struct ShowcaseScene {
    cube: Option<MeshHandle>,
    sphere: Option<MeshHandle>,
    ground: Option<MeshHandle>,
    heightmap: Option<TextureHandle>,
    fountain: Option<EmitterId>,
    overlay: bool,
    pbr: bool,
    bloom: bool,
}

impl ShowcaseScene {
    pub fn new() -> Self {
        Self {
            cube: None,
            sphere: None,
            ground: None,
            heightmap: None,
            fountain: None,
            overlay: false,
            pbr: false,
            bloom: true,
        }
    }

    fn fountain_desc() -> EmitterDesc {
        EmitterDesc {
            position: Vec3::new(0.0, 1.0, 0.0),
            max_particles: 4096,
            emission_duration: f32::INFINITY,
            ..EmitterDesc::default()
        }
    }
}

fn rolling_hills(size: u32) -> Vec<f32> {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let u = x as f32 / size as f32;
            let v = y as f32 / size as f32;
            let h = 0.5
                + 0.25 * (u * std::f32::consts::TAU * 2.0).sin() * (v * std::f32::consts::TAU).cos()
                + 0.1 * (u * 17.0 + v * 11.0).sin();
            let h = h.clamp(0.0, 1.0);
            pixels.extend_from_slice(&[h, h, h, 1.0]);
        }
    }
    pixels
}

impl SceneDriver for ShowcaseScene {
    fn setup(&mut self, renderer: &mut Renderer) {
        let (vertices, indices) = cube_mesh();
        self.cube = Some(renderer.add_mesh(&vertices, &indices));
        let (vertices, indices) = sphere_mesh(32, 16);
        self.sphere = Some(renderer.add_mesh(&vertices, &indices));
        let (vertices, indices) = plane_mesh(1.0, 1);
        self.ground = Some(renderer.add_mesh(&vertices, &indices));

        let heights = rolling_hills(HEIGHTMAP_SIZE);
        let texture = Texture::from_rgba32f(
            renderer.device(),
            renderer.queue(),
            &heights,
            HEIGHTMAP_SIZE,
            HEIGHTMAP_SIZE,
            Some("DemoHeightmap"),
        );
        self.heightmap = Some(renderer.add_texture(texture));
        self.fountain = Some(renderer.spawn_emitter(Self::fountain_desc()));
        self.pbr = renderer.settings().pbr;
    }

    fn render(&mut self, renderer: &mut Renderer, dt: f32, time: f32) -> Result<(), RendererError> {
        let angle = time * 0.15;
        let eye = Vec3::new(angle.cos() * ORBIT_RADIUS, 6.0, angle.sin() * ORBIT_RADIUS);
        let camera = FrameCamera::look_at(
            eye,
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::Y,
            60f32.to_radians(),
            renderer.aspect_ratio(),
            0.1,
            200.0,
        );
        renderer.begin_frame(camera, dt);

        renderer.add_dir_light(Vec3::new(-0.4, -1.0, -0.3), Vec3::new(1.0, 0.95, 0.85), 2.5, true);
        for i in 0..4 {
            let a = time * 0.6 + i as f32 * std::f32::consts::FRAC_PI_2;
            renderer.add_point_light(PointLightDesc {
                position: Vec3::new(a.cos() * 5.0, 2.0, a.sin() * 5.0),
                range: 8.0,
                color: Vec3::new(1.0, 0.6 + 0.1 * i as f32, 0.4),
                intensity: 12.0,
                casts_shadows: true,
            });
        }
        for i in 0..200 {
            let a = i as f32 * 0.73 + time * 0.2;
            let r = 3.0 + (i % 9) as f32;
            renderer.add_point_light(PointLightDesc {
                position: Vec3::new(a.cos() * r, 0.4, a.sin() * r),
                range: 2.0,
                color: Vec3::new((i % 3) as f32 * 0.5, 0.5, 1.0 - (i % 3) as f32 * 0.3),
                intensity: 3.0,
                casts_shadows: false,
            });
        }

        renderer.reset_material();
        if let Some(heightmap) = self.heightmap {
            renderer.set_current_base_color(Vec4::new(0.35, 0.5, 0.3, 1.0));
            renderer.set_current_pbr_factors(0.0, 0.9);
            let terrain = Mat4::from_translation(Vec3::new(0.0, -1.5, 0.0))
                * Mat4::from_scale(Vec3::new(60.0, 1.0, 60.0));
            renderer.draw_terrain(heightmap, terrain, 8, 3.0);
        }

        if let Some(ground) = self.ground {
            renderer.set_current_base_color(Vec4::new(0.6, 0.6, 0.62, 1.0));
            renderer.draw_mesh(ground, Mat4::from_scale(Vec3::new(12.0, 1.0, 12.0)));
        }

        if let Some(sphere) = self.sphere {
            for i in 0..8 {
                let a = i as f32 / 8.0 * std::f32::consts::TAU;
                let t = i as f32 / 7.0;
                renderer.set_current_base_color(Vec4::new(0.9, 0.3 + 0.5 * t, 0.2, 1.0));
                renderer.set_current_pbr_factors(t, 1.0 - 0.8 * t);
                renderer.set_current_shininess(8.0 + 120.0 * t, 0.6);
                renderer.draw_mesh(
                    sphere,
                    Mat4::from_translation(Vec3::new(a.cos() * 3.5, 1.0, a.sin() * 3.5)),
                );
            }
        }

        if let Some(cube) = self.cube {
            renderer.reset_material();
            let spin = Quat::from_rotation_y(time * 0.5);
            let transform =
                Mat4::from_scale_rotation_translation(Vec3::splat(1.2), spin, Vec3::new(0.0, 0.6, 0.0));
            renderer.draw_mesh(cube, transform);
        }

        if let Some(fountain) = self.fountain {
            if renderer.emitter_alive(fountain) {
                renderer.draw_particles(fountain);
            }
        }

        renderer.end_frame()
    }

    fn key_pressed(&mut self, key: &Key, renderer: &mut Renderer) {
        match key {
            Key::Named(NamedKey::F1) => {
                self.overlay = !self.overlay;
                renderer.set_debug_overlay(self.overlay);
            }
            Key::Character(c) if c.as_str().eq_ignore_ascii_case("p") => {
                self.pbr = !self.pbr;
                renderer.set_pbr_mode(self.pbr);
                log::info!("PBR shading {}", if self.pbr { "on" } else { "off" });
            }
            Key::Character(c) if c.as_str().eq_ignore_ascii_case("b") => {
                self.bloom = !self.bloom;
                let mut bloom = renderer.settings().bloom.clone();
                bloom.enabled = self.bloom;
                renderer.set_bloom(bloom);
            }
            _ => {}
        }
    }
}
