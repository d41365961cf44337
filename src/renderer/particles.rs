//! GPU particle emitters: a compute step advances every live emitter once
//! per frame and a second pipeline draws the particles as camera-facing
//! additive quads.

use std::collections::BTreeMap;
use std::mem;

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use wgpu::util::DeviceExt;

use crate::error::RendererError;
use crate::renderer::internal::buffers::{storage_entry, uniform_entry};
use crate::renderer::pipeline_builder::{PipelineBuilder, ADDITIVE_BLEND};
use crate::renderer::shaders::{ShaderLibrary, ShaderVariant};

const WORKGROUP_SIZE: u32 = 64;
pub const MAX_PARTICLES_PER_EMITTER: u32 = 65_536;

/// Identifies a live emitter. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmitterId(pub u32);

#[derive(Debug, Clone)]
pub struct EmitterDesc {
    pub position: Vec3,
    pub max_particles: u32,
    /// Seconds each particle lives before it respawns.
    pub particle_lifetime: f32,
    /// Seconds during which expired particles respawn. Afterwards they die
    /// for good and the emitter is pruned once the last one is gone.
    pub emission_duration: f32,
    pub speed: f32,
    pub size: f32,
    pub color: Vec4,
    pub gravity: Vec3,
    pub seed: u64,
}

impl Default for EmitterDesc {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            max_particles: 1024,
            particle_lifetime: 2.0,
            emission_duration: 5.0,
            speed: 2.0,
            size: 0.05,
            color: Vec4::new(4.0, 2.0, 0.8, 1.0),
            gravity: Vec3::new(0.0, -1.0, 0.0),
            seed: 0x5eed,
        }
    }
}

#[repr(C, align(16))]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct Particle {
    /// xyz = position, w = remaining life in seconds.
    pub position_life: [f32; 4],
    /// xyz = velocity, w = 1 while alive.
    pub velocity_alive: [f32; 4],
}

impl Particle {
    pub fn is_alive(&self) -> bool {
        self.velocity_alive[3] > 0.5
    }

    pub fn life(&self) -> f32 {
        self.position_life[3]
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
struct EmitterParams {
    /// xyz = emitter origin, w = dt.
    origin_dt: [f32; 4],
    /// x = lifetime, y = speed, z = size, w = 1 while emitting.
    emission: [f32; 4],
    color: [f32; 4],
    /// xyz = gravity.
    gravity: [f32; 4],
    /// x = particle count, y = frame counter for respawn randomness.
    counts: [u32; 4],
}

/// Random direction on the unit sphere.
pub fn outward_direction(rng: &mut impl Rng) -> Vec3 {
    let z: f32 = rng.gen_range(-1.0..=1.0);
    let phi: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
    let r = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(r * phi.cos(), z, r * phi.sin())
}

/// Initial particle states. Lifetimes are staggered so the emitter starts
/// out with a steady stream instead of a single burst.
pub fn initial_particles(desc: &EmitterDesc) -> Vec<Particle> {
    let mut rng = SmallRng::seed_from_u64(desc.seed);
    let count = desc.max_particles.clamp(1, MAX_PARTICLES_PER_EMITTER);
    let lifetime = desc.particle_lifetime.max(f32::EPSILON);
    (0..count)
        .map(|i| {
            let velocity = outward_direction(&mut rng) * desc.speed;
            let life = lifetime * (i + 1) as f32 / count as f32;
            Particle {
                position_life: desc.position.extend(life).to_array(),
                velocity_alive: velocity.extend(1.0).to_array(),
            }
        })
        .collect()
}

/// One simulation step of a particle. Mirrors `particle_update.wgsl`.
pub fn step_particle(
    particle: &mut Particle,
    dt: f32,
    origin: Vec3,
    gravity: Vec3,
    lifetime: f32,
    emitting: bool,
    respawn_velocity: Vec3,
) {
    if !particle.is_alive() {
        return;
    }
    let mut position = Vec3::from_slice(&particle.position_life[..3]);
    let mut velocity = Vec3::from_slice(&particle.velocity_alive[..3]);
    let mut life = particle.life() - dt;

    if life <= 0.0 {
        if !emitting {
            particle.position_life[3] = 0.0;
            particle.velocity_alive[3] = 0.0;
            return;
        }
        position = origin;
        velocity = respawn_velocity;
        life = lifetime;
    } else {
        velocity += gravity * dt;
        position += velocity * dt;
    }

    particle.position_life = position.extend(life).to_array();
    particle.velocity_alive = velocity.extend(1.0).to_array();
}

/// Emission timeline of an emitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitterClock {
    pub age: f32,
    pub emission_duration: f32,
    pub particle_lifetime: f32,
}

impl EmitterClock {
    pub fn advance(&mut self, dt: f32) {
        self.age += dt.max(0.0);
    }

    pub fn is_emitting(&self) -> bool {
        self.age < self.emission_duration
    }

    /// True once emission stopped and every particle has run out of life.
    pub fn is_finished(&self) -> bool {
        self.age >= self.emission_duration + self.particle_lifetime
    }
}

struct Emitter {
    desc: EmitterDesc,
    clock: EmitterClock,
    count: u32,
    _particles: wgpu::Buffer,
    params: wgpu::Buffer,
    update_group: wgpu::BindGroup,
    render_group: wgpu::BindGroup,
}

impl Emitter {
    fn params(&self, dt: f32, frame: u32) -> EmitterParams {
        EmitterParams {
            origin_dt: self.desc.position.extend(dt).to_array(),
            emission: [
                self.desc.particle_lifetime,
                self.desc.speed,
                self.desc.size,
                if self.clock.is_emitting() { 1.0 } else { 0.0 },
            ],
            color: self.desc.color.to_array(),
            gravity: self.desc.gravity.extend(0.0).to_array(),
            counts: [self.count, frame, 0, 0],
        }
    }
}

pub(crate) struct ParticleSystem {
    update_pipeline: wgpu::ComputePipeline,
    render_pipeline: wgpu::RenderPipeline,
    update_layout: wgpu::BindGroupLayout,
    render_layout: wgpu::BindGroupLayout,
    emitters: BTreeMap<EmitterId, Emitter>,
    next_id: u32,
    frame: u32,
}

impl ParticleSystem {
    pub(crate) fn new(
        device: &wgpu::Device,
        shaders: &ShaderLibrary,
        frame_layout: &wgpu::BindGroupLayout,
        color_format: wgpu::TextureFormat,
        depth_format: wgpu::TextureFormat,
    ) -> Result<Self, RendererError> {
        let update_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ParticleUpdateBindLayout"),
            entries: &[
                storage_entry(0, wgpu::ShaderStages::COMPUTE, false),
                uniform_entry(1, wgpu::ShaderStages::COMPUTE),
            ],
        });
        let render_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ParticleRenderBindLayout"),
            entries: &[
                storage_entry(0, wgpu::ShaderStages::VERTEX, true),
                uniform_entry(1, wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT),
            ],
        });

        let update_shader = shaders.module(device, ShaderVariant::ParticleUpdate)?;
        let update_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ParticleUpdatePipelineLayout"),
            bind_group_layouts: &[&update_layout],
            push_constant_ranges: &[],
        });
        let update_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("ParticleUpdatePipeline"),
            layout: Some(&update_pipeline_layout),
            module: &update_shader,
            entry_point: Some("update_particles"),
            compilation_options: Default::default(),
            cache: None,
        });

        let render_shader = shaders.module(device, ShaderVariant::ParticleRender)?;
        let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ParticleRenderPipelineLayout"),
            bind_group_layouts: &[frame_layout, &render_layout],
            push_constant_ranges: &[],
        });
        let render_pipeline = PipelineBuilder::new(device, &render_pipeline_layout, &render_shader)
            .with_label("ParticleRenderPipeline")
            .with_color_target(color_format, Some(ADDITIVE_BLEND))
            .with_depth_stencil(depth_format, false, wgpu::CompareFunction::Less)
            .with_no_culling()
            .build();

        Ok(Self {
            update_pipeline,
            render_pipeline,
            update_layout,
            render_layout,
            emitters: BTreeMap::new(),
            next_id: 0,
            frame: 0,
        })
    }

    pub(crate) fn spawn(&mut self, device: &wgpu::Device, desc: EmitterDesc) -> EmitterId {
        let particles = initial_particles(&desc);
        let count = particles.len() as u32;
        let particle_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("ParticleStateBuffer"),
            contents: bytemuck::cast_slice(&particles),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        });
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ParticleParams"),
            size: mem::size_of::<EmitterParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let entries = [
            wgpu::BindGroupEntry {
                binding: 0,
                resource: particle_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: params.as_entire_binding(),
            },
        ];
        let update_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ParticleUpdateBindGroup"),
            layout: &self.update_layout,
            entries: &entries,
        });
        let render_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ParticleRenderBindGroup"),
            layout: &self.render_layout,
            entries: &entries,
        });

        let id = EmitterId(self.next_id);
        self.next_id += 1;
        log::debug!("Spawned particle emitter {:?} with {} particles", id, count);
        self.emitters.insert(
            id,
            Emitter {
                clock: EmitterClock {
                    age: 0.0,
                    emission_duration: desc.emission_duration,
                    particle_lifetime: desc.particle_lifetime,
                },
                desc,
                count,
                _particles: particle_buffer,
                params,
                update_group,
                render_group,
            },
        );
        id
    }

    pub(crate) fn contains(&self, id: EmitterId) -> bool {
        self.emitters.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.emitters.len()
    }

    /// Advances every live emitter by `dt` in its own compute pass.
    pub(crate) fn update(&mut self, encoder: &mut wgpu::CommandEncoder, queue: &wgpu::Queue, dt: f32) {
        if self.emitters.is_empty() {
            return;
        }
        self.frame = self.frame.wrapping_add(1);
        for emitter in self.emitters.values_mut() {
            emitter.clock.advance(dt);
            queue.write_buffer(
                &emitter.params,
                0,
                bytemuck::bytes_of(&emitter.params(dt, self.frame)),
            );
        }

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("ParticleUpdatePass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.update_pipeline);
        for emitter in self.emitters.values() {
            pass.set_bind_group(0, &emitter.update_group, &[]);
            pass.dispatch_workgroups(emitter.count.div_ceil(WORKGROUP_SIZE), 1, 1);
        }
    }

    /// Draws the requested emitters; unknown ids are skipped.
    pub(crate) fn render(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        frame: &wgpu::BindGroup,
        ids: &[EmitterId],
    ) -> u32 {
        let mut drawn = 0;
        pass.set_pipeline(&self.render_pipeline);
        pass.set_bind_group(0, frame, &[]);
        for id in ids {
            let Some(emitter) = self.emitters.get(id) else {
                log::warn!("Skipping draw of unknown particle emitter {:?}", id);
                continue;
            };
            pass.set_bind_group(1, &emitter.render_group, &[]);
            pass.draw(0..6, 0..emitter.count);
            drawn += 1;
        }
        drawn
    }

    /// Drops emitters whose emission and particle lifetimes have elapsed.
    pub(crate) fn prune(&mut self) -> usize {
        let before = self.emitters.len();
        self.emitters.retain(|id, emitter| {
            let keep = !emitter.clock.is_finished();
            if !keep {
                log::debug!("Pruned finished particle emitter {:?}", id);
            }
            keep
        });
        before - self.emitters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> EmitterDesc {
        EmitterDesc {
            max_particles: 64,
            particle_lifetime: 1.0,
            emission_duration: 3.0,
            speed: 2.0,
            ..EmitterDesc::default()
        }
    }

    #[test]
    fn initial_particles_are_alive_and_staggered() {
        let particles = initial_particles(&desc());
        assert_eq!(particles.len(), 64);
        assert!(particles.iter().all(Particle::is_alive));
        assert!(particles.windows(2).all(|w| w[0].life() < w[1].life()));
        assert!((particles[63].life() - 1.0).abs() < 1e-6);
        for particle in &particles {
            let speed = Vec3::from_slice(&particle.velocity_alive[..3]).length();
            assert!((speed - 2.0).abs() < 1e-4);
        }
    }

    #[test]
    fn expired_particle_respawns_while_emitting() {
        let mut particle = initial_particles(&desc())[0];
        let velocity = Vec3::new(0.0, 3.0, 0.0);
        step_particle(&mut particle, 10.0, Vec3::ONE, Vec3::ZERO, 1.5, true, velocity);
        assert!(particle.is_alive());
        assert_eq!(particle.life(), 1.5);
        assert_eq!(&particle.position_life[..3], &[1.0, 1.0, 1.0]);
        assert_eq!(&particle.velocity_alive[..3], &[0.0, 3.0, 0.0]);
    }

    #[test]
    fn expired_particle_dies_after_emission_ends() {
        let mut particle = initial_particles(&desc())[0];
        step_particle(&mut particle, 10.0, Vec3::ZERO, Vec3::ZERO, 1.0, false, Vec3::X);
        assert!(!particle.is_alive());

        // Dead particles stay dead even if emission resumed.
        step_particle(&mut particle, 0.1, Vec3::ZERO, Vec3::ZERO, 1.0, true, Vec3::X);
        assert!(!particle.is_alive());
    }

    #[test]
    fn living_particle_integrates_gravity() {
        let mut particle = Particle {
            position_life: [0.0, 0.0, 0.0, 1.0],
            velocity_alive: [1.0, 0.0, 0.0, 1.0],
        };
        step_particle(&mut particle, 0.5, Vec3::ZERO, Vec3::new(0.0, -2.0, 0.0), 1.0, true, Vec3::ZERO);
        assert_eq!(particle.life(), 0.5);
        assert_eq!(&particle.velocity_alive[..3], &[1.0, -1.0, 0.0]);
        assert_eq!(&particle.position_life[..3], &[0.5, -0.5, 0.0]);
    }

    #[test]
    fn clock_finishes_after_emission_plus_lifetime() {
        let mut clock = EmitterClock {
            age: 0.0,
            emission_duration: 3.0,
            particle_lifetime: 1.0,
        };
        clock.advance(2.9);
        assert!(clock.is_emitting());
        clock.advance(0.2);
        assert!(!clock.is_emitting());
        assert!(!clock.is_finished());
        clock.advance(1.0);
        assert!(clock.is_finished());
    }

    #[test]
    fn outward_directions_are_unit_length() {
        let mut rng = SmallRng::seed_from_u64(11);
        for _ in 0..100 {
            assert!((outward_direction(&mut rng).length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn particle_layout_is_32_bytes() {
        assert_eq!(mem::size_of::<Particle>(), 32);
        assert_eq!(mem::size_of::<EmitterParams>(), 80);
    }
}
