use std::collections::HashMap;
use std::mem;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::asset::{Assets, TextureHandle};
use crate::renderer::binding::{FrameResource, ResourceRegistry};
use crate::renderer::lights::{PointLightRaw, MAX_POINT_LIGHTS};
use crate::renderer::material::{Material, TextureSlot, MATERIAL_TEXTURE_SLOTS};
use crate::renderer::shadows::DirectionalLightUniform;
use crate::renderer::terrain::PatchData;
use crate::renderer::uniforms::{CameraUniform, ObjectData, ShadingUniform};

pub(crate) fn uniform_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn storage_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    read_only: bool,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

const SCENE_STAGES: wgpu::ShaderStages =
    wgpu::ShaderStages::VERTEX.union(wgpu::ShaderStages::FRAGMENT);

/// Group 0 of every scene pipeline: camera plus frame-wide shading values.
pub(crate) struct FrameBuffer {
    pub(crate) camera: wgpu::Buffer,
    pub(crate) shading: wgpu::Buffer,
    pub(crate) bind_group: wgpu::BindGroup,
    pub(crate) bind_layout: wgpu::BindGroupLayout,
}

impl FrameBuffer {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let camera = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("CameraBuffer"),
            contents: bytemuck::bytes_of(&CameraUniform::new()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let shading = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("ShadingBuffer"),
            contents: bytemuck::bytes_of(&ShadingUniform::new()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("FrameBindLayout"),
            entries: &[
                uniform_entry(0, SCENE_STAGES),
                uniform_entry(1, SCENE_STAGES),
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("FrameBindGroup"),
            layout: &bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: camera.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: shading.as_entire_binding(),
                },
            ],
        });

        Self {
            camera,
            shading,
            bind_group,
            bind_layout,
        }
    }

    pub(crate) fn update(
        &self,
        queue: &wgpu::Queue,
        camera: &CameraUniform,
        shading: &ShadingUniform,
    ) {
        queue.write_buffer(&self.camera, 0, bytemuck::bytes_of(camera));
        queue.write_buffer(&self.shading, 0, bytemuck::bytes_of(shading));
    }
}

/// Growable storage array of `T`; returns true from [`upload`] when the
/// buffer was recreated.
///
/// [`upload`]: GrowableStorage::upload
struct GrowableStorage<T: Pod> {
    label: &'static str,
    buffer: wgpu::Buffer,
    capacity: u32,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Pod> GrowableStorage<T> {
    fn new(device: &wgpu::Device, label: &'static str, capacity: u32) -> Self {
        Self {
            label,
            buffer: Self::create(device, label, capacity),
            capacity,
            _marker: std::marker::PhantomData,
        }
    }

    fn create(device: &wgpu::Device, label: &str, capacity: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (capacity.max(1) as usize * mem::size_of::<T>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, items: &[T]) -> bool {
        let required = items.len() as u32;
        let mut grown = false;
        if required > self.capacity {
            let new_capacity = required.max(self.capacity * 2);
            log::info!(
                "Growing {}: {} -> {}",
                self.label,
                self.capacity,
                new_capacity
            );
            self.buffer = Self::create(device, self.label, new_capacity);
            self.capacity = new_capacity;
            grown = true;
        }
        if !items.is_empty() {
            queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(items));
        }
        grown
    }
}

/// Group 1: per-draw object data plus terrain patches, both indexed from
/// the shaders by instance index.
pub(crate) struct ObjectsBuffer {
    objects: GrowableStorage<ObjectData>,
    patches: GrowableStorage<PatchData>,
    pub(crate) bind_group: wgpu::BindGroup,
    pub(crate) bind_layout: wgpu::BindGroupLayout,
}

impl ObjectsBuffer {
    pub(crate) fn new(device: &wgpu::Device, capacity: u32) -> Self {
        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ObjectsBindLayout"),
            entries: &[
                storage_entry(0, SCENE_STAGES, true),
                storage_entry(1, SCENE_STAGES, true),
            ],
        });
        let objects = GrowableStorage::new(device, "ObjectsBuffer", capacity);
        let patches = GrowableStorage::new(device, "TerrainPatchBuffer", capacity);
        let bind_group = Self::create_bind_group(device, &bind_layout, &objects, &patches);

        Self {
            objects,
            patches,
            bind_group,
            bind_layout,
        }
    }

    fn create_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        objects: &GrowableStorage<ObjectData>,
        patches: &GrowableStorage<PatchData>,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ObjectsBindGroup"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: objects.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: patches.buffer.as_entire_binding(),
                },
            ],
        })
    }

    pub(crate) fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        objects: &[ObjectData],
        patches: &[PatchData],
    ) {
        let grown_objects = self.objects.upload(device, queue, objects);
        let grown_patches = self.patches.upload(device, queue, patches);
        if grown_objects || grown_patches {
            self.bind_group =
                Self::create_bind_group(device, &self.bind_layout, &self.objects, &self.patches);
        }
    }
}

/// Point light storage (fixed capacity) and the directional light uniform.
pub(crate) struct LightBuffers {
    points: wgpu::Buffer,
    directional: wgpu::Buffer,
}

impl LightBuffers {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let points = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("PointLightBuffer"),
            size: (MAX_POINT_LIGHTS * mem::size_of::<PointLightRaw>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let directional = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("DirectionalLightBuffer"),
            contents: bytemuck::bytes_of(&DirectionalLightUniform::zeroed()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        Self {
            points,
            directional,
        }
    }

    pub(crate) fn register(&self, registry: &mut ResourceRegistry) {
        registry.insert_buffer(FrameResource::PointLights, &self.points);
        registry.insert_buffer(FrameResource::DirectionalLight, &self.directional);
    }

    /// Uploads at most [`MAX_POINT_LIGHTS`] lights; the rest of the buffer
    /// keeps stale data that no shader indexes.
    pub(crate) fn update(
        &self,
        queue: &wgpu::Queue,
        points: &[PointLightRaw],
        directional: &DirectionalLightUniform,
    ) {
        let count = points.len().min(MAX_POINT_LIGHTS);
        if count > 0 {
            queue.write_buffer(&self.points, 0, bytemuck::cast_slice(&points[..count]));
        }
        queue.write_buffer(&self.directional, 0, bytemuck::bytes_of(directional));
    }
}

/// Resolved texture handles of one material bind group.
pub(crate) type MaterialKey = [TextureHandle; MATERIAL_TEXTURE_SLOTS];

/// Group 2: the six material texture slots plus a repeating sampler. Bind
/// groups are cached per distinct texture combination.
pub(crate) struct MaterialBindings {
    pub(crate) bind_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    cache: HashMap<MaterialKey, wgpu::BindGroup>,
}

impl MaterialBindings {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..MATERIAL_TEXTURE_SLOTS as u32)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            })
            .collect();
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: MATERIAL_TEXTURE_SLOTS as u32,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("MaterialBindLayout"),
            entries: &entries,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("MaterialSampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            bind_layout,
            sampler,
            cache: HashMap::new(),
        }
    }

    /// Handles for every slot, with empty slots replaced by neutral
    /// defaults (white, flat normal, black height).
    pub(crate) fn resolve(material: &Material, assets: &Assets) -> MaterialKey {
        let defaults = assets.defaults();
        let textures = material.textures();
        let mut resolved = [defaults.white; MATERIAL_TEXTURE_SLOTS];
        for (slot, texture) in textures.iter().enumerate() {
            resolved[slot] = match (texture, slot) {
                (Some(handle), _) => *handle,
                (None, s) if s == TextureSlot::Normal as usize => defaults.flat_normal,
                (None, s) if s == TextureSlot::Height as usize => defaults.black,
                (None, _) => defaults.white,
            };
        }
        resolved
    }

    /// Creates (or reuses) the bind group for `material` and returns its
    /// cache key. Terrain passes its heightmap as `height_override`.
    pub(crate) fn prepare(
        &mut self,
        device: &wgpu::Device,
        assets: &Assets,
        material: &Material,
        height_override: Option<TextureHandle>,
    ) -> Option<MaterialKey> {
        let mut key = Self::resolve(material, assets);
        if let Some(height) = height_override {
            key[TextureSlot::Height as usize] = height;
        }
        if self.cache.contains_key(&key) {
            return Some(key);
        }

        let mut views = Vec::with_capacity(MATERIAL_TEXTURE_SLOTS);
        for handle in key {
            views.push(&assets.texture_or_missing(handle)?.view);
        }
        let mut entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .enumerate()
            .map(|(binding, view)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: MATERIAL_TEXTURE_SLOTS as u32,
            resource: wgpu::BindingResource::Sampler(&self.sampler),
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("MaterialBindGroup"),
            layout: &self.bind_layout,
            entries: &entries,
        });
        self.cache.insert(key, bind_group);
        Some(key)
    }

    pub(crate) fn get(&self, key: &MaterialKey) -> Option<&wgpu::BindGroup> {
        self.cache.get(key)
    }
}
