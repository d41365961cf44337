//! Typed binding tables for frame-graph resources.
//!
//! Passes declare which [`FrameResource`]s they read, in shader binding
//! order. The declaration produces the bind group layout and, given a
//! [`ResourceRegistry`], the bind group itself; a missing or mistyped
//! resource is reported instead of silently binding the wrong texture.

use std::collections::HashMap;

use crate::error::RendererError;

/// Logical resources that flow between passes of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameResource {
    PointLights,
    DirectionalLight,
    CullingParams,
    TileLightCounts,
    TileLightIndices,
    TileOverflow,
    CascadeShadowMap,
    PointShadowMoments,
    ShadowComparisonSampler,
    ViewNormals,
    ViewPositions,
    SsaoNoise,
    SsaoKernel,
    SsaoRaw,
    SsaoOcclusion,
    SceneColor,
    SceneDepth,
    EnvironmentCube,
    IrradianceCube,
    PrefilteredCube,
    BrdfLut,
    LinearClampSampler,
}

/// How a pass accesses a bound resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceClass {
    Buffer,
    Texture,
    Sampler,
}

impl FrameResource {
    pub fn label(self) -> &'static str {
        match self {
            FrameResource::PointLights => "PointLights",
            FrameResource::DirectionalLight => "DirectionalLight",
            FrameResource::CullingParams => "CullingParams",
            FrameResource::TileLightCounts => "TileLightCounts",
            FrameResource::TileLightIndices => "TileLightIndices",
            FrameResource::TileOverflow => "TileOverflow",
            FrameResource::CascadeShadowMap => "CascadeShadowMap",
            FrameResource::PointShadowMoments => "PointShadowMoments",
            FrameResource::ShadowComparisonSampler => "ShadowComparisonSampler",
            FrameResource::ViewNormals => "ViewNormals",
            FrameResource::ViewPositions => "ViewPositions",
            FrameResource::SsaoNoise => "SsaoNoise",
            FrameResource::SsaoKernel => "SsaoKernel",
            FrameResource::SsaoRaw => "SsaoRaw",
            FrameResource::SsaoOcclusion => "SsaoOcclusion",
            FrameResource::SceneColor => "SceneColor",
            FrameResource::SceneDepth => "SceneDepth",
            FrameResource::EnvironmentCube => "EnvironmentCube",
            FrameResource::IrradianceCube => "IrradianceCube",
            FrameResource::PrefilteredCube => "PrefilteredCube",
            FrameResource::BrdfLut => "BrdfLut",
            FrameResource::LinearClampSampler => "LinearClampSampler",
        }
    }

    /// Resources that exist before any pass of the frame runs: CPU uploads,
    /// samplers and setup-time precomputes.
    pub fn is_external(self) -> bool {
        matches!(
            self,
            FrameResource::PointLights
                | FrameResource::DirectionalLight
                | FrameResource::CullingParams
                | FrameResource::ShadowComparisonSampler
                | FrameResource::SsaoNoise
                | FrameResource::SsaoKernel
                | FrameResource::EnvironmentCube
                | FrameResource::IrradianceCube
                | FrameResource::PrefilteredCube
                | FrameResource::BrdfLut
                | FrameResource::LinearClampSampler
        )
    }

    fn class(self) -> ResourceClass {
        match self {
            FrameResource::PointLights
            | FrameResource::DirectionalLight
            | FrameResource::CullingParams
            | FrameResource::TileLightCounts
            | FrameResource::TileLightIndices
            | FrameResource::TileOverflow
            | FrameResource::SsaoKernel => ResourceClass::Buffer,
            FrameResource::ShadowComparisonSampler | FrameResource::LinearClampSampler => {
                ResourceClass::Sampler
            }
            _ => ResourceClass::Texture,
        }
    }

    fn binding_type(self, access: Access) -> wgpu::BindingType {
        let storage = |read_only| wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        let uniform = wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        let texture = |sample_type, view_dimension| wgpu::BindingType::Texture {
            sample_type,
            view_dimension,
            multisampled: false,
        };
        let filterable = wgpu::TextureSampleType::Float { filterable: true };
        let unfilterable = wgpu::TextureSampleType::Float { filterable: false };

        match self {
            FrameResource::PointLights
            | FrameResource::TileLightCounts
            | FrameResource::TileLightIndices
            | FrameResource::TileOverflow => storage(access == Access::Read),
            FrameResource::DirectionalLight
            | FrameResource::CullingParams
            | FrameResource::SsaoKernel => uniform,
            FrameResource::CascadeShadowMap => texture(
                wgpu::TextureSampleType::Depth,
                wgpu::TextureViewDimension::D2Array,
            ),
            FrameResource::PointShadowMoments => {
                texture(unfilterable, wgpu::TextureViewDimension::D2Array)
            }
            FrameResource::SsaoNoise => texture(unfilterable, wgpu::TextureViewDimension::D2),
            FrameResource::SceneDepth => texture(
                wgpu::TextureSampleType::Depth,
                wgpu::TextureViewDimension::D2,
            ),
            FrameResource::ViewNormals
            | FrameResource::ViewPositions
            | FrameResource::SsaoRaw
            | FrameResource::SsaoOcclusion
            | FrameResource::SceneColor
            | FrameResource::BrdfLut => texture(filterable, wgpu::TextureViewDimension::D2),
            FrameResource::EnvironmentCube
            | FrameResource::IrradianceCube
            | FrameResource::PrefilteredCube => {
                texture(filterable, wgpu::TextureViewDimension::Cube)
            }
            FrameResource::ShadowComparisonSampler => {
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
            }
            FrameResource::LinearClampSampler => {
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
            }
        }
    }
}

/// A GPU object registered under a [`FrameResource`] name.
#[derive(Debug, Clone)]
pub enum BoundResource {
    Buffer(wgpu::Buffer),
    View(wgpu::TextureView),
    Sampler(wgpu::Sampler),
}

impl BoundResource {
    fn class(&self) -> ResourceClass {
        match self {
            BoundResource::Buffer(_) => ResourceClass::Buffer,
            BoundResource::View(_) => ResourceClass::Texture,
            BoundResource::Sampler(_) => ResourceClass::Sampler,
        }
    }

    fn binding_resource(&self) -> wgpu::BindingResource<'_> {
        match self {
            BoundResource::Buffer(buffer) => buffer.as_entire_binding(),
            BoundResource::View(view) => wgpu::BindingResource::TextureView(view),
            BoundResource::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
        }
    }
}

/// Current GPU object for every frame resource. Bumps its generation on
/// every change so dependent bind groups know to rebuild.
#[derive(Default)]
pub struct ResourceRegistry {
    entries: HashMap<FrameResource, BoundResource>,
    generation: u64,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_buffer(&mut self, resource: FrameResource, buffer: &wgpu::Buffer) {
        self.insert(resource, BoundResource::Buffer(buffer.clone()));
    }

    pub fn insert_view(&mut self, resource: FrameResource, view: &wgpu::TextureView) {
        self.insert(resource, BoundResource::View(view.clone()));
    }

    pub fn insert_sampler(&mut self, resource: FrameResource, sampler: &wgpu::Sampler) {
        self.insert(resource, BoundResource::Sampler(sampler.clone()));
    }

    fn insert(&mut self, resource: FrameResource, bound: BoundResource) {
        self.entries.insert(resource, bound);
        self.generation += 1;
    }

    pub fn get(&self, resource: FrameResource) -> Option<&BoundResource> {
        self.entries.get(&resource)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Ordered binding declaration for one bind group of a pass.
#[derive(Debug, Clone)]
pub struct PassBindings {
    label: &'static str,
    visibility: wgpu::ShaderStages,
    slots: Vec<(FrameResource, Access)>,
}

impl PassBindings {
    pub fn new(label: &'static str, visibility: wgpu::ShaderStages) -> Self {
        Self {
            label,
            visibility,
            slots: Vec::new(),
        }
    }

    pub fn read(mut self, resource: FrameResource) -> Self {
        self.slots.push((resource, Access::Read));
        self
    }

    /// Only storage buffers can be bound writable; anything else is bound
    /// read-only.
    pub fn read_write(mut self, resource: FrameResource) -> Self {
        if resource.class() != ResourceClass::Buffer {
            log::warn!(
                "{}: {} cannot be bound writable; binding it read-only",
                self.label,
                resource.label()
            );
            self.slots.push((resource, Access::Read));
        } else {
            self.slots.push((resource, Access::ReadWrite));
        }
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Binding index of `resource` within this group.
    pub fn binding(&self, resource: FrameResource) -> Option<u32> {
        self.slots
            .iter()
            .position(|(slot, _)| *slot == resource)
            .map(|index| index as u32)
    }

    pub fn resources(&self) -> impl Iterator<Item = FrameResource> + '_ {
        self.slots.iter().map(|(resource, _)| *resource)
    }

    pub fn writes(&self) -> impl Iterator<Item = FrameResource> + '_ {
        self.slots
            .iter()
            .filter(|(_, access)| *access == Access::ReadWrite)
            .map(|(resource, _)| *resource)
    }

    pub fn layout_entries(&self) -> Vec<wgpu::BindGroupLayoutEntry> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, (resource, access))| wgpu::BindGroupLayoutEntry {
                binding: index as u32,
                visibility: self.visibility,
                ty: resource.binding_type(*access),
                count: None,
            })
            .collect()
    }

    pub fn create_layout(&self, device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(self.label),
            entries: &self.layout_entries(),
        })
    }

    pub fn create_bind_group(
        &self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        registry: &ResourceRegistry,
    ) -> Result<wgpu::BindGroup, RendererError> {
        let mut entries = Vec::with_capacity(self.slots.len());
        for (index, (resource, _)) in self.slots.iter().enumerate() {
            let bound = registry.get(*resource).ok_or_else(|| {
                RendererError::InvalidConfig(format!(
                    "{}: resource {} is not registered",
                    self.label,
                    resource.label()
                ))
            })?;
            if bound.class() != resource.class() {
                return Err(RendererError::InvalidConfig(format!(
                    "{}: resource {} is registered as the wrong kind of object",
                    self.label,
                    resource.label()
                )));
            }
            entries.push(wgpu::BindGroupEntry {
                binding: index as u32,
                resource: bound.binding_resource(),
            });
        }

        Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.label),
            layout,
            entries: &entries,
        }))
    }
}

/// A declared bind group plus its cached GPU objects.
pub struct BoundPass {
    bindings: PassBindings,
    layout: wgpu::BindGroupLayout,
    bind_group: Option<wgpu::BindGroup>,
    generation: Option<u64>,
}

impl BoundPass {
    pub fn new(device: &wgpu::Device, bindings: PassBindings) -> Self {
        let layout = bindings.create_layout(device);
        Self {
            bindings,
            layout,
            bind_group: None,
            generation: None,
        }
    }

    pub fn bindings(&self) -> &PassBindings {
        &self.bindings
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    /// Rebuilds the bind group when the registry changed since last time.
    pub fn refresh(
        &mut self,
        device: &wgpu::Device,
        registry: &ResourceRegistry,
    ) -> Result<(), RendererError> {
        if self.generation == Some(registry.generation()) && self.bind_group.is_some() {
            return Ok(());
        }
        self.bind_group = Some(
            self.bindings
                .create_bind_group(device, &self.layout, registry)?,
        );
        self.generation = Some(registry.generation());
        Ok(())
    }

    pub fn bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.bind_group.as_ref()
    }
}
