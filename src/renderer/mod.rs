pub mod binding;
pub mod camera;
pub mod debug_overlay;
pub mod draw;
pub mod frame;
pub mod ibl;
pub(crate) mod internal;
pub mod light_culling;
pub mod lights;
pub mod material;
pub mod particles;
pub mod pipeline_builder;
pub mod postprocess;
pub mod primitives;
#[allow(clippy::module_inception)]
pub mod renderer;
pub mod scene_pass;
pub mod shaders;
pub mod shadows;
pub mod skybox;
pub mod ssao;
pub mod targets;
pub mod terrain;
pub mod texture;
pub mod uniforms;
pub mod vertex;

pub use binding::{FrameResource, ResourceRegistry};
pub use camera::FrameCamera;
pub use draw::{CullMode, MeshDrawOptions, Topology};
pub use frame::{FrameGraph, FrameStage, PassNode};
pub use light_culling::{TileGrid, TileLightGrid};
pub use lights::{PointLightDesc, MAX_POINT_LIGHTS, MAX_SHADOW_POINT_LIGHTS};
pub use material::{ClassicMaterial, Material, PbrMaterial, TextureSlot};
pub use particles::{EmitterDesc, EmitterId};
pub use pipeline_builder::PipelineBuilder;
pub use primitives::{cube_mesh, plane_mesh, sphere_mesh};
pub use renderer::{standard_frame_graph, Renderer, RendererStats};
pub use shaders::{ShaderLibrary, ShaderVariant};
pub use texture::Texture;
pub use vertex::Vertex;
