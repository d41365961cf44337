pub mod cache;
pub mod handle;
pub mod mesh;

use std::path::Path;

pub use cache::AssetCache;
pub use handle::Handle;
pub use mesh::Mesh;

use crate::renderer::Texture;

pub type MeshHandle = Handle<Mesh>;
pub type TextureHandle = Handle<Texture>;

/// Built-in textures every material slot can fall back to.
#[derive(Debug, Clone, Copy)]
pub struct DefaultTextures {
    /// Magenta/black checker substituted for textures that failed to load.
    pub missing: TextureHandle,
    pub white: TextureHandle,
    pub flat_normal: TextureHandle,
    pub black: TextureHandle,
}

pub struct Assets {
    pub meshes: AssetCache<Mesh>,
    pub textures: AssetCache<Texture>,
    defaults: DefaultTextures,
}

impl Assets {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let mut textures = AssetCache::new();
        let missing = textures.insert(Texture::missing(device, queue));
        let white = textures.insert(Texture::white(device, queue));
        let flat_normal = textures.insert(Texture::default_normal(device, queue));
        let black = textures.insert(Texture::from_color_linear(
            device,
            queue,
            [0, 0, 0, 255],
            Some("Black"),
        ));

        Self {
            meshes: AssetCache::new(),
            textures,
            defaults: DefaultTextures {
                missing,
                white,
                flat_normal,
                black,
            },
        }
    }

    pub fn defaults(&self) -> DefaultTextures {
        self.defaults
    }

    /// Loads (or reuses) the texture at `path`. Never fails: decode errors
    /// are logged and the "missing" placeholder is returned instead.
    pub fn load_texture(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        path: impl AsRef<Path>,
        is_srgb: bool,
    ) -> TextureHandle {
        let path = path.as_ref();
        if let Some(handle) = self.textures.handle_for_path(path) {
            return handle;
        }

        match Texture::from_path(device, queue, path, is_srgb) {
            Ok(texture) => self.textures.insert_with_path(path, texture),
            Err(err) => {
                log::error!("{err}; using placeholder texture");
                self.defaults.missing
            }
        }
    }

    pub fn add_mesh(
        &mut self,
        device: &wgpu::Device,
        vertices: &[crate::renderer::Vertex],
        indices: &[u32],
    ) -> MeshHandle {
        self.meshes
            .insert(Mesh::from_vertices(device, vertices, indices))
    }

    /// Texture for `handle`, falling back to the placeholder for unknown
    /// handles.
    pub fn texture_or_missing(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(handle).or_else(|| {
            log::warn!("Unknown texture {:?}; using placeholder", handle);
            self.textures.get(self.defaults.missing)
        })
    }
}
