use thiserror::Error;

use crate::renderer::shaders::ShaderVariant;

/// Failures that can occur while setting up or resizing the renderer.
///
/// Per-frame problems (bad handles, NaN transforms, capacity overflow) are
/// logged and skipped instead of surfacing here.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("no suitable GPU adapter available: {0}")]
    AdapterUnavailable(String),

    #[error("GPU adapter cannot run the renderer: {0}")]
    Unsupported(String),

    #[error("failed to create GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    #[error("failed to create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("shader variant {variant:?} failed to compile: {message}")]
    Shader {
        variant: ShaderVariant,
        message: String,
    },

    #[error("render target '{target}' is incomplete: {reason}")]
    IncompleteTarget { target: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("GPU readback failed: {0}")]
    Readback(String),
}

pub type RendererResult<T> = Result<T, RendererError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_error_names_the_variant() {
        let err = RendererError::Shader {
            variant: ShaderVariant::TileCulling,
            message: "unexpected token".into(),
        };
        let text = err.to_string();
        assert!(text.contains("TileCulling"));
        assert!(text.contains("unexpected token"));
    }

    #[test]
    fn incomplete_target_mentions_target_name() {
        let err = RendererError::IncompleteTarget {
            target: "GeometryPrepass".into(),
            reason: "size mismatch".into(),
        };
        assert_eq!(
            err.to_string(),
            "render target 'GeometryPrepass' is incomplete: size mismatch"
        );
    }
}
