//! Blocking GPU → CPU copies. Only used outside the frame (diagnostics and
//! tests); the frame itself never waits on the GPU.

use std::sync::mpsc;

use crate::error::RendererError;

/// Rows of a texture copy must be padded to this many bytes.
const ROW_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

pub(crate) fn padded_bytes_per_row(unpadded: u32) -> u32 {
    unpadded.div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT
}

/// Copies `size` bytes from the start of `source` and waits for the result.
pub(crate) fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    size: u64,
) -> Result<Vec<u8>, RendererError> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("ReadbackBuffer"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("ReadbackEncoder"),
    });
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    map_and_copy(device, &staging, size)
}

/// Reads one array layer of a single-sample 2D texture. Returns tightly
/// packed rows of `bytes_per_texel * width` bytes.
pub(crate) fn read_texture_layer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    layer: u32,
    aspect: wgpu::TextureAspect,
    bytes_per_texel: u32,
) -> Result<Vec<u8>, RendererError> {
    let width = texture.width();
    let height = texture.height();
    let row = width * bytes_per_texel;
    let padded_row = padded_bytes_per_row(row);
    let size = (padded_row * height) as u64;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("TextureReadbackBuffer"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("TextureReadbackEncoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d {
                x: 0,
                y: 0,
                z: layer,
            },
            aspect,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let padded = map_and_copy(device, &staging, size)?;
    let mut packed = Vec::with_capacity((row * height) as usize);
    for chunk in padded.chunks(padded_row as usize) {
        packed.extend_from_slice(&chunk[..row as usize]);
    }
    Ok(packed)
}

fn map_and_copy(
    device: &wgpu::Device,
    staging: &wgpu::Buffer,
    size: u64,
) -> Result<Vec<u8>, RendererError> {
    let slice = staging.slice(..size);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|err| RendererError::Readback(err.to_string()))?;

    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(RendererError::Readback(err.to_string())),
        Err(err) => return Err(RendererError::Readback(err.to_string())),
    }

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_pad_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(4), 256);
        assert_eq!(padded_bytes_per_row(256), 256);
        assert_eq!(padded_bytes_per_row(260), 512);
    }
}
