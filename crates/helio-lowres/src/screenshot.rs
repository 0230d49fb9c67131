//! PNG capture of a rendered frame
//!
//! The frame is copied into a staging buffer with 256-byte aligned rows, mapped
//! synchronously, de-padded and handed to `image` for encoding.

use std::path::Path;

use crate::resources::align_to;
use crate::{Error, Result};

/// Byte order of an 8-bit four-channel texel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelOrder {
    Rgba,
    Bgra,
}

impl PixelOrder {
    /// Formats the capture path can read back
    pub fn for_format(format: wgpu::TextureFormat) -> Option<Self> {
        match format {
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => Some(Self::Rgba),
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => Some(Self::Bgra),
            _ => None,
        }
    }
}

/// Row pitch of the staging buffer for a `width`-texel row
pub fn padded_bytes_per_row(width: u32) -> u32 {
    align_to(width as u64 * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64) as u32
}

/// Strip row padding and reorder channels into tightly packed RGBA
pub fn unpad_rows(data: &[u8], width: u32, height: u32, padded_bpr: u32, order: PixelOrder) -> Vec<u8> {
    let tight_bpr = width as usize * 4;
    let mut pixels = Vec::with_capacity(tight_bpr * height as usize);
    for row in data.chunks(padded_bpr as usize).take(height as usize) {
        pixels.extend_from_slice(&row[..tight_bpr]);
    }
    if order == PixelOrder::Bgra {
        for texel in pixels.chunks_exact_mut(4) {
            texel.swap(0, 2);
        }
    }
    pixels
}

/// Read `texture` back and write it to `path` as PNG.
///
/// The texture needs `COPY_SRC` and an 8-bit RGBA or BGRA format.
pub fn capture_png(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture, path: &Path) -> Result<()> {
    let order = PixelOrder::for_format(texture.format())
        .ok_or_else(|| Error::Screenshot(format!("cannot capture {:?} textures", texture.format())))?;
    let (width, height) = (texture.width(), texture.height());
    let padded_bpr = padded_bytes_per_row(width);

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Screenshot Staging"),
        size: padded_bpr as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Screenshot Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_bpr),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    receiver
        .recv()
        .map_err(|_| Error::Screenshot("readback callback was dropped".to_string()))?
        .map_err(|e| Error::Screenshot(format!("readback mapping failed: {}", e)))?;

    let pixels = {
        let data = slice.get_mapped_range();
        unpad_rows(&data, width, height, padded_bpr, order)
    };
    staging.unmap();

    let image = image::RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| Error::Screenshot("readback size does not match the frame".to_string()))?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| Error::Screenshot(format!("{}: {}", path.display(), e)))?;

    log::info!("Screenshot saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1280), 5120);
    }

    #[test]
    fn unpad_drops_padding_and_swizzles_bgra() {
        let padded = 256usize;
        let mut data = vec![0xAAu8; padded * 2];
        data[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[padded..padded + 8].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);

        let rgba = unpad_rows(&data, 2, 2, padded as u32, PixelOrder::Rgba);
        assert_eq!(rgba, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);

        let bgra = unpad_rows(&data, 2, 2, padded as u32, PixelOrder::Bgra);
        assert_eq!(&bgra[..4], &[3, 2, 1, 4]);
        assert_eq!(&bgra[12..], &[15, 14, 13, 16]);
    }

    #[test]
    fn only_eight_bit_formats_are_captured() {
        assert_eq!(PixelOrder::for_format(wgpu::TextureFormat::Bgra8UnormSrgb), Some(PixelOrder::Bgra));
        assert_eq!(PixelOrder::for_format(wgpu::TextureFormat::Rgba8Unorm), Some(PixelOrder::Rgba));
        assert_eq!(PixelOrder::for_format(wgpu::TextureFormat::Rgba16Float), None);
    }
}
