//! Resolution-dependent render targets
//!
//! Everything here is recreated together whenever the output size or the MSAA
//! mode changes. `generation` increases on every recreation so passes can tell
//! when bind groups that reference these views have gone stale.

use crate::capabilities::{COLOR_FORMAT, DEPTH_FORMAT};
use crate::settings::MsaaMode;
use crate::{Error, Result};

/// Full and half output resolution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetExtents {
    pub width: u32,
    pub height: u32,
    pub half_width: u32,
    pub half_height: u32,
}

impl TargetExtents {
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            half_width: (width / 2).max(1),
            half_height: (height / 2).max(1),
        }
    }
}

/// A texture and its default view
pub struct RenderTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
}

impl RenderTarget {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        sample_count: u32,
        extra_usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING | extra_usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view, format, sample_count, width, height }
    }
}

/// All per-resolution targets of the frame
pub struct RenderTargets {
    pub extents: TargetExtents,
    pub msaa_mode: MsaaMode,
    /// Scene color, `msaa_mode` samples
    pub color_msaa: RenderTarget,
    /// Scene depth, `msaa_mode` samples
    pub depth: RenderTarget,
    /// Box-filtered single-sample color consumed by post-processing
    pub color_resolve: RenderTarget,
    /// Half-res particles, 4x the full-res sample count
    pub low_res_msaa: RenderTarget,
    /// Half-res particles, single sample
    pub low_res: RenderTarget,
    pub low_res_depth_msaa: RenderTarget,
    pub low_res_depth: RenderTarget,
    generation: u64,
}

impl RenderTargets {
    pub fn new(device: &wgpu::Device, extents: TargetExtents, msaa_mode: MsaaMode) -> Result<Self> {
        Self::create(device, extents, msaa_mode, 0)
    }

    fn create(device: &wgpu::Device, extents: TargetExtents, msaa_mode: MsaaMode, generation: u64) -> Result<Self> {
        let full = msaa_mode.sample_count();
        let low = msaa_mode.low_res_sample_count();
        let (w, h) = (extents.width, extents.height);
        let (hw, hh) = (extents.half_width, extents.half_height);
        let none = wgpu::TextureUsages::empty();

        let targets = super::validated(device, || Self {
            extents,
            msaa_mode,
            color_msaa: RenderTarget::new(device, "Scene Color MSAA", w, h, COLOR_FORMAT, full, none),
            depth: RenderTarget::new(device, "Scene Depth", w, h, DEPTH_FORMAT, full, none),
            color_resolve: RenderTarget::new(device, "Scene Color Resolve", w, h, COLOR_FORMAT, 1, wgpu::TextureUsages::COPY_SRC),
            low_res_msaa: RenderTarget::new(device, "Low-Res Color MSAA", hw, hh, COLOR_FORMAT, low, none),
            low_res: RenderTarget::new(device, "Low-Res Color", hw, hh, COLOR_FORMAT, 1, none),
            low_res_depth_msaa: RenderTarget::new(device, "Low-Res Depth MSAA", hw, hh, DEPTH_FORMAT, low, none),
            low_res_depth: RenderTarget::new(device, "Low-Res Depth", hw, hh, DEPTH_FORMAT, 1, none),
            generation,
        })
        .map_err(|e| Error::Resource(format!("render targets ({}x{}, MSAA {}): {}", w, h, msaa_mode.label(), e)))?;

        log::info!(
            "Render targets: {}x{} ({} samples), low-res {}x{} ({} samples)",
            w, h, full, hw, hh, low
        );
        Ok(targets)
    }

    /// Recreate everything at a new output size
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) -> Result<()> {
        let extents = TargetExtents::new(width, height);
        if extents == self.extents {
            return Ok(());
        }
        *self = Self::create(device, extents, self.msaa_mode, self.generation + 1)?;
        Ok(())
    }

    /// Recreate everything with a different sample count
    pub fn set_msaa_mode(&mut self, device: &wgpu::Device, mode: MsaaMode) -> Result<()> {
        if mode == self.msaa_mode {
            return Ok(());
        }
        log::info!("MSAA mode changed: {} -> {}", self.msaa_mode.label(), mode.label());
        *self = Self::create(device, self.extents, mode, self.generation + 1)?;
        Ok(())
    }

    /// Bumped on every recreation
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_resolution_follows_output() {
        let e = TargetExtents::new(1920, 1080);
        assert_eq!((e.half_width, e.half_height), (960, 540));
        let e = TargetExtents::new(1280, 720);
        assert_eq!((e.half_width, e.half_height), (640, 360));
    }

    #[test]
    fn odd_and_tiny_sizes_stay_valid() {
        let e = TargetExtents::new(1281, 721);
        assert_eq!((e.half_width, e.half_height), (640, 360));
        let e = TargetExtents::new(0, 1);
        assert_eq!((e.width, e.height, e.half_width, e.half_height), (1, 1, 1, 1));
    }
}
