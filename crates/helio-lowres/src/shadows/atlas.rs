//! GPU surfaces of the cascaded shadow map
//!
//! A single multisampled depth target is reused for every cascade. Each cascade
//! is converted into its own layer of the VSM array, which keeps a full mip chain
//! and is sampled by the lit passes for the rest of the frame.

use super::{EvsmExponents, NUM_CASCADES, SHADOW_MAP_SIZE, SHADOW_MSAA_SAMPLES};
use crate::capabilities::{GpuCapabilities, DEPTH_FORMAT};
use crate::resources::validated;
use crate::{Error, Result};

pub struct ShadowAtlas {
    /// Cascade depth, re-rendered for every cascade
    pub depth_view: wgpu::TextureView,
    pub vsm: wgpu::Texture,
    /// All layers and mips, as sampled by the lit passes
    pub vsm_array_view: wgpu::TextureView,
    /// `[layer][mip]` single-subresource views
    pub vsm_mip_views: Vec<Vec<wgpu::TextureView>>,
    /// Scratch target between the horizontal and vertical blur
    pub temp_view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub mip_count: u32,
    pub exponents: EvsmExponents,
    _depth: wgpu::Texture,
    _temp: wgpu::Texture,
}

impl ShadowAtlas {
    pub fn new(device: &wgpu::Device, capabilities: &GpuCapabilities) -> Result<Self> {
        let format = capabilities.vsm_format();
        let mip_count = SHADOW_MAP_SIZE.ilog2() + 1;
        let size = wgpu::Extent3d { width: SHADOW_MAP_SIZE, height: SHADOW_MAP_SIZE, depth_or_array_layers: 1 };
        let usage = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;

        let atlas = validated(device, || {
            let depth = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Sun Shadow Depth"),
                size,
                mip_level_count: 1,
                sample_count: SHADOW_MSAA_SAMPLES,
                dimension: wgpu::TextureDimension::D2,
                format: DEPTH_FORMAT,
                usage,
                view_formats: &[],
            });

            let vsm = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Sun VSM"),
                size: wgpu::Extent3d { depth_or_array_layers: NUM_CASCADES as u32, ..size },
                mip_level_count: mip_count,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            });

            let temp = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Sun VSM Blur Temp"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            });

            let vsm_array_view = vsm.create_view(&wgpu::TextureViewDescriptor {
                label: Some("Sun VSM Array View"),
                dimension: Some(wgpu::TextureViewDimension::D2Array),
                ..Default::default()
            });

            let vsm_mip_views = (0..NUM_CASCADES as u32)
                .map(|layer| {
                    (0..mip_count)
                        .map(|mip| {
                            vsm.create_view(&wgpu::TextureViewDescriptor {
                                label: Some("Sun VSM Layer View"),
                                dimension: Some(wgpu::TextureViewDimension::D2),
                                base_mip_level: mip,
                                mip_level_count: Some(1),
                                base_array_layer: layer,
                                array_layer_count: Some(1),
                                ..Default::default()
                            })
                        })
                        .collect()
                })
                .collect();

            Self {
                depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
                vsm_array_view,
                vsm_mip_views,
                temp_view: temp.create_view(&wgpu::TextureViewDescriptor::default()),
                vsm,
                format,
                mip_count,
                exponents: EvsmExponents::default().clamped_for(format),
                _depth: depth,
                _temp: temp,
            }
        })
        .map_err(|e| Error::Resource(format!("shadow atlas: {}", e)))?;

        log::info!(
            "Shadow atlas: {} cascades of {}x{} {:?}, {} mips, exponents {}/{}",
            NUM_CASCADES,
            SHADOW_MAP_SIZE,
            SHADOW_MAP_SIZE,
            format,
            mip_count,
            atlas.exponents.positive,
            atlas.exponents.negative
        );
        Ok(atlas)
    }

    /// Render view of mip 0 of a cascade's layer
    pub fn layer_view(&self, cascade: usize) -> &wgpu::TextureView {
        &self.vsm_mip_views[cascade][0]
    }
}
