//! Standard bind group layouts and builders
//!
//! Lit passes share three layouts:
//!
//! - Group 0: Global (camera, sun/material/threshold constants, sample layout) - per frame
//! - Group 1: Shadow (cascade constants, VSM atlas, sampler) - per frame
//! - Group 2: Dynamic (per-draw or per-cascade uniform slot) - per draw
//!
//! Fullscreen passes that read render targets build their own texture layouts
//! from the entry helpers below, since sample counts vary with the MSAA mode.

use std::sync::Arc;

/// Standard bind group layouts used by the lit pipelines
#[derive(Clone)]
pub struct BindGroupLayouts {
    pub global: Arc<wgpu::BindGroupLayout>,
    pub shadow: Arc<wgpu::BindGroupLayout>,
    pub dynamic: Arc<wgpu::BindGroupLayout>,
}

impl BindGroupLayouts {
    pub fn new(device: &wgpu::Device, vsm_format: wgpu::TextureFormat) -> Self {
        Self {
            global: Arc::new(Self::create_global_layout(device)),
            shadow: Arc::new(Self::create_shadow_layout(device, vsm_format)),
            dynamic: Arc::new(Self::create_dynamic_layout(device)),
        }
    }

    /// Group 0: camera + frame constants
    fn create_global_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Global Bind Group Layout"),
            entries: &[
                // Binding 0: Camera uniform
                uniform_entry(0, wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT),
                // Binding 1: Scene uniform (sun, material, thresholds)
                uniform_entry(1, wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT),
                // Binding 2: Low-res sample layout of the active MSAA mode
                uniform_entry(2, wgpu::ShaderStages::FRAGMENT),
            ],
        })
    }

    /// Group 1: sun shadow cascades
    fn create_shadow_layout(device: &wgpu::Device, vsm_format: wgpu::TextureFormat) -> wgpu::BindGroupLayout {
        let filterable = vsm_format != wgpu::TextureFormat::Rgba32Float
            || device.features().contains(wgpu::Features::FLOAT32_FILTERABLE);
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Shadow Bind Group Layout"),
            entries: &[
                // Binding 0: Shadow uniform (cascade-0 matrix, splits, offsets/scales)
                uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
                // Binding 1: VSM atlas, one layer per cascade
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable },
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
                // Binding 2: Anisotropic VSM sampler
                sampler_entry(2, wgpu::SamplerBindingType::Filtering),
            ],
        })
    }

    /// Group 2: one uniform slot selected with a dynamic offset
    fn create_dynamic_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Dynamic Uniform Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: None,
                },
                count: None,
            }],
        })
    }
}

/// Plain uniform buffer entry
pub fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
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

/// Fragment-visible 2D texture entry.
///
/// Multisampled float textures cannot be filtered, so `filterable` is ignored
/// for them.
pub fn texture_entry(binding: u32, sample_type: wgpu::TextureSampleType, multisampled: bool) -> wgpu::BindGroupLayoutEntry {
    let sample_type = match sample_type {
        wgpu::TextureSampleType::Float { .. } if multisampled => {
            wgpu::TextureSampleType::Float { filterable: false }
        }
        other => other,
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled,
        },
        count: None,
    }
}

/// Fragment-visible sampler entry
pub fn sampler_entry(binding: u32, ty: wgpu::SamplerBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(ty),
        count: None,
    }
}

/// Helper for building bind groups
///
/// Provides a fluent API for creating bind groups that match a layout
pub struct BindGroupBuilder<'a> {
    label: Option<String>,
    entries: Vec<wgpu::BindGroupEntry<'a>>,
}

impl<'a> BindGroupBuilder<'a> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            entries: Vec::new(),
        }
    }

    /// Add a whole-buffer binding
    pub fn buffer(mut self, binding: u32, buffer: &'a wgpu::Buffer) -> Self {
        self.entries.push(wgpu::BindGroupEntry {
            binding,
            resource: buffer.as_entire_binding(),
        });
        self
    }

    /// Add a prepared binding resource (e.g. one dynamic-offset slot)
    pub fn resource(mut self, binding: u32, resource: wgpu::BindingResource<'a>) -> Self {
        self.entries.push(wgpu::BindGroupEntry { binding, resource });
        self
    }

    /// Add a texture view binding
    pub fn texture(mut self, binding: u32, view: &'a wgpu::TextureView) -> Self {
        self.entries.push(wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::TextureView(view),
        });
        self
    }

    /// Add a sampler binding
    pub fn sampler(mut self, binding: u32, sampler: &'a wgpu::Sampler) -> Self {
        self.entries.push(wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::Sampler(sampler),
        });
        self
    }

    /// Build the bind group
    pub fn build(self, device: &wgpu::Device, layout: &wgpu::BindGroupLayout) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: self.label.as_deref(),
            layout,
            entries: &self.entries,
        })
    }
}
