//! GPU resource management

mod bindgroup;
mod targets;

pub use bindgroup::{
    sampler_entry, texture_entry, uniform_entry, BindGroupBuilder, BindGroupLayouts,
};
pub use targets::{RenderTarget, RenderTargets, TargetExtents};

use std::marker::PhantomData;
use std::sync::Arc;

use crate::capabilities::GpuCapabilities;
use crate::settings::{MsaaMode, MsaaModeMap};

/// Samplers shared by every pass
pub struct Samplers {
    pub linear_clamp: wgpu::Sampler,
    pub point_clamp: wgpu::Sampler,
    /// Anisotropic trilinear sampler for the VSM atlas
    pub shadow: wgpu::Sampler,
}

impl Samplers {
    fn new(device: &wgpu::Device) -> Self {
        let clamp = |label, filter| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        };

        Self {
            linear_clamp: clamp("Linear Clamp Sampler", wgpu::FilterMode::Linear),
            point_clamp: clamp("Point Clamp Sampler", wgpu::FilterMode::Nearest),
            shadow: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Shadow VSM Sampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::FilterMode::Linear,
                anisotropy_clamp: 16,
                ..Default::default()
            }),
        }
    }
}

/// Central resource manager for the renderer
pub struct ResourceManager {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,

    /// Standard bind group layouts shared by all pipelines
    pub bind_group_layouts: BindGroupLayouts,

    pub samplers: Samplers,
    pub capabilities: GpuCapabilities,
}

impl ResourceManager {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, capabilities: GpuCapabilities) -> Self {
        let bind_group_layouts = BindGroupLayouts::new(&device, capabilities.vsm_format());
        let samplers = Samplers::new(&device);
        Self { device, queue, bind_group_layouts, samplers, capabilities }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Build one value per MSAA mode. Modes the adapter cannot run are built
    /// with the single-sample mode's counts and never selected.
    pub fn per_msaa_mode<T>(&self, mut f: impl FnMut(MsaaMode) -> T) -> MsaaModeMap<T> {
        let capabilities = &self.capabilities;
        MsaaModeMap::from_fn(|mode| f(capabilities.effective_msaa_mode(mode)))
    }
}

/// Run GPU object creation inside a validation error scope.
///
/// Returns the validation message if anything created in `f` was invalid.
pub fn validated<T>(device: &wgpu::Device, f: impl FnOnce() -> T) -> std::result::Result<T, String> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    match pollster::block_on(device.pop_error_scope()) {
        None => Ok(value),
        Some(err) => Err(err.to_string()),
    }
}

pub(crate) fn align_to(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// A uniform buffer holding `capacity` copies of `T`, each at an offset that
/// satisfies the device's dynamic-offset alignment.
///
/// Lets one frame record several draws that each see different constants.
pub struct UniformSlots<T> {
    buffer: wgpu::Buffer,
    stride: u64,
    capacity: u32,
    _marker: PhantomData<T>,
}

impl<T: bytemuck::Pod> UniformSlots<T> {
    pub fn new(device: &wgpu::Device, label: &str, capacity: u32) -> Self {
        let align = device.limits().min_uniform_buffer_offset_alignment as u64;
        let stride = align_to(std::mem::size_of::<T>() as u64, align);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: stride * capacity.max(1) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { buffer, stride, capacity: capacity.max(1), _marker: PhantomData }
    }

    /// Write `value` into `slot`; out-of-range slots are ignored
    pub fn write(&self, queue: &wgpu::Queue, slot: u32, value: &T) {
        if slot < self.capacity {
            queue.write_buffer(&self.buffer, self.stride * slot as u64, bytemuck::bytes_of(value));
        }
    }

    /// Dynamic offset of `slot`
    pub fn offset(&self, slot: u32) -> u32 {
        (self.stride * slot.min(self.capacity - 1) as u64) as u32
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Binding covering a single slot, for bind groups with a dynamic offset
    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: wgpu::BufferSize::new(std::mem::size_of::<T>() as u64),
        })
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_up_to_multiple() {
        assert_eq!(align_to(64, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(0, 256), 0);
    }
}
