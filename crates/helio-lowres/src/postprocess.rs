//! Post-processing after the AA resolve
//!
//! The renderer hands the resolved color to a `PostProcessor` and lets it draw
//! the presentation image. `ToneMapBloom` is the built-in one: a half-res bright
//! pass, separable Gaussian blur iterations and an ACES tone map.

use crate::capabilities::COLOR_FORMAT;
use crate::passes::{build_validated, color_attachment, fullscreen_shader, opaque_target, pipeline_layout, FullscreenPipeline};
use crate::resources::{sampler_entry, texture_entry, BindGroupBuilder, RenderTarget, ResourceManager, TargetExtents, UniformSlots};
use crate::settings::PostProcessSettings;
use crate::shaders;
use crate::graph::begin_render_pass;
use crate::Result;

/// What the scene hands to post-processing each frame
pub struct PostProcessInputs<'a> {
    /// Single-sample linear HDR color
    pub color: &'a wgpu::TextureView,
    /// Full-res scene depth at the scene's sample count
    pub depth: &'a wgpu::TextureView,
    pub extents: TargetExtents,
    /// Changes whenever `color` or `depth` are recreated
    pub generation: u64,
    pub near: f32,
    pub far: f32,
    /// Seconds since the renderer was created
    pub time: f32,
}

/// Turns the resolved scene into the presentation image
pub trait PostProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Upload constants and refresh anything tied to the input views
    fn prepare(&mut self, resources: &ResourceManager, settings: &PostProcessSettings, inputs: &PostProcessInputs) -> Result<()>;

    /// Record into `output`, which has the format the processor was built for
    fn execute(&mut self, encoder: &mut wgpu::CommandEncoder, inputs: &PostProcessInputs, output: &wgpu::TextureView) -> Result<()>;
}

/// Horizontal plus vertical blur rounds over the bloom buffer
pub const BLOOM_BLUR_ITERATIONS: u32 = 2;

const EXTRACT_SLOT: u32 = 0;
const TONEMAP_SLOT: u32 = 1 + 2 * BLOOM_BLUR_ITERATIONS;
const POST_SLOTS: u32 = TONEMAP_SLOT + 1;

fn blur_slot(iteration: u32, vertical: bool) -> u32 {
    1 + 2 * iteration + vertical as u32
}

/// Must match `PostUniform` in postprocess.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PostUniform {
    pub exposure: f32,
    pub bloom_exposure: f32,
    pub bloom_magnitude: f32,
    pub blur_sigma: f32,
    pub texel_size: [f32; 2],
    pub direction: [f32; 2],
}

impl PostUniform {
    pub fn new(settings: &PostProcessSettings, bloom_width: u32, bloom_height: u32, direction: [f32; 2]) -> Self {
        Self {
            exposure: settings.exposure,
            bloom_exposure: settings.bloom_exposure,
            bloom_magnitude: settings.bloom_magnitude,
            blur_sigma: settings.bloom_blur_sigma,
            texel_size: [1.0 / bloom_width.max(1) as f32, 1.0 / bloom_height.max(1) as f32],
            direction,
        }
    }
}

/// The bloom ping-pong pair and the bind groups reading them
struct BloomTargets {
    generation: u64,
    a: RenderTarget,
    b: RenderTarget,
    extract: wgpu::BindGroup,
    blur_h: wgpu::BindGroup,
    blur_v: wgpu::BindGroup,
    tonemap: wgpu::BindGroup,
}

/// Bloom plus filmic tone mapping
pub struct ToneMapBloom {
    layout: wgpu::BindGroupLayout,
    extract: wgpu::RenderPipeline,
    blur: wgpu::RenderPipeline,
    tonemap: wgpu::RenderPipeline,
    params: UniformSlots<PostUniform>,
    bloom: Option<BloomTargets>,
}

impl ToneMapBloom {
    pub fn new(resources: &ResourceManager, output_format: wgpu::TextureFormat) -> Result<Self> {
        let device = resources.device();

        build_validated(device, "tone map", || {
            let float = wgpu::TextureSampleType::Float { filterable: true };
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Post-Process Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: true,
                            min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<PostUniform>() as u64),
                        },
                        count: None,
                    },
                    texture_entry(1, float, false),
                    sampler_entry(2, wgpu::SamplerBindingType::Filtering),
                    texture_entry(3, float, false),
                ],
            });

            // Surfaces without an sRGB view get the transfer function in the shader
            let module = fullscreen_shader("Post-Process Shader")
                .define("ENCODE_SRGB", !output_format.is_srgb() as u32)
                .source(shaders::POSTPROCESS)
                .build(device);
            let pipeline_layout = pipeline_layout(device, "Post-Process Pipeline Layout", &[&layout]);

            let pipeline = |label: &str, entry_point: &str, format: wgpu::TextureFormat| {
                FullscreenPipeline {
                    label,
                    module: &module,
                    entry_point,
                    layout: &pipeline_layout,
                    targets: &[opaque_target(format)],
                    depth_stencil: None,
                    sample_count: 1,
                }
                .build(device)
            };

            Self {
                extract: pipeline("Bloom Extract", "fs_extract", COLOR_FORMAT),
                blur: pipeline("Bloom Blur", "fs_blur", COLOR_FORMAT),
                tonemap: pipeline("Tone Map", "fs_tonemap", output_format),
                params: UniformSlots::new(device, "Post-Process Constants", POST_SLOTS),
                layout,
                bloom: None,
            }
        })
    }

    fn build_bloom(&self, resources: &ResourceManager, inputs: &PostProcessInputs) -> Result<BloomTargets> {
        let device = resources.device();
        let (w, h) = (inputs.extents.half_width, inputs.extents.half_height);
        let sampler = &resources.samplers.linear_clamp;
        let none = wgpu::TextureUsages::empty();

        build_validated(device, "bloom targets", || {
            let a = RenderTarget::new(device, "Bloom A", w, h, COLOR_FORMAT, 1, none);
            let b = RenderTarget::new(device, "Bloom B", w, h, COLOR_FORMAT, 1, none);

            // The bound `bloom` texture is never the one being drawn into
            let group = |label: &str, source: &wgpu::TextureView, bloom: &wgpu::TextureView| {
                BindGroupBuilder::new(label)
                    .resource(0, self.params.binding())
                    .texture(1, source)
                    .sampler(2, sampler)
                    .texture(3, bloom)
                    .build(device, &self.layout)
            };
            let extract = group("Bloom Extract", inputs.color, &b.view);
            let blur_h = group("Bloom Blur H", &a.view, &a.view);
            let blur_v = group("Bloom Blur V", &b.view, &b.view);
            let tonemap = group("Tone Map", inputs.color, &a.view);

            BloomTargets { generation: inputs.generation, a, b, extract, blur_h, blur_v, tonemap }
        })
    }

    fn draw(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        target: &wgpu::TextureView,
        pipeline: &wgpu::RenderPipeline,
        group: &wgpu::BindGroup,
        slot: u32,
    ) {
        let mut pass = begin_render_pass(encoder, label, &[color_attachment(target, wgpu::LoadOp::Clear(wgpu::Color::BLACK))], None);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, group, &[self.params.offset(slot)]);
        pass.draw(0..3, 0..1);
    }
}

impl PostProcessor for ToneMapBloom {
    fn name(&self) -> &str {
        "tone_map_bloom"
    }

    fn prepare(&mut self, resources: &ResourceManager, settings: &PostProcessSettings, inputs: &PostProcessInputs) -> Result<()> {
        if self.bloom.as_ref().map(|b| b.generation) != Some(inputs.generation) {
            self.bloom = Some(self.build_bloom(resources, inputs)?);
            log::debug!("Bloom targets: {}x{}", inputs.extents.half_width, inputs.extents.half_height);
        }

        let queue = resources.queue();
        let (w, h) = (inputs.extents.half_width, inputs.extents.half_height);
        self.params.write(queue, EXTRACT_SLOT, &PostUniform::new(settings, w, h, [0.0, 0.0]));
        for i in 0..BLOOM_BLUR_ITERATIONS {
            self.params.write(queue, blur_slot(i, false), &PostUniform::new(settings, w, h, [1.0, 0.0]));
            self.params.write(queue, blur_slot(i, true), &PostUniform::new(settings, w, h, [0.0, 1.0]));
        }
        self.params.write(queue, TONEMAP_SLOT, &PostUniform::new(settings, w, h, [0.0, 0.0]));
        Ok(())
    }

    fn execute(&mut self, encoder: &mut wgpu::CommandEncoder, _inputs: &PostProcessInputs, output: &wgpu::TextureView) -> Result<()> {
        let bloom = self
            .bloom
            .as_ref()
            .ok_or_else(|| crate::passes::missing(self.name(), "bloom targets"))?;

        self.draw(encoder, "Bloom Extract", &bloom.a.view, &self.extract, &bloom.extract, EXTRACT_SLOT);
        for i in 0..BLOOM_BLUR_ITERATIONS {
            self.draw(encoder, "Bloom Blur H", &bloom.b.view, &self.blur, &bloom.blur_h, blur_slot(i, false));
            self.draw(encoder, "Bloom Blur V", &bloom.a.view, &self.blur, &bloom.blur_v, blur_slot(i, true));
        }
        self.draw(encoder, "Tone Map", output, &self.tonemap, &bloom.tonemap, TONEMAP_SLOT);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_matches_shader_layout() {
        assert_eq!(std::mem::size_of::<PostUniform>(), 32);
    }

    #[test]
    fn every_draw_has_its_own_slot() {
        let mut slots = vec![EXTRACT_SLOT, TONEMAP_SLOT];
        for i in 0..BLOOM_BLUR_ITERATIONS {
            slots.push(blur_slot(i, false));
            slots.push(blur_slot(i, true));
        }
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len() as u32, POST_SLOTS);
        assert!(slots.iter().all(|&s| s < POST_SLOTS));
    }

    #[test]
    fn texel_size_follows_the_bloom_buffer() {
        let settings = PostProcessSettings::default();
        let params = PostUniform::new(&settings, 640, 360, [1.0, 0.0]);
        assert_eq!(params.texel_size, [1.0 / 640.0, 1.0 / 360.0]);
        assert_eq!(params.blur_sigma, settings.bloom_blur_sigma);
        assert_eq!(params.direction, [1.0, 0.0]);
    }
}
