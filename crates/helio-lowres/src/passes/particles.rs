//! Particle render pass - instanced sun-lit quads
//!
//! Renders into one of three places depending on the frame plan: straight into
//! the full-res scene color, into the single-sample half-res buffer, or into the
//! half-res buffer with four times the full-res sample count. The half-res
//! targets accumulate premultiplied color and transmittance, ready for the
//! composite's (One, SrcAlpha) blend.

use super::{build_validated, color_attachment, pipeline_layout};
use crate::capabilities::{COLOR_FORMAT, DEPTH_FORMAT};
use crate::frame::ParticleTarget;
use crate::graph::{begin_render_pass, PassContext, PassResourceBuilder, PrepareContext, RenderPass, ResourceHandle};
use crate::particles::{GpuParticle, MAX_PARTICLES};
use crate::resources::{BindGroupBuilder, ResourceManager, UniformSlots};
use crate::settings::MsaaModeMap;
use crate::shaders::{self, ShaderBuilder};
use crate::Result;
use wgpu::util::DeviceExt;

/// Diffuse albedo of every particle
pub const PARTICLE_ALBEDO: [f32; 3] = [0.8, 0.8, 0.8];

/// Two triangles over the corners decoded from `vertex_index`
const QUAD_INDICES: [u16; 6] = [0, 1, 3, 3, 2, 0];

/// Must match `ParticleUniform` in particles.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ParticleUniform {
    pub albedo_billboard: [f32; 4],
    /// x: absorption scale
    pub absorption: [f32; 4],
}

/// Color into the half-res buffer, alpha keeps the product of `1 - alpha`
pub const LOW_RES_BLEND: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::SrcAlpha,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Zero,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
};

/// Cleared value of the half-res buffer: no color, full transmittance
pub const LOW_RES_CLEAR: wgpu::Color = wgpu::Color { r: 0.0, g: 0.0, b: 0.0, a: 1.0 };

pub struct ParticlePass {
    full_res: MsaaModeMap<wgpu::RenderPipeline>,
    low_res: wgpu::RenderPipeline,
    low_res_msaa: MsaaModeMap<wgpu::RenderPipeline>,
    instance_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    instance_count: u32,
    params: UniformSlots<ParticleUniform>,
    params_bind_group: wgpu::BindGroup,
}

impl ParticlePass {
    pub fn new(resources: &ResourceManager) -> Result<Self> {
        let device = resources.device();
        let layouts = &resources.bind_group_layouts;

        build_validated(device, "particle pass", || {
            let module = ShaderBuilder::new("Particle Shader")
                .source(shaders::COMMON)
                .source(shaders::SHADOW_SAMPLING)
                .source(shaders::PARTICLES)
                .build(device);
            let layout = pipeline_layout(
                device,
                "Particle Pipeline Layout",
                &[&layouts.global, &layouts.shadow, &layouts.dynamic],
            );

            let pipeline = |label: &str, blend: wgpu::BlendState, sample_count: u32| {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(label),
                    layout: Some(&layout),
                    cache: None,
                    vertex: wgpu::VertexState {
                        module: &module,
                        entry_point: "vs_main",
                        buffers: &[wgpu::VertexBufferLayout {
                            array_stride: std::mem::size_of::<GpuParticle>() as wgpu::BufferAddress,
                            step_mode: wgpu::VertexStepMode::Instance,
                            attributes: &[
                                // position (vec3) + size (f32)
                                wgpu::VertexAttribute {
                                    format: wgpu::VertexFormat::Float32x4,
                                    offset: 0,
                                    shader_location: 0,
                                },
                                // opacity + lifetime + pad
                                wgpu::VertexAttribute {
                                    format: wgpu::VertexFormat::Float32x4,
                                    offset: 16,
                                    shader_location: 1,
                                },
                            ],
                        }],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &module,
                        entry_point: "fs_main",
                        targets: &[Some(wgpu::ColorTargetState {
                            format: COLOR_FORMAT,
                            blend: Some(blend),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        cull_mode: None,
                        ..Default::default()
                    },
                    depth_stencil: Some(wgpu::DepthStencilState {
                        format: DEPTH_FORMAT,
                        depth_write_enabled: false,
                        depth_compare: wgpu::CompareFunction::Less,
                        stencil: wgpu::StencilState::default(),
                        bias: wgpu::DepthBiasState::default(),
                    }),
                    multisample: wgpu::MultisampleState {
                        count: sample_count,
                        ..Default::default()
                    },
                    multiview: None,
                })
            };

            let full_res = resources.per_msaa_mode(|mode| {
                pipeline(
                    &format!("Particles Full-Res ({})", mode.label()),
                    wgpu::BlendState::ALPHA_BLENDING,
                    mode.sample_count(),
                )
            });
            let low_res = pipeline("Particles Low-Res", LOW_RES_BLEND, 1);
            let low_res_msaa = resources.per_msaa_mode(|mode| {
                pipeline(
                    &format!("Particles Low-Res MSAA ({})", mode.label()),
                    LOW_RES_BLEND,
                    mode.low_res_sample_count(),
                )
            });

            let instance_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Particle Instances"),
                size: MAX_PARTICLES as u64 * std::mem::size_of::<GpuParticle>() as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Particle Quad Indices"),
                contents: bytemuck::cast_slice(&QUAD_INDICES),
                usage: wgpu::BufferUsages::INDEX,
            });

            let params = UniformSlots::new(device, "Particle Constants", 1);
            let params_bind_group = BindGroupBuilder::new("Particle Constants")
                .resource(0, params.binding())
                .build(device, &layouts.dynamic);

            Self {
                full_res,
                low_res,
                low_res_msaa,
                instance_buffer,
                index_buffer,
                instance_count: 0,
                params,
                params_bind_group,
            }
        })
    }
}

impl RenderPass for ParticlePass {
    fn name(&self) -> &str {
        "particles"
    }

    fn declare_resources(&self, builder: &mut PassResourceBuilder) {
        builder
            .read(ResourceHandle::SHADOW_VSM)
            .read(ResourceHandle::SCENE_DEPTH)
            .write(ResourceHandle::LOW_RES_COLOR)
            .write(ResourceHandle::LOW_RES_DEPTH)
            .write(ResourceHandle::SCENE_COLOR);
    }

    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        let particles = &ctx.particles[..ctx.particles.len().min(MAX_PARTICLES as usize)];
        self.instance_count = particles.len() as u32;
        if particles.is_empty() {
            return Ok(());
        }

        let queue = ctx.resources.queue();
        queue.write_buffer(&self.instance_buffer, 0, bytemuck::cast_slice(particles));

        let [r, g, b] = PARTICLE_ALBEDO;
        let billboard = if ctx.settings.particles.billboard { 1.0 } else { 0.0 };
        let absorption = [ctx.settings.particles.absorption_scale, 0.0, 0.0, 0.0];
        self.params.write(queue, 0, &ParticleUniform { albedo_billboard: [r, g, b, billboard], absorption });
        Ok(())
    }

    fn execute(&mut self, ctx: &mut PassContext) -> Result<()> {
        let Some(target) = ctx.plan.particles else {
            return Ok(());
        };
        if self.instance_count == 0 {
            return Ok(());
        }

        let targets = ctx.targets;
        let mode = targets.msaa_mode;
        let (pipeline, color, depth, load) = match target {
            ParticleTarget::FullRes => (&self.full_res[mode], &targets.color_msaa, &targets.depth, wgpu::LoadOp::Load),
            ParticleTarget::LowRes => (
                &self.low_res,
                &targets.low_res,
                &targets.low_res_depth,
                wgpu::LoadOp::Clear(LOW_RES_CLEAR),
            ),
            ParticleTarget::LowResMsaa => (
                &self.low_res_msaa[mode],
                &targets.low_res_msaa,
                &targets.low_res_depth_msaa,
                wgpu::LoadOp::Clear(LOW_RES_CLEAR),
            ),
        };

        let mut pass = begin_render_pass(
            ctx.encoder,
            "Particle Pass",
            &[color_attachment(&color.view, load)],
            Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
        );

        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, ctx.global_bind_group, &[]);
        pass.set_bind_group(1, ctx.shadow_bind_group, &[]);
        pass.set_bind_group(2, &self.params_bind_group, &[self.params.offset(0)]);
        pass.set_vertex_buffer(0, self.instance_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..self.instance_count);

        log::trace!("Particles: {} instances into {:?}", self.instance_count, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_indices_cover_both_triangles() {
        // Corners decode as (vi & 1, vi >> 1): 0 and 3 are opposite
        assert_eq!(&QUAD_INDICES[..3], &[0, 1, 3]);
        assert_eq!(&QUAD_INDICES[3..], &[3, 2, 0]);
    }

    #[test]
    fn instance_layout_is_two_vec4s() {
        assert_eq!(std::mem::size_of::<GpuParticle>(), 32);
    }

    #[test]
    fn low_res_target_keeps_transmittance_in_alpha() {
        assert_eq!(LOW_RES_BLEND.alpha.src_factor, wgpu::BlendFactor::Zero);
        assert_eq!(LOW_RES_BLEND.alpha.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
        assert_eq!(LOW_RES_CLEAR.a, 1.0);
        assert_eq!(std::mem::size_of::<ParticleUniform>(), 32);
    }
}
