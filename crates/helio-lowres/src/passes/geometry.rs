//! Main forward pass - sun diffuse and GGX specular with cascaded EVSM shadows

use super::depth_prepass::draw_meshes;
use super::{build_validated, color_attachment, pipeline_layout, DrawList};
use crate::capabilities::{COLOR_FORMAT, DEPTH_FORMAT};
use crate::graph::{begin_render_pass, PassContext, PassResourceBuilder, PrepareContext, RenderPass, ResourceHandle};
use crate::mesh::{DrawCall, PackedVertex};
use crate::resources::{BindGroupBuilder, ResourceManager, UniformSlots};
use crate::settings::MsaaModeMap;
use crate::shaders::{self, ShaderBuilder};
use crate::Result;

/// Per-draw constant slots
pub const MAX_DRAWS: u32 = 256;

/// Must match `DrawUniform` in mesh.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawUniform {
    pub albedo: [f32; 4],
}

/// Renders the opaque draw list over the prepass depth
pub struct GeometryPass {
    pipelines: MsaaModeMap<wgpu::RenderPipeline>,
    draw_constants: UniformSlots<DrawUniform>,
    draw_bind_group: wgpu::BindGroup,
    draw_list: DrawList,
    /// Snapshot taken in `prepare`, so constants and draws always agree
    frame_draws: Vec<DrawCall>,
}

impl GeometryPass {
    pub fn new(resources: &ResourceManager, draw_list: DrawList) -> Result<Self> {
        let device = resources.device();
        let layouts = &resources.bind_group_layouts;

        build_validated(device, "geometry pass", || {
            let module = ShaderBuilder::new("Mesh Shader")
                .source(shaders::COMMON)
                .source(shaders::SHADOW_SAMPLING)
                .source(shaders::MESH)
                .build(device);
            let layout = pipeline_layout(
                device,
                "Geometry Pipeline Layout",
                &[&layouts.global, &layouts.shadow, &layouts.dynamic],
            );

            let pipelines = resources.per_msaa_mode(|mode| {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(&format!("Geometry Pipeline ({})", mode.label())),
                    layout: Some(&layout),
                    cache: None,
                    vertex: wgpu::VertexState {
                        module: &module,
                        entry_point: "vs_main",
                        buffers: &[PackedVertex::layout()],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &module,
                        entry_point: "fs_main",
                        targets: &[Some(wgpu::ColorTargetState {
                            format: COLOR_FORMAT,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        front_face: wgpu::FrontFace::Ccw,
                        cull_mode: Some(wgpu::Face::Back),
                        ..Default::default()
                    },
                    // Depth is final after the prepass
                    depth_stencil: Some(wgpu::DepthStencilState {
                        format: DEPTH_FORMAT,
                        depth_write_enabled: false,
                        depth_compare: wgpu::CompareFunction::LessEqual,
                        stencil: wgpu::StencilState::default(),
                        bias: wgpu::DepthBiasState::default(),
                    }),
                    multisample: wgpu::MultisampleState {
                        count: mode.sample_count(),
                        ..Default::default()
                    },
                    multiview: None,
                })
            });

            let draw_constants = UniformSlots::new(device, "Draw Constants", MAX_DRAWS);
            let draw_bind_group = BindGroupBuilder::new("Draw Constants")
                .resource(0, draw_constants.binding())
                .build(device, &layouts.dynamic);

            Self {
                pipelines,
                draw_constants,
                draw_bind_group,
                draw_list,
                frame_draws: Vec::new(),
            }
        })
    }
}

impl RenderPass for GeometryPass {
    fn name(&self) -> &str {
        "geometry"
    }

    fn declare_resources(&self, builder: &mut PassResourceBuilder) {
        builder
            .read(ResourceHandle::SCENE_DEPTH)
            .read(ResourceHandle::SHADOW_VSM)
            .write(ResourceHandle::SCENE_COLOR);
    }

    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        self.frame_draws = self.draw_list.lock().clone();
        if self.frame_draws.len() > MAX_DRAWS as usize {
            log::warn!("{} draws queued, only the first {} are rendered", self.frame_draws.len(), MAX_DRAWS);
            self.frame_draws.truncate(MAX_DRAWS as usize);
        }

        for (slot, dc) in self.frame_draws.iter().enumerate() {
            let [r, g, b] = dc.albedo;
            self.draw_constants.write(ctx.resources.queue(), slot as u32, &DrawUniform { albedo: [r, g, b, 1.0] });
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut PassContext) -> Result<()> {
        let targets = ctx.targets;
        let mut pass = begin_render_pass(
            ctx.encoder,
            "Geometry Pass",
            &[color_attachment(&targets.color_msaa.view, wgpu::LoadOp::Clear(wgpu::Color::BLACK))],
            Some(wgpu::RenderPassDepthStencilAttachment {
                view: &targets.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
        );

        if self.frame_draws.is_empty() {
            return Ok(());
        }

        pass.set_pipeline(&self.pipelines[targets.msaa_mode]);
        pass.set_bind_group(0, ctx.global_bind_group, &[]);
        pass.set_bind_group(1, ctx.shadow_bind_group, &[]);

        for (slot, dc) in self.frame_draws.iter().enumerate() {
            pass.set_bind_group(2, &self.draw_bind_group, &[self.draw_constants.offset(slot as u32)]);
            draw_meshes(&mut pass, std::slice::from_ref(dc));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_uniform_matches_wgsl_layout() {
        assert_eq!(std::mem::size_of::<DrawUniform>(), 16);
    }
}
