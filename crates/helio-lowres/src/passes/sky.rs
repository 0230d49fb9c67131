//! Sky pass - analytic sky and sun disc behind the opaque geometry

use super::{build_validated, color_attachment, pipeline_layout};
use crate::capabilities::{COLOR_FORMAT, DEPTH_FORMAT};
use crate::graph::{begin_render_pass, PassContext, PassResourceBuilder, RenderPass, ResourceHandle};
use crate::resources::ResourceManager;
use crate::settings::MsaaModeMap;
use crate::shaders::{self, ShaderBuilder};
use crate::Result;

pub struct SkyPass {
    pipelines: MsaaModeMap<wgpu::RenderPipeline>,
}

impl SkyPass {
    pub fn new(resources: &ResourceManager) -> Result<Self> {
        let device = resources.device();

        build_validated(device, "sky pass", || {
            let module = ShaderBuilder::new("Sky Shader").source(shaders::COMMON).source(shaders::SKY).build(device);
            let layout = pipeline_layout(device, "Sky Pipeline Layout", &[&resources.bind_group_layouts.global]);

            let pipelines = resources.per_msaa_mode(|mode| {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(&format!("Sky Pipeline ({})", mode.label())),
                    layout: Some(&layout),
                    cache: None,
                    vertex: wgpu::VertexState {
                        module: &module,
                        entry_point: "vs_main",
                        buffers: &[],
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
                    primitive: wgpu::PrimitiveState::default(),
                    // Drawn at z = 1, so only cleared depth passes
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

            Self { pipelines }
        })
    }
}

impl RenderPass for SkyPass {
    fn name(&self) -> &str {
        "sky"
    }

    fn declare_resources(&self, builder: &mut PassResourceBuilder) {
        builder.read(ResourceHandle::SCENE_DEPTH).write(ResourceHandle::SCENE_COLOR);
    }

    fn execute(&mut self, ctx: &mut PassContext) -> Result<()> {
        let targets = ctx.targets;
        let mut pass = begin_render_pass(
            ctx.encoder,
            "Sky Pass",
            &[color_attachment(&targets.color_msaa.view, wgpu::LoadOp::Load)],
            Some(wgpu::RenderPassDepthStencilAttachment {
                view: &targets.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
        );
        pass.set_pipeline(&self.pipelines[targets.msaa_mode]);
        pass.set_bind_group(0, ctx.global_bind_group, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}
