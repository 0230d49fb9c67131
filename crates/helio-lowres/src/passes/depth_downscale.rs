//! Depth downscale - full-res scene depth into the half-res particle depth
//!
//! The single-sample variant keeps the farthest depth of each 2x2 block. The
//! MSAA variant runs per subsample and copies the full-res sample that the
//! active sample layout maps onto it, so low-res coverage lines up with the
//! full-res geometry edges.

use super::{build_validated, depth_overwrite, fullscreen_shader, pipeline_layout, FullscreenPipeline, TargetBindGroup};
use crate::frame::ParticleTarget;
use crate::graph::{begin_render_pass, PassContext, PassResourceBuilder, PrepareContext, RenderPass, ResourceHandle};
use crate::resources::{BindGroupBuilder, ResourceManager};
use crate::settings::MsaaModeMap;
use crate::shaders::{self, TextureKind};
use crate::Result;

struct ModePipelines {
    source_layout: wgpu::BindGroupLayout,
    single: wgpu::RenderPipeline,
    msaa: wgpu::RenderPipeline,
}

pub struct DepthDownscalePass {
    pipelines: MsaaModeMap<ModePipelines>,
    source: TargetBindGroup,
}

impl DepthDownscalePass {
    pub fn new(resources: &ResourceManager) -> Result<Self> {
        let device = resources.device();

        build_validated(device, "depth downscale", || {
            let pipelines = resources.per_msaa_mode(|mode| {
                let kind = TextureKind::depth(mode.sample_count());
                let source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Depth Downscale Source Layout"),
                    entries: &[kind.layout_entry(0)],
                });
                let module = fullscreen_shader("Depth Downscale Shader")
                    .texture(1, 0, "scene_depth", kind)
                    .source(shaders::DEPTH_DOWNSCALE)
                    .build(device);
                let layout = pipeline_layout(
                    device,
                    "Depth Downscale Layout",
                    &[&resources.bind_group_layouts.global, &source_layout],
                );

                let pipeline = |label: &str, entry_point: &str, sample_count: u32| {
                    FullscreenPipeline {
                        label,
                        module: &module,
                        entry_point,
                        layout: &layout,
                        targets: &[],
                        depth_stencil: Some(depth_overwrite()),
                        sample_count,
                    }
                    .build(device)
                };

                let single = pipeline("Depth Downscale", "fs_single", 1);
                let msaa = pipeline("Depth Downscale MSAA", "fs_msaa", mode.low_res_sample_count());
                ModePipelines { source_layout, single, msaa }
            });

            Self { pipelines, source: TargetBindGroup::default() }
        })
    }
}

impl RenderPass for DepthDownscalePass {
    fn name(&self) -> &str {
        "depth_downscale"
    }

    fn declare_resources(&self, builder: &mut PassResourceBuilder) {
        builder.read(ResourceHandle::SCENE_DEPTH).write(ResourceHandle::LOW_RES_DEPTH);
    }

    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        let targets = ctx.targets;
        let layout = &self.pipelines[targets.msaa_mode].source_layout;
        self.source.refresh(targets.generation(), || {
            BindGroupBuilder::new("Depth Downscale Source")
                .texture(0, &targets.depth.view)
                .build(ctx.resources.device(), layout)
        });
        Ok(())
    }

    fn execute(&mut self, ctx: &mut PassContext) -> Result<()> {
        if !ctx.plan.depth_downscale {
            return Ok(());
        }

        let targets = ctx.targets;
        let pipelines = &self.pipelines[targets.msaa_mode];
        let (pipeline, target) = if ctx.plan.particles == Some(ParticleTarget::LowResMsaa) {
            (&pipelines.msaa, &targets.low_res_depth_msaa)
        } else {
            (&pipelines.single, &targets.low_res_depth)
        };
        let source = self.source.get(self.name())?;

        let mut pass = begin_render_pass(
            ctx.encoder,
            "Depth Downscale",
            &[],
            Some(wgpu::RenderPassDepthStencilAttachment {
                view: &target.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
        );
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, ctx.global_bind_group, &[]);
        pass.set_bind_group(1, source, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}
