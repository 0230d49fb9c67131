//! Low-res resolve - multisampled half-res particles to one sample per pixel
//!
//! Writes the averaged color and a single depth per pixel. The depth is the
//! farthest subsample, or 0 where the subsamples straddle a depth edge so the
//! MSAA composite knows to take the per-subsample path there.

use super::{build_validated, depth_overwrite, fullscreen_shader, opaque_target, pipeline_layout, FullscreenPipeline, TargetBindGroup};
use crate::capabilities::COLOR_FORMAT;
use crate::graph::{begin_render_pass, PassContext, PassResourceBuilder, PrepareContext, RenderPass, ResourceHandle};
use crate::resources::{BindGroupBuilder, ResourceManager};
use crate::settings::MsaaModeMap;
use crate::shaders::{self, TextureKind};
use crate::Result;

struct ModePipeline {
    source_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
}

pub struct LowResResolvePass {
    pipelines: MsaaModeMap<ModePipeline>,
    source: TargetBindGroup,
}

impl LowResResolvePass {
    pub fn new(resources: &ResourceManager) -> Result<Self> {
        let device = resources.device();

        build_validated(device, "low-res resolve", || {
            let pipelines = resources.per_msaa_mode(|mode| {
                let samples = mode.low_res_sample_count();
                let color = TextureKind::color(samples);
                let depth = TextureKind::depth(samples);

                let source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Low-Res Resolve Source Layout"),
                    entries: &[color.layout_entry(0), depth.layout_entry(1)],
                });
                let module = fullscreen_shader("Low-Res Resolve Shader")
                    .define("LOW_RES_SAMPLES", samples)
                    .texture(1, 0, "low_res_color", color)
                    .texture(1, 1, "low_res_depth", depth)
                    .source(shaders::LOWRES_RESOLVE)
                    .build(device);
                let layout = pipeline_layout(
                    device,
                    "Low-Res Resolve Layout",
                    &[&resources.bind_group_layouts.global, &source_layout],
                );
                let pipeline = FullscreenPipeline {
                    label: &format!("Low-Res Resolve ({})", mode.label()),
                    module: &module,
                    entry_point: "fs_main",
                    layout: &layout,
                    targets: &[opaque_target(COLOR_FORMAT)],
                    depth_stencil: Some(depth_overwrite()),
                    sample_count: 1,
                }
                .build(device);

                ModePipeline { source_layout, pipeline }
            });

            Self { pipelines, source: TargetBindGroup::default() }
        })
    }
}

impl RenderPass for LowResResolvePass {
    fn name(&self) -> &str {
        "lowres_resolve"
    }

    fn declare_resources(&self, builder: &mut PassResourceBuilder) {
        builder
            .read(ResourceHandle::LOW_RES_COLOR)
            .read(ResourceHandle::LOW_RES_DEPTH)
            .write(ResourceHandle::LOW_RES_RESOLVED);
    }

    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        let targets = ctx.targets;
        let layout = &self.pipelines[targets.msaa_mode].source_layout;
        self.source.refresh(targets.generation(), || {
            BindGroupBuilder::new("Low-Res Resolve Source")
                .texture(0, &targets.low_res_msaa.view)
                .texture(1, &targets.low_res_depth_msaa.view)
                .build(ctx.resources.device(), layout)
        });
        Ok(())
    }

    fn execute(&mut self, ctx: &mut PassContext) -> Result<()> {
        if !ctx.plan.low_res_resolve {
            return Ok(());
        }

        let targets = ctx.targets;
        let source = self.source.get(self.name())?;
        let mut pass = begin_render_pass(
            ctx.encoder,
            "Low-Res Resolve",
            &[super::color_attachment(&targets.low_res.view, wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT))],
            Some(wgpu::RenderPassDepthStencilAttachment {
                view: &targets.low_res_depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
        );
        pass.set_pipeline(&self.pipelines[targets.msaa_mode].pipeline);
        pass.set_bind_group(0, ctx.global_bind_group, &[]);
        pass.set_bind_group(1, source, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}
