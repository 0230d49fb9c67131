//! Box-filter resolve of the multisampled scene color

use super::{build_validated, color_attachment, fullscreen_shader, opaque_target, pipeline_layout, FullscreenPipeline, TargetBindGroup};
use crate::capabilities::COLOR_FORMAT;
use crate::graph::{begin_render_pass, PassContext, PassResourceBuilder, PrepareContext, RenderPass, ResourceHandle};
use crate::resources::{BindGroupBuilder, ResourceManager};
use crate::settings::MsaaModeMap;
use crate::shaders::{self, TextureKind};
use crate::Result;

/// Neighbor pixels visited on each side for a box filter of `filter_size` pixels
pub fn resolve_sample_radius(filter_size: f32) -> u32 {
    (filter_size.max(0.0) / 2.0 + 0.499).floor() as u32
}

struct ModePipeline {
    source_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
}

pub struct ResolvePass {
    pipelines: MsaaModeMap<ModePipeline>,
    source: TargetBindGroup,
}

impl ResolvePass {
    pub fn new(resources: &ResourceManager) -> Result<Self> {
        let device = resources.device();

        build_validated(device, "resolve", || {
            let pipelines = resources.per_msaa_mode(|mode| {
                let kind = TextureKind::color(mode.sample_count());
                let source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Resolve Source Layout"),
                    entries: &[kind.layout_entry(0)],
                });
                let module = fullscreen_shader("Resolve Shader")
                    .texture(1, 0, "scene_color", kind)
                    .source(shaders::RESOLVE)
                    .build(device);
                let layout = pipeline_layout(
                    device,
                    "Resolve Layout",
                    &[&resources.bind_group_layouts.global, &source_layout],
                );
                let pipeline = FullscreenPipeline {
                    label: &format!("Resolve ({})", mode.label()),
                    module: &module,
                    entry_point: "fs_main",
                    layout: &layout,
                    targets: &[opaque_target(COLOR_FORMAT)],
                    depth_stencil: None,
                    sample_count: 1,
                }
                .build(device);
                ModePipeline { source_layout, pipeline }
            });

            Self { pipelines, source: TargetBindGroup::default() }
        })
    }
}

impl RenderPass for ResolvePass {
    fn name(&self) -> &str {
        "resolve"
    }

    fn declare_resources(&self, builder: &mut PassResourceBuilder) {
        builder.read(ResourceHandle::SCENE_COLOR).write(ResourceHandle::RESOLVED_COLOR);
    }

    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        let targets = ctx.targets;
        let layout = &self.pipelines[targets.msaa_mode].source_layout;
        self.source.refresh(targets.generation(), || {
            BindGroupBuilder::new("Resolve Source")
                .texture(0, &targets.color_msaa.view)
                .build(ctx.resources.device(), layout)
        });
        Ok(())
    }

    fn execute(&mut self, ctx: &mut PassContext) -> Result<()> {
        let targets = ctx.targets;
        let source = self.source.get(self.name())?;
        let mut pass = begin_render_pass(
            ctx.encoder,
            "Resolve",
            &[color_attachment(&targets.color_resolve.view, wgpu::LoadOp::Clear(wgpu::Color::BLACK))],
            None,
        );
        pass.set_pipeline(&self.pipelines[targets.msaa_mode].pipeline);
        pass.set_bind_group(0, ctx.global_bind_group, &[]);
        pass.set_bind_group(1, source, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_radius_rounds_half_filter() {
        assert_eq!(resolve_sample_radius(0.0), 0);
        assert_eq!(resolve_sample_radius(1.0), 0);
        assert_eq!(resolve_sample_radius(2.0), 1);
        assert_eq!(resolve_sample_radius(3.0), 1);
        assert_eq!(resolve_sample_radius(4.0), 2);
        assert_eq!(resolve_sample_radius(6.0), 3);
    }
}
