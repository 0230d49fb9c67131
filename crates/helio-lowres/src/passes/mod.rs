//! Built-in render passes
//!
//! Every pass builds its pipelines up front (one per MSAA mode where the sample
//! count matters) so invalid pipelines fail `Renderer::new` rather than a frame.

pub mod composite;
pub mod depth_downscale;
pub mod depth_prepass;
pub mod geometry;
pub mod lowres_resolve;
pub mod particles;
pub mod post;
pub mod resolve;
pub mod shadow;
pub mod sky;

pub use composite::CompositePass;
pub use depth_downscale::DepthDownscalePass;
pub use depth_prepass::DepthPrepass;
pub use geometry::GeometryPass;
pub use lowres_resolve::LowResResolvePass;
pub use particles::ParticlePass;
pub use post::PostProcessPass;
pub use resolve::ResolvePass;
pub use shadow::ShadowPass;
pub use sky::SkyPass;

use crate::mesh::DrawCall;
use crate::shaders::{self, ShaderBuilder};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// Opaque draws shared by the depth, shadow and geometry passes
pub type DrawList = Arc<Mutex<Vec<DrawCall>>>;

/// Shader builder preloaded with the shared structs and the fullscreen vertex stage
pub(crate) fn fullscreen_shader(label: &str) -> ShaderBuilder {
    ShaderBuilder::new(label)
        .source(shaders::COMMON)
        .source(shaders::FULLSCREEN)
}

/// Description of a fullscreen-triangle pipeline
pub(crate) struct FullscreenPipeline<'a> {
    pub label: &'a str,
    pub module: &'a wgpu::ShaderModule,
    pub entry_point: &'a str,
    pub layout: &'a wgpu::PipelineLayout,
    pub targets: &'a [Option<wgpu::ColorTargetState>],
    pub depth_stencil: Option<wgpu::DepthStencilState>,
    pub sample_count: u32,
}

impl FullscreenPipeline<'_> {
    pub fn build(&self, device: &wgpu::Device) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(self.label),
            layout: Some(self.layout),
            cache: None,
            vertex: wgpu::VertexState {
                module: self.module,
                entry_point: "vs_fullscreen",
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: self.module,
                entry_point: self.entry_point,
                targets: self.targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: self.depth_stencil.clone(),
            multisample: wgpu::MultisampleState {
                count: self.sample_count,
                ..Default::default()
            },
            multiview: None,
        })
    }
}

/// Depth target written unconditionally from `frag_depth`
pub(crate) fn depth_overwrite() -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format: crate::capabilities::DEPTH_FORMAT,
        depth_write_enabled: true,
        depth_compare: wgpu::CompareFunction::Always,
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    }
}

/// Color target without blending
pub(crate) fn opaque_target(format: wgpu::TextureFormat) -> Option<wgpu::ColorTargetState> {
    Some(wgpu::ColorTargetState {
        format,
        blend: None,
        write_mask: wgpu::ColorWrites::ALL,
    })
}

pub(crate) fn color_attachment(
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
) -> Option<wgpu::RenderPassColorAttachment<'_>> {
    Some(wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations { load, store: wgpu::StoreOp::Store },
    })
}

pub(crate) fn pipeline_layout(
    device: &wgpu::Device,
    label: &str,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
) -> wgpu::PipelineLayout {
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    })
}

/// Wrap pass construction in a validation scope
pub(crate) fn build_validated<T>(device: &wgpu::Device, pass: &str, f: impl FnOnce() -> T) -> Result<T> {
    crate::resources::validated(device, f).map_err(|e| Error::Pipeline(format!("{}: {}", pass, e)))
}

/// Error for a pass that lost a bind group it needs this frame
pub(crate) fn missing(pass: &str, what: &str) -> Error {
    Error::Pipeline(format!("{} has no {} for this frame", pass, what))
}

/// A bind group over render target views, rebuilt when the targets are recreated
#[derive(Default)]
pub(crate) struct TargetBindGroup {
    generation: Option<u64>,
    group: Option<wgpu::BindGroup>,
}

impl TargetBindGroup {
    pub fn refresh(&mut self, generation: u64, build: impl FnOnce() -> wgpu::BindGroup) {
        if self.generation != Some(generation) {
            self.group = Some(build());
            self.generation = Some(generation);
        }
    }

    pub fn get(&self, pass: &str) -> Result<&wgpu::BindGroup> {
        self.group.as_ref().ok_or_else(|| missing(pass, "target bind group"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_bind_group_is_missing_until_refreshed() {
        let group = TargetBindGroup::default();
        assert!(matches!(group.get("test"), Err(Error::Pipeline(_))));
    }
}
