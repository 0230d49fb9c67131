//! Render pass trait and execution contexts

use super::PassResourceBuilder;
use crate::camera::Camera;
use crate::frame::FramePlan;
use crate::particles::GpuParticle;
use crate::resources::{RenderTargets, ResourceManager};
use crate::settings::FrameSettings;
use crate::Result;

/// Render pass trait - implemented by all rendering passes
pub trait RenderPass: Send + Sync {
    /// Unique name for this pass
    fn name(&self) -> &str;

    /// Declare resource dependencies
    ///
    /// Called once during graph building to determine pass ordering.
    /// A pass may not read and write the same resource.
    fn declare_resources(&self, _builder: &mut PassResourceBuilder) {}

    /// Upload per-frame constants and refresh bind groups.
    ///
    /// Runs for every pass before any command is recorded.
    fn prepare(&mut self, _ctx: &PrepareContext) -> Result<()> {
        Ok(())
    }

    /// Record the pass. Passes with nothing to do this frame return early.
    fn execute(&mut self, ctx: &mut PassContext) -> Result<()>;
}

/// Per-frame inputs for `RenderPass::prepare`
pub struct PrepareContext<'a> {
    pub resources: &'a ResourceManager,
    pub targets: &'a RenderTargets,
    pub settings: &'a FrameSettings,
    pub plan: &'a FramePlan,
    pub camera: &'a Camera,
    /// Particles in draw order
    pub particles: &'a [GpuParticle],
    /// Seconds since the renderer was created
    pub time: f32,
    pub delta_time: f32,
}

/// Context for pass execution
pub struct PassContext<'a> {
    /// Command encoder for recording GPU commands
    pub encoder: &'a mut wgpu::CommandEncoder,

    pub resources: &'a ResourceManager,

    /// Resolution-dependent targets lent for this frame
    pub targets: &'a RenderTargets,

    pub settings: &'a FrameSettings,
    pub plan: &'a FramePlan,

    /// Bind group 0 - camera + scene constants (shared by all passes)
    pub global_bind_group: &'a wgpu::BindGroup,

    /// Bind group 1 - shadow constants and VSM atlas (shared by all lit passes)
    pub shadow_bind_group: &'a wgpu::BindGroup,

    /// Presentation target
    pub output: &'a wgpu::TextureView,
}

impl<'a> PassContext<'a> {
    /// Begin a render pass
    pub fn begin_render_pass(
        &mut self,
        label: &str,
        color_attachments: &[Option<wgpu::RenderPassColorAttachment>],
        depth_stencil_attachment: Option<wgpu::RenderPassDepthStencilAttachment>,
    ) -> wgpu::RenderPass<'_> {
        begin_render_pass(self.encoder, label, color_attachments, depth_stencil_attachment)
    }
}

/// Begin a render pass on a bare encoder
pub fn begin_render_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    color_attachments: &[Option<wgpu::RenderPassColorAttachment>],
    depth_stencil_attachment: Option<wgpu::RenderPassDepthStencilAttachment>,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments,
        depth_stencil_attachment,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}
