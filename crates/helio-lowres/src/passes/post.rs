//! Hands the resolved frame to the post-processor

use crate::graph::{PassContext, PassResourceBuilder, PrepareContext, RenderPass, ResourceHandle};
use crate::postprocess::{PostProcessInputs, PostProcessor};
use crate::resources::RenderTargets;
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared with the renderer so a screenshot can re-run post-processing offscreen
pub type SharedPostProcessor = Arc<Mutex<Box<dyn PostProcessor>>>;

/// Inputs for post-processing drawn from this frame's targets
pub fn post_inputs<'a>(targets: &'a RenderTargets, near: f32, far: f32, time: f32) -> PostProcessInputs<'a> {
    PostProcessInputs {
        color: &targets.color_resolve.view,
        depth: &targets.depth.view,
        extents: targets.extents,
        generation: targets.generation(),
        near,
        far,
        time,
    }
}

pub struct PostProcessPass {
    processor: SharedPostProcessor,
    time: f32,
    near: f32,
    far: f32,
}

impl PostProcessPass {
    pub fn new(processor: SharedPostProcessor) -> Self {
        Self { processor, time: 0.0, near: 0.0, far: 1.0 }
    }
}

impl RenderPass for PostProcessPass {
    fn name(&self) -> &str {
        "post_process"
    }

    fn declare_resources(&self, builder: &mut PassResourceBuilder) {
        builder
            .read(ResourceHandle::RESOLVED_COLOR)
            .read(ResourceHandle::SCENE_DEPTH)
            .write(ResourceHandle::OUTPUT);
    }

    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        self.time = ctx.time;
        self.near = ctx.camera.near;
        self.far = ctx.camera.far;
        let inputs = post_inputs(ctx.targets, self.near, self.far, self.time);
        self.processor.lock().prepare(ctx.resources, &ctx.settings.post, &inputs)
    }

    fn execute(&mut self, ctx: &mut PassContext) -> Result<()> {
        let inputs = post_inputs(ctx.targets, self.near, self.far, self.time);
        self.processor.lock().execute(ctx.encoder, &inputs, ctx.output)
    }
}
