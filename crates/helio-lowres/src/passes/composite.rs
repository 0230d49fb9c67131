//! Composite - blends the half-res particle layer back over the full-res scene
//!
//! Two upsampling strategies:
//!
//! - MSAA: pixels whose depth disagrees with the resolved low-res depth are
//!   sub-pixel edges and average their own quadrant's subsamples; the rest
//!   sample the resolved buffer bilinearly.
//! - Nearest depth: when any of the four surrounding low-res texels is too far
//!   from the full-res depth, or one matches it exactly, the texel with the
//!   closest depth is point-sampled.
//!
//! The low-res buffer holds premultiplied color in rgb and transmittance in
//! alpha, so the blend is `dst = src.rgb + dst * src.a`.

use super::{build_validated, fullscreen_shader, pipeline_layout, FullscreenPipeline, TargetBindGroup};
use crate::capabilities::COLOR_FORMAT;
use crate::frame::CompositeStrategy;
use crate::graph::{begin_render_pass, PassContext, PassResourceBuilder, PrepareContext, RenderPass, ResourceHandle};
use crate::resources::{sampler_entry, BindGroupBuilder, ResourceManager};
use crate::settings::{MsaaMode, MsaaModeMap};
use crate::shaders::{self, TextureKind};
use crate::Result;

/// Premultiplied-over blend onto the scene color, alpha left alone
pub const COMPOSITE_BLEND: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::SrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Zero,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

/// Source picked by nearest-depth upsampling
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NearestDepthChoice {
    /// Every candidate is close enough and none matches exactly; filter bilinearly
    Bilinear,
    /// Point-sample the candidate at this scan-order index
    Point(usize),
}

/// Scan-order offsets of the four low-res candidates around a full-res pixel
pub const NEAREST_DEPTH_OFFSETS: [(i32, i32); 4] = [(0, 0), (1, 0), (0, 1), (1, 1)];

/// Pick the low-res source for one full-res pixel.
///
/// `candidates` are linear depths in `NEAREST_DEPTH_OFFSETS` order. An exact
/// depth match always wins over bilinear filtering. Ties keep the earlier
/// candidate.
pub fn select_nearest_depth(full_linear: f32, candidates: [f32; 4], threshold: f32) -> NearestDepthChoice {
    let mut best = 0;
    let mut best_diff = f32::INFINITY;
    let mut all_close = true;

    for (i, depth) in candidates.iter().enumerate() {
        let diff = (full_linear - depth).abs();
        if diff >= threshold {
            all_close = false;
        }
        if diff < best_diff {
            best_diff = diff;
            best = i;
        }
    }

    if all_close && best_diff > 0.0 {
        NearestDepthChoice::Bilinear
    } else {
        NearestDepthChoice::Point(best)
    }
}

/// Whether the MSAA composite takes the per-subsample path for a pixel.
///
/// `low_res_depth` is the resolved raw depth; 0 marks an edge found by the
/// low-res resolve.
pub fn is_sub_pixel_edge(full_linear: f32, low_res_linear: f32, low_res_depth: f32, threshold: f32) -> bool {
    low_res_depth <= 0.0 || (full_linear - low_res_linear).abs() / full_linear > threshold
}

struct ModePipelines {
    msaa_layout: wgpu::BindGroupLayout,
    msaa: wgpu::RenderPipeline,
    nearest_layout: wgpu::BindGroupLayout,
    nearest: wgpu::RenderPipeline,
}

pub struct CompositePass {
    pipelines: MsaaModeMap<ModePipelines>,
    msaa_sources: TargetBindGroup,
    nearest_sources: TargetBindGroup,
}

impl CompositePass {
    pub fn new(resources: &ResourceManager) -> Result<Self> {
        let device = resources.device();
        let global = &resources.bind_group_layouts.global;

        build_validated(device, "composite", || {
            let pipelines = resources.per_msaa_mode(|mode: MsaaMode| {
                let scene_depth = TextureKind::depth(mode.sample_count());
                let low_res_msaa = TextureKind::color(mode.low_res_sample_count());
                let targets = [Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: Some(COMPOSITE_BLEND),
                    write_mask: wgpu::ColorWrites::COLOR,
                })];
                let sampler = sampler_entry(4, wgpu::SamplerBindingType::Filtering);

                let msaa_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("MSAA Composite Source Layout"),
                    entries: &[
                        scene_depth.layout_entry(0),
                        TextureKind::Color.layout_entry(1),
                        TextureKind::Depth.layout_entry(2),
                        low_res_msaa.layout_entry(3),
                        sampler,
                    ],
                });
                let msaa_module = fullscreen_shader("MSAA Composite Shader")
                    .texture(1, 0, "scene_depth", scene_depth)
                    .texture(1, 1, "low_res", TextureKind::Color)
                    .texture(1, 2, "low_res_depth", TextureKind::Depth)
                    .texture(1, 3, "low_res_msaa", low_res_msaa)
                    .source(shaders::COMPOSITE_MSAA)
                    .build(device);
                let msaa_pipeline_layout = pipeline_layout(device, "MSAA Composite Layout", &[global, &msaa_layout]);
                let msaa = FullscreenPipeline {
                    label: &format!("MSAA Composite ({})", mode.label()),
                    module: &msaa_module,
                    entry_point: "fs_main",
                    layout: &msaa_pipeline_layout,
                    targets: &targets,
                    depth_stencil: None,
                    sample_count: mode.sample_count(),
                }
                .build(device);

                let nearest_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Nearest-Depth Composite Source Layout"),
                    entries: &[
                        scene_depth.layout_entry(0),
                        TextureKind::Color.layout_entry(1),
                        TextureKind::Depth.layout_entry(2),
                        sampler,
                    ],
                });
                let nearest_module = fullscreen_shader("Nearest-Depth Composite Shader")
                    .texture(1, 0, "scene_depth", scene_depth)
                    .texture(1, 1, "low_res", TextureKind::Color)
                    .texture(1, 2, "low_res_depth", TextureKind::Depth)
                    .source(shaders::COMPOSITE_NEAREST)
                    .build(device);
                let nearest_pipeline_layout =
                    pipeline_layout(device, "Nearest-Depth Composite Layout", &[global, &nearest_layout]);
                let nearest = FullscreenPipeline {
                    label: &format!("Nearest-Depth Composite ({})", mode.label()),
                    module: &nearest_module,
                    entry_point: "fs_main",
                    layout: &nearest_pipeline_layout,
                    targets: &targets,
                    depth_stencil: None,
                    sample_count: mode.sample_count(),
                }
                .build(device);

                ModePipelines { msaa_layout, msaa, nearest_layout, nearest }
            });

            Self {
                pipelines,
                msaa_sources: TargetBindGroup::default(),
                nearest_sources: TargetBindGroup::default(),
            }
        })
    }
}

impl RenderPass for CompositePass {
    fn name(&self) -> &str {
        "composite"
    }

    fn declare_resources(&self, builder: &mut PassResourceBuilder) {
        builder
            .read(ResourceHandle::SCENE_DEPTH)
            .read(ResourceHandle::LOW_RES_COLOR)
            .read(ResourceHandle::LOW_RES_DEPTH)
            .read(ResourceHandle::LOW_RES_RESOLVED)
            .write(ResourceHandle::SCENE_COLOR);
    }

    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        let targets = ctx.targets;
        let device = ctx.resources.device();
        let sampler = &ctx.resources.samplers.linear_clamp;
        let pipelines = &self.pipelines[targets.msaa_mode];

        self.msaa_sources.refresh(targets.generation(), || {
            BindGroupBuilder::new("MSAA Composite Sources")
                .texture(0, &targets.depth.view)
                .texture(1, &targets.low_res.view)
                .texture(2, &targets.low_res_depth.view)
                .texture(3, &targets.low_res_msaa.view)
                .sampler(4, sampler)
                .build(device, &pipelines.msaa_layout)
        });
        self.nearest_sources.refresh(targets.generation(), || {
            BindGroupBuilder::new("Nearest-Depth Composite Sources")
                .texture(0, &targets.depth.view)
                .texture(1, &targets.low_res.view)
                .texture(2, &targets.low_res_depth.view)
                .sampler(4, sampler)
                .build(device, &pipelines.nearest_layout)
        });
        Ok(())
    }

    fn execute(&mut self, ctx: &mut PassContext) -> Result<()> {
        let Some(strategy) = ctx.plan.composite else {
            return Ok(());
        };

        let targets = ctx.targets;
        let pipelines = &self.pipelines[targets.msaa_mode];
        let (pipeline, sources) = match strategy {
            CompositeStrategy::Msaa => (&pipelines.msaa, self.msaa_sources.get("composite")?),
            CompositeStrategy::NearestDepth => (&pipelines.nearest, self.nearest_sources.get("composite")?),
        };

        let mut pass = begin_render_pass(
            ctx.encoder,
            "Low-Res Composite",
            &[super::color_attachment(&targets.color_msaa.view, wgpu::LoadOp::Load)],
            None,
        );
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, ctx.global_bind_group, &[]);
        pass.set_bind_group(1, sources, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_candidates_filter_bilinearly() {
        let choice = select_nearest_depth(10.0, [10.1, 9.9, 10.2, 10.05], 0.25);
        assert_eq!(choice, NearestDepthChoice::Bilinear);
    }

    #[test]
    fn exact_match_wins_even_when_all_are_close() {
        let choice = select_nearest_depth(10.0, [10.2, 10.1, 10.0, 10.15], 0.25);
        assert_eq!(choice, NearestDepthChoice::Point(2));
    }

    #[test]
    fn several_exact_matches_take_the_first_in_scan_order() {
        let choice = select_nearest_depth(10.0, [10.1, 10.0, 10.0, 10.0], 0.25);
        assert_eq!(choice, NearestDepthChoice::Point(1));
    }

    #[test]
    fn one_far_candidate_switches_to_the_closest() {
        // The particle edge crosses the block: one texel sits on the background
        let choice = select_nearest_depth(10.0, [50.0, 10.2, 10.05, 10.3], 0.25);
        assert_eq!(choice, NearestDepthChoice::Point(2));
    }

    #[test]
    fn ties_keep_scan_order() {
        let choice = select_nearest_depth(10.0, [50.0, 11.0, 9.0, 11.0], 0.25);
        assert_eq!(choice, NearestDepthChoice::Point(1));
    }

    #[test]
    fn difference_equal_to_threshold_is_not_close() {
        let choice = select_nearest_depth(10.0, [10.5, 10.5, 10.5, 10.5], 0.5);
        assert_eq!(choice, NearestDepthChoice::Point(0));
    }

    #[test]
    fn zero_resolved_depth_marks_an_edge() {
        assert!(is_sub_pixel_edge(10.0, 10.0, 0.0, 0.1));
        assert!(!is_sub_pixel_edge(10.0, 10.5, 0.9, 0.1));
        assert!(is_sub_pixel_edge(10.0, 12.0, 0.9, 0.1));
    }

    #[test]
    fn composite_blend_is_premultiplied_over() {
        assert_eq!(COMPOSITE_BLEND.color.src_factor, wgpu::BlendFactor::One);
        assert_eq!(COMPOSITE_BLEND.color.dst_factor, wgpu::BlendFactor::SrcAlpha);
    }
}
