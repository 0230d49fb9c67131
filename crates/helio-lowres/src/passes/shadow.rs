//! Sun shadow pass - fills the cascaded EVSM atlas
//!
//! Per cascade: depth render into the shared multisampled depth target, EVSM
//! conversion into the cascade's atlas layer, then an optional separable blur
//! through the scratch target. Once every layer is written the mip chains are
//! rebuilt so the lit passes can filter with anisotropy.

use std::sync::Arc;

use super::depth_prepass::{depth_only_pipeline, draw_meshes, DepthTransform};
use super::{build_validated, color_attachment, fullscreen_shader, opaque_target, pipeline_layout, DrawList, FullscreenPipeline};
use crate::graph::{begin_render_pass, PassContext, PassResourceBuilder, PrepareContext, RenderPass, ResourceHandle};
use crate::mesh::DrawCall;
use crate::resources::{sampler_entry, texture_entry, BindGroupBuilder, ResourceManager, UniformSlots};
use crate::shaders::{self, ShaderBuilder, TextureKind};
use crate::shadows::cascades::fit_cascades;
use crate::shadows::evsm::EvsmUniform;
use crate::shadows::{
    BlurParams, DepthBounds, ShadowAtlas, ShadowUniform, NUM_CASCADES, SHADOW_FILTER_SIZE, SHADOW_MAP_SIZE,
    SHADOW_MSAA_SAMPLES,
};
use crate::Result;

/// EVSM constant slots: one for the conversion, then H and V per cascade
const EVSM_SLOTS: u32 = 1 + 2 * NUM_CASCADES as u32;

fn blur_slot(cascade: usize, vertical: bool) -> u32 {
    1 + 2 * cascade as u32 + vertical as u32
}

pub struct ShadowPass {
    atlas: Arc<ShadowAtlas>,
    shadow_uniform: Arc<wgpu::Buffer>,
    draw_list: DrawList,

    depth_pipeline: wgpu::RenderPipeline,
    convert_pipeline: wgpu::RenderPipeline,
    blur_pipeline: wgpu::RenderPipeline,
    mip_pipeline: wgpu::RenderPipeline,

    cascade_transforms: UniformSlots<DepthTransform>,
    cascade_bind_group: wgpu::BindGroup,
    evsm_constants: UniformSlots<EvsmUniform>,
    evsm_bind_group: wgpu::BindGroup,

    /// Group 1 of the conversion: the cascade depth target
    depth_source: wgpu::BindGroup,
    /// Group 1 of the horizontal blur, one per layer
    layer_sources: Vec<wgpu::BindGroup>,
    /// Group 1 of the vertical blur
    temp_source: wgpu::BindGroup,
    /// `[layer][mip - 1]` sources of the mip downsample
    mip_sources: Vec<Vec<wgpu::BindGroup>>,

    blur: [Option<BlurParams>; NUM_CASCADES],
}

impl ShadowPass {
    pub fn new(
        resources: &ResourceManager,
        atlas: Arc<ShadowAtlas>,
        shadow_uniform: Arc<wgpu::Buffer>,
        draw_list: DrawList,
    ) -> Result<Self> {
        let device = resources.device();
        let dynamic = &resources.bind_group_layouts.dynamic;
        let unclipped = resources.capabilities.depth_clip_control;

        build_validated(device, "shadow pass", || {
            // Cascade depth
            let depth_module = ShaderBuilder::new("Shadow Depth Shader").source(shaders::DEPTH_ONLY).build(device);
            let depth_layout = pipeline_layout(device, "Shadow Depth Layout", &[dynamic]);
            let depth_pipeline = depth_only_pipeline(
                device,
                "Shadow Depth",
                &depth_module,
                &depth_layout,
                SHADOW_MSAA_SAMPLES,
                wgpu::CompareFunction::Less,
                unclipped,
            );

            // EVSM conversion and blur
            let source_kind = TextureKind::depth(SHADOW_MSAA_SAMPLES);
            let depth_source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("EVSM Convert Source Layout"),
                entries: &[source_kind.layout_entry(0)],
            });
            let layer_source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("EVSM Blur Source Layout"),
                entries: &[TextureKind::Color.layout_entry(0)],
            });

            let convert_module = fullscreen_shader("EVSM Convert Shader")
                .define("SOURCE_SAMPLES", SHADOW_MSAA_SAMPLES)
                .texture(1, 0, "source", source_kind)
                .source(shaders::EVSM)
                .source(shaders::EVSM_CONVERT)
                .build(device);
            let blur_module = fullscreen_shader("EVSM Blur Shader")
                .texture(1, 0, "source", TextureKind::Color)
                .source(shaders::EVSM)
                .source(shaders::EVSM_BLUR)
                .build(device);

            let targets = [opaque_target(atlas.format)];
            let convert_layout = pipeline_layout(device, "EVSM Convert Layout", &[dynamic, &depth_source_layout]);
            let convert_pipeline = FullscreenPipeline {
                label: "EVSM Convert",
                module: &convert_module,
                entry_point: "fs_main",
                layout: &convert_layout,
                targets: &targets,
                depth_stencil: None,
                sample_count: 1,
            }
            .build(device);
            let blur_layout = pipeline_layout(device, "EVSM Blur Layout", &[dynamic, &layer_source_layout]);
            let blur_pipeline = FullscreenPipeline {
                label: "EVSM Blur",
                module: &blur_module,
                entry_point: "fs_main",
                layout: &blur_layout,
                targets: &targets,
                depth_stencil: None,
                sample_count: 1,
            }
            .build(device);

            // Mip chain
            let mip_source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("VSM Mip Source Layout"),
                entries: &[
                    texture_entry(0, wgpu::TextureSampleType::Float { filterable: true }, false),
                    sampler_entry(1, wgpu::SamplerBindingType::Filtering),
                ],
            });
            let mip_module = fullscreen_shader("VSM Mip Shader").source(shaders::MIP_DOWNSAMPLE).build(device);
            let mip_layout = pipeline_layout(device, "VSM Mip Layout", &[&mip_source_layout]);
            let mip_pipeline = FullscreenPipeline {
                label: "VSM Mip Downsample",
                module: &mip_module,
                entry_point: "fs_main",
                layout: &mip_layout,
                targets: &targets,
                depth_stencil: None,
                sample_count: 1,
            }
            .build(device);

            // Constants
            let cascade_transforms = UniformSlots::new(device, "Shadow Cascade Transforms", NUM_CASCADES as u32);
            let cascade_bind_group = BindGroupBuilder::new("Shadow Cascade Transforms")
                .resource(0, cascade_transforms.binding())
                .build(device, dynamic);
            let evsm_constants = UniformSlots::new(device, "EVSM Constants", EVSM_SLOTS);
            let evsm_bind_group = BindGroupBuilder::new("EVSM Constants")
                .resource(0, evsm_constants.binding())
                .build(device, dynamic);

            // Sources
            let depth_source = BindGroupBuilder::new("EVSM Convert Source")
                .texture(0, &atlas.depth_view)
                .build(device, &depth_source_layout);
            let layer_sources = (0..NUM_CASCADES)
                .map(|i| {
                    BindGroupBuilder::new(format!("EVSM Blur Source {i}"))
                        .texture(0, atlas.layer_view(i))
                        .build(device, &layer_source_layout)
                })
                .collect();
            let temp_source = BindGroupBuilder::new("EVSM Blur Temp Source")
                .texture(0, &atlas.temp_view)
                .build(device, &layer_source_layout);
            let mip_sources = atlas
                .vsm_mip_views
                .iter()
                .map(|mips| {
                    mips.iter()
                        .take(mips.len().saturating_sub(1))
                        .map(|view| {
                            BindGroupBuilder::new("VSM Mip Source")
                                .texture(0, view)
                                .sampler(1, &resources.samplers.linear_clamp)
                                .build(device, &mip_source_layout)
                        })
                        .collect()
                })
                .collect();

            evsm_constants.write(resources.queue(), 0, &EvsmUniform::convert(atlas.exponents, SHADOW_MAP_SIZE));

            Self {
                atlas,
                shadow_uniform,
                draw_list,
                depth_pipeline,
                convert_pipeline,
                blur_pipeline,
                mip_pipeline,
                cascade_transforms,
                cascade_bind_group,
                evsm_constants,
                evsm_bind_group,
                depth_source,
                layer_sources,
                temp_source,
                mip_sources,
                blur: [None; NUM_CASCADES],
            }
        })
    }

    fn fullscreen(
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        target: &wgpu::TextureView,
        pipeline: &wgpu::RenderPipeline,
        constants: Option<(&wgpu::BindGroup, u32)>,
        source: &wgpu::BindGroup,
    ) {
        let mut pass = begin_render_pass(
            encoder,
            label,
            &[color_attachment(target, wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT))],
            None,
        );
        pass.set_pipeline(pipeline);
        let source_group = match constants {
            Some((group, offset)) => {
                pass.set_bind_group(0, group, &[offset]);
                1
            }
            None => 0,
        };
        pass.set_bind_group(source_group, source, &[]);
        pass.draw(0..3, 0..1);
    }
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &str {
        "shadow"
    }

    fn declare_resources(&self, builder: &mut PassResourceBuilder) {
        builder.write(ResourceHandle::SHADOW_VSM);
    }

    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        let queue = ctx.resources.queue();

        if !ctx.plan.shadows {
            queue.write_buffer(&self.shadow_uniform, 0, bytemuck::bytes_of(&ShadowUniform::disabled()));
            return Ok(());
        }

        let bounds = DepthBounds::for_scene(ctx.camera);
        let set = fit_cascades(
            ctx.camera,
            ctx.settings.sun.direction(),
            bounds,
            NUM_CASCADES,
            SHADOW_MAP_SIZE,
            SHADOW_FILTER_SIZE,
        );

        let uniform = ShadowUniform::new(&set, self.atlas.exponents, true);
        queue.write_buffer(&self.shadow_uniform, 0, bytemuck::bytes_of(&uniform));

        for (i, cascade) in set.cascades.iter().enumerate() {
            self.cascade_transforms.write(queue, i as u32, &DepthTransform { view_proj: cascade.view_proj });

            self.blur[i] = BlurParams::for_cascade(cascade.scale, SHADOW_FILTER_SIZE);
            if let Some(blur) = &self.blur[i] {
                let exps = self.atlas.exponents;
                let h = EvsmUniform::blur(exps, SHADOW_MAP_SIZE, &blur.horizontal, [1.0, 0.0]);
                let v = EvsmUniform::blur(exps, SHADOW_MAP_SIZE, &blur.vertical, [0.0, 1.0]);
                self.evsm_constants.write(queue, blur_slot(i, false), &h);
                self.evsm_constants.write(queue, blur_slot(i, true), &v);
            }
        }

        log::trace!(
            "Shadow cascades: bounds {:.3}..{:.3}, splits {:?}",
            bounds.min,
            bounds.max,
            set.cascades.iter().map(|c| c.split_view_depth).collect::<Vec<_>>()
        );
        Ok(())
    }

    fn execute(&mut self, ctx: &mut PassContext) -> Result<()> {
        if !ctx.plan.shadows {
            return Ok(());
        }

        let draws: Vec<DrawCall> = self.draw_list.lock().clone();
        let atlas = &self.atlas;
        let convert_offset = self.evsm_constants.offset(0);

        for cascade in 0..NUM_CASCADES {
            {
                let mut pass = begin_render_pass(
                    ctx.encoder,
                    "Shadow Cascade Depth",
                    &[],
                    Some(wgpu::RenderPassDepthStencilAttachment {
                        view: &atlas.depth_view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }),
                );
                if !draws.is_empty() {
                    pass.set_pipeline(&self.depth_pipeline);
                    pass.set_bind_group(0, &self.cascade_bind_group, &[self.cascade_transforms.offset(cascade as u32)]);
                    draw_meshes(&mut pass, &draws);
                }
            }

            Self::fullscreen(
                ctx.encoder,
                "EVSM Convert",
                atlas.layer_view(cascade),
                &self.convert_pipeline,
                Some((&self.evsm_bind_group, convert_offset)),
                &self.depth_source,
            );

            if self.blur[cascade].is_some() {
                let h = self.evsm_constants.offset(blur_slot(cascade, false));
                let v = self.evsm_constants.offset(blur_slot(cascade, true));
                Self::fullscreen(
                    ctx.encoder,
                    "EVSM Blur H",
                    &atlas.temp_view,
                    &self.blur_pipeline,
                    Some((&self.evsm_bind_group, h)),
                    &self.layer_sources[cascade],
                );
                Self::fullscreen(
                    ctx.encoder,
                    "EVSM Blur V",
                    atlas.layer_view(cascade),
                    &self.blur_pipeline,
                    Some((&self.evsm_bind_group, v)),
                    &self.temp_source,
                );
            }
        }

        for (layer, sources) in self.mip_sources.iter().enumerate() {
            for (i, source) in sources.iter().enumerate() {
                Self::fullscreen(
                    ctx.encoder,
                    "VSM Mip Downsample",
                    &atlas.vsm_mip_views[layer][i + 1],
                    &self.mip_pipeline,
                    None,
                    source,
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evsm_slots_do_not_overlap() {
        let mut slots: Vec<u32> = (0..NUM_CASCADES)
            .flat_map(|c| [blur_slot(c, false), blur_slot(c, true)])
            .collect();
        slots.push(0);
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len() as u32, EVSM_SLOTS);
        assert_eq!(*slots.last().unwrap(), EVSM_SLOTS - 1);
    }
}
