//! Depth prepass - lays down full-res scene depth before shadows and shading

use super::{build_validated, pipeline_layout, DrawList};
use crate::capabilities::DEPTH_FORMAT;
use crate::graph::{begin_render_pass, PassContext, PassResourceBuilder, PrepareContext, RenderPass, ResourceHandle};
use crate::mesh::{DrawCall, PackedVertex};
use crate::resources::{BindGroupBuilder, ResourceManager, UniformSlots};
use crate::settings::MsaaModeMap;
use crate::shaders::{self, ShaderBuilder};
use crate::Result;

/// Matrix consumed by depth_only.wgsl - one slot per view rendered in a frame
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DepthTransform {
    pub view_proj: glam::Mat4,
}

/// Vertex-only depth pipeline shared with the shadow cascades
pub(crate) fn depth_only_pipeline(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    sample_count: u32,
    depth_compare: wgpu::CompareFunction,
    unclipped_depth: bool,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        cache: None,
        vertex: wgpu::VertexState {
            module,
            entry_point: "vs_main",
            buffers: &[PackedVertex::layout()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: None,
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: Some(wgpu::Face::Back),
            unclipped_depth,
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: sample_count,
            ..Default::default()
        },
        multiview: None,
    })
}

pub(crate) fn draw_meshes(pass: &mut wgpu::RenderPass<'_>, draws: &[DrawCall]) {
    for dc in draws {
        pass.set_vertex_buffer(0, dc.vertex_buffer.slice(..));
        pass.set_index_buffer(dc.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..dc.index_count, 0, 0..1);
    }
}

pub struct DepthPrepass {
    pipelines: MsaaModeMap<wgpu::RenderPipeline>,
    transform: UniformSlots<DepthTransform>,
    bind_group: wgpu::BindGroup,
    draw_list: DrawList,
}

impl DepthPrepass {
    pub fn new(resources: &ResourceManager, draw_list: DrawList) -> Result<Self> {
        let device = resources.device();
        let dynamic = &resources.bind_group_layouts.dynamic;

        build_validated(device, "depth prepass", || {
            let module = ShaderBuilder::new("Depth Only Shader").source(shaders::DEPTH_ONLY).build(device);
            let layout = pipeline_layout(device, "Depth Prepass Layout", &[dynamic]);
            let pipelines = resources.per_msaa_mode(|mode| {
                depth_only_pipeline(
                    device,
                    &format!("Depth Prepass ({})", mode.label()),
                    &module,
                    &layout,
                    mode.sample_count(),
                    wgpu::CompareFunction::Less,
                    false,
                )
            });

            let transform = UniformSlots::new(device, "Depth Prepass Transform", 1);
            let bind_group = BindGroupBuilder::new("Depth Prepass Transform")
                .resource(0, transform.binding())
                .build(device, dynamic);

            Self { pipelines, transform, bind_group, draw_list }
        })
    }
}

impl RenderPass for DepthPrepass {
    fn name(&self) -> &str {
        "depth_prepass"
    }

    fn declare_resources(&self, builder: &mut PassResourceBuilder) {
        builder.write(ResourceHandle::SCENE_DEPTH);
    }

    fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        let transform = DepthTransform { view_proj: ctx.camera.view_proj() };
        self.transform.write(ctx.resources.queue(), 0, &transform);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut PassContext) -> Result<()> {
        let draws: Vec<DrawCall> = self.draw_list.lock().clone();

        // Always clear, the sky relies on untouched texels sitting at 1.0
        let mut pass = begin_render_pass(
            ctx.encoder,
            "Depth Prepass",
            &[],
            Some(wgpu::RenderPassDepthStencilAttachment {
                view: &ctx.targets.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
        );

        if draws.is_empty() {
            return Ok(());
        }

        pass.set_pipeline(&self.pipelines[ctx.targets.msaa_mode]);
        pass.set_bind_group(0, &self.bind_group, &[self.transform.offset(0)]);
        draw_meshes(&mut pass, &draws);
        Ok(())
    }
}
