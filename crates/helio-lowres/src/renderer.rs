//! Main renderer implementation

use crate::camera::{Camera, CameraUniform};
use crate::capabilities::{GpuCapabilities, SampleLayoutUniform};
use crate::frame::FramePlan;
use crate::graph::{PassContext, PrepareContext, RenderGraph};
use crate::mesh::DrawCall;
use crate::particles::ParticleSystem;
use crate::passes::post::{post_inputs, SharedPostProcessor};
use crate::passes::{
    CompositePass, DepthDownscalePass, DepthPrepass, DrawList, GeometryPass, LowResResolvePass, ParticlePass,
    PostProcessPass, ResolvePass, ShadowPass, SkyPass,
};
use crate::postprocess::{PostProcessor, ToneMapBloom};
use crate::resources::{BindGroupBuilder, RenderTarget, RenderTargets, ResourceManager, TargetExtents};
use crate::scene::{Scene, SceneUniform};
use crate::settings::{FrameSettings, MsaaModeMap, SunLuminanceCache};
use crate::shadows::{ShadowAtlas, ShadowUniform};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Main renderer configuration
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    pub surface_format: wgpu::TextureFormat,
    pub settings: FrameSettings,
}

impl RendererConfig {
    pub fn new(width: u32, height: u32, surface_format: wgpu::TextureFormat) -> Self {
        Self { width, height, surface_format, settings: FrameSettings::default() }
    }

    pub fn with_settings(mut self, settings: FrameSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Per-mode sample layouts for both position sources
struct SampleLayouts {
    programmable: MsaaModeMap<SampleLayoutUniform>,
    fixed: MsaaModeMap<SampleLayoutUniform>,
}

impl SampleLayouts {
    fn new(capabilities: &GpuCapabilities) -> Result<Self> {
        let programmable = capabilities.sample_layouts(true)?;
        let fixed = capabilities.sample_layouts(false)?;
        Ok(Self {
            programmable: MsaaModeMap::from_fn(|mode| programmable[mode].to_uniform()),
            fixed: MsaaModeMap::from_fn(|mode| fixed[mode].to_uniform()),
        })
    }

    fn select(&self, settings: &FrameSettings) -> &MsaaModeMap<SampleLayoutUniform> {
        if settings.low_res.programmable_sample_points {
            &self.programmable
        } else {
            &self.fixed
        }
    }
}

/// Sanitize `settings` and drop an MSAA mode the adapter cannot run
fn supported_settings(capabilities: &GpuCapabilities, settings: FrameSettings) -> FrameSettings {
    let mut settings = settings.sanitized();
    let requested = settings.anti_aliasing.msaa_mode;
    settings.anti_aliasing.msaa_mode = capabilities.effective_msaa_mode(requested);
    if settings.anti_aliasing.msaa_mode != requested {
        log::warn!(
            "MSAA mode {} is unsupported, using {}",
            requested.label(),
            settings.anti_aliasing.msaa_mode.label()
        );
    }
    settings
}

/// Camera and clock of the last rendered frame, reused by screenshots
#[derive(Clone, Copy)]
struct LastFrame {
    near: f32,
    far: f32,
    time: f32,
}

/// Main renderer
pub struct Renderer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,

    resources: ResourceManager,
    graph: RenderGraph,
    targets: RenderTargets,
    settings: FrameSettings,
    output_format: wgpu::TextureFormat,

    // Uniform buffers
    camera_buffer: wgpu::Buffer,
    scene_buffer: wgpu::Buffer,
    sample_layout_buffer: wgpu::Buffer,
    sample_layouts: SampleLayouts,

    // Bind groups
    global_bind_group: wgpu::BindGroup,
    shadow_bind_group: wgpu::BindGroup,
    _shadow_atlas: Arc<ShadowAtlas>,

    // Draw list (shared with the depth, shadow and geometry passes)
    draw_list: DrawList,
    particles: ParticleSystem,
    sun_cache: SunLuminanceCache,

    // Post-processor (shared with PostProcessPass) and its offscreen copy
    post: SharedPostProcessor,
    capture: Option<RenderTarget>,
    last_frame: Option<LastFrame>,

    // Frame state
    frame_count: u64,
    time: f32,
}

impl Renderer {
    /// Create a renderer with the built-in tone mapping and bloom
    pub fn new(
        adapter: &wgpu::Adapter,
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        config: RendererConfig,
    ) -> Result<Self> {
        Self::with_post_processor(adapter, device, queue, config, |resources, format| {
            let post: Box<dyn PostProcessor> = Box::new(ToneMapBloom::new(resources, format)?);
            Ok(post)
        })
    }

    /// Create a renderer whose final image comes from a custom post-processor
    pub fn with_post_processor(
        adapter: &wgpu::Adapter,
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        config: RendererConfig,
        make_post: impl FnOnce(&ResourceManager, wgpu::TextureFormat) -> Result<Box<dyn PostProcessor>>,
    ) -> Result<Self> {
        log::info!("Creating Helio LowRes renderer");
        log::info!("  Surface format: {:?}", config.surface_format);
        log::info!("  Resolution: {}x{}", config.width, config.height);

        let capabilities = GpuCapabilities::probe(adapter, &device);
        capabilities.check_msaa_modes()?;
        let sample_layouts = SampleLayouts::new(&capabilities)?;

        let settings = supported_settings(&capabilities, config.settings);
        let resources = ResourceManager::new(device.clone(), queue.clone(), capabilities);
        let targets = RenderTargets::new(
            &device,
            TargetExtents::new(config.width, config.height),
            settings.anti_aliasing.msaa_mode,
        )?;

        // ── Uniform buffers ──────────────────────────────────────────────────
        let uniform_buffer = |label: &str, size: usize| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: size as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let camera_buffer = uniform_buffer("Camera Uniform Buffer", std::mem::size_of::<CameraUniform>());
        let scene_buffer = uniform_buffer("Scene Uniform Buffer", std::mem::size_of::<SceneUniform>());
        let sample_layout_buffer = uniform_buffer("Sample Layout Buffer", std::mem::size_of::<SampleLayoutUniform>());

        let global_bind_group = BindGroupBuilder::new("Global Bind Group")
            .buffer(0, &camera_buffer)
            .buffer(1, &scene_buffer)
            .buffer(2, &sample_layout_buffer)
            .build(&device, &resources.bind_group_layouts.global);

        // ── Sun shadows ──────────────────────────────────────────────────────
        let shadow_atlas = Arc::new(ShadowAtlas::new(&device, &resources.capabilities)?);
        let shadow_uniform = Arc::new(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Shadow Uniform Buffer"),
            contents: bytemuck::bytes_of(&ShadowUniform::disabled()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        }));
        let shadow_bind_group = BindGroupBuilder::new("Shadow Bind Group")
            .buffer(0, &shadow_uniform)
            .texture(1, &shadow_atlas.vsm_array_view)
            .sampler(2, &resources.samplers.shadow)
            .build(&device, &resources.bind_group_layouts.shadow);

        // ── Passes, in frame order ───────────────────────────────────────────
        let draw_list: DrawList = Arc::new(Mutex::new(Vec::new()));
        let post: SharedPostProcessor = Arc::new(Mutex::new(make_post(&resources, config.surface_format)?));

        let mut graph = RenderGraph::new();
        graph.add_pass(DepthPrepass::new(&resources, draw_list.clone())?);
        graph.add_pass(ShadowPass::new(&resources, shadow_atlas.clone(), shadow_uniform, draw_list.clone())?);
        graph.add_pass(GeometryPass::new(&resources, draw_list.clone())?);
        graph.add_pass(SkyPass::new(&resources)?);
        graph.add_pass(DepthDownscalePass::new(&resources)?);
        graph.add_pass(ParticlePass::new(&resources)?);
        graph.add_pass(LowResResolvePass::new(&resources)?);
        graph.add_pass(CompositePass::new(&resources)?);
        graph.add_pass(ResolvePass::new(&resources)?);
        graph.add_pass(PostProcessPass::new(post.clone()));

        // Build the render graph
        graph.build()?;

        log::info!("Helio LowRes initialized successfully");

        Ok(Self {
            device,
            queue,
            resources,
            graph,
            targets,
            settings,
            output_format: config.surface_format,
            camera_buffer,
            scene_buffer,
            sample_layout_buffer,
            sample_layouts,
            global_bind_group,
            shadow_bind_group,
            _shadow_atlas: shadow_atlas,
            draw_list,
            particles: ParticleSystem::new(),
            sun_cache: SunLuminanceCache::new(),
            post,
            capture: None,
            last_frame: None,
            frame_count: 0,
            time: 0.0,
        })
    }

    // ── Frame rendering ───────────────────────────────────────────────────────

    /// Render `scene` and the particle cloud into `target`
    pub fn render(&mut self, camera: &Camera, scene: &Scene, target: &wgpu::TextureView, delta_time: f32) -> Result<()> {
        log::trace!("Rendering frame {}", self.frame_count);

        // Settings are frozen for the rest of the frame
        let settings = self.settings.clone();
        self.targets.set_msaa_mode(&self.device, settings.anti_aliasing.msaa_mode)?;
        let mode = self.targets.msaa_mode;

        let luminance = self.sun_cache.luminance(&settings.sun);
        let illuminance = self.sun_cache.illuminance(&settings.sun);
        if !self.sun_cache.was_hit() {
            log::debug!("Sun luminance recomputed: {:?}", luminance);
        }

        self.particles.update(&settings.particles, delta_time, &camera.view);
        let plan = FramePlan::new(&settings, self.particles.count());
        self.time += delta_time;

        // Update global uniforms
        let extents = self.targets.extents;
        let camera_uniform = CameraUniform::new(camera, self.time, extents.width, extents.height);
        self.queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&camera_uniform));
        let scene_uniform = SceneUniform::new(&settings, luminance, illuminance);
        self.queue.write_buffer(&self.scene_buffer, 0, bytemuck::bytes_of(&scene_uniform));
        let sample_layout = &self.sample_layouts.select(&settings)[mode];
        self.queue.write_buffer(&self.sample_layout_buffer, 0, bytemuck::bytes_of(sample_layout));

        {
            let mut draws = self.draw_list.lock();
            draws.clear();
            draws.extend(scene.objects.iter().map(|obj| DrawCall::new(&obj.mesh, obj.albedo)));
        }

        let prepare_ctx = PrepareContext {
            resources: &self.resources,
            targets: &self.targets,
            settings: &settings,
            plan: &plan,
            camera,
            particles: self.particles.particles(),
            time: self.time,
            delta_time,
        };
        self.graph.prepare(&prepare_ctx)?;

        // Execute render graph
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });
        let mut pass_ctx = PassContext {
            encoder: &mut encoder,
            resources: &self.resources,
            targets: &self.targets,
            settings: &settings,
            plan: &plan,
            global_bind_group: &self.global_bind_group,
            shadow_bind_group: &self.shadow_bind_group,
            output: target,
        };
        self.graph.execute(&mut pass_ctx)?;
        self.queue.submit(Some(encoder.finish()));

        self.last_frame = Some(LastFrame { near: camera.near, far: camera.far, time: self.time });
        self.frame_count += 1;
        Ok(())
    }

    /// Write the last frame, tone mapped, to `path` as PNG.
    ///
    /// Post-processing is re-run into an offscreen copy of the presentation
    /// target, so the swapchain image is never read back.
    pub fn capture_screenshot(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let frame = self
            .last_frame
            .ok_or_else(|| Error::Screenshot("no frame has been rendered yet".to_string()))?;

        let extents = self.targets.extents;
        let stale = self
            .capture
            .as_ref()
            .map_or(true, |c| c.width != extents.width || c.height != extents.height);
        if stale {
            self.capture = Some(RenderTarget::new(
                &self.device,
                "Screenshot Capture",
                extents.width,
                extents.height,
                self.output_format,
                1,
                wgpu::TextureUsages::COPY_SRC,
            ));
        }
        let capture = self
            .capture
            .as_ref()
            .ok_or_else(|| Error::Screenshot("capture target unavailable".to_string()))?;

        let inputs = post_inputs(&self.targets, frame.near, frame.far, frame.time);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Screenshot Post-Process Encoder"),
        });
        {
            let mut post = self.post.lock();
            post.prepare(&self.resources, &self.settings.post, &inputs)?;
            post.execute(&mut encoder, &inputs, &capture.view)?;
        }
        self.queue.submit(Some(encoder.finish()));

        crate::screenshot::capture_png(&self.device, &self.queue, &capture.texture, path)
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    pub fn settings(&self) -> &FrameSettings {
        &self.settings
    }

    /// Replace the settings used from the next frame on. Out-of-range values are clamped.
    pub fn set_settings(&mut self, settings: FrameSettings) {
        let settings = supported_settings(&self.resources.capabilities, settings);
        if settings.low_res.programmable_sample_points != self.settings.low_res.programmable_sample_points {
            log::info!(
                "Programmable sample points {}",
                if settings.low_res.programmable_sample_points { "enabled" } else { "disabled" }
            );
        }
        self.settings = settings;
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        log::info!("Resizing renderer to {}x{}", width, height);
        self.targets.resize(&self.device, width, height)?;
        self.capture = None;
        Ok(())
    }

    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.resources.capabilities
    }

    /// Particles drawn in the last frame
    pub fn particle_count(&self) -> u32 {
        self.particles.count()
    }

    /// Pass names in execution order
    pub fn pass_order(&self) -> Vec<&str> {
        self.graph.execution_order()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MsaaMode;

    #[test]
    fn config_defaults_to_default_settings() {
        let config = RendererConfig::new(1280, 720, wgpu::TextureFormat::Bgra8UnormSrgb);
        assert_eq!(config.settings, FrameSettings::default());

        let mut custom = FrameSettings::default();
        custom.low_res.enabled = false;
        let config = config.with_settings(custom.clone());
        assert_eq!(config.settings, custom);
    }

    #[test]
    fn unsupported_msaa_mode_is_replaced() {
        let limited = GpuCapabilities {
            backend: wgpu::Backend::Vulkan,
            float32_filterable: false,
            depth_clip_control: false,
            sample_positions: crate::capabilities::SamplePositionProvider::FixedGrid,
            color_sample_counts: 0b101,
            depth_sample_counts: 0b101,
        };
        let mut requested = FrameSettings::default();
        requested.anti_aliasing.msaa_mode = MsaaMode::X2;
        requested.particles.batches = 1000;

        let settings = supported_settings(&limited, requested);
        assert_eq!(settings.anti_aliasing.msaa_mode, MsaaMode::None);
        assert_eq!(settings.particles.batches, crate::settings::MAX_PARTICLE_BATCHES);
    }
}
