//! Low-resolution particle demo using helio-lowres
//!
//! A particle cloud rotates above a ground plane and a ring of pillars, lit by
//! the sun with cascaded EVSM shadows.
//!
//! Controls:
//!   WASD        - move forward/left/back/right
//!   Space/Shift - move up/down
//!   Mouse drag  - look around (click to grab cursor)
//!   M           - cycle MSAA mode
//!   L           - low-res particles on/off
//!   K           - switch low-res mode (MSAA / nearest depth)
//!   Up/Down     - more/fewer particle batches
//!   E           - highlight MSAA composite edges
//!   O           - toggle sort
//!   V           - toggle vsync
//!   F12         - save a screenshot
//!   Escape      - release cursor / exit

use helio_lowres::{Camera, GpuCapabilities, GpuMesh, LowResMode, MsaaMode, Renderer, RendererConfig, Scene};
use std::collections::HashSet;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{CursorGrabMode, Window, WindowId},
};

fn main() {
    env_logger::init();
    log::info!("Starting Helio LowRes particle demo");

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let mut app = App { state: None };

    event_loop.run_app(&mut app).expect("Event loop error");
}

struct App {
    state: Option<AppState>,
}

struct AppState {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    surface_config: wgpu::SurfaceConfiguration,
    renderer: Renderer,
    scene: Scene,
    last_frame: std::time::Instant,
    screenshot_index: u32,

    // Free-camera state
    cam_pos: glam::Vec3,
    cam_yaw: f32,
    cam_pitch: f32,
    keys: HashSet<KeyCode>,
    cursor_grabbed: bool,
    mouse_delta: (f32, f32),
}

/// Ground plane plus a ring of pillars around the particle emitter
fn build_scene(device: &wgpu::Device) -> Scene {
    let mut scene = Scene::new().add_mesh(GpuMesh::plane(device, [0.0, 0.0, 0.0], 12.0), [0.45, 0.45, 0.42]);

    const PILLARS: usize = 8;
    for i in 0..PILLARS {
        let angle = i as f32 / PILLARS as f32 * std::f32::consts::TAU;
        let height = 1.5 + (i % 3) as f32 * 0.75;
        let center = [angle.cos() * 5.0, height, angle.sin() * 5.0];
        scene = scene.add_mesh(GpuMesh::cuboid(device, center, [0.4, height, 0.4]), [0.6, 0.55, 0.5]);
    }
    scene.add_mesh(GpuMesh::cube(device, [0.0, 0.35, 0.0], 0.35), [0.7, 0.3, 0.25])
}

fn present_mode(vsync: bool) -> wgpu::PresentMode {
    if vsync {
        wgpu::PresentMode::AutoVsync
    } else {
        wgpu::PresentMode::AutoNoVsync
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        let window = Arc::new(
            event_loop
                .create_window(
                    Window::default_attributes()
                        .with_title("Helio LowRes - Half-Resolution Particles")
                        .with_inner_size(winit::dpi::LogicalSize::new(1280u32, 720u32)),
                )
                .expect("Failed to create window"),
        );

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone()).expect("Failed to create surface");

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .expect("Failed to find adapter");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Main Device"),
                required_features: GpuCapabilities::required_features(&adapter),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .expect("Failed to create device");

        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let size = window.inner_size();
        let config = RendererConfig::new(size.width, size.height, surface_format);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: present_mode(config.settings.debug.enable_vsync),
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let renderer =
            Renderer::new(&adapter, device.clone(), queue.clone(), config).expect("Failed to create renderer");
        let scene = build_scene(&device);

        self.state = Some(AppState {
            window,
            surface,
            device,
            surface_config,
            renderer,
            scene,
            last_frame: std::time::Instant::now(),
            screenshot_index: 0,
            cam_pos: glam::Vec3::new(0.0, 3.0, 9.0),
            cam_yaw: 0.0,
            cam_pitch: -0.15,
            keys: HashSet::new(),
            cursor_grabbed: false,
            mouse_delta: (0.0, 0.0),
        });
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else { return };

        match event {
            // ── Exit ──────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Shutting down");
                event_loop.exit();
            }
            WindowEvent::KeyboardInput {
                event: KeyEvent {
                    state: ElementState::Pressed,
                    physical_key: PhysicalKey::Code(KeyCode::Escape),
                    ..
                },
                ..
            } => {
                if state.cursor_grabbed {
                    state.cursor_grabbed = false;
                    let _ = state.window.set_cursor_grab(CursorGrabMode::None);
                    state.window.set_cursor_visible(true);
                } else {
                    event_loop.exit();
                }
            }

            // ── Keyboard ──────────────────────────────────────────────────────
            WindowEvent::KeyboardInput {
                event: KeyEvent { state: ks, physical_key: PhysicalKey::Code(key), repeat, .. },
                ..
            } => match ks {
                ElementState::Pressed => {
                    if !repeat {
                        state.handle_toggle(key);
                    }
                    state.keys.insert(key);
                }
                ElementState::Released => {
                    state.keys.remove(&key);
                }
            },

            // ── Mouse button - grab cursor on click ───────────────────────────
            WindowEvent::MouseInput { state: ElementState::Pressed, button: MouseButton::Left, .. } => {
                if !state.cursor_grabbed {
                    let grabbed = state
                        .window
                        .set_cursor_grab(CursorGrabMode::Confined)
                        .or_else(|_| state.window.set_cursor_grab(CursorGrabMode::Locked))
                        .is_ok();
                    if grabbed {
                        state.window.set_cursor_visible(false);
                        state.cursor_grabbed = true;
                    }
                }
            }

            // ── Window resize ─────────────────────────────────────────────────
            WindowEvent::Resized(size) if size.width > 0 && size.height > 0 => {
                state.surface_config.width = size.width;
                state.surface_config.height = size.height;
                state.surface.configure(&state.device, &state.surface_config);
                if let Err(e) = state.renderer.resize(size.width, size.height) {
                    log::error!("Resize failed: {}", e);
                    event_loop.exit();
                }
            }

            WindowEvent::RedrawRequested => {
                let now = std::time::Instant::now();
                let dt = (now - state.last_frame).as_secs_f32();
                state.last_frame = now;
                state.render(dt);
                state.window.request_redraw();
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _id: winit::event::DeviceId, event: DeviceEvent) {
        let Some(state) = &mut self.state else { return };
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            if state.cursor_grabbed {
                state.mouse_delta.0 += dx as f32;
                state.mouse_delta.1 += dy as f32;
            }
        }
    }

    fn about_to_wait(&mut self, _: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

impl AppState {
    /// Settings changes bound to single key presses
    fn handle_toggle(&mut self, key: KeyCode) {
        let mut settings = self.renderer.settings().clone();

        match key {
            KeyCode::KeyM => {
                let modes = MsaaMode::ALL;
                let current = modes.iter().position(|&m| m == settings.anti_aliasing.msaa_mode).unwrap_or(0);
                settings.anti_aliasing.msaa_mode = modes[(current + 1) % modes.len()];
                log::info!("MSAA: {}", settings.anti_aliasing.msaa_mode.label());
            }
            KeyCode::KeyL => {
                settings.low_res.enabled = !settings.low_res.enabled;
                log::info!("Low-res particles: {}", settings.low_res.enabled);
            }
            KeyCode::KeyK => {
                settings.low_res.mode = match settings.low_res.mode {
                    LowResMode::Msaa => LowResMode::NearestDepth,
                    LowResMode::NearestDepth => LowResMode::Msaa,
                };
                log::info!("Low-res mode: {:?}", settings.low_res.mode);
            }
            KeyCode::ArrowUp => settings.particles.batches += 1,
            KeyCode::ArrowDown => settings.particles.batches = settings.particles.batches.saturating_sub(1),
            KeyCode::KeyE => settings.debug.show_msaa_edges = !settings.debug.show_msaa_edges,
            KeyCode::KeyO => settings.particles.sort = !settings.particles.sort,
            KeyCode::KeyV => {
                settings.debug.enable_vsync = !settings.debug.enable_vsync;
                self.surface_config.present_mode = present_mode(settings.debug.enable_vsync);
                self.surface.configure(&self.device, &self.surface_config);
            }
            KeyCode::F12 => {
                let path = format!("lowres_screenshot_{:03}.png", self.screenshot_index);
                self.screenshot_index += 1;
                if let Err(e) = self.renderer.capture_screenshot(&path) {
                    log::warn!("{}", e);
                }
                return;
            }
            _ => return,
        }

        self.renderer.set_settings(settings);
        if matches!(key, KeyCode::ArrowUp | KeyCode::ArrowDown) {
            log::info!("Particle batches: {}", self.renderer.settings().particles.batches);
        }
    }

    fn render(&mut self, dt: f32) {
        // ── Camera movement ────────────────────────────────────────────────────
        const SPEED: f32 = 5.0;
        const LOOK_SENS: f32 = 0.002;

        self.cam_yaw += self.mouse_delta.0 * LOOK_SENS;
        self.cam_pitch = (self.cam_pitch + self.mouse_delta.1 * LOOK_SENS).clamp(-1.5, 1.5);
        self.mouse_delta = (0.0, 0.0);

        // yaw=0 looks down -Z
        let (sy, cy) = self.cam_yaw.sin_cos();
        let (sp, cp) = self.cam_pitch.sin_cos();
        let forward = glam::Vec3::new(sy * cp, sp, -cy * cp);
        let right = glam::Vec3::new(cy, 0.0, sy);
        let up = glam::Vec3::Y;

        if self.keys.contains(&KeyCode::KeyW) { self.cam_pos += forward * SPEED * dt; }
        if self.keys.contains(&KeyCode::KeyS) { self.cam_pos -= forward * SPEED * dt; }
        if self.keys.contains(&KeyCode::KeyA) { self.cam_pos -= right * SPEED * dt; }
        if self.keys.contains(&KeyCode::KeyD) { self.cam_pos += right * SPEED * dt; }
        if self.keys.contains(&KeyCode::Space) { self.cam_pos += up * SPEED * dt; }
        if self.keys.contains(&KeyCode::ShiftLeft) { self.cam_pos -= up * SPEED * dt; }

        let size = self.window.inner_size();
        let aspect = size.width as f32 / size.height.max(1) as f32;
        let camera = Camera::perspective(
            self.cam_pos,
            self.cam_pos + forward,
            glam::Vec3::Y,
            std::f32::consts::FRAC_PI_4,
            aspect,
            0.1,
            100.0,
        );

        // ── Acquire surface ────────────────────────────────────────────────────
        let output = match self.surface.get_current_texture() {
            Ok(t) => t,
            Err(e) => {
                log::warn!("Surface error: {:?}", e);
                return;
            }
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        if let Err(e) = self.renderer.render(&camera, &self.scene, &view, dt) {
            log::error!("Render error: {}", e);
        }

        output.present();
    }
}
