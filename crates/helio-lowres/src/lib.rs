//! Helio LowRes - half-resolution particle rendering over a full-resolution scene
//!
//! Opaque geometry is shaded at full resolution into a multisampled target with
//! cascaded EVSM sun shadows. Particles are rendered into a half-resolution buffer
//! (optionally with 4x the full-res sample count) and upsampled back onto the scene
//! with either an MSAA-aware composite or nearest-depth upsampling.
//!
//! Frame order:
//!
//! - depth prepass, depth bounds, sun shadow cascades
//! - main forward pass and sky
//! - depth downscale, particle render, low-res resolve, composite
//! - box-filter AA resolve, post-process

pub mod capabilities;
pub mod frame;
pub mod graph;
pub mod mesh;
pub mod particles;
pub mod passes;
pub mod postprocess;
pub mod resources;
pub mod scene;
pub mod screenshot;
pub mod settings;
pub mod shaders;
pub mod shadows;

mod camera;
mod renderer;

pub use camera::{Camera, CameraUniform};
pub use capabilities::{GpuCapabilities, SampleLayout, SamplePositionProvider};
pub use frame::FramePlan;
pub use mesh::{DrawCall, GpuMesh, PackedVertex};
pub use postprocess::{PostProcessor, ToneMapBloom};
pub use renderer::{Renderer, RendererConfig};
pub use scene::{Scene, SceneObject};
pub use settings::{FrameSettings, LowResMode, MsaaMode, MsaaModeMap, SunDirectionType};

/// Result type for renderer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during rendering
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Shader error: {0}")]
    Shader(String),

    #[error("WGPU error: {0}")]
    Wgpu(String),

    /// Screenshot readback or encoding failed; rendering is unaffected
    #[error("Screenshot error: {0}")]
    Screenshot(String),
}

impl From<wgpu::Error> for Error {
    fn from(err: wgpu::Error) -> Self {
        Error::Wgpu(err.to_string())
    }
}
