//! WGSL sources and shader module assembly
//!
//! Pipelines that differ only in sample count share one source. `ShaderBuilder`
//! prepends constant declarations and, for every render-target input, a binding
//! of the right texture type plus a `load_<name>(pixel, sample)` accessor, so the
//! shader body reads single-sample and multisampled targets the same way.

use crate::resources::texture_entry;

pub const COMMON: &str = include_str!("../../shaders/common/common.wgsl");
pub const FULLSCREEN: &str = include_str!("../../shaders/common/fullscreen.wgsl");
pub const SHADOW_SAMPLING: &str = include_str!("../../shaders/common/shadow_sampling.wgsl");

pub const DEPTH_ONLY: &str = include_str!("../../shaders/passes/depth_only.wgsl");
pub const MESH: &str = include_str!("../../shaders/passes/mesh.wgsl");
pub const SKY: &str = include_str!("../../shaders/passes/sky.wgsl");
pub const PARTICLES: &str = include_str!("../../shaders/passes/particles.wgsl");
pub const EVSM: &str = include_str!("../../shaders/passes/evsm.wgsl");
pub const EVSM_CONVERT: &str = include_str!("../../shaders/passes/evsm_convert.wgsl");
pub const EVSM_BLUR: &str = include_str!("../../shaders/passes/evsm_blur.wgsl");
pub const MIP_DOWNSAMPLE: &str = include_str!("../../shaders/passes/mip_downsample.wgsl");
pub const DEPTH_DOWNSCALE: &str = include_str!("../../shaders/passes/depth_downscale.wgsl");
pub const LOWRES_RESOLVE: &str = include_str!("../../shaders/passes/lowres_resolve.wgsl");
pub const COMPOSITE_MSAA: &str = include_str!("../../shaders/passes/composite_msaa.wgsl");
pub const COMPOSITE_NEAREST: &str = include_str!("../../shaders/passes/composite_nearest.wgsl");
pub const RESOLVE: &str = include_str!("../../shaders/passes/resolve.wgsl");
pub const POSTPROCESS: &str = include_str!("../../shaders/passes/postprocess.wgsl");

/// How a render target is exposed to a shader
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureKind {
    Color,
    ColorMultisampled,
    Depth,
    DepthMultisampled,
}

impl TextureKind {
    pub fn color(sample_count: u32) -> Self {
        if sample_count > 1 { Self::ColorMultisampled } else { Self::Color }
    }

    pub fn depth(sample_count: u32) -> Self {
        if sample_count > 1 { Self::DepthMultisampled } else { Self::Depth }
    }

    pub fn is_multisampled(self) -> bool {
        matches!(self, Self::ColorMultisampled | Self::DepthMultisampled)
    }

    fn wgsl_type(self) -> &'static str {
        match self {
            Self::Color => "texture_2d<f32>",
            Self::ColorMultisampled => "texture_multisampled_2d<f32>",
            Self::Depth => "texture_depth_2d",
            Self::DepthMultisampled => "texture_depth_multisampled_2d",
        }
    }

    fn value_type(self) -> &'static str {
        match self {
            Self::Color | Self::ColorMultisampled => "vec4<f32>",
            Self::Depth | Self::DepthMultisampled => "f32",
        }
    }

    /// Matching fragment-visible layout entry
    pub fn layout_entry(self, binding: u32) -> wgpu::BindGroupLayoutEntry {
        let sample_type = match self {
            Self::Color | Self::ColorMultisampled => wgpu::TextureSampleType::Float { filterable: true },
            Self::Depth | Self::DepthMultisampled => wgpu::TextureSampleType::Depth,
        };
        texture_entry(binding, sample_type, self.is_multisampled())
    }
}

struct TextureDecl {
    group: u32,
    binding: u32,
    name: &'static str,
    kind: TextureKind,
}

/// Assembles a shader module from constants, texture preludes and sources
pub struct ShaderBuilder {
    label: String,
    defines: Vec<(&'static str, u32)>,
    textures: Vec<TextureDecl>,
    sources: Vec<&'static str>,
}

impl ShaderBuilder {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            defines: Vec::new(),
            textures: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Declare `const NAME: u32`
    pub fn define(mut self, name: &'static str, value: u32) -> Self {
        self.defines.push((name, value));
        self
    }

    /// Declare a render-target input and its `load_<name>` accessor
    pub fn texture(mut self, group: u32, binding: u32, name: &'static str, kind: TextureKind) -> Self {
        self.textures.push(TextureDecl { group, binding, name, kind });
        self
    }

    pub fn source(mut self, source: &'static str) -> Self {
        self.sources.push(source);
        self
    }

    /// Final WGSL text
    pub fn compose(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.defines {
            out.push_str(&format!("const {}: u32 = {}u;\n", name, value));
        }
        for tex in &self.textures {
            out.push_str(&format!(
                "@group({}) @binding({}) var {}: {};\n",
                tex.group,
                tex.binding,
                tex.name,
                tex.kind.wgsl_type()
            ));
            let sample = if tex.kind.is_multisampled() { "s" } else { "0" };
            out.push_str(&format!(
                "fn load_{}(p: vec2<i32>, s: i32) -> {} {{ return textureLoad({}, p, {}); }}\n",
                tex.name,
                tex.kind.value_type(),
                tex.name,
                sample
            ));
        }
        for source in &self.sources {
            out.push('\n');
            out.push_str(source);
        }
        out
    }

    pub fn build(&self, device: &wgpu::Device) -> wgpu::ShaderModule {
        log::debug!("Compiling shader '{}'", self.label);
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&self.label),
            source: wgpu::ShaderSource::Wgsl(self.compose().into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multisampled_inputs_load_the_requested_sample() {
        let src = ShaderBuilder::new("test")
            .define("SOURCE_SAMPLES", 4)
            .texture(1, 0, "scene_depth", TextureKind::depth(4))
            .texture(1, 1, "low_res", TextureKind::color(1))
            .compose();

        assert!(src.contains("const SOURCE_SAMPLES: u32 = 4u;"));
        assert!(src.contains("@group(1) @binding(0) var scene_depth: texture_depth_multisampled_2d;"));
        assert!(src.contains("fn load_scene_depth(p: vec2<i32>, s: i32) -> f32 { return textureLoad(scene_depth, p, s); }"));
        assert!(src.contains("var low_res: texture_2d<f32>;"));
        assert!(src.contains("return textureLoad(low_res, p, 0);"));
    }

    #[test]
    fn sources_follow_the_prelude_in_order() {
        let src = ShaderBuilder::new("test").define("A", 1).source(COMMON).source(FULLSCREEN).compose();
        let define = src.find("const A").unwrap();
        let common = src.find("struct CameraUniform").unwrap();
        let fullscreen = src.find("fn vs_fullscreen").unwrap();
        assert!(define < common && common < fullscreen);
    }

    #[test]
    fn kinds_follow_sample_count() {
        assert_eq!(TextureKind::color(1), TextureKind::Color);
        assert_eq!(TextureKind::color(8), TextureKind::ColorMultisampled);
        assert_eq!(TextureKind::depth(2), TextureKind::DepthMultisampled);
        assert!(!TextureKind::depth(1).is_multisampled());
    }
}
