//! Scene content - the opaque geometry drawn by the depth, shadow and main passes
//!
//! Lighting comes entirely from the sun and sky described by `FrameSettings`;
//! the scene only lists meshes and their albedo.

use crate::mesh::GpuMesh;
use crate::passes::resolve::resolve_sample_radius;
use crate::settings::{FrameSettings, EXPOSURE_RANGE_SCALE};
use glam::Vec3;

/// A single opaque object
#[derive(Clone)]
pub struct SceneObject {
    pub mesh: GpuMesh,
    /// Linear diffuse albedo
    pub albedo: [f32; 3],
}

impl SceneObject {
    pub fn new(mesh: GpuMesh) -> Self {
        Self { mesh, albedo: [0.5, 0.5, 0.5] }
    }

    pub fn with_albedo(mut self, albedo: [f32; 3]) -> Self {
        self.albedo = albedo;
        self
    }
}

/// Everything the renderer draws besides particles and sky
#[derive(Clone, Default)]
pub struct Scene {
    pub objects: Vec<SceneObject>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(mut self, object: SceneObject) -> Self {
        self.objects.push(object);
        self
    }

    pub fn add_mesh(self, mesh: GpuMesh, albedo: [f32; 3]) -> Self {
        self.add_object(SceneObject::new(mesh).with_albedo(albedo))
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Sun, sky, material and threshold constants, uploaded once per frame.
///
/// Must match `SceneUniform` in common.wgsl.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneUniform {
    pub sun_direction: [f32; 4],
    pub sun_illuminance: [f32; 4],
    pub sun_luminance: [f32; 4],
    pub sky: [f32; 4],
    pub material: [f32; 4],
    pub thresholds: [f32; 4],
    pub resolve: [f32; 4],
}

impl SceneUniform {
    /// `luminance` and `illuminance` come from the renderer's `SunLuminanceCache`
    pub fn new(settings: &FrameSettings, luminance: Vec3, illuminance: Vec3) -> Self {
        let sun = &settings.sun;
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let (cos_radius, sin_radius) = sun.angular_radius_cos_sin();
        let direction = sun.direction();
        let filter_size = settings.anti_aliasing.filter_size;

        Self {
            sun_direction: [direction.x, direction.y, direction.z, flag(sun.enabled)],
            sun_illuminance: [illuminance.x, illuminance.y, illuminance.z, cos_radius],
            sun_luminance: [luminance.x, luminance.y, luminance.z, sin_radius],
            sky: [sun.ground_albedo.x, sun.ground_albedo.y, sun.ground_albedo.z, sun.turbidity],
            material: [
                settings.material.diffuse_intensity,
                settings.material.roughness,
                settings.material.specular_intensity,
                flag(sun.area_light_approximation),
            ],
            thresholds: [
                settings.low_res.resolve_sub_pixel_threshold,
                settings.low_res.composite_sub_pixel_threshold,
                settings.low_res.nearest_depth_threshold,
                flag(settings.debug.show_msaa_edges),
            ],
            resolve: [filter_size, resolve_sample_radius(filter_size) as f32, EXPOSURE_RANGE_SCALE, 0.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_uniform_is_seven_vec4s() {
        assert_eq!(std::mem::size_of::<SceneUniform>(), 112);
    }

    #[test]
    fn scene_uniform_packs_settings() {
        let mut settings = FrameSettings::default();
        settings.sun.enabled = false;
        settings.anti_aliasing.filter_size = 4.0;
        settings.debug.show_msaa_edges = true;

        let u = SceneUniform::new(&settings, Vec3::splat(2.0), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(u.sun_direction[3], 0.0);
        assert_eq!(&u.sun_illuminance[..3], &[1.0, 2.0, 3.0]);
        assert_eq!(u.sun_luminance[0], 2.0);
        assert_eq!(u.thresholds[3], 1.0);
        assert_eq!(u.resolve[0], 4.0);
        assert_eq!(u.resolve[1], 2.0);
        assert_eq!(u.resolve[2], EXPOSURE_RANGE_SCALE);
    }

    #[test]
    fn sun_radius_terms_are_unit_length() {
        let u = SceneUniform::new(&FrameSettings::default(), Vec3::ONE, Vec3::ONE);
        let (c, s) = (u.sun_illuminance[3], u.sun_luminance[3]);
        assert!((c * c + s * s - 1.0).abs() < 1e-5);
        assert!(c > 0.99);
    }
}
