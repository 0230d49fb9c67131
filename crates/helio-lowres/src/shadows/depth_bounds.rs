//! Visible depth range used to place the shadow cascades
//!
//! The bounds are analytic: the interesting part of the scene is assumed to sit
//! inside a fixed world-space sphere, so no GPU readback is needed.

use glam::Vec3;

use crate::Camera;

/// Center of the sphere that bounds the shadowed scene content
pub const SCENE_BOUNDS_CENTER: Vec3 = Vec3::new(0.0, 2.5, 0.0);

/// Corner vector of the scene box; its length is the sphere radius
pub const SCENE_BOUNDS_EXTENT: Vec3 = Vec3::new(6.0, 6.0, 6.0);

/// Normalized [0, 1] depth range between the camera near and far planes
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthBounds {
    pub min: f32,
    pub max: f32,
}

impl DepthBounds {
    /// Full near..far range
    pub const FULL: Self = Self { min: 0.0, max: 1.0 };

    /// Range covered by a sphere, in normalized linear view depth.
    ///
    /// Falls back to `FULL` when the camera's clip range is degenerate.
    pub fn from_bounding_sphere(camera: &Camera, center: Vec3, radius: f32) -> Self {
        let range = camera.far - camera.near;
        if !(range > f32::EPSILON) {
            return Self::FULL;
        }

        let depth = camera.view_depth(center);
        let near = (depth - radius).max(camera.near);
        let far = (depth + radius).min(camera.far);

        let min = ((near - camera.near) / range).clamp(0.0, 1.0);
        let max = ((far - camera.near) / range).clamp(0.0, 1.0);

        if max - min > 1e-4 && min.is_finite() && max.is_finite() {
            Self { min, max }
        } else {
            // Sphere entirely behind the camera or past the far plane
            Self::FULL
        }
    }

    /// Bounds of the fixed scene sphere
    pub fn for_scene(camera: &Camera) -> Self {
        Self::from_bounding_sphere(camera, SCENE_BOUNDS_CENTER, SCENE_BOUNDS_EXTENT.length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{FAR_CLIP, NEAR_CLIP};

    fn camera_at(position: Vec3, near: f32, far: f32) -> Camera {
        Camera::perspective(position, SCENE_BOUNDS_CENTER, Vec3::Y, 0.8, 1.5, near, far)
    }

    #[test]
    fn sphere_in_front_of_camera_gives_tight_range() {
        let cam = camera_at(Vec3::new(0.0, 2.5, -20.0), NEAR_CLIP, FAR_CLIP);
        let bounds = DepthBounds::for_scene(&cam);
        let r = SCENE_BOUNDS_EXTENT.length();
        let range = FAR_CLIP - NEAR_CLIP;
        assert!((bounds.min - (20.0 - r - NEAR_CLIP) / range).abs() < 1e-4);
        assert!((bounds.max - (20.0 + r - NEAR_CLIP) / range).abs() < 1e-4);
        assert!(bounds.max > bounds.min);
    }

    #[test]
    fn camera_inside_sphere_starts_at_near_plane() {
        let cam = camera_at(Vec3::new(0.0, 2.5, -2.0), NEAR_CLIP, FAR_CLIP);
        let bounds = DepthBounds::for_scene(&cam);
        assert_eq!(bounds.min, 0.0);
        assert!(bounds.max < 1.0);
    }

    #[test]
    fn degenerate_clip_range_falls_back_to_full() {
        let mut cam = camera_at(Vec3::new(0.0, 2.5, -20.0), 1.0, 2.0);
        cam.far = cam.near;
        assert_eq!(DepthBounds::for_scene(&cam), DepthBounds::FULL);
    }
}
