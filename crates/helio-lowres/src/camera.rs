//! Camera utilities

use glam::{Mat4, Vec3, Vec4};

/// Default clip planes of the scene camera
pub const NEAR_CLIP: f32 = 0.01;
pub const FAR_CLIP: f32 = 100.0;

/// Right-handed perspective camera with [0, 1] clip depth
#[derive(Copy, Clone, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub view: Mat4,
    pub projection: Mat4,
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    /// Create a perspective camera
    pub fn perspective(
        position: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let view = Mat4::look_at_rh(position, target, up);
        let projection = Mat4::perspective_rh(fov_y, aspect, near, far);
        Self { position, view, projection, fov_y, aspect, near, far }
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.view
    }

    pub fn inverse_view_proj(&self) -> Mat4 {
        self.view_proj().inverse()
    }

    /// Camera-to-world transform
    pub fn world_matrix(&self) -> Mat4 {
        self.view.inverse()
    }

    pub fn right(&self) -> Vec3 {
        self.world_matrix().x_axis.truncate().normalize_or_zero()
    }

    pub fn up(&self) -> Vec3 {
        self.world_matrix().y_axis.truncate().normalize_or_zero()
    }

    pub fn forward(&self) -> Vec3 {
        -self.world_matrix().z_axis.truncate().normalize_or_zero()
    }

    /// Distance in front of the camera along its view axis
    pub fn view_depth(&self, world: Vec3) -> f32 {
        -self.view.transform_point3(world).z
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
        self.projection = Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far);
    }
}

/// Camera data for rendering - must match `CameraUniform` in common.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_proj: Mat4,
    pub inv_view_proj: Mat4,
    pub position: Vec3,
    /// Elapsed time in seconds
    pub time: f32,
    pub right: Vec3,
    pub near: f32,
    pub up: Vec3,
    pub far: f32,
    /// Full-resolution width, height and their reciprocals
    pub viewport: Vec4,
}

impl CameraUniform {
    pub fn new(camera: &Camera, time: f32, width: u32, height: u32) -> Self {
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        Self {
            view: camera.view,
            projection: camera.projection,
            view_proj: camera.view_proj(),
            inv_view_proj: camera.inverse_view_proj(),
            position: camera.position,
            time,
            right: camera.right(),
            near: camera.near,
            up: camera.up(),
            far: camera.far,
            viewport: Vec4::new(w, h, 1.0 / w, 1.0 / h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_camera() -> Camera {
        Camera::perspective(
            Vec3::new(0.0, 2.5, -20.0),
            Vec3::new(0.0, 2.5, 0.0),
            Vec3::Y,
            std::f32::consts::FRAC_PI_4,
            16.0 / 9.0,
            NEAR_CLIP,
            FAR_CLIP,
        )
    }

    #[test]
    fn basis_vectors_follow_look_direction() {
        let cam = test_camera();
        assert!((cam.forward() - Vec3::Z).length() < 1e-5);
        assert!((cam.up() - Vec3::Y).length() < 1e-5);
        // Right-handed: looking down +Z puts right at -X
        assert!((cam.right() + Vec3::X).length() < 1e-5);
    }

    #[test]
    fn view_depth_is_positive_in_front() {
        let cam = test_camera();
        assert!((cam.view_depth(Vec3::new(0.0, 2.5, 0.0)) - 20.0).abs() < 1e-4);
        assert!(cam.view_depth(Vec3::new(0.0, 2.5, -30.0)) < 0.0);
    }

    #[test]
    fn uniform_layout_is_sixteen_byte_aligned() {
        assert_eq!(std::mem::size_of::<CameraUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<CameraUniform>(), 64 * 4 + 16 * 4);
    }
}
