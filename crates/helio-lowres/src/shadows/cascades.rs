//! Cascade splitting and fitting
//!
//! Splits are placed logarithmically across the visible depth range. Each cascade
//! gets an orthographic light projection fitted around its slice of the view
//! frustum, plus an offset/scale into cascade 0's texture space so the shader can
//! project once and derive the other cascades' coordinates.

use glam::{Mat4, Vec3};

use super::DepthBounds;
use crate::Camera;

/// Blend between logarithmic (1.0) and uniform (0.0) split placement
pub const SPLIT_LAMBDA: f32 = 1.0;

/// Smallest light-space extent along any axis, keeps the projection invertible
const MIN_EXTENT: f32 = 1e-3;

/// Maps post-projection x/y in [-1, 1] to texture space [0, 1] (v flipped)
pub const TEX_SCALE_BIAS: Mat4 = Mat4::from_cols(
    glam::Vec4::new(0.5, 0.0, 0.0, 0.0),
    glam::Vec4::new(0.0, -0.5, 0.0, 0.0),
    glam::Vec4::new(0.0, 0.0, 1.0, 0.0),
    glam::Vec4::new(0.5, 0.5, 0.0, 1.0),
);

/// One fitted shadow cascade
#[derive(Clone, Copy, Debug)]
pub struct Cascade {
    /// Normalized view depth where this cascade begins
    pub split_start: f32,
    /// Normalized view depth where this cascade ends
    pub split_end: f32,
    /// `split_end` as linear view depth
    pub split_view_depth: f32,
    pub view: Mat4,
    pub projection: Mat4,
    /// Used to render the cascade depth
    pub view_proj: Mat4,
    /// World → this cascade's texture space
    pub shadow_matrix: Mat4,
    /// Offset from cascade 0's texture space
    pub offset: Vec3,
    /// Scale from cascade 0's texture space
    pub scale: Vec3,
    /// Light-space size of the filter-expanded bounds
    pub extents: Vec3,
}

/// All cascades for one frame
#[derive(Clone, Debug)]
pub struct CascadeSet {
    pub cascades: Vec<Cascade>,
    /// Cascade 0's shadow matrix, the reference texture space
    pub shadow_matrix: Mat4,
    pub bounds: DepthBounds,
}

/// Normalized split ends for `count` cascades over `bounds`
pub fn compute_splits(bounds: DepthBounds, count: usize, near: f32, far: f32, lambda: f32) -> Vec<f32> {
    let clip_range = far - near;
    if count == 0 {
        return Vec::new();
    }
    if !(clip_range > f32::EPSILON) {
        return (1..=count).map(|i| i as f32 / count as f32).collect();
    }

    let min_z = near + bounds.min * clip_range;
    let max_z = near + bounds.max * clip_range;
    let range = max_z - min_z;
    let ratio = max_z / min_z.max(f32::EPSILON);

    let mut splits: Vec<f32> = (0..count)
        .map(|i| {
            let p = (i + 1) as f32 / count as f32;
            let log = min_z * ratio.powf(p);
            let uniform = min_z + range * p;
            let d = lambda * (log - uniform) + uniform;
            ((d - near) / clip_range).max(bounds.min).min(bounds.max)
        })
        .collect();

    // Floating point can land the last split a hair short of the range end
    if let Some(last) = splits.last_mut() {
        *last = bounds.max;
    }
    splits
}

/// World-space corners of the frustum slice between two normalized depths.
///
/// The first four corners lie on the slice's near plane, the last four on its far plane.
pub fn frustum_corners(inv_view_proj: Mat4, start: f32, end: f32) -> [Vec3; 8] {
    let ndc = [
        Vec3::new(-1.0, 1.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(1.0, -1.0, 0.0),
        Vec3::new(-1.0, -1.0, 0.0),
        Vec3::new(-1.0, 1.0, 1.0),
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(1.0, -1.0, 1.0),
        Vec3::new(-1.0, -1.0, 1.0),
    ];
    let world = ndc.map(|p| inv_view_proj.project_point3(p));

    let mut corners = world;
    for i in 0..4 {
        let ray = world[i + 4] - world[i];
        corners[i] = world[i] + ray * start;
        corners[i + 4] = world[i] + ray * end;
    }
    corners
}

/// Fit `count` cascades for a sun shining from `light_dir` (pointing towards the sun)
pub fn fit_cascades(
    camera: &Camera,
    light_dir: Vec3,
    bounds: DepthBounds,
    count: usize,
    map_size: u32,
    filter_size: f32,
) -> CascadeSet {
    let light_dir = light_dir.try_normalize().unwrap_or(Vec3::Y);
    let splits = compute_splits(bounds, count, camera.near, camera.far, SPLIT_LAMBDA);
    let inv_view_proj = camera.inverse_view_proj();
    let up = light_up_vector(camera.right(), light_dir);
    let filter_scale = (map_size as f32 + filter_size) / map_size as f32;
    let clip_range = camera.far - camera.near;

    let mut cascades: Vec<Cascade> = Vec::with_capacity(count);
    let mut shadow_matrix_0 = Mat4::IDENTITY;

    for (i, &split_end) in splits.iter().enumerate() {
        let split_start = if i == 0 { bounds.min } else { splits[i - 1] };
        let corners = frustum_corners(inv_view_proj, split_start, split_end);
        let center = corners.iter().copied().sum::<Vec3>() / 8.0;

        let light_view = Mat4::look_at_rh(center, center - light_dir, up);
        let (mut min, mut max) = (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN));
        for corner in corners {
            let p = light_view.transform_point3(corner);
            min = min.min(p);
            max = max.max(p);
        }

        // Leave room for the EVSM blur kernel at the cascade border
        min.x *= filter_scale;
        min.y *= filter_scale;
        max.x *= filter_scale;
        max.y *= filter_scale;
        max = max.max(min + Vec3::splat(MIN_EXTENT));
        let extents = max - min;

        // Right-handed light view looks down -z, so the eye sits at the largest z
        let eye = center + light_dir * max.z;
        let view = Mat4::look_at_rh(eye, center, up);
        let projection = Mat4::orthographic_rh(min.x, max.x, min.y, max.y, 0.0, extents.z);
        let view_proj = projection * view;
        let shadow_matrix = TEX_SCALE_BIAS * view_proj;

        let (offset, scale) = if i == 0 {
            shadow_matrix_0 = shadow_matrix;
            (Vec3::ZERO, Vec3::ONE)
        } else {
            cascade_offset_scale(shadow_matrix_0, shadow_matrix)
        };

        cascades.push(Cascade {
            split_start,
            split_end,
            split_view_depth: camera.near + split_end * clip_range,
            view,
            projection,
            view_proj,
            shadow_matrix,
            offset,
            scale,
            extents,
        });
    }

    CascadeSet { cascades, shadow_matrix: shadow_matrix_0, bounds }
}

/// Offset/scale that take cascade 0 texture coordinates into `cascade`'s
fn cascade_offset_scale(cascade_0: Mat4, cascade: Mat4) -> (Vec3, Vec3) {
    let to_c0 = cascade_0 * cascade.inverse();
    let corner = to_c0.project_point3(Vec3::ZERO);
    let other = to_c0.project_point3(Vec3::ONE);
    let size = other - corner;
    let scale = Vec3::select(size.abs().cmpgt(Vec3::splat(f32::EPSILON)), Vec3::ONE / size, Vec3::ONE);
    (-corner, scale)
}

/// Up vector for the light view: the camera's right axis unless it is nearly
/// parallel to the light
fn light_up_vector(camera_right: Vec3, light_dir: Vec3) -> Vec3 {
    let candidates = [camera_right, Vec3::Y, Vec3::X];
    candidates
        .into_iter()
        .find(|c| c.length_squared() > 0.5 && c.dot(light_dir).abs() < 0.99)
        .unwrap_or(Vec3::Z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{FAR_CLIP, NEAR_CLIP};
    use crate::shadows::{NUM_CASCADES, SHADOW_FILTER_SIZE, SHADOW_MAP_SIZE};

    fn demo_camera() -> Camera {
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

    fn sun() -> Vec3 {
        Vec3::new(-0.75, 0.977, -0.4).normalize()
    }

    fn demo_set() -> CascadeSet {
        let camera = demo_camera();
        let bounds = DepthBounds::for_scene(&camera);
        fit_cascades(&camera, sun(), bounds, NUM_CASCADES, SHADOW_MAP_SIZE, SHADOW_FILTER_SIZE)
    }

    #[test]
    fn cascades_are_contiguous_for_any_count() {
        let camera = demo_camera();
        let bounds = DepthBounds::for_scene(&camera);
        for count in 1..=8 {
            let set = fit_cascades(&camera, sun(), bounds, count, SHADOW_MAP_SIZE, SHADOW_FILTER_SIZE);
            assert_eq!(set.cascades.len(), count);
            assert_eq!(set.cascades[0].split_start, bounds.min);
            assert_eq!(set.cascades[count - 1].split_end, bounds.max);
            for pair in set.cascades.windows(2) {
                assert_eq!(pair[0].split_end, pair[1].split_start);
                assert!(pair[1].split_end > pair[1].split_start);
            }
        }
    }

    #[test]
    fn logarithmic_splits_grow_with_distance() {
        let bounds = DepthBounds { min: 0.1, max: 0.9 };
        let splits = compute_splits(bounds, 4, 1.0, 101.0, 1.0);
        let widths: Vec<f32> = std::iter::once(splits[0] - bounds.min)
            .chain(splits.windows(2).map(|w| w[1] - w[0]))
            .collect();
        for w in widths.windows(2) {
            assert!(w[1] > w[0]);
        }
    }

    #[test]
    fn first_cascade_is_the_reference_space() {
        let set = demo_set();
        assert_eq!(set.cascades[0].offset, Vec3::ZERO);
        assert_eq!(set.cascades[0].scale, Vec3::ONE);
        assert_eq!(set.shadow_matrix, set.cascades[0].shadow_matrix);
    }

    #[test]
    fn offset_and_scale_map_cascade_zero_coords_to_each_cascade() {
        let set = demo_set();
        let probe = Vec3::new(1.5, 0.7, 3.0);
        let uv0 = set.shadow_matrix.project_point3(probe);
        for cascade in &set.cascades[1..] {
            let expected = cascade.shadow_matrix.project_point3(probe);
            let derived = (uv0 + cascade.offset) * cascade.scale;
            assert!((derived - expected).abs().max_element() < 1e-3, "{derived:?} vs {expected:?}");
        }
    }

    #[test]
    fn slice_corners_project_inside_their_cascade() {
        let camera = demo_camera();
        let set = demo_set();
        let inv = camera.inverse_view_proj();
        for cascade in &set.cascades {
            for corner in frustum_corners(inv, cascade.split_start, cascade.split_end) {
                let uvz = cascade.shadow_matrix.project_point3(corner);
                assert!(uvz.x >= -1e-3 && uvz.x <= 1.0 + 1e-3, "{uvz:?}");
                assert!(uvz.y >= -1e-3 && uvz.y <= 1.0 + 1e-3, "{uvz:?}");
                assert!(uvz.z >= -1e-3 && uvz.z <= 1.0 + 1e-3, "{uvz:?}");
            }
        }
    }

    #[test]
    fn split_view_depth_is_linear_depth() {
        let camera = demo_camera();
        let set = demo_set();
        for cascade in &set.cascades {
            let expected = camera.near + cascade.split_end * (camera.far - camera.near);
            assert!((cascade.split_view_depth - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn degenerate_inputs_stay_finite() {
        let mut camera = demo_camera();
        camera.far = camera.near;
        let set = fit_cascades(&camera, Vec3::ZERO, DepthBounds::FULL, NUM_CASCADES, SHADOW_MAP_SIZE, SHADOW_FILTER_SIZE);
        for cascade in &set.cascades {
            assert!(cascade.view_proj.is_finite());
            assert!(cascade.offset.is_finite() && cascade.scale.is_finite());
        }

        // Sun straight along the camera's right axis
        let camera = demo_camera();
        let set = fit_cascades(&camera, camera.right(), DepthBounds::FULL, 2, SHADOW_MAP_SIZE, SHADOW_FILTER_SIZE);
        assert!(set.cascades.iter().all(|c| c.shadow_matrix.is_finite()));
    }
}
