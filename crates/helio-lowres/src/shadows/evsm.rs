//! Exponential variance shadow map math
//!
//! These functions mirror evsm.wgsl and mesh.wgsl so the warp, the moment
//! layout and the visibility test can be checked without a GPU.

use glam::{Vec2, Vec3, Vec4};

/// Light bleeding reduction applied to both Chebyshev bounds
pub const LIGHT_BLEEDING_REDUCTION: f32 = 0.10;

/// Scale of the depth-dependent minimum variance
pub const MIN_VARIANCE_DEPTH_SCALE: f32 = 1e-4;

/// Largest sample radius of the separable blur
pub const MAX_BLUR_RADIUS: u32 = 3;

/// Warp exponents for the positive and negative moments
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EvsmExponents {
    pub positive: f32,
    pub negative: f32,
}

impl Default for EvsmExponents {
    fn default() -> Self {
        Self { positive: 40.0, negative: 8.0 }
    }
}

impl EvsmExponents {
    /// Clamp so `exp(c)` stays representable in the atlas format
    pub fn clamped_for(self, format: wgpu::TextureFormat) -> Self {
        let max = match format {
            wgpu::TextureFormat::Rgba32Float => 42.0,
            _ => 5.54,
        };
        Self { positive: self.positive.min(max), negative: self.negative.min(max) }
    }
}

/// Depth in [0, 1] to the (positive, negative) warped pair
pub fn warp_depth(depth: f32, exponents: EvsmExponents) -> Vec2 {
    let d = 2.0 * depth - 1.0;
    Vec2::new((exponents.positive * d).exp(), -(-exponents.negative * d).exp())
}

/// Inverse of the positive warp
pub fn unwarp_positive(warped: f32, exponents: EvsmExponents) -> f32 {
    (warped.ln() / exponents.positive + 1.0) * 0.5
}

/// Inverse of the negative warp
pub fn unwarp_negative(warped: f32, exponents: EvsmExponents) -> f32 {
    (-(-warped).ln() / exponents.negative + 1.0) * 0.5
}

/// Moments stored in the atlas: (p, p², n, n²)
pub fn moments(depth: f32, exponents: EvsmExponents) -> Vec4 {
    let w = warp_depth(depth, exponents);
    Vec4::new(w.x, w.x * w.x, w.y, w.y * w.y)
}

fn linstep(min: f32, max: f32, v: f32) -> f32 {
    ((v - min) / (max - min)).clamp(0.0, 1.0)
}

/// One-sided Chebyshev bound on the lit fraction
pub fn chebyshev_upper_bound(moments: Vec2, mean: f32, min_variance: f32, light_bleeding_reduction: f32) -> f32 {
    let variance = (moments.y - moments.x * moments.x).max(min_variance);
    let d = mean - moments.x;
    let p_max = variance / (variance + d * d);
    let p_max = linstep(light_bleeding_reduction, 1.0, p_max);
    if mean <= moments.x { 1.0 } else { p_max }
}

/// Visibility of a receiver at `depth` against filtered `moments`
pub fn visibility(moments: Vec4, depth: f32, exponents: EvsmExponents) -> f32 {
    let warped = warp_depth(depth, exponents);
    let depth_scale = MIN_VARIANCE_DEPTH_SCALE * Vec2::new(exponents.positive, exponents.negative) * warped;
    let min_variance = depth_scale * depth_scale;

    let positive = chebyshev_upper_bound(Vec2::new(moments.x, moments.y), warped.x, min_variance.x, LIGHT_BLEEDING_REDUCTION);
    let negative = chebyshev_upper_bound(Vec2::new(moments.z, moments.w), warped.y, min_variance.y, LIGHT_BLEEDING_REDUCTION);
    positive.min(negative)
}

/// One direction of the separable blur
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlurAxis {
    /// Kernel width in texels
    pub filter_size: f32,
    /// Taps on each side of the center
    pub radius: u32,
    /// Normalized weight of the taps at distance 0..=3
    pub weights: [f32; 4],
}

impl BlurAxis {
    /// Box kernel of width `filter_size` with a fractional outer tap
    pub fn new(filter_size: f32) -> Self {
        let filter_size = filter_size.max(1.0);
        let radius = ((filter_size / 2.0 + 0.499) as u32).min(MAX_BLUR_RADIUS);
        let half = filter_size / 2.0;

        let mut weights = [0.0f32; 4];
        for (i, w) in weights.iter_mut().enumerate().take(radius as usize + 1) {
            *w = (half + 0.5 - i as f32).clamp(0.0, 1.0);
        }
        let total = weights[0] + 2.0 * weights[1..].iter().sum::<f32>();
        for w in &mut weights {
            *w /= total;
        }
        Self { filter_size, radius, weights }
    }
}

/// Blur settings for one cascade
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlurParams {
    pub horizontal: BlurAxis,
    pub vertical: BlurAxis,
}

impl BlurParams {
    /// Kernel widths shrink with the cascade's scale so every cascade blurs the
    /// same world-space footprint. Returns `None` when neither axis is wider
    /// than one texel.
    pub fn for_cascade(scale: Vec3, filter_size: f32) -> Option<Self> {
        let u = (filter_size * scale.x.abs()).max(1.0);
        let v = (filter_size * scale.y.abs()).max(1.0);
        if u <= 1.0 && v <= 1.0 {
            return None;
        }
        Some(Self { horizontal: BlurAxis::new(u), vertical: BlurAxis::new(v) })
    }
}

/// Constants for one EVSM convert or blur draw - must match `EvsmUniform` in evsm.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct EvsmUniform {
    pub exponents: [f32; 2],
    pub texel_size: [f32; 2],
    /// (1, 0) horizontal, (0, 1) vertical
    pub direction: [f32; 2],
    pub radius: u32,
    pub _pad: u32,
    pub weights: [f32; 4],
}

impl EvsmUniform {
    pub fn convert(exponents: EvsmExponents, map_size: u32) -> Self {
        Self {
            exponents: [exponents.positive, exponents.negative],
            texel_size: [1.0 / map_size as f32; 2],
            direction: [0.0, 0.0],
            radius: 0,
            _pad: 0,
            weights: [1.0, 0.0, 0.0, 0.0],
        }
    }

    pub fn blur(exponents: EvsmExponents, map_size: u32, axis: &BlurAxis, direction: [f32; 2]) -> Self {
        Self {
            direction,
            radius: axis.radius,
            weights: axis.weights,
            ..Self::convert(exponents, map_size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warp_round_trips_both_channels() {
        let exps = EvsmExponents::default();
        for depth in [0.0, 0.1, 0.37, 0.5, 0.8, 1.0] {
            let w = warp_depth(depth, exps);
            assert!((unwarp_positive(w.x, exps) - depth).abs() < 1e-4, "positive at {depth}");
            assert!((unwarp_negative(w.y, exps) - depth).abs() < 1e-4, "negative at {depth}");
        }
    }

    #[test]
    fn warp_is_monotonic() {
        let exps = EvsmExponents::default();
        let a = warp_depth(0.3, exps);
        let b = warp_depth(0.6, exps);
        assert!(b.x > a.x);
        assert!(b.y > a.y);
        assert!(a.y < 0.0);
    }

    #[test]
    fn exponents_clamp_for_half_float_atlas() {
        let exps = EvsmExponents::default();
        assert_eq!(exps.clamped_for(wgpu::TextureFormat::Rgba32Float), EvsmExponents { positive: 40.0, negative: 8.0 });
        assert_eq!(exps.clamped_for(wgpu::TextureFormat::Rgba16Float), EvsmExponents { positive: 5.54, negative: 5.54 });
        // Second moment of the clamped warp must stay below the fp16 max
        assert!((2.0 * 5.54f32).exp() < 65504.0);
    }

    #[test]
    fn receiver_in_front_of_occluder_is_lit() {
        let exps = EvsmExponents::default();
        let m = moments(0.6, exps);
        assert_eq!(visibility(m, 0.4, exps), 1.0);
        assert_eq!(visibility(m, 0.6, exps), 1.0);
    }

    #[test]
    fn receiver_behind_occluder_is_shadowed() {
        let exps = EvsmExponents::default();
        let m = moments(0.4, exps);
        assert!(visibility(m, 0.6, exps) < 0.01);
    }

    #[test]
    fn filtered_edge_gives_partial_visibility() {
        let exps = EvsmExponents::default();
        // Half the kernel sees a near occluder, half sees the receiver plane itself
        let m = (moments(0.45, exps) + moments(0.5, exps)) * 0.5;
        let v = visibility(m, 0.5, exps);
        assert!(v > 0.0 && v < 1.0, "{v}");
    }

    #[test]
    fn blur_kernel_shrinks_with_cascade_scale() {
        let full = BlurParams::for_cascade(Vec3::ONE, 7.0).unwrap();
        assert_eq!(full.horizontal.radius, 3);
        assert_eq!(full.horizontal.filter_size, 7.0);

        let half = BlurParams::for_cascade(Vec3::new(0.5, 0.25, 1.0), 7.0).unwrap();
        assert_eq!(half.horizontal.filter_size, 3.5);
        assert_eq!(half.horizontal.radius, 2);
        assert_eq!(half.vertical.filter_size, 1.75);
        assert_eq!(half.vertical.radius, 1);
    }

    #[test]
    fn blur_is_skipped_at_one_texel() {
        assert!(BlurParams::for_cascade(Vec3::splat(0.1), 7.0).is_none());
        assert!(BlurParams::for_cascade(Vec3::new(0.1, 0.2, 1.0), 5.0).is_none());
    }

    #[test]
    fn blur_weights_are_normalized() {
        for size in [1.0, 1.75, 3.5, 5.5, 7.0] {
            let axis = BlurAxis::new(size);
            let total = axis.weights[0] + 2.0 * axis.weights[1..=axis.radius as usize].iter().sum::<f32>();
            assert!((total - 1.0).abs() < 1e-5, "size {size}");
            assert!(axis.weights[axis.radius as usize + 1..].iter().all(|&w| w == 0.0));
        }
    }

    #[test]
    fn evsm_uniform_is_48_bytes() {
        assert_eq!(std::mem::size_of::<EvsmUniform>(), 48);
    }
}
