//! Sun shadows: cascaded exponential variance shadow maps
//!
//! The CPU side lives here as plain math (`depth_bounds`, `cascades`, `evsm`)
//! plus the GPU surfaces in `atlas`. `passes::shadow` drives the per-frame work.

pub mod atlas;
pub mod cascades;
pub mod depth_bounds;
pub mod evsm;

pub use atlas::ShadowAtlas;
pub use cascades::{Cascade, CascadeSet};
pub use depth_bounds::DepthBounds;
pub use evsm::{BlurParams, EvsmExponents};

/// Number of shadow cascades
pub const NUM_CASCADES: usize = 4;

/// Resolution of the cascade depth target and the VSM atlas layers
pub const SHADOW_MAP_SIZE: u32 = 1024;

/// Sample count of the cascade depth target
pub const SHADOW_MSAA_SAMPLES: u32 = 4;

/// Width of the EVSM blur kernel at cascade 0, in texels
pub const SHADOW_FILTER_SIZE: f32 = 7.0;

/// Per-frame shadow constants - must match `ShadowUniform` in common.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowUniform {
    /// World → cascade-0 texture space
    pub shadow_matrix: glam::Mat4,
    /// View depth at which each cascade ends
    pub cascade_splits: [f32; NUM_CASCADES],
    pub cascade_offsets: [[f32; 4]; NUM_CASCADES],
    pub cascade_scales: [[f32; 4]; NUM_CASCADES],
    /// x: positive exponent, y: negative exponent, z: light bleeding reduction, w: enabled
    pub evsm: [f32; 4],
}

impl ShadowUniform {
    pub fn new(set: &CascadeSet, exponents: EvsmExponents, enabled: bool) -> Self {
        let mut uniform = Self {
            shadow_matrix: set.shadow_matrix,
            cascade_splits: [0.0; NUM_CASCADES],
            cascade_offsets: [[0.0; 4]; NUM_CASCADES],
            cascade_scales: [[1.0; 4]; NUM_CASCADES],
            evsm: [
                exponents.positive,
                exponents.negative,
                evsm::LIGHT_BLEEDING_REDUCTION,
                if enabled { 1.0 } else { 0.0 },
            ],
        };
        for (i, cascade) in set.cascades.iter().enumerate().take(NUM_CASCADES) {
            uniform.cascade_splits[i] = cascade.split_view_depth;
            uniform.cascade_offsets[i] = cascade.offset.extend(0.0).to_array();
            uniform.cascade_scales[i] = cascade.scale.extend(1.0).to_array();
        }
        uniform
    }

    /// Placeholder used before the first frame and when the sun is off
    pub fn disabled() -> Self {
        Self {
            shadow_matrix: glam::Mat4::IDENTITY,
            cascade_splits: [f32::MAX; NUM_CASCADES],
            cascade_offsets: [[0.0; 4]; NUM_CASCADES],
            cascade_scales: [[1.0; 4]; NUM_CASCADES],
            evsm: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_uniform_is_sixteen_byte_aligned() {
        assert_eq!(std::mem::size_of::<ShadowUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<ShadowUniform>(), 64 + 16 + 64 + 64 + 16);
    }
}
