//! Resource handles for graph dependency tracking

/// Pass identifier
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct PassId(pub usize);

/// Identifies a GPU resource that passes read or write.
///
/// Handles carry no data; they only order passes. The textures themselves live
/// in `RenderTargets` and `ShadowAtlas`.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct ResourceHandle(pub u64);

impl ResourceHandle {
    /// Full-res scene depth
    pub const SCENE_DEPTH: Self = Self(1);
    /// Full-res multisampled scene color
    pub const SCENE_COLOR: Self = Self(2);
    /// Sun VSM atlas
    pub const SHADOW_VSM: Self = Self(3);
    /// Half-res depth (single or multisampled, per low-res mode)
    pub const LOW_RES_DEPTH: Self = Self(4);
    /// Half-res particle color (single or multisampled, per low-res mode)
    pub const LOW_RES_COLOR: Self = Self(5);
    /// Single-sample low-res color and depth produced by the low-res resolve
    pub const LOW_RES_RESOLVED: Self = Self(6);
    /// Box-filtered single-sample scene color
    pub const RESOLVED_COLOR: Self = Self(7);
    /// Presentation target
    pub const OUTPUT: Self = Self(8);

    /// Create a named resource handle (deterministic)
    pub fn named(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        // Keep clear of the small fixed ids above
        Self(hasher.finish() | (1 << 63))
    }
}
