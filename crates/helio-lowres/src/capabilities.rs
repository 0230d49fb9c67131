//! Adapter capability probing and multisample layouts
//!
//! Everything optional about the GPU is resolved once at startup into plain
//! data. Missing optional features turn into disabled paths, never errors; the
//! only hard requirement is sample-count support for every `MsaaMode`.

use glam::Vec2;

use crate::settings::{MsaaMode, MsaaModeMap};
use crate::{Error, Result};

/// Format of the scene color targets
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Format of every depth target
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Largest sample count any target uses (low-res with 2x full-res MSAA)
pub const MAX_LOW_RES_SAMPLES: usize = 8;

/// Largest full-res sample count
pub const MAX_FULL_RES_SAMPLES: usize = 2;

// ── Sample positions ──────────────────────────────────────────────────────────

/// Source of the rasterizer's subsample positions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplePositionProvider {
    /// Positions are unknown; the standard pattern is assumed
    Unsupported,
    /// The backend uses the standard D3D/Vulkan/Metal pattern
    FixedGrid,
    /// Positions can be programmed per pipeline
    VendorProgrammable,
}

impl SamplePositionProvider {
    /// wgpu exposes no way to program sample positions, so the best a native
    /// backend offers is the documented fixed pattern.
    pub fn probe(backend: wgpu::Backend) -> Self {
        match backend {
            wgpu::Backend::Vulkan | wgpu::Backend::Dx12 | wgpu::Backend::Metal => {
                SamplePositionProvider::FixedGrid
            }
            other => {
                log::info!("Sample positions unknown on {:?}, assuming the standard pattern", other);
                SamplePositionProvider::Unsupported
            }
        }
    }

    /// Whether custom low-res positions can be used
    pub fn is_programmable(self) -> bool {
        self == SamplePositionProvider::VendorProgrammable
    }

    /// Positions of the `count` subsamples of a pixel, in [0, 1]²
    pub fn positions(self, count: u32) -> Vec<Vec2> {
        match self {
            SamplePositionProvider::VendorProgrammable => programmable_positions(count)
                .unwrap_or_else(|| standard_positions(count)),
            SamplePositionProvider::Unsupported | SamplePositionProvider::FixedGrid => {
                standard_positions(count)
            }
        }
    }
}

/// Standard subsample positions for `count` samples
pub fn standard_positions(count: u32) -> Vec<Vec2> {
    let offsets: &[(f32, f32)] = match count {
        1 => &[(0.0, 0.0)],
        2 => &[(4.0, 4.0), (-4.0, -4.0)],
        4 => &[(-2.0, -6.0), (6.0, -2.0), (-6.0, 2.0), (2.0, 6.0)],
        8 => &[
            (1.0, -3.0), (-1.0, 3.0), (5.0, 1.0), (-3.0, -5.0),
            (-5.0, 5.0), (-7.0, -1.0), (3.0, 7.0), (7.0, -7.0),
        ],
        16 => &[
            (1.0, 1.0), (-1.0, -3.0), (-3.0, 2.0), (4.0, -1.0),
            (-5.0, -2.0), (2.0, 5.0), (5.0, 3.0), (3.0, -5.0),
            (-2.0, 6.0), (0.0, -7.0), (-4.0, -6.0), (-6.0, 4.0),
            (-8.0, 0.0), (7.0, -4.0), (6.0, 7.0), (-7.0, -8.0),
        ],
        _ => &[(0.0, 0.0)],
    };
    offsets.iter().map(|&(x, y)| Vec2::new(x / 16.0 + 0.5, y / 16.0 + 0.5)).collect()
}

/// Custom low-res pattern: a 2x2 grid for 4 samples, two interleaved grids for 8
fn programmable_positions(count: u32) -> Option<Vec<Vec2>> {
    const GRID: [Vec2; 4] = [
        Vec2::new(0.25, 0.25),
        Vec2::new(0.75, 0.25),
        Vec2::new(0.25, 0.75),
        Vec2::new(0.75, 0.75),
    ];
    match count {
        4 => Some(GRID.to_vec()),
        8 => Some(
            GRID.iter()
                .flat_map(|&g| [g - Vec2::splat(0.125), g + Vec2::splat(0.125)])
                .collect(),
        ),
        _ => None,
    }
}

/// Position in [0, 1] to the 1/16 pixel grid programmable rasterizers use
pub fn quantize_sample_position(v: f32) -> u8 {
    (v * 16.0).clamp(0.0, 15.0) as u8
}

// ── Low-res sample layout ─────────────────────────────────────────────────────

/// Where one low-res subsample lands in full-res space
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleMapping {
    /// Full-res pixel within the 2x2 block: 0 top-left, 1 top-right, 2 bottom-left, 3 bottom-right
    pub quadrant: u8,
    /// Full-res sample index inside that pixel
    pub sub: u8,
}

/// Correspondence between the subsamples of one low-res pixel and the samples
/// of the 2x2 full-res pixels it covers
#[derive(Clone, Debug, PartialEq)]
pub struct SampleLayout {
    pub full_res_samples: u32,
    pub full_res_positions: Vec<Vec2>,
    /// Indexed by low-res subsample
    pub mappings: Vec<SampleMapping>,
}

impl SampleLayout {
    /// Build a layout from low-res subsample positions.
    ///
    /// Every quadrant must receive exactly `full_res_positions.len()` subsamples.
    /// Within a quadrant, subsamples are paired with the full-res sample positions
    /// so that the total distance between them is smallest.
    pub fn from_positions(low_res: &[Vec2], full_res_positions: &[Vec2]) -> Result<Self> {
        let per_quadrant = full_res_positions.len();
        if per_quadrant == 0 || low_res.len() != per_quadrant * 4 {
            return Err(Error::Resource(format!(
                "{} low-res samples cannot cover 4 quadrants of {} samples",
                low_res.len(),
                per_quadrant
            )));
        }

        let mut quadrants: [Vec<usize>; 4] = Default::default();
        for (i, p) in low_res.iter().enumerate() {
            let col = usize::from(p.x >= 0.5);
            let row = usize::from(p.y >= 0.5);
            quadrants[row * 2 + col].push(i);
        }

        let mut mappings = vec![SampleMapping { quadrant: 0, sub: 0 }; low_res.len()];
        for (quadrant, members) in quadrants.iter().enumerate() {
            if members.len() != per_quadrant {
                return Err(Error::Resource(format!(
                    "quadrant {} has {} low-res samples, expected {}",
                    quadrant,
                    members.len(),
                    per_quadrant
                )));
            }

            let origin = Vec2::new((quadrant % 2) as f32 * 0.5, (quadrant / 2) as f32 * 0.5);
            let local: Vec<Vec2> = members.iter().map(|&i| (low_res[i] - origin) * 2.0).collect();
            let assignment = closest_assignment(&local, full_res_positions);
            for (&sample, sub) in members.iter().zip(assignment) {
                mappings[sample] = SampleMapping { quadrant: quadrant as u8, sub: sub as u8 };
            }
        }

        Ok(Self {
            full_res_samples: per_quadrant as u32,
            full_res_positions: full_res_positions.to_vec(),
            mappings,
        })
    }

    /// Layout for the low-res MSAA target of `mode`
    pub fn for_mode(provider: SamplePositionProvider, mode: MsaaMode) -> Result<Self> {
        let low_res = provider.positions(mode.low_res_sample_count());
        let full_res = standard_positions(mode.sample_count());
        Self::from_positions(&low_res, &full_res)
    }

    pub fn low_res_samples(&self) -> u32 {
        self.mappings.len() as u32
    }

    /// Low-res subsample that stands in for full-res `sub` of `quadrant`
    pub fn low_res_sample_for(&self, quadrant: u8, sub: u8) -> Option<usize> {
        self.mappings.iter().position(|m| m.quadrant == quadrant && m.sub == sub)
    }

    pub fn to_uniform(&self) -> SampleLayoutUniform {
        let mut uniform: SampleLayoutUniform = bytemuck::Zeroable::zeroed();
        for (i, m) in self.mappings.iter().enumerate().take(MAX_LOW_RES_SAMPLES) {
            uniform.low_res_to_full[i] = [m.quadrant as u32, m.sub as u32, 0, 0];
            let slot = m.quadrant as usize * self.full_res_samples as usize + m.sub as usize;
            if slot < MAX_LOW_RES_SAMPLES {
                uniform.full_to_low_res[slot] = [i as u32, 0, 0, 0];
            }
        }
        for (i, p) in self.full_res_positions.iter().enumerate().take(MAX_FULL_RES_SAMPLES) {
            uniform.full_res_positions[i] = [p.x, p.y, 0.0, 0.0];
        }
        uniform.counts = [self.full_res_samples, self.low_res_samples(), 0, 0];
        uniform
    }
}

/// Permutation of `targets` that minimizes the summed squared distance to `points`
fn closest_assignment(points: &[Vec2], targets: &[Vec2]) -> Vec<usize> {
    fn search(
        points: &[Vec2],
        targets: &[Vec2],
        used: &mut Vec<bool>,
        current: &mut Vec<usize>,
        cost: f32,
        best: &mut (f32, Vec<usize>),
    ) {
        if cost >= best.0 {
            return;
        }
        let i = current.len();
        if i == points.len() {
            *best = (cost, current.clone());
            return;
        }
        for t in 0..targets.len() {
            if used[t] {
                continue;
            }
            used[t] = true;
            current.push(t);
            search(points, targets, used, current, cost + points[i].distance_squared(targets[t]), best);
            current.pop();
            used[t] = false;
        }
    }

    let mut best = (f32::INFINITY, (0..points.len()).collect());
    search(points, targets, &mut vec![false; targets.len()], &mut Vec::new(), 0.0, &mut best);
    best.1
}

/// GPU copy of a `SampleLayout` - must match `SampleLayout` in common.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SampleLayoutUniform {
    /// x: quadrant, y: full-res sample, per low-res subsample
    pub low_res_to_full: [[u32; 4]; MAX_LOW_RES_SAMPLES],
    /// x: low-res subsample, indexed by quadrant * full_res_samples + sample
    pub full_to_low_res: [[u32; 4]; MAX_LOW_RES_SAMPLES],
    /// xy: full-res sample position within the pixel
    pub full_res_positions: [[f32; 4]; MAX_FULL_RES_SAMPLES],
    /// x: full-res samples, y: low-res samples
    pub counts: [u32; 4],
}

// ── Adapter capabilities ──────────────────────────────────────────────────────

/// What the adapter/device pair can do, resolved once at startup
#[derive(Clone, Debug)]
pub struct GpuCapabilities {
    pub backend: wgpu::Backend,
    /// Rgba32Float can be filtered, so the VSM atlas can use full precision
    pub float32_filterable: bool,
    /// Shadow casters behind the light's near plane can be rasterized unclipped
    pub depth_clip_control: bool,
    pub sample_positions: SamplePositionProvider,
    /// Bitmask of supported sample counts (bit n set = n samples) for `COLOR_FORMAT`
    pub color_sample_counts: u32,
    /// Bitmask of supported sample counts for `DEPTH_FORMAT`
    pub depth_sample_counts: u32,
}

impl GpuCapabilities {
    /// Optional features worth requesting from `adapter`
    pub fn required_features(adapter: &wgpu::Adapter) -> wgpu::Features {
        adapter.features()
            & (wgpu::Features::FLOAT32_FILTERABLE
                | wgpu::Features::DEPTH_CLIP_CONTROL
                | wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES)
    }

    pub fn probe(adapter: &wgpu::Adapter, device: &wgpu::Device) -> Self {
        let features = device.features();
        let backend = adapter.get_info().backend;

        let format_flags = |format: wgpu::TextureFormat| {
            if features.contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES) {
                adapter.get_texture_format_features(format).flags
            } else {
                format.guaranteed_format_features(features).flags
            }
        };
        let sample_mask = |format: wgpu::TextureFormat| {
            let flags = format_flags(format);
            [1u32, 2, 4, 8, 16]
                .into_iter()
                .filter(|&n| flags.sample_count_supported(n))
                .fold(0u32, |mask, n| mask | n)
        };

        let caps = Self {
            backend,
            float32_filterable: features.contains(wgpu::Features::FLOAT32_FILTERABLE),
            depth_clip_control: features.contains(wgpu::Features::DEPTH_CLIP_CONTROL),
            sample_positions: SamplePositionProvider::probe(backend),
            color_sample_counts: sample_mask(COLOR_FORMAT),
            depth_sample_counts: sample_mask(DEPTH_FORMAT),
        };

        log::info!("GPU backend: {:?}", caps.backend);
        if !caps.float32_filterable {
            log::info!("Rgba32Float is not filterable, shadow atlas falls back to Rgba16Float");
        }
        if !caps.depth_clip_control {
            log::info!("Depth clip control unavailable, shadow casters use clipped depth");
        }
        log::info!(
            "Sample counts: color {:#b}, depth {:#b}",
            caps.color_sample_counts,
            caps.depth_sample_counts
        );

        caps
    }

    pub fn supports_samples(&self, count: u32) -> bool {
        count.is_power_of_two()
            && self.color_sample_counts & count != 0
            && self.depth_sample_counts & count != 0
    }

    /// Both the full-res and low-res sample counts of `mode` are available
    pub fn supports_msaa_mode(&self, mode: MsaaMode) -> bool {
        self.supports_samples(mode.sample_count()) && self.supports_samples(mode.low_res_sample_count())
    }

    /// `mode` if the adapter can run it, otherwise the single-sample mode
    pub fn effective_msaa_mode(&self, mode: MsaaMode) -> MsaaMode {
        if self.supports_msaa_mode(mode) {
            mode
        } else {
            MsaaMode::None
        }
    }

    /// The single-sample mode is required. Other modes the adapter lacks are
    /// disabled and fall back to it.
    pub fn check_msaa_modes(&self) -> Result<()> {
        for mode in MsaaMode::ALL {
            if self.supports_msaa_mode(mode) {
                continue;
            }
            let message = format!(
                "MSAA mode {} needs {}x and {}x multisampling of {:?} and {:?}, which this adapter lacks",
                mode.label(),
                mode.sample_count(),
                mode.low_res_sample_count(),
                COLOR_FORMAT,
                DEPTH_FORMAT
            );
            if mode == MsaaMode::None {
                return Err(Error::Resource(message));
            }
            log::warn!("{}; falling back to MSAA mode {}", message, MsaaMode::None.label());
        }
        Ok(())
    }

    /// Sample layout for every MSAA mode. Programmable positions are only used
    /// when both the hardware and the caller ask for them.
    pub fn sample_layouts(&self, use_programmable: bool) -> Result<MsaaModeMap<SampleLayout>> {
        let provider = match self.sample_positions {
            SamplePositionProvider::VendorProgrammable if !use_programmable => SamplePositionProvider::FixedGrid,
            other => other,
        };
        MsaaModeMap::try_from_fn(|mode| SampleLayout::for_mode(provider, mode))
    }

    /// Format of the VSM atlas
    pub fn vsm_format(&self) -> wgpu::TextureFormat {
        if self.float32_filterable {
            wgpu::TextureFormat::Rgba32Float
        } else {
            wgpu::TextureFormat::Rgba16Float
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(color: u32, depth: u32) -> GpuCapabilities {
        GpuCapabilities {
            backend: wgpu::Backend::Vulkan,
            float32_filterable: false,
            depth_clip_control: false,
            sample_positions: SamplePositionProvider::FixedGrid,
            color_sample_counts: color,
            depth_sample_counts: depth,
        }
    }

    #[test]
    fn standard_layouts_cover_each_quadrant_evenly() {
        for mode in MsaaMode::ALL {
            let layout = SampleLayout::for_mode(SamplePositionProvider::FixedGrid, mode).unwrap();
            assert_eq!(layout.low_res_samples(), mode.low_res_sample_count());
            for quadrant in 0..4u8 {
                for sub in 0..mode.sample_count() as u8 {
                    assert!(layout.low_res_sample_for(quadrant, sub).is_some(), "{mode:?} q{quadrant} s{sub}");
                }
            }
        }
    }

    #[test]
    fn four_sample_pattern_maps_one_sample_per_quadrant() {
        let layout = SampleLayout::for_mode(SamplePositionProvider::FixedGrid, MsaaMode::None).unwrap();
        let quadrants: Vec<u8> = layout.mappings.iter().map(|m| m.quadrant).collect();
        assert_eq!(quadrants, vec![0, 1, 2, 3]);
        assert!(layout.mappings.iter().all(|m| m.sub == 0));
    }

    #[test]
    fn programmable_positions_form_grids() {
        let four = SamplePositionProvider::VendorProgrammable.positions(4);
        assert_eq!(four[0], Vec2::new(0.25, 0.25));
        assert_eq!(four[3], Vec2::new(0.75, 0.75));

        let eight = SamplePositionProvider::VendorProgrammable.positions(8);
        assert_eq!(eight.len(), 8);
        assert_eq!(eight[0], Vec2::new(0.125, 0.125));
        assert_eq!(eight[1], Vec2::new(0.375, 0.375));

        let layout = SampleLayout::for_mode(SamplePositionProvider::VendorProgrammable, MsaaMode::X2).unwrap();
        // The second of each pair sits nearest the 2x pattern's (0.75, 0.75) sample
        assert_eq!(layout.mappings[1], SampleMapping { quadrant: 0, sub: 0 });
        assert_eq!(layout.mappings[0], SampleMapping { quadrant: 0, sub: 1 });
    }

    #[test]
    fn quantization_uses_sixteenths() {
        assert_eq!(quantize_sample_position(0.25), 4);
        assert_eq!(quantize_sample_position(0.125), 2);
        assert_eq!(quantize_sample_position(1.0), 15);
        assert_eq!(quantize_sample_position(-0.5), 0);
    }

    #[test]
    fn uneven_quadrants_are_rejected() {
        let bunched = [Vec2::splat(0.1), Vec2::splat(0.2), Vec2::new(0.9, 0.1), Vec2::splat(0.9)];
        assert!(SampleLayout::from_positions(&bunched, &[Vec2::splat(0.5)]).is_err());
        assert!(SampleLayout::from_positions(&bunched[..3], &[Vec2::splat(0.5)]).is_err());
    }

    #[test]
    fn unsupported_provider_falls_back_to_standard_positions() {
        assert_eq!(SamplePositionProvider::Unsupported.positions(8), standard_positions(8));
        assert_eq!(SamplePositionProvider::probe(wgpu::Backend::Gl), SamplePositionProvider::Unsupported);
        assert_eq!(SamplePositionProvider::probe(wgpu::Backend::Vulkan), SamplePositionProvider::FixedGrid);
    }

    #[test]
    fn missing_single_sample_counts_are_fatal() {
        assert!(caps(0b1_1111, 0b1_1111).check_msaa_modes().is_ok());
        // No 4x: the single-sample mode's low-res buffer cannot be built
        assert!(matches!(caps(0b1011, 0b1011).check_msaa_modes(), Err(Error::Resource(_))));
    }

    #[test]
    fn missing_2x_support_falls_back_to_single_sample() {
        // Only 1x and 4x guaranteed: 2x full-res and 8x low-res are missing
        let limited = caps(0b101, 0b101);
        assert!(limited.check_msaa_modes().is_ok());
        assert!(!limited.supports_msaa_mode(MsaaMode::X2));
        assert_eq!(limited.effective_msaa_mode(MsaaMode::X2), MsaaMode::None);
        assert_eq!(limited.effective_msaa_mode(MsaaMode::None), MsaaMode::None);

        let full = caps(0b1_1111, 0b1_1111);
        assert_eq!(full.effective_msaa_mode(MsaaMode::X2), MsaaMode::X2);
    }

    #[test]
    fn uniform_tables_are_inverse() {
        let layout = SampleLayout::for_mode(SamplePositionProvider::FixedGrid, MsaaMode::X2).unwrap();
        let uniform = layout.to_uniform();
        for (i, entry) in uniform.low_res_to_full.iter().enumerate() {
            let slot = (entry[0] * 2 + entry[1]) as usize;
            assert_eq!(uniform.full_to_low_res[slot][0], i as u32);
        }
        assert_eq!(uniform.counts[0], 2);
        assert_eq!(uniform.counts[1], 8);
    }

    #[test]
    fn programmable_request_is_ignored_without_hardware() {
        let layouts = caps(0b1_1111, 0b1_1111).sample_layouts(true).unwrap();
        let standard = SampleLayout::for_mode(SamplePositionProvider::FixedGrid, MsaaMode::X2).unwrap();
        assert_eq!(layouts[MsaaMode::X2], standard);
    }
}
