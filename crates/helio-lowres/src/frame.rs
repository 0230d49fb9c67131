//! Which passes do work this frame
//!
//! Every pass stays registered in the graph; `FramePlan` tells each one whether
//! it has anything to do given the settings snapshot and the live particle count.

use crate::settings::{FrameSettings, LowResMode, MsaaMode};

/// Where particles are rendered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParticleTarget {
    /// Straight into the full-res scene color
    FullRes,
    /// Single-sample half-res buffer, upsampled by nearest depth
    LowRes,
    /// Half-res buffer with 4x the full-res sample count
    LowResMsaa,
}

/// How the low-res layer returns to full resolution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeStrategy {
    Msaa,
    NearestDepth,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramePlan {
    pub msaa_mode: MsaaMode,
    pub shadows: bool,
    pub particles: Option<ParticleTarget>,
    pub depth_downscale: bool,
    pub low_res_resolve: bool,
    pub composite: Option<CompositeStrategy>,
}

impl FramePlan {
    pub fn new(settings: &FrameSettings, particle_count: u32) -> Self {
        let particles = if particle_count == 0 {
            None
        } else if !settings.low_res.enabled {
            Some(ParticleTarget::FullRes)
        } else {
            match settings.low_res.mode {
                LowResMode::Msaa => Some(ParticleTarget::LowResMsaa),
                LowResMode::NearestDepth => Some(ParticleTarget::LowRes),
            }
        };

        let composite = match particles {
            Some(ParticleTarget::LowResMsaa) => Some(CompositeStrategy::Msaa),
            Some(ParticleTarget::LowRes) => Some(CompositeStrategy::NearestDepth),
            Some(ParticleTarget::FullRes) | None => None,
        };

        Self {
            msaa_mode: settings.anti_aliasing.msaa_mode,
            shadows: settings.sun.enabled,
            particles,
            depth_downscale: composite.is_some(),
            low_res_resolve: composite == Some(CompositeStrategy::Msaa),
            composite,
        }
    }

    /// Particles go through the half-res path
    pub fn uses_low_res(&self) -> bool {
        self.composite.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(enabled: bool, mode: LowResMode, msaa: MsaaMode) -> FrameSettings {
        let mut s = FrameSettings::default();
        s.low_res.enabled = enabled;
        s.low_res.mode = mode;
        s.anti_aliasing.msaa_mode = msaa;
        s
    }

    #[test]
    fn no_particles_means_no_low_res_work() {
        let s = settings(true, LowResMode::NearestDepth, MsaaMode::None);
        let plan = FramePlan::new(&s, 0);
        assert_eq!(plan.particles, None);
        assert!(!plan.depth_downscale);
        assert!(!plan.low_res_resolve);
        assert_eq!(plan.composite, None);
        assert!(!plan.uses_low_res());
    }

    #[test]
    fn msaa_mode_runs_the_full_low_res_chain() {
        let plan = FramePlan::new(&settings(true, LowResMode::Msaa, MsaaMode::X2), 1024);
        assert_eq!(plan.particles, Some(ParticleTarget::LowResMsaa));
        assert!(plan.depth_downscale && plan.low_res_resolve);
        assert_eq!(plan.composite, Some(CompositeStrategy::Msaa));
        assert_eq!(plan.msaa_mode, MsaaMode::X2);
    }

    #[test]
    fn nearest_depth_skips_the_resolve() {
        let plan = FramePlan::new(&settings(true, LowResMode::NearestDepth, MsaaMode::None), 1024);
        assert_eq!(plan.particles, Some(ParticleTarget::LowRes));
        assert!(plan.depth_downscale);
        assert!(!plan.low_res_resolve);
        assert_eq!(plan.composite, Some(CompositeStrategy::NearestDepth));
    }

    #[test]
    fn disabled_low_res_draws_at_full_res() {
        let plan = FramePlan::new(&settings(false, LowResMode::Msaa, MsaaMode::X2), 1024);
        assert_eq!(plan.particles, Some(ParticleTarget::FullRes));
        assert!(!plan.uses_low_res());
        assert!(!plan.depth_downscale);
    }

    #[test]
    fn sun_toggle_controls_shadows() {
        let mut s = FrameSettings::default();
        assert!(FramePlan::new(&s, 0).shadows);
        s.sun.enabled = false;
        assert!(!FramePlan::new(&s, 0).shadows);
    }
}
