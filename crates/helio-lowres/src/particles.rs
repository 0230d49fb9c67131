//! CPU particle system
//!
//! Particles are regenerated from a fixed seed every update, so the cloud is
//! identical from frame to frame apart from its rotation about the emitter.

use glam::{Mat4, Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::settings::{wrap_radians, ParticleSettings, MAX_PARTICLE_BATCHES};

/// Particles are emitted in batches of this size
pub const PARTICLE_BATCH: u32 = 1024;

/// Capacity of the particle buffer
pub const MAX_PARTICLES: u32 = MAX_PARTICLE_BATCHES * PARTICLE_BATCH;

/// One particle as uploaded to the GPU - must match `ParticleInput` in particles.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuParticle {
    pub position: [f32; 3],
    pub size: f32,
    pub opacity: f32,
    /// Unused for aging; carried for the shader
    pub lifetime: f32,
    pub _pad: [f32; 2],
}

/// Uniform sample inside the unit ball from four uniform draws in [0, 1).
///
/// The first three pick a direction by normalizing a point in the [-1, 1]³ cube,
/// the fourth picks the radius through the inverse CDF `r = u^(1/3)`.
pub fn sample_sphere(u1: f32, u2: f32, u3: f32, u4: f32) -> Vec3 {
    let dir = Vec3::new(u1 * 2.0 - 1.0, u2 * 2.0 - 1.0, u3 * 2.0 - 1.0)
        .try_normalize()
        .unwrap_or(Vec3::Y);
    dir * u4.cbrt()
}

#[derive(Default)]
pub struct ParticleSystem {
    particles: Vec<GpuParticle>,
    /// Accumulated rotation about +Y (radians)
    rotation: f32,
    sort_scratch: Vec<(f32, GpuParticle)>,
}

impl ParticleSystem {
    pub fn new() -> Self {
        Self {
            particles: Vec::with_capacity(MAX_PARTICLES as usize),
            rotation: 0.0,
            sort_scratch: Vec::new(),
        }
    }

    /// Regenerate the particle set for this frame, sorting if requested
    pub fn update(&mut self, settings: &ParticleSettings, delta_time: f32, view: &Mat4) {
        self.rotation = wrap_radians(self.rotation + delta_time * settings.rotation_speed);
        let rotation = Quat::from_rotation_y(self.rotation);

        let count = (settings.batches.min(MAX_PARTICLE_BATCHES) * PARTICLE_BATCH) as usize;
        let mut rng = StdRng::seed_from_u64(0);

        self.particles.clear();
        self.particles.extend((0..count).map(|_| {
            let offset = sample_sphere(rng.gen(), rng.gen(), rng.gen(), rng.gen());
            let position = settings.emit_center + rotation * offset * settings.emit_radius;
            GpuParticle {
                position: position.to_array(),
                opacity: 0.5 + rng.gen::<f32>() * 0.5,
                size: 0.25 + rng.gen::<f32>() * 0.25,
                lifetime: 0.0,
                _pad: [0.0; 2],
            }
        }));

        if settings.sort {
            self.sort_back_to_front(view);
        }
    }

    /// Stable sort by decreasing view depth
    pub fn sort_back_to_front(&mut self, view: &Mat4) {
        self.sort_scratch.clear();
        self.sort_scratch.extend(self.particles.iter().map(|p| {
            let depth = -view.transform_point3(Vec3::from_array(p.position)).z;
            (depth, *p)
        }));
        self.sort_scratch.sort_by(|a, b| b.0.total_cmp(&a.0));

        self.particles.clear();
        self.particles.extend(self.sort_scratch.iter().map(|(_, p)| *p));
    }

    pub fn particles(&self) -> &[GpuParticle] {
        &self.particles
    }

    pub fn count(&self) -> u32 {
        self.particles.len() as u32
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_from(eye: Vec3) -> Mat4 {
        Mat4::look_at_rh(eye, Vec3::new(0.0, 2.5, 0.0), Vec3::Y)
    }

    fn view_depths(system: &ParticleSystem, view: &Mat4) -> Vec<f32> {
        system
            .particles()
            .iter()
            .map(|p| -view.transform_point3(Vec3::from_array(p.position)).z)
            .collect()
    }

    #[test]
    fn gpu_particle_is_32_bytes() {
        assert_eq!(std::mem::size_of::<GpuParticle>(), 32);
    }

    #[test]
    fn count_follows_batches() {
        let mut system = ParticleSystem::new();
        let view = view_from(Vec3::new(0.0, 2.5, -20.0));
        for batches in [0, 1, 8, 32] {
            let settings = ParticleSettings { batches, ..ParticleSettings::default() };
            system.update(&settings, 0.016, &view);
            assert_eq!(system.count(), batches * PARTICLE_BATCH);
        }
        assert_eq!(MAX_PARTICLES, 32768);
    }

    #[test]
    fn oversized_batch_count_is_capped() {
        let mut system = ParticleSystem::new();
        let view = view_from(Vec3::new(0.0, 2.5, -20.0));
        let settings = ParticleSettings { batches: u32::MAX, ..ParticleSettings::default() };
        system.update(&settings, 0.016, &view);
        assert_eq!(system.count(), MAX_PARTICLES);
    }

    #[test]
    fn particles_stay_inside_emit_radius() {
        let mut system = ParticleSystem::new();
        let view = view_from(Vec3::new(0.0, 2.5, -20.0));
        let settings = ParticleSettings {
            batches: 4,
            emit_radius: 3.0,
            emit_center: Vec3::new(1.0, 4.0, -2.0),
            ..ParticleSettings::default()
        };
        for _ in 0..3 {
            system.update(&settings, 0.25, &view);
            for p in system.particles() {
                let d = Vec3::from_array(p.position).distance(settings.emit_center);
                assert!(d <= settings.emit_radius * (1.0 + 1e-5), "{d}");
                assert!((0.5..=1.0).contains(&p.opacity));
                assert!((0.25..=0.5).contains(&p.size));
            }
        }
    }

    #[test]
    fn sorted_particles_go_back_to_front() {
        let mut system = ParticleSystem::new();
        let settings = ParticleSettings { batches: 2, ..ParticleSettings::default() };
        for eye in [Vec3::new(0.0, 2.5, -20.0), Vec3::new(15.0, 10.0, 5.0), Vec3::new(-3.0, 0.5, 8.0)] {
            let view = view_from(eye);
            system.update(&settings, 0.016, &view);
            let depths = view_depths(&system, &view);
            assert!(depths.windows(2).all(|w| w[0] >= w[1]));
        }
    }

    #[test]
    fn sorting_is_idempotent() {
        let mut system = ParticleSystem::new();
        let view = view_from(Vec3::new(4.0, 6.0, -12.0));
        system.update(&ParticleSettings::default(), 0.016, &view);
        let once = system.particles().to_vec();
        system.sort_back_to_front(&view);
        assert_eq!(system.particles(), once.as_slice());
    }

    #[test]
    fn generation_is_deterministic_apart_from_rotation() {
        let view = view_from(Vec3::new(0.0, 2.5, -20.0));
        let settings = ParticleSettings { sort: false, rotation_speed: 0.0, ..ParticleSettings::default() };
        let mut a = ParticleSystem::new();
        let mut b = ParticleSystem::new();
        a.update(&settings, 0.1, &view);
        b.update(&settings, 0.5, &view);
        assert_eq!(a.particles(), b.particles());
    }

    #[test]
    fn rotation_accumulates_and_wraps() {
        let view = view_from(Vec3::new(0.0, 2.5, -20.0));
        let settings = ParticleSettings { batches: 0, rotation_speed: 1.0, ..ParticleSettings::default() };
        let mut system = ParticleSystem::new();
        system.update(&settings, 1.0, &view);
        system.update(&settings, 0.5, &view);
        assert!((system.rotation() - 1.5).abs() < 1e-6);
        system.update(&settings, 6.0, &view);
        assert!(system.rotation() < std::f32::consts::TAU);
    }

    #[test]
    fn sphere_sample_handles_degenerate_direction() {
        assert_eq!(sample_sphere(0.5, 0.5, 0.5, 1.0), Vec3::Y);
        assert!(sample_sphere(0.9, 0.1, 0.4, 0.0).length() < 1e-6);
    }
}
