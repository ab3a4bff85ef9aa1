//! Deferred Probe Renderer - deferred lighting with baked light probes
//!
//! The renderer draws through the [`backend::GraphicsBackend`] trait, so the
//! same pipeline runs on a GPU backend supplied by the application or on the
//! in-memory [`backend::headless::HeadlessBackend`] used by tests and offline
//! tools.
//!
//! # Features
//! - Deferred pipeline: skybox, geometry buffer, SSAO, multi-light
//!   accumulation, probe reflections and volumetric sun light
//! - Spot, point and directional shadow maps, with texel-snapped cascades
//!   for directional lights
//! - Offline irradiance probe grid baked to spherical harmonics and stored in
//!   a compact binary file
//! - Offline reflection probe cubemaps with full mip chains
//! - Forward view mode, also used to render the bake views

pub mod backend;
pub mod bake;
pub mod lighting;
pub mod pipeline;
pub mod resources;
pub mod scene;
pub mod shadow;

use glam::{Vec3, Vec4};

pub use backend::headless::HeadlessBackend;
pub use backend::GraphicsBackend;
pub use bake::{IrradianceGrid, IrradianceGridDesc, ReflectionProbe};
pub use pipeline::{FrameReport, PipelineFlags, Renderer, RendererError, Stage, ViewMode};
pub use scene::{Camera, Light, LightKind, Scene};

/// Configuration for creating a [`Renderer`]
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Initial viewport width
    pub width: u32,
    /// Initial viewport height
    pub height: u32,
    /// Spot and point shadow map size
    pub shadow_resolution: u32,
    /// Size of the atlas holding the four directional cascades
    pub cascade_atlas_resolution: u32,
    /// Directional shadow half extent for lights without their own
    pub cascade_size: f32,
    /// Face size of the irradiance bake views
    pub irradiance_resolution: u32,
    /// Face size of each reflection probe cubemap
    pub reflection_resolution: u32,
    pub reflection_probe_positions: Vec<Vec3>,
    pub ao_kernel_size: usize,
    pub ao_radius: f32,
    pub ao_seed: u64,
    pub volumetric: pipeline::VolumetricSettings,
    pub clear_color: Vec4,
    pub flags: PipelineFlags,
}

impl Default for RendererConfig {
    fn default() -> Self {
        let ssao = pipeline::SsaoSettings::default();
        Self {
            width: 1280,
            height: 720,
            shadow_resolution: shadow::SHADOW_MAP_RESOLUTION,
            cascade_atlas_resolution: shadow::SHADOW_MAP_RESOLUTION * 2,
            cascade_size: 256.0,
            irradiance_resolution: 64,
            reflection_resolution: 256,
            reflection_probe_positions: vec![Vec3::new(40.0, 40.0, -50.0), Vec3::new(120.0, 40.0, 0.0)],
            ao_kernel_size: ssao.kernel_size,
            ao_radius: ssao.radius,
            ao_seed: ssao.seed,
            volumetric: pipeline::VolumetricSettings::default(),
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            flags: PipelineFlags::default(),
        }
    }
}

impl RendererConfig {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_shadow_resolution(mut self, resolution: u32) -> Self {
        self.shadow_resolution = resolution;
        self
    }

    pub fn with_cascades(mut self, atlas_resolution: u32, cascade_size: f32) -> Self {
        self.cascade_atlas_resolution = atlas_resolution;
        self.cascade_size = cascade_size;
        self
    }

    pub fn with_irradiance_resolution(mut self, resolution: u32) -> Self {
        self.irradiance_resolution = resolution;
        self
    }

    pub fn with_reflection_resolution(mut self, resolution: u32) -> Self {
        self.reflection_resolution = resolution;
        self
    }

    pub fn with_reflection_probes(mut self, positions: Vec<Vec3>) -> Self {
        self.reflection_probe_positions = positions;
        self
    }

    pub fn with_ao(mut self, kernel_size: usize, radius: f32, seed: u64) -> Self {
        self.ao_kernel_size = kernel_size;
        self.ao_radius = radius;
        self.ao_seed = seed;
        self
    }

    pub fn with_clear_color(mut self, color: Vec4) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_flags(mut self, flags: PipelineFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn ssao_settings(&self) -> pipeline::SsaoSettings {
        pipeline::SsaoSettings {
            kernel_size: self.ao_kernel_size,
            radius: self.ao_radius,
            seed: self.ao_seed,
            ..Default::default()
        }
    }

    /// Create a [`Renderer`] on `backend`
    pub fn build<B: GraphicsBackend>(self, backend: &mut B) -> Renderer {
        Renderer::new(backend, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RendererConfig::default();
        assert_eq!(config.shadow_resolution, 1024);
        assert_eq!(config.irradiance_resolution, 64);
        assert_eq!(config.reflection_resolution, 256);
        assert_eq!(config.ao_kernel_size, 64);
        assert_eq!(config.reflection_probe_positions.len(), 2);
    }

    #[test]
    fn test_builder_chain() {
        let config = RendererConfig::default()
            .with_size(320, 240)
            .with_ao(16, 2.0, 7)
            .with_cascades(512, 64.0)
            .with_reflection_probes(vec![Vec3::ZERO])
            .with_flags(PipelineFlags {
                volumetric: true,
                ..Default::default()
            });
        assert_eq!((config.width, config.height), (320, 240));
        assert_eq!(config.reflection_probe_positions, vec![Vec3::ZERO]);
        assert!(config.flags.volumetric && config.flags.lighting);
        let ssao = config.ssao_settings();
        assert_eq!((ssao.kernel_size, ssao.radius, ssao.seed), (16, 2.0, 7));
        assert_eq!(config.cascade_atlas_resolution, 512);
    }
}
