//! Deferred rendering pipeline
//!
//! One frame runs these stages in a fixed order, each gated by a
//! [`PipelineFlags`] switch:
//! 1. Skybox - environment cubemap around the eye
//! 2. Geometry - surface attributes into the geometry buffer
//! 3. Ambient occlusion - SSAO estimate plus a three step blur
//! 4. Lighting - one full-screen draw per visible light, additive after the first
//! 5. Reflections - baked reflection probes, alpha blended
//! 6. Volumetric - sun in-scattering, alpha blended
//! 7. Debug - overlays that no other stage reads
//!
//! The bakes live in [`crate::bake`]; [`Renderer`] owns their targets and
//! results.

pub mod debug;
pub mod forward_pass;
pub mod frame_resources;
pub mod gbuffer_pass;
pub mod lighting_pass;
pub mod reflection_pass;
pub mod shaders;
pub mod skybox;
pub mod ssao;
pub mod state;
pub mod traversal;
pub mod volumetric;

pub use debug::DebugOverlay;
pub use frame_resources::FrameResources;
pub use gbuffer_pass::GBufferPass;
pub use lighting_pass::{IrradianceBinding, LightingInputs, LightingPass};
pub use reflection_pass::ReflectionPass;
pub use skybox::SkyboxPass;
pub use ssao::{SsaoPass, SsaoSettings};
pub use traversal::{render_scene, DrawContext, RenderMode, TraversalStats};
pub use volumetric::{VolumetricPass, VolumetricSettings};

use std::path::Path;

use thiserror::Error;

use crate::backend::{BackendError, ClearValues, GraphicsBackend, TextureHandle, Viewport};
use crate::bake::{
    load_probes, save_probes, BakeError, IrradianceBaker, IrradianceGrid, IrradianceGridDesc, ProbeFileError,
    ReflectionBaker, ReflectionProbe,
};
use crate::scene::{Camera, RenderView, Scene};
use crate::shadow::{self, ShadowSettings};
use crate::RendererConfig;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Bake(#[from] BakeError),
    #[error(transparent)]
    ProbeFile(#[from] ProbeFileError),
}

pub type RendererResult<T> = Result<T, RendererError>;

/// Stage enable switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineFlags {
    pub skybox: bool,
    pub ao: bool,
    pub lighting: bool,
    pub reflections: bool,
    pub volumetric: bool,
    /// Re-render every shadow map at the start of each frame
    pub realtime_shadows: bool,
    pub show_gbuffers: bool,
    pub show_ao: bool,
    pub show_probes: bool,
    pub show_shadow_maps: bool,
}

impl Default for PipelineFlags {
    fn default() -> Self {
        Self {
            skybox: true,
            ao: true,
            lighting: true,
            reflections: true,
            volumetric: false,
            realtime_shadows: true,
            show_gbuffers: false,
            show_ao: false,
            show_probes: false,
            show_shadow_maps: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Skybox,
    Geometry,
    AmbientOcclusion,
    Lighting,
    Reflections,
    Volumetric,
    Debug,
}

impl Stage {
    /// Execution order within a frame
    pub const ORDER: [Stage; 7] = [
        Stage::Skybox,
        Stage::Geometry,
        Stage::AmbientOcclusion,
        Stage::Lighting,
        Stage::Reflections,
        Stage::Volumetric,
        Stage::Debug,
    ];
}

/// How the main view is shaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Deferred,
    /// Per-mesh forward lighting, no geometry buffer
    Forward,
}

/// What one call to [`Renderer::render_frame`] did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Stages that ran, in order
    pub stages: Vec<Stage>,
    pub shadow_maps: usize,
    pub geometry: TraversalStats,
    pub light_draws: usize,
}

/// Frame orchestration plus the baked lighting it consumes
pub struct Renderer {
    config: RendererConfig,
    view_mode: ViewMode,
    resources: FrameResources,
    gbuffer_pass: GBufferPass,
    ssao_pass: SsaoPass,
    lighting_pass: LightingPass,
    skybox_pass: SkyboxPass,
    reflection_pass: ReflectionPass,
    volumetric_pass: VolumetricPass,
    debug: DebugOverlay,
    reflection_probes: Vec<ReflectionProbe>,
    irradiance: Option<(IrradianceGrid, IrradianceBinding)>,
}

impl Renderer {
    /// Compile the built-in shaders on `backend`. A shader that fails only
    /// disables the stages using it.
    pub fn new<B: GraphicsBackend>(backend: &mut B, config: RendererConfig) -> Self {
        let compiled = shaders::compile_builtin(backend);
        log::info!(
            "Renderer ready on {} ({}x{}, {} shaders)",
            backend.name(),
            config.width,
            config.height,
            compiled
        );
        let reflection_probes = config
            .reflection_probe_positions
            .iter()
            .map(|p| ReflectionProbe::new(*p, config.reflection_resolution))
            .collect();
        Self {
            resources: FrameResources::new(config.width, config.height),
            ssao_pass: SsaoPass::new(config.ssao_settings()),
            volumetric_pass: VolumetricPass::new(config.volumetric),
            view_mode: ViewMode::default(),
            gbuffer_pass: GBufferPass::new(),
            lighting_pass: LightingPass::new(),
            skybox_pass: SkyboxPass::new(),
            reflection_pass: ReflectionPass::new(),
            debug: DebugOverlay::new(),
            reflection_probes,
            irradiance: None,
            config,
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn flags(&self) -> PipelineFlags {
        self.config.flags
    }

    pub fn flags_mut(&mut self) -> &mut PipelineFlags {
        &mut self.config.flags
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) {
        self.view_mode = mode;
    }

    pub fn resources(&self) -> &FrameResources {
        &self.resources
    }

    pub fn reflection_probes(&self) -> &[ReflectionProbe] {
        &self.reflection_probes
    }

    pub fn irradiance(&self) -> Option<&IrradianceGrid> {
        self.irradiance.as_ref().map(|(grid, _)| grid)
    }

    fn shadow_settings(&self) -> ShadowSettings {
        ShadowSettings {
            resolution: self.config.shadow_resolution,
            cascade_atlas_resolution: self.config.cascade_atlas_resolution,
            cascade_size: self.config.cascade_size,
        }
    }

    /// Re-render every light's shadow map for `camera`
    pub fn update_shadows<B: GraphicsBackend>(&mut self, backend: &mut B, scene: &mut Scene, camera: &Camera) -> usize {
        shadow::update_shadows(backend, scene, &camera.render_view(), &self.shadow_settings())
    }

    /// Resize the surface and the screen-sized targets
    pub fn resize<B: GraphicsBackend>(&mut self, backend: &mut B, width: u32, height: u32) {
        backend.resize_surface(width, height);
        self.resources.resize(backend, width, height);
        self.config.width = width;
        self.config.height = height;
    }

    /// Render one frame of `scene` seen through `camera` into the screen
    pub fn render_frame<B: GraphicsBackend>(&mut self, backend: &mut B, scene: &mut Scene, camera: &Camera) -> FrameReport {
        let view = camera.render_view();
        let flags = self.config.flags;
        let mut report = FrameReport::default();

        if let Err(e) = scene.assets.upload_pending(backend) {
            log::warn!("Asset upload failed: {}", e);
        }
        if flags.realtime_shadows {
            report.shadow_maps = shadow::update_shadows(backend, scene, &view, &self.shadow_settings());
        }
        let (width, height) = backend.surface_size();
        self.resources.resize(backend, width, height);

        backend.bind_framebuffer(None);
        backend.set_viewport(Viewport::full(width, height));
        backend.clear(ClearValues::all(self.config.clear_color));

        let scene: &Scene = scene;
        if flags.skybox {
            self.draw_skybox(backend, scene, &view, &mut report);
        }
        match self.view_mode {
            ViewMode::Deferred => self.render_deferred(backend, scene, &view, &mut report),
            ViewMode::Forward => {
                backend.clear(ClearValues::depth_only());
                report.geometry = forward_pass::draw_scene(backend, scene, &view);
                report.stages.push(Stage::Geometry);
            }
        }
        log::debug!("Frame stages: {:?}", report.stages);
        report
    }

    fn draw_skybox<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        scene: &Scene,
        view: &RenderView,
        report: &mut FrameReport,
    ) {
        let Some(environment) = scene.environment else {
            return;
        };
        match self.resources.sphere(backend) {
            Ok(sphere) => {
                if self.skybox_pass.execute(backend, view, environment, &sphere) {
                    report.stages.push(Stage::Skybox);
                }
            }
            Err(e) => log::warn!("{}: {}", self.skybox_pass.name(), e),
        }
    }

    fn render_deferred<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        scene: &Scene,
        view: &RenderView,
        report: &mut FrameReport,
    ) {
        let flags = self.config.flags;
        let (width, height) = backend.surface_size();
        let gbuffer = match self.resources.gbuffer(backend) {
            Ok(gbuffer) => gbuffer,
            Err(e) => {
                log::warn!("Geometry buffer unavailable, skipping deferred stages: {}", e);
                return;
            }
        };
        if let Some(stats) = self.gbuffer_pass.execute(backend, scene, view, &gbuffer) {
            report.geometry = stats;
            report.stages.push(Stage::Geometry);
        }

        let mut ambient_occlusion: Option<TextureHandle> = None;
        if flags.ao && scene.ambient_occlusion_enabled {
            match self.resources.ao(backend) {
                Ok(ao) => {
                    ambient_occlusion = self
                        .ssao_pass
                        .execute(backend, view, &gbuffer, &ao.framebuffer, ao.blur);
                    if ambient_occlusion.is_some() {
                        report.stages.push(Stage::AmbientOcclusion);
                    }
                }
                Err(e) => log::warn!("{}: {}", self.ssao_pass.name(), e),
            }
        }

        backend.bind_framebuffer(None);
        backend.set_viewport(Viewport::full(width, height));

        if flags.lighting {
            let inputs = LightingInputs {
                gbuffer: &gbuffer,
                ambient_occlusion,
                irradiance: self.irradiance.as_ref().map(|(_, binding)| binding),
            };
            report.light_draws = self.lighting_pass.execute(backend, scene, view, &inputs);
            if report.light_draws > 0 {
                report.stages.push(Stage::Lighting);
            }
        }
        if flags.reflections
            && self
                .reflection_pass
                .execute(backend, view, &gbuffer, &self.reflection_probes, scene.environment)
        {
            report.stages.push(Stage::Reflections);
        }
        if flags.volumetric && self.volumetric_pass.execute(backend, scene, view, &gbuffer) {
            report.stages.push(Stage::Volumetric);
        }

        if self.draw_debug(backend, scene, view, &gbuffer, ambient_occlusion) {
            report.stages.push(Stage::Debug);
        }
    }

    fn draw_debug<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        scene: &Scene,
        view: &RenderView,
        gbuffer: &crate::backend::Framebuffer,
        ambient_occlusion: Option<TextureHandle>,
    ) -> bool {
        let flags = self.config.flags;
        let mut drawn = false;
        if flags.show_gbuffers {
            drawn |= self.debug.gbuffer_grid(backend, gbuffer, view);
        }
        if flags.show_ao {
            if let Some(ao) = ambient_occlusion {
                self.debug.ambient_occlusion(backend, ao);
                drawn = true;
            }
        }
        if flags.show_shadow_maps {
            drawn |= self.debug.shadow_maps(backend, scene) > 0;
            drawn |= self.debug.light_cameras(backend, scene) > 0;
        }
        if flags.show_probes {
            if let (Some((grid, _)), Ok(sphere)) = (self.irradiance.as_ref(), self.resources.sphere(backend)) {
                drawn |= self.debug.probes(backend, view, grid, &sphere) > 0;
            }
        }
        drawn
    }

    /// Bake the irradiance grid described by `desc` and make it current.
    /// The previous grid stays in place if the bake fails.
    pub fn bake_irradiance<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        scene: &mut Scene,
        desc: IrradianceGridDesc,
    ) -> RendererResult<&IrradianceGrid> {
        scene.assets.upload_pending(backend)?;
        let target = self
            .resources
            .irradiance_target(backend, self.config.irradiance_resolution)?;
        let grid = IrradianceBaker::new(desc)
            .with_clear_color(self.config.clear_color)
            .bake(backend, scene, &target)?;
        self.set_irradiance(backend, grid)?;
        self.irradiance()
            .ok_or(RendererError::Bake(BakeError::MissingTarget("irradiance grid")))
    }

    /// Bake every reflection probe in place
    pub fn bake_reflections<B: GraphicsBackend>(&mut self, backend: &mut B, scene: &mut Scene) -> RendererResult<usize> {
        scene.assets.upload_pending(backend)?;
        let target = self
            .resources
            .reflection_target(backend, self.config.reflection_resolution)?;
        let baker = ReflectionBaker {
            clear_color: self.config.clear_color,
            ..Default::default()
        };
        Ok(baker.bake(backend, scene, &mut self.reflection_probes, &target)?)
    }

    /// Upload `grid` and use it for indirect light from now on
    pub fn set_irradiance<B: GraphicsBackend>(&mut self, backend: &mut B, grid: IrradianceGrid) -> RendererResult<()> {
        let texture = grid.upload(backend)?;
        if let Some((_, old)) = self.irradiance.take() {
            backend.destroy_texture(old.texture);
        }
        let binding = IrradianceBinding {
            texture,
            layout: grid.layout,
        };
        self.irradiance = Some((grid, binding));
        Ok(())
    }

    /// Write the current grid to `path`. `Ok(false)` when nothing is baked.
    pub fn save_irradiance(&self, path: impl AsRef<Path>) -> RendererResult<bool> {
        let Some(grid) = self.irradiance() else {
            return Ok(false);
        };
        save_probes(grid, path)?;
        Ok(true)
    }

    /// Replace the current grid with one read from `path`. On failure the
    /// current grid is kept and the caller may bake instead.
    pub fn load_irradiance<B: GraphicsBackend>(&mut self, backend: &mut B, path: impl AsRef<Path>) -> RendererResult<()> {
        let grid = load_probes(path)?;
        self.set_irradiance(backend, grid)
    }

    /// Free everything the renderer created
    pub fn release<B: GraphicsBackend>(&mut self, backend: &mut B) {
        self.resources.release(backend);
        for probe in &mut self.reflection_probes {
            probe.release(backend);
        }
        if let Some((_, binding)) = self.irradiance.take() {
            backend.destroy_texture(binding.texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;
    use crate::backend::{BlendMode, TextureDescriptor, TextureFormat};
    use crate::lighting::DeferredLightProgram;
    use crate::resources::{Material, Mesh};
    use crate::scene::{Light, Prefab, PrefabInstance};
    use glam::{Mat4, Vec3};

    fn cube_scene() -> Scene {
        let mut scene = Scene::new();
        let mesh = scene.assets.add_mesh(Mesh::cube());
        let material = scene.assets.add_material(Material::default());
        let root = scene.assets.node("cube", mesh, material);
        scene.add_prefab(PrefabInstance::new("cube", Prefab::new("cube", root), Mat4::IDENTITY));
        scene
    }

    fn renderer(backend: &mut HeadlessBackend) -> Renderer {
        let (width, height) = backend.surface_size();
        Renderer::new(backend, RendererConfig::default().with_size(width, height))
    }

    fn position(stages: &[Stage], stage: Stage) -> usize {
        stages.iter().position(|s| *s == stage).unwrap()
    }

    #[test]
    fn test_stages_run_in_fixed_order() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut renderer = renderer(&mut backend);
        renderer.flags_mut().volumetric = true;
        let mut scene = cube_scene();
        let sun = scene.add_light(Light::directional("sun", Vec3::new(0.0, 100.0, 50.0)));
        scene.set_sun(sun);
        let env = backend
            .create_texture(&TextureDescriptor::cube("sky", 4, TextureFormat::Rgba16Float))
            .unwrap();
        scene.set_environment(Some(env));

        let report = renderer.render_frame(&mut backend, &mut scene, &Camera::default());
        assert_eq!(report.shadow_maps, 1);
        assert_eq!(report.light_draws, 1);
        let stages = &report.stages;
        assert_eq!(stages.len(), 6);
        for pair in stages.windows(2) {
            let order = |s: Stage| Stage::ORDER.iter().position(|o| *o == s).unwrap();
            assert!(order(pair[0]) < order(pair[1]));
        }
        assert!(position(stages, Stage::Geometry) < position(stages, Stage::Lighting));
    }

    #[test]
    fn test_disabled_stages_are_skipped() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut renderer = renderer(&mut backend);
        *renderer.flags_mut() = PipelineFlags {
            ao: false,
            reflections: false,
            ..PipelineFlags::default()
        };
        let mut scene = cube_scene();
        let report = renderer.render_frame(&mut backend, &mut scene, &Camera::default());
        assert_eq!(report.stages, vec![Stage::Geometry, Stage::Lighting]);
        assert_eq!(report.geometry.drawn, 1);
        // Zero lights still produce one ambient draw
        assert_eq!(
            backend.fullscreen_draws(),
            vec![(Some(shaders::DEFERRED_LIGHT.to_string()), BlendMode::Disabled)]
        );
    }

    #[test]
    fn test_zero_light_frame_shows_ambient() {
        let mut backend = HeadlessBackend::new(8, 8);
        backend.register_program(shaders::DEFERRED_LIGHT, DeferredLightProgram);
        let mut renderer = renderer(&mut backend);
        renderer.flags_mut().ao = false;
        let mut scene = cube_scene();
        renderer.render_frame(&mut backend, &mut scene, &Camera::default());
        // Mesh draws are recorded only, so the geometry buffer stays at its cleared far depth
        let screen = backend.screen().unwrap();
        assert_eq!(screen.get_pixel(4, 4).0, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_forward_mode_skips_geometry_buffer() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut renderer = renderer(&mut backend);
        renderer.set_view_mode(ViewMode::Forward);
        let mut scene = cube_scene();
        scene.add_light(Light::point("lamp", Vec3::new(0.0, 3.0, 0.0), 20.0));
        let report = renderer.render_frame(&mut backend, &mut scene, &Camera::default());
        assert_eq!(report.stages, vec![Stage::Geometry]);
        assert_eq!(backend.mesh_draws_with(shaders::FORWARD_LIGHT), 1);
        assert_eq!(backend.mesh_draws_with(shaders::GBUFFER), 0);
    }

    #[test]
    fn test_resize_recreates_gbuffer() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut renderer = renderer(&mut backend);
        let mut scene = cube_scene();
        renderer.render_frame(&mut backend, &mut scene, &Camera::default());
        renderer.resize(&mut backend, 16, 4);
        renderer.render_frame(&mut backend, &mut scene, &Camera::default());
        assert_eq!(renderer.resources().size(), (16, 4));
        assert_eq!(renderer.config().width, 16);
    }

    #[test]
    fn test_irradiance_bake_is_used_by_lighting() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut renderer = RendererConfig::default()
            .with_size(8, 8)
            .with_irradiance_resolution(4)
            .build(&mut backend);
        let mut scene = cube_scene();
        assert!(!renderer.save_irradiance(std::env::temp_dir().join("unused.probes")).unwrap());

        let desc = IrradianceGridDesc::new(Vec3::ZERO, Vec3::splat(10.0), glam::UVec3::splat(2));
        let probes = renderer.bake_irradiance(&mut backend, &mut scene, desc).unwrap().probes().len();
        assert_eq!(probes, 8);
        renderer.render_frame(&mut backend, &mut scene, &Camera::default());
        let uniforms = backend.uniforms_of(shaders::DEFERRED_LIGHT).unwrap();
        assert_eq!(uniforms["u_irr_enabled"].as_bool(), Some(true));
    }

    #[test]
    fn test_reflection_bake_marks_probes() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut renderer = RendererConfig::default()
            .with_size(8, 8)
            .with_reflection_resolution(8)
            .build(&mut backend);
        let mut scene = cube_scene();
        assert_eq!(renderer.bake_reflections(&mut backend, &mut scene).unwrap(), 2);
        assert!(renderer.reflection_probes().iter().all(ReflectionProbe::is_baked));
    }

    #[test]
    fn test_missing_irradiance_file_keeps_state() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut renderer = renderer(&mut backend);
        let missing = std::env::temp_dir().join("deferred-probe-renderer-missing.probes");
        let _ = std::fs::remove_file(&missing);
        assert!(matches!(
            renderer.load_irradiance(&mut backend, &missing),
            Err(RendererError::ProbeFile(_))
        ));
        assert!(renderer.irradiance().is_none());
    }
}
