//! Render targets owned by the pipeline
//!
//! Everything here is created on first use and reused every frame. Only a
//! viewport resize or [`FrameResources::release`] frees anything.

use crate::backend::{
    BackendResult, Framebuffer, FramebufferDescriptor, GpuMesh, GraphicsBackend, TextureDescriptor, TextureFormat,
    TextureHandle,
};
use crate::resources::Mesh;

/// Occlusion target plus the texture the blur ping-pongs through
#[derive(Debug, Clone, PartialEq)]
pub struct AoTargets {
    pub framebuffer: Framebuffer,
    pub blur: TextureHandle,
}

#[derive(Debug, Default)]
pub struct FrameResources {
    width: u32,
    height: u32,
    gbuffer: Option<Framebuffer>,
    ao: Option<AoTargets>,
    irradiance_target: Option<Framebuffer>,
    reflection_target: Option<Framebuffer>,
    sphere: Option<GpuMesh>,
}

impl FrameResources {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Albedo, normal, metal/roughness colour targets plus depth
    pub fn gbuffer<B: GraphicsBackend>(&mut self, backend: &mut B) -> BackendResult<Framebuffer> {
        if let Some(gbuffer) = &self.gbuffer {
            return Ok(gbuffer.clone());
        }
        let gbuffer = backend.create_framebuffer(&FramebufferDescriptor::color(
            "gbuffer",
            self.width,
            self.height,
            3,
            TextureFormat::Rgba16Float,
        ))?;
        log::info!("Created {}x{} geometry buffer", self.width, self.height);
        self.gbuffer = Some(gbuffer.clone());
        Ok(gbuffer)
    }

    pub fn ao<B: GraphicsBackend>(&mut self, backend: &mut B) -> BackendResult<AoTargets> {
        if let Some(ao) = &self.ao {
            return Ok(ao.clone());
        }
        let framebuffer = backend.create_framebuffer(
            &FramebufferDescriptor::color("ssao", self.width, self.height, 1, TextureFormat::Rgba16Float).without_depth(),
        )?;
        let blur = backend.create_texture(&TextureDescriptor::new_2d(
            "ssao blur",
            self.width,
            self.height,
            TextureFormat::Rgba16Float,
        ))?;
        log::info!("Created {}x{} occlusion targets", self.width, self.height);
        let ao = AoTargets { framebuffer, blur };
        self.ao = Some(ao.clone());
        Ok(ao)
    }

    /// Square scratch target the irradiance bake renders its faces into
    pub fn irradiance_target<B: GraphicsBackend>(&mut self, backend: &mut B, size: u32) -> BackendResult<Framebuffer> {
        Self::square_target(backend, &mut self.irradiance_target, "irradiance bake", size)
    }

    /// Square target the reflection bake attaches probe faces to
    pub fn reflection_target<B: GraphicsBackend>(&mut self, backend: &mut B, size: u32) -> BackendResult<Framebuffer> {
        Self::square_target(backend, &mut self.reflection_target, "reflection bake", size)
    }

    fn square_target<B: GraphicsBackend>(
        backend: &mut B,
        slot: &mut Option<Framebuffer>,
        label: &str,
        size: u32,
    ) -> BackendResult<Framebuffer> {
        if let Some(target) = slot.as_ref().filter(|t| t.width == size) {
            return Ok(target.clone());
        }
        if let Some(stale) = slot.take() {
            backend.destroy_framebuffer(stale.handle);
        }
        let target =
            backend.create_framebuffer(&FramebufferDescriptor::color(label, size, size, 1, TextureFormat::Rgba16Float))?;
        log::info!("Created {}x{} {} target", size, size, label);
        *slot = Some(target.clone());
        Ok(target)
    }

    /// Unit sphere used by the skybox and the probe markers
    pub fn sphere<B: GraphicsBackend>(&mut self, backend: &mut B) -> BackendResult<GpuMesh> {
        if let Some(sphere) = self.sphere {
            return Ok(sphere);
        }
        let sphere = backend.upload_mesh(&Mesh::sphere(32, 16))?;
        self.sphere = Some(sphere);
        Ok(sphere)
    }

    /// Drop the screen-sized targets when the size changes. Bake targets
    /// and meshes do not depend on the viewport and are kept.
    pub fn resize<B: GraphicsBackend>(&mut self, backend: &mut B, width: u32, height: u32) -> bool {
        if (width, height) == (self.width, self.height) {
            return false;
        }
        if let Some(gbuffer) = self.gbuffer.take() {
            backend.destroy_framebuffer(gbuffer.handle);
        }
        if let Some(ao) = self.ao.take() {
            backend.destroy_framebuffer(ao.framebuffer.handle);
            backend.destroy_texture(ao.blur);
        }
        log::debug!("Frame resources resized {}x{} -> {}x{}", self.width, self.height, width, height);
        self.width = width;
        self.height = height;
        true
    }

    pub fn release<B: GraphicsBackend>(&mut self, backend: &mut B) {
        self.resize(backend, 0, 0);
        for target in [self.irradiance_target.take(), self.reflection_target.take()]
            .into_iter()
            .flatten()
        {
            backend.destroy_framebuffer(target.handle);
        }
        self.sphere = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    #[test]
    fn test_targets_are_created_once() {
        let mut backend = HeadlessBackend::default();
        let mut resources = FrameResources::new(8, 4);
        let first = resources.gbuffer(&mut backend).unwrap();
        let count = backend.texture_count();
        let second = resources.gbuffer(&mut backend).unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.texture_count(), count);
        assert_eq!(first.color_textures.len(), 3);
        assert!(first.depth_texture.is_some());
        assert_eq!((first.width, first.height), (8, 4));
    }

    #[test]
    fn test_ao_target_has_no_depth() {
        let mut backend = HeadlessBackend::default();
        let mut resources = FrameResources::new(8, 8);
        let ao = resources.ao(&mut backend).unwrap();
        assert!(ao.framebuffer.depth_texture.is_none());
        assert_eq!(backend.texture_size(ao.blur), Some((8, 8)));
    }

    #[test]
    fn test_resize_recreates_screen_targets_only() {
        let mut backend = HeadlessBackend::default();
        let mut resources = FrameResources::new(8, 8);
        let old = resources.gbuffer(&mut backend).unwrap();
        let bake = resources.irradiance_target(&mut backend, 16).unwrap();

        assert!(!resources.resize(&mut backend, 8, 8));
        assert!(resources.resize(&mut backend, 4, 4));
        assert_eq!(backend.texture_size(old.color_textures[0]), None);
        let new = resources.gbuffer(&mut backend).unwrap();
        assert_eq!((new.width, new.height), (4, 4));
        assert_eq!(resources.irradiance_target(&mut backend, 16).unwrap(), bake);
    }

    #[test]
    fn test_bake_target_follows_requested_size() {
        let mut backend = HeadlessBackend::default();
        let mut resources = FrameResources::new(8, 8);
        let small = resources.reflection_target(&mut backend, 16).unwrap();
        let large = resources.reflection_target(&mut backend, 32).unwrap();
        assert_ne!(small, large);
        assert_eq!(large.width, 32);
    }
}
