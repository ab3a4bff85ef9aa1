//! Reflection probes: baked environment cubemaps with full mip chains

use glam::{Vec3, Vec4};

use super::cubemap::face_render_view;
use super::{BakeError, BakeResult};
use crate::backend::{CubeFace, Framebuffer, GraphicsBackend, TextureDescriptor, TextureFormat, TextureHandle, Viewport};
use crate::pipeline::forward_pass;
use crate::scene::Scene;

/// A fixed point with its own cubemap
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionProbe {
    pub position: Vec3,
    pub size: u32,
    cubemap: Option<TextureHandle>,
    baked: bool,
}

impl ReflectionProbe {
    pub fn new(position: Vec3, size: u32) -> Self {
        Self {
            position,
            size,
            cubemap: None,
            baked: false,
        }
    }

    pub fn cubemap(&self) -> Option<TextureHandle> {
        self.cubemap
    }

    pub fn is_baked(&self) -> bool {
        self.baked
    }

    pub fn ensure_cubemap<B: GraphicsBackend>(&mut self, backend: &mut B) -> BakeResult<TextureHandle> {
        if let Some(cubemap) = self.cubemap {
            return Ok(cubemap);
        }
        let desc = TextureDescriptor::cube("reflection probe", self.size, TextureFormat::Rgba16Float);
        let cubemap = backend.create_texture(&desc)?;
        log::info!("Created {}x{} reflection cubemap at {}", self.size, self.size, self.position);
        self.cubemap = Some(cubemap);
        Ok(cubemap)
    }

    pub fn release<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if let Some(cubemap) = self.cubemap.take() {
            backend.destroy_texture(cubemap);
        }
        self.baked = false;
    }
}

/// Renders the opaque scene into each probe's cubemap, in place
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflectionBaker {
    pub near: f32,
    pub far: f32,
    pub clear_color: Vec4,
}

impl Default for ReflectionBaker {
    fn default() -> Self {
        Self {
            near: 0.1,
            far: 1000.0,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }
}

impl ReflectionBaker {
    /// `target` provides the depth buffer; its colour attachment is
    /// redirected to each cubemap face in turn.
    pub fn bake<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        scene: &Scene,
        probes: &mut [ReflectionProbe],
        target: &Framebuffer,
    ) -> BakeResult<usize> {
        log::info!("Baking {} reflection probes", probes.len());
        for probe in probes.iter_mut() {
            if probe.size > target.width || probe.size > target.height {
                return Err(BakeError::TargetTooSmall {
                    needed: probe.size,
                    available: target.width.min(target.height),
                });
            }
            let cubemap = probe.ensure_cubemap(backend)?;
            for face in CubeFace::ALL {
                backend.attach_cubemap_face(target.handle, cubemap, face, 0)?;
                backend.bind_framebuffer(Some(target.handle));
                backend.set_viewport(Viewport::full(probe.size, probe.size));
                let view = face_render_view(face, probe.position, self.near, self.far);
                forward_pass::render_view(backend, scene, &view, self.clear_color);
            }
            backend.bind_framebuffer(None);
            backend.generate_mipmaps(cubemap)?;
            probe.baked = true;
        }
        log::info!("Reflection bake finished");
        Ok(probes.len())
    }
}
