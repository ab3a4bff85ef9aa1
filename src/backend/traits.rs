//! Core backend abstraction traits
//!
//! The renderer talks to the GPU only through [`GraphicsBackend`]. Shaders are
//! addressed by name and uniforms are uploaded by name, so a backend only has to
//! map those names onto its own binding model.

use crate::backend::types::*;
use crate::resources::mesh::Mesh;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Failed to upload mesh: {0}")]
    MeshUploadFailed(String),
    #[error("Texture readback failed: {0}")]
    ReadbackFailed(String),
    #[error("Unknown texture {0:?}")]
    UnknownTexture(TextureHandle),
    #[error("Unknown framebuffer {0:?}")]
    UnknownFramebuffer(FramebufferHandle),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a framebuffer object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub(crate) u64);

/// Handle to a compiled shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub(crate) u64);

/// Handle to uploaded vertex/index buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshBufferHandle(pub(crate) u64);

macro_rules! raw_handle {
    ($($name:ident),*) => {
        $(
            impl $name {
                /// Wraps a backend-specific id. Used by backends living outside this crate.
                pub fn from_raw(id: u64) -> Self {
                    Self(id)
                }

                pub fn raw(&self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

raw_handle!(TextureHandle, FramebufferHandle, ShaderHandle, MeshBufferHandle);

/// A framebuffer together with the textures the backend allocated for it
#[derive(Debug, Clone, PartialEq)]
pub struct Framebuffer {
    pub handle: FramebufferHandle,
    pub width: u32,
    pub height: u32,
    pub color_textures: Vec<TextureHandle>,
    pub depth_texture: Option<TextureHandle>,
}

impl Framebuffer {
    pub fn color(&self, index: usize) -> Option<TextureHandle> {
        self.color_textures.get(index).copied()
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::full(self.width, self.height)
    }
}

/// Mesh resident on the GPU
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuMesh {
    pub handle: MeshBufferHandle,
    pub vertex_count: u32,
    pub index_count: u32,
}

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Size of the default (screen) framebuffer
    fn surface_size(&self) -> (u32, u32);

    /// Resize the default framebuffer
    fn resize_surface(&mut self, width: u32, height: u32);

    // === Textures ===

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Upload RGBA texels into mip 0, rows top to bottom. `face` selects the cubemap face.
    fn write_texture(
        &mut self,
        texture: TextureHandle,
        face: Option<CubeFace>,
        texels: &[glam::Vec4],
    ) -> BackendResult<()>;

    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()>;

    /// Read a texture level back as floats. `face` selects the cubemap face.
    fn read_texture(
        &mut self,
        texture: TextureHandle,
        face: Option<CubeFace>,
        mip_level: u32,
    ) -> BackendResult<FloatImage>;

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    /// One of the neutral textures created with the backend
    fn builtin_texture(&self, kind: BuiltinTexture) -> TextureHandle;

    // === Framebuffers ===

    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor) -> BackendResult<Framebuffer>;

    /// Point colour target 0 of `framebuffer` at one face/mip of a cubemap
    fn attach_cubemap_face(
        &mut self,
        framebuffer: FramebufferHandle,
        cubemap: TextureHandle,
        face: CubeFace,
        mip_level: u32,
    ) -> BackendResult<()>;

    /// `None` binds the default framebuffer
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    fn clear(&mut self, values: ClearValues);

    fn set_viewport(&mut self, viewport: Viewport);

    fn apply_render_state(&mut self, state: &RenderState);

    // === Shaders ===

    fn create_shader(&mut self, name: &str, source: &str) -> BackendResult<ShaderHandle>;

    fn find_shader(&self, name: &str) -> Option<ShaderHandle>;

    fn bind_shader(&mut self, shader: ShaderHandle);

    fn unbind_shader(&mut self);

    /// Upload a uniform to the bound shader. Unknown names are ignored.
    fn set_uniform(&mut self, name: &str, value: UniformValue);

    /// Bind `texture` to `unit` and upload the sampler uniform
    fn set_texture(&mut self, name: &str, texture: TextureHandle, unit: u32) {
        self.set_uniform(name, UniformValue::Texture { texture, unit });
    }

    // === Drawing ===

    fn upload_mesh(&mut self, mesh: &Mesh) -> BackendResult<GpuMesh>;

    fn draw_mesh(&mut self, mesh: &GpuMesh, topology: PrimitiveTopology);

    /// Draw a quad covering the current viewport with the bound shader
    fn draw_fullscreen_quad(&mut self);

    /// Copy `source` into `destination` (or the bound target when `None`),
    /// optionally running `shader` with the source bound as `u_texture`.
    fn blit(
        &mut self,
        source: TextureHandle,
        destination: Option<TextureHandle>,
        shader: Option<ShaderHandle>,
    );
}
