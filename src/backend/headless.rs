//! Headless backend for testing and offline tools.
//!
//! Textures live in CPU memory as float images, mesh draws are only recorded,
//! and full-screen draws execute a [`FragmentProgram`] registered under the
//! shader's name. That is enough to drive every full-screen stage of the
//! pipeline and check its output without GPU hardware.

use std::collections::{HashMap, HashSet};

use glam::{Mat4, UVec2, Vec2, Vec3, Vec4};
use image::Rgba;

use crate::backend::traits::*;
use crate::bake::cubemap::direction_to_face_uv;
use crate::backend::types::*;
use crate::resources::mesh::Mesh;

/// CPU stand-in for a fragment shader
pub trait FragmentProgram {
    fn shade(&self, fragment: &Fragment<'_>) -> Vec4;
}

impl<F> FragmentProgram for F
where
    F: Fn(&Fragment<'_>) -> Vec4,
{
    fn shade(&self, fragment: &Fragment<'_>) -> Vec4 {
        self(fragment)
    }
}

/// Inputs visible to a [`FragmentProgram`] for one pixel
pub struct Fragment<'a> {
    /// Pixel inside the render target
    pub pixel: UVec2,
    /// Viewport-relative coordinate, `v` grows downwards
    pub uv: Vec2,
    /// Viewport size in pixels
    pub resolution: UVec2,
    uniforms: &'a HashMap<String, UniformValue>,
    textures: &'a HashMap<u64, HeadlessTexture>,
}

impl<'a> Fragment<'a> {
    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        self.uniform(name).and_then(UniformValue::as_float)
    }

    pub fn int(&self, name: &str) -> Option<i32> {
        self.uniform(name).and_then(UniformValue::as_int)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.uniform(name)
            .and_then(UniformValue::as_bool)
            .unwrap_or(false)
    }

    pub fn vec2(&self, name: &str) -> Option<Vec2> {
        self.uniform(name).and_then(UniformValue::as_vec2)
    }

    pub fn vec3(&self, name: &str) -> Option<Vec3> {
        self.uniform(name).and_then(UniformValue::as_vec3)
    }

    pub fn mat4(&self, name: &str) -> Option<Mat4> {
        self.uniform(name).and_then(UniformValue::as_mat4)
    }

    pub fn mat4_array(&self, name: &str) -> Option<&[Mat4]> {
        self.uniform(name).and_then(UniformValue::as_mat4_array)
    }

    pub fn vec3_array(&self, name: &str) -> Option<&[Vec3]> {
        self.uniform(name).and_then(UniformValue::as_vec3_array)
    }

    fn bound_image(&self, name: &str) -> Option<&FloatImage> {
        let (texture, _) = self.uniform(name)?.as_texture()?;
        self.textures
            .get(&texture.0)
            .and_then(|t| t.layers.first())
            .and_then(|mips| mips.first())
    }

    /// Size of mip 0 of the texture bound to sampler `name`
    pub fn texture_size(&self, name: &str) -> Option<UVec2> {
        self.bound_image(name)
            .map(|image| UVec2::new(image.width(), image.height()))
    }

    /// Nearest-neighbour sample with clamp-to-edge addressing
    pub fn sample(&self, name: &str, uv: Vec2) -> Option<Vec4> {
        let image = self.bound_image(name)?;
        let x = (uv.x * image.width() as f32).floor() as i64;
        let y = (uv.y * image.height() as f32).floor() as i64;
        Some(fetch(image, x, y))
    }

    /// Nearest sample of mip 0 of the cubemap bound to `name` along `direction`
    pub fn sample_cube(&self, name: &str, direction: Vec3) -> Option<Vec4> {
        let (texture, _) = self.uniform(name)?.as_texture()?;
        let (face, uv) = direction_to_face_uv(direction)?;
        let image = self
            .textures
            .get(&texture.0)
            .and_then(|t| t.layers.get(face.index()))
            .and_then(|mips| mips.first())?;
        let x = (uv.x * image.width() as f32).floor() as i64;
        let y = (uv.y * image.height() as f32).floor() as i64;
        Some(fetch(image, x, y))
    }

    /// Texel fetch with clamp-to-edge addressing
    pub fn texel(&self, name: &str, x: i64, y: i64) -> Option<Vec4> {
        self.bound_image(name).map(|image| fetch(image, x, y))
    }
}

fn fetch(image: &FloatImage, x: i64, y: i64) -> Vec4 {
    let x = x.clamp(0, image.width() as i64 - 1) as u32;
    let y = y.clamp(0, image.height() as i64 - 1) as u32;
    Vec4::from_array(image.get_pixel(x, y).0)
}

/// Storage for one texture: `layers[layer][mip]`
#[derive(Debug, Clone)]
pub struct HeadlessTexture {
    pub desc: TextureDescriptor,
    pub layers: Vec<Vec<FloatImage>>,
}

impl HeadlessTexture {
    fn new(desc: &TextureDescriptor) -> Self {
        let clear = if desc.format.is_depth() {
            Rgba([1.0, 0.0, 0.0, 0.0])
        } else {
            Rgba([0.0, 0.0, 0.0, 0.0])
        };
        let layers = (0..desc.layer_count())
            .map(|_| {
                (0..desc.mip_levels)
                    .map(|level| {
                        let (w, h) = desc.mip_size(level);
                        FloatImage::from_pixel(w, h, clear)
                    })
                    .collect()
            })
            .collect();
        Self {
            desc: desc.clone(),
            layers,
        }
    }

    fn image_mut(&mut self, layer: usize, mip: u32) -> Option<&mut FloatImage> {
        self.layers
            .get_mut(layer)
            .and_then(|mips| mips.get_mut(mip as usize))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Attachment {
    texture: u64,
    layer: usize,
    mip: u32,
}

#[derive(Debug, Clone)]
struct HeadlessFramebuffer {
    color: Vec<Attachment>,
    depth: Option<u64>,
}

#[derive(Default)]
struct HeadlessShader {
    name: String,
    uniforms: HashMap<String, UniformValue>,
}

/// Recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BindFramebuffer(Option<FramebufferHandle>),
    Clear(ClearValues),
    SetViewport(Viewport),
    RenderState(RenderState),
    BindShader(String),
    DrawMesh {
        mesh: MeshBufferHandle,
        shader: Option<String>,
        model: Option<Mat4>,
        topology: PrimitiveTopology,
    },
    DrawFullscreen {
        shader: Option<String>,
        blend: BlendMode,
    },
    Blit {
        source: TextureHandle,
        destination: Option<TextureHandle>,
        shader: Option<String>,
    },
    AttachCubemapFace {
        framebuffer: FramebufferHandle,
        cubemap: TextureHandle,
        face: CubeFace,
    },
    GenerateMipmaps(TextureHandle),
}

const SCREEN: u64 = 0;

/// In-memory backend. See the module docs.
pub struct HeadlessBackend {
    next_id: u64,
    surface: (u32, u32),
    textures: HashMap<u64, HeadlessTexture>,
    framebuffers: HashMap<u64, HeadlessFramebuffer>,
    shaders: HashMap<u64, HeadlessShader>,
    shader_names: HashMap<String, u64>,
    programs: HashMap<String, Box<dyn FragmentProgram>>,
    rejected_shaders: HashSet<String>,
    meshes: HashMap<u64, (u32, u32)>,
    builtins: HashMap<BuiltinTexture, TextureHandle>,
    bound_framebuffer: Option<u64>,
    bound_shader: Option<u64>,
    viewport: Viewport,
    state: RenderState,
    commands: Vec<Command>,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        let mut backend = Self {
            next_id: 1,
            surface: (width, height),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            shaders: HashMap::new(),
            shader_names: HashMap::new(),
            programs: HashMap::new(),
            rejected_shaders: HashSet::new(),
            meshes: HashMap::new(),
            builtins: HashMap::new(),
            bound_framebuffer: None,
            bound_shader: None,
            viewport: Viewport::full(width, height),
            state: RenderState::BASELINE,
            commands: Vec::new(),
        };
        backend.create_screen(width, height);
        for kind in BuiltinTexture::ALL {
            let id = backend.alloc_id();
            let desc = TextureDescriptor::new_2d("builtin", 1, 1, TextureFormat::Rgba8Unorm);
            let mut texture = HeadlessTexture::new(&desc);
            let c = kind.color();
            texture.layers[0][0].put_pixel(0, 0, Rgba(c.to_array()));
            backend.textures.insert(id, texture);
            backend.builtins.insert(kind, TextureHandle(id));
        }
        log::debug!("HeadlessBackend: created {}x{} surface", width, height);
        backend
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn create_screen(&mut self, width: u32, height: u32) {
        if let Some(old) = self.framebuffers.remove(&SCREEN) {
            for attachment in old.color {
                self.textures.remove(&attachment.texture);
            }
            if let Some(depth) = old.depth {
                self.textures.remove(&depth);
            }
        }
        let color = self.alloc_id();
        let depth = self.alloc_id();
        self.textures.insert(
            color,
            HeadlessTexture::new(&TextureDescriptor::new_2d(
                "screen",
                width.max(1),
                height.max(1),
                TextureFormat::Rgba32Float,
            )),
        );
        self.textures.insert(
            depth,
            HeadlessTexture::new(&TextureDescriptor::new_2d(
                "screen depth",
                width.max(1),
                height.max(1),
                TextureFormat::Depth32Float,
            )),
        );
        self.framebuffers.insert(
            SCREEN,
            HeadlessFramebuffer {
                color: vec![Attachment {
                    texture: color,
                    layer: 0,
                    mip: 0,
                }],
                depth: Some(depth),
            },
        );
    }

    /// Run `program` for every full-screen draw or blit that uses shader `name`
    pub fn register_program(&mut self, name: &str, program: impl FragmentProgram + 'static) {
        self.programs.insert(name.to_string(), Box::new(program));
    }

    /// Make `create_shader` fail for `name`, as a driver compile error would
    pub fn reject_shader(&mut self, name: &str) {
        self.rejected_shaders.insert(name.to_string());
    }

    /// Contents of the default framebuffer
    pub fn screen(&self) -> Option<&FloatImage> {
        let fb = self.framebuffers.get(&SCREEN)?;
        let attachment = fb.color.first()?;
        self.textures
            .get(&attachment.texture)
            .and_then(|t| t.layers.first())
            .and_then(|mips| mips.first())
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Number of mesh draws issued with shader `name`
    pub fn mesh_draws_with(&self, name: &str) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::DrawMesh { shader: Some(s), .. } if s == name))
            .count()
    }

    /// Full-screen draws in submission order
    pub fn fullscreen_draws(&self) -> Vec<(Option<String>, BlendMode)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::DrawFullscreen { shader, blend } => Some((shader.clone(), *blend)),
                _ => None,
            })
            .collect()
    }

    pub fn render_state(&self) -> RenderState {
        self.state
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Last uniforms uploaded to shader `name`
    pub fn uniforms_of(&self, name: &str) -> Option<&HashMap<String, UniformValue>> {
        let id = self.shader_names.get(name)?;
        self.shaders.get(id).map(|s| &s.uniforms)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    fn bound_shader_name(&self) -> Option<String> {
        self.bound_shader
            .and_then(|id| self.shaders.get(&id))
            .map(|s| s.name.clone())
    }

    fn target_attachment(&self) -> Option<Attachment> {
        let fb = self.framebuffers.get(&self.bound_framebuffer.unwrap_or(SCREEN))?;
        fb.color.first().copied()
    }

    /// Shade every pixel of `region` in `target` and blend it in
    fn rasterize(&mut self, shader: Option<u64>, target: Attachment, region: Viewport, fallback: Option<u64>) {
        let Some(texture) = self.textures.get(&target.texture) else {
            log::warn!("HeadlessBackend: render target {} vanished", target.texture);
            return;
        };
        let Some(image) = texture
            .layers
            .get(target.layer)
            .and_then(|mips| mips.get(target.mip as usize))
        else {
            return;
        };
        let (tw, th) = image.dimensions();
        let x_end = (region.x + region.width).min(tw);
        let y_end = (region.y + region.height).min(th);
        if region.width == 0 || region.height == 0 || region.x >= x_end || region.y >= y_end {
            return;
        }

        let empty = HashMap::new();
        let (uniforms, program) = match shader.and_then(|id| self.shaders.get(&id)) {
            Some(s) => (&s.uniforms, self.programs.get(&s.name)),
            None => (&empty, None),
        };
        let resolution = UVec2::new(region.width, region.height);

        let mut output = Vec::with_capacity(((x_end - region.x) * (y_end - region.y)) as usize);
        for y in region.y..y_end {
            for x in region.x..x_end {
                let uv = Vec2::new(
                    (x - region.x) as f32 + 0.5,
                    (y - region.y) as f32 + 0.5,
                ) / resolution.as_vec2();
                let color = match (program, fallback) {
                    (Some(program), _) => program.shade(&Fragment {
                        pixel: UVec2::new(x, y),
                        uv,
                        resolution,
                        uniforms,
                        textures: &self.textures,
                    }),
                    (None, Some(source)) => {
                        let Some(src) = self
                            .textures
                            .get(&source)
                            .and_then(|t| t.layers.first())
                            .and_then(|m| m.first())
                        else {
                            continue;
                        };
                        fetch(
                            src,
                            (uv.x * src.width() as f32) as i64,
                            (uv.y * src.height() as f32) as i64,
                        )
                    }
                    (None, None) => return,
                };
                output.push((x, y, color));
            }
        }

        let blend = self.state.blend;
        if let Some(image) = self
            .textures
            .get_mut(&target.texture)
            .and_then(|t| t.image_mut(target.layer, target.mip))
        {
            for (x, y, src) in output {
                let dst = Vec4::from_array(image.get_pixel(x, y).0);
                image.put_pixel(x, y, Rgba(blend_color(blend, src, dst).to_array()));
            }
        }
    }
}

fn blend_color(mode: BlendMode, src: Vec4, dst: Vec4) -> Vec4 {
    match mode {
        BlendMode::Disabled => src,
        BlendMode::Additive => src + dst,
        BlendMode::Alpha => src * src.w + dst * (1.0 - src.w),
    }
}

fn downsample(source: &FloatImage, width: u32, height: u32) -> FloatImage {
    FloatImage::from_fn(width, height, |x, y| {
        let mut sum = Vec4::ZERO;
        let mut count = 0.0;
        for dy in 0..2 {
            for dx in 0..2 {
                let sx = (x * 2 + dx).min(source.width() - 1);
                let sy = (y * 2 + dy).min(source.height() - 1);
                sum += Vec4::from_array(source.get_pixel(sx, sy).0);
                count += 1.0;
            }
        }
        Rgba((sum / count).to_array())
    })
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(64, 64)
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "Headless"
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        log::debug!("HeadlessBackend: resizing surface to {}x{}", width, height);
        self.surface = (width, height);
        self.create_screen(width, height);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero extent",
                desc.label
            )));
        }
        log::trace!(
            "HeadlessBackend: creating texture {:?} ({}x{}, {:?}, {} mips)",
            desc.label,
            desc.width,
            desc.height,
            desc.dimension,
            desc.mip_levels
        );
        let id = self.alloc_id();
        self.textures.insert(id, HeadlessTexture::new(desc));
        Ok(TextureHandle(id))
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        face: Option<CubeFace>,
        texels: &[Vec4],
    ) -> BackendResult<()> {
        let layer = face.map(|f| f.index()).unwrap_or(0);
        let image = self
            .textures
            .get_mut(&texture.0)
            .and_then(|t| t.image_mut(layer, 0))
            .ok_or(BackendError::UnknownTexture(texture))?;
        let (w, h) = image.dimensions();
        if texels.len() != (w * h) as usize {
            return Err(BackendError::TextureCreationFailed(format!(
                "expected {} texels, got {}",
                w * h,
                texels.len()
            )));
        }
        for (i, texel) in texels.iter().enumerate() {
            let i = i as u32;
            image.put_pixel(i % w, i / w, Rgba(texel.to_array()));
        }
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()> {
        self.commands.push(Command::GenerateMipmaps(texture));
        let stored = self
            .textures
            .get_mut(&texture.0)
            .ok_or(BackendError::UnknownTexture(texture))?;
        for mips in stored.layers.iter_mut() {
            for level in 1..mips.len() {
                let (w, h) = stored.desc.mip_size(level as u32);
                mips[level] = downsample(&mips[level - 1], w, h);
            }
        }
        Ok(())
    }

    fn read_texture(
        &mut self,
        texture: TextureHandle,
        face: Option<CubeFace>,
        mip_level: u32,
    ) -> BackendResult<FloatImage> {
        let stored = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::UnknownTexture(texture))?;
        let layer = face.map(|f| f.index()).unwrap_or(0);
        stored
            .layers
            .get(layer)
            .and_then(|mips| mips.get(mip_level as usize))
            .cloned()
            .ok_or_else(|| {
                BackendError::ReadbackFailed(format!(
                    "layer {} mip {} out of range for {:?}",
                    layer, mip_level, stored.desc.label
                ))
            })
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures
            .get(&texture.0)
            .map(|t| (t.desc.width, t.desc.height))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        log::trace!("HeadlessBackend: destroying texture {:?}", texture);
        self.textures.remove(&texture.0);
    }

    fn builtin_texture(&self, kind: BuiltinTexture) -> TextureHandle {
        self.builtins
            .get(&kind)
            .copied()
            .unwrap_or(TextureHandle(u64::MAX))
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor) -> BackendResult<Framebuffer> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::FramebufferCreationFailed(format!(
                "{:?} has zero extent",
                desc.label
            )));
        }
        log::trace!(
            "HeadlessBackend: creating framebuffer {:?} ({}x{}, {} colour targets)",
            desc.label,
            desc.width,
            desc.height,
            desc.color_formats.len()
        );
        let label = desc.label.clone().unwrap_or_default();
        let mut color_textures = Vec::with_capacity(desc.color_formats.len());
        for format in &desc.color_formats {
            color_textures.push(self.create_texture(&TextureDescriptor::new_2d(
                &label,
                desc.width,
                desc.height,
                *format,
            ))?);
        }
        let depth_texture = if desc.depth {
            Some(self.create_texture(&TextureDescriptor::new_2d(
                &label,
                desc.width,
                desc.height,
                TextureFormat::Depth32Float,
            ))?)
        } else {
            None
        };

        let id = self.alloc_id();
        self.framebuffers.insert(
            id,
            HeadlessFramebuffer {
                color: color_textures
                    .iter()
                    .map(|t| Attachment {
                        texture: t.0,
                        layer: 0,
                        mip: 0,
                    })
                    .collect(),
                depth: depth_texture.map(|t| t.0),
            },
        );
        Ok(Framebuffer {
            handle: FramebufferHandle(id),
            width: desc.width,
            height: desc.height,
            color_textures,
            depth_texture,
        })
    }

    fn attach_cubemap_face(
        &mut self,
        framebuffer: FramebufferHandle,
        cubemap: TextureHandle,
        face: CubeFace,
        mip_level: u32,
    ) -> BackendResult<()> {
        if !self.textures.contains_key(&cubemap.0) {
            return Err(BackendError::UnknownTexture(cubemap));
        }
        let fb = self
            .framebuffers
            .get_mut(&framebuffer.0)
            .ok_or(BackendError::UnknownFramebuffer(framebuffer))?;
        let attachment = Attachment {
            texture: cubemap.0,
            layer: face.index(),
            mip: mip_level,
        };
        match fb.color.first_mut() {
            Some(slot) => *slot = attachment,
            None => fb.color.push(attachment),
        }
        self.commands.push(Command::AttachCubemapFace {
            framebuffer,
            cubemap,
            face,
        });
        Ok(())
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.bound_framebuffer = framebuffer.map(|f| f.0);
        self.commands.push(Command::BindFramebuffer(framebuffer));
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(fb) = self.framebuffers.remove(&framebuffer.0) {
            if self.bound_framebuffer == Some(framebuffer.0) {
                self.bound_framebuffer = None;
            }
            // Cubemap attachments belong to their probe, not to the framebuffer
            for attachment in fb.color.iter().filter(|a| a.layer == 0 && a.mip == 0) {
                let owned = self
                    .textures
                    .get(&attachment.texture)
                    .map(|t| t.desc.dimension == TextureDimension::D2)
                    .unwrap_or(false);
                if owned {
                    self.textures.remove(&attachment.texture);
                }
            }
            if let Some(depth) = fb.depth {
                self.textures.remove(&depth);
            }
        }
    }

    fn clear(&mut self, values: ClearValues) {
        self.commands.push(Command::Clear(values));
        let Some(fb) = self
            .framebuffers
            .get(&self.bound_framebuffer.unwrap_or(SCREEN))
            .cloned()
        else {
            return;
        };
        if let Some(color) = values.color {
            for attachment in &fb.color {
                if let Some(image) = self
                    .textures
                    .get_mut(&attachment.texture)
                    .and_then(|t| t.image_mut(attachment.layer, attachment.mip))
                {
                    for pixel in image.pixels_mut() {
                        *pixel = Rgba(color.to_array());
                    }
                }
            }
        }
        if let (Some(depth), Some(texture)) = (values.depth, fb.depth) {
            if let Some(image) = self.textures.get_mut(&texture).and_then(|t| t.image_mut(0, 0)) {
                for pixel in image.pixels_mut() {
                    *pixel = Rgba([depth, 0.0, 0.0, 0.0]);
                }
            }
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.commands.push(Command::SetViewport(viewport));
    }

    fn apply_render_state(&mut self, state: &RenderState) {
        self.state = *state;
        self.commands.push(Command::RenderState(*state));
    }

    fn create_shader(&mut self, name: &str, source: &str) -> BackendResult<ShaderHandle> {
        if self.rejected_shaders.contains(name) || source.trim().is_empty() {
            return Err(BackendError::ShaderCreationFailed(name.to_string()));
        }
        if let Some(id) = self.shader_names.get(name) {
            return Ok(ShaderHandle(*id));
        }
        log::trace!("HeadlessBackend: creating shader {}", name);
        let id = self.alloc_id();
        self.shaders.insert(
            id,
            HeadlessShader {
                name: name.to_string(),
                uniforms: HashMap::new(),
            },
        );
        self.shader_names.insert(name.to_string(), id);
        Ok(ShaderHandle(id))
    }

    fn find_shader(&self, name: &str) -> Option<ShaderHandle> {
        self.shader_names.get(name).map(|id| ShaderHandle(*id))
    }

    fn bind_shader(&mut self, shader: ShaderHandle) {
        self.bound_shader = Some(shader.0);
        if let Some(name) = self.bound_shader_name() {
            self.commands.push(Command::BindShader(name));
        }
    }

    fn unbind_shader(&mut self) {
        self.bound_shader = None;
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        let Some(shader) = self.bound_shader.and_then(|id| self.shaders.get_mut(&id)) else {
            log::trace!("HeadlessBackend: uniform {} set with no shader bound", name);
            return;
        };
        shader.uniforms.insert(name.to_string(), value);
    }

    fn upload_mesh(&mut self, mesh: &Mesh) -> BackendResult<GpuMesh> {
        if mesh.vertices.is_empty() {
            return Err(BackendError::MeshUploadFailed(format!(
                "{:?} has no vertices",
                mesh.label
            )));
        }
        let id = self.alloc_id();
        let counts = (mesh.vertices.len() as u32, mesh.indices.len() as u32);
        self.meshes.insert(id, counts);
        Ok(GpuMesh {
            handle: MeshBufferHandle(id),
            vertex_count: counts.0,
            index_count: counts.1,
        })
    }

    fn draw_mesh(&mut self, mesh: &GpuMesh, topology: PrimitiveTopology) {
        let model = self
            .bound_shader
            .and_then(|id| self.shaders.get(&id))
            .and_then(|s| s.uniforms.get("u_model"))
            .and_then(UniformValue::as_mat4);
        self.commands.push(Command::DrawMesh {
            mesh: mesh.handle,
            shader: self.bound_shader_name(),
            model,
            topology,
        });
    }

    fn draw_fullscreen_quad(&mut self) {
        self.commands.push(Command::DrawFullscreen {
            shader: self.bound_shader_name(),
            blend: self.state.blend,
        });
        let Some(target) = self.target_attachment() else {
            return;
        };
        self.rasterize(self.bound_shader, target, self.viewport, None);
    }

    fn blit(
        &mut self,
        source: TextureHandle,
        destination: Option<TextureHandle>,
        shader: Option<ShaderHandle>,
    ) {
        let shader_name = shader
            .and_then(|s| self.shaders.get(&s.0))
            .map(|s| s.name.clone());
        self.commands.push(Command::Blit {
            source,
            destination,
            shader: shader_name,
        });

        if let Some(s) = shader.and_then(|s| self.shaders.get_mut(&s.0)) {
            s.uniforms.insert(
                "u_texture".to_string(),
                UniformValue::Texture {
                    texture: source,
                    unit: 0,
                },
            );
        }

        let (target, region) = match destination {
            Some(texture) => {
                let Some((w, h)) = self.texture_size(texture) else {
                    log::warn!("HeadlessBackend: blit into unknown texture {:?}", texture);
                    return;
                };
                (
                    Attachment {
                        texture: texture.0,
                        layer: 0,
                        mip: 0,
                    },
                    Viewport::full(w, h),
                )
            }
            None => match self.target_attachment() {
                Some(target) => (target, self.viewport),
                None => return,
            },
        };
        self.rasterize(shader.map(|s| s.0), target, region, Some(source.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_and_readback() {
        let mut backend = HeadlessBackend::new(4, 4);
        let fb = backend
            .create_framebuffer(&FramebufferDescriptor::color(
                "target",
                2,
                2,
                1,
                TextureFormat::Rgba32Float,
            ))
            .unwrap();
        backend.bind_framebuffer(Some(fb.handle));
        backend.clear(ClearValues::all(Vec4::new(0.25, 0.5, 0.75, 1.0)));
        let image = backend.read_texture(fb.color_textures[0], None, 0).unwrap();
        assert_eq!(image.get_pixel(1, 1).0, [0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_additive_fullscreen_program() {
        let mut backend = HeadlessBackend::new(2, 2);
        backend.register_program("one", |_: &Fragment<'_>| Vec4::splat(1.0));
        let shader = backend.create_shader("one", "fn main() {}").unwrap();
        backend.bind_shader(shader);
        backend.apply_render_state(&RenderState::FULLSCREEN);
        backend.draw_fullscreen_quad();
        backend.apply_render_state(&RenderState::FULLSCREEN.with_blend(BlendMode::Additive));
        backend.draw_fullscreen_quad();
        assert_eq!(backend.screen().unwrap().get_pixel(0, 0).0, [2.0; 4]);
    }

    #[test]
    fn test_viewport_limits_fullscreen_draw() {
        let mut backend = HeadlessBackend::new(4, 4);
        backend.register_program("one", |_: &Fragment<'_>| Vec4::ONE);
        let shader = backend.create_shader("one", "fn main() {}").unwrap();
        backend.bind_shader(shader);
        backend.set_viewport(Viewport::new(2, 2, 2, 2));
        backend.draw_fullscreen_quad();
        let screen = backend.screen().unwrap();
        assert_eq!(screen.get_pixel(0, 0).0, [0.0; 4]);
        assert_eq!(screen.get_pixel(3, 3).0, [1.0; 4]);
    }

    #[test]
    fn test_mipmaps_average_level_zero() {
        let mut backend = HeadlessBackend::new(1, 1);
        let mut desc = TextureDescriptor::new_2d("mips", 2, 2, TextureFormat::Rgba32Float);
        desc.mip_levels = 2;
        let texture = backend.create_texture(&desc).unwrap();
        backend
            .write_texture(
                texture,
                None,
                &[Vec4::ZERO, Vec4::ONE, Vec4::ONE, Vec4::ZERO],
            )
            .unwrap();
        backend.generate_mipmaps(texture).unwrap();
        let level = backend.read_texture(texture, None, 1).unwrap();
        assert_eq!(level.get_pixel(0, 0).0, [0.5; 4]);
    }

    #[test]
    fn test_rejected_shader_fails_to_compile() {
        let mut backend = HeadlessBackend::default();
        backend.reject_shader("broken");
        assert!(backend.create_shader("broken", "fn main() {}").is_err());
        assert!(backend.find_shader("broken").is_none());
    }
}
