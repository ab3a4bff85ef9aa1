//! Common types shared between backends

use crate::backend::traits::TextureHandle;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};
use image::{ImageBuffer, Rgba};

/// Floating-point RGBA image used for readback. Row 0 is the top of the view.
pub type FloatImage = ImageBuffer<Rgba<f32>, Vec<f32>>;

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }
}

/// Whether a texture is a plain 2-D image or a six-face cubemap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    D2,
    Cube,
}

/// Texture descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub dimension: TextureDimension,
    pub mip_levels: u32,
    pub format: TextureFormat,
}

impl TextureDescriptor {
    pub fn new_2d(label: &str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width,
            height,
            dimension: TextureDimension::D2,
            mip_levels: 1,
            format,
        }
    }

    /// Square cubemap with a complete mip chain
    pub fn cube(label: &str, size: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width: size,
            height: size,
            dimension: TextureDimension::Cube,
            mip_levels: full_mip_chain(size),
            format,
        }
    }

    pub fn layer_count(&self) -> usize {
        match self.dimension {
            TextureDimension::D2 => 1,
            TextureDimension::Cube => 6,
        }
    }

    /// Size of a given mip level
    pub fn mip_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            dimension: TextureDimension::D2,
            mip_levels: 1,
            format: TextureFormat::Rgba8Unorm,
        }
    }
}

/// Number of mip levels down to 1x1 for a square texture of `size`
pub fn full_mip_chain(size: u32) -> u32 {
    32 - size.max(1).leading_zeros()
}

/// Cubemap face in the conventional +X, -X, +Y, -Y, +Z, -Z order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Framebuffer descriptor: N colour targets plus an optional depth target
#[derive(Debug, Clone, PartialEq)]
pub struct FramebufferDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub color_formats: Vec<TextureFormat>,
    pub depth: bool,
}

impl FramebufferDescriptor {
    pub fn color(label: &str, width: u32, height: u32, targets: usize, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width,
            height,
            color_formats: vec![format; targets],
            depth: true,
        }
    }

    pub fn depth_only(label: &str, width: u32, height: u32) -> Self {
        Self {
            label: Some(label.to_string()),
            width,
            height,
            color_formats: Vec::new(),
            depth: true,
        }
    }

    pub fn without_depth(mut self) -> Self {
        self.depth = false;
        self
    }
}

/// Values used to clear the bound framebuffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    pub color: Option<Vec4>,
    pub depth: Option<f32>,
}

impl ClearValues {
    pub fn all(color: Vec4) -> Self {
        Self {
            color: Some(color),
            depth: Some(1.0),
        }
    }

    pub fn depth_only() -> Self {
        Self {
            color: None,
            depth: Some(1.0),
        }
    }
}

/// Viewport rectangle in pixels, origin at the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Disabled,
    /// `src * src_alpha + dst * (1 - src_alpha)`
    Alpha,
    /// `src + dst`
    Additive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunction {
    Less,
    LessEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Back,
}

/// Fixed-function state for a pass, applied as one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderState {
    pub blend: BlendMode,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunction,
    pub cull: CullMode,
}

impl RenderState {
    /// State every pass leaves behind.
    pub const BASELINE: Self = Self {
        blend: BlendMode::Disabled,
        depth_test: false,
        depth_write: true,
        depth_compare: CompareFunction::LessEqual,
        cull: CullMode::None,
    };

    pub const OPAQUE_GEOMETRY: Self = Self {
        blend: BlendMode::Disabled,
        depth_test: true,
        depth_write: true,
        depth_compare: CompareFunction::LessEqual,
        cull: CullMode::Back,
    };

    pub const SHADOW_CASTER: Self = Self {
        blend: BlendMode::Disabled,
        depth_test: true,
        depth_write: true,
        depth_compare: CompareFunction::LessEqual,
        cull: CullMode::None,
    };

    pub const FULLSCREEN: Self = Self {
        blend: BlendMode::Disabled,
        depth_test: false,
        depth_write: false,
        depth_compare: CompareFunction::Always,
        cull: CullMode::None,
    };

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_cull(mut self, cull: CullMode) -> Self {
        self.cull = cull;
        self
    }
}

impl Default for RenderState {
    fn default() -> Self {
        Self::BASELINE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
    LineList,
    PointList,
}

/// Typed uniform value uploaded by name to the bound shader
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    Mat4Array(Vec<Mat4>),
    Vec3Array(Vec<Vec3>),
    Texture { texture: TextureHandle, unit: u32 },
}

impl UniformValue {
    pub fn as_float(&self) -> Option<f32> {
        match self {
            UniformValue::Float(v) => Some(*v),
            UniformValue::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            UniformValue::Int(v) => Some(*v),
            UniformValue::Bool(v) => Some(*v as i32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            UniformValue::Bool(v) => Some(*v),
            UniformValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<Vec2> {
        match self {
            UniformValue::Vec2(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            UniformValue::Vec3(v) => Some(*v),
            UniformValue::Vec4(v) => Some(v.truncate()),
            _ => None,
        }
    }

    pub fn as_mat4(&self) -> Option<Mat4> {
        match self {
            UniformValue::Mat4(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_mat4_array(&self) -> Option<&[Mat4]> {
        match self {
            UniformValue::Mat4Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vec3_array(&self) -> Option<&[Vec3]> {
        match self {
            UniformValue::Vec3Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_texture(&self) -> Option<(TextureHandle, u32)> {
        match self {
            UniformValue::Texture { texture, unit } => Some((*texture, *unit)),
            _ => None,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Bool(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        UniformValue::Mat4(v)
    }
}

/// Built-in neutral textures every backend provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTexture {
    White,
    Black,
    /// Metallic-roughness fallback (metallic 1, roughness 0)
    Red,
    /// Encoded +Z normal
    FlatNormal,
}

impl BuiltinTexture {
    pub const ALL: [BuiltinTexture; 4] = [
        BuiltinTexture::White,
        BuiltinTexture::Black,
        BuiltinTexture::Red,
        BuiltinTexture::FlatNormal,
    ];

    pub fn color(&self) -> Vec4 {
        match self {
            BuiltinTexture::White => Vec4::ONE,
            BuiltinTexture::Black => Vec4::new(0.0, 0.0, 0.0, 1.0),
            BuiltinTexture::Red => Vec4::new(1.0, 0.0, 0.0, 1.0),
            BuiltinTexture::FlatNormal => Vec4::new(0.5, 0.5, 1.0, 1.0),
        }
    }
}

/// Standard vertex with position, normal, UV, and tangent
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_mip_chain() {
        assert_eq!(full_mip_chain(1), 1);
        assert_eq!(full_mip_chain(256), 9);
        assert_eq!(full_mip_chain(300), 9);
    }

    #[test]
    fn test_cube_descriptor_layers() {
        let desc = TextureDescriptor::cube("probe", 128, TextureFormat::Rgba16Float);
        assert_eq!(desc.layer_count(), 6);
        assert_eq!(desc.mip_levels, 8);
        assert_eq!(desc.mip_size(7), (1, 1));
    }

    #[test]
    fn test_uniform_conversions() {
        assert_eq!(UniformValue::from(2.0).as_float(), Some(2.0));
        assert_eq!(UniformValue::from(true).as_int(), Some(1));
        assert_eq!(UniformValue::from(Vec3::X).as_vec3(), Some(Vec3::X));
        assert!(UniformValue::from(Mat4::IDENTITY).as_vec3().is_none());
    }
}
