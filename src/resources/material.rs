//! Surface materials

use glam::{Vec3, Vec4};

use crate::backend::TextureHandle;

/// How a material's alpha channel is interpreted
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlphaMode {
    Opaque,
    /// Discard fragments with alpha below the cutoff
    Mask { cutoff: f32 },
    /// Alpha-blended; never casts shadows
    Blend,
}

/// Material properties consumed by the geometry, forward and shadow passes
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub alpha_mode: AlphaMode,
    pub two_sided: bool,
    pub uv_tiling: f32,

    /// `None` falls back to the backend's neutral texture
    pub color_texture: Option<TextureHandle>,
    pub emissive_texture: Option<TextureHandle>,
    pub normal_texture: Option<TextureHandle>,
    pub metallic_roughness_texture: Option<TextureHandle>,
    pub occlusion_texture: Option<TextureHandle>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            emissive: Vec3::ZERO,
            alpha_mode: AlphaMode::Opaque,
            two_sided: false,
            uv_tiling: 1.0,
            color_texture: None,
            emissive_texture: None,
            normal_texture: None,
            metallic_roughness_texture: None,
            occlusion_texture: None,
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_base_color(mut self, color: Vec4) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic;
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    pub fn with_emissive(mut self, emissive: Vec3) -> Self {
        self.emissive = emissive;
        self
    }

    pub fn with_alpha_mode(mut self, mode: AlphaMode) -> Self {
        self.alpha_mode = mode;
        self
    }

    pub fn with_two_sided(mut self, two_sided: bool) -> Self {
        self.two_sided = two_sided;
        self
    }

    pub fn with_uv_tiling(mut self, tiling: f32) -> Self {
        self.uv_tiling = tiling;
        self
    }

    pub fn with_color_texture(mut self, texture: TextureHandle) -> Self {
        self.color_texture = Some(texture);
        self
    }

    pub fn is_blended(&self) -> bool {
        self.alpha_mode == AlphaMode::Blend
    }

    pub fn casts_shadow(&self) -> bool {
        !self.is_blended()
    }

    /// Uploaded as `u_alpha_cutoff`; zero keeps every fragment
    pub fn alpha_cutoff(&self) -> f32 {
        match self.alpha_mode {
            AlphaMode::Mask { cutoff } => cutoff,
            AlphaMode::Opaque | AlphaMode::Blend => 0.0,
        }
    }

    pub fn matte(color: Vec3) -> Self {
        Self::new("matte")
            .with_base_color(color.extend(1.0))
            .with_roughness(1.0)
    }

    pub fn metal(color: Vec3, roughness: f32) -> Self {
        Self::new("metal")
            .with_base_color(color.extend(1.0))
            .with_metallic(1.0)
            .with_roughness(roughness)
    }

    pub fn glass() -> Self {
        Self::new("glass")
            .with_base_color(Vec4::new(0.9, 0.95, 1.0, 0.3))
            .with_roughness(0.05)
            .with_alpha_mode(AlphaMode::Blend)
            .with_two_sided(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blended_materials_do_not_cast_shadows() {
        assert!(!Material::glass().casts_shadow());
        assert!(Material::matte(Vec3::ONE).casts_shadow());
    }

    #[test]
    fn test_alpha_cutoff() {
        let m = Material::new("leaves").with_alpha_mode(AlphaMode::Mask { cutoff: 0.4 });
        assert_eq!(m.alpha_cutoff(), 0.4);
        assert_eq!(Material::default().alpha_cutoff(), 0.0);
    }
}
