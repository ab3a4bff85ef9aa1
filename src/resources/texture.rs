//! Texture loading and upload

use std::path::Path;

use glam::Vec4;
use image::{DynamicImage, GenericImageView};

use crate::backend::traits::*;
use crate::backend::types::*;

/// Decoded RGBA texels in linear float, rows top to bottom
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub texels: Vec<Vec4>,
}

impl TextureData {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, image::ImageError> {
        let path = path.as_ref();
        let label = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(Self::from_image(&image::open(path)?, &label))
    }

    pub fn from_bytes(bytes: &[u8], label: &str) -> Result<Self, image::ImageError> {
        Ok(Self::from_image(&image::load_from_memory(bytes)?, label))
    }

    pub fn from_image(img: &DynamicImage, label: &str) -> Self {
        let (width, height) = img.dimensions();
        let texels = img
            .to_rgba32f()
            .pixels()
            .map(|p| Vec4::from_array(p.0))
            .collect();
        Self {
            label: label.to_string(),
            width,
            height,
            texels,
        }
    }

    pub fn solid_color(color: Vec4, label: &str) -> Self {
        Self {
            label: label.to_string(),
            width: 1,
            height: 1,
            texels: vec![color],
        }
    }

    pub fn checkerboard(size: u32, a: Vec4, b: Vec4) -> Self {
        let texels = (0..size * size)
            .map(|i| {
                let (x, y) = (i % size, i / size);
                if (x / 8 + y / 8) % 2 == 0 {
                    a
                } else {
                    b
                }
            })
            .collect();
        Self {
            label: "checkerboard".to_string(),
            width: size,
            height: size,
            texels,
        }
    }

    /// Create a 2-D texture with a full mip chain
    pub fn upload<B: GraphicsBackend>(&self, backend: &mut B) -> BackendResult<TextureHandle> {
        let mut desc = TextureDescriptor::new_2d(&self.label, self.width, self.height, TextureFormat::Rgba8Unorm);
        desc.mip_levels = full_mip_chain(self.width.max(self.height));
        let handle = backend.create_texture(&desc)?;
        backend.write_texture(handle, None, &self.texels)?;
        backend.generate_mipmaps(handle)?;
        Ok(handle)
    }
}

/// Create an environment cubemap from six square faces in `CubeFace::ALL` order
pub fn upload_cubemap<B: GraphicsBackend>(
    backend: &mut B,
    label: &str,
    faces: &[TextureData; 6],
) -> BackendResult<TextureHandle> {
    let size = faces[0].width;
    if let Some(bad) = faces.iter().find(|f| f.width != size || f.height != size) {
        return Err(BackendError::TextureCreationFailed(format!(
            "cubemap face {} is {}x{}, expected {}x{}",
            bad.label, bad.width, bad.height, size, size
        )));
    }
    let handle = backend.create_texture(&TextureDescriptor::cube(label, size, TextureFormat::Rgba16Float))?;
    for (face, data) in CubeFace::ALL.iter().zip(faces.iter()) {
        backend.write_texture(handle, Some(*face), &data.texels)?;
    }
    backend.generate_mipmaps(handle)?;
    log::info!("Uploaded {}x{} environment cubemap '{}'", size, size, label);
    Ok(handle)
}
