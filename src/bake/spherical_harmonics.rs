//! Order-2 real spherical harmonics (9 coefficients per colour channel)

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use super::cubemap::{texel_direction, texel_solid_angle, texel_uv};
use crate::backend::{CubeFace, FloatImage};

pub const SH_COEFFICIENTS: usize = 9;

/// Convolution weights of the clamped cosine lobe per band
const BAND_WEIGHTS: [f32; 3] = [
    std::f32::consts::PI,
    2.0 * std::f32::consts::PI / 3.0,
    std::f32::consts::PI / 4.0,
];

const BAND_OF: [usize; SH_COEFFICIENTS] = [0, 1, 1, 1, 2, 2, 2, 2, 2];

/// The 9 basis functions evaluated at unit direction `d`
pub fn sh_basis(d: Vec3) -> [f32; SH_COEFFICIENTS] {
    [
        0.282095,
        0.488603 * d.y,
        0.488603 * d.z,
        0.488603 * d.x,
        1.092548 * d.x * d.y,
        1.092548 * d.y * d.z,
        0.315392 * (3.0 * d.z * d.z - 1.0),
        1.092548 * d.x * d.z,
        0.546274 * (d.x * d.x - d.y * d.y),
    ]
}

/// RGB coefficients of one probe. The layout is the 27 floats stored per
/// probe in the irradiance file.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SphericalHarmonics {
    pub coeffs: [Vec3; SH_COEFFICIENTS],
}

impl SphericalHarmonics {
    /// Project six cube faces (in [`CubeFace::ALL`] order) weighting each
    /// texel by its solid angle.
    pub fn project_cubemap(faces: &[FloatImage; 6]) -> Self {
        let mut sh = Self::default();
        let mut total_weight = 0.0;

        for (face, image) in CubeFace::ALL.into_iter().zip(faces) {
            let (width, height) = image.dimensions();
            for (x, y, pixel) in image.enumerate_pixels() {
                let (u, v) = texel_uv(x, y, width, height);
                let weight = texel_solid_angle(u, v, width, height);
                let dir = texel_direction(face, x, y, width, height);
                let radiance = Vec3::new(pixel.0[0], pixel.0[1], pixel.0[2]);
                for (c, y_i) in sh.coeffs.iter_mut().zip(sh_basis(dir)) {
                    *c += radiance * (y_i * weight);
                }
                total_weight += weight;
            }
        }

        if total_weight > 0.0 {
            // Renormalise so the weights integrate to exactly 4π
            let norm = 4.0 * std::f32::consts::PI / total_weight;
            for c in sh.coeffs.iter_mut() {
                *c *= norm;
            }
        }
        sh
    }

    /// Reconstructed radiance arriving from direction `d`
    pub fn evaluate(&self, d: Vec3) -> Vec3 {
        self.coeffs
            .iter()
            .zip(sh_basis(d.normalize_or_zero()))
            .fold(Vec3::ZERO, |acc, (c, y)| acc + *c * y)
    }

    /// Cosine-convolved irradiance for a surface with normal `n`
    pub fn irradiance(&self, n: Vec3) -> Vec3 {
        self.coeffs
            .iter()
            .zip(sh_basis(n.normalize_or_zero()))
            .zip(BAND_OF)
            .fold(Vec3::ZERO, |acc, ((c, y), band)| acc + *c * (y * BAND_WEIGHTS[band]))
            .max(Vec3::ZERO)
    }

    pub fn add_scaled(&mut self, other: &Self, weight: f32) {
        for (a, b) in self.coeffs.iter_mut().zip(other.coeffs.iter()) {
            *a += *b * weight;
        }
    }

    pub fn as_floats(&self) -> &[f32; SH_COEFFICIENTS * 3] {
        bytemuck::cast_ref(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgba;

    fn constant_faces(color: [f32; 3], size: u32) -> [FloatImage; 6] {
        std::array::from_fn(|_| FloatImage::from_pixel(size, size, Rgba([color[0], color[1], color[2], 1.0])))
    }

    #[test]
    fn test_constant_radiance_projects_to_dc_only() {
        let sh = SphericalHarmonics::project_cubemap(&constant_faces([1.0, 0.5, 0.25], 16));
        let expected = 0.282095 * 4.0 * std::f32::consts::PI;
        assert_relative_eq!(sh.coeffs[0].x, expected, epsilon = 1e-4);
        assert_relative_eq!(sh.coeffs[0].y, expected * 0.5, epsilon = 1e-4);
        for c in &sh.coeffs[1..] {
            assert!(c.abs().max_element() < 1e-4, "{:?}", c);
        }
        assert_relative_eq!(sh.evaluate(Vec3::X).x, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_constant_radiance_irradiance_is_pi() {
        let sh = SphericalHarmonics::project_cubemap(&constant_faces([1.0, 1.0, 1.0], 8));
        for n in [Vec3::X, Vec3::NEG_Y, Vec3::new(1.0, 1.0, 0.0)] {
            assert_relative_eq!(sh.irradiance(n).x, std::f32::consts::PI, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_single_bright_face_biases_towards_it() {
        let mut faces = constant_faces([0.0, 0.0, 0.0], 8);
        faces[CubeFace::PositiveY.index()] = FloatImage::from_pixel(8, 8, Rgba([1.0, 1.0, 1.0, 1.0]));
        let sh = SphericalHarmonics::project_cubemap(&faces);
        assert!(sh.coeffs[1].x > 0.0);
        assert!(sh.irradiance(Vec3::Y).x > sh.irradiance(Vec3::NEG_Y).x);
        assert_relative_eq!(sh.coeffs[3].x, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_float_view_is_rgb_interleaved() {
        let mut sh = SphericalHarmonics::default();
        sh.coeffs[1] = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(&sh.as_floats()[3..6], &[1.0, 2.0, 3.0]);
    }
}
