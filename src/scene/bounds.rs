//! Axis-aligned bounding boxes

use glam::{Mat4, Vec3};

/// Axis-aligned box stored as center and half extents
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub center: Vec3,
    pub half_size: Vec3,
}

impl BoundingBox {
    pub fn new(center: Vec3, half_size: Vec3) -> Self {
        Self { center, half_size }
    }

    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self {
            center: (min + max) * 0.5,
            half_size: (max - min) * 0.5,
        }
    }

    /// Tightest box around `points`, `None` when empty
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self::from_min_max(min, max))
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.half_size
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.half_size
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        let d = (point - self.center).abs();
        d.cmple(self.half_size).all()
    }

    /// Box enclosing this box after an affine transform (Arvo's method)
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let center = matrix.transform_point3(self.center);
        let m = glam::Mat3::from_mat4(*matrix);
        let abs = glam::Mat3::from_cols(m.x_axis.abs(), m.y_axis.abs(), m.z_axis.abs());
        Self {
            center,
            half_size: abs * self.half_size,
        }
    }

    pub fn union(&self, other: &BoundingBox) -> Self {
        Self::from_min_max(self.min().min(other.min()), self.max().max(other.max()))
    }
}
