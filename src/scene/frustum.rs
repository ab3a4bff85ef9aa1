//! View frustum culling

use glam::{Mat4, Vec3, Vec4};

use super::bounds::BoundingBox;

/// Result of classifying a volume against the frustum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    Outside,
    Intersecting,
    Inside,
}

/// Six planes facing inwards, `xyz` normalized, `w` the offset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Extract planes from a view-projection matrix with a `[0, 1]` depth range
    pub fn from_view_projection(view_projection: &Mat4) -> Self {
        let m = view_projection;
        let mut planes = [
            m.row(3) + m.row(0), // left
            m.row(3) - m.row(0), // right
            m.row(3) + m.row(1), // bottom
            m.row(3) - m.row(1), // top
            m.row(2),            // near
            m.row(3) - m.row(2), // far
        ];
        for plane in &mut planes {
            let length = plane.truncate().length();
            if length > f32::EPSILON {
                *plane /= length;
            }
        }
        Self { planes }
    }

    fn distance(plane: &Vec4, point: Vec3) -> f32 {
        plane.truncate().dot(point) + plane.w
    }

    pub fn classify_box(&self, bounds: &BoundingBox) -> Containment {
        let mut result = Containment::Inside;
        for plane in &self.planes {
            let d = Self::distance(plane, bounds.center);
            let r = plane.truncate().abs().dot(bounds.half_size);
            if d < -r {
                return Containment::Outside;
            }
            if d < r {
                result = Containment::Intersecting;
            }
        }
        result
    }

    /// `true` unless the box lies entirely outside one plane
    pub fn test_box(&self, bounds: &BoundingBox) -> bool {
        self.classify_box(bounds) != Containment::Outside
    }

    pub fn test_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| Self::distance(plane, center) >= -radius)
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.test_sphere(point, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_frustum() -> Frustum {
        let view = Mat4::look_at_rh(Vec3::ZERO, -Vec3::Z, Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        Frustum::from_view_projection(&(proj * view))
    }

    #[test]
    fn test_box_in_front_is_inside() {
        let f = camera_frustum();
        let b = BoundingBox::new(Vec3::new(0.0, 0.0, -10.0), Vec3::ONE);
        assert_eq!(f.classify_box(&b), Containment::Inside);
    }

    #[test]
    fn test_box_behind_is_outside() {
        let f = camera_frustum();
        let b = BoundingBox::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ONE);
        assert!(!f.test_box(&b));
    }

    #[test]
    fn test_box_beyond_far_plane_is_outside() {
        let f = camera_frustum();
        let b = BoundingBox::new(Vec3::new(0.0, 0.0, -150.0), Vec3::ONE);
        assert!(!f.test_box(&b));
    }

    #[test]
    fn test_box_straddling_side_plane_intersects() {
        let f = camera_frustum();
        // Right plane at z = -10 sits at x = 10 * tan(30deg)
        let edge = 10.0 * 30f32.to_radians().tan();
        let b = BoundingBox::new(Vec3::new(edge, 0.0, -10.0), Vec3::ONE);
        assert_eq!(f.classify_box(&b), Containment::Intersecting);
    }

    #[test]
    fn test_orthographic_frustum() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 50.0, 0.0), Vec3::ZERO, Vec3::Z);
        let proj = Mat4::orthographic_rh(-10.0, 10.0, -10.0, 10.0, 1.0, 100.0);
        let f = Frustum::from_view_projection(&(proj * view));
        assert!(f.contains_point(Vec3::ZERO));
        assert!(!f.contains_point(Vec3::new(20.0, 0.0, 0.0)));
    }
}
