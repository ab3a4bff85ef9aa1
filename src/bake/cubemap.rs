//! Cube face orientation shared by the probe bakes.
//!
//! A face is rendered with `look_at(eye, eye + front, up)` and a 90° square
//! projection. Row 0 of a read-back face is the top of the image, so texel
//! `(x, y)` looks along `front + u·right + v·up` with `u, v ∈ (-1, 1)` and
//! `v` growing upwards.

use glam::{Mat4, Vec2, Vec3};

use crate::backend::CubeFace;
use crate::scene::RenderView;

/// Orthonormal frame of one cube face
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBasis {
    pub right: Vec3,
    pub up: Vec3,
    pub front: Vec3,
}

const fn basis(right: [f32; 3], up: [f32; 3], front: [f32; 3]) -> FaceBasis {
    FaceBasis {
        right: Vec3::from_array(right),
        up: Vec3::from_array(up),
        front: Vec3::from_array(front),
    }
}

const FACE_BASES: [FaceBasis; 6] = [
    basis([0.0, 0.0, -1.0], [0.0, -1.0, 0.0], [1.0, 0.0, 0.0]),
    basis([0.0, 0.0, 1.0], [0.0, -1.0, 0.0], [-1.0, 0.0, 0.0]),
    basis([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
    basis([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, -1.0, 0.0]),
    basis([1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, 1.0]),
    basis([-1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, -1.0]),
];

pub fn face_basis(face: CubeFace) -> FaceBasis {
    FACE_BASES[face.index()]
}

/// Face coordinates of the centre of texel `(x, y)`
pub fn texel_uv(x: u32, y: u32, width: u32, height: u32) -> (f32, f32) {
    let u = 2.0 * (x as f32 + 0.5) / width as f32 - 1.0;
    let v = 1.0 - 2.0 * (y as f32 + 0.5) / height as f32;
    (u, v)
}

/// Unit direction through the centre of texel `(x, y)`
pub fn texel_direction(face: CubeFace, x: u32, y: u32, width: u32, height: u32) -> Vec3 {
    let b = face_basis(face);
    let (u, v) = texel_uv(x, y, width, height);
    (b.front + b.right * u + b.up * v).normalize()
}

/// Approximate solid angle subtended by a texel at face coordinates `(u, v)`
pub fn texel_solid_angle(u: f32, v: f32, width: u32, height: u32) -> f32 {
    let texel_area = 4.0 / (width * height) as f32;
    texel_area / (1.0 + u * u + v * v).powf(1.5)
}

/// Face hit by `direction` and the texture coordinate (v down) on it
pub fn direction_to_face_uv(direction: Vec3) -> Option<(CubeFace, Vec2)> {
    let a = direction.abs();
    if a.max_element() <= f32::EPSILON {
        return None;
    }
    let face = if a.x >= a.y && a.x >= a.z {
        if direction.x > 0.0 { CubeFace::PositiveX } else { CubeFace::NegativeX }
    } else if a.y >= a.z {
        if direction.y > 0.0 { CubeFace::PositiveY } else { CubeFace::NegativeY }
    } else if direction.z > 0.0 {
        CubeFace::PositiveZ
    } else {
        CubeFace::NegativeZ
    };
    let b = face_basis(face);
    let depth = direction.dot(b.front);
    let u = direction.dot(b.right) / depth;
    let v = direction.dot(b.up) / depth;
    Some((face, Vec2::new((u + 1.0) * 0.5, (1.0 - v) * 0.5)))
}

pub fn face_view_matrix(face: CubeFace, position: Vec3) -> Mat4 {
    let b = face_basis(face);
    Mat4::look_at_rh(position, position + b.front, b.up)
}

/// 90° square view looking through `face` from `position`
pub fn face_render_view(face: CubeFace, position: Vec3, near: f32, far: f32) -> RenderView {
    let view = face_view_matrix(face, position);
    let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, near, far);
    RenderView::new(view, projection, position, position + face_basis(face).front, near, far)
}
