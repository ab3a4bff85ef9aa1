//! Cascade atlas layout for directional lights

use glam::{Mat4, Vec2, Vec3};

use crate::backend::Viewport;

pub const CASCADE_COUNT: usize = 4;

/// Placement of one cascade inside the shadow atlas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeSlot {
    pub index: usize,
    /// Orthographic half extent, `base * (index + 1)`
    pub half_extent: f32,
    pub viewport: Viewport,
    /// World-space size of one shadow texel in this cascade
    pub texel_size: f32,
}

/// Cascade `i` covers `±base·(i+1)` and owns quadrant `i` of the atlas,
/// filled left to right, top to bottom.
pub fn cascade_slots(base_half_extent: f32, atlas_resolution: u32) -> [CascadeSlot; CASCADE_COUNT] {
    let quadrant = atlas_resolution / 2;
    std::array::from_fn(|index| {
        let half_extent = base_half_extent * (index + 1) as f32;
        CascadeSlot {
            index,
            half_extent,
            viewport: Viewport::new(
                (index as u32 % 2) * quadrant,
                (index as u32 / 2) * quadrant,
                quadrant,
                quadrant,
            ),
            texel_size: super::texel_size(half_extent, quadrant),
        }
    })
}

/// UV offset of a cascade's quadrant inside the atlas
pub fn atlas_offset(index: usize) -> Vec2 {
    Vec2::new((index % 2) as f32 * 0.5, (index / 2) as f32 * 0.5)
}

/// Shadow-map UV (v down) and depth of a world point seen by `view_projection`
pub fn project_to_shadow(view_projection: &Mat4, world: Vec3) -> (Vec2, f32) {
    let clip = *view_projection * world.extend(1.0);
    let ndc = clip.truncate() / clip.w;
    (Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5), ndc.z)
}

/// First (tightest) cascade whose frustum contains `world`, with the atlas UV
pub fn select_cascade(matrices: &[Mat4], world: Vec3) -> Option<(usize, Vec2, f32)> {
    matrices.iter().enumerate().find_map(|(index, m)| {
        let (uv, depth) = project_to_shadow(m, world);
        let inside = (0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y) && (0.0..=1.0).contains(&depth);
        inside.then(|| (index, uv * 0.5 + atlas_offset(index), depth))
    })
}
