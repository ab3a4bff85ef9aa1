//! Shadow map stabilisation and lifecycle.

mod common;

use rstest::rstest;

use common::{cubes_at, lit_backend};
use deferred_probe_renderer::scene::{Camera, Light};
use deferred_probe_renderer::shadow::{
    cascade_slots, directional_view, snap_to_texel_grid, texel_size, update_shadows, ShadowMatrices,
    ShadowSettings, ShadowState,
};
use glam::Vec3;

fn is_multiple_of(value: f32, grid: f32) -> bool {
    let steps = value / grid;
    (steps - steps.round()).abs() < 1e-3
}

#[rstest]
#[case(512.0, 1024)]
#[case(256.0, 2048)]
#[case(100.0, 512)]
#[case(37.5, 1000)]
fn test_snap_is_idempotent_across_positions(#[case] half_extent: f32, #[case] map_size: u32) {
    let grid = texel_size(half_extent, map_size);
    for i in -200..200 {
        let x = i as f32 * 0.731 + 0.013;
        let once = snap_to_texel_grid(x, grid);
        assert_eq!(snap_to_texel_grid(once, grid), once);
        assert!(is_multiple_of(once, grid));
        assert!((once - x).abs() <= grid * 0.5 + 1e-5);
    }
}

#[rstest]
#[case(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO)]
#[case(Vec3::new(13.3, 4.0, -7.1), Vec3::new(10.05, 0.0, -3.7))]
#[case(Vec3::new(-120.0, 30.0, 44.0), Vec3::new(-118.2, 1.1, 40.9))]
fn test_directional_view_is_texel_aligned(#[case] eye: Vec3, #[case] target: Vec3) {
    let light = Light::directional("sun", Vec3::new(30.0, 400.0, 20.0));
    let observer = Camera::new(eye, target).render_view();
    let grid = texel_size(256.0, 1024);
    let view = directional_view(&light, &observer, 256.0, 1024);
    assert!(is_multiple_of(view.view.w_axis.x, grid));
    assert!(is_multiple_of(view.view.w_axis.y, grid));
}

#[test]
fn test_each_cascade_snaps_to_its_own_texel() {
    let slots = cascade_slots(64.0, 1024);
    for pair in slots.windows(2) {
        assert!(pair[1].texel_size > pair[0].texel_size);
    }
    let light = Light::directional("sun", Vec3::new(0.0, 300.0, 100.0)).with_cascades(64.0);
    let observer = Camera::new(Vec3::new(3.3, 5.0, 9.1), Vec3::new(1.7, 0.0, 2.2)).render_view();
    for slot in slots {
        let view = directional_view(&light, &observer, slot.half_extent, slot.viewport.width);
        assert!(is_multiple_of(view.view.w_axis.x, slot.texel_size));
    }
}

#[test]
fn test_frame_renders_every_visible_shadow() {
    let mut backend = lit_backend(8, 8);
    let mut scene = cubes_at(&[Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0)]);
    scene.assets.upload_pending(&mut backend).unwrap();
    let sun = scene.add_light(Light::directional("sun", Vec3::new(0.0, 200.0, 50.0)).with_cascades(32.0));
    let spot = scene.add_light(Light::spot("spot", Vec3::new(0.0, 6.0, 0.0), Vec3::ZERO));
    let ambient = scene.add_light(Light::ambient("fill", Vec3::splat(0.05)));
    let mut hidden = Light::spot("hidden", Vec3::new(0.0, 6.0, 3.0), Vec3::ZERO);
    hidden.visible = false;
    let hidden = scene.add_light(hidden);

    let settings = ShadowSettings {
        resolution: 64,
        cascade_atlas_resolution: 128,
        cascade_size: 16.0,
    };
    let observer = Camera::default().render_view();
    assert_eq!(update_shadows(&mut backend, &mut scene, &observer, &settings), 2);

    let state = |id| scene.light(id).unwrap().shadow().map(|s| s.state());
    assert_eq!(state(sun), Some(ShadowState::Rendered));
    assert_eq!(state(spot), Some(ShadowState::Rendered));
    assert_eq!(state(ambient), None);
    assert_ne!(state(hidden), Some(ShadowState::Rendered));
    let sun_shadow = scene.light(sun).unwrap().shadow().unwrap();
    assert!(matches!(sun_shadow.matrices(), Some(ShadowMatrices::Cascaded(_))));
    assert_eq!(sun_shadow.target().unwrap().resolution, 128);
}
