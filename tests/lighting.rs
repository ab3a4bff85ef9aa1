//! Light accumulation on the headless backend.

mod common;

use approx::assert_relative_eq;
use rstest::rstest;

use common::{lit_backend, screen_rgb, wall_gbuffer, wall_view};
use deferred_probe_renderer::pipeline::{LightingInputs, LightingPass};
use deferred_probe_renderer::scene::{Light, Scene};
use glam::Vec3;

fn accumulate(scene: &Scene) -> Vec<Vec3> {
    let mut backend = lit_backend(6, 6);
    let view = wall_view();
    let gbuffer = wall_gbuffer(&mut backend, &view);
    let inputs = LightingInputs {
        gbuffer: &gbuffer,
        ambient_occlusion: None,
        irradiance: None,
    };
    LightingPass::new().execute(&mut backend, scene, &view, &inputs);
    screen_rgb(&backend)
}

fn lights() -> [Light; 3] {
    [
        Light::point("red", Vec3::new(-3.0, 0.0, 2.0), 10.0).with_color(Vec3::new(1.0, 0.2, 0.2), 2.0),
        Light::point("green", Vec3::new(2.0, 1.0, 3.0), 8.0).with_color(Vec3::new(0.2, 1.0, 0.2), 1.5),
        Light::spot("blue", Vec3::new(0.0, -2.0, 4.0), Vec3::ZERO).with_color(Vec3::new(0.2, 0.2, 1.0), 3.0),
    ]
}

#[rstest]
#[case::reversed([2, 1, 0])]
#[case::rotated([1, 2, 0])]
#[case::swapped([0, 2, 1])]
fn test_light_order_does_not_change_sum(#[case] order: [usize; 3]) {
    let mut baseline = Scene::new();
    for light in lights() {
        baseline.add_light(light);
    }
    let mut shuffled = Scene::new();
    let all = lights();
    for i in order {
        shuffled.add_light(all[i].clone());
    }

    let expected = accumulate(&baseline);
    let actual = accumulate(&shuffled);
    assert!(expected.iter().any(|c| c.max_element() > 0.2), "lights should reach the wall");
    for (a, b) in expected.iter().zip(&actual) {
        assert_relative_eq!(a.x, b.x, epsilon = 1e-4);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-4);
        assert_relative_eq!(a.z, b.z, epsilon = 1e-4);
    }
}

#[test]
fn test_unlit_scene_shows_ambient_everywhere() {
    let scene = Scene::new();
    assert_eq!(scene.ambient_light, Vec3::splat(0.1));
    for pixel in accumulate(&scene) {
        assert_relative_eq!(pixel.x, 0.1, epsilon = 1e-5);
        assert_relative_eq!(pixel.y, 0.1, epsilon = 1e-5);
        assert_relative_eq!(pixel.z, 0.1, epsilon = 1e-5);
    }
}

#[rstest]
#[case(5.0)]
#[case(10.0)]
#[case(19.9)]
fn test_point_light_beyond_range_adds_nothing(#[case] max_distance: f32) {
    let mut scene = Scene::new();
    scene.ambient_light_enabled = false;
    // Every visible wall point is at least 20 units away
    scene.add_light(Light::point("far", Vec3::new(0.0, 0.0, 20.0), max_distance).with_color(Vec3::ONE, 100.0));
    for pixel in accumulate(&scene) {
        assert_eq!(pixel, Vec3::ZERO);
    }
}

#[test]
fn test_point_light_within_range_lights_the_wall() {
    let mut scene = Scene::new();
    scene.ambient_light_enabled = false;
    scene.add_light(Light::point("near", Vec3::new(0.0, 0.0, 3.0), 10.0).with_color(Vec3::ONE, 1.0));
    let pixels = accumulate(&scene);
    assert!(pixels.iter().all(|p| p.x > 0.0));
}

#[test]
fn test_hidden_lights_are_not_accumulated() {
    let mut visible = Scene::new();
    visible.add_light(lights()[0].clone());
    let mut with_hidden = Scene::new();
    with_hidden.add_light(lights()[0].clone());
    let mut hidden = lights()[1].clone();
    hidden.visible = false;
    with_hidden.add_light(hidden);
    assert_eq!(accumulate(&visible), accumulate(&with_hidden));
}
