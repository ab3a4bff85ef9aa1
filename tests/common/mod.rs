//! Shared fixtures for the headless integration tests.

#![allow(dead_code)]

use deferred_probe_renderer::backend::headless::HeadlessBackend;
use deferred_probe_renderer::backend::{Framebuffer, FramebufferDescriptor, GraphicsBackend, TextureFormat};
use deferred_probe_renderer::lighting::shading::encode_normal;
use deferred_probe_renderer::lighting::DeferredLightProgram;
use deferred_probe_renderer::pipeline::shaders;
use deferred_probe_renderer::resources::{Material, Mesh};
use deferred_probe_renderer::scene::{Camera, Prefab, PrefabInstance, RenderView, Scene};
use glam::{Mat4, Vec3, Vec4};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Backends
// ============================================================================

/// Headless backend with every built-in shader and the software lighting
pub fn lit_backend(width: u32, height: u32) -> HeadlessBackend {
    init_logging();
    let mut backend = HeadlessBackend::new(width, height);
    shaders::compile_builtin(&mut backend);
    backend.register_program(shaders::DEFERRED_LIGHT, DeferredLightProgram);
    backend
}

// ============================================================================
// Geometry buffers
// ============================================================================

/// Camera ten units in front of the `z = 0` wall, looking at the origin
pub fn wall_view() -> RenderView {
    Camera::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO).render_view()
}

/// Depth of the `z = 0` plane as seen from [`wall_view`]. The plane faces
/// the camera so the value is the same at every pixel.
pub fn wall_depth(view: &RenderView) -> f32 {
    let clip = view.view_projection * Vec4::new(0.0, 0.0, 0.0, 1.0);
    clip.z / clip.w
}

/// Geometry buffer covered by a white, fully rough wall facing +Z
pub fn wall_gbuffer(backend: &mut HeadlessBackend, view: &RenderView) -> Framebuffer {
    let (width, height) = backend.surface_size();
    let gbuffer = backend
        .create_framebuffer(&FramebufferDescriptor::color(
            "gbuffer",
            width,
            height,
            3,
            TextureFormat::Rgba16Float,
        ))
        .expect("geometry buffer");
    let texels = (width * height) as usize;
    let fill = |v: Vec4| vec![v; texels];
    backend
        .write_texture(gbuffer.color(0).unwrap(), None, &fill(Vec4::ONE))
        .unwrap();
    backend
        .write_texture(gbuffer.color(1).unwrap(), None, &fill(encode_normal(Vec3::Z).extend(1.0)))
        .unwrap();
    backend
        .write_texture(gbuffer.color(2).unwrap(), None, &fill(Vec4::new(0.0, 1.0, 0.0, 1.0)))
        .unwrap();
    backend
        .write_texture(
            gbuffer.depth_texture.unwrap(),
            None,
            &fill(Vec4::new(wall_depth(view), 0.0, 0.0, 0.0)),
        )
        .unwrap();
    gbuffer
}

/// Screen pixels as RGB
pub fn screen_rgb(backend: &HeadlessBackend) -> Vec<Vec3> {
    backend
        .screen()
        .expect("screen")
        .pixels()
        .map(|p| Vec3::new(p.0[0], p.0[1], p.0[2]))
        .collect()
}

// ============================================================================
// Scenes
// ============================================================================

/// Unit cubes placed at `positions`, one prefab instance each
pub fn cubes_at(positions: &[Vec3]) -> Scene {
    let mut scene = Scene::new();
    let mesh = scene.assets.add_mesh(Mesh::cube());
    let material = scene.assets.add_material(Material::default());
    for (i, position) in positions.iter().enumerate() {
        let name = format!("cube{}", i);
        let root = scene.assets.node(&name, mesh, material);
        scene.add_prefab(PrefabInstance::new(
            &name,
            Prefab::new(&name, root),
            Mat4::from_translation(*position),
        ));
    }
    scene
}
