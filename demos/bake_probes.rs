//! # Probe Bake Demo
//!
//! Demonstrates:
//! - Building a small scene with a sun, a spot light and a few boxes
//! - Uploading a procedural sky cubemap and a checkerboard floor texture
//! - Rendering one deferred frame on the headless backend
//! - Baking the irradiance grid and both reflection probes
//! - Writing the irradiance file and reading it back
//!
//! ```text
//! cargo run --example bake_probes -- --output probes.bin --dims 3
//! ```

use std::path::PathBuf;

use clap::Parser;
use deferred_probe_renderer::pipeline::shaders;
use deferred_probe_renderer::resources::texture::{upload_cubemap, TextureData};
use deferred_probe_renderer::resources::{Material, Mesh};
use deferred_probe_renderer::scene::{Prefab, PrefabInstance};
use deferred_probe_renderer::{
    Camera, HeadlessBackend, IrradianceGridDesc, Light, RendererConfig, RendererError, Scene,
};
use glam::{Mat4, UVec3, Vec3, Vec4};

/// Bake irradiance and reflection probes for a demo scene.
#[derive(Parser, Debug)]
#[command(name = "bake_probes", about = "Bake light probes for a demo scene")]
struct Args {
    /// Output surface width
    #[arg(long, default_value = "320")]
    width: u32,

    /// Output surface height
    #[arg(long, default_value = "180")]
    height: u32,

    /// Face size of the irradiance bake views
    #[arg(long, default_value = "16")]
    face_size: u32,

    /// Probes along each grid axis
    #[arg(long, default_value = "2")]
    dims: u32,

    /// Where the irradiance file is written
    #[arg(long, default_value = "irradiance.bin")]
    output: PathBuf,
}

/// Horizon-to-zenith gradient, one flat colour per face
fn sky_faces() -> [TextureData; 6] {
    let horizon = Vec4::new(0.75, 0.8, 0.85, 1.0);
    let zenith = Vec4::new(0.25, 0.45, 0.8, 1.0);
    let ground = Vec4::new(0.2, 0.18, 0.15, 1.0);
    // +X, -X, +Y, -Y, +Z, -Z
    let colors = [horizon, horizon, zenith, ground, horizon, horizon];
    colors.map(|color| TextureData {
        label: "sky".to_string(),
        width: 4,
        height: 4,
        texels: vec![color; 16],
    })
}

fn build_scene(backend: &mut HeadlessBackend) -> Result<Scene, RendererError> {
    let mut scene = Scene::new();
    scene.set_environment(Some(upload_cubemap(backend, "sky", &sky_faces())?));

    let checker = TextureData::checkerboard(64, Vec4::ONE, Vec4::new(0.3, 0.3, 0.3, 1.0)).upload(backend)?;
    let cube = scene.assets.add_mesh(Mesh::cube());
    let floor = scene.assets.add_mesh(Mesh::plane(400.0, 400.0, 1));
    let tiles = scene.assets.add_material(
        Material::matte(Vec3::ONE)
            .with_color_texture(checker)
            .with_uv_tiling(20.0),
    );
    let stone = scene.assets.add_material(Material::matte(Vec3::new(0.6, 0.55, 0.5)));
    let brass = scene.assets.add_material(Material::metal(Vec3::new(0.9, 0.7, 0.3), 0.3));
    let glow = scene
        .assets
        .add_material(Material::matte(Vec3::splat(0.1)).with_emissive(Vec3::new(2.0, 1.2, 0.4)));

    let root = scene.assets.node("floor", floor, tiles);
    scene.add_prefab(PrefabInstance::new("floor", Prefab::new("floor", root), Mat4::IDENTITY));
    for (i, x) in [-40.0, 0.0, 40.0, 80.0].into_iter().enumerate() {
        let name = format!("pillar{}", i);
        let root = scene.assets.node(&name, cube, if i % 2 == 0 { stone } else { brass });
        let model = Mat4::from_scale_rotation_translation(
            Vec3::new(8.0, 40.0, 8.0),
            glam::Quat::IDENTITY,
            Vec3::new(x, 20.0, -30.0),
        );
        scene.add_prefab(PrefabInstance::new(&name, Prefab::new(&name, root), model));
    }
    let root = scene.assets.node("beacon", cube, glow);
    let model = Mat4::from_scale_rotation_translation(Vec3::splat(4.0), glam::Quat::IDENTITY, Vec3::new(0.0, 58.0, 20.0));
    scene.add_prefab(PrefabInstance::new("beacon", Prefab::new("beacon", root), model));

    let sun = scene.add_light(
        Light::directional("sun", Vec3::new(100.0, 400.0, 150.0))
            .with_color(Vec3::new(1.0, 0.95, 0.85), 1.2)
            .with_cascades(64.0),
    );
    scene.set_sun(sun);
    scene.add_light(
        Light::spot("lamp", Vec3::new(0.0, 60.0, 20.0), Vec3::new(0.0, 0.0, -30.0))
            .with_color(Vec3::new(1.0, 0.6, 0.3), 3.0),
    );
    scene.add_light(Light::point("fill", Vec3::new(60.0, 15.0, 10.0), 80.0).with_color(Vec3::ONE, 0.5));
    Ok(scene)
}

fn main() -> Result<(), RendererError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut backend = HeadlessBackend::new(args.width, args.height);
    let mut renderer = RendererConfig::default()
        .with_size(args.width, args.height)
        .with_shadow_resolution(128)
        .with_cascades(256, 64.0)
        .with_irradiance_resolution(args.face_size)
        .with_reflection_resolution(32)
        .with_clear_color(Vec4::new(0.35, 0.45, 0.6, 1.0))
        .build(&mut backend);
    backend.register_program(shaders::DEFERRED_LIGHT, deferred_probe_renderer::lighting::DeferredLightProgram);
    renderer.flags_mut().volumetric = true;

    let mut scene = build_scene(&mut backend)?;
    let mut camera = Camera::new(Vec3::new(0.0, 40.0, 120.0), Vec3::new(20.0, 15.0, -30.0));
    camera.set_aspect(args.width as f32, args.height as f32);

    let report = renderer.render_frame(&mut backend, &mut scene, &camera);
    log::info!(
        "Frame: stages {:?}, {} shadow maps, {} nodes drawn, {} light draws",
        report.stages,
        report.shadow_maps,
        report.geometry.drawn,
        report.light_draws
    );

    let desc = IrradianceGridDesc::new(
        Vec3::new(-60.0, 5.0, -60.0),
        Vec3::new(100.0, 60.0, 20.0),
        UVec3::splat(args.dims.max(1)),
    );
    let probes = renderer.bake_irradiance(&mut backend, &mut scene, desc)?.probes().len();
    let reflections = renderer.bake_reflections(&mut backend, &mut scene)?;
    log::info!("Baked {} irradiance probes and {} reflection probes", probes, reflections);

    renderer.save_irradiance(&args.output)?;
    renderer.load_irradiance(&mut backend, &args.output)?;
    let report = renderer.render_frame(&mut backend, &mut scene, &camera);
    log::info!(
        "Reloaded {} and rendered again: stages {:?}",
        args.output.display(),
        report.stages
    );

    renderer.release(&mut backend);
    Ok(())
}
