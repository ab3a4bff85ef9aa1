//! Diagnostic overlays
//!
//! Drawn after the final image and never read back by another stage.

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

use crate::backend::headless::{Fragment, FragmentProgram};
use crate::backend::{
    ClearValues, Framebuffer, GpuMesh, GraphicsBackend, PrimitiveTopology, RenderState, TextureHandle,
    UniformValue, Viewport,
};
use crate::bake::IrradianceGrid;
use crate::scene::{LightKind, RenderView, Scene};

use super::state::with_render_state;
use super::{forward_pass, shaders};

/// World radius of a probe marker
pub const PROBE_MARKER_SIZE: f32 = 5.0;

/// Map a non-linear depth in `[0, 1]` back to `[0, 1]` between near and far
pub fn linearize_depth(depth: f32, near: f32, far: f32) -> f32 {
    if far <= near {
        return depth;
    }
    let linear = near * far / (far - depth * (far - near));
    ((linear - near) / (far - near)).clamp(0.0, 1.0)
}

/// Square thumbnail slot `index` counted from the top-left corner
pub fn thumbnail(surface: (u32, u32), index: u32) -> Viewport {
    let size = (surface.0.min(surface.1) / 4).max(1);
    let per_row = (surface.0 / size).max(1);
    Viewport::new((index % per_row) * size, (index / per_row) * size, size, size)
}

/// Quadrant `index` (0..4) of a 2×2 grid over the surface
pub fn quadrant(surface: (u32, u32), index: u32) -> Viewport {
    let (w, h) = (surface.0 / 2, surface.1 / 2);
    Viewport::new((index % 2) * w, (index / 2) * h, w.max(1), h.max(1))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DebugOverlay;

impl DebugOverlay {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &str {
        "Debug Overlay"
    }

    fn blit_depth<B: GraphicsBackend>(&self, backend: &mut B, depth: TextureHandle, near_far: Option<Vec2>) -> bool {
        let Some(shader) = backend.find_shader(shaders::DEPTH_VIEW) else {
            log::warn!("{}: shader '{}' missing", self.name(), shaders::DEPTH_VIEW);
            return false;
        };
        backend.bind_shader(shader);
        backend.set_uniform("u_linearize", near_far.is_some().into());
        backend.set_uniform("u_camera_nearfar", near_far.unwrap_or(Vec2::new(0.0, 1.0)).into());
        backend.blit(depth, None, Some(shader));
        backend.unbind_shader();
        true
    }

    /// Thumbnails of every rendered shadow map flagged for display.
    /// Spot and point maps are perspective and get linearised.
    pub fn shadow_maps<B: GraphicsBackend>(&self, backend: &mut B, scene: &Scene) -> usize {
        let surface = backend.surface_size();
        let mut shown = 0;
        with_render_state(backend, RenderState::FULLSCREEN, |backend| {
            for (_, light) in scene.lights().filter(|(_, l)| l.visible && l.show_shadow_map) {
                let Some(shadow) = light.shadow() else {
                    continue;
                };
                let (Some(depth), Some(_)) = (shadow.depth_texture(), shadow.matrices()) else {
                    continue;
                };
                let near_far = match light.kind {
                    LightKind::Spot | LightKind::Point => Some(Vec2::new(
                        shadow.camera.projection.near(),
                        shadow.camera.projection.far(),
                    )),
                    _ => None,
                };
                backend.set_viewport(thumbnail(surface, shown as u32));
                if self.blit_depth(backend, depth, near_far) {
                    shown += 1;
                }
            }
        });
        backend.set_viewport(Viewport::full(surface.0, surface.1));
        shown
    }

    /// The scene as seen by each light flagged with `show_camera`, forward
    /// lit into a thumbnail on the second row
    pub fn light_cameras<B: GraphicsBackend>(&self, backend: &mut B, scene: &Scene) -> usize {
        let surface = backend.surface_size();
        let per_row = (surface.0 / thumbnail(surface, 0).width).max(1);
        let mut shown = 0;
        for (_, light) in scene.lights().filter(|(_, l)| l.visible && l.show_camera) {
            let Some(shadow) = light.shadow() else {
                continue;
            };
            let view = shadow.camera.render_view();
            backend.set_viewport(thumbnail(surface, per_row + shown as u32));
            backend.clear(ClearValues::depth_only());
            forward_pass::draw_scene(backend, scene, &view);
            shown += 1;
        }
        backend.set_viewport(Viewport::full(surface.0, surface.1));
        shown
    }

    /// Albedo, normal, metal/roughness and linearised depth in a 2×2 grid
    pub fn gbuffer_grid<B: GraphicsBackend>(&self, backend: &mut B, gbuffer: &Framebuffer, view: &RenderView) -> bool {
        let surface = backend.surface_size();
        let (Some(albedo), Some(normal), Some(extra), Some(depth)) =
            (gbuffer.color(0), gbuffer.color(1), gbuffer.color(2), gbuffer.depth_texture)
        else {
            return false;
        };
        with_render_state(backend, RenderState::FULLSCREEN, |backend| {
            for (i, texture) in [albedo, normal, extra].into_iter().enumerate() {
                backend.set_viewport(quadrant(surface, i as u32));
                backend.blit(texture, None, None);
            }
            backend.set_viewport(quadrant(surface, 3));
            self.blit_depth(backend, depth, Some(Vec2::new(view.near, view.far)));
        });
        backend.set_viewport(Viewport::full(surface.0, surface.1));
        true
    }

    pub fn ambient_occlusion<B: GraphicsBackend>(&self, backend: &mut B, ao: TextureHandle) {
        with_render_state(backend, RenderState::FULLSCREEN, |backend| {
            backend.blit(ao, None, None);
        });
    }

    /// One sphere per irradiance probe shaded by its coefficients
    pub fn probes<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        view: &RenderView,
        grid: &IrradianceGrid,
        sphere: &GpuMesh,
    ) -> usize {
        let Some(shader) = backend.find_shader(shaders::PROBE) else {
            log::warn!("{}: shader '{}' missing", self.name(), shaders::PROBE);
            return 0;
        };
        with_render_state(backend, RenderState::FULLSCREEN, |backend| {
            backend.bind_shader(shader);
            backend.set_uniform("u_viewprojection", view.view_projection.into());
            for probe in grid.probes() {
                let model =
                    Mat4::from_scale_rotation_translation(Vec3::splat(PROBE_MARKER_SIZE), Quat::IDENTITY, probe.position);
                backend.set_uniform("u_model", model.into());
                backend.set_uniform("u_coeffs", UniformValue::Vec3Array(probe.sh.coeffs.to_vec()));
                backend.draw_mesh(sphere, PrimitiveTopology::TriangleList);
            }
        });
        backend.unbind_shader();
        grid.probes().len()
    }
}

/// CPU version of the `depth_view` shader
#[derive(Debug, Default, Clone, Copy)]
pub struct DepthViewProgram;

impl FragmentProgram for DepthViewProgram {
    fn shade(&self, fragment: &Fragment<'_>) -> Vec4 {
        let depth = fragment.sample("u_texture", fragment.uv).map_or(1.0, |d| d.x);
        let value = match fragment.vec2("u_camera_nearfar") {
            Some(nf) if fragment.flag("u_linearize") => linearize_depth(depth, nf.x, nf.y),
            _ => depth,
        };
        Vec3::splat(value).extend(1.0)
    }
}

/// Depth texture viewer
pub const DEPTH_VIEW_SHADER: &str = r#"
// Shows a depth texture as grey levels

struct Uniforms {
    camera_nearfar: vec2<f32>,
    linearize: u32,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(1) @binding(0) var source: texture_depth_2d;
@group(1) @binding(1) var source_sampler: sampler;

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    var d = textureSample(source, source_sampler, input.uv);
    if u.linearize != 0u {
        let n = u.camera_nearfar.x;
        let f = u.camera_nearfar.y;
        let z = n * f / (f - d * (f - n));
        d = clamp((z - n) / (f - n), 0.0, 1.0);
    }
    return vec4<f32>(vec3<f32>(d), 1.0);
}
"#;

/// Irradiance probe marker
pub const PROBE_SHADER: &str = r#"
// Sphere shaded with a probe's spherical harmonics

struct Uniforms {
    model: mat4x4<f32>,
    viewprojection: mat4x4<f32>,
    coeffs: array<vec4<f32>, 9>,
}

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) normal: vec3<f32>,
}

@group(0) @binding(0) var<uniform> u: Uniforms;

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    output.clip_position = u.viewprojection * u.model * vec4<f32>(input.position, 1.0);
    output.normal = normalize((u.model * vec4<f32>(input.normal, 0.0)).xyz);
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let n = normalize(input.normal);
    let x = n.x;
    let y = n.y;
    let z = n.z;
    var c = u.coeffs[0].rgb * 0.886227;
    c = c + u.coeffs[1].rgb * 1.023328 * y;
    c = c + u.coeffs[2].rgb * 1.023328 * z;
    c = c + u.coeffs[3].rgb * 1.023328 * x;
    c = c + u.coeffs[4].rgb * 0.858086 * x * y;
    c = c + u.coeffs[5].rgb * 0.858086 * y * z;
    c = c + u.coeffs[6].rgb * 0.247708 * (3.0 * z * z - 1.0);
    c = c + u.coeffs[7].rgb * 0.858086 * x * z;
    c = c + u.coeffs[8].rgb * 0.429043 * (x * x - y * y);
    return vec4<f32>(max(c, vec3<f32>(0.0)) / 3.141593, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Command, HeadlessBackend};
    use crate::backend::{FramebufferDescriptor, TextureFormat};
    use crate::bake::IrradianceGridDesc;
    use crate::resources::Mesh;
    use crate::scene::{Camera, Light};
    use crate::shadow::{update_shadows, ShadowSettings};
    use approx::assert_relative_eq;
    use glam::UVec3;

    #[test]
    fn test_linearize_depth_endpoints() {
        assert_relative_eq!(linearize_depth(0.0, 0.1, 100.0), 0.0);
        assert_relative_eq!(linearize_depth(1.0, 0.1, 100.0), 1.0, epsilon = 1e-5);
        // Perspective depth crowds towards 1
        assert!(linearize_depth(0.9, 0.1, 100.0) < 0.01);
    }

    #[test]
    fn test_quadrants_tile_the_surface() {
        let viewports: Vec<Viewport> = (0..4).map(|i| quadrant((64, 32), i)).collect();
        assert_eq!(viewports[0], Viewport::new(0, 0, 32, 16));
        assert_eq!(viewports[3], Viewport::new(32, 16, 32, 16));
    }

    #[test]
    fn test_gbuffer_grid_fills_each_quadrant() {
        let mut backend = HeadlessBackend::new(4, 4);
        shaders::compile_builtin(&mut backend);
        backend.register_program(shaders::DEPTH_VIEW, DepthViewProgram);
        let gbuffer = backend
            .create_framebuffer(&FramebufferDescriptor::color("gbuffer", 4, 4, 3, TextureFormat::Rgba16Float))
            .unwrap();
        for (i, color) in [Vec4::X, Vec4::Y, Vec4::Z].into_iter().enumerate() {
            backend.write_texture(gbuffer.color(i).unwrap(), None, &[color; 16]).unwrap();
        }
        backend.bind_framebuffer(Some(gbuffer.handle));
        backend.clear(ClearValues::depth_only());
        backend.bind_framebuffer(None);

        let view = Camera::default().render_view();
        assert!(DebugOverlay::new().gbuffer_grid(&mut backend, &gbuffer, &view));
        let screen = backend.screen().unwrap();
        assert_eq!(screen.get_pixel(0, 0).0[0], 1.0);
        assert_eq!(screen.get_pixel(3, 0).0[1], 1.0);
        assert_eq!(screen.get_pixel(0, 3).0[2], 1.0);
        // Cleared depth is the far plane
        assert_relative_eq!(screen.get_pixel(3, 3).0[0], 1.0, epsilon = 1e-4);
        assert_eq!(backend.viewport(), Viewport::full(4, 4));
    }

    #[test]
    fn test_one_marker_per_probe_without_depth() {
        let mut backend = HeadlessBackend::default();
        shaders::compile_builtin(&mut backend);
        let sphere = backend.upload_mesh(&Mesh::sphere(8, 4)).unwrap();
        let grid =
            IrradianceGrid::from_desc(&IrradianceGridDesc::new(Vec3::ZERO, Vec3::splat(10.0), UVec3::new(2, 1, 2)))
                .unwrap();
        let view = Camera::default().render_view();

        assert_eq!(DebugOverlay::new().probes(&mut backend, &view, &grid, &sphere), 4);
        assert_eq!(backend.mesh_draws_with(shaders::PROBE), 4);
        let uniforms = backend.uniforms_of(shaders::PROBE).unwrap();
        assert_eq!(uniforms["u_coeffs"].as_vec3_array().map(|c| c.len()), Some(9));
        let depth_tested = backend.commands().iter().any(|c| matches!(c, Command::RenderState(s) if s.depth_test));
        assert!(!depth_tested);
        assert_eq!(backend.render_state(), RenderState::BASELINE);
    }

    #[test]
    fn test_only_flagged_rendered_shadow_maps_are_shown() {
        let mut backend = HeadlessBackend::new(16, 16);
        shaders::compile_builtin(&mut backend);
        let mut scene = Scene::new();
        let mut spot = Light::spot("spot", Vec3::new(0.0, 5.0, 0.0), Vec3::ZERO);
        spot.show_shadow_map = true;
        scene.add_light(spot);
        scene.add_light(Light::spot("quiet", Vec3::new(5.0, 5.0, 0.0), Vec3::ZERO));
        let overlay = DebugOverlay::new();
        assert_eq!(overlay.shadow_maps(&mut backend, &scene), 0);

        let view = Camera::default().render_view();
        update_shadows(&mut backend, &mut scene, &view, &ShadowSettings::default());
        backend.take_commands();
        assert_eq!(overlay.shadow_maps(&mut backend, &scene), 1);
        let blits = backend
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::Blit { shader: Some(s), .. } if s == shaders::DEPTH_VIEW))
            .count();
        assert_eq!(blits, 1);
        let uniforms = backend.uniforms_of(shaders::DEPTH_VIEW).unwrap();
        assert_eq!(uniforms["u_linearize"].as_bool(), Some(true));
    }
}
