//! Volumetric sun light
//!
//! Ray-marches from the eye to the visible surface (or `max_distance` for
//! background pixels) and counts how many samples the sun's shadow map sees.
//! The lit fraction tints a fog layer that is alpha-blended over the image.

use glam::{Mat4, Vec3, Vec4};

use crate::backend::headless::{Fragment, FragmentProgram};
use crate::backend::{BlendMode, Framebuffer, GraphicsBackend, RenderState};
use crate::lighting::shading::{reconstruct_position, shadow_factor};
use crate::scene::{RenderView, Scene};
use crate::shadow::{self, ShadowState};

use super::shaders;
use super::state::with_render_state;

pub const DEPTH_UNIT: u32 = 0;
pub const SHADOW_UNIT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumetricSettings {
    pub steps: u32,
    pub max_distance: f32,
    /// Extinction per world unit
    pub density: f32,
}

impl Default for VolumetricSettings {
    fn default() -> Self {
        Self {
            steps: 32,
            max_distance: 200.0,
            density: 0.005,
        }
    }
}

/// Result of one march
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InScatter {
    /// Fraction of samples the sun reaches
    pub lit: f32,
    /// Fog opacity along the ray
    pub opacity: f32,
}

/// March `steps` samples between `start` and `end`, at most `max_distance`
/// long. `visibility` returns 1 where the sun is visible.
pub fn march_in_scatter(
    start: Vec3,
    end: Vec3,
    settings: &VolumetricSettings,
    visibility: impl Fn(Vec3) -> f32,
) -> InScatter {
    let ray = end - start;
    let length = ray.length().min(settings.max_distance);
    let direction = ray.normalize_or_zero();
    if length <= 0.0 || settings.steps == 0 {
        return InScatter { lit: 0.0, opacity: 0.0 };
    }
    let step = length / settings.steps as f32;
    let visible: f32 = (0..settings.steps)
        .map(|i| visibility(start + direction * (i as f32 + 0.5) * step))
        .sum();
    InScatter {
        lit: visible / settings.steps as f32,
        opacity: 1.0 - (-settings.density * length).exp(),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VolumetricPass {
    pub settings: VolumetricSettings,
}

impl VolumetricPass {
    pub fn new(settings: VolumetricSettings) -> Self {
        Self { settings }
    }

    pub fn name(&self) -> &str {
        "Volumetric Pass"
    }

    /// Blend sun in-scattering over the bound target. Needs a designated sun
    /// whose shadow map was rendered this frame.
    pub fn execute<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        scene: &Scene,
        view: &RenderView,
        gbuffer: &Framebuffer,
    ) -> bool {
        let Some((_, sun)) = scene.sun() else {
            log::trace!("{}: no sun", self.name());
            return false;
        };
        if sun.shadow().map(|s| s.state()) != Some(ShadowState::Rendered) {
            log::debug!("{}: sun '{}' has no rendered shadow map", self.name(), sun.name);
            return false;
        }
        let Some(shader) = backend.find_shader(shaders::VOLUMETRIC) else {
            log::warn!("{}: shader '{}' missing, skipping", self.name(), shaders::VOLUMETRIC);
            return false;
        };
        let Some(depth) = gbuffer.depth_texture else {
            return false;
        };

        with_render_state(backend, RenderState::FULLSCREEN.with_blend(BlendMode::Alpha), |backend| {
            backend.bind_shader(shader);
            backend.set_uniform("u_inverse_viewprojection", view.inverse_view_projection.into());
            backend.set_uniform("u_camera_position", view.eye.into());
            backend.set_texture("u_depth_texture", depth, DEPTH_UNIT);
            backend.set_uniform("u_light_color", (sun.color * sun.intensity).into());
            backend.set_uniform("u_light_direction", sun.direction().into());
            backend.set_uniform("u_light_bias", sun.bias.into());
            shadow::upload_shadow_uniforms(backend, sun, SHADOW_UNIT);
            backend.set_uniform("u_steps", (self.settings.steps as i32).into());
            backend.set_uniform("u_max_distance", self.settings.max_distance.into());
            backend.set_uniform("u_density", self.settings.density.into());
            backend.draw_fullscreen_quad();
        });
        backend.unbind_shader();
        log::debug!("{}: {} steps towards '{}'", self.name(), self.settings.steps, sun.name);
        true
    }
}

/// CPU version of the `volumetric` shader
#[derive(Debug, Default, Clone, Copy)]
pub struct VolumetricProgram;

impl FragmentProgram for VolumetricProgram {
    fn shade(&self, fragment: &Fragment<'_>) -> Vec4 {
        let (Some(inverse), Some(eye)) = (
            fragment.mat4("u_inverse_viewprojection"),
            fragment.vec3("u_camera_position"),
        ) else {
            return Vec4::ZERO;
        };
        let settings = VolumetricSettings {
            steps: fragment.int("u_steps").unwrap_or(0).max(0) as u32,
            max_distance: fragment.float("u_max_distance").unwrap_or(0.0),
            density: fragment.float("u_density").unwrap_or(0.0),
        };
        let depth = fragment.sample("u_depth_texture", fragment.uv).map_or(1.0, |d| d.x);
        let end = if depth >= 1.0 {
            let far = reconstruct_position(&inverse, fragment.uv, 1.0);
            eye + (far - eye).normalize_or_zero() * settings.max_distance
        } else {
            reconstruct_position(&inverse, fragment.uv, depth)
        };

        let cascaded = fragment.flag("u_light_is_cascade");
        let matrices: Vec<Mat4> = if cascaded {
            fragment.mat4_array("u_shadow_viewprojections").unwrap_or_default().to_vec()
        } else {
            fragment.mat4("u_shadow_viewprojection").into_iter().collect()
        };
        let bias = fragment.float("u_light_bias").unwrap_or(0.0);
        let scatter = march_in_scatter(eye, end, &settings, |p| {
            shadow_factor(&matrices, cascaded, bias, p, |uv| {
                fragment.sample("u_shadowmap", uv).map_or(1.0, |s| s.x)
            })
        });
        let color = fragment.vec3("u_light_color").unwrap_or_default() * scatter.lit;
        color.extend(scatter.opacity)
    }
}

/// Volumetric in-scattering shader
pub const VOLUMETRIC_SHADER: &str = r#"
// Sun in-scattering, ray-marched against the sun's shadow map

struct Uniforms {
    inverse_viewprojection: mat4x4<f32>,
    camera_position: vec3<f32>,
    light_color: vec3<f32>,
    light_direction: vec3<f32>,
    light_bias: f32,
    light_is_cascade: u32,
    shadow_viewprojection: mat4x4<f32>,
    shadow_viewprojections: array<mat4x4<f32>, 4>,
    steps: i32,
    max_distance: f32,
    density: f32,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(1) @binding(0) var depth_texture: texture_depth_2d;
@group(1) @binding(1) var shadowmap: texture_depth_2d;
@group(1) @binding(2) var shadow_sampler: sampler_comparison;

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}

fn unproject(uv: vec2<f32>, depth: f32) -> vec3<f32> {
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let world = u.inverse_viewprojection * ndc;
    return world.xyz / world.w;
}

fn shadow_uv(vp: mat4x4<f32>, world_pos: vec3<f32>) -> vec3<f32> {
    let clip = vp * vec4<f32>(world_pos, 1.0);
    let ndc = clip.xyz / clip.w;
    return vec3<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5, ndc.z);
}

fn in_unit(p: vec3<f32>) -> bool {
    return all(p >= vec3<f32>(0.0)) && all(p <= vec3<f32>(1.0));
}

fn sun_visibility(world_pos: vec3<f32>) -> f32 {
    var p = vec3<f32>(-1.0);
    if u.light_is_cascade != 0u {
        for (var i = 0; i < 4; i = i + 1) {
            let c = shadow_uv(u.shadow_viewprojections[i], world_pos);
            if in_unit(c) {
                let offset = vec2<f32>(f32(i % 2), f32(i / 2)) * 0.5;
                p = vec3<f32>(c.xy * 0.5 + offset, c.z);
                break;
            }
        }
    } else {
        p = shadow_uv(u.shadow_viewprojection, world_pos);
    }
    if !in_unit(p) {
        return 1.0;
    }
    return textureSampleCompareLevel(shadowmap, shadow_sampler, p.xy, p.z - u.light_bias);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let depth = textureLoad(depth_texture, vec2<i32>(input.position.xy), 0);
    var end = unproject(input.uv, depth);
    if depth >= 1.0 {
        end = u.camera_position + normalize(unproject(input.uv, 1.0) - u.camera_position) * u.max_distance;
    }
    let ray = end - u.camera_position;
    let length = min(length(ray), u.max_distance);
    let direction = normalize(ray);
    let step = length / f32(u.steps);
    var visible = 0.0;
    for (var i = 0; i < u.steps; i = i + 1) {
        visible = visible + sun_visibility(u.camera_position + direction * (f32(i) + 0.5) * step);
    }
    let lit = visible / f32(u.steps);
    return vec4<f32>(u.light_color * lit, 1.0 - exp(-u.density * length));
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;
    use crate::backend::{ClearValues, FramebufferDescriptor, TextureFormat};
    use crate::scene::{Camera, Light};
    use crate::shadow::{update_shadows, ShadowSettings};
    use approx::assert_relative_eq;

    #[test]
    fn test_march_counts_lit_samples() {
        let settings = VolumetricSettings {
            steps: 10,
            max_distance: 100.0,
            density: 0.01,
        };
        // Shadow covers the far half of the ray
        let scatter = march_in_scatter(Vec3::ZERO, Vec3::new(0.0, 0.0, -10.0), &settings, |p| {
            if p.z > -5.0 {
                1.0
            } else {
                0.0
            }
        });
        assert_relative_eq!(scatter.lit, 0.5);
        assert_relative_eq!(scatter.opacity, 1.0 - (-0.1f32).exp(), epsilon = 1e-6);
    }

    #[test]
    fn test_march_is_clamped_to_max_distance() {
        let settings = VolumetricSettings {
            steps: 4,
            max_distance: 5.0,
            density: 1.0,
        };
        let scatter = march_in_scatter(Vec3::ZERO, Vec3::X * 1000.0, &settings, |p| {
            assert!(p.x < 5.0);
            1.0
        });
        assert_relative_eq!(scatter.opacity, 1.0 - (-5.0f32).exp(), epsilon = 1e-6);
    }

    #[test]
    fn test_needs_sun_with_rendered_shadow() {
        let mut backend = HeadlessBackend::new(4, 4);
        shaders::compile_builtin(&mut backend);
        let gbuffer = backend
            .create_framebuffer(&FramebufferDescriptor::color("gbuffer", 4, 4, 3, TextureFormat::Rgba16Float))
            .unwrap();
        let view = Camera::default().render_view();
        let mut scene = Scene::new();
        let pass = VolumetricPass::default();
        assert!(!pass.execute(&mut backend, &scene, &view, &gbuffer));

        let sun = scene.add_light(Light::directional("sun", Vec3::new(0.0, 100.0, 50.0)));
        scene.set_sun(sun);
        assert!(!pass.execute(&mut backend, &scene, &view, &gbuffer));

        update_shadows(&mut backend, &mut scene, &view, &ShadowSettings::default());
        assert!(pass.execute(&mut backend, &scene, &view, &gbuffer));
        assert_eq!(
            backend.fullscreen_draws(),
            vec![(Some(shaders::VOLUMETRIC.to_string()), BlendMode::Alpha)]
        );
    }

    #[test]
    fn test_unshadowed_sky_gets_full_fog() {
        let mut backend = HeadlessBackend::new(2, 2);
        shaders::compile_builtin(&mut backend);
        backend.register_program(shaders::VOLUMETRIC, VolumetricProgram);
        let gbuffer = backend
            .create_framebuffer(&FramebufferDescriptor::color("gbuffer", 2, 2, 3, TextureFormat::Rgba16Float))
            .unwrap();
        backend.bind_framebuffer(Some(gbuffer.handle));
        backend.clear(ClearValues::all(Vec4::ZERO));

        let view = Camera::default().render_view();
        let mut scene = Scene::new();
        let sun = scene.add_light(Light::directional("sun", Vec3::new(0.0, 100.0, 50.0)).with_color(Vec3::ONE, 1.0));
        scene.set_sun(sun);
        update_shadows(&mut backend, &mut scene, &view, &ShadowSettings::default());

        backend.bind_framebuffer(None);
        backend.set_viewport(crate::backend::Viewport::full(2, 2));
        backend.clear(ClearValues::all(Vec4::new(0.0, 0.0, 0.0, 1.0)));
        let pass = VolumetricPass::default();
        assert!(pass.execute(&mut backend, &scene, &view, &gbuffer));

        // Mesh draws are only recorded, so the shadow map stays clear and every sample is lit
        let opacity = 1.0 - (-pass.settings.density * pass.settings.max_distance).exp();
        let pixel = backend.screen().unwrap().get_pixel(0, 0).0;
        assert_relative_eq!(pixel[0], opacity, epsilon = 1e-4);
        assert_eq!(backend.render_state(), RenderState::BASELINE);
    }
}
