//! Specular reflections from baked probes
//!
//! A full-screen quad alpha-blended over the lit image. Each pixel reflects
//! the view ray about its normal and looks the result up in the nearest
//! reflection probes (weighted by inverse squared distance) or, with no baked
//! probe, in the environment. Rough surfaces read blurrier mips and reflect
//! less.

use glam::{Vec3, Vec4};

use crate::backend::headless::{Fragment, FragmentProgram};
use crate::backend::{BlendMode, Framebuffer, GraphicsBackend, RenderState, TextureHandle, UniformValue};
use crate::bake::ReflectionProbe;
use crate::lighting::shading::{decode_normal, reconstruct_position};
use crate::scene::RenderView;

use super::shaders;
use super::state::with_render_state;

/// Probes the shader can blend per pixel
pub const MAX_PROBES: usize = 2;

const PROBE_SAMPLERS: [&str; MAX_PROBES] = ["u_probe0", "u_probe1"];

/// Fraction of the probe colour a surface reflects
pub fn reflectivity(metallic: f32, roughness: f32) -> f32 {
    let f0 = 0.04 + (1.0 - 0.04) * metallic.clamp(0.0, 1.0);
    f0 * (1.0 - roughness.clamp(0.0, 1.0))
}

/// Normalised inverse-square weights of `probes` seen from `position`
pub fn probe_weights(position: Vec3, probes: &[Vec3]) -> Vec<f32> {
    let raw: Vec<f32> = probes
        .iter()
        .map(|p| 1.0 / (p.distance_squared(position) + 1e-4))
        .collect();
    let total: f32 = raw.iter().sum();
    if total <= 0.0 {
        return raw;
    }
    raw.into_iter().map(|w| w / total).collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReflectionPass;

impl ReflectionPass {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &str {
        "Reflection Pass"
    }

    /// Blend reflections over the bound target. Returns false when nothing
    /// was drawn.
    pub fn execute<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        view: &RenderView,
        gbuffer: &Framebuffer,
        probes: &[ReflectionProbe],
        environment: Option<TextureHandle>,
    ) -> bool {
        let Some(shader) = backend.find_shader(shaders::REFLECTIONS) else {
            log::warn!("{}: shader '{}' missing, skipping", self.name(), shaders::REFLECTIONS);
            return false;
        };
        let (Some(normal), Some(extra), Some(depth)) = (gbuffer.color(1), gbuffer.color(2), gbuffer.depth_texture)
        else {
            return false;
        };
        let baked: Vec<(Vec3, TextureHandle)> = probes
            .iter()
            .filter(|p| p.is_baked())
            .filter_map(|p| Some((p.position, p.cubemap()?)))
            .take(MAX_PROBES)
            .collect();
        if baked.is_empty() && environment.is_none() {
            log::trace!("{}: no probe or environment to reflect", self.name());
            return false;
        }

        with_render_state(backend, RenderState::FULLSCREEN.with_blend(BlendMode::Alpha), |backend| {
            backend.bind_shader(shader);
            backend.set_uniform("u_inverse_viewprojection", view.inverse_view_projection.into());
            backend.set_uniform("u_camera_position", view.eye.into());
            backend.set_texture("u_normal_texture", normal, 0);
            backend.set_texture("u_extra_texture", extra, 1);
            backend.set_texture("u_depth_texture", depth, 2);

            backend.set_uniform("u_probe_count", (baked.len() as i32).into());
            backend.set_uniform(
                "u_probe_positions",
                UniformValue::Vec3Array(baked.iter().map(|(p, _)| *p).collect()),
            );
            let fallback = environment.or(baked.first().map(|(_, c)| *c));
            for (slot, name) in PROBE_SAMPLERS.iter().enumerate() {
                let cubemap = baked.get(slot).map(|(_, c)| *c).or(fallback);
                if let Some(cubemap) = cubemap {
                    backend.set_texture(name, cubemap, 3 + slot as u32);
                }
            }
            match environment {
                Some(env) => {
                    backend.set_uniform("u_environment_enabled", true.into());
                    backend.set_texture("u_environment", env, 5);
                }
                None => backend.set_uniform("u_environment_enabled", false.into()),
            }
            backend.draw_fullscreen_quad();
        });
        backend.unbind_shader();
        log::debug!("{}: {} probes", self.name(), baked.len());
        true
    }
}

/// CPU version of the `reflections` shader (mip 0 only)
#[derive(Debug, Default, Clone, Copy)]
pub struct ReflectionProgram;

impl FragmentProgram for ReflectionProgram {
    fn shade(&self, fragment: &Fragment<'_>) -> Vec4 {
        let uv = fragment.uv;
        let depth = fragment.sample("u_depth_texture", uv).map_or(1.0, |d| d.x);
        let (Some(inverse), Some(eye)) = (
            fragment.mat4("u_inverse_viewprojection"),
            fragment.vec3("u_camera_position"),
        ) else {
            return Vec4::ZERO;
        };
        if depth >= 1.0 {
            return Vec4::ZERO;
        }
        let position = reconstruct_position(&inverse, uv, depth);
        let normal = fragment
            .sample("u_normal_texture", uv)
            .map_or(Vec3::Y, |n| decode_normal(n.truncate()));
        let extra = fragment.sample("u_extra_texture", uv).unwrap_or(Vec4::new(0.0, 1.0, 0.0, 1.0));
        let incident = (position - eye).normalize_or_zero();
        let reflected = incident - 2.0 * incident.dot(normal) * normal;

        let count = fragment.int("u_probe_count").unwrap_or(0).clamp(0, MAX_PROBES as i32) as usize;
        let positions = fragment.vec3_array("u_probe_positions").unwrap_or_default();
        let color = if count > 0 && positions.len() >= count {
            probe_weights(position, &positions[..count])
                .into_iter()
                .zip(PROBE_SAMPLERS)
                .map(|(w, name)| fragment.sample_cube(name, reflected).map_or(Vec3::ZERO, |c| c.truncate()) * w)
                .sum()
        } else if fragment.flag("u_environment_enabled") {
            fragment
                .sample_cube("u_environment", reflected)
                .map_or(Vec3::ZERO, |c| c.truncate())
        } else {
            Vec3::ZERO
        };
        color.extend(reflectivity(extra.x, extra.y))
    }
}

/// Probe reflection shader
pub const REFLECTION_SHADER: &str = r#"
// Reflection probes blended over the lit image

struct Uniforms {
    inverse_viewprojection: mat4x4<f32>,
    camera_position: vec3<f32>,
    probe_count: i32,
    probe_positions: array<vec4<f32>, 2>,
    environment_enabled: u32,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(1) @binding(0) var normal_texture: texture_2d<f32>;
@group(1) @binding(1) var extra_texture: texture_2d<f32>;
@group(1) @binding(2) var depth_texture: texture_depth_2d;
@group(1) @binding(3) var probe0: texture_cube<f32>;
@group(1) @binding(4) var probe1: texture_cube<f32>;
@group(1) @binding(5) var environment: texture_cube<f32>;
@group(1) @binding(6) var cube_sampler: sampler;

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
    let pixel = vec2<i32>(input.position.xy);
    let depth = textureLoad(depth_texture, pixel, 0);
    if depth >= 1.0 {
        return vec4<f32>(0.0);
    }
    let ndc = vec4<f32>(input.uv.x * 2.0 - 1.0, 1.0 - input.uv.y * 2.0, depth, 1.0);
    let world = u.inverse_viewprojection * ndc;
    let position = world.xyz / world.w;
    let n = normalize(textureLoad(normal_texture, pixel, 0).xyz * 2.0 - 1.0);
    let extra = textureLoad(extra_texture, pixel, 0);
    let metallic = extra.r;
    let roughness = extra.g;
    let r = reflect(normalize(position - u.camera_position), n);
    let lod = roughness * f32(textureNumLevels(probe0) - 1u);

    var color = vec3<f32>(0.0);
    if u.probe_count > 0 {
        let w0 = 1.0 / (dot(position - u.probe_positions[0].xyz, position - u.probe_positions[0].xyz) + 0.0001);
        var w1 = 0.0;
        if u.probe_count > 1 {
            w1 = 1.0 / (dot(position - u.probe_positions[1].xyz, position - u.probe_positions[1].xyz) + 0.0001);
        }
        let c0 = textureSampleLevel(probe0, cube_sampler, r, lod).rgb;
        let c1 = textureSampleLevel(probe1, cube_sampler, r, lod).rgb;
        color = (c0 * w0 + c1 * w1) / (w0 + w1);
    } else if u.environment_enabled != 0u {
        color = textureSampleLevel(environment, cube_sampler, r, lod).rgb;
    }
    let f0 = mix(0.04, 1.0, metallic);
    return vec4<f32>(color, f0 * (1.0 - roughness));
}
"#;
