//! Deferred lighting pass
//!
//! Resolves lighting from the geometry buffer with one full-screen quad per
//! visible light. The first quad replaces the target and carries the ambient
//! term (plus the environment on background pixels), every later quad is
//! added on top. With no visible light a single ambient-only quad is drawn.

use glam::Vec3;

use crate::backend::{BlendMode, BuiltinTexture, Framebuffer, GraphicsBackend, RenderState, TextureHandle};
use crate::bake::irradiance::GridLayout;
use crate::lighting::LightParams;
use crate::scene::{LightId, RenderView, Scene};
use crate::shadow;

use super::shaders;
use super::state::with_render_state;

pub const ALBEDO_UNIT: u32 = 0;
pub const NORMAL_UNIT: u32 = 1;
pub const EXTRA_UNIT: u32 = 2;
pub const DEPTH_UNIT: u32 = 3;
pub const AO_UNIT: u32 = 4;
pub const ENVIRONMENT_UNIT: u32 = 5;
pub const SHADOW_UNIT: u32 = 6;
pub const IRRADIANCE_UNIT: u32 = 7;

/// One full-screen draw of the accumulation pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightDrawPlan {
    /// `None` for the ambient-only draw of an unlit scene
    pub light: Option<LightId>,
    pub blend: BlendMode,
    pub ambient: Vec3,
}

impl LightDrawPlan {
    pub fn is_first(&self) -> bool {
        self.blend == BlendMode::Disabled
    }
}

/// Draw list for `scene`: visible lights in list order, ambient on the first
pub fn plan_light_draws(scene: &Scene) -> Vec<LightDrawPlan> {
    let ambient = scene.effective_ambient();
    let mut plans: Vec<LightDrawPlan> = scene
        .lights()
        .filter(|(_, light)| light.visible)
        .enumerate()
        .map(|(i, (id, _))| LightDrawPlan {
            light: Some(id),
            blend: if i == 0 { BlendMode::Disabled } else { BlendMode::Additive },
            ambient: if i == 0 { ambient } else { Vec3::ZERO },
        })
        .collect();
    if plans.is_empty() {
        plans.push(LightDrawPlan {
            light: None,
            blend: BlendMode::Disabled,
            ambient,
        });
    }
    plans
}

/// Baked irradiance as the lighting shader consumes it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrradianceBinding {
    /// `9 × probe_count` texture, one row of coefficients per probe
    pub texture: TextureHandle,
    pub layout: GridLayout,
}

/// Textures produced by earlier stages
#[derive(Debug, Clone, Copy)]
pub struct LightingInputs<'a> {
    pub gbuffer: &'a Framebuffer,
    pub ambient_occlusion: Option<TextureHandle>,
    pub irradiance: Option<&'a IrradianceBinding>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LightingPass;

impl LightingPass {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &str {
        "Deferred Lighting Pass"
    }

    /// Accumulate every visible light into the bound target and return the
    /// number of full-screen draws issued.
    pub fn execute<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        scene: &Scene,
        view: &RenderView,
        inputs: &LightingInputs<'_>,
    ) -> usize {
        let Some(shader) = backend.find_shader(shaders::DEFERRED_LIGHT) else {
            log::warn!("{}: shader '{}' missing, skipping", self.name(), shaders::DEFERRED_LIGHT);
            return 0;
        };
        let (Some(albedo), Some(normal), Some(extra), Some(depth)) = (
            inputs.gbuffer.color(0),
            inputs.gbuffer.color(1),
            inputs.gbuffer.color(2),
            inputs.gbuffer.depth_texture,
        ) else {
            log::warn!("{}: geometry buffer is incomplete, skipping", self.name());
            return 0;
        };

        backend.bind_shader(shader);
        backend.set_texture("u_color_texture", albedo, ALBEDO_UNIT);
        backend.set_texture("u_normal_texture", normal, NORMAL_UNIT);
        backend.set_texture("u_extra_texture", extra, EXTRA_UNIT);
        backend.set_texture("u_depth_texture", depth, DEPTH_UNIT);

        let ao = inputs
            .ambient_occlusion
            .filter(|_| scene.ambient_occlusion_enabled)
            .unwrap_or_else(|| backend.builtin_texture(BuiltinTexture::White));
        backend.set_texture("u_ao_texture", ao, AO_UNIT);

        backend.set_uniform("u_inverse_viewprojection", view.inverse_view_projection.into());
        backend.set_uniform("u_camera_position", view.eye.into());

        match scene.environment {
            Some(environment) => {
                backend.set_uniform("u_environment_enabled", true.into());
                backend.set_texture("u_environment", environment, ENVIRONMENT_UNIT);
            }
            None => backend.set_uniform("u_environment_enabled", false.into()),
        }
        bind_irradiance(backend, inputs.irradiance);

        let plans = plan_light_draws(scene);
        with_render_state(backend, RenderState::FULLSCREEN, |backend| {
            for plan in &plans {
                backend.apply_render_state(&RenderState::FULLSCREEN.with_blend(plan.blend));
                backend.set_uniform("u_first_pass", plan.is_first().into());
                backend.set_uniform("u_ambient_light", plan.ambient.into());
                match plan.light.and_then(|id| scene.light(id)) {
                    Some(light) => {
                        LightParams::from_light(light).upload(backend);
                        shadow::upload_shadow_uniforms(backend, light, SHADOW_UNIT);
                    }
                    None => {
                        backend.set_uniform("u_light_enabled", false.into());
                        backend.set_uniform("u_light_has_shadow", false.into());
                    }
                }
                backend.draw_fullscreen_quad();
            }
        });
        backend.unbind_shader();
        log::debug!("{}: {} light draws", self.name(), plans.len());
        plans.len()
    }
}

fn bind_irradiance<B: GraphicsBackend>(backend: &mut B, irradiance: Option<&IrradianceBinding>) {
    let Some(binding) = irradiance else {
        backend.set_uniform("u_irr_enabled", false.into());
        return;
    };
    backend.set_uniform("u_irr_enabled", true.into());
    backend.set_texture("u_irr_texture", binding.texture, IRRADIANCE_UNIT);
    backend.set_uniform("u_irr_start", binding.layout.start.into());
    backend.set_uniform("u_irr_delta", binding.layout.delta.into());
    backend.set_uniform("u_irr_dims", binding.layout.dims.as_vec3().into());
}

/// Deferred light accumulation shader
pub const DEFERRED_LIGHT_SHADER: &str = r#"
// Deferred light accumulation, one light per full-screen draw

struct Uniforms {
    inverse_viewprojection: mat4x4<f32>,
    camera_position: vec3<f32>,
    first_pass: u32,
    ambient_light: vec3<f32>,
    environment_enabled: u32,
    light_enabled: u32,
    light_type: i32,
    light_position: vec3<f32>,
    light_direction: vec3<f32>,
    light_color: vec3<f32>,
    light_intensity: f32,
    light_maxdist: f32,
    light_spot_cosine: f32,
    light_spot_inner_cosine: f32,
    light_spot_exponent: f32,
    light_bias: f32,
    light_has_shadow: u32,
    light_is_cascade: u32,
    shadow_viewprojection: mat4x4<f32>,
    shadow_viewprojections: array<mat4x4<f32>, 4>,
    irr_enabled: u32,
    irr_start: vec3<f32>,
    irr_delta: vec3<f32>,
    irr_dims: vec3<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(1) @binding(0) var color_texture: texture_2d<f32>;
@group(1) @binding(1) var normal_texture: texture_2d<f32>;
@group(1) @binding(2) var extra_texture: texture_2d<f32>;
@group(1) @binding(3) var depth_texture: texture_depth_2d;
@group(1) @binding(4) var ao_texture: texture_2d<f32>;
@group(1) @binding(5) var environment: texture_cube<f32>;
@group(1) @binding(6) var shadowmap: texture_depth_2d;
@group(1) @binding(7) var irr_texture: texture_2d<f32>;
@group(1) @binding(8) var linear_sampler: sampler;
@group(1) @binding(9) var shadow_sampler: sampler_comparison;

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}

fn reconstruct_position(uv: vec2<f32>, depth: f32) -> vec3<f32> {
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

fn shadow_factor(world_pos: vec3<f32>) -> f32 {
    if u.light_has_shadow == 0u {
        return 1.0;
    }
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
    return textureSampleCompare(shadowmap, shadow_sampler, p.xy, p.z - u.light_bias);
}

fn probe_coefficient(index: i32, k: i32) -> vec3<f32> {
    return textureLoad(irr_texture, vec2<i32>(k, index), 0).rgb;
}

fn probe_irradiance(index: i32, n: vec3<f32>) -> vec3<f32> {
    let c0 = 0.282095 * 3.141593;
    let c1 = 0.488603 * 2.094395;
    let c2 = 1.092548 * 0.785398;
    let c3 = 0.315392 * 0.785398;
    let c4 = 0.546274 * 0.785398;
    var e = probe_coefficient(index, 0) * c0;
    e = e + probe_coefficient(index, 1) * c1 * n.y;
    e = e + probe_coefficient(index, 2) * c1 * n.z;
    e = e + probe_coefficient(index, 3) * c1 * n.x;
    e = e + probe_coefficient(index, 4) * c2 * n.x * n.y;
    e = e + probe_coefficient(index, 5) * c2 * n.y * n.z;
    e = e + probe_coefficient(index, 6) * c3 * (3.0 * n.z * n.z - 1.0);
    e = e + probe_coefficient(index, 7) * c2 * n.x * n.z;
    e = e + probe_coefficient(index, 8) * c4 * (n.x * n.x - n.y * n.y);
    return max(e, vec3<f32>(0.0));
}

fn grid_irradiance(world_pos: vec3<f32>, n: vec3<f32>) -> vec3<f32> {
    let dims = vec3<i32>(u.irr_dims);
    let safe_delta = select(vec3<f32>(1.0), u.irr_delta, u.irr_delta != vec3<f32>(0.0));
    let local = clamp((world_pos - u.irr_start) / safe_delta, vec3<f32>(0.0), u.irr_dims - vec3<f32>(1.0));
    let base = vec3<i32>(floor(local));
    let t = local - vec3<f32>(base);
    var e = vec3<f32>(0.0);
    for (var i = 0; i < 8; i = i + 1) {
        let offset = vec3<i32>(i & 1, (i >> 1) & 1, (i >> 2) & 1);
        let c = min(base + offset, dims - vec3<i32>(1));
        let w = mix(1.0 - t, t, vec3<f32>(offset));
        let index = c.x + c.y * dims.x + c.z * dims.x * dims.y;
        e = e + probe_irradiance(index, n) * w.x * w.y * w.z;
    }
    return e;
}

fn light_contribution(world_pos: vec3<f32>, n: vec3<f32>, albedo: vec3<f32>, metallic: f32, roughness: f32, ao: f32) -> vec3<f32> {
    let radiance = u.light_color * u.light_intensity;
    if u.light_type == 3 {
        return albedo * radiance * ao;
    }
    var l = -normalize(u.light_direction);
    var attenuation = 1.0;
    if u.light_type == 1 || u.light_type == 2 {
        let to_light = u.light_position - world_pos;
        let distance = length(to_light);
        l = normalize(to_light);
        let f = max(0.0, 1.0 - distance / u.light_maxdist);
        attenuation = f * f;
        if u.light_type == 2 {
            let cos_angle = dot(-l, normalize(u.light_direction));
            let cone = saturate((cos_angle - u.light_spot_cosine) / max(u.light_spot_inner_cosine - u.light_spot_cosine, 0.0001));
            attenuation = attenuation * select(0.0, cone, cos_angle >= u.light_spot_cosine);
            if u.light_spot_exponent > 0.0 {
                attenuation = attenuation * pow(max(cos_angle, 0.0), u.light_spot_exponent);
            }
        }
    }
    let ndotl = max(dot(n, l), 0.0);
    let v = normalize(u.camera_position - world_pos);
    let h = normalize(l + v);
    let shininess = mix(16.0, 128.0, 1.0 - roughness);
    let spec = select(0.0, pow(max(dot(n, h), 0.0), shininess) * (1.0 - roughness), ndotl > 0.0);
    let spec_color = mix(vec3<f32>(0.04), albedo, metallic);
    let diffuse = albedo * (1.0 - metallic) * ndotl;
    return (diffuse + spec_color * spec) * radiance * attenuation * shadow_factor(world_pos);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(input.position.xy);
    let depth = textureLoad(depth_texture, pixel, 0);
    let alpha = select(0.0, 1.0, u.first_pass != 0u);

    if depth >= 1.0 {
        var background = vec3<f32>(0.0);
        if u.first_pass != 0u && u.environment_enabled != 0u {
            let far = reconstruct_position(input.uv, 1.0);
            background = textureSample(environment, linear_sampler, far - u.camera_position).rgb;
        }
        return vec4<f32>(background, alpha);
    }

    let albedo = textureLoad(color_texture, pixel, 0).rgb;
    let n = normalize(textureLoad(normal_texture, pixel, 0).rgb * 2.0 - 1.0);
    let extra = textureLoad(extra_texture, pixel, 0);
    let ao = textureSample(ao_texture, linear_sampler, input.uv).r;
    let world_pos = reconstruct_position(input.uv, depth);

    var color = vec3<f32>(0.0);
    if u.first_pass != 0u {
        var indirect = vec3<f32>(0.0);
        if u.irr_enabled != 0u {
            indirect = grid_irradiance(world_pos, n) / 3.141593;
        }
        color = (u.ambient_light + indirect) * albedo * ao;
    }
    if u.light_enabled != 0u {
        color = color + light_contribution(world_pos, n, albedo, extra.r, extra.g, ao);
    }
    return vec4<f32>(color, alpha);
}
"#;
