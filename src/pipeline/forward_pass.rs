//! Forward lighting
//!
//! Each mesh is drawn once per visible light: the first draw replaces the
//! target and carries the ambient term, later draws add on top. Used by the
//! probe bakes and by the forward view mode.

use glam::{Vec3, Vec4};

use crate::backend::{BlendMode, ClearValues, GraphicsBackend, PrimitiveTopology, RenderState};
use crate::lighting::LightParams;
use crate::scene::{RenderView, Scene};
use crate::shadow;

use super::gbuffer_pass::{bind_material, material_state};
use super::shaders;
use super::state::with_render_state;
use super::traversal::{render_scene, DrawContext, DrawItem, RenderMode, TraversalStats};

pub const SHADOW_UNIT: u32 = 6;

/// Clear the bound target and render the scene forward-lit from `view`
pub fn render_view<B: GraphicsBackend>(
    backend: &mut B,
    scene: &Scene,
    view: &RenderView,
    clear_color: Vec4,
) -> TraversalStats {
    backend.clear(ClearValues::all(clear_color));
    draw_scene(backend, scene, view)
}

/// Forward-lit scene over whatever the bound target already holds
pub fn draw_scene<B: GraphicsBackend>(backend: &mut B, scene: &Scene, view: &RenderView) -> TraversalStats {
    let stats = with_render_state(backend, RenderState::OPAQUE_GEOMETRY, |backend| {
        let ctx = DrawContext {
            scene,
            view,
            mode: RenderMode::Forward,
        };
        render_scene(backend, &ctx)
    });
    backend.unbind_shader();
    stats
}

/// Forward-mode draw routine
pub(crate) fn draw_forward<B: GraphicsBackend>(backend: &mut B, ctx: &DrawContext<'_>, item: &DrawItem<'_>) {
    let Some(shader) = backend.find_shader(shaders::FORWARD_LIGHT) else {
        return;
    };
    backend.bind_shader(shader);
    backend.set_uniform("u_model", item.model.into());
    backend.set_uniform("u_viewprojection", ctx.view.view_projection.into());
    backend.set_uniform("u_camera_position", ctx.view.eye.into());
    bind_material(backend, item.material, item.uv_factor);

    let base = material_state(item.material);
    let ambient = ctx.scene.effective_ambient();
    let mut drawn = 0;

    for (_, light) in ctx.scene.lights().filter(|(_, l)| l.visible) {
        let state = if drawn == 0 {
            base
        } else {
            base.with_blend(BlendMode::Additive)
        };
        backend.apply_render_state(&state);
        let first = drawn == 0;
        backend.set_uniform("u_first_pass", first.into());
        backend.set_uniform("u_ambient_light", (if first { ambient } else { Vec3::ZERO }).into());
        LightParams::from_light(light).upload(backend);
        shadow::upload_shadow_uniforms(backend, light, SHADOW_UNIT);
        backend.draw_mesh(item.mesh, PrimitiveTopology::TriangleList);
        drawn += 1;
    }

    if drawn == 0 {
        backend.apply_render_state(&base);
        backend.set_uniform("u_first_pass", true.into());
        backend.set_uniform("u_ambient_light", ambient.into());
        backend.set_uniform("u_light_enabled", false.into());
        backend.set_uniform("u_light_has_shadow", false.into());
        backend.draw_mesh(item.mesh, PrimitiveTopology::TriangleList);
    }
}

/// Forward lighting shader
pub const FORWARD_LIGHT_SHADER: &str = r#"
// Forward lighting shader, one light per draw

struct Uniforms {
    model: mat4x4<f32>,
    viewprojection: mat4x4<f32>,
    camera_position: vec3<f32>,
    color: vec4<f32>,
    emissive: vec3<f32>,
    metallic: f32,
    roughness: f32,
    uv_factor: f32,
    alpha_cutoff: f32,
    ambient_light: vec3<f32>,
    first_pass: u32,
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
}

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(1) @binding(0) var color_texture: texture_2d<f32>;
@group(1) @binding(1) var emissive_texture: texture_2d<f32>;
@group(1) @binding(5) var material_sampler: sampler;
@group(1) @binding(6) var shadowmap: texture_depth_2d;
@group(1) @binding(7) var shadow_sampler: sampler_comparison;

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    let world_pos = u.model * vec4<f32>(input.position, 1.0);
    output.world_position = world_pos.xyz;
    output.clip_position = u.viewprojection * world_pos;
    output.world_normal = normalize((u.model * vec4<f32>(input.normal, 0.0)).xyz);
    output.uv = input.uv * u.uv_factor;
    return output;
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

fn light_contribution(world_pos: vec3<f32>, n: vec3<f32>, albedo: vec3<f32>) -> vec3<f32> {
    let radiance = u.light_color * u.light_intensity;
    if u.light_type == 3 {
        return albedo * radiance;
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
    let shininess = mix(16.0, 128.0, 1.0 - u.roughness);
    let spec = select(0.0, pow(max(dot(n, h), 0.0), shininess) * (1.0 - u.roughness), ndotl > 0.0);
    let spec_color = mix(vec3<f32>(0.04), albedo, u.metallic);
    let diffuse = albedo * (1.0 - u.metallic) * ndotl;
    return (diffuse + spec_color * spec) * radiance * attenuation * shadow_factor(world_pos);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let base = u.color * textureSample(color_texture, material_sampler, input.uv);
    if base.a < u.alpha_cutoff {
        discard;
    }
    let n = normalize(input.world_normal);
    var color = u.ambient_light * base.rgb;
    if u.first_pass != 0u {
        color = color + u.emissive * textureSample(emissive_texture, material_sampler, input.uv).rgb;
    }
    if u.light_enabled != 0u {
        color = color + light_contribution(input.world_position, n, base.rgb);
    }
    return vec4<f32>(color, base.a);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Command, HeadlessBackend};
    use crate::resources::{Material, Mesh};
    use crate::scene::{Camera, Light, Prefab, PrefabInstance};
    use glam::Mat4;

    fn one_cube_scene() -> Scene {
        let mut scene = Scene::new();
        let mesh = scene.assets.add_mesh(Mesh::cube());
        let material = scene.assets.add_material(Material::default());
        let root = scene.assets.node("cube", mesh, material);
        scene.add_prefab(PrefabInstance::new("cube", Prefab::new("cube", root), Mat4::IDENTITY));
        scene
    }

    fn blend_per_draw(backend: &HeadlessBackend) -> Vec<BlendMode> {
        let mut current = BlendMode::Disabled;
        let mut modes = Vec::new();
        for command in backend.commands() {
            match command {
                Command::RenderState(state) => current = state.blend,
                Command::DrawMesh { .. } => modes.push(current),
                _ => {}
            }
        }
        modes
    }

    #[test]
    fn test_one_draw_per_visible_light() {
        let mut backend = HeadlessBackend::default();
        shaders::compile_builtin(&mut backend);
        let mut scene = one_cube_scene();
        scene.add_light(Light::point("a", Vec3::new(0.0, 3.0, 0.0), 10.0));
        scene.add_light(Light::point("b", Vec3::new(3.0, 0.0, 0.0), 10.0));
        let mut hidden = Light::point("c", Vec3::ZERO, 10.0);
        hidden.visible = false;
        scene.add_light(hidden);
        scene.assets.upload_pending(&mut backend).unwrap();

        let view = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO).render_view();
        render_view(&mut backend, &scene, &view, Vec4::ZERO);

        assert_eq!(backend.mesh_draws_with(shaders::FORWARD_LIGHT), 2);
        assert_eq!(blend_per_draw(&backend), vec![BlendMode::Disabled, BlendMode::Additive]);
        // Ambient went out with the first light only
        let uniforms = backend.uniforms_of(shaders::FORWARD_LIGHT).unwrap();
        assert_eq!(uniforms["u_ambient_light"].as_vec3(), Some(Vec3::ZERO));
        assert_eq!(backend.render_state(), RenderState::BASELINE);
    }

    #[test]
    fn test_no_lights_draws_ambient_only() {
        let mut backend = HeadlessBackend::default();
        shaders::compile_builtin(&mut backend);
        let mut scene = one_cube_scene();
        scene.assets.upload_pending(&mut backend).unwrap();
        let view = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO).render_view();
        render_view(&mut backend, &scene, &view, Vec4::ZERO);

        assert_eq!(backend.mesh_draws_with(shaders::FORWARD_LIGHT), 1);
        let uniforms = backend.uniforms_of(shaders::FORWARD_LIGHT).unwrap();
        assert_eq!(uniforms["u_light_enabled"].as_bool(), Some(false));
        assert_eq!(uniforms["u_ambient_light"].as_vec3(), Some(scene.effective_ambient()));
    }
}
