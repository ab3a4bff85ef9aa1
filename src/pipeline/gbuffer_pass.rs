//! G-Buffer generation pass for deferred rendering
//!
//! Renders visible geometry to multiple render targets (MRT):
//! - 0: albedo (base color × texture)
//! - 1: world-space normal, encoded to `[0, 1]`
//! - 2: material properties (R = metallic, G = roughness, B = emissive luminance)
//! - depth

use crate::backend::{
    BuiltinTexture, ClearValues, CullMode, Framebuffer, GraphicsBackend, PrimitiveTopology, RenderState, BlendMode,
};
use crate::resources::Material;
use crate::scene::{RenderView, Scene};

use super::shaders;
use super::state::with_render_state;
use super::traversal::{render_scene, DrawContext, DrawItem, RenderMode, TraversalStats};

/// Texture units used by [`bind_material`]
pub const COLOR_UNIT: u32 = 0;
pub const EMISSIVE_UNIT: u32 = 1;
pub const METALLIC_ROUGHNESS_UNIT: u32 = 2;
pub const NORMAL_UNIT: u32 = 3;
pub const OCCLUSION_UNIT: u32 = 4;

/// G-Buffer generation pass
#[derive(Debug, Default, Clone, Copy)]
pub struct GBufferPass;

impl GBufferPass {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &str {
        "G-Buffer Pass"
    }

    /// Clear `gbuffer` and fill it with every visible opaque node.
    /// Returns `None` when the pass could not run.
    pub fn execute<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        scene: &Scene,
        view: &RenderView,
        gbuffer: &Framebuffer,
    ) -> Option<TraversalStats> {
        if backend.find_shader(shaders::GBUFFER).is_none() {
            log::warn!("{}: shader '{}' missing, skipping", self.name(), shaders::GBUFFER);
            return None;
        }

        backend.bind_framebuffer(Some(gbuffer.handle));
        backend.set_viewport(gbuffer.viewport());
        backend.clear(ClearValues::all(glam::Vec4::ZERO));

        let stats = with_render_state(backend, RenderState::OPAQUE_GEOMETRY, |backend| {
            let ctx = DrawContext {
                scene,
                view,
                mode: RenderMode::Deferred,
            };
            render_scene(backend, &ctx)
        });
        backend.unbind_shader();
        log::debug!("{}: {} nodes drawn, {} culled", self.name(), stats.drawn, stats.culled);
        Some(stats)
    }
}

/// Depth/blend/cull state a material needs
pub fn material_state(material: &Material) -> RenderState {
    let cull = if material.two_sided {
        CullMode::None
    } else {
        CullMode::Back
    };
    let blend = if material.is_blended() {
        BlendMode::Alpha
    } else {
        BlendMode::Disabled
    };
    RenderState::OPAQUE_GEOMETRY.with_cull(cull).with_blend(blend)
}

/// Upload material factors and textures, substituting neutral textures for
/// the ones a material does not have.
pub fn bind_material<B: GraphicsBackend>(backend: &mut B, material: &Material, uv_factor: f32) {
    backend.set_uniform("u_color", material.base_color.into());
    backend.set_uniform("u_metallic", material.metallic.into());
    backend.set_uniform("u_roughness", material.roughness.into());
    backend.set_uniform("u_emissive", material.emissive.into());
    backend.set_uniform("u_uv_factor", (material.uv_tiling * uv_factor).into());
    backend.set_uniform("u_alpha_cutoff", material.alpha_cutoff().into());

    let texture = |handle: Option<_>, fallback| handle.unwrap_or_else(|| backend.builtin_texture(fallback));
    let color = texture(material.color_texture, BuiltinTexture::White);
    let emissive = texture(material.emissive_texture, BuiltinTexture::White);
    let metallic_roughness = texture(material.metallic_roughness_texture, BuiltinTexture::Red);
    let normal = texture(material.normal_texture, BuiltinTexture::FlatNormal);
    let occlusion = texture(material.occlusion_texture, BuiltinTexture::White);

    backend.set_texture("u_color_texture", color, COLOR_UNIT);
    backend.set_texture("u_emissive_texture", emissive, EMISSIVE_UNIT);
    backend.set_texture("u_metallic_roughness_texture", metallic_roughness, METALLIC_ROUGHNESS_UNIT);
    backend.set_uniform(
        "u_has_metallic_roughness",
        material.metallic_roughness_texture.is_some().into(),
    );
    backend.set_texture("u_normal_texture", normal, NORMAL_UNIT);
    backend.set_texture("u_occlusion_texture", occlusion, OCCLUSION_UNIT);
}

/// Deferred-mode draw routine
pub(crate) fn draw_gbuffer<B: GraphicsBackend>(backend: &mut B, ctx: &DrawContext<'_>, item: &DrawItem<'_>) {
    let Some(shader) = backend.find_shader(shaders::GBUFFER) else {
        return;
    };
    backend.bind_shader(shader);
    backend.apply_render_state(&material_state(item.material));
    backend.set_uniform("u_model", item.model.into());
    backend.set_uniform("u_viewprojection", ctx.view.view_projection.into());
    backend.set_uniform("u_camera_position", ctx.view.eye.into());
    bind_material(backend, item.material, item.uv_factor);
    backend.draw_mesh(item.mesh, PrimitiveTopology::TriangleList);
}

/// G-Buffer generation shader
pub const GBUFFER_SHADER: &str = r#"
// G-Buffer generation shader for deferred rendering

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
    has_metallic_roughness: u32,
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

struct GBufferOutput {
    @location(0) albedo: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) extra: vec4<f32>,
}

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(1) @binding(0) var color_texture: texture_2d<f32>;
@group(1) @binding(1) var emissive_texture: texture_2d<f32>;
@group(1) @binding(2) var metallic_roughness_texture: texture_2d<f32>;
@group(1) @binding(5) var material_sampler: sampler;

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

@fragment
fn fs_main(input: VertexOutput) -> GBufferOutput {
    var output: GBufferOutput;

    let albedo = u.color * textureSample(color_texture, material_sampler, input.uv);
    if albedo.a < u.alpha_cutoff {
        discard;
    }

    var metallic = u.metallic;
    var roughness = u.roughness;
    if u.has_metallic_roughness != 0u {
        let mr = textureSample(metallic_roughness_texture, material_sampler, input.uv);
        metallic = metallic * mr.b;
        roughness = roughness * mr.g;
    }
    let emissive = u.emissive * textureSample(emissive_texture, material_sampler, input.uv).rgb;

    output.albedo = albedo;
    output.normal = vec4<f32>(normalize(input.world_normal) * 0.5 + 0.5, 1.0);
    output.extra = vec4<f32>(metallic, roughness, dot(emissive, vec3<f32>(0.2126, 0.7152, 0.0722)), 1.0);

    return output;
}
"#;
