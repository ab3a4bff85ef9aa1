//! Environment skybox
//!
//! An inward-facing sphere centred on the eye, drawn with depth and culling
//! disabled so it never occludes the scene drawn after it.

use glam::{Mat4, Vec3};

use crate::backend::{GpuMesh, GraphicsBackend, PrimitiveTopology, RenderState, TextureHandle};
use crate::scene::RenderView;

use super::shaders;
use super::state::with_render_state;

pub const ENVIRONMENT_UNIT: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyboxPass {
    /// Sphere radius, anything between the near and far planes works
    pub radius: f32,
}

impl SkyboxPass {
    pub fn new() -> Self {
        Self { radius: 10.0 }
    }

    pub fn name(&self) -> &str {
        "Skybox Pass"
    }

    pub fn model(&self, view: &RenderView) -> Mat4 {
        Mat4::from_scale_rotation_translation(Vec3::splat(self.radius), glam::Quat::IDENTITY, view.eye)
    }

    /// Draw `environment` around the eye into the bound target
    pub fn execute<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        view: &RenderView,
        environment: TextureHandle,
        sphere: &GpuMesh,
    ) -> bool {
        let Some(shader) = backend.find_shader(shaders::SKYBOX) else {
            log::warn!("{}: shader '{}' missing, skipping", self.name(), shaders::SKYBOX);
            return false;
        };
        with_render_state(backend, RenderState::FULLSCREEN, |backend| {
            backend.bind_shader(shader);
            backend.set_uniform("u_model", self.model(view).into());
            backend.set_uniform("u_viewprojection", view.view_projection.into());
            backend.set_uniform("u_camera_position", view.eye.into());
            backend.set_texture("u_environment", environment, ENVIRONMENT_UNIT);
            backend.draw_mesh(sphere, PrimitiveTopology::TriangleList);
        });
        backend.unbind_shader();
        true
    }
}

impl Default for SkyboxPass {
    fn default() -> Self {
        Self::new()
    }
}

/// Skybox shader
pub const SKYBOX_SHADER: &str = r#"
// Environment cubemap on a sphere around the eye

struct Uniforms {
    model: mat4x4<f32>,
    viewprojection: mat4x4<f32>,
    camera_position: vec3<f32>,
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
}

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(1) @binding(0) var environment: texture_cube<f32>;
@group(1) @binding(1) var environment_sampler: sampler;

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    let world_pos = u.model * vec4<f32>(input.position, 1.0);
    output.world_position = world_pos.xyz;
    output.clip_position = u.viewprojection * world_pos;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let direction = normalize(input.world_position - u.camera_position);
    return vec4<f32>(textureSample(environment, environment_sampler, direction).rgb, 1.0);
}
"#;
