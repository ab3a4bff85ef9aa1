//! Screen-space ambient occlusion
//!
//! A fixed kernel of hemisphere points is oriented around each pixel's normal
//! and tested against the depth buffer. The raw estimate is then blurred in
//! three separable stages at growing offsets (1, 2 and 4 texels), each a
//! horizontal pass followed by a vertical one, ping-ponging between the AO
//! target and the blur texture.

use glam::{Mat3, Vec2, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::headless::{Fragment, FragmentProgram};
use crate::backend::{ClearValues, Framebuffer, GraphicsBackend, RenderState, TextureHandle, UniformValue};
use crate::lighting::shading::{decode_normal, reconstruct_position};
use crate::scene::RenderView;

use super::shaders;
use super::state::with_render_state;

pub const KERNEL_SIZE: usize = 64;

/// Offset multipliers of the three blur stages
pub const BLUR_SCALES: [f32; 3] = [1.0, 2.0, 4.0];

/// Axes of the two passes that make up one blur stage
pub const BLUR_DIRECTIONS: [Vec2; 2] = [Vec2::X, Vec2::Y];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsaoSettings {
    pub kernel_size: usize,
    /// World-space sampling radius
    pub radius: f32,
    /// Depth tolerance before a sample counts as occluded
    pub bias: f32,
    pub seed: u64,
}

impl Default for SsaoSettings {
    fn default() -> Self {
        Self {
            kernel_size: KERNEL_SIZE,
            radius: 5.0,
            bias: 1e-4,
            seed: 0x5A0,
        }
    }
}

/// Cosine-weighted points in the +Z hemisphere, denser near the origin
pub fn generate_kernel(count: usize, seed: u64) -> Vec<Vec3> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let u: f32 = rng.gen();
            let v: f32 = rng.gen();
            let r = u.sqrt();
            let theta = v * std::f32::consts::TAU;
            let direction = Vec3::new(r * theta.cos(), r * theta.sin(), (1.0 - u).max(0.0).sqrt());
            let t = i as f32 / count as f32;
            let scale = 0.1 + 0.9 * t * t;
            direction * scale
        })
        .collect()
}

/// Rotation taking +Z onto `normal`
fn hemisphere_basis(normal: Vec3) -> Mat3 {
    let helper = if normal.x.abs() > 0.9 { Vec3::Y } else { Vec3::X };
    let tangent = helper.cross(normal).normalize_or_zero();
    let bitangent = normal.cross(tangent);
    Mat3::from_cols(tangent, bitangent, normal)
}

#[derive(Debug, Clone)]
pub struct SsaoPass {
    settings: SsaoSettings,
    kernel: Vec<Vec3>,
}

impl SsaoPass {
    pub fn new(settings: SsaoSettings) -> Self {
        Self {
            kernel: generate_kernel(settings.kernel_size, settings.seed),
            settings,
        }
    }

    pub fn name(&self) -> &str {
        "SSAO Pass"
    }

    pub fn settings(&self) -> &SsaoSettings {
        &self.settings
    }

    pub fn kernel(&self) -> &[Vec3] {
        &self.kernel
    }

    /// Estimate occlusion into `target` and blur it. Returns the texture that
    /// holds the final result, `None` when the pass could not run.
    pub fn execute<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        view: &RenderView,
        gbuffer: &Framebuffer,
        target: &Framebuffer,
        blur_texture: TextureHandle,
    ) -> Option<TextureHandle> {
        let Some(shader) = backend.find_shader(shaders::SSAO) else {
            log::warn!("{}: shader '{}' missing, skipping", self.name(), shaders::SSAO);
            return None;
        };
        let (Some(depth), Some(normal), Some(raw)) =
            (gbuffer.depth_texture, gbuffer.color(1), target.color(0))
        else {
            log::warn!("{}: missing input or output texture", self.name());
            return None;
        };

        backend.bind_framebuffer(Some(target.handle));
        backend.set_viewport(target.viewport());
        backend.clear(ClearValues::all(Vec4::ONE));

        let result = with_render_state(backend, RenderState::FULLSCREEN, |backend| {
            backend.bind_shader(shader);
            backend.set_uniform("u_viewprojection", view.view_projection.into());
            backend.set_uniform("u_inverse_viewprojection", view.inverse_view_projection.into());
            backend.set_uniform(
                "u_inverse_resolution",
                (Vec2::ONE / Vec2::new(target.width as f32, target.height as f32)).into(),
            );
            backend.set_uniform("u_points", UniformValue::Vec3Array(self.kernel.clone()));
            backend.set_uniform("u_radius", self.settings.radius.into());
            backend.set_uniform("u_bias", self.settings.bias.into());
            backend.set_texture("u_depth_texture", depth, 0);
            backend.set_texture("u_normal_texture", normal, 1);
            backend.draw_fullscreen_quad();
            backend.bind_framebuffer(None);

            let Some(blur) = backend.find_shader(shaders::BLUR) else {
                log::warn!("{}: blur shader missing, using the raw estimate", self.name());
                return raw;
            };
            let mut source = raw;
            let mut destination = blur_texture;
            for scale in BLUR_SCALES {
                for direction in BLUR_DIRECTIONS {
                    backend.bind_shader(blur);
                    backend.set_uniform("u_offset_scale", scale.into());
                    backend.set_uniform("u_direction", direction.into());
                    backend.blit(source, Some(destination), Some(blur));
                    std::mem::swap(&mut source, &mut destination);
                }
            }
            source
        });
        backend.unbind_shader();
        log::debug!("{}: {} kernel points, radius {}", self.name(), self.kernel.len(), self.settings.radius);
        Some(result)
    }
}

impl Default for SsaoPass {
    fn default() -> Self {
        Self::new(SsaoSettings::default())
    }
}

/// CPU version of the `ssao` shader
#[derive(Debug, Default, Clone, Copy)]
pub struct SsaoProgram;

impl FragmentProgram for SsaoProgram {
    fn shade(&self, fragment: &Fragment<'_>) -> Vec4 {
        let uv = fragment.uv;
        let Some(depth) = fragment.sample("u_depth_texture", uv).map(|d| d.x) else {
            return Vec4::ONE;
        };
        let (Some(vp), Some(inverse), Some(points)) = (
            fragment.mat4("u_viewprojection"),
            fragment.mat4("u_inverse_viewprojection"),
            fragment.vec3_array("u_points"),
        ) else {
            return Vec4::ONE;
        };
        if depth >= 1.0 || points.is_empty() {
            return Vec4::ONE;
        }
        let radius = fragment.float("u_radius").unwrap_or(1.0);
        let bias = fragment.float("u_bias").unwrap_or(0.0);
        let normal = fragment
            .sample("u_normal_texture", uv)
            .map_or(Vec3::Z, |n| decode_normal(n.truncate()));
        let position = reconstruct_position(&inverse, uv, depth);
        let basis = hemisphere_basis(normal);

        let occluded = points
            .iter()
            .filter(|p| {
                let sample = position + basis * **p * radius;
                let clip = vp * sample.extend(1.0);
                if clip.w <= 0.0 {
                    return false;
                }
                let ndc = clip.truncate() / clip.w;
                let sample_uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
                if !(0.0..=1.0).contains(&sample_uv.x) || !(0.0..=1.0).contains(&sample_uv.y) {
                    return false;
                }
                fragment
                    .sample("u_depth_texture", sample_uv)
                    .map_or(false, |stored| stored.x < ndc.z - bias)
            })
            .count();
        let ao = 1.0 - occluded as f32 / points.len() as f32;
        Vec4::new(ao, ao, ao, 1.0)
    }
}

/// CPU version of the `ssao_blur` shader: 3-tap box along `u_direction`,
/// taps `u_offset_scale` texels apart
#[derive(Debug, Default, Clone, Copy)]
pub struct BlurProgram;

impl FragmentProgram for BlurProgram {
    fn shade(&self, fragment: &Fragment<'_>) -> Vec4 {
        let Some(size) = fragment.texture_size("u_texture") else {
            return Vec4::ONE;
        };
        let scale = fragment.float("u_offset_scale").unwrap_or(1.0);
        let direction = fragment.vec2("u_direction").unwrap_or(Vec2::X);
        let step = direction * scale / size.as_vec2();
        let sum: Vec4 = (-1..=1)
            .map(|i| {
                fragment
                    .sample("u_texture", fragment.uv + step * i as f32)
                    .unwrap_or(Vec4::ONE)
            })
            .sum();
        sum / 3.0
    }
}

/// Ambient occlusion estimate
pub const SSAO_SHADER: &str = r#"
// Screen-space ambient occlusion

struct Uniforms {
    viewprojection: mat4x4<f32>,
    inverse_viewprojection: mat4x4<f32>,
    inverse_resolution: vec2<f32>,
    radius: f32,
    bias: f32,
    points: array<vec4<f32>, 64>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(1) @binding(0) var depth_texture: texture_depth_2d;
@group(1) @binding(1) var normal_texture: texture_2d<f32>;
@group(1) @binding(2) var point_sampler: sampler;

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

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let depth = textureSample(depth_texture, point_sampler, input.uv);
    if depth >= 1.0 {
        return vec4<f32>(1.0);
    }
    let n = normalize(textureSample(normal_texture, point_sampler, input.uv).xyz * 2.0 - 1.0);
    let position = reconstruct_position(input.uv, depth);

    var helper = vec3<f32>(1.0, 0.0, 0.0);
    if abs(n.x) > 0.9 {
        helper = vec3<f32>(0.0, 1.0, 0.0);
    }
    let t = normalize(cross(helper, n));
    let b = cross(n, t);
    let basis = mat3x3<f32>(t, b, n);

    var occluded = 0.0;
    for (var i = 0; i < 64; i = i + 1) {
        let sample = position + basis * u.points[i].xyz * u.radius;
        let clip = u.viewprojection * vec4<f32>(sample, 1.0);
        if clip.w <= 0.0 {
            continue;
        }
        let ndc = clip.xyz / clip.w;
        let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        if any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0)) {
            continue;
        }
        let stored = textureSample(depth_texture, point_sampler, uv);
        if stored < ndc.z - u.bias {
            occluded = occluded + 1.0;
        }
    }
    let ao = 1.0 - occluded / 64.0;
    return vec4<f32>(ao, ao, ao, 1.0);
}
"#;

/// One axis of the separable box blur run by [`SsaoPass`]
pub const BLUR_SHADER: &str = r#"
// 3-tap box blur along one axis with a scalable texel offset

struct Uniforms {
    direction: vec2<f32>,
    offset_scale: f32,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(1) @binding(0) var source: texture_2d<f32>;
@group(1) @binding(1) var linear_sampler: sampler;

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
    let step = u.direction * u.offset_scale / vec2<f32>(textureDimensions(source));
    var sum = vec4<f32>(0.0);
    for (var i = -1; i <= 1; i = i + 1) {
        sum = sum + textureSample(source, linear_sampler, input.uv + step * f32(i));
    }
    return sum / 3.0;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Command, HeadlessBackend};
    use crate::backend::{FramebufferDescriptor, TextureDescriptor, TextureFormat};
    use crate::lighting::encode_normal;
    use crate::scene::Camera;
    use approx::assert_relative_eq;

    #[test]
    fn test_kernel_is_deterministic_hemisphere() {
        let kernel = generate_kernel(KERNEL_SIZE, 7);
        assert_eq!(kernel.len(), KERNEL_SIZE);
        assert_eq!(kernel, generate_kernel(KERNEL_SIZE, 7));
        assert_ne!(kernel, generate_kernel(KERNEL_SIZE, 8));
        for (i, p) in kernel.iter().enumerate() {
            assert!(p.z >= 0.0);
            let t = i as f32 / KERNEL_SIZE as f32;
            assert_relative_eq!(p.length(), 0.1 + 0.9 * t * t, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_basis_maps_z_to_normal() {
        for n in [Vec3::X, Vec3::Y, -Vec3::Z, Vec3::new(1.0, 1.0, 0.0).normalize()] {
            let mapped = hemisphere_basis(n) * Vec3::Z;
            assert_relative_eq!(mapped.dot(n), 1.0, epsilon = 1e-5);
        }
    }

    struct Setup {
        backend: HeadlessBackend,
        gbuffer: Framebuffer,
        target: Framebuffer,
        blur: TextureHandle,
        view: RenderView,
    }

    /// 8x8 wall facing a camera on +Z; `pit` pushes the centre pixel back
    fn wall(pit: bool) -> Setup {
        let mut backend = HeadlessBackend::new(8, 8);
        shaders::compile_builtin(&mut backend);
        backend.register_program(shaders::SSAO, SsaoProgram);
        backend.register_program(shaders::BLUR, BlurProgram);
        let view = Camera::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO).render_view();
        let depth_of = |z: f32| {
            let clip = view.view_projection * Vec3::new(0.0, 0.0, z).extend(1.0);
            clip.z / clip.w
        };

        let gbuffer = backend
            .create_framebuffer(&FramebufferDescriptor::color("gbuffer", 8, 8, 3, TextureFormat::Rgba16Float))
            .unwrap();
        let normal = encode_normal(Vec3::Z).extend(1.0);
        backend.write_texture(gbuffer.color(1).unwrap(), None, &[normal; 64]).unwrap();
        let front = if pit { depth_of(5.0) } else { depth_of(0.0) };
        let mut depth = vec![Vec4::new(front, 0.0, 0.0, 0.0); 64];
        depth[4 * 8 + 4] = Vec4::new(depth_of(0.0), 0.0, 0.0, 0.0);
        backend.write_texture(gbuffer.depth_texture.unwrap(), None, &depth).unwrap();

        let target = backend
            .create_framebuffer(&FramebufferDescriptor::color("ao", 8, 8, 1, TextureFormat::Rgba16Float).without_depth())
            .unwrap();
        let blur = backend
            .create_texture(&TextureDescriptor::new_2d("ao blur", 8, 8, TextureFormat::Rgba16Float))
            .unwrap();
        Setup {
            backend,
            gbuffer,
            target,
            blur,
            view,
        }
    }

    #[test]
    fn test_open_wall_is_unoccluded() {
        let Setup {
            mut backend,
            gbuffer,
            target,
            blur,
            view,
        } = wall(false);
        let pass = SsaoPass::new(SsaoSettings {
            radius: 2.0,
            ..Default::default()
        });
        let result = pass.execute(&mut backend, &view, &gbuffer, &target, blur).unwrap();
        assert_eq!(result, target.color(0).unwrap());
        let image = backend.read_texture(result, None, 0).unwrap();
        for pixel in image.pixels() {
            assert_relative_eq!(pixel.0[0], 1.0, epsilon = 1e-5);
        }
        assert_eq!(backend.render_state(), RenderState::BASELINE);
    }

    #[test]
    fn test_pit_is_darkened() {
        let Setup {
            mut backend,
            gbuffer,
            target,
            blur,
            view,
        } = wall(true);
        let pass = SsaoPass::new(SsaoSettings {
            radius: 2.0,
            ..Default::default()
        });
        let result = pass.execute(&mut backend, &view, &gbuffer, &target, blur).unwrap();
        let blurred = backend.read_texture(result, None, 0).unwrap();
        assert!(blurred.get_pixel(4, 4).0[0] < 1.0);
        assert!(blurred.get_pixel(4, 4).0[0] < blurred.get_pixel(0, 0).0[0]);
    }

    #[test]
    fn test_blur_stages_ping_pong_through_both_axes() {
        let Setup {
            mut backend,
            gbuffer,
            target,
            blur,
            view,
        } = wall(false);
        SsaoPass::default().execute(&mut backend, &view, &gbuffer, &target, blur);
        let raw = target.color(0).unwrap();
        let blits: Vec<(TextureHandle, Option<TextureHandle>)> = backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Blit {
                    source, destination, ..
                } => Some((*source, *destination)),
                _ => None,
            })
            .collect();
        let forth = (raw, Some(blur));
        let back = (blur, Some(raw));
        assert_eq!(blits, vec![forth, back, forth, back, forth, back]);
        let uniforms = backend.uniforms_of(shaders::BLUR).unwrap();
        assert_eq!(uniforms["u_offset_scale"].as_float(), Some(4.0));
        assert_eq!(uniforms["u_direction"].as_vec2(), Some(Vec2::Y));
    }

    #[test]
    fn test_blur_passes_spread_along_one_axis_each() {
        let mut backend = HeadlessBackend::new(8, 8);
        shaders::compile_builtin(&mut backend);
        backend.register_program(shaders::BLUR, BlurProgram);
        let blur = backend.find_shader(shaders::BLUR).unwrap();
        let texture = |backend: &mut HeadlessBackend| {
            backend
                .create_texture(&TextureDescriptor::new_2d("blur", 8, 8, TextureFormat::Rgba16Float))
                .unwrap()
        };
        let (a, b) = (texture(&mut backend), texture(&mut backend));
        let mut impulse = vec![Vec4::ZERO; 64];
        impulse[4 * 8 + 4] = Vec4::splat(9.0);
        backend.write_texture(a, None, &impulse).unwrap();

        let pass = |backend: &mut HeadlessBackend, source: TextureHandle, destination: TextureHandle, direction: Vec2| {
            backend.bind_shader(blur);
            backend.set_uniform("u_offset_scale", 1.0f32.into());
            backend.set_uniform("u_direction", direction.into());
            backend.blit(source, Some(destination), Some(blur));
            backend.read_texture(destination, None, 0).unwrap()
        };
        let horizontal = pass(&mut backend, a, b, Vec2::X);
        assert_relative_eq!(horizontal.get_pixel(3, 4).0[0], 3.0);
        assert_relative_eq!(horizontal.get_pixel(5, 4).0[0], 3.0);
        assert_relative_eq!(horizontal.get_pixel(4, 3).0[0], 0.0);

        let both = pass(&mut backend, b, a, Vec2::Y);
        for (x, y) in [(3, 3), (4, 4), (5, 5), (3, 5)] {
            assert_relative_eq!(both.get_pixel(x, y).0[0], 1.0);
        }
        assert_relative_eq!(both.get_pixel(6, 4).0[0], 0.0);
    }

    #[test]
    fn test_missing_shader_skips_pass() {
        let Setup {
            gbuffer,
            target,
            blur,
            view,
            ..
        } = wall(false);
        let mut backend = HeadlessBackend::new(8, 8);
        assert!(SsaoPass::default().execute(&mut backend, &view, &gbuffer, &target, blur).is_none());
    }
}
