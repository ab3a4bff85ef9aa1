//! Per-pixel light evaluation on the CPU.
//!
//! Mirrors the `deferred_light` and `forward_light` shaders so the headless
//! backend can execute the light accumulation pass.

use glam::{Mat4, UVec3, Vec2, Vec3, Vec4};

use crate::backend::headless::{Fragment, FragmentProgram};
use crate::backend::GraphicsBackend;
use crate::bake::irradiance::GridLayout;
use crate::bake::spherical_harmonics::SphericalHarmonics;
use crate::scene::{Light, LightKind};
use crate::shadow::cascade::{project_to_shadow, select_cascade};

/// Surface attributes decoded from the geometry buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSample {
    pub position: Vec3,
    pub normal: Vec3,
    pub albedo: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub occlusion: f32,
}

/// Per-light values uploaded for one accumulation draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightParams {
    pub kind: LightKind,
    pub position: Vec3,
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub max_distance: f32,
    pub spot_cosine: f32,
    pub spot_inner_cosine: f32,
    pub spot_exponent: f32,
    pub bias: f32,
}

impl LightParams {
    pub fn from_light(light: &Light) -> Self {
        Self {
            kind: light.kind,
            position: light.position(),
            direction: light.direction(),
            color: light.color,
            intensity: light.intensity,
            max_distance: light.max_distance,
            spot_cosine: light.spot_cosine(),
            spot_inner_cosine: light.spot_inner_cosine(),
            spot_exponent: light.spot_exponent,
            bias: light.bias,
        }
    }

    pub fn upload<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.set_uniform("u_light_enabled", true.into());
        backend.set_uniform("u_light_type", self.kind.shader_index().into());
        backend.set_uniform("u_light_position", self.position.into());
        backend.set_uniform("u_light_direction", self.direction.into());
        backend.set_uniform("u_light_color", self.color.into());
        backend.set_uniform("u_light_intensity", self.intensity.into());
        backend.set_uniform("u_light_maxdist", self.max_distance.into());
        backend.set_uniform("u_light_spot_cosine", self.spot_cosine.into());
        backend.set_uniform("u_light_spot_inner_cosine", self.spot_inner_cosine.into());
        backend.set_uniform("u_light_spot_exponent", self.spot_exponent.into());
        backend.set_uniform("u_light_bias", self.bias.into());
    }

    /// Decode the uniforms written by [`LightParams::upload`]
    pub fn from_fragment(fragment: &Fragment<'_>) -> Option<Self> {
        if !fragment.flag("u_light_enabled") {
            return None;
        }
        Some(Self {
            kind: LightKind::from_shader_index(fragment.int("u_light_type")?)?,
            position: fragment.vec3("u_light_position").unwrap_or_default(),
            direction: fragment.vec3("u_light_direction").unwrap_or(-Vec3::Y),
            color: fragment.vec3("u_light_color").unwrap_or(Vec3::ONE),
            intensity: fragment.float("u_light_intensity").unwrap_or(1.0),
            max_distance: fragment.float("u_light_maxdist").unwrap_or(0.0),
            spot_cosine: fragment.float("u_light_spot_cosine").unwrap_or(0.0),
            spot_inner_cosine: fragment.float("u_light_spot_inner_cosine").unwrap_or(1.0),
            spot_exponent: fragment.float("u_light_spot_exponent").unwrap_or(0.0),
            bias: fragment.float("u_light_bias").unwrap_or(0.0),
        })
    }
}

/// `(1 - d / max)^2`, zero at and beyond `max_distance`
pub fn distance_attenuation(distance: f32, max_distance: f32) -> f32 {
    if max_distance <= 0.0 || distance >= max_distance {
        return 0.0;
    }
    let f = 1.0 - distance / max_distance;
    f * f
}

/// Cone falloff between the outer and inner cosines, shaped by the exponent
pub fn spot_attenuation(light: &LightParams, to_surface: Vec3) -> f32 {
    let cos_angle = to_surface.dot(light.direction.normalize_or_zero());
    if cos_angle < light.spot_cosine {
        return 0.0;
    }
    let range = (light.spot_inner_cosine - light.spot_cosine).max(1e-4);
    let cone = ((cos_angle - light.spot_cosine) / range).clamp(0.0, 1.0);
    if light.spot_exponent > 0.0 {
        cone * cos_angle.powf(light.spot_exponent)
    } else {
        cone
    }
}

/// Direct diffuse + Blinn-Phong specular from one light
pub fn direct_light(surface: &SurfaceSample, light: &LightParams, eye: Vec3, shadow: f32) -> Vec3 {
    let radiance = light.color * light.intensity;
    let (light_dir, attenuation) = match light.kind {
        LightKind::Ambient => return surface.albedo * radiance * surface.occlusion,
        LightKind::Directional => (-light.direction.normalize_or_zero(), 1.0),
        LightKind::Point | LightKind::Spot => {
            let to_light = light.position - surface.position;
            let distance = to_light.length();
            let dir = to_light.normalize_or_zero();
            let mut attenuation = distance_attenuation(distance, light.max_distance);
            if light.kind == LightKind::Spot {
                attenuation *= spot_attenuation(light, -dir);
            }
            (dir, attenuation)
        }
    };
    if attenuation <= 0.0 || shadow <= 0.0 {
        return Vec3::ZERO;
    }

    let n = surface.normal;
    let ndotl = n.dot(light_dir).max(0.0);
    let diffuse = surface.albedo * (1.0 - surface.metallic) * ndotl;

    let view_dir = (eye - surface.position).normalize_or_zero();
    let half = (light_dir + view_dir).normalize_or_zero();
    let ndoth = n.dot(half).max(0.0);
    let shininess = 16.0 + (128.0 - 16.0) * (1.0 - surface.roughness);
    let spec_strength = if ndotl > 0.0 {
        ndoth.powf(shininess) * (1.0 - surface.roughness)
    } else {
        0.0
    };
    let spec_color = Vec3::splat(0.04).lerp(surface.albedo, surface.metallic);

    (diffuse + spec_color * spec_strength) * radiance * attenuation * shadow
}

/// Ambient contribution, added by exactly one draw per pixel
pub fn ambient_term(surface: &SurfaceSample, ambient: Vec3, irradiance: Option<Vec3>) -> Vec3 {
    let indirect = irradiance.map_or(Vec3::ZERO, |e| e / std::f32::consts::PI);
    (ambient + indirect) * surface.albedo * surface.occlusion
}

/// 1 when lit, 0 when occluded. `depth_at` reads the shadow map at a UV.
pub fn shadow_factor(
    matrices: &[Mat4],
    cascaded: bool,
    bias: f32,
    world: Vec3,
    depth_at: impl Fn(Vec2) -> f32,
) -> f32 {
    let projected = if cascaded {
        select_cascade(matrices, world).map(|(_, uv, depth)| (uv, depth))
    } else {
        matrices.first().map(|m| project_to_shadow(m, world))
    };
    let Some((uv, depth)) = projected else {
        return 1.0;
    };
    if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) || depth > 1.0 {
        return 1.0;
    }
    if depth - bias > depth_at(uv) {
        0.0
    } else {
        1.0
    }
}

/// World position of a pixel from its UV (v down) and stored depth
pub fn reconstruct_position(inverse_view_projection: &Mat4, uv: Vec2, depth: f32) -> Vec3 {
    let ndc = Vec4::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let world = *inverse_view_projection * ndc;
    world.truncate() / world.w
}

pub fn decode_normal(encoded: Vec3) -> Vec3 {
    (encoded * 2.0 - Vec3::ONE).normalize_or_zero()
}

pub fn encode_normal(normal: Vec3) -> Vec3 {
    normal.normalize_or_zero() * 0.5 + Vec3::splat(0.5)
}

/// Grid layout uniforms of the irradiance texture
fn irradiance_layout(fragment: &Fragment<'_>) -> Option<GridLayout> {
    if !fragment.flag("u_irr_enabled") {
        return None;
    }
    let dims = fragment.vec3("u_irr_dims")?;
    Some(GridLayout {
        start: fragment.vec3("u_irr_start")?,
        delta: fragment.vec3("u_irr_delta")?,
        dims: UVec3::new(dims.x as u32, dims.y as u32, dims.z as u32),
    })
}

fn irradiance_from_texture(fragment: &Fragment<'_>, surface: &SurfaceSample) -> Option<Vec3> {
    let layout = irradiance_layout(fragment)?;
    let sh = layout.sample(surface.position, |index| {
        let mut sh = SphericalHarmonics::default();
        for (k, c) in sh.coeffs.iter_mut().enumerate() {
            *c = fragment
                .texel("u_irr_texture", k as i64, index as i64)
                .map(|t| t.truncate())
                .unwrap_or_default();
        }
        sh
    });
    Some(sh.irradiance(surface.normal))
}

/// CPU version of the `deferred_light` shader for the headless backend
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredLightProgram;

impl DeferredLightProgram {
    fn surface(fragment: &Fragment<'_>) -> Option<SurfaceSample> {
        let uv = fragment.uv;
        let depth = fragment.sample("u_depth_texture", uv)?.x;
        if depth >= 1.0 {
            return None;
        }
        let albedo = fragment.sample("u_color_texture", uv)?.truncate();
        let normal = decode_normal(fragment.sample("u_normal_texture", uv)?.truncate());
        let extra = fragment.sample("u_extra_texture", uv).unwrap_or(Vec4::new(0.0, 1.0, 0.0, 1.0));
        let occlusion = fragment.sample("u_ao_texture", uv).map_or(1.0, |s| s.x);
        let inverse = fragment.mat4("u_inverse_viewprojection")?;
        Some(SurfaceSample {
            position: reconstruct_position(&inverse, uv, depth),
            normal,
            albedo,
            metallic: extra.x,
            roughness: extra.y,
            occlusion,
        })
    }

    /// Environment seen through pixels no geometry covered
    fn background(fragment: &Fragment<'_>) -> Vec3 {
        if !fragment.flag("u_environment_enabled") {
            return Vec3::ZERO;
        }
        let (Some(inverse), Some(eye)) = (fragment.mat4("u_inverse_viewprojection"), fragment.vec3("u_camera_position"))
        else {
            return Vec3::ZERO;
        };
        let far = reconstruct_position(&inverse, fragment.uv, 1.0);
        fragment
            .sample_cube("u_environment", far - eye)
            .map_or(Vec3::ZERO, |c| c.truncate())
    }
}

impl FragmentProgram for DeferredLightProgram {
    fn shade(&self, fragment: &Fragment<'_>) -> Vec4 {
        let first = fragment.flag("u_first_pass");
        let alpha = if first { 1.0 } else { 0.0 };
        let Some(surface) = Self::surface(fragment) else {
            let background = if first { Self::background(fragment) } else { Vec3::ZERO };
            return background.extend(alpha);
        };

        let mut color = Vec3::ZERO;
        if first {
            let ambient = fragment.vec3("u_ambient_light").unwrap_or_default();
            color += ambient_term(&surface, ambient, irradiance_from_texture(fragment, &surface));
        }

        if let Some(light) = LightParams::from_fragment(fragment) {
            let eye = fragment.vec3("u_camera_position").unwrap_or_default();
            let shadow = if fragment.flag("u_light_has_shadow") {
                let cascaded = fragment.flag("u_light_is_cascade");
                let matrices: Vec<Mat4> = if cascaded {
                    fragment.mat4_array("u_shadow_viewprojections").unwrap_or_default().to_vec()
                } else {
                    fragment.mat4("u_shadow_viewprojection").into_iter().collect()
                };
                shadow_factor(&matrices, cascaded, light.bias, surface.position, |uv| {
                    fragment.sample("u_shadowmap", uv).map_or(1.0, |s| s.x)
                })
            } else {
                1.0
            };
            color += direct_light(&surface, &light, eye, shadow);
        }

        color.extend(alpha)
    }
}
