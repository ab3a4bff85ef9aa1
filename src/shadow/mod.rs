//! Shadow maps
//!
//! Each shadow-casting light owns a [`LightShadow`]: the camera it renders
//! from, a lazily allocated depth target and the view-projection matrices of
//! the last render. Directional shadows follow the observer and are snapped to
//! the shadow texel grid so they do not shimmer when the observer moves.

pub mod cascade;

pub use cascade::{cascade_slots, select_cascade, CascadeSlot, CASCADE_COUNT};

use glam::{Mat4, Vec3};

use crate::backend::{
    BuiltinTexture, ClearValues, Framebuffer, FramebufferDescriptor, GraphicsBackend, PrimitiveTopology,
    RenderState, TextureHandle, UniformValue,
};
use crate::pipeline::shaders;
use crate::pipeline::state::with_render_state;
use crate::pipeline::traversal::{render_scene, DrawContext, DrawItem, RenderMode};
use crate::scene::{Camera, Light, LightKind, Projection, RenderView, Scene};

pub const SHADOW_MAP_RESOLUTION: u32 = 1024;

/// Lifecycle of a light's shadow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowState {
    NoShadow,
    /// Depth target allocated, no valid matrices
    Initialized,
    /// Matrices valid for the current frame
    Rendered,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShadowMatrices {
    Single(Mat4),
    Cascaded([Mat4; CASCADE_COUNT]),
}

impl ShadowMatrices {
    pub fn is_cascaded(&self) -> bool {
        matches!(self, ShadowMatrices::Cascaded(_))
    }

    pub fn as_slice(&self) -> &[Mat4] {
        match self {
            ShadowMatrices::Single(m) => std::slice::from_ref(m),
            ShadowMatrices::Cascaded(m) => m,
        }
    }
}

/// Depth-only render target of a light
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowTarget {
    pub framebuffer: Framebuffer,
    pub resolution: u32,
}

impl ShadowTarget {
    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.framebuffer.depth_texture
    }
}

/// Shadow resources exclusively owned by one light
#[derive(Debug, PartialEq)]
pub struct LightShadow {
    pub camera: Camera,
    target: Option<ShadowTarget>,
    matrices: Option<ShadowMatrices>,
}

/// A cloned light gets the camera only; the depth target stays with its owner.
impl Clone for LightShadow {
    fn clone(&self) -> Self {
        Self::new(self.camera.clone())
    }
}

impl LightShadow {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            target: None,
            matrices: None,
        }
    }

    pub fn state(&self) -> ShadowState {
        match (&self.target, &self.matrices) {
            (None, _) => ShadowState::NoShadow,
            (Some(_), None) => ShadowState::Initialized,
            (Some(_), Some(_)) => ShadowState::Rendered,
        }
    }

    pub fn target(&self) -> Option<&ShadowTarget> {
        self.target.as_ref()
    }

    /// Matrices of the last render, `None` unless [`ShadowState::Rendered`]
    pub fn matrices(&self) -> Option<&ShadowMatrices> {
        self.matrices.as_ref()
    }

    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.target.as_ref().and_then(ShadowTarget::depth_texture)
    }

    /// Mark the matrices stale, e.g. after the light moved
    pub fn invalidate(&mut self) {
        self.matrices = None;
    }

    pub fn release<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if let Some(target) = self.target.take() {
            backend.destroy_framebuffer(target.framebuffer.handle);
        }
        self.matrices = None;
    }

    fn ensure_target<B: GraphicsBackend>(&mut self, backend: &mut B, resolution: u32) -> Option<&ShadowTarget> {
        if self.target.as_ref().map(|t| t.resolution) != Some(resolution) {
            self.release(backend);
            match backend.create_framebuffer(&FramebufferDescriptor::depth_only("shadow map", resolution, resolution)) {
                Ok(framebuffer) => {
                    log::info!("Allocated {}x{} shadow map", resolution, resolution);
                    self.target = Some(ShadowTarget {
                        framebuffer,
                        resolution,
                    });
                }
                Err(e) => {
                    log::warn!("Shadow map allocation failed: {}", e);
                    return None;
                }
            }
        }
        self.target.as_ref()
    }
}

/// Shadow map sizes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSettings {
    pub resolution: u32,
    pub cascade_atlas_resolution: u32,
    /// Half extent used for lights whose own `cascade_size` is not positive
    pub cascade_size: f32,
}

impl ShadowSettings {
    fn half_extent(&self, light: &Light) -> f32 {
        if light.cascade_size > 0.0 {
            light.cascade_size
        } else {
            self.cascade_size
        }
    }
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            resolution: SHADOW_MAP_RESOLUTION,
            cascade_atlas_resolution: SHADOW_MAP_RESOLUTION * 2,
            cascade_size: 256.0,
        }
    }
}

/// `round(value / grid) * grid`; a non-positive grid leaves the value alone
pub fn snap_to_texel_grid(value: f32, grid: f32) -> f32 {
    if grid > 0.0 {
        (value / grid).round() * grid
    } else {
        value
    }
}

/// World size of one texel of an orthographic map spanning `±half_extent`
pub fn texel_size(half_extent: f32, map_size: u32) -> f32 {
    2.0 * half_extent / map_size.max(1) as f32
}

/// Snap the view-space X/Y translation of `view` to the texel grid
pub fn stabilize_view(view: Mat4, grid: f32) -> Mat4 {
    let mut view = view;
    view.w_axis.x = snap_to_texel_grid(view.w_axis.x, grid);
    view.w_axis.y = snap_to_texel_grid(view.w_axis.y, grid);
    view
}

fn up_for(direction: Vec3) -> Vec3 {
    if direction.normalize_or_zero().dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// Orthographic view of the observer's focus, snapped to the texel grid
pub fn directional_view(light: &Light, observer: &RenderView, half_extent: f32, map_size: u32) -> RenderView {
    let eye = observer.target + light.target_vector;
    let view = Mat4::look_at_rh(eye, observer.target, up_for(light.direction()));
    let view = stabilize_view(view, texel_size(half_extent, map_size));
    let (near, far) = (-500.0, 5000.0);
    let projection = Mat4::orthographic_rh(-half_extent, half_extent, -half_extent, half_extent, near, far);
    RenderView::new(view, projection, eye, observer.target, near, far)
}

/// Render the shadow map of `light` into `shadow` and return the new state.
///
/// `shadow` is detached from the light while this runs so the scene can be
/// traversed by shared reference.
pub fn render_light_shadow<B: GraphicsBackend>(
    backend: &mut B,
    scene: &Scene,
    light: &Light,
    shadow: &mut LightShadow,
    observer: &RenderView,
    settings: &ShadowSettings,
) -> ShadowState {
    // Omnidirectional maps are not rendered; point lights stay unshadowed
    if matches!(light.kind, LightKind::Ambient | LightKind::Point) {
        shadow.release(backend);
        return ShadowState::NoShadow;
    }
    if backend.find_shader(shaders::SHADOW_DEPTH).is_none() {
        log::debug!("No shadow shader, skipping shadow of '{}'", light.name);
        shadow.invalidate();
        return shadow.state();
    }

    let cascaded = light.kind == LightKind::Directional && light.cascaded;
    let resolution = if cascaded {
        settings.cascade_atlas_resolution
    } else {
        settings.resolution
    };
    let Some(framebuffer) = shadow.ensure_target(backend, resolution).map(|t| t.framebuffer.clone()) else {
        return shadow.state();
    };

    backend.bind_framebuffer(Some(framebuffer.handle));
    backend.set_viewport(framebuffer.viewport());
    backend.clear(ClearValues::depth_only());

    let matrices = match light.kind {
        LightKind::Spot => {
            let position = light.position();
            let direction = light.direction();
            shadow.camera.look_at(position, position + direction, up_for(direction));
            shadow.camera.projection =
                Projection::perspective(light.cutoff_angle * 2.0, 1.0, 1.0, light.max_distance.max(2.0));
            let view = shadow.camera.render_view();
            render_depth(backend, scene, &view);
            Some(ShadowMatrices::Single(view.view_projection))
        }
        LightKind::Directional if cascaded => {
            let mut matrices = [Mat4::IDENTITY; CASCADE_COUNT];
            for slot in cascade_slots(settings.half_extent(light), resolution) {
                let view = directional_view(light, observer, slot.half_extent, slot.viewport.width);
                backend.set_viewport(slot.viewport);
                render_depth(backend, scene, &view);
                matrices[slot.index] = view.view_projection;
            }
            Some(ShadowMatrices::Cascaded(matrices))
        }
        LightKind::Directional => {
            let view = directional_view(light, observer, settings.half_extent(light), resolution);
            shadow.camera.look_at(view.eye, view.target, up_for(light.direction()));
            render_depth(backend, scene, &view);
            Some(ShadowMatrices::Single(view.view_projection))
        }
        LightKind::Point | LightKind::Ambient => None,
    };

    backend.bind_framebuffer(None);
    shadow.matrices = matrices;
    shadow.state()
}

fn render_depth<B: GraphicsBackend>(backend: &mut B, scene: &Scene, view: &RenderView) {
    with_render_state(backend, RenderState::SHADOW_CASTER, |backend| {
        let ctx = DrawContext {
            scene,
            view,
            mode: RenderMode::Shadow,
        };
        render_scene(backend, &ctx);
    });
}

/// Shadow-mode draw routine: depth only, blended materials excluded
pub(crate) fn draw_caster<B: GraphicsBackend>(backend: &mut B, ctx: &DrawContext<'_>, item: &DrawItem<'_>) {
    if !item.material.casts_shadow() {
        return;
    }
    let Some(shader) = backend.find_shader(shaders::SHADOW_DEPTH) else {
        return;
    };
    backend.bind_shader(shader);
    backend.set_uniform("u_model", item.model.into());
    backend.set_uniform("u_viewprojection", ctx.view.view_projection.into());
    backend.set_uniform("u_alpha_cutoff", item.material.alpha_cutoff().into());
    backend.set_uniform("u_color", item.material.base_color.into());
    backend.draw_mesh(item.mesh, PrimitiveTopology::TriangleList);
}

/// Bind the shadow of `light` for a lighting draw. Lights without a rendered
/// map get a white shadow map and `u_light_has_shadow = false`.
pub fn upload_shadow_uniforms<B: GraphicsBackend>(backend: &mut B, light: &Light, unit: u32) {
    let rendered = light
        .shadow()
        .and_then(|shadow| Some((shadow.depth_texture()?, shadow.matrices()?)));
    let Some((depth, matrices)) = rendered else {
        backend.set_uniform("u_light_has_shadow", false.into());
        backend.set_uniform("u_light_is_cascade", false.into());
        let white = backend.builtin_texture(BuiltinTexture::White);
        backend.set_texture("u_shadowmap", white, unit);
        return;
    };
    backend.set_uniform("u_light_has_shadow", true.into());
    backend.set_texture("u_shadowmap", depth, unit);
    match matrices {
        ShadowMatrices::Cascaded(m) => {
            backend.set_uniform("u_light_is_cascade", true.into());
            backend.set_uniform("u_shadow_viewprojections", UniformValue::Mat4Array(m.to_vec()));
        }
        ShadowMatrices::Single(m) => {
            backend.set_uniform("u_light_is_cascade", false.into());
            backend.set_uniform("u_shadow_viewprojection", (*m).into());
        }
    }
}

/// Recompute every light's shadow for this frame
pub fn update_shadows<B: GraphicsBackend>(
    backend: &mut B,
    scene: &mut Scene,
    observer: &RenderView,
    settings: &ShadowSettings,
) -> usize {
    let mut rendered = 0;
    for id in scene.light_ids() {
        let Some(light) = scene.light_mut(id) else {
            continue;
        };
        if light.kind == LightKind::Ambient {
            light.release_shadow(backend);
            light.reset_shadow_camera();
            continue;
        }
        if !light.visible {
            continue;
        }
        let Some(mut shadow) = light.take_shadow() else {
            continue;
        };
        let snapshot = light.clone();
        let state = render_light_shadow(backend, scene, &snapshot, &mut shadow, observer, settings);
        if state == ShadowState::Rendered {
            rendered += 1;
        }
        if let Some(light) = scene.light_mut(id) {
            light.restore_shadow(shadow);
        }
    }
    log::debug!("Rendered {} shadow maps", rendered);
    rendered
}

/// Depth-only shader used for shadow casters
pub const SHADOW_DEPTH_SHADER: &str = r#"
// Depth-only shadow caster shader

struct Uniforms {
    model: mat4x4<f32>,
    viewprojection: mat4x4<f32>,
    color: vec4<f32>,
    alpha_cutoff: f32,
}

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var<uniform> u: Uniforms;

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    output.clip_position = u.viewprojection * u.model * vec4<f32>(input.position, 1.0);
    output.uv = input.uv;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) {
    if u.color.a < u.alpha_cutoff {
        discard;
    }
}
"#;
