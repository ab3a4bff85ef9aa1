//! Light sources

use glam::Vec3;

use super::bounds::BoundingBox;
use super::camera::{Camera, Projection};
use super::transform::Transform;
use crate::backend::GraphicsBackend;
use crate::shadow::LightShadow;

/// Light kind. The discriminant is the value uploaded as `u_light_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightKind {
    Directional = 0,
    Point = 1,
    Spot = 2,
    Ambient = 3,
}

impl LightKind {
    pub fn shader_index(&self) -> i32 {
        *self as i32
    }

    pub fn from_shader_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(LightKind::Directional),
            1 => Some(LightKind::Point),
            2 => Some(LightKind::Spot),
            3 => Some(LightKind::Ambient),
            _ => None,
        }
    }
}

/// A light instance in the scene
#[derive(Debug, Clone)]
pub struct Light {
    pub name: String,
    pub kind: LightKind,
    pub transform: Transform,
    pub visible: bool,
    pub color: Vec3,
    pub intensity: f32,
    /// Point/spot range; contribution is zero beyond it
    pub max_distance: f32,
    pub bias: f32,
    /// Spot outer cone half angle, degrees
    pub cutoff_angle: f32,
    /// Spot inner cone half angle, degrees
    pub inner_angle: f32,
    pub spot_exponent: f32,
    /// Directional only: render four cascades into an atlas
    pub cascaded: bool,
    /// Directional shadow half extent (first cascade when cascaded)
    pub cascade_size: f32,
    /// Directional only: offset from the observer's target to the shadow eye
    pub target_vector: Vec3,
    pub show_shadow_map: bool,
    pub show_camera: bool,
    pub(crate) shadow: Option<LightShadow>,
}

impl Light {
    pub fn new(name: &str, kind: LightKind) -> Self {
        let mut light = Self {
            name: name.to_string(),
            kind,
            transform: Transform::default(),
            visible: true,
            color: Vec3::ONE,
            intensity: 1.0,
            max_distance: 100.0,
            bias: 0.001,
            cutoff_angle: 30.0,
            inner_angle: 15.0,
            spot_exponent: 0.0,
            cascaded: false,
            cascade_size: 256.0,
            target_vector: Vec3::new(0.0, 500.0, 0.0),
            show_shadow_map: false,
            show_camera: false,
            shadow: None,
        };
        light.reset_shadow_camera();
        light
    }

    pub fn directional(name: &str, target_vector: Vec3) -> Self {
        let mut light = Self::new(name, LightKind::Directional);
        light.target_vector = target_vector;
        light
    }

    pub fn point(name: &str, position: Vec3, max_distance: f32) -> Self {
        let mut light = Self::new(name, LightKind::Point);
        light.transform.position = position;
        light.max_distance = max_distance;
        light.reset_shadow_camera();
        light
    }

    pub fn spot(name: &str, position: Vec3, target: Vec3) -> Self {
        let mut light = Self::new(name, LightKind::Spot);
        light.transform.position = position;
        light.transform.look_at(target, Vec3::Y);
        light
    }

    pub fn ambient(name: &str, color: Vec3) -> Self {
        let mut light = Self::new(name, LightKind::Ambient);
        light.color = color;
        light
    }

    pub fn with_color(mut self, color: Vec3, intensity: f32) -> Self {
        self.color = color;
        self.intensity = intensity;
        self
    }

    pub fn with_cascades(mut self, cascade_size: f32) -> Self {
        self.cascaded = true;
        self.cascade_size = cascade_size;
        self
    }

    /// Change the kind and free the depth target when the light stops
    /// casting shadows.
    pub fn set_kind<B: GraphicsBackend>(&mut self, backend: &mut B, kind: LightKind) {
        if kind == LightKind::Ambient {
            self.release_shadow(backend);
        }
        self.kind = kind;
        self.reset_shadow_camera();
    }

    /// Free the depth target; the camera is kept for the next render
    pub fn release_shadow<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if let Some(shadow) = &mut self.shadow {
            shadow.release(backend);
        }
    }

    /// Rebuild the shadow camera projection after kind, cone or range changes.
    ///
    /// An ambient light keeps a shadow that still holds a depth target until
    /// [`crate::shadow::update_shadows`] releases it.
    pub fn reset_shadow_camera(&mut self) {
        let projection = match self.kind {
            LightKind::Ambient => {
                if self.shadow.as_ref().map_or(true, |s| s.target().is_none()) {
                    self.shadow = None;
                }
                return;
            }
            LightKind::Directional => {
                let s = self.cascade_size;
                Projection::orthographic(-s, s, -s, s, -500.0, 5000.0)
            }
            LightKind::Point | LightKind::Spot => {
                Projection::perspective(self.cutoff_angle * 2.0, 1.0, 1.0, self.max_distance.max(2.0))
            }
        };
        match &mut self.shadow {
            Some(shadow) => shadow.camera.projection = projection,
            None => {
                let camera = Camera {
                    projection,
                    ..Default::default()
                };
                self.shadow = Some(LightShadow::new(camera));
            }
        }
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.transform.position = position;
    }

    pub fn set_color(&mut self, color: Vec3, intensity: f32) {
        self.color = color;
        self.intensity = intensity;
    }

    /// Aim a spot light. Directional lights store the offset in `target_vector`.
    pub fn look_at(&mut self, target: Vec3) {
        match self.kind {
            LightKind::Directional => self.target_vector = self.transform.position - target,
            _ => self.transform.look_at(target, Vec3::Y),
        }
    }

    pub fn position(&self) -> Vec3 {
        self.transform.position
    }

    /// Direction the light travels
    pub fn direction(&self) -> Vec3 {
        match self.kind {
            LightKind::Directional => {
                let d = -self.target_vector.normalize_or_zero();
                if d == Vec3::ZERO {
                    -Vec3::Y
                } else {
                    d
                }
            }
            _ => self.transform.forward(),
        }
    }

    pub fn spot_cosine(&self) -> f32 {
        self.cutoff_angle.to_radians().cos()
    }

    pub fn spot_inner_cosine(&self) -> f32 {
        self.inner_angle.min(self.cutoff_angle).to_radians().cos()
    }

    pub fn casts_shadow(&self) -> bool {
        self.kind != LightKind::Ambient && self.shadow.is_some()
    }

    pub fn shadow(&self) -> Option<&LightShadow> {
        self.shadow.as_ref()
    }

    /// Detach the shadow so it can be rendered while the scene is borrowed
    pub fn take_shadow(&mut self) -> Option<LightShadow> {
        self.shadow.take()
    }

    pub fn restore_shadow(&mut self, shadow: LightShadow) {
        if self.kind != LightKind::Ambient {
            self.shadow = Some(shadow);
        }
    }

    /// Region the light can affect; `None` for unbounded lights
    pub fn world_bounds(&self) -> Option<BoundingBox> {
        match self.kind {
            LightKind::Point | LightKind::Spot => Some(BoundingBox::new(
                self.transform.position,
                Vec3::splat(self.max_distance),
            )),
            LightKind::Directional | LightKind::Ambient => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::ShadowState;

    #[test]
    fn test_defaults() {
        let light = Light::new("l", LightKind::Point);
        assert_eq!(light.intensity, 1.0);
        assert_eq!(light.max_distance, 100.0);
        assert_eq!(light.bias, 0.001);
        assert_eq!(light.cutoff_angle, 30.0);
        assert_eq!(light.inner_angle, 15.0);
        assert_eq!(light.cascade_size, 256.0);
    }

    #[test]
    fn test_ambient_never_owns_shadow() {
        let mut light = Light::ambient("a", Vec3::splat(0.2));
        assert!(!light.casts_shadow());
        let donor = Light::new("d", LightKind::Spot);
        let shadow = donor.shadow.clone().unwrap();
        light.restore_shadow(shadow);
        assert!(light.shadow().is_none());
    }

    #[test]
    fn test_new_light_has_no_shadow_yet() {
        let light = Light::spot("s", Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO);
        assert_eq!(light.shadow().unwrap().state(), ShadowState::NoShadow);
        assert!(light.direction().y < -0.99);
    }

    #[test]
    fn test_directional_direction_opposes_target_vector() {
        let light = Light::directional("sun", Vec3::new(0.0, 100.0, 0.0));
        assert_eq!(light.direction(), -Vec3::Y);
        assert!(light.world_bounds().is_none());
    }

    #[test]
    fn test_editing_moves_and_recolors() {
        let mut light = Light::spot("s", Vec3::ZERO, -Vec3::Z);
        light.set_position(Vec3::new(0.0, 5.0, 0.0));
        light.look_at(Vec3::new(5.0, 5.0, 0.0));
        light.set_color(Vec3::new(1.0, 0.0, 0.0), 4.0);
        assert_eq!(light.position(), Vec3::new(0.0, 5.0, 0.0));
        assert!(light.direction().x > 0.99);
        assert_eq!((light.color, light.intensity), (Vec3::X, 4.0));

        let mut sun = Light::directional("sun", Vec3::Y);
        sun.set_position(Vec3::new(0.0, 100.0, 0.0));
        sun.look_at(Vec3::new(0.0, 0.0, 50.0));
        assert_eq!(sun.target_vector, Vec3::new(0.0, 100.0, -50.0));
    }
}
