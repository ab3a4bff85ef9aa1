//! Scene management
//!
//! A [`Scene`] owns the placed prefabs, the lights and the assets they refer
//! to. It is passed explicitly to every pipeline operation.

pub mod bounds;
pub mod camera;
pub mod frustum;
pub mod light;
pub mod node;
pub mod transform;

pub use bounds::BoundingBox;
pub use camera::{Camera, Projection, RenderView};
pub use frustum::{Containment, Frustum};
pub use light::{Light, LightKind};
pub use node::{Prefab, PrefabInstance, SceneNode};
pub use transform::Transform;

use glam::{Mat4, Vec3};

use crate::backend::TextureHandle;
use crate::resources::Assets;

/// Capabilities the traversal needs from anything placed in the scene
pub trait SceneObject {
    fn world_transform(&self) -> Mat4;

    /// World-space bounds, `None` when the object is unbounded
    fn bounding_volume(&self) -> Option<BoundingBox>;

    fn is_visible(&self) -> bool;
}

impl SceneObject for PrefabInstance {
    fn world_transform(&self) -> Mat4 {
        self.model
    }

    fn bounding_volume(&self) -> Option<BoundingBox> {
        self.world_bounds()
    }

    fn is_visible(&self) -> bool {
        self.visible
    }
}

impl SceneObject for Light {
    fn world_transform(&self) -> Mat4 {
        self.transform.matrix()
    }

    fn bounding_volume(&self) -> Option<BoundingBox> {
        self.world_bounds()
    }

    fn is_visible(&self) -> bool {
        self.visible
    }
}

/// Everything that can be placed in a scene
#[derive(Debug, Clone)]
pub enum SceneInstance {
    Prefab(PrefabInstance),
    Light(LightId, Light),
}

impl SceneInstance {
    pub fn name(&self) -> &str {
        match self {
            SceneInstance::Prefab(p) => &p.name,
            SceneInstance::Light(_, l) => &l.name,
        }
    }

    fn object(&self) -> &dyn SceneObject {
        match self {
            SceneInstance::Prefab(p) => p,
            SceneInstance::Light(_, l) => l,
        }
    }
}

impl SceneObject for SceneInstance {
    fn world_transform(&self) -> Mat4 {
        self.object().world_transform()
    }

    fn bounding_volume(&self) -> Option<BoundingBox> {
        self.object().bounding_volume()
    }

    fn is_visible(&self) -> bool {
        self.object().is_visible()
    }
}

/// Identity of a light inside its scene, never reused after removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightId(usize);

/// Scene context: instances, lights, assets and global lighting settings
#[derive(Debug)]
pub struct Scene {
    instances: Vec<SceneInstance>,
    pub assets: Assets,
    pub ambient_light: Vec3,
    pub ambient_light_enabled: bool,
    pub ambient_occlusion_enabled: bool,
    /// Environment cubemap used by the skybox and reflections
    pub environment: Option<TextureHandle>,
    sun: Option<LightId>,
    next_light_id: usize,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            instances: Vec::new(),
            assets: Assets::default(),
            ambient_light: Vec3::splat(0.1),
            ambient_light_enabled: true,
            ambient_occlusion_enabled: true,
            environment: None,
            sun: None,
            next_light_id: 0,
        }
    }

    pub fn add_prefab(&mut self, instance: PrefabInstance) -> usize {
        self.instances.push(SceneInstance::Prefab(instance));
        self.instances.len() - 1
    }

    pub fn add_light(&mut self, light: Light) -> LightId {
        log::debug!("Adding {:?} light '{}'", light.kind, light.name);
        let id = LightId(self.next_light_id);
        self.next_light_id += 1;
        self.instances.push(SceneInstance::Light(id, light));
        id
    }

    /// Remove every instance called `name`. The sun is cleared if removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.instances.len();
        self.instances.retain(|i| i.name() != name);
        if self.sun.is_some_and(|id| self.light(id).is_none()) {
            self.sun = None;
        }
        before - self.instances.len()
    }

    pub fn instances(&self) -> &[SceneInstance] {
        &self.instances
    }

    pub fn prefabs(&self) -> impl Iterator<Item = &PrefabInstance> {
        self.instances.iter().filter_map(|i| match i {
            SceneInstance::Prefab(p) => Some(p),
            SceneInstance::Light(..) => None,
        })
    }

    pub fn prefab_mut(&mut self, name: &str) -> Option<&mut PrefabInstance> {
        self.instances.iter_mut().find_map(|i| match i {
            SceneInstance::Prefab(p) if p.name == name => Some(p),
            _ => None,
        })
    }

    /// Lights in insertion order
    pub fn lights(&self) -> impl Iterator<Item = (LightId, &Light)> {
        self.instances.iter().filter_map(|inst| match inst {
            SceneInstance::Light(id, l) => Some((*id, l)),
            SceneInstance::Prefab(_) => None,
        })
    }

    pub fn light_ids(&self) -> Vec<LightId> {
        self.lights().map(|(id, _)| id).collect()
    }

    pub fn light(&self, id: LightId) -> Option<&Light> {
        self.instances.iter().find_map(|inst| match inst {
            SceneInstance::Light(lid, l) if *lid == id => Some(l),
            _ => None,
        })
    }

    pub fn light_mut(&mut self, id: LightId) -> Option<&mut Light> {
        self.instances.iter_mut().find_map(|inst| match inst {
            SceneInstance::Light(lid, l) if *lid == id => Some(l),
            _ => None,
        })
    }

    pub fn find_light(&self, name: &str) -> Option<LightId> {
        self.lights().find(|(_, l)| l.name == name).map(|(id, _)| id)
    }

    pub fn light_count(&self) -> usize {
        self.lights().count()
    }

    /// Designate a directional light as the sun. Other kinds are rejected.
    pub fn set_sun(&mut self, id: LightId) -> bool {
        match self.light(id) {
            Some(light) if light.kind == LightKind::Directional => {
                self.sun = Some(id);
                true
            }
            Some(light) => {
                log::warn!("Light '{}' is {:?}, only directional lights can be the sun", light.name, light.kind);
                false
            }
            None => false,
        }
    }

    pub fn sun(&self) -> Option<(LightId, &Light)> {
        let id = self.sun?;
        self.light(id).map(|l| (id, l))
    }

    pub fn set_environment(&mut self, cubemap: Option<TextureHandle>) {
        self.environment = cubemap;
    }

    /// Ambient term contributed once per frame
    pub fn effective_ambient(&self) -> Vec3 {
        if self.ambient_light_enabled {
            self.ambient_light
        } else {
            Vec3::ZERO
        }
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lights_keep_insertion_order() {
        let mut scene = Scene::new();
        scene.add_light(Light::point("a", Vec3::ZERO, 10.0));
        scene.add_prefab(PrefabInstance::new("p", Prefab::new("p", SceneNode::new("root")), Mat4::IDENTITY));
        scene.add_light(Light::point("b", Vec3::ZERO, 10.0));
        let names: Vec<_> = scene.lights().map(|(_, l)| l.name.clone()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_sun_must_be_directional() {
        let mut scene = Scene::new();
        let point = scene.add_light(Light::point("p", Vec3::ZERO, 10.0));
        let sun = scene.add_light(Light::directional("sun", Vec3::Y * 100.0));
        assert!(!scene.set_sun(point));
        assert!(scene.set_sun(sun));
        assert_eq!(scene.sun().unwrap().1.name, "sun");
    }

    #[test]
    fn test_removing_sun_clears_it() {
        let mut scene = Scene::new();
        let sun = scene.add_light(Light::directional("sun", Vec3::Y));
        scene.set_sun(sun);
        scene.add_light(Light::point("p", Vec3::ZERO, 1.0));
        assert_eq!(scene.remove("sun"), 1);
        assert!(scene.sun().is_none());
        assert_eq!(scene.light_count(), 1);
    }

    #[test]
    fn test_ambient_toggle() {
        let mut scene = Scene::new();
        assert_eq!(scene.effective_ambient(), Vec3::splat(0.1));
        scene.ambient_light_enabled = false;
        assert_eq!(scene.effective_ambient(), Vec3::ZERO);
    }

    #[test]
    fn test_find_light_by_name() {
        let mut scene = Scene::new();
        scene.add_light(Light::point("a", Vec3::ZERO, 10.0));
        let b = scene.add_light(Light::spot("b", Vec3::Y, Vec3::ZERO));
        assert_eq!(scene.find_light("b"), Some(b));
        assert_eq!(scene.find_light("missing"), None);
    }

    #[test]
    fn test_light_ids_survive_earlier_removals() {
        let mut scene = Scene::new();
        let a = scene.add_light(Light::point("a", Vec3::ZERO, 10.0));
        let b = scene.add_light(Light::point("b", Vec3::ZERO, 10.0));
        let c = scene.add_light(Light::directional("c", Vec3::Y));
        scene.set_sun(c);

        assert_eq!(scene.remove("a"), 1);
        assert!(scene.light(a).is_none());
        assert_eq!(scene.light(b).unwrap().name, "b");
        assert_eq!(scene.light(c).unwrap().name, "c");
        assert_eq!(scene.sun().map(|(id, _)| id), Some(c));
        assert_eq!(scene.find_light("c"), Some(c));

        let d = scene.add_light(Light::point("d", Vec3::ZERO, 10.0));
        assert!(d != a && d != b && d != c);
        assert_eq!(scene.light_ids(), vec![b, c, d]);
    }
}
