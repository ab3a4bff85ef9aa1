//! Prefab node trees and their placements in the scene

use std::sync::Arc;

use glam::Mat4;

use super::bounds::BoundingBox;
use crate::resources::{MaterialHandle, MeshHandle};

/// One node of a prefab hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub name: String,
    pub visible: bool,
    /// Transform relative to the parent node
    pub local: Mat4,
    pub mesh: Option<MeshHandle>,
    pub material: Option<MaterialHandle>,
    /// Mesh-space bounds, cached when the mesh is assigned
    pub local_bounds: Option<BoundingBox>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            visible: true,
            local: Mat4::IDENTITY,
            mesh: None,
            material: None,
            local_bounds: None,
            children: Vec::new(),
        }
    }

    pub fn with_mesh(mut self, mesh: MeshHandle, bounds: BoundingBox, material: MaterialHandle) -> Self {
        self.mesh = Some(mesh);
        self.local_bounds = Some(bounds);
        self.material = Some(material);
        self
    }

    pub fn with_transform(mut self, local: Mat4) -> Self {
        self.local = local;
        self
    }

    pub fn with_child(mut self, child: SceneNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn add_child(&mut self, child: SceneNode) {
        self.children.push(child);
    }

    /// Nodes with both a mesh and a material produce draws
    pub fn is_renderable(&self) -> bool {
        self.mesh.is_some() && self.material.is_some()
    }

    /// Count of this node and all descendants
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(SceneNode::node_count).sum::<usize>()
    }

    pub fn find(&self, name: &str) -> Option<&SceneNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut SceneNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(name))
    }

    /// Union of the world boxes of all visible renderable descendants
    pub fn world_bounds(&self, parent: &Mat4) -> Option<BoundingBox> {
        if !self.visible {
            return None;
        }
        let world = *parent * self.local;
        let own = self.local_bounds.map(|b| b.transformed(&world));
        self.children
            .iter()
            .filter_map(|c| c.world_bounds(&world))
            .fold(own, |acc, b| Some(acc.map_or(b, |a| a.union(&b))))
    }
}

/// Shared node hierarchy loaded once and placed many times
#[derive(Debug, Clone, PartialEq)]
pub struct Prefab {
    pub name: String,
    pub root: SceneNode,
}

impl Prefab {
    pub fn new(name: &str, root: SceneNode) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            root,
        })
    }
}

/// A prefab placed in the world
#[derive(Debug, Clone)]
pub struct PrefabInstance {
    pub name: String,
    pub model: Mat4,
    pub visible: bool,
    /// Multiplier applied to every material's UV tiling
    pub uv_factor: f32,
    pub prefab: Arc<Prefab>,
}

impl PrefabInstance {
    pub fn new(name: &str, prefab: Arc<Prefab>, model: Mat4) -> Self {
        Self {
            name: name.to_string(),
            model,
            visible: true,
            uv_factor: 1.0,
            prefab,
        }
    }

    /// Editable hierarchy; detaches from other instances sharing the prefab
    pub fn prefab_mut(&mut self) -> &mut Prefab {
        Arc::make_mut(&mut self.prefab)
    }

    pub fn world_bounds(&self) -> Option<BoundingBox> {
        self.prefab.root.world_bounds(&self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn unit_box() -> BoundingBox {
        BoundingBox::new(Vec3::ZERO, Vec3::ONE)
    }

    #[test]
    fn test_world_bounds_follow_hierarchy() {
        let child = SceneNode::new("child")
            .with_mesh(MeshHandle(0), unit_box(), MaterialHandle(0))
            .with_transform(Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)));
        let root = SceneNode::new("root").with_child(child);
        let bounds = root
            .world_bounds(&Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0)))
            .unwrap();
        assert_eq!(bounds.center, Vec3::new(10.0, 5.0, 0.0));
    }

    #[test]
    fn test_hidden_node_has_no_bounds() {
        let mut node = SceneNode::new("n").with_mesh(MeshHandle(0), unit_box(), MaterialHandle(0));
        node.visible = false;
        assert!(node.world_bounds(&Mat4::IDENTITY).is_none());
    }

    #[test]
    fn test_prefab_mut_copies_on_write() {
        let prefab = Prefab::new("p", SceneNode::new("root"));
        let a = PrefabInstance::new("a", prefab.clone(), Mat4::IDENTITY);
        let mut b = PrefabInstance::new("b", prefab, Mat4::IDENTITY);
        b.prefab_mut().root.add_child(SceneNode::new("extra"));
        assert_eq!(a.prefab.root.node_count(), 1);
        assert_eq!(b.prefab.root.node_count(), 2);
    }
}
