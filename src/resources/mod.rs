//! Resource management
//!
//! Meshes, materials and textures, plus the [`Assets`] store that scene nodes
//! refer into by handle.

pub mod material;
pub mod mesh;
pub mod texture;

pub use material::*;
pub use mesh::*;
pub use texture::*;

use crate::backend::{BackendResult, GpuMesh, GraphicsBackend};
use crate::scene::bounds::BoundingBox;
use crate::scene::node::SceneNode;

/// Index of a mesh in [`Assets`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub(crate) usize);

/// Index of a material in [`Assets`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub(crate) usize);

#[derive(Debug)]
struct MeshAsset {
    mesh: Mesh,
    bounds: BoundingBox,
    gpu: Option<GpuMesh>,
}

/// Meshes and materials owned by a scene
#[derive(Debug, Default)]
pub struct Assets {
    meshes: Vec<MeshAsset>,
    materials: Vec<Material>,
}

impl Assets {
    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshHandle {
        let bounds = mesh
            .bounding_box()
            .unwrap_or(BoundingBox::new(glam::Vec3::ZERO, glam::Vec3::ZERO));
        self.meshes.push(MeshAsset {
            mesh,
            bounds,
            gpu: None,
        });
        MeshHandle(self.meshes.len() - 1)
    }

    pub fn add_material(&mut self, material: Material) -> MaterialHandle {
        self.materials.push(material);
        MaterialHandle(self.materials.len() - 1)
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&Mesh> {
        self.meshes.get(handle.0).map(|a| &a.mesh)
    }

    pub fn mesh_bounds(&self, handle: MeshHandle) -> Option<BoundingBox> {
        self.meshes.get(handle.0).map(|a| a.bounds)
    }

    /// Uploaded buffers, `None` until [`Assets::upload_pending`] ran
    pub fn gpu_mesh(&self, handle: MeshHandle) -> Option<&GpuMesh> {
        self.meshes.get(handle.0).and_then(|a| a.gpu.as_ref())
    }

    pub fn material(&self, handle: MaterialHandle) -> Option<&Material> {
        self.materials.get(handle.0)
    }

    pub fn material_mut(&mut self, handle: MaterialHandle) -> Option<&mut Material> {
        self.materials.get_mut(handle.0)
    }

    /// A renderable node for `mesh` with its bounds cached
    pub fn node(&self, name: &str, mesh: MeshHandle, material: MaterialHandle) -> SceneNode {
        let bounds = self
            .mesh_bounds(mesh)
            .unwrap_or(BoundingBox::new(glam::Vec3::ZERO, glam::Vec3::ZERO));
        SceneNode::new(name).with_mesh(mesh, bounds, material)
    }

    /// Upload every mesh that has no GPU buffers yet; returns how many were uploaded
    pub fn upload_pending<B: GraphicsBackend>(&mut self, backend: &mut B) -> BackendResult<usize> {
        let mut uploaded = 0;
        for asset in self.meshes.iter_mut().filter(|a| a.gpu.is_none()) {
            asset.gpu = Some(backend.upload_mesh(&asset.mesh)?);
            uploaded += 1;
        }
        if uploaded > 0 {
            log::debug!("Uploaded {} meshes", uploaded);
        }
        Ok(uploaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    #[test]
    fn test_upload_pending_is_incremental() {
        let mut backend = HeadlessBackend::default();
        let mut assets = Assets::default();
        let cube = assets.add_mesh(Mesh::cube());
        assert!(assets.gpu_mesh(cube).is_none());
        assert_eq!(assets.upload_pending(&mut backend).unwrap(), 1);
        assets.add_mesh(Mesh::sphere(8, 4));
        assert_eq!(assets.upload_pending(&mut backend).unwrap(), 1);
        assert_eq!(assets.gpu_mesh(cube).unwrap().index_count, 36);
    }

    #[test]
    fn test_node_caches_mesh_bounds() {
        let mut assets = Assets::default();
        let mesh = assets.add_mesh(Mesh::plane(4.0, 4.0, 1));
        let material = assets.add_material(Material::default());
        let node = assets.node("floor", mesh, material);
        assert!(node.is_renderable());
        assert_eq!(node.local_bounds.unwrap().half_size.x, 2.0);
    }

    #[test]
    fn test_material_edits_are_seen_by_handle() {
        let mut assets = Assets::default();
        let handle = assets.add_material(Material::matte(glam::Vec3::ONE));
        if let Some(material) = assets.material_mut(handle) {
            material.roughness = 0.25;
        }
        assert_eq!(assets.material(handle).unwrap().roughness, 0.25);
    }
}
