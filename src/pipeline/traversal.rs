//! Scene traversal and frustum culling.
//!
//! Instances are visited in insertion order, nodes depth first with the
//! parent before its children. A node's world matrix is the instance model
//! times the chain of local matrices down to it. Every visible, renderable
//! node reaches exactly one draw routine, chosen by [`RenderMode`].

use glam::Mat4;

use crate::backend::{GpuMesh, GraphicsBackend};
use crate::resources::Material;
use crate::scene::{PrefabInstance, RenderView, Scene, SceneNode, SceneObject};

use super::{forward_pass, gbuffer_pass};
use crate::shadow;

/// Which draw routine visible nodes are sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderMode {
    /// Depth only, into a light's shadow map
    Shadow,
    /// Surface attributes into the geometry buffer
    Deferred,
    /// Lit directly, one draw per light
    Forward,
}

/// Shared inputs of one traversal
#[derive(Debug, Clone, Copy)]
pub struct DrawContext<'a> {
    pub scene: &'a Scene,
    pub view: &'a RenderView,
    pub mode: RenderMode,
}

/// A node that passed culling
#[derive(Debug, Clone, Copy)]
pub struct DrawItem<'a> {
    pub name: &'a str,
    pub model: Mat4,
    pub mesh: &'a GpuMesh,
    pub material: &'a Material,
    pub uv_factor: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub visited: usize,
    pub culled: usize,
    pub drawn: usize,
    /// Renderable nodes whose mesh was never uploaded or whose material is gone
    pub missing: usize,
}

impl std::ops::AddAssign for TraversalStats {
    fn add_assign(&mut self, other: Self) {
        self.visited += other.visited;
        self.culled += other.culled;
        self.drawn += other.drawn;
        self.missing += other.missing;
    }
}

pub fn render_scene<B: GraphicsBackend>(backend: &mut B, ctx: &DrawContext<'_>) -> TraversalStats {
    let mut stats = TraversalStats::default();
    for instance in ctx.scene.prefabs() {
        stats += render_instance(backend, ctx, instance);
    }
    log::trace!(
        "{:?} traversal: {} drawn, {} culled, {} missing",
        ctx.mode,
        stats.drawn,
        stats.culled,
        stats.missing
    );
    stats
}

pub fn render_instance<B: GraphicsBackend>(
    backend: &mut B,
    ctx: &DrawContext<'_>,
    instance: &PrefabInstance,
) -> TraversalStats {
    let mut stats = TraversalStats::default();
    if instance.is_visible() {
        let model = instance.world_transform();
        render_node(backend, ctx, &instance.prefab.root, &model, instance.uv_factor, &mut stats);
    }
    stats
}

fn render_node<B: GraphicsBackend>(
    backend: &mut B,
    ctx: &DrawContext<'_>,
    node: &SceneNode,
    parent: &Mat4,
    uv_factor: f32,
    stats: &mut TraversalStats,
) {
    if !node.visible {
        return;
    }
    stats.visited += 1;
    let world = *parent * node.local;

    if let (Some(mesh), Some(material), Some(bounds)) = (node.mesh, node.material, node.local_bounds) {
        if ctx.view.is_visible(&bounds.transformed(&world)) {
            let assets = &ctx.scene.assets;
            match (assets.gpu_mesh(mesh), assets.material(material)) {
                (Some(gpu), Some(material)) => {
                    let item = DrawItem {
                        name: &node.name,
                        model: world,
                        mesh: gpu,
                        material,
                        uv_factor,
                    };
                    dispatch(backend, ctx, &item);
                    stats.drawn += 1;
                }
                _ => {
                    log::trace!("Node '{}' has no uploaded mesh or material", node.name);
                    stats.missing += 1;
                }
            }
        } else {
            stats.culled += 1;
        }
    }

    for child in &node.children {
        render_node(backend, ctx, child, &world, uv_factor, stats);
    }
}

fn dispatch<B: GraphicsBackend>(backend: &mut B, ctx: &DrawContext<'_>, item: &DrawItem<'_>) {
    match ctx.mode {
        RenderMode::Shadow => shadow::draw_caster(backend, ctx, item),
        RenderMode::Deferred => gbuffer_pass::draw_gbuffer(backend, ctx, item),
        RenderMode::Forward => forward_pass::draw_forward(backend, ctx, item),
    }
}
