//! Scoped render state

use crate::backend::{GraphicsBackend, RenderState};

/// Apply `state`, run `pass`, then put the backend back to
/// [`RenderState::BASELINE`] whatever the pass did in between.
pub fn with_render_state<B, R>(backend: &mut B, state: RenderState, pass: impl FnOnce(&mut B) -> R) -> R
where
    B: GraphicsBackend,
{
    backend.apply_render_state(&state);
    let result = pass(backend);
    backend.apply_render_state(&RenderState::BASELINE);
    result
}
