//! Built-in shader registry.
//!
//! Passes look shaders up by name and degrade when one is missing. A backend
//! maps `set_uniform("u_foo", ..)` onto field `foo` of the shader's `Uniforms`
//! block and texture units onto bindings of group 1.

use crate::backend::GraphicsBackend;

pub const GBUFFER: &str = "gbuffer";
pub const SHADOW_DEPTH: &str = "shadow_depth";
pub const FORWARD_LIGHT: &str = "forward_light";
pub const DEFERRED_LIGHT: &str = "deferred_light";
pub const SSAO: &str = "ssao";
pub const BLUR: &str = "ssao_blur";
pub const SKYBOX: &str = "skybox";
pub const REFLECTIONS: &str = "reflections";
pub const VOLUMETRIC: &str = "volumetric";
pub const DEPTH_VIEW: &str = "depth_view";
pub const PROBE: &str = "probe";

/// Every built-in shader with its WGSL source
pub fn builtin_sources() -> [(&'static str, &'static str); 11] {
    [
        (GBUFFER, super::gbuffer_pass::GBUFFER_SHADER),
        (SHADOW_DEPTH, crate::shadow::SHADOW_DEPTH_SHADER),
        (FORWARD_LIGHT, super::forward_pass::FORWARD_LIGHT_SHADER),
        (DEFERRED_LIGHT, super::lighting_pass::DEFERRED_LIGHT_SHADER),
        (SSAO, super::ssao::SSAO_SHADER),
        (BLUR, super::ssao::BLUR_SHADER),
        (SKYBOX, super::skybox::SKYBOX_SHADER),
        (REFLECTIONS, super::reflection_pass::REFLECTION_SHADER),
        (VOLUMETRIC, super::volumetric::VOLUMETRIC_SHADER),
        (DEPTH_VIEW, super::debug::DEPTH_VIEW_SHADER),
        (PROBE, super::debug::PROBE_SHADER),
    ]
}

/// Compile every built-in shader; failures are logged and leave that
/// shader missing. Returns how many compiled.
pub fn compile_builtin<B: GraphicsBackend>(backend: &mut B) -> usize {
    let mut compiled = 0;
    for (name, source) in builtin_sources() {
        match backend.create_shader(name, source) {
            Ok(_) => compiled += 1,
            Err(e) => log::warn!("Shader '{}' unavailable: {}", name, e),
        }
    }
    log::debug!("Compiled {} built-in shaders on {}", compiled, backend.name());
    compiled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique_and_sources_present() {
        let sources = builtin_sources();
        let names: HashSet<_> = sources.iter().map(|(n, _)| *n).collect();
        assert_eq!(names.len(), sources.len());
        for (name, source) in sources {
            assert!(source.contains("fn vs_main"), "{} has no vertex stage", name);
            assert!(source.contains("fn fs_main"), "{} has no fragment stage", name);
        }
    }

    #[test]
    fn test_rejected_shader_is_skipped() {
        let mut backend = HeadlessBackend::default();
        backend.reject_shader(SSAO);
        assert_eq!(compile_builtin(&mut backend), 10);
        assert!(backend.find_shader(SSAO).is_none());
        assert!(backend.find_shader(GBUFFER).is_some());
    }
}
