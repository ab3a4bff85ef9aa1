//! Light evaluation shared by the accumulation pass, the forward pass and
//! the headless backend's software shaders.

pub mod shading;

pub use shading::{
    ambient_term, decode_normal, direct_light, distance_attenuation, encode_normal, shadow_factor, spot_attenuation,
    DeferredLightProgram, LightParams, SurfaceSample,
};
