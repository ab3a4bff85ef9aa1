//! Offline lighting precomputation.
//!
//! Both bakes are explicit, blocking calls outside the per-frame path. They
//! render cube views of the opaque scene with the forward pass:
//!
//! - [`irradiance`] projects each view of a 3-D probe grid onto order-2
//!   spherical harmonics, persisted by [`probe_file`].
//! - [`reflection`] renders straight into each probe's cubemap and builds its
//!   mip chain.

pub mod cubemap;
pub mod irradiance;
pub mod probe_file;
pub mod reflection;
pub mod spherical_harmonics;

pub use irradiance::{GridLayout, IrradianceBaker, IrradianceGrid, IrradianceGridDesc, Probe};
pub use probe_file::{load_probes, read_probes, save_probes, write_probes, ProbeFileError, ProbeFileHeader};
pub use reflection::{ReflectionBaker, ReflectionProbe};
pub use spherical_harmonics::SphericalHarmonics;

use glam::UVec3;
use thiserror::Error;

use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum BakeError {
    #[error("backend failure during bake: {0}")]
    Backend(#[from] BackendError),
    #[error("probe grid dims {0} must all be at least 1")]
    InvalidDims(UVec3),
    #[error("bake target is missing its {0}")]
    MissingTarget(&'static str),
    #[error("probe needs a {needed}px target, only {available}px available")]
    TargetTooSmall { needed: u32, available: u32 },
}

pub type BakeResult<T> = Result<T, BakeError>;
