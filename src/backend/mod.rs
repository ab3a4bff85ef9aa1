//! Backend abstraction layer
//!
//! The pipeline is written against [`GraphicsBackend`]. A windowed application
//! supplies its own implementation; [`headless::HeadlessBackend`] runs
//! everything in CPU memory for tests and offline baking.

pub mod headless;
pub mod traits;
pub mod types;

pub use traits::*;
pub use types::*;
