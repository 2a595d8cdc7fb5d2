//! The graphics-device seam and its backends.

pub(crate) mod composite;
/// Software rasterizer backend.
pub mod cpu;
/// Device trait, handles and program descriptions.
pub mod device;
/// Program sources and layouts.
pub mod shaders;
/// Headless wgpu backend.
#[cfg(feature = "gpu")]
pub mod wgpu_backend;
