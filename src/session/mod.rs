//! Configuration and the render loop driving a compositor on one device.

/// JSON configuration.
pub mod config;
/// Frame loop, stop handle and frame-rate meter.
pub mod render_loop;
