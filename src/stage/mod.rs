//! Shader-stage building blocks shared by every compositor.

pub mod filter;
pub mod queue;
pub mod texture;
