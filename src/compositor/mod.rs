//! The three compositors and their supporting types.

/// Offset easing and time sources for the parallax compositor.
pub mod animator;
/// Chroma-key matting compositor.
pub mod matting;
/// Depth parallax compositor.
pub mod parallax;
/// Sprite model and per-sprite renderer.
pub mod sprite;
/// Sticker overlay compositor.
pub mod sticker;
