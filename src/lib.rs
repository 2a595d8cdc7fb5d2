#![forbid(unsafe_code)]
//! Real-time compositing of camera frames and still layers: chroma-key matting,
//! a sticker overlay, and depth parallax.
//!
//! Compositors run on a single render thread that owns a [`GpuDevice`]. Other
//! threads mutate them through cloneable handles that only enqueue work; the
//! queued commands run at the start of the next frame.

/// Bitmap decoding and PNG output.
pub mod assets;
/// Matting, sticker and parallax compositors.
pub mod compositor;
/// Core value types, errors and matrix math.
pub mod foundation;
/// The graphics-device seam and its CPU and wgpu backends.
pub mod gpu;
/// Configuration and the render loop.
pub mod session;
/// Shader stages, deferred command queues and texture slots.
pub mod stage;

pub use assets::decode::{decode_image, load_bitmap, load_bitmap_or_empty, save_png};
pub use compositor::{
    animator::{Clock, ManualClock, ParallaxAnimator, SystemClock},
    matting::{MattingCompositor, MattingHandle, MattingSettings},
    parallax::{LayerSlot, ParallaxCompositor, ParallaxHandle},
    sprite::{Sprite, SpriteId, SpriteTransform},
    sticker::{StickerCompositor, StickerHandle},
};
pub use foundation::{
    core::{Bitmap, FrameRGBA, OutputSize, Point},
    error::{CompositorError, CompositorResult},
    math::Mat4,
};
pub use gpu::{
    cpu::CpuDevice,
    device::{BackendKind, DeviceSettings, GpuDevice, create_device},
};
pub use session::{
    config::Config,
    render_loop::{RenderLoop, RenderLoopHandle},
};
pub use stage::filter::Compositor;
