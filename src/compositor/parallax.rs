//! Three-layer depth parallax driven by an eased 2D offset.

use std::sync::Arc;

use crate::{
    compositor::animator::{Clock, ParallaxAnimator, SystemClock},
    foundation::{
        core::{Bitmap, OutputSize},
        error::CompositorResult,
        math::{CenterCrop, TEXCOORDS_NO_ROTATION},
    },
    gpu::{
        device::{GpuDevice, ProgramDesc, ProgramId, TextureId, UniformValue},
        shaders::PARALLAX,
    },
    stage::{
        filter::{Compositor, FilterStage, Pipeline, StageHooks, StageQueues},
        texture::{TextureRef, TextureSlot},
    },
};

/// Parallax input layers; the discriminant is the texture unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerSlot {
    Background = 0,
    Depth = 1,
    Foreground = 2,
}

impl LayerSlot {
    pub const ALL: [LayerSlot; 3] = [Self::Background, Self::Depth, Self::Foreground];

    fn sampler(self) -> &'static str {
        match self {
            Self::Background => "u_bg",
            Self::Depth => "u_depth",
            Self::Foreground => "u_front",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

pub struct ParallaxStage {
    layers: [TextureSlot; 3],
    animator: ParallaxAnimator,
    clock: Arc<dyn Clock>,
    output: OutputSize,
    texcoords: [[f32; 2]; 4],
}

impl ParallaxStage {
    fn set_layer(&mut self, device: &mut dyn GpuDevice, slot: LayerSlot, bitmap: &Bitmap) {
        if self.layers[slot.index()].upload(device, bitmap) && slot == LayerSlot::Background {
            self.update_layout();
        }
    }

    /// Co-register all layers by center-cropping against the background size.
    fn update_layout(&mut self) {
        let Some(source) = self.layers[LayerSlot::Background.index()].size() else {
            return;
        };
        match CenterCrop::compute(source, self.output) {
            Some(crop) => self.texcoords = TEXCOORDS_NO_ROTATION.map(|uv| crop.apply(uv)),
            None => tracing::debug!(
                ?source,
                output = ?self.output,
                "degenerate size; keeping previous parallax layout"
            ),
        }
    }
}

impl StageHooks for ParallaxStage {
    fn program(&self) -> &'static ProgramDesc {
        &PARALLAX
    }

    fn on_initialized(&mut self, stage: &mut FilterStage, device: &mut dyn GpuDevice) {
        for slot in LayerSlot::ALL {
            stage.set_uniform(device, slot.sampler(), UniformValue::Int(slot as i32));
        }
        stage.set_uniform(device, "u_factor", UniformValue::Vec2(self.animator.current()));
    }

    fn on_output_size_changed(
        &mut self,
        stage: &mut FilterStage,
        device: &mut dyn GpuDevice,
        size: OutputSize,
    ) {
        self.output = size;
        self.update_layout();
        stage.set_uniform(
            device,
            "u_resolution",
            UniformValue::Vec2([size.width as f32, size.height as f32]),
        );
    }

    fn before_draw(
        &mut self,
        stage: &mut FilterStage,
        device: &mut dyn GpuDevice,
        _input: Option<TextureId>,
    ) -> CompositorResult<()> {
        let factor = self.animator.tick(self.clock.now_ms());
        stage.set_uniform(device, "u_factor", UniformValue::Vec2(factor));
        for slot in LayerSlot::ALL {
            device.bind_texture(slot as u32, self.layers[slot.index()].id());
        }
        Ok(())
    }

    fn draw(
        &mut self,
        stage: &mut FilterStage,
        device: &mut dyn GpuDevice,
        _input: Option<TextureId>,
    ) -> CompositorResult<()> {
        stage.draw_fullscreen(device, self.texcoords)
    }

    fn on_destroy(&mut self, device: &mut dyn GpuDevice) {
        for layer in &mut self.layers {
            layer.release(device);
        }
    }
}

/// Thread-safe control surface of a [`ParallaxCompositor`].
#[derive(Clone)]
pub struct ParallaxHandle {
    queues: Arc<StageQueues<ParallaxStage>>,
    clock: Arc<dyn Clock>,
}

impl ParallaxHandle {
    pub fn set_layer(&self, slot: LayerSlot, bitmap: Bitmap) {
        self.queues.run_on_draw(move |state, device| {
            state.hooks.set_layer(device, slot, &bitmap);
        });
    }

    /// Animate toward `(x, y)`, timed from this call.
    pub fn set_target_offset(&self, x: f32, y: f32) {
        let now = self.clock.now_ms();
        self.queues.run_on_draw(move |state, _| {
            state.hooks.animator.set_target(x, y, now);
        });
    }
}

/// Blends background, depth map and foreground cut-out, shifting layers by the
/// animated offset in proportion to depth.
pub struct ParallaxCompositor {
    pipeline: Pipeline<ParallaxStage>,
    clock: Arc<dyn Clock>,
}

impl Default for ParallaxCompositor {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock::default()))
    }
}

impl ParallaxCompositor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let stage = ParallaxStage {
            layers: Default::default(),
            animator: ParallaxAnimator::new(),
            clock: Arc::clone(&clock),
            output: OutputSize::new(0, 0),
            texcoords: TEXCOORDS_NO_ROTATION,
        };
        Self {
            pipeline: Pipeline::new(stage),
            clock,
        }
    }

    pub fn handle(&self) -> ParallaxHandle {
        ParallaxHandle {
            queues: self.pipeline.queues(),
            clock: Arc::clone(&self.clock),
        }
    }

    pub fn animator(&self) -> &ParallaxAnimator {
        &self.pipeline.hooks().animator
    }

    /// Offset pushed with the most recent frame.
    pub fn factor(&self) -> [f32; 2] {
        self.animator().current()
    }

    pub fn texcoords(&self) -> [[f32; 2]; 4] {
        self.pipeline.hooks().texcoords
    }

    pub fn layer(&self, slot: LayerSlot) -> Option<TextureRef> {
        self.pipeline.hooks().layers[slot.index()].get()
    }

    pub fn program(&self) -> Option<ProgramId> {
        self.pipeline.stage().program()
    }
}

impl Compositor for ParallaxCompositor {
    fn label(&self) -> &'static str {
        "parallax"
    }

    fn initialize(&mut self, device: &mut dyn GpuDevice) {
        self.pipeline.initialize(device);
    }

    fn on_output_size_changed(&mut self, device: &mut dyn GpuDevice, size: OutputSize) {
        self.pipeline.on_output_size_changed(device, size);
    }

    fn draw_frame(
        &mut self,
        device: &mut dyn GpuDevice,
        input: Option<TextureId>,
    ) -> CompositorResult<()> {
        self.pipeline.draw_frame(device, input)
    }

    fn destroy(&mut self, device: &mut dyn GpuDevice) {
        self.pipeline.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compositor::animator::ManualClock, gpu::cpu::CpuDevice};

    #[test]
    fn layout_crops_wide_background() {
        let mut dev = CpuDevice::new(OutputSize::new(4, 4));
        let mut parallax = ParallaxCompositor::new(Arc::new(ManualClock::new(0)));
        parallax
            .handle()
            .set_layer(LayerSlot::Background, Bitmap::solid(8, 4, [0, 0, 0, 255]).unwrap());
        parallax.draw_frame(&mut dev, None).unwrap();
        assert_eq!(
            parallax.texcoords(),
            [[0.25, 1.0], [0.75, 1.0], [0.25, 0.0], [0.75, 0.0]]
        );
    }

    #[test]
    fn depth_layer_does_not_change_layout() {
        let mut dev = CpuDevice::new(OutputSize::new(4, 4));
        let mut parallax = ParallaxCompositor::new(Arc::new(ManualClock::new(0)));
        parallax
            .handle()
            .set_layer(LayerSlot::Depth, Bitmap::solid(8, 4, [0, 0, 0, 255]).unwrap());
        parallax.draw_frame(&mut dev, None).unwrap();
        assert_eq!(parallax.texcoords(), TEXCOORDS_NO_ROTATION);
        assert!(parallax.layer(LayerSlot::Depth).is_some());
    }
}
