//! Chroma-key matting over a substitute background.

use std::sync::Arc;

use crate::{
    foundation::{
        core::{Bitmap, OutputSize},
        error::CompositorResult,
        math::{CenterCrop, FULLSCREEN_QUAD, Mat4, Rotation, TEXCOORDS_NO_ROTATION, rotated_texcoords},
    },
    gpu::{
        device::{GpuDevice, ProgramDesc, ProgramId, TextureId, UniformValue},
        shaders::MATTING,
    },
    stage::{
        filter::{Compositor, FilterStage, Pipeline, StageHooks, StageQueues},
        texture::{TextureRef, TextureSlot},
    },
};

const CAMERA_UNIT: i32 = 0;
const BACKGROUND_UNIT: i32 = 1;

/// Initial key parameters.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MattingSettings {
    pub key_color: [f32; 3],
    pub similarity: f32,
    pub smoothness: f32,
}

impl Default for MattingSettings {
    fn default() -> Self {
        Self {
            key_color: [0.0, 1.0, 0.0],
            similarity: 0.4,
            smoothness: 0.08,
        }
    }
}

pub struct MattingStage {
    background: TextureSlot,
    output: OutputSize,
    crop: Option<CenterCrop>,
}

impl MattingStage {
    fn new() -> Self {
        Self {
            background: TextureSlot::new(),
            output: OutputSize::new(0, 0),
            crop: None,
        }
    }

    fn set_background(&mut self, stage: &mut FilterStage, device: &mut dyn GpuDevice, bitmap: &Bitmap) {
        if self.background.upload(device, bitmap) {
            self.update_crop(stage, device);
        }
    }

    fn update_crop(&mut self, stage: &mut FilterStage, device: &mut dyn GpuDevice) {
        let Some(source) = self.background.size() else {
            return;
        };
        match CenterCrop::compute(source, self.output) {
            Some(crop) => {
                self.crop = Some(crop);
                stage.set_uniform(device, "uMVPMatrix", UniformValue::Mat4(crop.tex_matrix()));
            }
            None => tracing::debug!(
                ?source,
                output = ?self.output,
                "degenerate size; keeping previous background crop"
            ),
        }
    }
}

impl StageHooks for MattingStage {
    fn program(&self) -> &'static ProgramDesc {
        &MATTING
    }

    fn on_initialized(&mut self, stage: &mut FilterStage, device: &mut dyn GpuDevice) {
        stage.set_uniform(device, "inputImageTexture", UniformValue::Int(CAMERA_UNIT));
        stage.set_uniform(device, "inputImageTexture2", UniformValue::Int(BACKGROUND_UNIT));
        stage.set_uniform(device, "uMVPMatrix", UniformValue::Mat4(Mat4::IDENTITY));
    }

    fn on_output_size_changed(
        &mut self,
        stage: &mut FilterStage,
        device: &mut dyn GpuDevice,
        size: OutputSize,
    ) {
        self.output = size;
        self.update_crop(stage, device);
    }

    fn before_draw(
        &mut self,
        _stage: &mut FilterStage,
        device: &mut dyn GpuDevice,
        input: Option<TextureId>,
    ) -> CompositorResult<()> {
        device.bind_texture(CAMERA_UNIT as u32, input);
        device.bind_texture(BACKGROUND_UNIT as u32, self.background.id());
        Ok(())
    }

    fn draw(
        &mut self,
        stage: &mut FilterStage,
        device: &mut dyn GpuDevice,
        _input: Option<TextureId>,
    ) -> CompositorResult<()> {
        // Camera frames arrive a quarter turn off and mirrored vertically.
        let camera = rotated_texcoords(Rotation::Rotation90, false, true);
        stage.draw_quad(
            device,
            &[
                ("position", FULLSCREEN_QUAD),
                ("inputTextureCoordinate", camera),
                ("inputTextureCoordinate2", TEXCOORDS_NO_ROTATION),
            ],
        )
    }

    fn on_destroy(&mut self, device: &mut dyn GpuDevice) {
        self.background.release(device);
        self.crop = None;
    }
}

/// Thread-safe control surface of a [`MattingCompositor`]. Every call only enqueues.
#[derive(Clone)]
pub struct MattingHandle {
    queues: Arc<StageQueues<MattingStage>>,
}

impl MattingHandle {
    /// Components are clamped to `[0, 1]` and applied together in one deferred command.
    pub fn set_key_color(&self, r: f32, g: f32, b: f32) {
        let (r, g, b) = (unit(r), unit(g), unit(b));
        self.queues.run_on_draw(move |state, device| {
            state.stage.set_uniform(device, "keyColorR", UniformValue::Float(r));
            state.stage.set_uniform(device, "keyColorG", UniformValue::Float(g));
            state.stage.set_uniform(device, "keyColorB", UniformValue::Float(b));
        });
    }

    /// Chroma distance below which pixels reveal the background, clamped to `[0, 1]`.
    pub fn set_similarity(&self, similarity: f32) {
        self.queues
            .set_uniform("similarity", UniformValue::Float(unit(similarity)));
    }

    /// Width of the soft transition band above `similarity`, clamped to `[0, 1]`.
    pub fn set_smoothness(&self, smoothness: f32) {
        self.queues
            .set_uniform("smoothness", UniformValue::Float(unit(smoothness)));
    }

    pub fn set_background_image(&self, bitmap: Bitmap) {
        self.queues.run_on_draw(move |state, device| {
            state.hooks.set_background(&mut state.stage, device, &bitmap);
        });
    }
}

fn unit(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

/// Keys a camera frame against a chroma color and fills keyed pixels from a
/// center-cropped background.
pub struct MattingCompositor {
    pipeline: Pipeline<MattingStage>,
}

impl MattingCompositor {
    pub fn new(settings: MattingSettings) -> Self {
        let compositor = Self {
            pipeline: Pipeline::new(MattingStage::new()),
        };
        let handle = compositor.handle();
        let [r, g, b] = settings.key_color;
        handle.set_key_color(r, g, b);
        handle.set_similarity(settings.similarity);
        handle.set_smoothness(settings.smoothness);
        compositor
    }

    pub fn handle(&self) -> MattingHandle {
        MattingHandle {
            queues: self.pipeline.queues(),
        }
    }

    /// Crop applied to the current background, if one was computed.
    pub fn background_crop(&self) -> Option<CenterCrop> {
        self.pipeline.hooks().crop
    }

    pub fn background(&self) -> Option<TextureRef> {
        self.pipeline.hooks().background.get()
    }

    pub fn program(&self) -> Option<ProgramId> {
        self.pipeline.stage().program()
    }
}

impl Default for MattingCompositor {
    fn default() -> Self {
        Self::new(MattingSettings::default())
    }
}

impl Compositor for MattingCompositor {
    fn label(&self) -> &'static str {
        "matting"
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
    use crate::gpu::cpu::CpuDevice;

    #[test]
    fn key_parameters_are_clamped() {
        assert_eq!(unit(1.5), 1.0);
        assert_eq!(unit(-0.2), 0.0);
        assert_eq!(unit(f32::NAN), 0.0);
        assert_eq!(unit(0.3), 0.3);
    }

    #[test]
    fn background_crop_follows_output_size() {
        let mut dev = CpuDevice::new(OutputSize::new(4, 4));
        let mut matting = MattingCompositor::default();
        matting
            .handle()
            .set_background_image(Bitmap::solid(8, 4, [0, 0, 255, 255]).unwrap());
        matting.draw_frame(&mut dev, None).unwrap();

        let crop = matting.background_crop().unwrap();
        assert_eq!(crop.scale, [0.5, 1.0]);
        assert_eq!(crop.translate, [0.25, 0.0]);

        dev.resize_target(OutputSize::new(8, 4)).unwrap();
        matting.on_output_size_changed(&mut dev, OutputSize::new(8, 4));
        assert_eq!(matting.background_crop().unwrap().scale, [1.0, 1.0]);
    }

    #[test]
    fn degenerate_output_keeps_previous_crop() {
        let mut dev = CpuDevice::new(OutputSize::new(4, 4));
        let mut matting = MattingCompositor::default();
        matting
            .handle()
            .set_background_image(Bitmap::solid(8, 4, [0, 0, 255, 255]).unwrap());
        matting.draw_frame(&mut dev, None).unwrap();
        let before = matting.background_crop();

        matting.on_output_size_changed(&mut dev, OutputSize::new(0, 4));
        assert_eq!(matting.background_crop(), before);
    }

    #[test]
    fn key_color_is_one_deferred_command() {
        let matting = MattingCompositor::default();
        let handle = matting.handle();
        let before = handle.queues.pending();
        handle.set_key_color(1.0, 0.0, 0.0);
        assert_eq!(handle.queues.pending(), before + 1);
    }
}
