//! Ordered sprite overlay on top of the upstream frame.

use std::sync::{Arc, Weak};

use crate::{
    compositor::sprite::{SPRITE_TEXCOORDS, Sprite, SpriteId, SpriteRenderer, SpriteTransform},
    foundation::{
        core::OutputSize,
        error::CompositorResult,
        math::{Mat4, TEXCOORDS_NO_ROTATION},
    },
    gpu::{
        device::{BlendFunc, GpuDevice, ProgramDesc, ProgramId, TextureId, UniformValue},
        shaders::{PASSTHROUGH, SPRITE},
    },
    stage::filter::{Compositor, FilterStage, Pipeline, StageHooks, StageQueues},
};

const BASE_UNIT: i32 = 0;
const SPRITE_UNIT: i32 = 4;

pub struct StickerStage {
    sprites: FilterStage,
    renderers: Vec<SpriteRenderer>,
    output: OutputSize,
}

impl StickerStage {
    fn new() -> Self {
        Self {
            sprites: FilterStage::new(&SPRITE),
            renderers: Vec::new(),
            output: OutputSize::new(0, 0),
        }
    }

    /// Duplicate ids collapse as with [`Self::add`]: the last one wins.
    fn replace_all(&mut self, sprites: Vec<Sprite>, surface: OutputSize) -> Vec<SpriteRenderer> {
        let mut released = std::mem::take(&mut self.renderers);
        for sprite in sprites {
            released.extend(self.add(sprite, surface));
        }
        released
    }

    /// Append as front-most. A renderer already using the id is replaced.
    fn add(&mut self, sprite: Sprite, surface: OutputSize) -> Vec<SpriteRenderer> {
        let replaced = self.remove(sprite.id);
        self.renderers.push(SpriteRenderer::new(sprite, surface));
        replaced
    }

    fn remove(&mut self, id: SpriteId) -> Vec<SpriteRenderer> {
        let (removed, kept) = std::mem::take(&mut self.renderers)
            .into_iter()
            .partition(|r| r.id() == id);
        self.renderers = kept;
        removed
    }

    fn bring_to_front(&mut self, id: SpriteId) -> bool {
        let Some(pos) = self.renderers.iter().position(|r| r.id() == id) else {
            return false;
        };
        let renderer = self.renderers.remove(pos);
        self.renderers.push(renderer);
        true
    }

    fn update_transform(&mut self, id: SpriteId, transform: SpriteTransform) -> bool {
        let mut found = false;
        for r in self.renderers.iter_mut().filter(|r| r.id() == id) {
            r.set_transform(transform);
            found = true;
        }
        found
    }
}

impl StageHooks for StickerStage {
    fn program(&self) -> &'static ProgramDesc {
        &PASSTHROUGH
    }

    fn on_initialized(&mut self, stage: &mut FilterStage, device: &mut dyn GpuDevice) {
        stage.set_uniform(device, "inputImageTexture", UniformValue::Int(BASE_UNIT));
        if self.sprites.initialize(device) {
            self.sprites
                .set_uniform(device, "inputImageTexture", UniformValue::Int(SPRITE_UNIT));
            self.sprites
                .set_uniform(device, "transformMatrix", UniformValue::Mat4(Mat4::IDENTITY));
            self.sprites.set_uniform(
                device,
                "orthographicMatrix",
                UniformValue::Mat4(Mat4::ortho(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0)),
            );
        }
    }

    fn on_output_size_changed(
        &mut self,
        _stage: &mut FilterStage,
        device: &mut dyn GpuDevice,
        size: OutputSize,
    ) {
        if size.is_degenerate() {
            tracing::debug!(?size, "degenerate output; keeping sprite projection");
            return;
        }
        self.output = size;
        let aspect = size.height as f32 / size.width as f32;
        let ortho = Mat4::ortho(-1.0, 1.0, -aspect, aspect, -1.0, 1.0);
        self.sprites
            .set_uniform(device, "orthographicMatrix", UniformValue::Mat4(ortho));
    }

    fn before_draw(
        &mut self,
        _stage: &mut FilterStage,
        device: &mut dyn GpuDevice,
        input: Option<TextureId>,
    ) -> CompositorResult<()> {
        device.bind_texture(BASE_UNIT as u32, input);
        for renderer in &mut self.renderers {
            renderer.ensure_texture(device);
        }
        Ok(())
    }

    fn draw(
        &mut self,
        stage: &mut FilterStage,
        device: &mut dyn GpuDevice,
        _input: Option<TextureId>,
    ) -> CompositorResult<()> {
        stage.draw_fullscreen(device, TEXCOORDS_NO_ROTATION)?;
        if self.renderers.is_empty() || !self.sprites.is_ready() {
            return Ok(());
        }

        device.set_blend(Some(BlendFunc::OneOneMinusSrcAlpha));
        let mut result = Ok(());
        for renderer in &self.renderers {
            let (Some(texture), Some(vertices)) =
                (renderer.texture(), renderer.vertices(self.output))
            else {
                continue;
            };
            device.bind_texture(SPRITE_UNIT as u32, Some(texture));
            result = self.sprites.draw_quad(
                device,
                &[
                    ("position", vertices),
                    ("inputTextureCoordinate", SPRITE_TEXCOORDS),
                ],
            );
            if result.is_err() {
                break;
            }
        }
        device.set_blend(None);
        result
    }

    fn on_destroy(&mut self, device: &mut dyn GpuDevice) {
        for renderer in &mut self.renderers {
            renderer.release(device);
        }
        self.renderers.clear();
        self.sprites.destroy(device);
    }
}

/// Release renderers once the current frame no longer draws them.
fn release_after_draw(
    queues: &Weak<StageQueues<StickerStage>>,
    mut renderers: Vec<SpriteRenderer>,
    device: &mut dyn GpuDevice,
) {
    if renderers.is_empty() {
        return;
    }
    match queues.upgrade() {
        Some(queues) => queues.run_after_draw(move |_, device| {
            for renderer in &mut renderers {
                renderer.release(device);
            }
        }),
        None => {
            for renderer in &mut renderers {
                renderer.release(device);
            }
        }
    }
}

/// Thread-safe sprite mutations; each call only enqueues.
#[derive(Clone)]
pub struct StickerHandle {
    queues: Arc<StageQueues<StickerStage>>,
}

impl StickerHandle {
    /// Replace the whole sprite set with `sprites`, back-most first.
    pub fn bind(&self, sprites: Vec<Sprite>, surface: OutputSize) {
        let weak = Arc::downgrade(&self.queues);
        self.queues.run_on_draw(move |state, device| {
            let old = state.hooks.replace_all(sprites, surface);
            release_after_draw(&weak, old, device);
        });
    }

    pub fn add_sprite(&self, sprite: Sprite, surface_width: u32, surface_height: u32) {
        let weak = Arc::downgrade(&self.queues);
        let surface = OutputSize::new(surface_width, surface_height);
        self.queues.run_on_draw(move |state, device| {
            let replaced = state.hooks.add(sprite, surface);
            release_after_draw(&weak, replaced, device);
        });
    }

    /// Remove every sprite with `id`; nothing happens if there is none.
    pub fn remove_sprite(&self, id: SpriteId) {
        let weak = Arc::downgrade(&self.queues);
        self.queues.run_on_draw(move |state, device| {
            let removed = state.hooks.remove(id);
            release_after_draw(&weak, removed, device);
        });
    }

    pub fn bring_to_front(&self, id: SpriteId) {
        self.queues.run_on_draw(move |state, _| {
            state.hooks.bring_to_front(id);
        });
    }

    pub fn update_sprite_transform(&self, id: SpriteId, transform: SpriteTransform) {
        self.queues.run_on_draw(move |state, _| {
            if !state.hooks.update_transform(id, transform) {
                tracing::debug!(id = id.0, "transform update for unknown sprite");
            }
        });
    }
}

/// Draws the upstream frame, then every sprite in sequence order with
/// premultiplied alpha blending.
pub struct StickerCompositor {
    pipeline: Pipeline<StickerStage>,
}

impl Default for StickerCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl StickerCompositor {
    pub fn new() -> Self {
        Self {
            pipeline: Pipeline::new(StickerStage::new()),
        }
    }

    pub fn handle(&self) -> StickerHandle {
        StickerHandle {
            queues: self.pipeline.queues(),
        }
    }

    /// Sprite ids in render order, back-most first.
    pub fn sprite_order(&self) -> Vec<SpriteId> {
        self.pipeline.hooks().renderers.iter().map(|r| r.id()).collect()
    }

    pub fn sprite_program(&self) -> Option<ProgramId> {
        self.pipeline.hooks().sprites.program()
    }

    pub fn sprite_texture(&self, id: SpriteId) -> Option<TextureId> {
        self.pipeline
            .hooks()
            .renderers
            .iter()
            .find(|r| r.id() == id)
            .and_then(|r| r.texture())
    }
}

impl Compositor for StickerCompositor {
    fn label(&self) -> &'static str {
        "sticker"
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
