use kurbo::{Affine, Point};

use crate::{
    foundation::core::{Bitmap, OutputSize},
    gpu::device::{GpuDevice, TextureId},
    stage::texture::TextureSlot,
};

/// Stable sprite identity, unique within one sticker sequence.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct SpriteId(pub u64);

/// Placement of a sprite in overlay-surface pixels, as produced by the gesture layer.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SpriteTransform {
    pub center: Point,
    #[serde(default)]
    pub rotation_deg: f64,
    #[serde(default = "unit_scale")]
    pub scale: f64,
}

fn unit_scale() -> f64 {
    1.0
}

impl SpriteTransform {
    pub fn at(center: Point) -> Self {
        Self {
            center,
            rotation_deg: 0.0,
            scale: 1.0,
        }
    }

    /// Maps local bitmap pixels (origin top-left) into surface pixels, rotating
    /// and scaling about the bitmap center.
    pub fn affine(&self, width: f64, height: f64) -> Affine {
        Affine::translate(self.center.to_vec2())
            * Affine::rotate(self.rotation_deg.to_radians())
            * Affine::scale(self.scale)
            * Affine::translate((-width / 2.0, -height / 2.0))
    }
}

#[derive(Clone, Debug)]
pub struct Sprite {
    pub id: SpriteId,
    pub bitmap: Bitmap,
    pub transform: SpriteTransform,
}

impl Sprite {
    pub fn new(id: SpriteId, bitmap: Bitmap, transform: SpriteTransform) -> Self {
        Self {
            id,
            bitmap,
            transform,
        }
    }

    /// Corners in surface pixels: right-bottom, left-bottom, right-top, left-top.
    pub fn corners(&self) -> [Point; 4] {
        let (w, h) = (f64::from(self.bitmap.width), f64::from(self.bitmap.height));
        let affine = self.transform.affine(w, h);
        [
            Point::new(w, h),
            Point::new(0.0, h),
            Point::new(w, 0.0),
            Point::new(0.0, 0.0),
        ]
        .map(|p| affine * p)
    }
}

/// Texture coordinates matching [`Sprite::corners`] order.
pub const SPRITE_TEXCOORDS: [[f32; 2]; 4] = [[1.0, 1.0], [0.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

/// Squeeze a surface point along one axis to account for the input and output
/// aspect ratios differing.
pub fn correct_aspect(p: Point, input: OutputSize, output: OutputSize) -> Option<Point> {
    let input_ratio = f64::from(input.aspect()?);
    let output_ratio = f64::from(output.aspect()?);
    Some(if input_ratio > output_ratio {
        Point::new(p.x * output_ratio / input_ratio, p.y)
    } else {
        Point::new(p.x, p.y * input_ratio / output_ratio)
    })
}

/// Surface pixels to clip space with y pointing up.
pub fn to_clip(p: Point, view: OutputSize) -> [f32; 2] {
    let (w, h) = (f64::from(view.width), f64::from(view.height));
    [
        ((p.x / w) * 2.0 - 1.0) as f32,
        (1.0 - (p.y / h) * 2.0) as f32,
    ]
}

/// Render-thread counterpart of one [`Sprite`], owning its texture.
#[derive(Debug)]
pub struct SpriteRenderer {
    sprite: Sprite,
    surface: OutputSize,
    texture: TextureSlot,
}

impl SpriteRenderer {
    pub fn new(sprite: Sprite, surface: OutputSize) -> Self {
        if !sprite.bitmap.is_valid() {
            tracing::warn!(id = sprite.id.0, "sprite bitmap is invalid; it will not be drawn");
        }
        Self {
            sprite,
            surface,
            texture: TextureSlot::new(),
        }
    }

    pub fn id(&self) -> SpriteId {
        self.sprite.id
    }

    pub fn sprite(&self) -> &Sprite {
        &self.sprite
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture.id()
    }

    pub fn set_transform(&mut self, transform: SpriteTransform) {
        self.sprite.transform = transform;
    }

    /// Upload the bitmap on first use.
    pub fn ensure_texture(&mut self, device: &mut dyn GpuDevice) {
        if self.texture.id().is_none() && self.sprite.bitmap.is_valid() {
            self.texture.upload(device, &self.sprite.bitmap);
        }
    }

    /// Clip-space quad for the current transform, or `None` for degenerate sizes.
    pub fn vertices(&self, output: OutputSize) -> Option<[[f32; 2]; 4]> {
        if self.surface.is_degenerate() || output.is_degenerate() {
            return None;
        }
        let mut out = [[0.0; 2]; 4];
        for (slot, corner) in out.iter_mut().zip(self.sprite.corners()) {
            *slot = to_clip(correct_aspect(corner, self.surface, output)?, self.surface);
        }
        Some(out)
    }

    pub fn release(&mut self, device: &mut dyn GpuDevice) {
        self.texture.release(device);
    }
}
