use mattecomp::{
    Bitmap, Compositor, CpuDevice, GpuDevice, Mat4, OutputSize, Point, Sprite, SpriteId,
    SpriteTransform, StickerCompositor,
    gpu::{cpu::DeviceCall, device::UniformValue},
};

const BLUE: [u8; 4] = [0, 0, 255, 255];
const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];

const A: SpriteId = SpriteId(1);
const B: SpriteId = SpriteId(2);

fn sprite(id: SpriteId, rgba: [u8; 4]) -> Sprite {
    Sprite::new(
        id,
        Bitmap::solid(2, 2, rgba).unwrap(),
        SpriteTransform::at(Point::new(5.0, 5.0)),
    )
}

struct Scene {
    dev: CpuDevice,
    stickers: StickerCompositor,
    base: mattecomp::gpu::device::TextureId,
}

impl Scene {
    fn new() -> Self {
        let mut dev = CpuDevice::new(OutputSize::new(10, 10)).with_recording();
        let base = dev
            .upload_texture(&Bitmap::solid(10, 10, BLUE).unwrap())
            .unwrap();
        Self {
            dev,
            stickers: StickerCompositor::new(),
            base,
        }
    }

    fn frame(&mut self) -> mattecomp::FrameRGBA {
        self.stickers.draw_frame(&mut self.dev, Some(self.base)).unwrap();
        self.dev.read_frame().unwrap()
    }
}

#[test]
fn sprites_are_drawn_over_the_base_frame() {
    let mut scene = Scene::new();
    scene.stickers.handle().add_sprite(sprite(A, RED), 10, 10);
    let frame = scene.frame();

    for (x, y) in [(4, 4), (5, 4), (4, 5), (5, 5)] {
        assert_eq!(frame.pixel(x, y), RED, "pixel ({x},{y})");
    }
    for (x, y) in [(0, 0), (3, 3), (6, 6), (9, 9)] {
        assert_eq!(frame.pixel(x, y), BLUE, "pixel ({x},{y})");
    }
}

#[test]
fn bring_to_front_reorders_the_sequence() {
    let mut scene = Scene::new();
    let handle = scene.stickers.handle();
    handle.add_sprite(sprite(A, RED), 10, 10);
    handle.add_sprite(sprite(B, GREEN), 10, 10);
    assert_eq!(scene.frame().pixel(5, 5), GREEN);
    assert_eq!(scene.stickers.sprite_order(), vec![A, B]);

    handle.bring_to_front(A);
    let frame = scene.frame();
    assert_eq!(scene.stickers.sprite_order(), vec![B, A]);
    assert_eq!(frame.pixel(5, 5), RED);
}

#[test]
fn removing_twice_matches_removing_once() {
    let mut scene = Scene::new();
    let handle = scene.stickers.handle();
    handle.add_sprite(sprite(A, RED), 10, 10);
    handle.add_sprite(sprite(B, GREEN), 10, 10);
    handle.remove_sprite(A);
    handle.remove_sprite(A);
    let frame = scene.frame();

    assert_eq!(scene.stickers.sprite_order(), vec![B]);
    assert_eq!(frame.pixel(5, 5), GREEN);

    handle.remove_sprite(SpriteId(42));
    scene.frame();
    assert_eq!(scene.stickers.sprite_order(), vec![B]);
}

#[test]
fn removed_sprite_texture_is_released_after_the_frame() {
    let mut scene = Scene::new();
    let handle = scene.stickers.handle();
    handle.add_sprite(sprite(A, RED), 10, 10);
    scene.frame();
    let texture = scene.stickers.sprite_texture(A).unwrap();
    assert!(scene.dev.texture(texture).is_some());

    scene.dev.take_calls();
    handle.remove_sprite(A);
    let frame = scene.frame();

    assert!(scene.dev.texture(texture).is_none());
    assert_eq!(frame.pixel(5, 5), BLUE);
    let calls = scene.dev.calls();
    let deleted_at = calls
        .iter()
        .position(|c| *c == DeviceCall::DeleteTexture(texture))
        .unwrap();
    let last_draw = calls
        .iter()
        .rposition(|c| matches!(c, DeviceCall::Draw { .. }))
        .unwrap();
    assert!(deleted_at > last_draw);
}

#[test]
fn translucent_sprites_blend_premultiplied() {
    let mut scene = Scene::new();
    scene
        .stickers
        .handle()
        .add_sprite(sprite(A, [255, 0, 0, 128]), 10, 10);
    let frame = scene.frame();
    assert_eq!(frame.pixel(5, 5), [128, 0, 127, 255]);
}

#[test]
fn transform_updates_move_and_scale_the_sprite() {
    let mut scene = Scene::new();
    let handle = scene.stickers.handle();
    handle.add_sprite(sprite(A, RED), 10, 10);
    handle.update_sprite_transform(
        A,
        SpriteTransform {
            center: Point::new(5.0, 5.0),
            rotation_deg: 0.0,
            scale: 2.0,
        },
    );
    let frame = scene.frame();
    assert_eq!(frame.pixel(3, 3), RED);
    assert_eq!(frame.pixel(6, 6), RED);
    assert_eq!(frame.pixel(2, 2), BLUE);

    handle.update_sprite_transform(A, SpriteTransform::at(Point::new(1.0, 1.0)));
    let frame = scene.frame();
    assert_eq!(frame.pixel(0, 0), RED);
    assert_eq!(frame.pixel(5, 5), BLUE);
}

#[test]
fn bind_replaces_the_sprite_set() {
    let mut scene = Scene::new();
    let handle = scene.stickers.handle();
    handle.add_sprite(sprite(A, RED), 10, 10);
    scene.frame();
    let old = scene.stickers.sprite_texture(A).unwrap();

    handle.bind(
        vec![sprite(B, GREEN), sprite(SpriteId(3), RED)],
        OutputSize::new(10, 10),
    );
    scene.frame();
    assert_eq!(scene.stickers.sprite_order(), vec![B, SpriteId(3)]);
    assert!(scene.dev.texture(old).is_none());
}

#[test]
fn destroy_releases_sprite_textures_and_programs() {
    let mut scene = Scene::new();
    let handle = scene.stickers.handle();
    handle.add_sprite(sprite(A, RED), 10, 10);
    handle.add_sprite(sprite(B, GREEN), 10, 10);
    scene.frame();
    // base + two sprites
    assert_eq!(scene.dev.texture_count(), 3);

    scene.stickers.destroy(&mut scene.dev);
    assert_eq!(scene.dev.texture_count(), 1);
    assert_eq!(scene.dev.program_count(), 0);
}

#[test]
fn projection_follows_output_aspect() {
    let mut scene = Scene::new();
    scene.frame();
    let program = scene.stickers.sprite_program().unwrap();
    assert_eq!(
        scene.dev.uniform(program, "orthographicMatrix"),
        Some(UniformValue::Mat4(Mat4::ortho(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0)))
    );

    let tall = OutputSize::new(10, 20);
    scene.dev.resize_target(tall).unwrap();
    scene.stickers.on_output_size_changed(&mut scene.dev, tall);
    assert_eq!(
        scene.dev.uniform(program, "orthographicMatrix"),
        Some(UniformValue::Mat4(Mat4::ortho(-1.0, 1.0, -2.0, 2.0, -1.0, 1.0)))
    );
}
