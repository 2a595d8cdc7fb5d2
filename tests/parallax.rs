use std::sync::Arc;

use mattecomp::{
    Bitmap, Compositor, CpuDevice, GpuDevice, LayerSlot, ManualClock, OutputSize,
    ParallaxCompositor, compositor::animator::AnimatorPhase, gpu::device::UniformValue,
};

const BLUE: [u8; 4] = [0, 0, 255, 255];
const RED: [u8; 4] = [255, 0, 0, 255];

fn setup() -> (CpuDevice, Arc<ManualClock>, ParallaxCompositor) {
    let dev = CpuDevice::new(OutputSize::new(2, 2));
    let clock = Arc::new(ManualClock::new(1_000));
    let parallax = ParallaxCompositor::new(clock.clone());
    (dev, clock, parallax)
}

fn split_background() -> Bitmap {
    let mut data = Vec::new();
    for _ in 0..2 {
        data.extend_from_slice(&RED);
        data.extend_from_slice(&BLUE);
    }
    Bitmap::from_rgba8_premul(2, 2, data).unwrap()
}

fn set_layers(parallax: &ParallaxCompositor, front: [u8; 4]) {
    let handle = parallax.handle();
    handle.set_layer(LayerSlot::Background, split_background());
    handle.set_layer(LayerSlot::Depth, Bitmap::solid(2, 2, [0, 0, 0, 255]).unwrap());
    handle.set_layer(LayerSlot::Foreground, Bitmap::solid(2, 2, front).unwrap());
}

#[test]
fn offset_eases_out_over_the_animation_window() {
    let (mut dev, clock, mut parallax) = setup();
    parallax.handle().set_target_offset(1.0, 0.0);

    clock.advance(50);
    parallax.draw_frame(&mut dev, None).unwrap();
    let [x, y] = parallax.factor();
    assert!((x - 0.75).abs() < 1e-6, "x={x}");
    assert_eq!(y, 0.0);
    assert!(parallax.animator().is_active());

    let program = parallax.program().unwrap();
    assert_eq!(
        dev.uniform(program, "u_factor"),
        Some(UniformValue::Vec2([x, 0.0]))
    );
}

#[test]
fn offset_converges_and_goes_idle() {
    let (mut dev, clock, mut parallax) = setup();
    parallax.handle().set_target_offset(0.4, -0.2);

    clock.advance(100);
    parallax.draw_frame(&mut dev, None).unwrap();
    assert_eq!(parallax.factor(), [0.4, -0.2]);
    assert_eq!(parallax.animator().phase(), AnimatorPhase::Idle);

    clock.advance(500);
    parallax.draw_frame(&mut dev, None).unwrap();
    assert_eq!(parallax.factor(), [0.4, -0.2]);
}

#[test]
fn late_first_frame_jumps_to_destination() {
    let (mut dev, clock, mut parallax) = setup();
    parallax.handle().set_target_offset(1.0, 1.0);
    clock.advance(250);
    parallax.draw_frame(&mut dev, None).unwrap();
    assert_eq!(parallax.factor(), [1.0, 1.0]);
    assert!(!parallax.animator().is_active());
}

#[test]
fn opaque_foreground_covers_background() {
    let (mut dev, _clock, mut parallax) = setup();
    set_layers(&parallax, RED);
    parallax.draw_frame(&mut dev, None).unwrap();
    let frame = dev.read_frame().unwrap();
    assert_eq!(frame.pixel(0, 0), RED);
    assert_eq!(frame.pixel(1, 1), RED);
}

#[test]
fn far_layer_shifts_with_the_offset() {
    let (mut dev, clock, mut parallax) = setup();
    set_layers(&parallax, [0, 0, 0, 0]);
    parallax.draw_frame(&mut dev, None).unwrap();
    let frame = dev.read_frame().unwrap();
    assert_eq!(frame.pixel(0, 0), RED);
    assert_eq!(frame.pixel(1, 0), BLUE);

    parallax.handle().set_target_offset(15.0, 0.0);
    clock.advance(100);
    parallax.draw_frame(&mut dev, None).unwrap();
    let frame = dev.read_frame().unwrap();
    assert_eq!(frame.pixel(0, 0), BLUE);
    assert_eq!(frame.pixel(1, 0), BLUE);
}

#[test]
fn layers_are_bound_to_their_units() {
    let mut dev = CpuDevice::new(OutputSize::new(2, 2)).with_recording();
    let mut parallax = ParallaxCompositor::new(Arc::new(ManualClock::new(0)));
    set_layers(&parallax, RED);
    parallax.draw_frame(&mut dev, None).unwrap();

    let ids: Vec<_> = LayerSlot::ALL
        .iter()
        .map(|&slot| parallax.layer(slot).map(|t| t.id))
        .collect();
    let drawn = dev.calls().iter().find_map(|c| match c {
        mattecomp::gpu::cpu::DeviceCall::Draw { textures, .. } => Some(textures.clone()),
        _ => None,
    });
    assert_eq!(drawn, Some(ids));
}

#[test]
fn layer_layout_is_recomputed_on_resize() {
    let mut dev = CpuDevice::new(OutputSize::new(4, 4));
    let mut parallax = ParallaxCompositor::new(Arc::new(ManualClock::new(0)));
    parallax
        .handle()
        .set_layer(LayerSlot::Background, Bitmap::solid(8, 4, BLUE).unwrap());
    parallax.draw_frame(&mut dev, None).unwrap();
    assert_eq!(
        parallax.texcoords(),
        [[0.25, 1.0], [0.75, 1.0], [0.25, 0.0], [0.75, 0.0]]
    );

    let wide = OutputSize::new(8, 4);
    dev.resize_target(wide).unwrap();
    parallax.on_output_size_changed(&mut dev, wide);
    assert_eq!(
        parallax.texcoords(),
        [[0.0, 1.0], [1.0, 1.0], [0.0, 0.0], [1.0, 0.0]]
    );
    let program = parallax.program().unwrap();
    assert_eq!(
        dev.uniform(program, "u_resolution"),
        Some(UniformValue::Vec2([8.0, 4.0]))
    );
}
