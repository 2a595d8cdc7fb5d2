use std::{thread, time::Duration};

use mattecomp::{
    Bitmap, BackendKind, CompositorResult, CpuDevice, DeviceSettings, MattingCompositor,
    OutputSize, RenderLoop, StickerCompositor,
};

#[test]
fn render_frame_passes_input_through_the_compositor() {
    let mut render = RenderLoop::new(
        Box::new(CpuDevice::new(OutputSize::new(4, 4))),
        Box::new(StickerCompositor::new()),
        Some([0, 0, 0, 255]),
    );
    let input = Bitmap::solid(4, 4, [10, 20, 30, 255]).unwrap();
    let frame = render.render_frame(Some(&input)).unwrap();
    assert_eq!((frame.width, frame.height), (4, 4));
    assert!(frame.premultiplied);
    assert_eq!(frame.pixel(3, 3), [10, 20, 30, 255]);
    assert_eq!(render.compositor().label(), "sticker");

    // The input stays bound until replaced.
    let frame = render.render_frame(None).unwrap();
    assert_eq!(frame.pixel(0, 0), [10, 20, 30, 255]);
}

#[test]
fn resize_changes_the_target_and_notifies_the_compositor() {
    let settings = DeviceSettings {
        size: OutputSize::new(4, 4),
        clear_rgba: Some([0, 0, 0, 255]),
    };
    let mut render = RenderLoop::from_settings(
        BackendKind::Cpu,
        &settings,
        Box::new(MattingCompositor::default()),
    )
    .unwrap();
    render.resize(OutputSize::new(6, 2)).unwrap();
    let frame = render.render_frame(None).unwrap();
    assert_eq!((frame.width, frame.height), (6, 2));
    assert!(render.resize(OutputSize::new(0, 2)).is_err());
}

#[test]
fn run_stops_after_the_requested_frames() {
    let mut render = RenderLoop::new(
        Box::new(CpuDevice::new(OutputSize::new(2, 2))),
        Box::new(StickerCompositor::new()),
        Some([1, 2, 3, 255]),
    );
    let mut seen = Vec::new();
    let rendered = render
        .run(Duration::from_millis(1), Some(3), |index, frame| {
            seen.push((index, frame.pixel(0, 0)));
            Ok(())
        })
        .unwrap();
    assert_eq!(rendered, 3);
    assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[test]
fn stop_handle_ends_an_unbounded_run() {
    let mut render = RenderLoop::new(
        Box::new(CpuDevice::new(OutputSize::new(2, 2))),
        Box::new(StickerCompositor::new()),
        None,
    );
    let handle = render.handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        handle.stop();
    });
    let rendered = render
        .run(Duration::from_millis(2), None, |_, _| Ok(()))
        .unwrap();
    stopper.join().unwrap();
    assert!(rendered >= 1);
}

#[test]
fn sink_errors_abort_the_run() {
    let mut render = RenderLoop::new(
        Box::new(CpuDevice::new(OutputSize::new(2, 2))),
        Box::new(StickerCompositor::new()),
        None,
    );
    let result: CompositorResult<u64> = render.run(Duration::from_millis(1), None, |index, _| {
        if index == 1 {
            Err(mattecomp::CompositorError::validation("sink full"))
        } else {
            Ok(())
        }
    });
    assert!(result.unwrap_err().to_string().contains("sink full"));
}

#[test]
fn swapping_compositors_destroys_the_old_one() {
    let mut render = RenderLoop::new(
        Box::new(CpuDevice::new(OutputSize::new(2, 2)).with_recording()),
        Box::new(MattingCompositor::default()),
        None,
    );
    render.render_frame(None).unwrap();
    render.set_compositor(Box::new(StickerCompositor::new()));
    assert_eq!(render.compositor().label(), "sticker");
    render.render_frame(None).unwrap();
    render.shutdown();
}
