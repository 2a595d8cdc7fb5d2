use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{
    foundation::{
        core::{Bitmap, FrameRGBA, OutputSize},
        error::CompositorResult,
    },
    gpu::device::{BackendKind, DeviceSettings, GpuDevice, create_device},
    stage::{filter::Compositor, texture::TextureSlot},
};

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Counts frames and reports the rate once per second.
#[derive(Debug)]
pub struct FrameRateMeter {
    window_start: Option<Instant>,
    frames: u32,
    last_fps: Option<f32>,
}

impl FrameRateMeter {
    pub fn new() -> Self {
        Self {
            window_start: None,
            frames: 0,
            last_fps: None,
        }
    }

    /// Record one frame at `now`. Returns the fps when a one second window closes.
    pub fn record(&mut self, now: Instant) -> Option<f32> {
        let start = *self.window_start.get_or_insert(now);
        self.frames += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        tracing::trace!(fps, "frame rate");
        self.frames = 0;
        self.window_start = Some(now);
        self.last_fps = Some(fps);
        Some(fps)
    }

    pub fn last_fps(&self) -> Option<f32> {
        self.last_fps
    }
}

impl Default for FrameRateMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Stops a running [`RenderLoop::run`] from any thread.
#[derive(Clone, Debug)]
pub struct RenderLoopHandle {
    stop: Sender<()>,
}

impl RenderLoopHandle {
    pub fn stop(&self) {
        // Full means a stop is already pending.
        let _ = self.stop.try_send(());
    }
}

/// Owns the device and drives one compositor on the render thread.
pub struct RenderLoop {
    device: Box<dyn GpuDevice>,
    compositor: Box<dyn Compositor>,
    clear_rgba: Option<[u8; 4]>,
    input: TextureSlot,
    meter: FrameRateMeter,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
}

impl RenderLoop {
    pub fn new(
        mut device: Box<dyn GpuDevice>,
        mut compositor: Box<dyn Compositor>,
        clear_rgba: Option<[u8; 4]>,
    ) -> Self {
        compositor.initialize(device.as_mut());
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        Self {
            device,
            compositor,
            clear_rgba,
            input: TextureSlot::new(),
            meter: FrameRateMeter::new(),
            stop_tx,
            stop_rx,
        }
    }

    #[tracing::instrument(skip(settings, compositor), fields(width = settings.size.width, height = settings.size.height))]
    pub fn from_settings(
        kind: BackendKind,
        settings: &DeviceSettings,
        compositor: Box<dyn Compositor>,
    ) -> CompositorResult<Self> {
        let device = create_device(kind, settings)?;
        Ok(Self::new(device, compositor, settings.clear_rgba))
    }

    pub fn device(&self) -> &dyn GpuDevice {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn GpuDevice {
        self.device.as_mut()
    }

    pub fn compositor(&self) -> &dyn Compositor {
        self.compositor.as_ref()
    }

    pub fn frame_rate(&self) -> &FrameRateMeter {
        &self.meter
    }

    /// Swap the active compositor. The previous one is destroyed on this device.
    pub fn set_compositor(&mut self, mut compositor: Box<dyn Compositor>) {
        self.compositor.destroy(self.device.as_mut());
        compositor.initialize(self.device.as_mut());
        self.compositor = compositor;
    }

    pub fn resize(&mut self, size: OutputSize) -> CompositorResult<()> {
        tracing::debug!(width = size.width, height = size.height, "resize target");
        self.device.resize_target(size)?;
        self.compositor
            .on_output_size_changed(self.device.as_mut(), size);
        Ok(())
    }

    /// Draw one frame without reading it back. `input` replaces the upstream texture when given.
    pub fn draw(&mut self, input: Option<&Bitmap>) -> CompositorResult<()> {
        if let Some(bitmap) = input {
            self.input.upload(self.device.as_mut(), bitmap);
        }
        if let Some(rgba) = self.clear_rgba {
            self.device.clear(rgba);
        }
        self.compositor
            .draw_frame(self.device.as_mut(), self.input.id())?;
        self.meter.record(Instant::now());
        Ok(())
    }

    pub fn render_frame(&mut self, input: Option<&Bitmap>) -> CompositorResult<FrameRGBA> {
        self.draw(input)?;
        self.device.read_frame()
    }

    pub fn handle(&self) -> RenderLoopHandle {
        RenderLoopHandle {
            stop: self.stop_tx.clone(),
        }
    }

    /// Render frames every `interval` until stopped or `frames` have been produced.
    ///
    /// Returns the number of frames handed to `sink`.
    #[tracing::instrument(skip(self, sink), fields(compositor = self.compositor.label()))]
    pub fn run<F>(
        &mut self,
        interval: Duration,
        frames: Option<u64>,
        mut sink: F,
    ) -> CompositorResult<u64>
    where
        F: FnMut(u64, FrameRGBA) -> CompositorResult<()>,
    {
        // Stale stop requests from an earlier run do not apply.
        while self.stop_rx.try_recv().is_ok() {}

        let mut rendered = 0u64;
        loop {
            if frames.is_some_and(|limit| rendered >= limit) {
                break;
            }
            let deadline = Instant::now() + interval;
            let frame = self.render_frame(None)?;
            sink(rendered, frame)?;
            rendered += 1;

            match self.stop_rx.recv_deadline(deadline) {
                Ok(()) => {
                    tracing::debug!(rendered, "render loop stopped");
                    break;
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {}
            }
        }
        Ok(rendered)
    }

    /// Destroy the compositor and release the input texture.
    pub fn shutdown(mut self) {
        self.compositor.destroy(self.device.as_mut());
        self.input.release(self.device.as_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_reports_once_per_second() {
        let mut meter = FrameRateMeter::new();
        let t0 = Instant::now();
        assert_eq!(meter.record(t0), None);
        for i in 1..30 {
            assert_eq!(meter.record(t0 + Duration::from_millis(i * 30)), None);
        }
        let fps = meter.record(t0 + Duration::from_millis(1000)).unwrap();
        assert!((fps - 31.0).abs() < 0.01, "fps={fps}");
        assert_eq!(meter.last_fps(), Some(fps));
        assert_eq!(meter.record(t0 + Duration::from_millis(1010)), None);
    }

    #[test]
    fn handle_stop_does_not_block_when_already_pending() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = RenderLoopHandle { stop: tx };
        handle.stop();
        handle.stop();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
