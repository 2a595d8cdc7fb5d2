use std::{
    collections::HashMap,
    sync::Arc,
};

use crate::{
    foundation::{
        core::OutputSize,
        error::CompositorResult,
        math::{FULLSCREEN_QUAD, TEXCOORDS_NO_ROTATION},
    },
    gpu::device::{GpuDevice, Location, ProgramDesc, ProgramId, QuadAttrib, TextureId, UniformValue},
    stage::queue::CommandQueue,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProgramState {
    Uninitialized,
    Ready(ProgramId),
    /// Compilation failed; the stage draws nothing and is never retried.
    Inert,
}

/// One shader program plus its name to location cache.
pub struct FilterStage {
    desc: &'static ProgramDesc,
    state: ProgramState,
    locations: HashMap<&'static str, Location>,
}

impl FilterStage {
    pub fn new(desc: &'static ProgramDesc) -> Self {
        Self {
            desc,
            state: ProgramState::Uninitialized,
            locations: HashMap::new(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.desc.label
    }

    /// Compile the program if not done yet. Returns whether the stage can draw.
    pub fn initialize(&mut self, device: &mut dyn GpuDevice) -> bool {
        if self.state == ProgramState::Uninitialized {
            self.state = match device.compile_program(self.desc) {
                Ok(program) => {
                    tracing::debug!(stage = self.desc.label, ?program, "program ready");
                    ProgramState::Ready(program)
                }
                Err(err) => {
                    tracing::error!(
                        stage = self.desc.label,
                        error = %err,
                        "program failed to build; stage disabled"
                    );
                    ProgramState::Inert
                }
            };
        }
        self.is_ready()
    }

    pub fn program(&self) -> Option<ProgramId> {
        match self.state {
            ProgramState::Ready(program) => Some(program),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ProgramState::Ready(_))
    }

    pub fn is_inert(&self) -> bool {
        self.state == ProgramState::Inert
    }

    pub fn is_initialized(&self) -> bool {
        self.state != ProgramState::Uninitialized
    }

    pub fn cached_locations(&self) -> usize {
        self.locations.len()
    }

    /// Resolve `name`, attribute first then uniform, caching the result.
    pub fn location(&mut self, device: &dyn GpuDevice, name: &'static str) -> Option<Location> {
        let program = self.program()?;
        if let Some(location) = self.locations.get(name) {
            return Some(*location);
        }
        let location = device
            .attrib_location(program, name)
            .map(Location::Attribute)
            .or_else(|| device.uniform_location(program, name).map(Location::Uniform))?;
        self.locations.insert(name, location);
        Some(location)
    }

    /// Write a uniform now. Must run on the render thread; use
    /// [`StageQueues::set_uniform`] from anywhere else.
    pub fn set_uniform(&mut self, device: &mut dyn GpuDevice, name: &'static str, value: UniformValue) {
        let Some(program) = self.program() else {
            return;
        };
        match self.location(device, name) {
            Some(Location::Uniform(location)) => device.set_uniform(program, location, value),
            _ => self.unresolved(name),
        }
    }

    /// Make this stage's program current. False if the stage cannot draw.
    pub fn bind(&self, device: &mut dyn GpuDevice) -> bool {
        match self.program() {
            Some(program) => {
                device.use_program(program);
                true
            }
            None => false,
        }
    }

    /// Draw one quad with per-vertex data for the named attributes.
    pub fn draw_quad(
        &mut self,
        device: &mut dyn GpuDevice,
        attributes: &[(&'static str, [[f32; 2]; 4])],
    ) -> CompositorResult<()> {
        if !self.bind(device) {
            return Ok(());
        }
        let mut quad = Vec::with_capacity(attributes.len());
        for &(name, data) in attributes {
            match self.location(device, name) {
                Some(Location::Attribute(location)) => quad.push(QuadAttrib { location, data }),
                _ => self.unresolved(name),
            }
        }
        device.draw_quad(&quad)
    }

    /// Full-screen quad with the given texture coordinates.
    pub fn draw_fullscreen(
        &mut self,
        device: &mut dyn GpuDevice,
        texcoords: [[f32; 2]; 4],
    ) -> CompositorResult<()> {
        self.draw_quad(
            device,
            &[
                ("position", FULLSCREEN_QUAD),
                ("inputTextureCoordinate", texcoords),
            ],
        )
    }

    /// Delete the program and forget cached locations. Safe to call repeatedly.
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        if let ProgramState::Ready(program) = self.state {
            device.delete_program(program);
        }
        self.state = ProgramState::Uninitialized;
        self.locations.clear();
    }

    fn unresolved(&self, name: &str) {
        tracing::warn!(stage = self.desc.label, name, "name does not resolve in program");
        if cfg!(debug_assertions) {
            panic!("'{name}' does not resolve in program '{}'", self.desc.label);
        }
    }
}

/// Per-compositor behavior plugged into a [`Pipeline`].
pub trait StageHooks: Send + 'static {
    fn program(&self) -> &'static ProgramDesc;

    /// Runs once after the stage program compiled.
    fn on_initialized(&mut self, _stage: &mut FilterStage, _device: &mut dyn GpuDevice) {}

    fn on_output_size_changed(
        &mut self,
        _stage: &mut FilterStage,
        _device: &mut dyn GpuDevice,
        _size: OutputSize,
    ) {
    }

    fn before_draw(
        &mut self,
        _stage: &mut FilterStage,
        _device: &mut dyn GpuDevice,
        _input: Option<TextureId>,
    ) -> CompositorResult<()> {
        Ok(())
    }

    fn draw(
        &mut self,
        stage: &mut FilterStage,
        device: &mut dyn GpuDevice,
        _input: Option<TextureId>,
    ) -> CompositorResult<()> {
        stage.draw_fullscreen(device, TEXCOORDS_NO_ROTATION)
    }

    fn after_draw(
        &mut self,
        _stage: &mut FilterStage,
        _device: &mut dyn GpuDevice,
        _input: Option<TextureId>,
    ) -> CompositorResult<()> {
        Ok(())
    }

    /// Release every device resource the hooks own.
    fn on_destroy(&mut self, _device: &mut dyn GpuDevice) {}
}

/// Render-thread state deferred commands operate on.
pub struct StageState<H> {
    pub stage: FilterStage,
    pub hooks: H,
}

/// The two command queues of one pipeline, shared with its handles.
pub struct StageQueues<H> {
    before_draw: CommandQueue<StageState<H>>,
    after_draw: CommandQueue<StageState<H>>,
}

impl<H: StageHooks> StageQueues<H> {
    fn new() -> Self {
        Self {
            before_draw: CommandQueue::new(),
            after_draw: CommandQueue::new(),
        }
    }

    /// Run `command` at the start of the next frame, before any drawing.
    pub fn run_on_draw<F>(&self, command: F)
    where
        F: FnOnce(&mut StageState<H>, &mut dyn GpuDevice) + Send + 'static,
    {
        self.before_draw.push(command);
    }

    /// Run `command` once the next frame's draws were issued.
    pub fn run_after_draw<F>(&self, command: F)
    where
        F: FnOnce(&mut StageState<H>, &mut dyn GpuDevice) + Send + 'static,
    {
        self.after_draw.push(command);
    }

    pub fn set_uniform(&self, name: &'static str, value: UniformValue) {
        self.run_on_draw(move |state, device| state.stage.set_uniform(device, name, value));
    }

    pub fn pending(&self) -> usize {
        self.before_draw.len() + self.after_draw.len()
    }
}

/// A [`FilterStage`] driven by hooks `H`, with its deferred queues.
pub struct Pipeline<H: StageHooks> {
    state: StageState<H>,
    queues: Arc<StageQueues<H>>,
}

impl<H: StageHooks> Pipeline<H> {
    pub fn new(hooks: H) -> Self {
        Self {
            state: StageState {
                stage: FilterStage::new(hooks.program()),
                hooks,
            },
            queues: Arc::new(StageQueues::new()),
        }
    }

    pub fn queues(&self) -> Arc<StageQueues<H>> {
        Arc::clone(&self.queues)
    }

    pub fn hooks(&self) -> &H {
        &self.state.hooks
    }

    pub fn stage(&self) -> &FilterStage {
        &self.state.stage
    }

    #[tracing::instrument(skip_all, fields(stage = self.state.stage.label()))]
    pub fn initialize(&mut self, device: &mut dyn GpuDevice) {
        if self.state.stage.is_initialized() {
            return;
        }
        let StageState { stage, hooks } = &mut self.state;
        if stage.initialize(device) {
            hooks.on_initialized(stage, device);
            let size = device.target_size();
            hooks.on_output_size_changed(stage, device, size);
        }
    }

    pub fn on_output_size_changed(&mut self, device: &mut dyn GpuDevice, size: OutputSize) {
        tracing::debug!(stage = self.state.stage.label(), ?size, "output size changed");
        let StageState { stage, hooks } = &mut self.state;
        if stage.is_ready() {
            hooks.on_output_size_changed(stage, device, size);
        }
    }

    /// Drain deferred work, run the draw hooks, then drain after-draw work.
    pub fn draw_frame(
        &mut self,
        device: &mut dyn GpuDevice,
        input: Option<TextureId>,
    ) -> CompositorResult<()> {
        self.initialize(device);
        let drained = self.queues.before_draw.drain(&mut self.state, device);
        if drained > 0 {
            tracing::trace!(stage = self.state.stage.label(), drained, "deferred commands");
        }

        let StageState { stage, hooks } = &mut self.state;
        let result = if stage.bind(device) {
            hooks
                .before_draw(stage, device, input)
                .and_then(|()| hooks.draw(stage, device, input))
                .and_then(|()| hooks.after_draw(stage, device, input))
        } else {
            Ok(())
        };

        self.queues.after_draw.drain(&mut self.state, device);
        result
    }

    #[tracing::instrument(skip_all, fields(stage = self.state.stage.label()))]
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        self.queues.before_draw.clear();
        self.queues.after_draw.clear();
        self.state.hooks.on_destroy(device);
        self.state.stage.destroy(device);
    }
}

/// A compositor the render loop can drive.
pub trait Compositor: Send {
    fn label(&self) -> &'static str;

    fn initialize(&mut self, device: &mut dyn GpuDevice);

    fn on_output_size_changed(&mut self, device: &mut dyn GpuDevice, size: OutputSize);

    /// Draw one frame into the device target. `input` is the upstream frame texture,
    /// borrowed for the duration of the call.
    fn draw_frame(&mut self, device: &mut dyn GpuDevice, input: Option<TextureId>)
    -> CompositorResult<()>;

    fn destroy(&mut self, device: &mut dyn GpuDevice);
}

impl<H: StageHooks> Compositor for Pipeline<H> {
    fn label(&self) -> &'static str {
        self.state.stage.label()
    }

    fn initialize(&mut self, device: &mut dyn GpuDevice) {
        Pipeline::initialize(self, device);
    }

    fn on_output_size_changed(&mut self, device: &mut dyn GpuDevice, size: OutputSize) {
        Pipeline::on_output_size_changed(self, device, size);
    }

    fn draw_frame(
        &mut self,
        device: &mut dyn GpuDevice,
        input: Option<TextureId>,
    ) -> CompositorResult<()> {
        Pipeline::draw_frame(self, device, input)
    }

    fn destroy(&mut self, device: &mut dyn GpuDevice) {
        Pipeline::destroy(self, device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        foundation::core::OutputSize,
        gpu::{
            cpu::{CpuDevice, DeviceCall},
            shaders::PASSTHROUGH,
        },
    };

    #[derive(Default)]
    struct Probe {
        events: Vec<&'static str>,
    }

    impl StageHooks for Probe {
        fn program(&self) -> &'static ProgramDesc {
            &PASSTHROUGH
        }

        fn on_initialized(&mut self, stage: &mut FilterStage, device: &mut dyn GpuDevice) {
            stage.set_uniform(device, "inputImageTexture", UniformValue::Int(0));
            self.events.push("init");
        }

        fn before_draw(
            &mut self,
            _stage: &mut FilterStage,
            _device: &mut dyn GpuDevice,
            _input: Option<TextureId>,
        ) -> CompositorResult<()> {
            self.events.push("before");
            Ok(())
        }

        fn after_draw(
            &mut self,
            _stage: &mut FilterStage,
            _device: &mut dyn GpuDevice,
            _input: Option<TextureId>,
        ) -> CompositorResult<()> {
            self.events.push("after");
            Ok(())
        }
    }

    #[test]
    fn frame_runs_queues_and_hooks_in_order() {
        let mut dev = CpuDevice::new(OutputSize::new(2, 2));
        let mut pipeline = Pipeline::new(Probe::default());
        let queues = pipeline.queues();
        queues.run_on_draw(|s, _| s.hooks.events.push("queued"));
        queues.run_after_draw(|s, _| s.hooks.events.push("post"));

        pipeline.draw_frame(&mut dev, None).unwrap();
        assert_eq!(
            pipeline.hooks().events,
            vec!["init", "queued", "before", "after", "post"]
        );
        assert_eq!(queues.pending(), 0);
    }

    #[test]
    fn locations_are_cached_after_first_lookup() {
        let mut dev = CpuDevice::new(OutputSize::new(1, 1));
        let mut stage = FilterStage::new(&PASSTHROUGH);
        assert!(stage.initialize(&mut dev));
        assert_eq!(stage.location(&dev, "position"), Some(Location::Attribute(0)));
        assert_eq!(
            stage.location(&dev, "inputImageTexture"),
            Some(Location::Uniform(0))
        );
        assert_eq!(stage.cached_locations(), 2);
        assert_eq!(stage.location(&dev, "position"), Some(Location::Attribute(0)));
        assert_eq!(stage.cached_locations(), 2);
    }

    #[test]
    fn compile_failure_makes_stage_inert_without_retry() {
        let mut dev = CpuDevice::new(OutputSize::new(1, 1)).with_recording();
        dev.reject_program("passthrough");
        let mut pipeline = Pipeline::new(Probe::default());
        pipeline.draw_frame(&mut dev, None).unwrap();
        pipeline.draw_frame(&mut dev, None).unwrap();

        assert!(pipeline.stage().is_inert());
        let compiles = dev
            .calls()
            .iter()
            .filter(|c| matches!(c, DeviceCall::CompileProgram { .. }))
            .count();
        assert_eq!(compiles, 1);
        assert!(!dev.calls().iter().any(|c| matches!(c, DeviceCall::Draw { .. })));
        assert!(pipeline.hooks().events.is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "does not resolve")]
    fn unresolved_uniform_asserts_in_debug() {
        let mut dev = CpuDevice::new(OutputSize::new(1, 1));
        let mut stage = FilterStage::new(&PASSTHROUGH);
        stage.initialize(&mut dev);
        stage.set_uniform(&mut dev, "noSuchUniform", UniformValue::Float(1.0));
    }

    #[test]
    fn destroy_is_idempotent_and_clears_queues() {
        let mut dev = CpuDevice::new(OutputSize::new(1, 1));
        let mut pipeline = Pipeline::new(Probe::default());
        pipeline.initialize(&mut dev);
        let queues = pipeline.queues();
        queues.set_uniform("inputImageTexture", UniformValue::Int(1));

        pipeline.destroy(&mut dev);
        pipeline.destroy(&mut dev);
        assert_eq!(queues.pending(), 0);
        assert_eq!(dev.program_count(), 0);
        assert_eq!(pipeline.stage().cached_locations(), 0);
    }
}
