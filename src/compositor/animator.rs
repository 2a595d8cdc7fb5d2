use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

/// Length of one offset transition.
pub const PARALLAX_ANIMATION_MS: u64 = 100;

/// Millisecond time source for offset animation.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Monotonic wall clock measured from construction.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock; clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnimatorPhase {
    Idle,
    Animating,
}

/// Eases the parallax factor toward the latest target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParallaxAnimator {
    current: [f32; 2],
    start: [f32; 2],
    destination: [f32; 2],
    started_at_ms: u64,
    phase: AnimatorPhase,
}

impl Default for ParallaxAnimator {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallaxAnimator {
    pub fn new() -> Self {
        Self {
            current: [0.0; 2],
            start: [0.0; 2],
            destination: [0.0; 2],
            started_at_ms: 0,
            phase: AnimatorPhase::Idle,
        }
    }

    pub fn current(&self) -> [f32; 2] {
        self.current
    }

    pub fn destination(&self) -> [f32; 2] {
        self.destination
    }

    pub fn phase(&self) -> AnimatorPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == AnimatorPhase::Animating
    }

    /// Start a transition from the value currently shown.
    pub fn set_target(&mut self, x: f32, y: f32, now_ms: u64) {
        self.start = self.current;
        self.destination = [x, y];
        self.started_at_ms = now_ms;
        self.phase = AnimatorPhase::Animating;
    }

    pub fn tick(&mut self, now_ms: u64) -> [f32; 2] {
        if self.phase == AnimatorPhase::Idle {
            return self.current;
        }
        let elapsed = now_ms.saturating_sub(self.started_at_ms);
        let t = (elapsed as f32 / PARALLAX_ANIMATION_MS as f32).clamp(0.0, 1.0);
        if t >= 1.0 {
            self.current = self.destination;
            self.phase = AnimatorPhase::Idle;
        } else {
            let progress = 1.0 - (1.0 - t) * (1.0 - t);
            self.current = [
                self.start[0] + (self.destination[0] - self.start[0]) * progress,
                self.start[1] + (self.destination[1] - self.start[1]) * progress,
            ];
        }
        self.current
    }
}
