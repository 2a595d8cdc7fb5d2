use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::gpu::device::GpuDevice;

/// Deferred unit of render-thread work over state `S`.
pub type Command<S> = Box<dyn FnOnce(&mut S, &mut dyn GpuDevice) + Send>;

/// FIFO of deferred commands.
///
/// Any thread may push; only the render thread drains. The lock is held just long
/// enough to push or pop one command, so a command may enqueue follow-ups and they
/// run in the same drain.
pub struct CommandQueue<S> {
    inner: Mutex<VecDeque<Command<S>>>,
}

impl<S> Default for CommandQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> CommandQueue<S> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push<F>(&self, command: F)
    where
        F: FnOnce(&mut S, &mut dyn GpuDevice) + Send + 'static,
    {
        self.inner.lock().push_back(Box::new(command));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drop every pending command without running it.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Run pending commands in enqueue order. Returns how many ran.
    pub fn drain(&self, state: &mut S, device: &mut dyn GpuDevice) -> usize {
        let mut ran = 0;
        loop {
            let next = self.inner.lock().pop_front();
            let Some(command) = next else {
                break;
            };
            command(state, &mut *device);
            ran += 1;
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{foundation::core::OutputSize, gpu::cpu::CpuDevice};

    #[test]
    fn drains_in_fifo_order() {
        let queue = CommandQueue::<Vec<u32>>::new();
        for i in 0..4 {
            queue.push(move |log, _| log.push(i));
        }
        let mut log = Vec::new();
        let mut dev = CpuDevice::new(OutputSize::new(1, 1));
        assert_eq!(queue.drain(&mut log, &mut dev), 4);
        assert_eq!(log, vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn commands_enqueued_during_drain_run_in_same_drain() {
        let queue = Arc::new(CommandQueue::<Vec<&'static str>>::new());
        let inner = Arc::clone(&queue);
        queue.push(move |log, _| {
            log.push("outer");
            inner.push(|log, _| log.push("follow-up"));
        });
        queue.push(|log, _| log.push("second"));

        let mut log = Vec::new();
        let mut dev = CpuDevice::new(OutputSize::new(1, 1));
        assert_eq!(queue.drain(&mut log, &mut dev), 3);
        assert_eq!(log, vec!["outer", "second", "follow-up"]);
    }

    #[test]
    fn pushes_from_many_threads_all_run_once() {
        let queue = Arc::new(CommandQueue::<u32>::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let q = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        q.push(|n, _| *n += 1);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let mut n = 0;
        let mut dev = CpuDevice::new(OutputSize::new(1, 1));
        queue.drain(&mut n, &mut dev);
        assert_eq!(n, 800);
        assert_eq!(queue.drain(&mut n, &mut dev), 0);
    }

    #[test]
    fn clear_discards_pending_commands() {
        let queue = CommandQueue::<u32>::new();
        queue.push(|n, _| *n += 1);
        queue.clear();
        let mut n = 0;
        let mut dev = CpuDevice::new(OutputSize::new(1, 1));
        assert_eq!(queue.drain(&mut n, &mut dev), 0);
        assert_eq!(n, 0);
    }
}
