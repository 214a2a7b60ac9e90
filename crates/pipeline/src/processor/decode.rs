use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use corelib::{GpuContext, PhaseKind, PipelineError, PipelineResult};
use parking_lot::{Condvar, Mutex};

use super::{Processor, panic_message};
use crate::phase::{DecodeStep, Phase};
use crate::queue::Queue;

/// Runs decode phases one at a time on a single dedicated thread.
/// The thread sleeps on a condition variable while the queue is empty.
pub struct DecodeProcessor {
    shared: Arc<Shared>,
    worker_name: String,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Pushes and the final drain both happen under this lock, so a step is
/// either queued before the drain or sees `disposed` and runs inline.
#[derive(Default)]
struct State {
    running: bool,
    disposed: bool,
}

struct Shared {
    queue: Queue<Box<dyn DecodeStep>>,
    state: Mutex<State>,
    wake: Condvar,
}

impl Shared {
    /// Next step to run, or `None` once stopped and drained.
    fn next(&self) -> Option<Box<dyn DecodeStep>> {
        let mut state = self.state.lock();
        loop {
            if let Some(step) = self.queue.pop() {
                return Some(step);
            }
            if !state.running {
                return None;
            }
            self.wake.wait(&mut state);
        }
    }
}

impl DecodeProcessor {
    pub const NAME: &'static str = "decode";

    pub fn new(worker_name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Queue::new(),
                state: Mutex::new(State::default()),
                wake: Condvar::new(),
            }),
            worker_name: worker_name.into(),
            worker: Mutex::new(None),
        }
    }

    fn worker_loop(shared: Arc<Shared>) {
        log::debug!("Resource worker started");
        while let Some(step) = shared.next() {
            run_step(step);
        }
        log::debug!("Resource worker drained and exiting");
    }

    fn stop_worker(&self) -> Option<JoinHandle<()>> {
        let handle = self.worker.lock().take();
        self.shared.state.lock().running = false;
        self.shared.wake.notify_all();
        handle
    }
}

fn run_step(step: Box<dyn DecodeStep>) {
    let label = step.label().to_owned();
    log::trace!("Decoding '{}'", label);
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || step.run_decode())) {
        log::error!("Decode step '{}' panicked: {}", label, panic_message(&*payload));
    }
}

impl Processor for DecodeProcessor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn accepts(&self, kind: PhaseKind) -> bool {
        kind == PhaseKind::Decode
    }

    fn init(&self) -> PipelineResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        *self.shared.state.lock() = State {
            running: true,
            disposed: false,
        };
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name(self.worker_name.clone())
            .spawn(move || Self::worker_loop(shared))
            .map_err(|source| PipelineError::WorkerSpawn {
                name: self.worker_name.clone(),
                source,
            })?;
        *worker = Some(handle);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.worker.lock().is_some()
    }

    fn enqueue(&self, phase: Phase) {
        let step = match phase {
            Phase::Decode(step) => step,
            other => {
                log::error!("Decode processor was handed {} phase '{}'", other.kind(), other.label());
                return;
            }
        };

        let state = self.shared.state.lock();
        if state.disposed {
            drop(state);
            log::warn!("Decode processor disposed; decoding '{}' inline", step.label());
            run_step(step);
            return;
        }
        // Holding the lock orders this notify after any in-progress empty
        // check on the worker side.
        if self.shared.queue.push(step) {
            self.shared.wake.notify_one();
        }
    }

    fn update(&self, _gpu: &mut dyn GpuContext) {}

    fn dispose(&self, _gpu: &mut dyn GpuContext) {
        if let Some(handle) = self.stop_worker() {
            if handle.join().is_err() {
                log::error!("Resource worker '{}' panicked", self.worker_name);
            }
        }

        // Anything queued while no worker existed, or after it stopped.
        let leftovers: Vec<_> = {
            let mut state = self.shared.state.lock();
            state.disposed = true;
            std::iter::from_fn(|| self.shared.queue.pop()).collect()
        };
        for step in leftovers {
            run_step(step);
        }
    }

    fn pending(&self) -> usize {
        self.shared.queue.len()
    }
}

impl Drop for DecodeProcessor {
    fn drop(&mut self) {
        let Some(handle) = self.stop_worker() else {
            return;
        };
        // The last owner can be a step running on the worker itself.
        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            log::error!("Resource worker '{}' panicked", self.worker_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer::HeadlessGpu;
    use std::sync::mpsc;
    use std::time::Duration;

    fn record(p: &DecodeProcessor, tx: &mpsc::Sender<String>, label: &str) {
        let tx = tx.clone();
        let owned = label.to_owned();
        p.enqueue(Phase::decode_fn(label, move || {
            let _ = tx.send(owned);
        }));
    }

    #[test]
    fn runs_in_submission_order_on_named_thread() {
        let p = DecodeProcessor::new("decode-order-test");
        p.init().unwrap();
        let (tx, rx) = mpsc::channel();

        for label in ["A", "B", "C"] {
            record(&p, &tx, label);
        }
        let names = Arc::new(Mutex::new(Vec::new()));
        let names2 = Arc::clone(&names);
        p.enqueue(Phase::decode_fn("name", move || {
            names2.lock().push(std::thread::current().name().map(str::to_owned));
        }));

        let got: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(got, ["A", "B", "C"]);

        p.dispose(&mut HeadlessGpu::new());
        assert_eq!(names.lock()[0].as_deref(), Some("decode-order-test"));
    }

    #[test]
    fn wakes_again_after_going_idle() {
        let p = DecodeProcessor::new("decode-idle-test");
        p.init().unwrap();
        let (tx, rx) = mpsc::channel();

        record(&p, &tx, "first");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "first");

        std::thread::sleep(Duration::from_millis(20));
        record(&p, &tx, "second");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "second");
        p.dispose(&mut HeadlessGpu::new());
    }

    #[test]
    fn dispose_drains_everything_before_join() {
        let p = DecodeProcessor::new("decode-dispose-test");
        p.init().unwrap();
        let (tx, rx) = mpsc::channel();

        p.enqueue(Phase::decode_fn("slow", || std::thread::sleep(Duration::from_millis(30))));
        for i in 0..10 {
            record(&p, &tx, &format!("item{i}"));
        }
        p.dispose(&mut HeadlessGpu::new());

        assert!(!p.is_initialized());
        assert_eq!(rx.try_iter().count(), 10);
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn panicking_step_does_not_kill_worker() {
        let p = DecodeProcessor::new("decode-panic-test");
        p.init().unwrap();
        let (tx, rx) = mpsc::channel();

        p.enqueue(Phase::decode_fn("boom", || panic!("decoder blew up")));
        record(&p, &tx, "after");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "after");
        p.dispose(&mut HeadlessGpu::new());
    }

    #[test]
    fn enqueue_racing_dispose_still_runs() {
        let p = Arc::new(DecodeProcessor::new("decode-race-test"));
        p.init().unwrap();
        let (tx, rx) = mpsc::channel();
        p.enqueue(Phase::decode_fn("busy", || std::thread::sleep(Duration::from_millis(10))));

        let submitter = {
            let p = Arc::clone(&p);
            let tx = tx.clone();
            std::thread::spawn(move || {
                for i in 0..2000 {
                    record(&p, &tx, &format!("r{i}"));
                }
            })
        };
        p.dispose(&mut HeadlessGpu::new());
        submitter.join().unwrap();

        assert_eq!(rx.try_iter().count(), 2000);
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn queued_before_init_runs_on_dispose() {
        let p = DecodeProcessor::new("decode-uninit-test");
        let (tx, rx) = mpsc::channel();
        record(&p, &tx, "early");
        assert_eq!(p.pending(), 1);

        p.dispose(&mut HeadlessGpu::new());
        assert_eq!(rx.try_recv().unwrap(), "early");

        // After disposal work still completes, inline.
        record(&p, &tx, "late");
        assert_eq!(rx.try_recv().unwrap(), "late");
    }
}
