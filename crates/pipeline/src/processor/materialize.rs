use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use corelib::{GpuContext, PhaseKind, PipelineResult};

use super::{Processor, panic_message};
use crate::phase::{MaterializeStep, Phase, Progress};
use crate::queue::Queue;

/// Runs materialize phases on the rendering thread, inside a per-frame time
/// budget. At least one item runs per update so a tiny budget cannot stall
/// the queue.
pub struct MaterializeProcessor {
    queue: Queue<Box<dyn MaterializeStep>>,
    budget: Duration,
    poll_interval: Duration,
    initialized: AtomicBool,
}

impl MaterializeProcessor {
    pub const NAME: &'static str = "materialize";

    pub fn new(budget: Duration, poll_interval: Duration) -> Self {
        Self {
            queue: Queue::new(),
            budget,
            poll_interval,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Drain until the queue holds nothing, retrying steps that are still
    /// waiting on their data.
    fn complete_all(&self, gpu: &mut dyn GpuContext) {
        loop {
            let mut progressed = false;
            let mut deferred = Vec::new();
            while let Some(mut step) = self.queue.pop() {
                match run_step(step.as_mut(), gpu) {
                    Progress::Done => progressed = true,
                    Progress::Pending => deferred.push(step),
                }
            }
            if deferred.is_empty() {
                break;
            }
            log::trace!("{} materialize step(s) still waiting on data", deferred.len());
            for step in deferred {
                self.queue.push(step);
            }
            if !progressed {
                std::thread::sleep(self.poll_interval);
            }
        }
    }
}

fn run_step(step: &mut dyn MaterializeStep, gpu: &mut dyn GpuContext) -> Progress {
    match panic::catch_unwind(AssertUnwindSafe(|| step.run_materialize(gpu))) {
        Ok(progress) => progress,
        Err(payload) => {
            log::error!(
                "Materialize step '{}' panicked: {}",
                step.label(),
                panic_message(&*payload)
            );
            Progress::Done
        }
    }
}

impl Processor for MaterializeProcessor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn accepts(&self, kind: PhaseKind) -> bool {
        kind == PhaseKind::Materialize
    }

    fn init(&self) -> PipelineResult<()> {
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn enqueue(&self, phase: Phase) {
        match phase {
            Phase::Materialize(step) => {
                self.queue.push(step);
            }
            other => {
                log::error!(
                    "Materialize processor was handed {} phase '{}'",
                    other.kind(),
                    other.label()
                );
            }
        }
    }

    fn update(&self, gpu: &mut dyn GpuContext) {
        let start = Instant::now();
        // Steps still waiting go back after the loop, otherwise they would be
        // popped again within the same drain.
        let mut deferred = Vec::new();
        while let Some(mut step) = self.queue.pop() {
            if run_step(step.as_mut(), gpu) == Progress::Pending {
                deferred.push(step);
            }
            if start.elapsed() >= self.budget {
                break;
            }
        }
        for step in deferred {
            self.queue.push(step);
        }
    }

    fn dispose(&self, gpu: &mut dyn GpuContext) {
        self.complete_all(gpu);
        self.initialized.store(false, Ordering::Release);
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use renderer::HeadlessGpu;
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(p: &MaterializeProcessor, log: &Log, label: &str) {
        let log = Arc::clone(log);
        let owned = label.to_owned();
        p.enqueue(Phase::materialize_fn(label, move |_| log.lock().push(owned)));
    }

    /// Reports `Pending` a fixed number of times before finishing.
    struct Waits {
        left: u32,
        log: Log,
    }

    impl MaterializeStep for Waits {
        fn label(&self) -> &str {
            "waits"
        }

        fn run_materialize(&mut self, _: &mut dyn GpuContext) -> Progress {
            if self.left > 0 {
                self.left -= 1;
                return Progress::Pending;
            }
            self.log.lock().push("waits".into());
            Progress::Done
        }
    }

    #[test]
    fn zero_budget_runs_one_item_per_update_in_order() {
        let p = MaterializeProcessor::new(Duration::ZERO, Duration::from_millis(1));
        let log = Log::default();
        let mut gpu = HeadlessGpu::new();
        for label in ["A", "B", "C"] {
            record(&p, &log, label);
        }

        p.update(&mut gpu);
        assert_eq!(*log.lock(), ["A"]);
        p.update(&mut gpu);
        assert_eq!(*log.lock(), ["A", "B"]);
        p.update(&mut gpu);
        assert_eq!(*log.lock(), ["A", "B", "C"]);
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn generous_budget_drains_everything() {
        let p = MaterializeProcessor::new(Duration::from_secs(10), Duration::from_millis(1));
        let log = Log::default();
        for i in 0..20 {
            record(&p, &log, &i.to_string());
        }
        p.update(&mut HeadlessGpu::new());
        assert_eq!(log.lock().len(), 20);
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn pending_steps_are_retried_next_update() {
        let p = MaterializeProcessor::new(Duration::from_secs(10), Duration::from_millis(1));
        let log = Log::default();
        let mut gpu = HeadlessGpu::new();

        p.enqueue(Phase::Materialize(Box::new(Waits {
            left: 1,
            log: Arc::clone(&log),
        })));
        record(&p, &log, "next");

        p.update(&mut gpu);
        assert_eq!(*log.lock(), ["next"]);
        assert_eq!(p.pending(), 1);

        p.update(&mut gpu);
        assert_eq!(*log.lock(), ["next", "waits"]);
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn dispose_ignores_budget_and_waits_out_pending() {
        let p = MaterializeProcessor::new(Duration::ZERO, Duration::from_millis(1));
        p.init().unwrap();
        let log = Log::default();
        p.enqueue(Phase::Materialize(Box::new(Waits {
            left: 3,
            log: Arc::clone(&log),
        })));
        for label in ["A", "B"] {
            record(&p, &log, label);
        }

        p.dispose(&mut HeadlessGpu::new());
        assert_eq!(*log.lock(), ["A", "B", "waits"]);
        assert_eq!(p.pending(), 0);
        assert!(!p.is_initialized());
    }

    #[test]
    fn panicking_step_is_dropped() {
        let p = MaterializeProcessor::new(Duration::from_secs(10), Duration::from_millis(1));
        let log = Log::default();
        p.enqueue(Phase::materialize_fn("boom", |_| panic!("upload blew up")));
        record(&p, &log, "after");

        p.update(&mut HeadlessGpu::new());
        assert_eq!(*log.lock(), ["after"]);
        assert_eq!(p.pending(), 0);
    }
}
