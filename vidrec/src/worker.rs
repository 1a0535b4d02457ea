/*!
    Worker exit control and the shutdown join protocol.

    Every worker thread owns an [`ExitGuard`] for its [`WorkerControl`]. The
    thread polls [`WorkerControl::should_exit`] between units of work; the
    guard marks it exited when the thread function returns, panics included.

    [`ShutdownCoordinator`] asks every worker to exit with a callback that
    counts down a [`ShutdownLatch`], then waits on the latch. Resources a
    worker uses must only be released once that worker has exited.
*/

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Render,
    VideoDrain,
    AudioDrain,
}

impl WorkerKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            WorkerKind::Render => "render",
            WorkerKind::VideoDrain => "video-drain",
            WorkerKind::AudioDrain => "audio-drain",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerPhase {
    Running,
    ExitRequested,
    Exited,
}

type ExitCallback = Box<dyn FnOnce() + Send>;

struct ControlInner {
    phase: WorkerPhase,
    on_exited: Option<ExitCallback>,
}

/**
    Exit state of one worker: `Running -> ExitRequested -> Exited`.
*/
pub struct WorkerControl {
    kind: WorkerKind,
    exit_requested: AtomicBool,
    inner: Mutex<ControlInner>,
}

impl WorkerControl {
    pub fn new(kind: WorkerKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            exit_requested: AtomicBool::new(false),
            inner: Mutex::new(ControlInner {
                phase: WorkerPhase::Running,
                on_exited: None,
            }),
        })
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Checked by the worker between units of work.
    pub fn should_exit(&self) -> bool {
        self.exit_requested.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> WorkerPhase {
        self.inner.lock().phase
    }

    /**
        Ask the worker to exit. `on_exited` runs once the worker has exited,
        immediately if it already has. A second request replaces a callback
        that has not run yet.
    */
    pub fn request_exit(&self, on_exited: impl FnOnce() + Send + 'static) {
        let mut inner = self.inner.lock();
        self.exit_requested.store(true, Ordering::Release);
        if inner.phase == WorkerPhase::Exited {
            drop(inner);
            on_exited();
            return;
        }
        inner.phase = WorkerPhase::ExitRequested;
        inner.on_exited = Some(Box::new(on_exited));
    }

    fn mark_exited(&self) {
        let callback = {
            let mut inner = self.inner.lock();
            inner.phase = WorkerPhase::Exited;
            inner.on_exited.take()
        };
        debug!("{} worker exited", self.kind);
        if let Some(callback) = callback {
            callback();
        }
    }
}

/**
    Marks its worker exited when dropped.

    Create it first thing in the thread function so that it drops last.
*/
pub struct ExitGuard(Arc<WorkerControl>);

impl ExitGuard {
    pub fn new(control: Arc<WorkerControl>) -> Self {
        Self(control)
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.mark_exited();
    }
}

/**
    Counts outstanding workers during a shutdown.
*/
pub struct ShutdownLatch {
    pending: Mutex<usize>,
    done: Condvar,
}

impl ShutdownLatch {
    pub fn new(count: usize) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(count),
            done: Condvar::new(),
        })
    }

    pub fn count_down(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.done.notify_all();
        }
    }

    pub fn remaining(&self) -> usize {
        *self.pending.lock()
    }

    /**
        Wait until the count reaches zero, re-checking at least every
        `poll_interval`. Returns false if `timeout` expired first.
    */
    pub fn wait(&self, poll_interval: Duration, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut pending = self.pending.lock();
        while *pending > 0 {
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    poll_interval.min(deadline - now)
                }
                None => poll_interval,
            };
            self.done.wait_for(&mut pending, wait);
        }
        true
    }
}

/**
    A spawned worker as seen by its owner.
*/
pub struct WorkerHandle {
    control: Arc<WorkerControl>,
    waker: Option<Box<dyn Fn() + Send + Sync>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn new(control: Arc<WorkerControl>, thread: JoinHandle<()>) -> Self {
        Self {
            control,
            waker: None,
            thread: Some(thread),
        }
    }

    /**
        Spawn a named thread running `body`, which must hold an
        [`ExitGuard`] for `control`.
    */
    pub fn spawn(
        name: String,
        control: Arc<WorkerControl>,
        body: impl FnOnce() + Send + 'static,
    ) -> io::Result<Self> {
        let thread = thread::Builder::new().name(name).spawn(body)?;
        Ok(Self::new(control, thread))
    }

    /**
        Attach a function that interrupts the worker's blocking waits. It is
        called right after the exit request.
    */
    pub fn with_waker(mut self, waker: impl Fn() + Send + Sync + 'static) -> Self {
        self.waker = Some(Box::new(waker));
        self
    }

    pub fn kind(&self) -> WorkerKind {
        self.control.kind()
    }

    pub fn control(&self) -> &Arc<WorkerControl> {
        &self.control
    }
}

/**
    Outcome of [`ShutdownCoordinator::shut_down`].
*/
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that had not exited when the timeout expired.
    pub stuck: Vec<WorkerKind>,
    pub waited: Duration,
}

impl ShutdownReport {
    pub fn has_exited(&self, kind: WorkerKind) -> bool {
        !self.stuck.contains(&kind)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ShutdownCoordinator {
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl ShutdownCoordinator {
    pub fn new(poll_interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /**
        Request exit from every worker and wait for all of them.

        Exited workers are joined. Stuck workers are detached and listed in
        the report; whatever they hold must not be released by the caller.
    */
    pub fn shut_down(&self, workers: Vec<WorkerHandle>) -> ShutdownReport {
        let started = Instant::now();
        let latch = ShutdownLatch::new(workers.len());

        for worker in &workers {
            let latch = Arc::clone(&latch);
            worker.control.request_exit(move || latch.count_down());
            if let Some(waker) = &worker.waker {
                waker();
            }
        }

        let all_exited = latch.wait(self.poll_interval, self.timeout);

        let mut report = ShutdownReport {
            stuck: Vec::new(),
            waited: started.elapsed(),
        };
        for mut worker in workers {
            let kind = worker.kind();
            if !all_exited && worker.control.phase() != WorkerPhase::Exited {
                warn!("{kind} worker still running after {:?}", report.waited);
                report.stuck.push(kind);
                continue;
            }
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    warn!("{kind} worker panicked");
                }
            }
        }
        report
    }
}
