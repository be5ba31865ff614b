//! Bounded worker pool with blocking admission.
//!
//! A fixed number of named worker threads drain a bounded admission queue.
//! When the queue is full, [`WorkerPool::submit`] blocks the caller instead
//! of growing the queue or dropping work, which is what throttles the
//! single reader thread to the speed of the workers.
//!
//! ```text
//!  submit() ──> [ admission queue (capacity C) ] ──> worker-1 ─┐
//!   (blocks when full)                           ──> worker-2 ─┼─> ResultHandle
//!                                                ──> worker-P ─┘
//! ```
//!
//! Lifecycle is one-directional:
//! `Running -> Draining -> Terminating -> Terminated`.

use std::any::Any;
use std::cell::Cell;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TryRecvError, bounded};
use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::{AdmissionError, TaskError};

/// How long a blocked submitter or a draining shutdown waits before
/// re-checking the interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

/// Default interval between "still draining" log lines during shutdown.
pub const DEFAULT_SHUTDOWN_LOG_INTERVAL: Duration = Duration::from_secs(10);

type Task<T> = Box<dyn FnOnce() -> T + Send + 'static>;

struct WorkItem<T> {
    task: Task<T>,
    result: Sender<Result<T, TaskError>>,
}

/// Lifecycle state of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting submissions.
    Running,
    /// `shutdown` was called; waiting for queued and running tasks.
    Draining,
    /// Queue is empty; joining worker threads.
    Terminating,
    /// No workers left (or abandoned after a hard stop).
    Terminated,
}

/// How a call to [`WorkerPool::shutdown`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// All submitted tasks finished and workers were joined.
    Completed,
    /// An interrupt forced a hard stop; `abandoned` queued tasks never ran.
    Interrupted { abandoned: usize },
    /// The pool had already been shut down.
    AlreadyShutDown,
}

/// External interrupt token.
///
/// Raising it makes blocked submissions fail and turns a draining shutdown
/// into a hard stop.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to the eventual result of one submitted task.
pub struct ResultHandle<T> {
    receiver: Receiver<Result<T, TaskError>>,
    taken: Cell<bool>,
}

impl<T> ResultHandle<T> {
    /// Block until the task has finished.
    pub fn wait(self) -> Result<T, TaskError> {
        if self.taken.get() {
            return Err(TaskError::Lost);
        }
        self.receiver.recv().unwrap_or(Err(TaskError::Lost))
    }

    /// Take the result if the task has finished, without blocking.
    ///
    /// Once a result was taken, later calls (and `wait`) report
    /// [`TaskError::Lost`].
    pub fn try_get(&self) -> Option<Result<T, TaskError>> {
        if self.taken.get() {
            return Some(Err(TaskError::Lost));
        }
        match self.receiver.try_recv() {
            Ok(result) => {
                self.taken.set(true);
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(TaskError::Lost)),
        }
    }

    /// Whether the task has finished, without blocking. Stays true after
    /// `try_get` took the result.
    pub fn is_complete(&self) -> bool {
        self.taken.get() || !self.receiver.is_empty()
    }
}

struct Status {
    state: PoolState,
    /// Admitted (or being admitted) and not yet finished.
    pending: usize,
    running: usize,
}

struct Shared {
    status: Mutex<Status>,
    changed: Condvar,
    abort: AtomicBool,
}

impl Shared {
    /// Count one more pending task, unless shutdown has already begun.
    fn admit(&self) -> bool {
        let mut status = self.status.lock();
        if status.state != PoolState::Running {
            return false;
        }
        status.pending += 1;
        true
    }

    fn start(&self) {
        self.status.lock().running += 1;
    }

    fn finish(&self, was_running: bool) {
        let mut status = self.status.lock();
        status.pending -= 1;
        if was_running {
            status.running -= 1;
        }
        drop(status);
        self.changed.notify_all();
    }
}

/// Fixed-size pool of named worker threads behind a bounded admission queue.
pub struct WorkerPool<T: Send + 'static> {
    name: String,
    sender: Mutex<Option<Sender<WorkItem<T>>>>,
    /// Pool-side view of the admission queue, used for depth reporting and
    /// for abandoning queued work on a hard stop.
    backlog: Receiver<WorkItem<T>>,
    capacity: usize,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    interrupt: Interrupt,
    log_interval: Duration,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `workers` threads named `"{name}-1"`, `"{name}-2"`, ... draining
    /// an admission queue of `capacity` items. Zero values are raised to 1.
    pub fn new(name: impl Into<String>, workers: usize, capacity: usize) -> io::Result<Self> {
        let name = name.into();
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded::<WorkItem<T>>(capacity);
        let shared = Arc::new(Shared {
            status: Mutex::new(Status {
                state: PoolState::Running,
                pending: 0,
                running: 0,
            }),
            changed: Condvar::new(),
            abort: AtomicBool::new(false),
        });

        let mut handles = Vec::with_capacity(workers);
        for n in 1..=workers {
            let thread_name = format!("{name}-{n}");
            let receiver = receiver.clone();
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(&thread_name, &receiver, &shared))?;
            handles.push(handle);
        }
        debug!("{name}: started {workers} workers, admission capacity {capacity}");

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            backlog: receiver,
            capacity,
            shared,
            workers: Mutex::new(handles),
            interrupt: Interrupt::new(),
            log_interval: DEFAULT_SHUTDOWN_LOG_INTERVAL,
        })
    }

    /// Use an externally owned interrupt token.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Interval between progress lines while `shutdown` drains.
    pub fn with_log_interval(mut self, interval: Duration) -> Self {
        self.log_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn state(&self) -> PoolState {
        self.shared.status.lock().state
    }

    /// Tasks waiting in the admission queue.
    pub fn queue_depth(&self) -> usize {
        self.backlog.len()
    }

    /// Tasks admitted but not yet finished (queued plus running).
    pub fn pending(&self) -> usize {
        self.shared.status.lock().pending
    }

    /// Submit a task, blocking while the admission queue is full.
    ///
    /// A submission that races with the start of `shutdown` (the sender was
    /// taken while the pool was running, but admission found it draining) is
    /// retried once. The retry reports [`AdmissionError::Closed`] once the
    /// sender is gone, or [`AdmissionError::Disconnected`] if shutdown is
    /// still between the two steps.
    pub fn submit<F>(&self, task: F) -> Result<ResultHandle<T>, AdmissionError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (result_tx, result_rx) = bounded(1);
        let mut item = WorkItem {
            task: Box::new(task),
            result: result_tx,
        };

        let mut retried = false;
        let sender = loop {
            let sender = self.current_sender()?;
            if self.shared.admit() {
                break sender;
            }
            if retried {
                return Err(AdmissionError::Disconnected(self.name.clone()));
            }
            warn!("{}: submission raced with shutdown, retrying once", self.name);
            retried = true;
        };

        loop {
            match sender.send_timeout(item, INTERRUPT_POLL) {
                Ok(()) => {
                    trace!("{}: task admitted, queue depth {}", self.name, sender.len());
                    return Ok(ResultHandle {
                        receiver: result_rx,
                        taken: Cell::new(false),
                    });
                }
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.interrupt.is_raised() {
                        warn!("{}: waiting for a queue slot was interrupted", self.name);
                        self.shared.finish(false);
                        return Err(AdmissionError::Interrupted(self.name.clone()));
                    }
                    trace!("{}: admission queue full ({})", self.name, sender.len());
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    self.shared.finish(false);
                    return Err(AdmissionError::Disconnected(self.name.clone()));
                }
            }
        }
    }

    fn current_sender(&self) -> Result<Sender<WorkItem<T>>, AdmissionError> {
        self.sender
            .lock()
            .as_ref()
            .cloned()
            .ok_or_else(|| AdmissionError::Closed(self.name.clone()))
    }

    /// Stop accepting work and wait for queued and running tasks.
    ///
    /// Logs the remaining depth every log interval. If the interrupt is
    /// raised while waiting, queued tasks are abandoned (their handles
    /// resolve to [`TaskError::Abandoned`]), running tasks are left to finish
    /// on their own and the call returns immediately.
    pub fn shutdown(&self) -> ShutdownOutcome {
        {
            let mut status = self.shared.status.lock();
            if status.state != PoolState::Running {
                return ShutdownOutcome::AlreadyShutDown;
            }
            status.state = PoolState::Draining;
        }
        drop(self.sender.lock().take());
        debug!("{}: shutting down, waiting for queued tasks", self.name);

        let started = Instant::now();
        let mut last_log = started;
        let mut status = self.shared.status.lock();
        while status.pending > 0 {
            if self.interrupt.is_raised() {
                status.state = PoolState::Terminated;
                drop(status);
                return self.hard_stop();
            }
            self.shared.changed.wait_for(&mut status, INTERRUPT_POLL);
            if last_log.elapsed() >= self.log_interval {
                info!(
                    "{}: waiting {}s for {} queued and {} running tasks",
                    self.name,
                    started.elapsed().as_secs(),
                    status.pending - status.running,
                    status.running
                );
                last_log = Instant::now();
            }
        }
        status.state = PoolState::Terminating;
        drop(status);

        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                error!("{}: a worker thread panicked outside a task", self.name);
            }
        }
        self.shared.status.lock().state = PoolState::Terminated;
        debug!("{}: terminated", self.name);
        ShutdownOutcome::Completed
    }

    fn hard_stop(&self) -> ShutdownOutcome {
        self.shared.abort.store(true, Ordering::SeqCst);
        let mut abandoned = 0;
        for item in self.backlog.try_iter() {
            let _ = item.result.send(Err(TaskError::Abandoned));
            self.shared.finish(false);
            abandoned += 1;
        }
        warn!(
            "{}: hard stop on interrupt, {abandoned} queued tasks abandoned",
            self.name
        );
        ShutdownOutcome::Interrupted { abandoned }
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if self.state() == PoolState::Running {
            self.shutdown();
        }
    }
}

fn worker_loop<T>(name: &str, receiver: &Receiver<WorkItem<T>>, shared: &Shared) {
    trace!("{name}: waiting for tasks");
    for item in receiver.iter() {
        if shared.abort.load(Ordering::SeqCst) {
            let _ = item.result.send(Err(TaskError::Abandoned));
            shared.finish(false);
            continue;
        }
        shared.start();
        let outcome = panic::catch_unwind(AssertUnwindSafe(item.task))
            .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())));
        if let Err(e) = &outcome {
            error!("{name}: {e}");
        }
        // The submitter may have dropped its handle; that is not an error.
        let _ = item.result.send(outcome);
        shared.finish(true);
    }
    debug!("{name}: admission queue closed, exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
