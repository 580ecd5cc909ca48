//! Pausable FIFO job queue with a single worker thread per instance.
//!
//! The engine runs two of these: one for downloads, one for conversions. The
//! UI thread and the worker thread share job handles; every mutable field is
//! behind the handle's own lock, and the queue bookkeeping (pending sequence,
//! current job, pause/stop flags) is behind one mutex/condvar pair.
//! Cancellation is cooperative: marking a job cancelled never interrupts an
//! in-flight callback, the callback is expected to notice and return early.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::Result;

/// How long the worker sleeps between pause-flag checks.
const PAUSED_WAIT: Duration = Duration::from_millis(100);
/// How long the worker waits for new jobs before re-checking the stop flag.
const IDLE_WAIT: Duration = Duration::from_secs(1);
/// Best-effort bound on joining the worker during `stop()`.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Immutable description of a unit of work. The associated `Activity` type
/// carries the variant-specific transient fields the processing callback
/// fills in (speed/eta for downloads, output path for conversions).
pub trait JobRequest: Send + Sync + 'static {
    type Activity: Default + Clone + Send;
}

#[derive(Debug, Clone)]
pub struct JobState<A> {
    pub status: JobStatus,
    pub progress: f32,
    pub error_message: Option<String>,
    pub title: Option<String>,
    pub activity: A,
}

struct JobInner<R: JobRequest> {
    id: Uuid,
    request: R,
    state: Mutex<JobState<R::Activity>>,
}

/// Shared handle to one job. Cloning is cheap; the UI keeps one clone for
/// display while the worker mutates the state through another.
pub struct Job<R: JobRequest> {
    inner: Arc<JobInner<R>>,
}

impl<R: JobRequest> Clone for Job<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: JobRequest> Job<R> {
    pub fn new(request: R) -> Self {
        Self {
            inner: Arc::new(JobInner {
                id: Uuid::new_v4(),
                request,
                state: Mutex::new(JobState {
                    status: JobStatus::Pending,
                    progress: 0.0,
                    error_message: None,
                    title: None,
                    activity: R::Activity::default(),
                }),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn request(&self) -> &R {
        &self.inner.request
    }

    fn state(&self) -> MutexGuard<'_, JobState<R::Activity>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> JobStatus {
        self.state().status
    }

    pub fn snapshot(&self) -> JobState<R::Activity> {
        self.state().clone()
    }

    /// The cooperative cancellation check for processing callbacks.
    pub fn is_cancelled(&self) -> bool {
        self.status() == JobStatus::Cancelled
    }

    pub fn title(&self) -> Option<String> {
        self.state().title.clone()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        self.state().title = Some(title.into());
    }

    /// Clamped progress update; a no-op unless the job is being processed, so
    /// stale updates from an already-cancelled callback cannot resurrect it.
    pub fn update_progress(&self, progress: f32) {
        let mut state = self.state();
        if state.status != JobStatus::Processing {
            return;
        }
        state.progress = progress.clamp(0.0, 100.0);
    }

    /// Mutate the variant-specific transient fields; same Processing-only
    /// guard as `update_progress`.
    pub fn update_activity(&self, f: impl FnOnce(&mut R::Activity)) {
        let mut state = self.state();
        if state.status != JobStatus::Processing {
            return;
        }
        f(&mut state.activity);
    }

    /// Move to `to` unless a terminal state was already reached. Returns
    /// whether the transition happened. Terminal states never change, which
    /// is also what keeps a concurrent cancellation from being downgraded
    /// into a plain failure.
    fn transition(&self, to: JobStatus) -> bool {
        let mut state = self.state();
        if state.status.is_terminal() {
            return false;
        }
        state.status = to;
        if to == JobStatus::Completed {
            state.progress = 100.0;
        }
        true
    }

    fn fail(&self, message: String) -> bool {
        let mut state = self.state();
        if state.status.is_terminal() {
            return false;
        }
        state.status = JobStatus::Failed;
        state.error_message = Some(message);
        true
    }
}

struct QueueState<R: JobRequest> {
    pending: VecDeque<Job<R>>,
    current: Option<Job<R>>,
    stop: bool,
    paused: bool,
}

struct Shared<R: JobRequest> {
    state: Mutex<QueueState<R>>,
    condvar: Condvar,
    capacity: usize,
    name: &'static str,
    process: Box<dyn Fn(&Job<R>) -> Result<()> + Send + Sync>,
}

impl<R: JobRequest> Shared<R> {
    fn lock(&self) -> MutexGuard<'_, QueueState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// FIFO queue of jobs processed one at a time by a dedicated worker thread.
///
/// Constructed paused: jobs accumulate but nothing is dequeued until
/// `start()` (or `resume()` after a `start()`) is called.
pub struct JobQueue<R: JobRequest> {
    shared: Arc<Shared<R>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<R: JobRequest> JobQueue<R> {
    pub fn new(
        name: &'static str,
        capacity: usize,
        process: impl Fn(&Job<R>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    current: None,
                    stop: false,
                    paused: true,
                }),
                condvar: Condvar::new(),
                capacity,
                name,
                process: Box::new(process),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker thread if none is alive (the queue starts unpaused),
    /// otherwise just resume.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let alive = worker.as_ref().is_some_and(|h| !h.is_finished());
        if alive {
            drop(worker);
            self.resume();
            return;
        }

        {
            let mut state = self.shared.lock();
            state.stop = false;
            state.paused = false;
        }

        let shared = Arc::clone(&self.shared);
        *worker = Some(thread::spawn(move || worker_loop(shared)));
    }

    /// Signal the worker to exit and join it, bounded by a timeout. Pending
    /// jobs are kept; a stuck callback is abandoned rather than waited on.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock();
            state.stop = true;
        }
        self.shared.condvar.notify_all();

        let handle = {
            let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            worker.take()
        };
        let Some(handle) = handle else { return };

        let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        if handle.is_finished() {
            let _ = handle.join();
        }
    }

    pub fn pause(&self) {
        let mut state = self.shared.lock();
        state.paused = true;
    }

    pub fn resume(&self) {
        {
            let mut state = self.shared.lock();
            state.paused = false;
        }
        self.shared.condvar.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    /// Append a job. Fails closed when the pending sequence is at capacity.
    pub fn add_job(&self, job: Job<R>) -> bool {
        let mut state = self.shared.lock();
        if state.pending.len() >= self.shared.capacity {
            return false;
        }
        state.pending.push_back(job);
        drop(state);
        self.shared.condvar.notify_all();
        true
    }

    pub fn is_queue_full(&self) -> bool {
        self.shared.lock().pending.len() >= self.shared.capacity
    }

    pub fn get_queue_capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Mark a job cancelled if it is the current job or still queued. A
    /// queued job is left in the sequence; the worker drops it when it scans
    /// past. Cooperative: an in-flight callback has to notice on its own.
    pub fn cancel_job(&self, job: &Job<R>) -> bool {
        let state = self.shared.lock();
        if state.current.as_ref().is_some_and(|c| c.id() == job.id()) {
            job.transition(JobStatus::Cancelled);
            return true;
        }
        if state.pending.iter().any(|j| j.id() == job.id()) {
            job.transition(JobStatus::Cancelled);
            return true;
        }
        false
    }

    /// Stronger than `cancel_job`: a queued job is removed outright. The
    /// current job, or a job caught between pop and install, is marked
    /// cancelled instead.
    pub fn remove_job(&self, job: &Job<R>) -> bool {
        let mut state = self.shared.lock();
        if let Some(pos) = state.pending.iter().position(|j| j.id() == job.id()) {
            state.pending.remove(pos);
            return true;
        }
        if state.current.as_ref().is_some_and(|c| c.id() == job.id()) {
            job.transition(JobStatus::Cancelled);
            return true;
        }
        if job.status() == JobStatus::Pending {
            job.transition(JobStatus::Cancelled);
            return true;
        }
        false
    }

    pub fn get_current_job(&self) -> Option<Job<R>> {
        self.shared.lock().current.clone()
    }

    pub fn get_queue_size(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_job_processing(&self, job: &Job<R>) -> bool {
        self.shared
            .lock()
            .current
            .as_ref()
            .is_some_and(|c| c.id() == job.id())
    }

    /// Mark every queued job cancelled and empty the sequence.
    pub fn clear_queue(&self) {
        let mut state = self.shared.lock();
        for job in state.pending.drain(..) {
            job.transition(JobStatus::Cancelled);
        }
    }

    pub fn update_job_progress(&self, job: &Job<R>, progress: f32) {
        job.update_progress(progress);
    }
}

impl<R: JobRequest> Drop for JobQueue<R> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pop the oldest still-pending job; entries already driven to a terminal
/// state (cancelled while queued) are dropped as the scan passes them.
fn next_eligible<R: JobRequest>(pending: &mut VecDeque<Job<R>>) -> Option<Job<R>> {
    while let Some(job) = pending.pop_front() {
        if job.status() == JobStatus::Pending {
            return Some(job);
        }
    }
    None
}

fn worker_loop<R: JobRequest>(shared: Arc<Shared<R>>) {
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if state.stop {
                    return;
                }
                if !state.paused {
                    if let Some(job) = next_eligible(&mut state.pending) {
                        state.current = Some(job.clone());
                        break job;
                    }
                }
                // Bounded waits keep stop/resume latency below the timeout
                // even when no notification arrives.
                let wait = if state.paused { PAUSED_WAIT } else { IDLE_WAIT };
                let (guard, _) = shared
                    .condvar
                    .wait_timeout(state, wait)
                    .unwrap_or_else(PoisonError::into_inner);
                state = guard;
            }
        };

        // The job may have been cancelled between pop and install.
        if !job.transition(JobStatus::Processing) {
            clear_current(&shared);
            continue;
        }

        match catch_unwind(AssertUnwindSafe(|| (shared.process)(&job))) {
            Ok(Ok(())) => {
                // Callbacks may have set a terminal state themselves.
                job.transition(JobStatus::Completed);
            }
            Ok(Err(err)) => {
                job.fail(err.to_string());
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                eprintln!(
                    "[{}] processing callback panicked: {message}",
                    shared.name
                );
                job.fail(message);
            }
        }

        clear_current(&shared);
    }
}

fn clear_current<R: JobRequest>(shared: &Shared<R>) {
    let mut state = shared.lock();
    state.current = None;
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "processing callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestRequest;

    impl JobRequest for TestRequest {
        type Activity = ();
    }

    fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn terminal_states_never_change() {
        let job = Job::new(TestRequest);
        assert!(job.transition(JobStatus::Processing));
        assert!(job.transition(JobStatus::Cancelled));
        assert!(!job.transition(JobStatus::Completed));
        assert!(!job.fail("late failure".to_string()));
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(job.snapshot().error_message, None);
    }

    #[test]
    fn progress_updates_only_while_processing() {
        let job = Job::new(TestRequest);
        job.update_progress(50.0);
        assert_eq!(job.snapshot().progress, 0.0);

        job.transition(JobStatus::Processing);
        job.update_progress(150.0);
        assert_eq!(job.snapshot().progress, 100.0);
        job.update_progress(-3.0);
        assert_eq!(job.snapshot().progress, 0.0);
    }

    #[test]
    fn completed_transition_pins_progress() {
        let job = Job::new(TestRequest);
        job.transition(JobStatus::Processing);
        job.update_progress(40.0);
        job.transition(JobStatus::Completed);
        assert_eq!(job.snapshot().progress, 100.0);
    }

    #[test]
    fn scan_skips_and_drops_dead_entries() {
        let mut pending: VecDeque<Job<TestRequest>> = VecDeque::new();
        let a = Job::new(TestRequest);
        let b = Job::new(TestRequest);
        let c = Job::new(TestRequest);
        a.transition(JobStatus::Cancelled);
        pending.push_back(a);
        pending.push_back(b.clone());
        pending.push_back(c);

        let popped = next_eligible(&mut pending).expect("eligible job");
        assert_eq!(popped.id(), b.id());
        // The cancelled head entry is gone, c is still queued.
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn add_job_fails_closed_at_capacity() {
        let queue: JobQueue<TestRequest> = JobQueue::new("test", 2, |_| Ok(()));
        assert!(queue.add_job(Job::new(TestRequest)));
        assert!(queue.add_job(Job::new(TestRequest)));
        assert!(queue.is_queue_full());
        assert!(!queue.add_job(Job::new(TestRequest)));
        assert_eq!(queue.get_queue_size(), 2);
        assert_eq!(queue.get_queue_capacity(), 2);
    }

    #[test]
    fn clear_queue_cancels_everything_pending() {
        let queue: JobQueue<TestRequest> = JobQueue::new("test", 5, |_| Ok(()));
        let a = Job::new(TestRequest);
        let b = Job::new(TestRequest);
        queue.add_job(a.clone());
        queue.add_job(b.clone());
        queue.clear_queue();
        assert_eq!(queue.get_queue_size(), 0);
        assert_eq!(a.status(), JobStatus::Cancelled);
        assert_eq!(b.status(), JobStatus::Cancelled);
    }

    #[test]
    fn cancel_leaves_entry_counted_remove_does_not() {
        let queue: JobQueue<TestRequest> = JobQueue::new("test", 5, |_| Ok(()));
        let a = Job::new(TestRequest);
        let b = Job::new(TestRequest);
        queue.add_job(a.clone());
        queue.add_job(b.clone());

        assert!(queue.cancel_job(&a));
        assert_eq!(queue.get_queue_size(), 2);
        assert_eq!(a.status(), JobStatus::Cancelled);

        assert!(queue.remove_job(&b));
        assert_eq!(queue.get_queue_size(), 1);
        // remove_job takes the entry out without touching its status.
        assert_eq!(b.status(), JobStatus::Pending);
    }

    #[test]
    fn cancel_and_remove_miss_unknown_jobs() {
        let queue: JobQueue<TestRequest> = JobQueue::new("test", 5, |_| Ok(()));
        let stray = Job::new(TestRequest);
        stray.transition(JobStatus::Completed);
        assert!(!queue.cancel_job(&stray));
        assert!(!queue.remove_job(&stray));
        assert_eq!(stray.status(), JobStatus::Completed);
    }

    #[test]
    fn remove_preempts_job_in_pop_install_window() {
        let queue: JobQueue<TestRequest> = JobQueue::new("test", 5, |_| Ok(()));
        // Pending status but neither queued nor current models the narrow
        // window between pop and install.
        let popped = Job::new(TestRequest);
        assert!(queue.remove_job(&popped));
        assert_eq!(popped.status(), JobStatus::Cancelled);
    }

    #[test]
    fn queue_starts_paused_and_start_unpauses() {
        let processed = Arc::new(AtomicUsize::new(0));
        let counter = processed.clone();
        let queue: JobQueue<TestRequest> = JobQueue::new("test", 5, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(queue.is_paused());
        queue.add_job(Job::new(TestRequest));
        queue.add_job(Job::new(TestRequest));
        thread::sleep(Duration::from_millis(150));
        assert_eq!(processed.load(Ordering::SeqCst), 0);
        assert_eq!(queue.get_queue_size(), 2);

        queue.start();
        assert!(!queue.is_paused());
        assert!(wait_until(Duration::from_secs(5), || {
            processed.load(Ordering::SeqCst) == 2
        }));
        queue.stop();
    }

    #[test]
    fn callback_error_becomes_failed_with_message() {
        let queue: JobQueue<TestRequest> = JobQueue::new("test", 5, |_| {
            Err(crate::EngineError::Network("socket closed".to_string()))
        });
        let job = Job::new(TestRequest);
        queue.add_job(job.clone());
        queue.start();
        assert!(wait_until(Duration::from_secs(5), || {
            job.status() == JobStatus::Failed
        }));
        let state = job.snapshot();
        assert!(state
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("socket closed")));
        queue.stop();
    }

    #[test]
    fn callback_panic_is_contained_and_worker_survives() {
        let queue: JobQueue<TestRequest> = JobQueue::new("test", 5, |job| {
            if job.title().is_none() {
                panic!("boom");
            }
            Ok(())
        });
        let bad = Job::new(TestRequest);
        let good = Job::new(TestRequest);
        good.set_title("survivor");
        queue.add_job(bad.clone());
        queue.add_job(good.clone());
        queue.start();
        assert!(wait_until(Duration::from_secs(5), || {
            good.status() == JobStatus::Completed
        }));
        assert_eq!(bad.status(), JobStatus::Failed);
        assert!(bad
            .snapshot()
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("boom")));
        queue.stop();
    }

    #[test]
    fn stop_while_paused_returns_promptly() {
        let queue: JobQueue<TestRequest> = JobQueue::new("test", 5, |_| Ok(()));
        queue.start();
        queue.pause();
        let started = Instant::now();
        queue.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
