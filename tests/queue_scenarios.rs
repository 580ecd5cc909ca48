//! End-to-end queue behavior: ordering, pause/resume, cancellation and
//! capacity, driven through the public API the way the engine drives it.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mediagrab_engine::queue::{Job, JobQueue, JobRequest, JobStatus};
use uuid::Uuid;

struct Task {
    label: &'static str,
}

impl JobRequest for Task {
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

/// Queue whose callback blocks until the test releases it, so tests can
/// observe the queue mid-job.
fn gated_queue(
    capacity: usize,
    processed: Arc<Mutex<Vec<&'static str>>>,
) -> (JobQueue<Task>, Sender<()>) {
    let (release_tx, release_rx) = channel::<()>();
    let release_rx: Arc<Mutex<Receiver<()>>> = Arc::new(Mutex::new(release_rx));
    let queue = JobQueue::new("test", capacity, move |job: &Job<Task>| {
        let rx = release_rx.lock().unwrap_or_else(|e| e.into_inner());
        let _ = rx.recv();
        drop(rx);
        processed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job.request().label);
        Ok(())
    });
    (queue, release_tx)
}

#[test]
fn jobs_run_in_fifo_order() {
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = order.clone();
    let queue = JobQueue::new("test", 10, move |job: &Job<Task>| {
        sink.lock().unwrap_or_else(|e| e.into_inner()).push(job.request().label);
        Ok(())
    });

    let jobs: Vec<Job<Task>> = ["first", "second", "third"]
        .into_iter()
        .map(|label| Job::new(Task { label }))
        .collect();
    for job in &jobs {
        assert!(queue.add_job(job.clone()));
    }
    queue.start();

    assert!(wait_until(Duration::from_secs(5), || {
        jobs.iter().all(|j| j.status() == JobStatus::Completed)
    }));
    assert_eq!(
        *order.lock().unwrap_or_else(|e| e.into_inner()),
        vec!["first", "second", "third"]
    );
    queue.stop();
}

#[test]
fn nothing_runs_before_start_everything_after() {
    let processed: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = processed.clone();
    let queue = JobQueue::new("test", 10, move |job: &Job<Task>| {
        sink.lock().unwrap_or_else(|e| e.into_inner()).push(job.request().label);
        Ok(())
    });

    let jobs: Vec<Job<Task>> = ["a", "b", "c"]
        .into_iter()
        .map(|label| Job::new(Task { label }))
        .collect();
    for job in &jobs {
        assert!(queue.add_job(job.clone()));
    }

    thread::sleep(Duration::from_millis(200));
    assert!(processed.lock().unwrap_or_else(|e| e.into_inner()).is_empty());
    assert_eq!(queue.get_queue_size(), 3);

    queue.start();
    assert!(wait_until(Duration::from_secs(5), || {
        jobs.iter().all(|j| j.status() == JobStatus::Completed)
    }));
    assert_eq!(processed.lock().unwrap_or_else(|e| e.into_inner()).len(), 3);
    queue.stop();
}

#[test]
fn pause_holds_the_next_job_resume_releases_it() {
    let processed: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = processed.clone();
    let queue = JobQueue::new("test", 10, move |job: &Job<Task>| {
        sink.lock().unwrap_or_else(|e| e.into_inner()).push(job.request().label);
        Ok(())
    });
    queue.start();
    queue.pause();

    let job = Job::new(Task { label: "held" });
    assert!(queue.add_job(job.clone()));
    thread::sleep(Duration::from_millis(300));
    assert_eq!(job.status(), JobStatus::Pending);

    queue.resume();
    assert!(wait_until(Duration::from_secs(5), || {
        job.status() == JobStatus::Completed
    }));
    queue.stop();
}

#[test]
fn cancelling_a_queued_job_skips_it_without_stalling_the_queue() {
    let processed: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let (queue, release) = gated_queue(10, processed.clone());

    let a = Job::new(Task { label: "a" });
    let b = Job::new(Task { label: "b" });
    let c = Job::new(Task { label: "c" });
    assert!(queue.add_job(a.clone()));
    assert!(queue.add_job(b.clone()));
    assert!(queue.add_job(c.clone()));
    queue.start();

    // a is now blocked inside the callback; b and c are still queued.
    assert!(wait_until(Duration::from_secs(5), || {
        queue.is_job_processing(&a)
    }));
    assert!(queue.cancel_job(&b));
    assert_eq!(b.status(), JobStatus::Cancelled);

    // Release a and (more than enough for) c.
    release.send(()).ok();
    release.send(()).ok();
    release.send(()).ok();

    assert!(wait_until(Duration::from_secs(5), || {
        a.status() == JobStatus::Completed && c.status() == JobStatus::Completed
    }));
    assert_eq!(b.status(), JobStatus::Cancelled);
    assert_eq!(
        *processed.lock().unwrap_or_else(|e| e.into_inner()),
        vec!["a", "c"],
        "the cancelled job never reaches the callback"
    );
    queue.stop();
}

#[test]
fn at_most_one_job_is_current() {
    let processed: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let (queue, release) = gated_queue(10, processed);

    let a = Job::new(Task { label: "a" });
    let b = Job::new(Task { label: "b" });
    assert!(queue.add_job(a.clone()));
    assert!(queue.add_job(b.clone()));
    queue.start();

    assert!(wait_until(Duration::from_secs(5), || {
        queue.is_job_processing(&a)
    }));
    let current = queue.get_current_job().map(|j| j.id());
    assert_eq!(current, Some(a.id()));
    assert!(!queue.is_job_processing(&b));
    assert_eq!(queue.get_queue_size(), 1);

    release.send(()).ok();
    release.send(()).ok();
    assert!(wait_until(Duration::from_secs(5), || {
        b.status() == JobStatus::Completed
    }));
    queue.stop();
}

#[test]
fn cancelling_the_current_job_is_cooperative() {
    let queue = JobQueue::new("test", 10, |job: &Job<Task>| {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !job.is_cancelled() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    });

    let job = Job::new(Task { label: "long" });
    assert!(queue.add_job(job.clone()));
    queue.start();

    assert!(wait_until(Duration::from_secs(5), || {
        queue.is_job_processing(&job)
    }));
    assert!(queue.cancel_job(&job));

    // The callback returns Ok after noticing, but the terminal state wins.
    assert!(wait_until(Duration::from_secs(5), || {
        queue.get_current_job().is_none()
    }));
    assert_eq!(job.status(), JobStatus::Cancelled);
    queue.stop();
}

#[test]
fn full_queue_recovers_after_a_removal() {
    let processed: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let (queue, _release) = gated_queue(1, processed);

    let first = Job::new(Task { label: "first" });
    assert!(queue.add_job(first.clone()));
    assert!(queue.is_queue_full());

    let rejected = Job::new(Task { label: "rejected" });
    assert!(!queue.add_job(rejected.clone()));
    assert_eq!(rejected.status(), JobStatus::Pending);

    assert!(queue.remove_job(&first));
    assert!(!queue.is_queue_full());

    let replacement = Job::new(Task { label: "replacement" });
    assert!(queue.add_job(replacement));
    assert_eq!(queue.get_queue_size(), 1);
}

#[test]
fn clear_queue_leaves_the_current_job_running() {
    let processed: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let (queue, release) = gated_queue(10, processed);

    let a = Job::new(Task { label: "a" });
    let b = Job::new(Task { label: "b" });
    let c = Job::new(Task { label: "c" });
    assert!(queue.add_job(a.clone()));
    assert!(queue.add_job(b.clone()));
    assert!(queue.add_job(c.clone()));
    queue.start();

    assert!(wait_until(Duration::from_secs(5), || {
        queue.is_job_processing(&a)
    }));
    queue.clear_queue();
    assert_eq!(queue.get_queue_size(), 0);
    assert_eq!(b.status(), JobStatus::Cancelled);
    assert_eq!(c.status(), JobStatus::Cancelled);
    assert_eq!(a.status(), JobStatus::Processing);

    release.send(()).ok();
    assert!(wait_until(Duration::from_secs(5), || {
        a.status() == JobStatus::Completed
    }));
    queue.stop();
}

#[test]
fn job_ids_are_unique() {
    let seen: Vec<Uuid> = (0..100).map(|_| Job::new(Task { label: "x" }).id()).collect();
    let mut dedup = seen.clone();
    dedup.sort();
    dedup.dedup();
    assert_eq!(seen.len(), dedup.len());
}
