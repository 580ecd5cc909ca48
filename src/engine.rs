//! Top-level engine: owns the two job queues and wires the pipelines and
//! event logs into them.

use serde_json::json;
use std::sync::Arc;

use crate::convert::{ConversionRequest, Converter};
use crate::download::{DownloadRequest, Downloader};
use crate::joblog::EventLog;
use crate::paths::AppPaths;
use crate::queue::{Job, JobQueue, JobRequest, JobStatus};
use crate::Result;

pub const DOWNLOAD_QUEUE_CAPACITY: usize = 100;
pub const CONVERSION_QUEUE_CAPACITY: usize = 50;

pub struct Engine {
    paths: AppPaths,
    downloads: JobQueue<DownloadRequest>,
    conversions: JobQueue<ConversionRequest>,
}

impl Engine {
    /// Build the engine with both queues paused; call `start()` to begin
    /// processing.
    pub fn new(paths: AppPaths) -> Result<Self> {
        paths.ensure_dirs()?;

        let downloader = Arc::new(Downloader::new(paths.clone()));
        let download_log = EventLog::new(&paths.logs_dir(), "downloads");
        let downloads = JobQueue::new("downloads", DOWNLOAD_QUEUE_CAPACITY, move |job| {
            run_logged(&download_log, job, |job| downloader.run(job))
        });

        let converter = Arc::new(Converter::new(paths.clone()));
        let conversion_log = EventLog::new(&paths.logs_dir(), "conversions");
        let conversions = JobQueue::new("conversions", CONVERSION_QUEUE_CAPACITY, move |job| {
            run_logged(&conversion_log, job, |job| converter.run(job))
        });

        Ok(Self {
            paths,
            downloads,
            conversions,
        })
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn start(&self) {
        self.downloads.start();
        self.conversions.start();
    }

    /// Stop both workers; pending jobs stay queued in memory until drop.
    pub fn shutdown(&self) {
        self.downloads.stop();
        self.conversions.stop();
    }

    pub fn downloads(&self) -> &JobQueue<DownloadRequest> {
        &self.downloads
    }

    pub fn conversions(&self) -> &JobQueue<ConversionRequest> {
        &self.conversions
    }

    /// Queue a download; `None` when the queue is at capacity.
    pub fn enqueue_download(&self, request: DownloadRequest) -> Option<Job<DownloadRequest>> {
        let job = Job::new(request);
        if self.downloads.add_job(job.clone()) {
            Some(job)
        } else {
            None
        }
    }

    /// Queue a conversion; `None` when the queue is at capacity.
    pub fn enqueue_conversion(&self, request: ConversionRequest) -> Option<Job<ConversionRequest>> {
        let job = Job::new(request);
        if self.conversions.add_job(job.clone()) {
            Some(job)
        } else {
            None
        }
    }
}

/// Run one pipeline callback with start/outcome events around it. Logging
/// failures never fail the job.
fn run_logged<R: JobRequest>(
    log: &EventLog,
    job: &Job<R>,
    run: impl Fn(&Job<R>) -> Result<()>,
) -> Result<()> {
    let _ = log.log("info", "job_started", json!({ "id": job.id().to_string() }));
    let outcome = run(job);
    match &outcome {
        Ok(()) => {
            let event = if job.status() == JobStatus::Cancelled {
                "job_cancelled"
            } else {
                "job_completed"
            };
            let _ = log.log(
                "info",
                event,
                json!({ "id": job.id().to_string(), "title": job.title() }),
            );
        }
        Err(err) => {
            let event = if matches!(err, crate::EngineError::Canceled) {
                "job_cancelled"
            } else {
                "job_failed"
            };
            let level = if event == "job_failed" { "error" } else { "info" };
            let _ = log.log(
                level,
                event,
                json!({
                    "id": job.id().to_string(),
                    "title": job.title(),
                    "error": err.to_string(),
                }),
            );
        }
    }
    outcome
}
