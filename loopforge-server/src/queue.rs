//! Job queue
//!
//! Background job processing with persistence and recovery. Jobs survive
//! server restarts, progress is debounced onto the event bus, and
//! cancellation is cooperative: a worker observes the CANCELLED status on its
//! next progress tick and unwinds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use loopforge_common::config::ForgeConfig;
use loopforge_common::db::models::{Job, JobStatus, JobType};
use loopforge_common::db::jobs;
use loopforge_common::events::{self, ForgeEvent};
use loopforge_common::{Error, EventBus, Result, Storage};

/// Poll interval of the dispatch loop.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Progress debounce: at most one update per window and per 2-point change,
/// except the terminal 100%.
const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(500);
const PROGRESS_MIN_DELTA: f64 = 2.0;

/// Output-paths map returned by processors.
pub type OutputPaths = HashMap<String, String>;

/// A registered job processor. Runs on a blocking worker thread.
pub type Processor =
    Arc<dyn Fn(&JobContext, &ProgressHandle) -> Result<OutputPaths> + Send + Sync>;

/// A follow-up job a processor asks to have enqueued after it completes.
pub struct FollowUpJob {
    pub job_type: JobType,
    pub input_path: Option<String>,
    pub config: serde_json::Value,
}

/// Minimal execution context handed to a processor.
pub struct JobContext {
    pub id: Uuid,
    pub session_id: Uuid,
    pub input_path: Option<String>,
    pub config: serde_json::Value,
    pub quick_mode: bool,

    pub pool: SqlitePool,
    pub storage: Storage,
    pub event_bus: EventBus,
    runtime: tokio::runtime::Handle,
    followups: Mutex<Vec<FollowUpJob>>,
}

impl JobContext {
    /// Run an async database operation from the blocking worker thread.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Ask for another job to be submitted once this one completes.
    pub fn enqueue_followup(
        &self,
        job_type: JobType,
        input_path: Option<String>,
        config: serde_json::Value,
    ) {
        self.followups
            .lock()
            .expect("followup lock poisoned")
            .push(FollowUpJob {
                job_type,
                input_path,
                config,
            });
    }

    fn take_followups(&self) -> Vec<FollowUpJob> {
        std::mem::take(&mut *self.followups.lock().expect("followup lock poisoned"))
    }
}

/// Progress reporter for one running job.
///
/// Every call re-reads the job row, so cancellation is observed on the next
/// tick no matter how the debounce falls. Database writes and bus events are
/// debounced against the last *emitted* update.
pub struct ProgressHandle {
    pool: SqlitePool,
    event_bus: EventBus,
    job_id: Uuid,
    session_id: Uuid,
    runtime: tokio::runtime::Handle,
    last_emitted: Mutex<Option<(f64, Instant)>>,
}

impl ProgressHandle {
    /// Report progress; returns `Err(Cancelled)` when the job was cancelled.
    pub fn update(&self, progress: f64, stage: &str) -> Result<()> {
        let status = self
            .runtime
            .block_on(jobs::status(&self.pool, self.job_id))?;
        if status == JobStatus::Cancelled {
            return Err(Error::Cancelled);
        }

        {
            let mut last = self.last_emitted.lock().expect("progress lock poisoned");
            if let Some((last_progress, last_time)) = *last {
                let suppressed = progress < 100.0
                    && (last_time.elapsed() < PROGRESS_MIN_INTERVAL
                        || (progress - last_progress).abs() < PROGRESS_MIN_DELTA);
                if suppressed {
                    return Ok(());
                }
            }
            *last = Some((progress, Instant::now()));
        }

        let wrote = self
            .runtime
            .block_on(jobs::update_progress(&self.pool, self.job_id, progress, stage))?;
        if !wrote {
            // Row left RUNNING between the status read and the write
            return Err(Error::Cancelled);
        }

        self.event_bus
            .emit(events::job_progress(self.session_id, self.job_id, progress, stage));
        Ok(())
    }
}

/// Persistent job queue with a bounded background worker pool.
///
/// Cheap to clone: every field is a handle, so the poll loop and the per-job
/// tasks each hold their own copy.
#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    event_bus: EventBus,
    storage: Storage,
    config: ForgeConfig,
    processors: Arc<RwLock<HashMap<JobType, Processor>>>,
    active: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl JobQueue {
    pub fn new(pool: SqlitePool, event_bus: EventBus, storage: Storage, config: ForgeConfig) -> Self {
        Self {
            pool,
            event_bus,
            storage,
            config,
            processors: Arc::new(RwLock::new(HashMap::new())),
            active: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a processor for a job type. Exactly one processor per type;
    /// re-registration replaces.
    pub fn register<F>(&self, job_type: JobType, processor: F)
    where
        F: Fn(&JobContext, &ProgressHandle) -> Result<OutputPaths> + Send + Sync + 'static,
    {
        self.processors
            .write()
            .expect("processor registry lock poisoned")
            .insert(job_type, Arc::new(processor));
    }

    /// Submit a new job. Returns immediately with the job id; processing
    /// happens in the background.
    pub async fn submit(
        &self,
        session_id: Uuid,
        job_type: JobType,
        input_path: Option<String>,
        config: serde_json::Value,
    ) -> Result<Uuid> {
        let job = Job::new(session_id, job_type, input_path, config);
        jobs::insert(&self.pool, &job).await?;

        self.event_bus.emit(ForgeEvent::JobCreated {
            session_id,
            data: serde_json::to_value(&job).unwrap_or_default(),
            timestamp: chrono::Utc::now(),
        });

        Ok(job.id)
    }

    /// Recover interrupted jobs, then start the poll loop.
    pub async fn start(&self) -> Result<()> {
        jobs::recover_interrupted(&self.pool).await?;

        let queue = self.clone();
        tokio::spawn(async move {
            queue.poll_loop().await;
        });

        tracing::info!(workers = self.config.max_workers, "Job queue started");
        Ok(())
    }

    /// Stop the poll loop and wait for in-flight workers to drain.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.active.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tracing::info!("Job queue stopped");
    }

    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    async fn poll_loop(&self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            let active = self.active.load(Ordering::SeqCst);
            if active >= self.config.max_workers {
                continue;
            }

            let claimable = (self.config.max_workers - active) as i64;
            let claimed = match jobs::claim_pending(&self.pool, claimable).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    tracing::error!(error = %e, "Job claim failed");
                    continue;
                }
            };

            for job in claimed {
                self.active.fetch_add(1, Ordering::SeqCst);
                self.event_bus.emit(ForgeEvent::JobStarted {
                    session_id: job.session_id,
                    data: serde_json::json!({
                        "job_id": job.id,
                        "job_type": job.job_type.to_string(),
                    }),
                    timestamp: chrono::Utc::now(),
                });

                let queue = self.clone();
                tokio::spawn(async move {
                    queue.process_job(job).await;
                    queue.active.fetch_sub(1, Ordering::SeqCst);
                });
            }
        }
    }

    /// Run one claimed job to its terminal state.
    async fn process_job(&self, job: Job) {
        let job_id = job.id;
        let session_id = job.session_id;
        let job_type = job.job_type;
        tracing::info!(job_id = %job_id, job_type = %job_type, "Processing job");

        let processor = {
            let registry = self.processors.read().expect("processor registry lock poisoned");
            registry.get(&job_type).cloned()
        };
        let Some(processor) = processor else {
            let message = format!("no processor registered for {job_type}");
            tracing::error!(job_id = %job_id, "{message}");
            self.finish_failed(job_id, session_id, job_type, &message, None).await;
            return;
        };

        let ctx = Arc::new(JobContext {
            id: job_id,
            session_id,
            input_path: job.input_path.clone(),
            config: job.config.clone(),
            quick_mode: self.config.quick_mode,
            pool: self.pool.clone(),
            storage: self.storage.clone(),
            event_bus: self.event_bus.clone(),
            runtime: tokio::runtime::Handle::current(),
            followups: Mutex::new(Vec::new()),
        });
        let progress = ProgressHandle {
            pool: self.pool.clone(),
            event_bus: self.event_bus.clone(),
            job_id,
            session_id,
            runtime: tokio::runtime::Handle::current(),
            last_emitted: Mutex::new(None),
        };

        let worker_ctx = Arc::clone(&ctx);
        let work = tokio::task::spawn_blocking(move || processor(&worker_ctx, &progress));

        let budget = Duration::from_secs(job_type.timeout_seconds());
        let outcome = tokio::time::timeout(budget, work).await;

        match outcome {
            // Processor finished cleanly
            Ok(Ok(Ok(output_paths))) => {
                let completed = jobs::mark_completed(&self.pool, job_id, &output_paths)
                    .await
                    .unwrap_or(false);
                if !completed {
                    tracing::info!(job_id = %job_id, "Job cancelled during execution; skipping completion");
                    return;
                }

                self.event_bus.emit(events::job_completed(
                    session_id,
                    job_id,
                    &job_type.to_string(),
                    output_paths,
                ));
                tracing::info!(job_id = %job_id, "Job completed");

                for followup in ctx.take_followups() {
                    if let Err(e) = self
                        .submit(session_id, followup.job_type, followup.input_path, followup.config)
                        .await
                    {
                        tracing::error!(job_id = %job_id, error = %e, "Follow-up submit failed");
                    }
                }
            }

            // Processor observed cancellation
            Ok(Ok(Err(Error::Cancelled))) => {
                tracing::info!(job_id = %job_id, "Job cancelled during execution");
            }

            // Processor failed
            Ok(Ok(Err(e))) => {
                let traceback = format!("{e:?}");
                self.finish_failed(job_id, session_id, job_type, &e.to_string(), Some(&traceback))
                    .await;
            }

            // Worker thread panicked
            Ok(Err(join_error)) => {
                let message = format!("worker panicked: {join_error}");
                self.finish_failed(job_id, session_id, job_type, &message, None).await;
            }

            // Time budget exceeded. The thread is left to finish; its eventual
            // completion is a no-op because the row is no longer RUNNING.
            Err(_elapsed) => {
                let message = Error::Timeout(budget.as_secs()).to_string();
                self.finish_failed(job_id, session_id, job_type, &message, None).await;
            }
        }
    }

    async fn finish_failed(
        &self,
        job_id: Uuid,
        session_id: Uuid,
        job_type: JobType,
        message: &str,
        traceback: Option<&str>,
    ) {
        let failed = jobs::mark_failed(&self.pool, job_id, message, traceback)
            .await
            .unwrap_or(false);
        if !failed {
            // Cancelled while failing; CANCELLED stays and no event fires
            tracing::info!(job_id = %job_id, "Job left RUNNING before failure write; skipping");
            return;
        }

        tracing::warn!(job_id = %job_id, error = message, "Job failed");
        self.event_bus.emit(events::job_failed(
            session_id,
            job_id,
            Some(job_type.to_string()),
            message.to_string(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopforge_common::db::models::Session;
    use loopforge_common::db::{init_test_database, sessions};
    use tokio::sync::broadcast::error::TryRecvError;

    async fn test_queue(max_workers: usize) -> (Arc<JobQueue>, tempfile::TempDir, Uuid) {
        let pool = init_test_database().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("storage")).unwrap();
        let event_bus = EventBus::new(1024);
        let config = ForgeConfig {
            data_dir: dir.path().to_path_buf(),
            storage_dir: dir.path().join("storage"),
            quick_mode: true,
            max_upload_mb: 250,
            max_workers,
        };

        let session = Session::new("track.wav");
        let session_id = session.id;
        sessions::insert(&pool, &session).await.unwrap();

        let queue = Arc::new(JobQueue::new(pool, event_bus, storage, config));
        (queue, dir, session_id)
    }

    async fn wait_for_status(queue: &JobQueue, job_id: Uuid, expected: JobStatus) -> bool {
        for _ in 0..100 {
            if jobs::status(&queue.pool, job_id).await.unwrap() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<ForgeEvent>) -> Vec<ForgeEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
        events
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_job_runs_to_completion_with_events() {
        let (queue, _dir, session_id) = test_queue(2).await;
        let mut rx = queue.event_bus.subscribe();

        queue.register(JobType::Peaks, |_ctx, progress| {
            progress.update(50.0, "halfway")?;
            progress.update(100.0, "done")?;
            Ok(HashMap::from([("peaks".to_string(), "/tmp/p.dat".to_string())]))
        });
        queue.start().await.unwrap();

        let job_id = queue
            .submit(session_id, JobType::Peaks, None, serde_json::json!({}))
            .await
            .unwrap();

        assert!(wait_for_status(&queue, job_id, JobStatus::Completed).await);
        let job = jobs::get(&queue.pool, job_id).await.unwrap();
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.output_paths.get("peaks").unwrap(), "/tmp/p.dat");

        tokio::time::sleep(Duration::from_millis(100)).await;
        let events = drain(&mut rx);
        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert!(types.contains(&"job.created"));
        assert!(types.contains(&"job.started"));
        assert!(types.contains(&"job.completed"));

        queue.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_emits_job_failed() {
        let (queue, _dir, session_id) = test_queue(1).await;
        let mut rx = queue.event_bus.subscribe();

        queue.register(JobType::Analysis, |_ctx, _progress| {
            Err(Error::AudioDecode("unreadable".to_string()))
        });
        queue.start().await.unwrap();

        let job_id = queue
            .submit(session_id, JobType::Analysis, None, serde_json::json!({}))
            .await
            .unwrap();

        assert!(wait_for_status(&queue, job_id, JobStatus::Failed).await);
        let job = jobs::get(&queue.pool, job_id).await.unwrap();
        assert!(job.error_message.unwrap().contains("unreadable"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| e.event_type() == "job.failed"));
        assert!(!events.iter().any(|e| e.event_type() == "job.completed"));

        queue.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_progress_debounce_bounds_event_count() {
        let (queue, _dir, session_id) = test_queue(1).await;
        let mut rx = queue.event_bus.subscribe();

        // Chatty processor: 90 updates as fast as possible, then terminal 100
        queue.register(JobType::Moments, |_ctx, progress| {
            for p in 10..100 {
                progress.update(p as f64, "chatty")?;
            }
            progress.update(100.0, "done")?;
            Ok(HashMap::new())
        });
        queue.start().await.unwrap();

        let job_id = queue
            .submit(session_id, JobType::Moments, None, serde_json::json!({}))
            .await
            .unwrap();
        assert!(wait_for_status(&queue, job_id, JobStatus::Completed).await);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let progress_events: Vec<f64> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ForgeEvent::JobProgress { data, .. } => Some(data.progress),
                _ => None,
            })
            .collect();

        assert!(
            progress_events.len() < 50,
            "expected debounced stream, got {} events",
            progress_events.len()
        );
        assert_eq!(*progress_events.last().unwrap(), 100.0);

        queue.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancellation_mid_run_is_sticky() {
        let (queue, _dir, session_id) = test_queue(1).await;
        let mut rx = queue.event_bus.subscribe();

        // Processor reports progress in a loop until cancellation unwinds it
        queue.register(JobType::Separation, |_ctx, progress| {
            for p in 0..200 {
                progress.update((p % 99) as f64, "looping")?;
                std::thread::sleep(Duration::from_millis(20));
            }
            Ok(HashMap::new())
        });
        queue.start().await.unwrap();

        let job_id = queue
            .submit(session_id, JobType::Separation, None, serde_json::json!({}))
            .await
            .unwrap();
        assert!(wait_for_status(&queue, job_id, JobStatus::Running).await);

        jobs::cancel(&queue.pool, job_id).await.unwrap();
        assert_eq!(
            jobs::status(&queue.pool, job_id).await.unwrap(),
            JobStatus::Cancelled
        );

        // Give the worker time to observe and unwind
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(
            jobs::status(&queue.pool, job_id).await.unwrap(),
            JobStatus::Cancelled
        );

        let events = drain(&mut rx);
        assert!(!events.iter().any(|e| e.event_type() == "job.completed"));
        assert!(!events.iter().any(|e| e.event_type() == "job.failed"));

        queue.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_pool_is_bounded() {
        let (queue, _dir, session_id) = test_queue(2).await;

        queue.register(JobType::Slicing, |_ctx, progress| {
            progress.update(10.0, "working")?;
            std::thread::sleep(Duration::from_millis(800));
            progress.update(100.0, "done")?;
            Ok(HashMap::new())
        });
        queue.start().await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(
                queue
                    .submit(session_id, JobType::Slicing, None, serde_json::json!({}))
                    .await
                    .unwrap(),
            );
        }

        // While the first batch runs, at most two jobs are RUNNING
        tokio::time::sleep(Duration::from_millis(900)).await;
        let running = jobs::list(&queue.pool, Some(session_id), Some(JobStatus::Running), 50)
            .await
            .unwrap();
        assert!(running.len() <= 2, "pool exceeded: {} running", running.len());

        for id in ids {
            assert!(wait_for_status(&queue, id, JobStatus::Completed).await);
        }
        queue.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_followup_jobs_are_submitted_after_completion() {
        let (queue, _dir, session_id) = test_queue(1).await;

        queue.register(JobType::Separation, |ctx, progress| {
            progress.update(100.0, "done")?;
            ctx.enqueue_followup(JobType::StemAnalysis, None, serde_json::json!({}));
            Ok(HashMap::new())
        });
        queue.register(JobType::StemAnalysis, |_ctx, progress| {
            progress.update(100.0, "done")?;
            Ok(HashMap::new())
        });
        queue.start().await.unwrap();

        let job_id = queue
            .submit(session_id, JobType::Separation, None, serde_json::json!({}))
            .await
            .unwrap();
        assert!(wait_for_status(&queue, job_id, JobStatus::Completed).await);

        // The follow-up appears and completes too
        for _ in 0..100 {
            let done = jobs::list(&queue.pool, Some(session_id), Some(JobStatus::Completed), 50)
                .await
                .unwrap();
            if done.len() == 2 {
                queue.stop().await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("follow-up job never completed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unregistered_job_type_fails() {
        let (queue, _dir, session_id) = test_queue(1).await;
        queue.start().await.unwrap();

        let job_id = queue
            .submit(session_id, JobType::Peaks, None, serde_json::json!({}))
            .await
            .unwrap();
        assert!(wait_for_status(&queue, job_id, JobStatus::Failed).await);
        let job = jobs::get(&queue.pool, job_id).await.unwrap();
        assert!(job.error_message.unwrap().contains("no processor registered"));

        queue.stop().await;
    }
}
