//! Application lifecycle
//!
//! Owns every shared resource (pool, clients, dispatch channel, cancellation
//! token), wires the scanner to the worker pool, and tears everything down
//! in order on shutdown: scanner first, then workers after they finish their
//! current id, then the store.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::{self, DbPool, FileStatus, MediaFileRepository};
use crate::services::llm::{LlmClient, LlmConfig};
use crate::services::processor::MediaProcessor;
use crate::services::scanner::{ScanConfig, Scanner};
use crate::services::status_manager::{StatusManager, Transition};
use crate::services::tmdb::{TmdbClient, TmdbConfig};

const DISPATCH_QUEUE_MIN_CAPACITY: usize = 64;
const DB_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Admin-facing seam: read access plus retry (guarded transition + enqueue).
#[derive(Clone)]
pub struct PipelineHandle {
    queue_tx: mpsc::Sender<i64>,
    status: StatusManager,
    files: MediaFileRepository,
}

impl PipelineHandle {
    /// Re-queue a terminally failed file. Applies only to FAILED, NO_MATCH
    /// and CONFLICT rows; anything else reports `Stale` and nothing happens.
    pub async fn retry(&self, id: i64) -> Result<Transition> {
        let transition = self.status.retry(id).await?;
        if transition.applied() {
            // A retry joins the tail of the queue; closed channel only means
            // shutdown is in progress and the next scan will pick the row up
            if self.queue_tx.send(id).await.is_err() {
                warn!(media_file_id = id, "Queue closed, retry will be picked up by a later scan");
            } else {
                info!(media_file_id = id, "Retry enqueued");
            }
        }
        Ok(transition)
    }

    pub fn files(&self) -> &MediaFileRepository {
        &self.files
    }
}

/// Running application: scanner, worker pool, and their shared state.
pub struct App {
    pool: DbPool,
    handle: PipelineHandle,
    cancel: CancellationToken,
    scanner_task: JoinHandle<()>,
    worker_tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Open the store, spawn the scanner and the worker pool.
    pub async fn start(config: Config) -> Result<Self> {
        let pool = db::connect_with_retry(&config.database_url, DB_CONNECT_TIMEOUT).await?;
        db::init_schema(&pool).await?;
        info!(database = %config.database_url, "Database ready");

        let files = MediaFileRepository::new(pool.clone());
        let status = StatusManager::new(pool.clone());

        let llm = Arc::new(LlmClient::new(LlmConfig {
            api_base: config.openai_api_base.clone(),
            api_key: config.openai_api_key.clone(),
            model: config.openai_model.clone(),
            timeout_seconds: 30,
            enabled: config.enable_llm,
        }));
        let tmdb = Arc::new(TmdbClient::new(TmdbConfig {
            api_key: config.tmdb_api_key.clone(),
            language: config.tmdb_language.clone(),
            concurrency: config.tmdb_concurrency,
            enabled: config.enable_tmdb,
            ..Default::default()
        }));

        let processor = Arc::new(MediaProcessor::new(
            files.clone(),
            status.clone(),
            llm,
            tmdb,
            config.target_dir.clone(),
        ));

        let capacity = config.worker_count.max(DISPATCH_QUEUE_MIN_CAPACITY);
        let (queue_tx, queue_rx) = mpsc::channel::<i64>(capacity);
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let cancel = CancellationToken::new();

        let mut worker_tasks = Vec::with_capacity(config.worker_count);
        for worker in 0..config.worker_count {
            worker_tasks.push(tokio::spawn(worker_loop(
                worker + 1,
                queue_rx.clone(),
                processor.clone(),
                cancel.clone(),
            )));
        }
        info!(worker_count = config.worker_count, capacity, "Worker pool started");

        // Ids lost with a previous process are still PENDING; put them back
        // on the queue before the first scan re-discovers anything
        let pending = files.list_with_status(FileStatus::Pending).await?;
        if !pending.is_empty() {
            info!(count = pending.len(), "Re-enqueueing files left pending");
            for record in &pending {
                if queue_tx.send(record.id).await.is_err() {
                    break;
                }
            }
        }

        let scanner = Scanner::new(
            files.clone(),
            ScanConfig::from_config(&config),
            Duration::from_secs(config.scan_interval_seconds),
            queue_tx.clone(),
            cancel.clone(),
        );
        let scanner_task = tokio::spawn(scanner.run());

        Ok(Self {
            pool,
            handle: PipelineHandle {
                queue_tx,
                status,
                files,
            },
            cancel,
            scanner_task,
            worker_tasks,
        })
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Signal shutdown and wait for the scanner and all workers to exit
    /// before closing the store.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down");
        self.cancel.cancel();

        if let Err(e) = self.scanner_task.await {
            warn!(error = %e, "Scanner task ended abnormally");
        }
        for task in self.worker_tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }

        self.pool.close().await;
        info!("Shutdown complete");
        Ok(())
    }

    /// Start, wait for ctrl-c, shut down.
    pub async fn run(config: Config) -> Result<()> {
        let app = Self::start(config).await?;
        tokio::signal::ctrl_c().await?;
        app.shutdown().await
    }
}

/// Long-running worker: pull one id at a time, run the pipeline, survive
/// anything it throws.
async fn worker_loop(
    worker: usize,
    queue_rx: Arc<Mutex<mpsc::Receiver<i64>>>,
    processor: Arc<MediaProcessor>,
    cancel: CancellationToken,
) {
    info!(worker, "Worker started");

    loop {
        let id = {
            let mut rx = queue_rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                id = rx.recv() => id,
            }
        };
        let Some(id) = id else { break };

        match AssertUnwindSafe(processor.process(id, &cancel))
            .catch_unwind()
            .await
        {
            Ok(Ok(outcome)) => {
                debug!(worker, media_file_id = id, outcome = ?outcome, "Pipeline finished");
            }
            Ok(Err(e)) => {
                warn!(worker, media_file_id = id, error = %e, "Pipeline errored");
            }
            Err(_) => {
                warn!(worker, media_file_id = id, "Pipeline panicked");
                processor.fail_panicked(id).await;
            }
        }
    }

    info!(worker, "Worker stopped");
}
