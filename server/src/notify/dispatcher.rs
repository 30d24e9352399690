use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::{NotificationProvider, NotificationTask, NotifyError};

/// Worker pool and retry policy for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Maximum concurrent provider calls
    pub workers: usize,
    /// Tasks buffered before `dispatch` starts dropping
    pub queue_capacity: usize,
    /// Upper bound on a single provider call
    pub send_timeout: Duration,
    /// Extra attempts after the first failure (0 = no retry)
    pub max_retries: u32,
    /// Base delay between attempts, multiplied by the attempt number
    pub retry_backoff: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            send_timeout: Duration::from_secs(10),
            max_retries: 0,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Submission side of the notification queue. Cheap to clone.
#[derive(Clone)]
pub struct NotificationDispatcher {
    queue: mpsc::Sender<NotificationTask>,
}

/// Owner handle for the dispatcher's background tasks.
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    intake: JoinHandle<()>,
}

impl NotificationDispatcher {
    /// Spawn the intake loop and return the submission handle plus the owner handle.
    /// Must be called inside a tokio runtime.
    pub fn start(
        provider: Arc<dyn NotificationProvider>,
        settings: DispatchSettings,
    ) -> (Self, DispatcherHandle) {
        let (queue, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let intake = tokio::spawn(run_intake(rx, shutdown_rx, provider, settings));
        (Self { queue }, DispatcherHandle { shutdown, intake })
    }

    /// Enqueue a notification without waiting.
    ///
    /// Never blocks: when the queue is full the task is dropped and
    /// `QueueFull` is returned; after shutdown `Closed` is returned.
    pub fn dispatch(&self, task: NotificationTask) -> Result<(), NotifyError> {
        self.queue.try_send(task).map_err(|e| match e {
            TrySendError::Full(task) => {
                tracing::warn!(
                    recipient_id = %task.recipient_id,
                    "Notification queue full, dropping notification"
                );
                NotifyError::QueueFull
            }
            TrySendError::Closed(_) => NotifyError::Closed,
        })
    }
}

impl DispatcherHandle {
    /// Stop accepting tasks, deliver everything already queued, and wait for
    /// in-flight sends to finish (each bounded by the send timeout and retry policy).
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.intake.await {
            tracing::error!(error = %e, "Notification intake task failed");
        }
    }
}

async fn run_intake(
    mut rx: mpsc::Receiver<NotificationTask>,
    mut shutdown_rx: watch::Receiver<bool>,
    provider: Arc<dyn NotificationProvider>,
    settings: DispatchSettings,
) {
    let workers = settings.workers.max(1);
    let permits = Arc::new(Semaphore::new(workers));
    let settings = Arc::new(settings);
    let mut closing = false;

    loop {
        let task = tokio::select! {
            task = rx.recv() => task,
            changed = shutdown_rx.changed(), if !closing => {
                closing = true;
                // An Err means the owner handle was dropped without shutdown;
                // keep serving until every submitter is gone.
                if changed.is_ok() {
                    rx.close();
                }
                continue;
            }
        };
        let Some(task) = task else { break };

        // Waiting here while all workers are busy lets the queue fill up,
        // which is what makes `dispatch` start shedding.
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let provider = provider.clone();
        let settings = settings.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = deliver(provider.as_ref(), &task, &settings).await {
                tracing::warn!(
                    recipient_id = %task.recipient_id,
                    error = %e,
                    "Push notification dropped"
                );
            }
        });
    }

    let _ = permits.acquire_many(workers as u32).await;
    tracing::debug!("Notification dispatcher drained");
}

/// One task through the timeout and retry policy.
async fn deliver(
    provider: &dyn NotificationProvider,
    task: &NotificationTask,
    settings: &DispatchSettings,
) -> Result<(), NotifyError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let result = match timeout(settings.send_timeout, provider.send(task)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout),
        };

        match result {
            Ok(()) => {
                tracing::debug!(
                    recipient_id = %task.recipient_id,
                    attempt,
                    "Push notification sent"
                );
                return Ok(());
            }
            Err(e) if attempt > settings.max_retries => return Err(e),
            Err(e) => {
                tracing::debug!(
                    recipient_id = %task.recipient_id,
                    attempt,
                    error = %e,
                    "Push notification failed, retrying"
                );
                sleep(settings.retry_backoff * attempt).await;
            }
        }
    }
}
