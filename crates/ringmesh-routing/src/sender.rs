//! Asynchronous send facade
//!
//! [`Sender`] hands the caller a placeholder receipt immediately and routes
//! the message on a fixed pool of worker tasks. When routing finishes the
//! placeholder adopts the real receipt and wakes anyone waiting on it.
//!
//! The queue is unbounded: if every worker is busy, jobs pile up. There is
//! no retry here; redundancy comes from the router trying several routes.

use std::sync::Arc;

use ringmesh_core::{Message, ReceiptStatus, SingleReceipt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cloud::Cloud;
use crate::router::Router;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Send,
    Forward,
}

struct Job {
    direction: Direction,
    message: Message,
    placeholder: Arc<SingleReceipt>,
}

/// Worker pool that routes messages in the background
pub struct Sender<C: Cloud> {
    router: Arc<Router<C>>,
    queue: mpsc::UnboundedSender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl<C: Cloud> Sender<C> {
    /// Spawn `workers` routing tasks (at least one)
    pub fn new(router: Arc<Router<C>>, workers: usize) -> Self {
        let (queue, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|id| tokio::spawn(Self::work(id, router.clone(), rx.clone())))
            .collect::<Vec<_>>();
        info!(workers = workers.len(), "Sender started");

        Self {
            router,
            queue,
            workers,
        }
    }

    /// Spawn a pool sized by the router's configuration
    pub fn from_config(router: Arc<Router<C>>) -> Self {
        let workers = router.config().sender_workers;
        Self::new(router, workers)
    }

    pub fn router(&self) -> &Arc<Router<C>> {
        &self.router
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a locally originated message
    pub fn send(&self, message: Message) -> Arc<SingleReceipt> {
        self.submit(Direction::Send, message)
    }

    /// Queue a message received from the network for forwarding
    pub fn forward(&self, message: Message) -> Arc<SingleReceipt> {
        self.submit(Direction::Forward, message)
    }

    fn submit(&self, direction: Direction, message: Message) -> Arc<SingleReceipt> {
        let placeholder = Arc::new(SingleReceipt::placeholder(&message));
        let job = Job {
            direction,
            message,
            placeholder: placeholder.clone(),
        };
        if let Err(mpsc::error::SendError(job)) = self.queue.send(job) {
            warn!(message_id = %job.message.uuid(), "Sender queue closed");
            placeholder.set_status(ReceiptStatus::Failed);
        }
        placeholder
    }

    async fn work(
        id: usize,
        router: Arc<Router<C>>,
        rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    ) {
        loop {
            let job = rx.lock().await.recv().await;
            let Some(job) = job else {
                break;
            };

            let result = match job.direction {
                Direction::Send => router.send(&job.message).await,
                Direction::Forward => router.forward(&job.message).await,
            };
            match result {
                Ok(receipt) => {
                    job.placeholder.update(receipt);
                }
                Err(e) => {
                    warn!(
                        worker = id,
                        message_id = %job.message.uuid(),
                        direction = ?job.direction,
                        error = %e,
                        "Routing failed"
                    );
                    job.placeholder.set_status(ReceiptStatus::Failed);
                }
            }
        }
        debug!(worker = id, "Sender worker stopped");
    }

    /// Stop accepting jobs, drain the queue and wait for the workers
    pub async fn shutdown(self) {
        let Self { queue, workers, .. } = self;
        drop(queue);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Sender worker panicked");
            }
        }
        info!("Sender stopped");
    }
}

impl<C: Cloud> std::fmt::Debug for Sender<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("workers", &self.workers.len())
            .finish()
    }
}
