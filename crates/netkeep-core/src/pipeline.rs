//! Bounded command execution for the control channel.
//!
//! Commands run on spawned tasks limited by a semaphore. Commands for the
//! same username are chained so they never overlap, and replies are handed
//! to the writer in submission order whatever order the commands finish in.
//!
//! The semaphore and the per-username chains outlive a connection. Each
//! session only opens a fresh reply queue, so commands still running from a
//! dropped session keep their worker permit and block later commands for
//! the same username until they finish.

use crate::dispatch::Dispatcher;
use netkeep_proto::{CommandEnvelope, StatusFrame};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::debug;

type Pending = oneshot::Receiver<Vec<StatusFrame>>;

/// The replies side of the pipeline went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineClosed;

pub struct CommandPipeline {
    dispatcher: Arc<Dispatcher>,
    permits: Arc<Semaphore>,
    /// Completion signal of the latest command per username.
    tails: HashMap<String, oneshot::Receiver<()>>,
    pending: Option<mpsc::Sender<Pending>>,
}

/// Replies in submission order.
pub struct Replies {
    pending: mpsc::Receiver<Pending>,
}

impl CommandPipeline {
    pub fn new(dispatcher: Arc<Dispatcher>, workers: usize) -> Self {
        Self {
            dispatcher,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tails: HashMap::new(),
            pending: None,
        }
    }

    /// Starts a new reply queue holding at most `queue_depth` outstanding
    /// replies. Replies of commands submitted before are no longer delivered.
    pub fn open(&mut self, queue_depth: usize) -> Replies {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        self.pending = Some(tx);
        Replies { pending: rx }
    }

    /// Drops the current reply queue. [`Replies::next`] drains what is left
    /// and then returns `None`.
    pub fn close(&mut self) {
        self.pending = None;
    }

    /// Number of usernames with a command still queued or running.
    pub fn in_flight_users(&mut self) -> usize {
        self.prune();
        self.tails.len()
    }

    fn prune(&mut self) {
        self.tails
            .retain(|_, done| matches!(done.try_recv(), Err(TryRecvError::Empty)));
    }

    /// Queues a command. Waits while `queue_depth` replies are outstanding.
    pub async fn submit(&mut self, cmd: CommandEnvelope) -> Result<(), PipelineClosed> {
        self.prune();

        let pending = self.pending.as_ref().ok_or(PipelineClosed)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        pending.send(reply_rx).await.map_err(|_| PipelineClosed)?;

        let (done_tx, done_rx) = oneshot::channel::<()>();
        let previous = self.tails.insert(cmd.credential.username.clone(), done_rx);
        let dispatcher = Arc::clone(&self.dispatcher);
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            // Dropped on every exit path, releasing the next command for this user.
            let _done = done_tx;
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            debug!(username = %cmd.credential.username, kind = ?cmd.kind, "executing command");
            let frames = dispatcher.execute(cmd).await;
            let _ = reply_tx.send(frames);
        });
        Ok(())
    }
}

impl Replies {
    /// Next batch of frames, or `None` once the queue is closed, reopened or
    /// dropped and then drained. Commands whose task died are skipped.
    pub async fn next(&mut self) -> Option<Vec<StatusFrame>> {
        loop {
            let pending = self.pending.recv().await?;
            if let Ok(frames) = pending.await {
                return Some(frames);
            }
        }
    }
}
