//! Mailbox registry and delivery.
//!
//! Mirrors the handler-registry pattern: handlers are async closures, type-erased and
//! driven by a spawned task per mailbox.

use super::types::{Address, MailboxId};
use crate::error::{ClusterError, Result};

use dashmap::DashMap;
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The set of live mailboxes reachable from this process.
pub struct MailboxCluster {
    /// `MailboxId -> mpsc::UnboundedSender<M>`, erased because each mailbox has its own `M`.
    mailboxes: DashMap<MailboxId, Box<dyn Any + Send + Sync>>,
    next_id: AtomicU64,
}

impl MailboxCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mailboxes: DashMap::new(),
            next_id: AtomicU64::new(0),
        })
    }

    /// Installs `handler` behind a fresh mailbox.
    ///
    /// Messages are handled sequentially. Closing the mailbox refuses new sends, but
    /// every message already queued is still handled before the task ends.
    pub fn register<M, F, Fut>(self: &Arc<Self>, handler: F) -> Mailbox<M>
    where
        M: Send + 'static,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = MailboxId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (sender, mut receiver) = mpsc::unbounded_channel::<M>();
        self.mailboxes.insert(id, Box::new(sender));

        let stop = CancellationToken::new();
        let stopped = stop.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.cancelled() => {
                        receiver.close();
                        break;
                    }
                    message = receiver.recv() => match message {
                        Some(message) => handler(message).await,
                        None => break,
                    },
                }
            }
            while let Some(message) = receiver.recv().await {
                handler(message).await;
            }
            tracing::trace!("Mailbox {} stopped", id);
        });

        tracing::debug!("Registered {}", id);

        Mailbox {
            address: Address::new(id),
            cluster: Arc::downgrade(self),
            stop,
            task: Some(task),
        }
    }

    /// Queues `message` for the mailbox at `address`.
    pub fn send<M: Send + 'static>(&self, address: &Address<M>, message: M) -> Result<()> {
        let id = address.id();
        let entry = self
            .mailboxes
            .get(&id)
            .ok_or(ClusterError::MailboxClosed(id))?;

        let sender = entry
            .value()
            .downcast_ref::<mpsc::UnboundedSender<M>>()
            .ok_or_else(|| {
                ClusterError::precondition(format!("{} does not accept this message type", id))
            })?;

        sender
            .send(message)
            .map_err(|_| ClusterError::MailboxClosed(id))
    }

    pub fn is_alive<M>(&self, address: &Address<M>) -> bool {
        self.mailboxes.contains_key(&address.id())
    }

    pub fn mailbox_count(&self) -> usize {
        self.mailboxes.len()
    }

    fn deregister(&self, id: MailboxId) {
        if self.mailboxes.remove(&id).is_some() {
            tracing::debug!("Deregistered {}", id);
        }
    }
}

/// Owning guard for a registered mailbox. Dropping it closes the mailbox.
pub struct Mailbox<M> {
    address: Address<M>,
    cluster: Weak<MailboxCluster>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<M> Mailbox<M> {
    pub fn address(&self) -> Address<M> {
        self.address
    }

    /// Closes the mailbox and waits until every queued message has been handled.
    pub async fn close(mut self) {
        self.shut();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::error!("Mailbox {} handler task failed: {}", self.address.id(), e);
        }
    }

    fn shut(&self) {
        if let Some(cluster) = self.cluster.upgrade() {
            cluster.deregister(self.address.id());
        }
        self.stop.cancel();
    }
}

impl<M> Drop for Mailbox<M> {
    fn drop(&mut self) {
        self.shut();
    }
}
