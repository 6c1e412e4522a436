use super::types::WriteAck;
use crate::config::DispatcherConfig;
use crate::error::{ClusterError, Result};
use crate::mailbox::{Address, MailboxCluster};
use crate::metadata::SharedView;
use crate::mirror::{DispatcherMetadata, MirrorId, ReadEnvelope, WriteEnvelope};
use crate::protocol::Protocol;
use crate::timestamps::{OrderChecker, OrderToken, StateTimestamp};

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, warn};

/// Everything that must advance together when a write is stamped.
struct StampState {
    timestamp: StateTimestamp,
    checker: OrderChecker,
}

pub struct MirrorDispatcher<P: Protocol> {
    cluster: Arc<MailboxCluster>,
    metadata: SharedView<DispatcherMetadata<P>>,
    stamp: Mutex<StampState>,
    config: DispatcherConfig,
}

impl<P: Protocol> MirrorDispatcher<P> {
    pub fn new(
        cluster: Arc<MailboxCluster>,
        metadata: SharedView<DispatcherMetadata<P>>,
        initial: StateTimestamp,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            metadata,
            stamp: Mutex::new(StampState {
                timestamp: initial,
                checker: OrderChecker::new(),
            }),
            config,
        })
    }

    /// Stamps `write`, sends it to every registered mirror and waits for
    /// `required_acks` of them to apply it.
    pub async fn write(&self, write: P::Write, token: OrderToken) -> Result<WriteAck> {
        let write = Arc::new(write);
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();

        let (timestamp, recipients, delivered) = {
            let mut stamp = self.stamp.lock().await;

            let targets = self.write_targets();
            if targets.is_empty() {
                return Err(ClusterError::NoLiveMirror);
            }
            stamp.checker.check(&token)?;

            let timestamp = stamp.timestamp.next();
            let recipients: Arc<BTreeSet<MirrorId>> =
                Arc::new(targets.iter().map(|(id, _)| id.clone()).collect());

            let mut delivered = 0;
            for (id, address) in &targets {
                let envelope = WriteEnvelope {
                    write: write.clone(),
                    timestamp,
                    recipients: recipients.clone(),
                    ack: ack_tx.clone(),
                };
                match self.cluster.send(address, envelope) {
                    Ok(()) => delivered += 1,
                    Err(e) => warn!("Write {} not delivered to {}: {}", timestamp, id, e),
                }
            }

            // A timestamp nobody received would leave a gap every mirror waits on
            if delivered == 0 {
                return Err(ClusterError::NoLiveMirror);
            }
            stamp.timestamp = timestamp;
            (timestamp, recipients, delivered)
        };
        drop(ack_tx);

        let required = self.config.required_acks.clamp(1, delivered);
        debug!(
            "Write {} sent to {} mirror(s), waiting for {}",
            timestamp, delivered, required
        );

        let mut acked_by: Vec<MirrorId> = Vec::with_capacity(required);
        let collect = async {
            while acked_by.len() < required {
                match ack_rx.recv().await {
                    // A joiner fed by a donor's tail acks too, but was not addressed
                    Some(id) if recipients.contains(&id) && !acked_by.contains(&id) => {
                        acked_by.push(id)
                    }
                    Some(_) => {}
                    // Every envelope was dropped without being applied
                    None => break,
                }
            }
        };
        tokio::time::timeout(self.config.ack_timeout, collect)
            .await
            .map_err(|_| ClusterError::AckTimeout(timestamp))?;

        if acked_by.len() < required {
            warn!(
                "Write {} acknowledged by {} of {} required mirrors",
                timestamp,
                acked_by.len(),
                required
            );
            return Err(ClusterError::NoLiveMirror);
        }

        Ok(WriteAck {
            timestamp,
            acked_by,
        })
    }

    /// Runs `read` on one registered, non-outdated mirror, preferring the highest
    /// published watermark.
    pub async fn read(&self, read: P::Read, token: OrderToken) -> Result<P::ReadResponse> {
        self.check_order(&token).await?;

        let mut candidates: Vec<_> = self
            .metadata
            .get()
            .into_iter()
            .filter_map(|(id, registration)| {
                registration
                    .read_target()
                    .map(|addresses| (registration.watermark, id, addresses.read))
            })
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let mut timed_out = false;
        for (_, id, address) in candidates {
            match self.read_via(&id, &address, read.clone()).await {
                Ok(response) => return Ok(response),
                Err(ClusterError::ReadTimeout) => {
                    warn!("Read timed out on {}", id);
                    timed_out = true;
                }
                Err(e) => debug!("Skipping {} for read: {}", id, e),
            }
        }

        if timed_out {
            Err(ClusterError::ReadTimeout)
        } else {
            Err(ClusterError::NoLiveMirror)
        }
    }

    /// Runs `read` on `mirror` only. Used to read back through the mirror that
    /// acknowledged a write.
    pub async fn read_from(
        &self,
        mirror: &MirrorId,
        read: P::Read,
        token: OrderToken,
    ) -> Result<P::ReadResponse> {
        self.check_order(&token).await?;

        let address = self
            .metadata
            .get()
            .get(mirror)
            .and_then(|registration| registration.read_target().map(|a| a.read))
            .ok_or_else(|| ClusterError::MirrorUnavailable(mirror.clone()))?;

        self.read_via(mirror, &address, read).await
    }

    /// The timestamp of the most recently stamped write.
    pub async fn current_timestamp(&self) -> StateTimestamp {
        self.stamp.lock().await.timestamp
    }

    /// Every registration the dispatcher knows of, retired ones included.
    pub fn mirrors(&self) -> DispatcherMetadata<P> {
        self.metadata.get()
    }

    fn write_targets(&self) -> Vec<(MirrorId, Address<WriteEnvelope<P>>)> {
        self.metadata
            .get()
            .into_iter()
            .filter_map(|(id, registration)| {
                registration
                    .write_target()
                    .map(|addresses| (id, addresses.write))
            })
            .collect()
    }

    async fn check_order(&self, token: &OrderToken) -> Result<()> {
        self.stamp.lock().await.checker.check(token)
    }

    async fn read_via(
        &self,
        mirror: &MirrorId,
        address: &Address<ReadEnvelope<P>>,
        read: P::Read,
    ) -> Result<P::ReadResponse> {
        let (reply, response) = oneshot::channel();
        self.cluster
            .send(address, ReadEnvelope { read, reply })
            .map_err(|_| ClusterError::MirrorUnavailable(mirror.clone()))?;

        match tokio::time::timeout(self.config.read_timeout, response).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClusterError::MirrorUnavailable(mirror.clone())),
            Err(_) => Err(ClusterError::ReadTimeout),
        }
    }
}
