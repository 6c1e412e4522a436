use super::backfill::{self, BackfillTail};
use super::types::{
    AckSender, BackfillRequest, DispatcherMetadata, MirrorAddresses, MirrorId, MirrorRegistration,
    MirrorState, ReadEnvelope, WriteEnvelope,
};
use crate::config::MirrorConfig;
use crate::error::{ClusterError, Result};
use crate::mailbox::{Mailbox, MailboxCluster};
use crate::metadata::{MemberView, MetadataView, SharedView, metadata_new_member};
use crate::protocol::{Entry, Protocol, Store};
use crate::signal::{Drainer, Signal};
use crate::timestamps::StateTimestamp;

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

/// Store plus everything that must change together with it.
pub(super) struct MirrorCore<P: Protocol> {
    pub(super) store: P::Store,
    pub(super) watermark: StateTimestamp,
    /// Writes received ahead of `watermark + 1`, or while backfilling.
    pub(super) pending: BTreeMap<StateTimestamp, WriteEnvelope<P>>,
    pub(super) tails: Vec<BackfillTail<P>>,
}

impl<P: Protocol> MirrorCore<P> {
    fn new(store: P::Store) -> Self {
        Self {
            store,
            watermark: StateTimestamp::zero(),
            pending: BTreeMap::new(),
            tails: Vec::new(),
        }
    }

    /// Applies every buffered write that continues the watermark, in order, and
    /// returns the acknowledgement channels of everything consumed.
    fn drain_pending(&mut self, id: &MirrorId, cluster: &MailboxCluster) -> Vec<AckSender> {
        let mut acks = Vec::new();

        while let Some(entry) = self.pending.first_entry() {
            let timestamp = *entry.key();
            if timestamp <= self.watermark {
                // Covered by a snapshot or already applied
                acks.push(entry.remove().ack);
                continue;
            }
            if timestamp != self.watermark.next() {
                break;
            }

            let envelope = entry.remove();
            P::apply(&mut self.store, &envelope.write);
            self.watermark = timestamp;
            tracing::trace!("Mirror {} applied {}", id, timestamp);

            backfill::forward_to_tails(&mut self.tails, &envelope, cluster);
            acks.push(envelope.ack);
        }

        acks
    }
}

/// State reachable from the mailbox handlers.
pub(super) struct MirrorShared<P: Protocol> {
    pub(super) id: MirrorId,
    pub(super) core: Mutex<MirrorCore<P>>,
    pub(super) cluster: Arc<MailboxCluster>,
    pub(super) metadata: SharedView<DispatcherMetadata<P>>,
    pub(super) member: OnceLock<MemberView<MirrorId, MirrorRegistration<P>>>,
    pub(super) outdated: Signal,
    pub(super) state: watch::Sender<MirrorState>,
    pub(super) drainer: Drainer,
    pub(super) config: MirrorConfig,
}

impl<P: Protocol> MirrorShared<P> {
    pub(super) fn state(&self) -> MirrorState {
        *self.state.borrow()
    }

    pub(super) fn set_state(&self, state: MirrorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Mirror {} {:?} -> {:?}", self.id, previous, state);
        }
    }

    async fn handle_write(&self, envelope: WriteEnvelope<P>) {
        let mut core = self.core.lock().await;

        if envelope.timestamp <= core.watermark {
            tracing::trace!(
                "Mirror {} skipping {} at watermark {}",
                self.id,
                envelope.timestamp,
                core.watermark
            );
            self.acknowledge(&envelope.ack);
            return;
        }

        core.pending.entry(envelope.timestamp).or_insert(envelope);

        if self.state() != MirrorState::Starting {
            self.catch_up(&mut core);
        }
        self.check_backlog(&core);
    }

    async fn handle_read(&self, envelope: ReadEnvelope<P>) {
        let response = {
            let core = self.core.lock().await;
            P::execute(&core.store, &envelope.read)
        };

        if envelope.reply.send(response).is_err() {
            tracing::debug!("Mirror {}: reader went away before the reply", self.id);
        }
    }

    /// Applies what the pending buffer allows, publishes the new watermark, then acks.
    pub(super) fn catch_up(&self, core: &mut MirrorCore<P>) {
        let acks = core.drain_pending(&self.id, &self.cluster);
        if acks.is_empty() {
            return;
        }

        self.publish(&MirrorRegistration::with_watermark(core.watermark));
        for ack in &acks {
            self.acknowledge(ack);
        }
    }

    fn acknowledge(&self, ack: &AckSender) {
        // The dispatcher stops listening once it has enough acks
        let _ = ack.send(self.id.clone());
    }

    fn check_backlog(&self, core: &MirrorCore<P>) {
        if core.pending.len() > self.config.max_pending_writes && !self.outdated.is_pulsed() {
            tracing::warn!(
                "Mirror {} has {} writes waiting behind {}; marking outdated",
                self.id,
                core.pending.len(),
                core.watermark
            );
            self.mark_outdated();
        }
    }

    fn mark_outdated(&self) {
        self.outdated.pulse();
        self.publish(&MirrorRegistration {
            outdated: true,
            ..MirrorRegistration::default()
        });
    }

    /// Joins `delta` into this mirror's registration, if it has one yet.
    fn publish(&self, delta: &MirrorRegistration<P>) {
        if let Some(member) = self.member.get() {
            member.join(delta);
        }
    }

    /// Creates the registration entry and makes the mirror visible to dispatchers.
    pub(super) fn register(
        &self,
        addresses: MirrorAddresses<P>,
        watermark: StateTimestamp,
    ) -> Result<()> {
        let member = metadata_new_member(self.id.clone(), self.metadata.clone())?;
        member.join(&MirrorRegistration {
            addresses: Some(addresses),
            watermark,
            outdated: self.outdated.is_pulsed(),
            retired: false,
        });

        if self.member.set(member).is_err() {
            tracing::warn!("Mirror {} registered twice", self.id);
        }
        tracing::info!("Mirror {} registered at {}", self.id, watermark);
        Ok(())
    }

    fn retire(&self) {
        self.outdated.pulse();
        self.publish(&MirrorRegistration::retirement());
    }
}

/// The three mailboxes a mirror serves.
struct MirrorMailboxes<P: Protocol> {
    write: Mailbox<WriteEnvelope<P>>,
    read: Mailbox<ReadEnvelope<P>>,
    backfill: Mailbox<BackfillRequest<P>>,
}

impl<P: Protocol> MirrorMailboxes<P> {
    fn open(shared: &Arc<MirrorShared<P>>) -> Self {
        let cluster = &shared.cluster;

        let writer = shared.clone();
        let write = cluster.register(move |envelope: WriteEnvelope<P>| {
            let shared = writer.clone();
            async move { shared.handle_write(envelope).await }
        });

        let reader = shared.clone();
        let read = cluster.register(move |envelope: ReadEnvelope<P>| {
            let shared = reader.clone();
            async move { shared.handle_read(envelope).await }
        });

        let donor = shared.clone();
        let backfill = cluster.register(move |request: BackfillRequest<P>| {
            let shared = donor.clone();
            async move { shared.serve_backfill(request).await }
        });

        Self {
            write,
            read,
            backfill,
        }
    }

    fn addresses(&self) -> MirrorAddresses<P> {
        MirrorAddresses {
            write: self.write.address(),
            read: self.read.address(),
            backfill: self.backfill.address(),
        }
    }

    async fn close(self) {
        self.write.close().await;
        self.read.close().await;
        self.backfill.close().await;
    }
}

/// One replica of a region.
pub struct Mirror<P: Protocol> {
    shared: Arc<MirrorShared<P>>,
    mailboxes: Option<MirrorMailboxes<P>>,
}

impl<P: Protocol> Mirror<P> {
    /// Starts the first mirror of a region: serves `store` as-is and registers
    /// immediately at `StateTimestamp::zero()`.
    pub fn new(
        store: P::Store,
        cluster: Arc<MailboxCluster>,
        metadata: SharedView<DispatcherMetadata<P>>,
        config: MirrorConfig,
    ) -> Result<Self> {
        let mirror = Self::open(store, cluster, metadata, config);
        let addresses = mirror.addresses_or_closed()?;

        // Active first: a write may arrive as soon as the registration is visible
        mirror.shared.set_state(MirrorState::Active);
        mirror.shared.register(addresses, StateTimestamp::zero())?;
        Ok(mirror)
    }

    /// Starts a mirror that copies its region from the active mirror `source`.
    ///
    /// Returns only once the snapshot and every write dispatched meanwhile are applied
    /// and the mirror is registered. Fails with `MirrorUnavailable` if `source` goes
    /// away first, or `Interrupted` if `interruptor` fires; in both cases nothing is
    /// published.
    pub async fn with_backfill(
        store: P::Store,
        cluster: Arc<MailboxCluster>,
        metadata: SharedView<DispatcherMetadata<P>>,
        source: &MirrorId,
        interruptor: &CancellationToken,
        config: MirrorConfig,
    ) -> Result<Self> {
        let mirror = Self::open(store, cluster, metadata, config);
        let addresses = mirror.addresses_or_closed()?;

        match backfill::join(&mirror.shared, addresses, source, interruptor).await {
            Ok(()) => Ok(mirror),
            Err(e) => {
                tracing::warn!("Mirror {} failed to backfill from {}: {}", mirror.id(), source, e);
                mirror.shared.set_state(MirrorState::Stopped);
                Err(e)
            }
        }
    }

    fn open(
        store: P::Store,
        cluster: Arc<MailboxCluster>,
        metadata: SharedView<DispatcherMetadata<P>>,
        config: MirrorConfig,
    ) -> Self {
        let (state, _) = watch::channel(MirrorState::Starting);
        let shared = Arc::new(MirrorShared {
            id: MirrorId::new(),
            core: Mutex::new(MirrorCore::new(store)),
            cluster,
            metadata,
            member: OnceLock::new(),
            outdated: Signal::new(),
            state,
            drainer: Drainer::new(),
            config,
        });
        let mailboxes = MirrorMailboxes::open(&shared);

        tracing::debug!("Mirror {} created", shared.id);
        Self {
            shared,
            mailboxes: Some(mailboxes),
        }
    }

    fn addresses_or_closed(&self) -> Result<MirrorAddresses<P>> {
        self.addresses()
            .ok_or_else(|| ClusterError::MirrorUnavailable(self.id().clone()))
    }

    pub fn id(&self) -> &MirrorId {
        &self.shared.id
    }

    pub fn state(&self) -> MirrorState {
        self.shared.state()
    }

    /// A receiver that wakes on every lifecycle transition.
    pub fn state_changes(&self) -> watch::Receiver<MirrorState> {
        self.shared.state.subscribe()
    }

    /// Pulsed once this mirror can no longer promise current reads.
    pub fn outdated_signal(&self) -> &Signal {
        &self.shared.outdated
    }

    pub fn addresses(&self) -> Option<MirrorAddresses<P>> {
        self.mailboxes.as_ref().map(MirrorMailboxes::addresses)
    }

    pub async fn watermark(&self) -> StateTimestamp {
        self.shared.core.lock().await.watermark
    }

    /// Writes received but still waiting for an earlier timestamp.
    pub async fn pending_writes(&self) -> usize {
        self.shared.core.lock().await.pending.len()
    }

    pub async fn scan(&self) -> Vec<Entry<P>> {
        self.shared.core.lock().await.store.scan()
    }

    /// Runs `read` against the local store, bypassing any dispatcher.
    pub async fn read_local(&self, read: &P::Read) -> P::ReadResponse {
        let core = self.shared.core.lock().await;
        P::execute(&core.store, read)
    }

    /// Retires the registration, closes the mailboxes and waits for backfill streams
    /// this mirror is serving to finish.
    pub async fn shutdown(mut self) {
        tracing::info!("Mirror {} shutting down", self.id());
        self.shared.set_state(MirrorState::ShuttingDown);
        self.shared.retire();

        if let Some(mailboxes) = self.mailboxes.take() {
            mailboxes.close().await;
        }
        self.shared.drainer.drain().await;

        self.shared.set_state(MirrorState::Stopped);
        tracing::info!("Mirror {} stopped", self.id());
    }
}

impl<P: Protocol> Drop for Mirror<P> {
    fn drop(&mut self) {
        if let Some(mailboxes) = self.mailboxes.take() {
            self.shared.retire();
            drop(mailboxes);
            self.shared.set_state(MirrorState::Stopped);
        }
    }
}
