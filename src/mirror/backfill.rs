//! Backfill: how a joining mirror copies its region from an active one.
//!
//! ## Donor (A)
//! On a [`BackfillRequest`], A takes its core lock once. Inside that critical section
//! it scans the store, notes its watermark as `T_snap` and records the joiner as a
//! *tail*. The snapshot then streams in chunks from a drainer task, ending with
//! `Done { snapshot_at: T_snap }`. Every write A applies after the snapshot goes to
//! the joiner's write mailbox unless the dispatcher already addressed the joiner
//! directly. The first write that did address the joiner ends the tail: from then on
//! the dispatcher delivers on its own.
//!
//! ## Joiner (B)
//! B stays `Starting` while the snapshot arrives, so tail writes only accumulate in its
//! pending buffer. After `Done` it sets its watermark to `T_snap`, becomes `Active`,
//! registers at `T_snap` and then replays the buffer (dropping anything at or below
//! `T_snap`), all under its own core lock. No write can be applied in between, and no
//! buffered write is acked before B's registration carries its watermark.

use super::mirror::MirrorShared;
use super::types::{
    BackfillChunk, BackfillRequest, MirrorAddresses, MirrorId, MirrorState, WriteEnvelope,
};
use crate::error::{ClusterError, Result};
use crate::mailbox::{Address, MailboxCluster};
use crate::protocol::{Entry, Protocol, Store};
use crate::signal::{DrainLock, interruptible};
use crate::timestamps::StateTimestamp;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A joiner that still depends on this mirror for post-snapshot writes.
pub(super) struct BackfillTail<P: Protocol> {
    joiner: MirrorId,
    address: Address<WriteEnvelope<P>>,
}

/// Passes an applied write on to every joiner the dispatcher did not address.
pub(super) fn forward_to_tails<P: Protocol>(
    tails: &mut Vec<BackfillTail<P>>,
    envelope: &WriteEnvelope<P>,
    cluster: &MailboxCluster,
) {
    tails.retain(|tail| {
        if envelope.recipients.contains(&tail.joiner) {
            tracing::info!(
                "Joiner {} receives writes directly from {} on",
                tail.joiner,
                envelope.timestamp
            );
            return false;
        }

        match cluster.send(&tail.address, envelope.clone()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropping backfill tail to {}: {}", tail.joiner, e);
                false
            }
        }
    });
}

impl<P: Protocol> MirrorShared<P> {
    /// Donor side: snapshot, start the tail, stream in the background.
    pub(super) async fn serve_backfill(&self, request: BackfillRequest<P>) {
        if self.state() != MirrorState::Active {
            // Dropping the request closes the chunk channel; the joiner fails
            tracing::warn!(
                "Mirror {} refusing backfill for {} while {:?}",
                self.id,
                request.requester,
                self.state()
            );
            return;
        }

        let (entries, snapshot_at) = {
            let mut core = self.core.lock().await;
            core.tails.push(BackfillTail {
                joiner: request.requester.clone(),
                address: request.tail,
            });
            (core.store.scan(), core.watermark)
        };

        tracing::info!(
            "Mirror {} backfilling {} with {} entries as of {}",
            self.id,
            request.requester,
            entries.len(),
            snapshot_at
        );

        let lock = self.drainer.lock();
        let chunk_size = self.config.backfill_chunk_size.max(1);
        let joiner = request.requester;
        let chunks = request.chunks;
        self.drainer.spawn(async move {
            match stream_snapshot::<P>(entries, snapshot_at, &chunks, chunk_size, &lock, &joiner)
                .await
            {
                Ok(()) => tracing::debug!("Snapshot for {} sent", joiner),
                Err(e) if e.is_interrupted() => {
                    tracing::debug!("Snapshot for {} interrupted by shutdown", joiner)
                }
                Err(e) => tracing::warn!("Snapshot for {} abandoned: {}", joiner, e),
            }
        });
    }
}

async fn stream_snapshot<P: Protocol>(
    entries: Vec<Entry<P>>,
    snapshot_at: StateTimestamp,
    chunks: &mpsc::Sender<BackfillChunk<P>>,
    chunk_size: usize,
    lock: &DrainLock,
    joiner: &MirrorId,
) -> Result<()> {
    let mut entries = entries.into_iter();
    loop {
        let chunk: Vec<_> = entries.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        send_chunk(chunks, BackfillChunk::Entries(chunk), lock, joiner).await?;
    }
    send_chunk(chunks, BackfillChunk::Done { snapshot_at }, lock, joiner).await
}

async fn send_chunk<P: Protocol>(
    chunks: &mpsc::Sender<BackfillChunk<P>>,
    chunk: BackfillChunk<P>,
    lock: &DrainLock,
    joiner: &MirrorId,
) -> Result<()> {
    interruptible(lock.drain_signal(), chunks.send(chunk))
        .await?
        .map_err(|_| ClusterError::MirrorUnavailable(joiner.clone()))
}

/// Joiner side. Runs while the mirror is `Starting`; returns once it is registered.
pub(super) async fn join<P: Protocol>(
    shared: &MirrorShared<P>,
    addresses: MirrorAddresses<P>,
    source: &MirrorId,
    interruptor: &CancellationToken,
) -> Result<()> {
    if !shared.core.lock().await.store.is_empty() {
        return Err(ClusterError::precondition(
            "a backfilling mirror must start from an empty store",
        ));
    }

    let donor = shared
        .metadata
        .get()
        .get(source)
        .and_then(|registration| registration.write_target().cloned())
        .ok_or_else(|| ClusterError::MirrorUnavailable(source.clone()))?;

    let (chunks_tx, mut chunks_rx) =
        mpsc::channel(shared.config.backfill_channel_capacity.max(1));
    shared
        .cluster
        .send(
            &donor.backfill,
            BackfillRequest {
                requester: shared.id.clone(),
                tail: addresses.write,
                chunks: chunks_tx,
            },
        )
        .map_err(|_| ClusterError::MirrorUnavailable(source.clone()))?;

    tracing::info!("Mirror {} backfilling from {}", shared.id, source);

    let mut received = 0usize;
    let snapshot_at = loop {
        match interruptible(interruptor, chunks_rx.recv()).await? {
            Some(BackfillChunk::Entries(entries)) => {
                received += entries.len();
                let mut core = shared.core.lock().await;
                for (key, value) in entries {
                    core.store.put(key, value);
                }
            }
            Some(BackfillChunk::Done { snapshot_at }) => break snapshot_at,
            None => return Err(ClusterError::MirrorUnavailable(source.clone())),
        }
    };

    let mut core = shared.core.lock().await;
    core.watermark = snapshot_at;
    shared.set_state(MirrorState::Active);
    // Registered before the replay, so every ack below follows a published watermark
    shared.register(addresses, snapshot_at)?;
    shared.catch_up(&mut core);

    tracing::info!(
        "Mirror {} caught up at {} ({} snapshot entries, snapshot at {})",
        shared.id,
        core.watermark,
        received,
        snapshot_at
    );
    Ok(())
}
