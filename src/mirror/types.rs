use crate::mailbox::Address;
use crate::metadata::Semilattice;
use crate::protocol::{Entry, Protocol};
use crate::timestamps::StateTimestamp;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Stable identity of one mirror instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MirrorId(pub String);

impl MirrorId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for MirrorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MirrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MirrorState {
    /// Backfilling; not yet registered.
    Starting,
    /// Registered and applying dispatched writes.
    Active,
    ShuttingDown,
    Stopped,
}

/// Channel on which mirrors report that they applied a write.
pub type AckSender = mpsc::UnboundedSender<MirrorId>;

/// A stamped write on its way to a mirror.
pub struct WriteEnvelope<P: Protocol> {
    pub write: Arc<P::Write>,
    pub timestamp: StateTimestamp,
    /// Mirrors the dispatcher sent this write to directly.
    pub recipients: Arc<BTreeSet<MirrorId>>,
    pub ack: AckSender,
}

impl<P: Protocol> Clone for WriteEnvelope<P> {
    fn clone(&self) -> Self {
        Self {
            write: self.write.clone(),
            timestamp: self.timestamp,
            recipients: self.recipients.clone(),
            ack: self.ack.clone(),
        }
    }
}

impl<P: Protocol> fmt::Debug for WriteEnvelope<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteEnvelope")
            .field("write", &self.write)
            .field("timestamp", &self.timestamp)
            .field("recipients", &self.recipients.len())
            .finish()
    }
}

pub struct ReadEnvelope<P: Protocol> {
    pub read: P::Read,
    pub reply: oneshot::Sender<P::ReadResponse>,
}

/// Sent by a joining mirror to its donor.
pub struct BackfillRequest<P: Protocol> {
    pub requester: MirrorId,
    /// Where the donor forwards writes applied after its snapshot.
    pub tail: Address<WriteEnvelope<P>>,
    pub chunks: mpsc::Sender<BackfillChunk<P>>,
}

pub enum BackfillChunk<P: Protocol> {
    Entries(Vec<Entry<P>>),
    /// The snapshot is complete and reflects every write up to `snapshot_at`.
    Done { snapshot_at: StateTimestamp },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorAddresses<P: Protocol> {
    pub write: Address<WriteEnvelope<P>>,
    pub read: Address<ReadEnvelope<P>>,
    pub backfill: Address<BackfillRequest<P>>,
}

impl<P: Protocol> MirrorAddresses<P> {
    fn key(&self) -> (u64, u64, u64) {
        (self.write.id().0, self.read.id().0, self.backfill.id().0)
    }
}

/// A mirror owns its addresses for life, so two registrations of the same mirror
/// never disagree in practice; the larger set of ids wins to keep `join` deterministic.
impl<P: Protocol> Semilattice for MirrorAddresses<P> {
    fn join(&mut self, other: &Self) {
        if other.key() > self.key() {
            *self = other.clone();
        }
    }
}

/// What the metadata view records about one mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRegistration<P: Protocol> {
    pub addresses: Option<MirrorAddresses<P>>,
    /// Highest timestamp the mirror has applied and published.
    pub watermark: StateTimestamp,
    /// The mirror cannot guarantee current reads; route no reads to it.
    pub outdated: bool,
    /// The mirror shut down; route nothing to it.
    pub retired: bool,
}

impl<P: Protocol> Default for MirrorRegistration<P> {
    fn default() -> Self {
        Self {
            addresses: None,
            watermark: StateTimestamp::zero(),
            outdated: false,
            retired: false,
        }
    }
}

impl<P: Protocol> MirrorRegistration<P> {
    pub fn with_watermark(watermark: StateTimestamp) -> Self {
        Self {
            watermark,
            ..Self::default()
        }
    }

    pub fn retirement() -> Self {
        Self {
            outdated: true,
            retired: true,
            ..Self::default()
        }
    }

    /// Addresses to send writes to, if the mirror accepts them.
    pub fn write_target(&self) -> Option<&MirrorAddresses<P>> {
        self.addresses.as_ref().filter(|_| !self.retired)
    }

    /// Addresses to send reads to, if reads may be routed here.
    pub fn read_target(&self) -> Option<&MirrorAddresses<P>> {
        self.write_target().filter(|_| !self.outdated)
    }
}

impl<P: Protocol> Semilattice for MirrorRegistration<P> {
    fn join(&mut self, other: &Self) {
        self.addresses.join(&other.addresses);
        self.watermark.join(&other.watermark);
        self.outdated.join(&other.outdated);
        self.retired.join(&other.retired);
    }
}

/// The value the dispatcher and its mirrors share.
pub type DispatcherMetadata<P> = BTreeMap<MirrorId, MirrorRegistration<P>>;
