//! Error taxonomy for the replication core.
//!
//! - **Precondition violations** are programming errors (e.g. projecting a metadata
//!   member that does not exist). They abort the calling operation and are never retried.
//! - **Interruption** is cooperative cancellation. Loop owners catch it at their own
//!   boundary and treat it as a clean shutdown path.
//! - **Unavailability** covers mirrors or mailboxes that went away underneath an operation.

use crate::mailbox::types::MailboxId;
use crate::mirror::types::MirrorId;
use crate::timestamps::{SourceId, StateTimestamp};
use thiserror::Error;

pub type Result<T, E = ClusterError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("operation interrupted")]
    Interrupted,

    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("mirror {0} is unavailable")]
    MirrorUnavailable(MirrorId),

    #[error("no live mirror available")]
    NoLiveMirror,

    #[error("mailbox {0} is closed")]
    MailboxClosed(MailboxId),

    #[error("out of order token from source {origin} ({tag}): got {got}, last accepted {last}")]
    OutOfOrder {
        origin: SourceId,
        tag: String,
        last: u64,
        got: u64,
    },

    #[error("timed out waiting for acknowledgement of write {0}")]
    AckTimeout(StateTimestamp),

    #[error("timed out waiting for a read response")]
    ReadTimeout,
}

impl ClusterError {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionViolation(message.into())
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}
