//! Mirror Module
//!
//! A mirror wraps one store for a region and keeps it in step with the dispatcher.
//!
//! ## Lifecycle
//! `Starting` (backfilling, if asked to) -> `Active` (registered in the metadata view,
//! serving writes and reads) -> `ShuttingDown` -> `Stopped`.
//!
//! ## Core Mechanisms
//! - **Watermark**: the highest timestamp applied. Writes at or below it are
//!   acknowledged and skipped; writes beyond `watermark + 1` wait in a pending buffer
//!   until the gap fills. Application order therefore always equals timestamp order.
//! - **Registration**: a mirror becomes visible to the dispatcher only by joining its
//!   `MirrorRegistration` into the shared metadata, and only once it is fully caught up.
//! - **Backfill**: a joining mirror streams a snapshot from an active donor, while the
//!   donor forwards every later write the dispatcher did not address to the joiner.
//!   See [`backfill`].

pub mod backfill;
pub mod mirror;
pub mod types;

pub use mirror::Mirror;
pub use types::{
    AckSender, BackfillChunk, BackfillRequest, DispatcherMetadata, MirrorAddresses, MirrorId,
    MirrorRegistration, MirrorState, ReadEnvelope, WriteEnvelope,
};

#[cfg(test)]
mod tests;
