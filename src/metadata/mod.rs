//! Replicated Metadata Module
//!
//! Cluster-wide facts (which mirrors exist, where their mailboxes live, how far each
//! has applied) are kept in a join semilattice rather than behind a central lock.
//!
//! ## Core Concepts
//! - **Semilattice**: values merge through a commutative, associative, idempotent
//!   `join`. Merging never loses information, so every observer converges.
//! - **Controller / Handle**: one `MetadataController` owns the value; any number of
//!   cloneable `MetadataHandle`s expose `get`, `join` and `subscribe`.
//! - **Member projection**: a view scoped to one entry of a map-valued view. This is
//!   how a mirror publishes its own registration without touching anyone else's.

pub mod member;
pub mod semilattice;
pub mod view;

pub use member::{MemberView, metadata_member, metadata_new_member};
pub use semilattice::Semilattice;
pub use view::{
    ChangeCallback, MetadataController, MetadataHandle, MetadataView, SharedView, Subscription,
};
