//! Protocol Capability Module
//!
//! The dispatcher and mirrors are generic over a [`Protocol`]: a fixed set of
//! associated types (store, write, read, read response) plus the two operations that
//! give them meaning. Nothing in the replication core knows what a key or value is.
//!
//! [`kv`] provides the string key/value instance used by the node binary, the admin
//! adapter and the tests.

pub mod kv;

use std::fmt::Debug;

/// The local single-node storage a mirror wraps. Exactly one mirror owns a store.
pub trait Store: Send + 'static {
    type Region: Clone + Debug + PartialEq + Send + Sync + 'static;
    type Key: Clone + Ord + Debug + Send + Sync + 'static;
    type Value: Clone + Debug + PartialEq + Send + Sync + 'static;

    fn region(&self) -> &Self::Region;

    fn get(&self, key: &Self::Key) -> Option<Self::Value>;

    fn put(&mut self, key: Self::Key, value: Self::Value);

    fn delete(&mut self, key: &Self::Key);

    /// Every entry in the store's region, in key order.
    fn scan(&self) -> Vec<(Self::Key, Self::Value)>;

    fn is_empty(&self) -> bool {
        self.scan().is_empty()
    }
}

/// A replication protocol.
pub trait Protocol: Debug + Clone + PartialEq + Eq + Send + Sync + 'static {
    type Store: Store;
    type Write: Debug + Send + Sync + 'static;
    /// Cloneable so a read can be retried against another mirror.
    type Read: Clone + Debug + Send + Sync + 'static;
    type ReadResponse: Debug + Send + 'static;

    /// Applies `write` to `store`. Must be deterministic so every mirror ends up with
    /// the same contents after applying the same sequence.
    fn apply(store: &mut Self::Store, write: &Self::Write);

    /// Answers `read` from the current contents of `store`.
    fn execute(store: &Self::Store, read: &Self::Read) -> Self::ReadResponse;
}

pub type KeyOf<P> = <<P as Protocol>::Store as Store>::Key;
pub type ValueOf<P> = <<P as Protocol>::Store as Store>::Value;
pub type RegionOf<P> = <<P as Protocol>::Store as Store>::Region;

/// One snapshot entry streamed during backfill.
pub type Entry<P> = (KeyOf<P>, ValueOf<P>);
