use super::semilattice::Semilattice;
use super::view::{ChangeCallback, MetadataView, SharedView, Subscription};
use crate::error::{ClusterError, Result};

use std::collections::BTreeMap;
use std::fmt::Debug;

/// A view of one entry in a map-valued parent view.
///
/// Reads unwrap the entry, joins wrap the delta in a single-entry map, and change
/// notifications are the parent's, forwarded unmodified.
pub struct MemberView<K, V> {
    parent: SharedView<BTreeMap<K, V>>,
    key: K,
}

impl<K, V> MemberView<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K, V> MetadataView<V> for MemberView<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Semilattice + Default + Send + Sync + 'static,
{
    fn get(&self) -> V {
        // Entries are never removed from a semilattice map
        self.parent
            .get()
            .remove(&self.key)
            .unwrap_or_default()
    }

    fn join(&self, delta: &V) {
        let wrapped = BTreeMap::from([(self.key.clone(), delta.clone())]);
        self.parent.join(&wrapped);
    }

    fn subscribe(&self, callback: ChangeCallback) -> Subscription {
        self.parent.subscribe(callback)
    }
}

/// Projects `parent` onto the existing entry `key`.
pub fn metadata_member<K, V>(key: K, parent: SharedView<BTreeMap<K, V>>) -> Result<MemberView<K, V>>
where
    K: Ord + Clone + Debug,
{
    if !parent.get().contains_key(&key) {
        return Err(ClusterError::precondition(format!(
            "metadata member {:?} does not exist",
            key
        )));
    }
    Ok(MemberView { parent, key })
}

/// Inserts a default entry for the absent `key` and projects onto it.
///
/// The only sanctioned way to add an entry.
pub fn metadata_new_member<K, V>(
    key: K,
    parent: SharedView<BTreeMap<K, V>>,
) -> Result<MemberView<K, V>>
where
    K: Ord + Clone + Debug,
    V: Semilattice + Default,
{
    if parent.get().contains_key(&key) {
        return Err(ClusterError::precondition(format!(
            "metadata member {:?} already exists",
            key
        )));
    }
    parent.join(&BTreeMap::from([(key.clone(), V::default())]));
    Ok(MemberView { parent, key })
}
