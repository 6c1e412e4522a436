use crate::timestamps::StateTimestamp;

use std::collections::{BTreeMap, BTreeSet};

/// A value with a least-upper-bound merge.
///
/// `join` must be commutative, associative and idempotent: joining the same delta
/// twice leaves the value as it was after the first join.
pub trait Semilattice: Clone + PartialEq {
    fn join(&mut self, other: &Self);

    fn joined(mut self, other: &Self) -> Self
    where
        Self: Sized,
    {
        self.join(other);
        self
    }
}

impl Semilattice for StateTimestamp {
    fn join(&mut self, other: &Self) {
        if *other > *self {
            *self = *other;
        }
    }
}

impl Semilattice for u64 {
    fn join(&mut self, other: &Self) {
        *self = (*self).max(*other);
    }
}

impl Semilattice for bool {
    fn join(&mut self, other: &Self) {
        *self |= *other;
    }
}

/// `None` is the bottom element.
impl<T: Semilattice> Semilattice for Option<T> {
    fn join(&mut self, other: &Self) {
        let Some(theirs) = other else {
            return;
        };
        match self {
            Some(ours) => ours.join(theirs),
            None => *self = Some(theirs.clone()),
        }
    }
}

/// Keys are unioned; values present on both sides are joined.
impl<K, V> Semilattice for BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Semilattice,
{
    fn join(&mut self, other: &Self) {
        for (key, theirs) in other {
            match self.get_mut(key) {
                Some(ours) => ours.join(theirs),
                None => {
                    self.insert(key.clone(), theirs.clone());
                }
            }
        }
    }
}

impl<T: Ord + Clone> Semilattice for BTreeSet<T> {
    fn join(&mut self, other: &Self) {
        self.extend(other.iter().cloned());
    }
}
