use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in a region's write history. `zero()` precedes every write.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StateTimestamp(pub u64);

impl StateTimestamp {
    pub const fn zero() -> Self {
        Self(0)
    }

    /// The timestamp immediately after this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StateTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}
