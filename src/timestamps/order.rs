use crate::error::{ClusterError, Result};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Identity of one `OrderSource` instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of one operation in the order issued by a single source.
///
/// The `tag` only labels the call site for diagnostics. Two tokens compare only
/// when they come from the same source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderToken {
    source: Option<SourceId>,
    tag: String,
    value: u64,
}

impl OrderToken {
    /// A token that opts out of per-source ordering. Used by callers whose
    /// operations have no causal relation to one another.
    pub fn unordered() -> Self {
        Self {
            source: None,
            tag: String::new(),
            value: 0,
        }
    }

    pub fn source(&self) -> Option<&SourceId> {
        self.source.as_ref()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

impl PartialOrd for OrderToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (&self.source, &other.source) {
            (Some(a), Some(b)) if a == b => Some(self.value.cmp(&other.value)),
            _ => None,
        }
    }
}

/// Issues strictly increasing tokens for one logical client.
#[derive(Debug)]
pub struct OrderSource {
    id: SourceId,
    counter: AtomicU64,
}

impl OrderSource {
    pub fn new() -> Self {
        Self {
            id: SourceId::new(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    /// Returns a token after every token previously issued by this source.
    pub fn check_in(&self, tag: &str) -> OrderToken {
        let value = self.counter.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        OrderToken {
            source: Some(self.id.clone()),
            tag: tag.to_string(),
            value,
        }
    }
}

impl Default for OrderSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Remembers the last accepted token per source.
#[derive(Debug, Default)]
pub struct OrderChecker {
    last_seen: HashMap<SourceId, u64>,
}

impl OrderChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `token` if it is strictly after the last token accepted from its source.
    pub fn check(&mut self, token: &OrderToken) -> Result<()> {
        let Some(source) = &token.source else {
            return Ok(());
        };

        match self.last_seen.get_mut(source) {
            Some(last) if token.value <= *last => Err(ClusterError::OutOfOrder {
                origin: source.clone(),
                tag: token.tag.clone(),
                last: *last,
                got: token.value,
            }),
            Some(last) => {
                *last = token.value;
                Ok(())
            }
            None => {
                self.last_seen.insert(source.clone(), token.value);
                Ok(())
            }
        }
    }

    pub fn tracked_sources(&self) -> usize {
        self.last_seen.len()
    }
}
