//! Admin Protocol
//!
//! Endpoint paths and the JSON bodies exchanged with HTTP clients.

use crate::mirror::MirrorId;
use crate::timestamps::StateTimestamp;

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Liveness probe.
pub const ENDPOINT_PING: &str = "/ping";
/// Lists every bucket holding at least one object.
pub const ENDPOINT_BUCKETS: &str = "/riak";
/// Lists the keys of one bucket.
pub const ENDPOINT_BUCKET: &str = "/riak/:bucket";
/// Fetch, store or delete one object.
pub const ENDPOINT_OBJECT: &str = "/riak/:bucket/:key";
/// Mirror registrations and the dispatcher clock.
pub const ENDPOINT_STATS: &str = "/stats";

/// Separates bucket and key in the store key.
pub const KEY_SEPARATOR: char = '/';

/// Store key of `key` in `bucket`.
pub fn object_key(bucket: &str, key: &str) -> String {
    format!("{}{}{}", bucket, KEY_SEPARATOR, key)
}

// --- Data Transfer Objects ---

/// What the store holds for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub content: String,
    pub content_type: String,
    /// Unix time, in milliseconds, of the write that stored this version.
    pub last_written: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreObjectRequest {
    pub content: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreObjectResponse {
    pub success: bool,
    /// Timestamp the dispatcher stamped on the write.
    pub timestamp: Option<StateTimestamp>,
}

impl StoreObjectResponse {
    pub fn failed() -> Self {
        Self {
            success: false,
            timestamp: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchObjectResponse {
    pub bucket: String,
    pub key: String,
    pub object: Option<StoredObject>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListBucketsResponse {
    pub buckets: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BucketResponse {
    pub name: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MirrorStats {
    pub id: MirrorId,
    pub watermark: StateTimestamp,
    pub outdated: bool,
    pub retired: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub timestamp: StateTimestamp,
    pub mirrors: Vec<MirrorStats>,
}
