//! Administrative HTTP Adapter
//!
//! A bucket/object surface over the key/value protocol, in the style of the Riak HTTP
//! API. Every request becomes one dispatcher `read` or `write`; the adapter keeps no
//! state of its own.
//!
//! ## Data Model
//! An object `key` in `bucket` lives in the store under `"{bucket}/{key}"` as a JSON
//! encoded [`protocol::StoredObject`]. Buckets exist implicitly while they hold keys.
//!
//! ## Submodules
//! - **`protocol`**: endpoint paths and request/response DTOs.
//! - **`handlers`**: axum handlers and the router.

pub mod handlers;
pub mod protocol;

pub use handlers::router;

#[cfg(test)]
mod tests;
