//! Mirror Cluster Library
//!
//! The replication core of a distributed key-value store: a dispatcher that fans
//! writes and reads out to a dynamic set of mirrors, and a backfill protocol that lets
//! a mirror join late without losing or duplicating writes. Membership is coordinated
//! through a replicated semilattice value rather than a central lock.
//!
//! ## Architecture Modules
//! Leaves first:
//!
//! - **`error`**, **`config`**, **`signal`**: error taxonomy, explicit configuration,
//!   one-shot signals and cooperative draining.
//! - **`timestamps`**: per-region state timestamps and per-client order tokens.
//! - **`metadata`**: join semilattices, the controller/handle pair that publishes them,
//!   and member projection.
//! - **`mailbox`**: the in-process transport. Typed addresses, one sequential handler
//!   task per mailbox.
//! - **`protocol`**: the `Protocol`/`Store` capability traits and the key/value
//!   instance.
//! - **`mirror`**: a replica of one region. Applies writes in timestamp order,
//!   registers itself in the metadata, serves and performs backfill.
//! - **`dispatcher`**: stamps writes, broadcasts them, waits for acknowledgements and
//!   routes reads.
//! - **`workload`**: a drain-aware continuous insertion loop.
//! - **`admin`**: the HTTP bucket/object adapter served by the node binary.

pub mod admin;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod mailbox;
pub mod metadata;
pub mod mirror;
pub mod protocol;
pub mod signal;
pub mod timestamps;
pub mod workload;
