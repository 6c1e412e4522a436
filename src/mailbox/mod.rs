//! Mailbox Transport Module
//!
//! A point-to-point message layer between components. Each mailbox is a typed
//! queue drained by its own task, one message at a time, in arrival order.
//!
//! ## Core Concepts
//! - **Registration**: `MailboxCluster::register` installs an async handler and returns
//!   the owning `Mailbox<M>` guard. Dropping the guard closes the mailbox; messages
//!   already queued are still handled.
//! - **Addressing**: `Address<M>` is a small typed, ordered, copyable id that can be
//!   published in metadata and handed to other components.
//! - **Delivery**: `MailboxCluster::send` is reliable and ordered per sender/receiver pair.
//!   There is no broadcast; callers iterate addresses themselves.

pub mod cluster;
pub mod types;

pub use cluster::{Mailbox, MailboxCluster};
pub use types::{Address, MailboxId};
