//! Dispatcher Module
//!
//! The single stamping point of a region: every write gets the next timestamp and is
//! fanned out to every mirror registered in the metadata view; every read goes to one
//! mirror that is registered and not outdated.
//!
//! ## Write Path
//! 1. Under the dispatcher lock: read the metadata, check the order token, stamp
//!    `current + 1`, send one envelope per target. Holding the lock across the sends
//!    is what makes every mirror receive writes in stamp order.
//! 2. Outside the lock: wait for `required_acks` distinct mirrors to acknowledge.
//!    Stragglers keep their envelope and apply it later; they never block the caller.
//!
//! ## Read Path
//! Candidates are tried in descending published watermark. A mirror whose mailbox is
//! gone, or that drops the reply, is skipped.

pub mod dispatcher;
pub mod types;

pub use dispatcher::MirrorDispatcher;
pub use types::WriteAck;
