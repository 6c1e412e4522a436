//! Logical clocks.
//!
//! - **`StateTimestamp`**: a per-region counter. The dispatcher owns the only
//!   authoritative copy and advances it by one for each accepted write, so mirrors
//!   can order writes and detect duplicates without coordinating clocks.
//! - **`OrderSource` / `OrderToken`**: per-client causal positions. Tokens from one
//!   source are strictly increasing; tokens from different sources are incomparable.
//! - **`OrderChecker`**: held by the dispatcher to reject tokens that arrive out of
//!   order for their source.

pub mod order;
pub mod state;

pub use order::{OrderChecker, OrderSource, OrderToken, SourceId};
pub use state::StateTimestamp;
