use crate::mirror::MirrorId;
use crate::timestamps::StateTimestamp;

use serde::Serialize;

/// Returned by a successful dispatcher write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteAck {
    pub timestamp: StateTimestamp,
    /// Distinct mirrors that confirmed the write before the call returned, in
    /// acknowledgement order.
    pub acked_by: Vec<MirrorId>,
}

impl WriteAck {
    /// The mirror that applied the write first; reads routed there observe it.
    pub fn first(&self) -> Option<&MirrorId> {
        self.acked_by.first()
    }
}
