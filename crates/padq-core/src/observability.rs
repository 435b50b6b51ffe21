use serde::{Deserialize, Serialize};

/// Point-in-time view of a queue. Racy under concurrency; best effort only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub size: usize,
    pub pending_enqueues: usize,
    pub pending_dequeues: usize,
    pub closed: bool,
}
