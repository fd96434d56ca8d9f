use tokio::sync::broadcast;

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Progress notifications published by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started {
        level_id: String,
    },
    Fetched {
        level_id: String,
        questions: usize,
        skills: usize,
    },
    GroupStored {
        level_id: String,
        skill_id: String,
        count: usize,
    },
    GroupFailed {
        level_id: String,
        skill_id: String,
        error: String,
    },
    Completed {
        level_id: String,
        stored: usize,
        failed_groups: usize,
    },
    Failed {
        level_id: String,
        error: String,
    },
    PlacementTestSaved {
        level_id: String,
        questions: usize,
    },
}

/// Observer registry: every subscriber receives every event published after
/// it subscribed.
#[derive(Clone)]
pub struct SyncEvents {
    tx: broadcast::Sender<SyncEvent>,
}

impl SyncEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers; a no-op when nobody is listening.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for SyncEvents {
    fn default() -> Self {
        Self::new()
    }
}
