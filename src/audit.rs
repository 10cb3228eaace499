use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// One audit trail entry. `target` is the reference number of the entity
/// acted on, `performed_by` the acting user's reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub action: &'static str,
    pub target: String,
    pub performed_by: String,
    pub title: String,
    pub details: String,
}

/// Broadcast hub for the audit trail. Fire-and-forget: records published
/// while nobody is subscribed are dropped.
pub struct AuditLog {
    sender: broadcast::Sender<AuditRecord>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditRecord> {
        self.sender.subscribe()
    }

    /// Publish a record. No-op if nobody is listening.
    pub fn record(&self, record: AuditRecord) {
        let _ = self.sender.send(record);
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
