//! Recording audit and notification sink

use async_trait::async_trait;
use parking_lot::Mutex;
use reroute_model::{AuditSink, CollaboratorError, LifecycleEvent, NotificationSink};
use std::sync::atomic::{AtomicBool, Ordering};

/// Keeps every event it receives
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LifecycleEvent>>,
    failing: AtomicBool,
}

impl RecordingSink {
    /// Empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail (events are still not recorded)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Recorded events
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    /// Names of recorded events, in order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.kind.name()).collect()
    }

    fn accept(&self, event: &LifecycleEvent) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("sink", "delivery failed"));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: &LifecycleEvent) -> Result<(), CollaboratorError> {
        self.accept(event)
    }
}

#[async_trait]
impl AuditSink for RecordingSink {
    async fn record(&self, event: &LifecycleEvent) -> Result<(), CollaboratorError> {
        self.accept(event)
    }
}
