//! Lifecycle event delivery
//!
//! Audit records are awaited with the call timeout; a failed record is
//! logged and the step carries on. Notifications run on their own task and
//! never hold up the state machine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reroute_model::{
    with_timeout, AuditSink, CollaboratorError, EventKind, IncidentId, LifecycleEvent,
    NotificationSink,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Sink that writes events to the log as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl LogSink {
    fn write(event: &LifecycleEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::info!(
                target: "reroute::events",
                incident = %event.incident_id,
                event = event.kind.name(),
                "{}",
                json
            ),
            Err(e) => tracing::warn!(incident = %event.incident_id, "unserializable event: {}", e),
        }
    }
}

#[async_trait]
impl AuditSink for LogSink {
    async fn record(&self, event: &LifecycleEvent) -> Result<(), CollaboratorError> {
        Self::write(event);
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, event: &LifecycleEvent) -> Result<(), CollaboratorError> {
        Self::write(event);
        Ok(())
    }
}

/// Fans events out to the audit and notification sinks
#[derive(Clone)]
pub struct EventEmitter {
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn NotificationSink>,
    timeout: Duration,
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Create an emitter
    #[must_use]
    pub fn new(
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationSink>,
        timeout: Duration,
    ) -> Self {
        Self {
            audit,
            notifier,
            timeout,
        }
    }

    /// Deliver one event
    pub async fn emit(&self, incident: IncidentId, at: DateTime<Utc>, kind: EventKind) {
        let event = LifecycleEvent::new(incident, at, kind);
        metrics::counter!("reroute_events_total", "event" => event.kind.name()).increment(1);

        if event.kind.is_notification() {
            let (notifier, timeout, event) = (Arc::clone(&self.notifier), self.timeout, event.clone());
            tokio::spawn(async move {
                if let Err(e) = with_timeout("notification", timeout, notifier.notify(&event)).await {
                    metrics::counter!("reroute_notification_failures_total").increment(1);
                    tracing::warn!(
                        incident = %event.incident_id,
                        event = event.kind.name(),
                        "notification failed: {}",
                        e
                    );
                }
            });
        }

        if let Err(e) = with_timeout("audit", self.timeout, self.audit.record(&event)).await {
            metrics::counter!("reroute_audit_failures_total").increment(1);
            tracing::warn!(
                incident = %event.incident_id,
                event = event.kind.name(),
                "audit record failed: {}",
                e
            );
        }
    }
}
