use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EngineEvent, EventPublisher};
use shared_logging::{JsonlLogger, LogEvent, LogLevel};

/// Builder configuring telemetry for session lifecycle events.
pub struct SessionTelemetryBuilder {
    source: String,
    log_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl SessionTelemetryBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            log_path: None,
            event_publisher: None,
        }
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Assigns the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Finalizes the builder.
    pub fn build(self) -> Result<SessionTelemetry> {
        let logger = self.log_path.map(JsonlLogger::create).transpose()?;
        Ok(SessionTelemetry {
            inner: Arc::new(TelemetryInner {
                source: self.source,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle for the session manager. Best-effort: neither a failed
/// log write nor a failed event publication reaches the student.
#[derive(Clone)]
pub struct SessionTelemetry {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    source: String,
    logger: Option<JsonlLogger>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl fmt::Debug for SessionTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTelemetry")
            .field("source", &self.inner.source)
            .finish()
    }
}

impl SessionTelemetry {
    /// Writes a structured log line and publishes the matching event.
    pub fn log(&self, level: LogLevel, name: &str, payload: Value) {
        if let Some(logger) = &self.inner.logger {
            let event =
                LogEvent::new(&self.inner.source, level, name).with_payload(payload.clone());
            if let Err(err) = logger.log(&event) {
                tracing::warn!(%err, "telemetry log write failed");
            }
        }
        let Some(publisher) = &self.inner.publisher else {
            return;
        };
        let event = EngineEvent::new(&self.inner.source, name, payload);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let publisher = Arc::clone(publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(event).await {
                    tracing::warn!(%err, "telemetry event publish failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn log_lines_and_events_carry_the_session_payload() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(4));
        let telemetry = SessionTelemetryBuilder::new("sessions.manager")
            .log_path(dir.path().join("sessions.log.jsonl"))
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let mut rx = bus.subscribe();

        telemetry.log(
            LogLevel::Info,
            "practice.session.completed",
            json!({ "answered": 5, "correct": 4 }),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "practice.session.completed");
        assert_eq!(event.payload["correct"], 4);
        let content =
            std::fs::read_to_string(dir.path().join("sessions.log.jsonl")).unwrap();
        assert!(content.contains("practice.session.completed"));
    }
}
