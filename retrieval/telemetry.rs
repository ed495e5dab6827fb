use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EngineEvent, EventPublisher};
use shared_logging::{JsonlLogger, LogEvent, LogLevel};

/// Builder configuring telemetry for retrieval operations.
pub struct RetrievalTelemetryBuilder {
    source: String,
    log_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl RetrievalTelemetryBuilder {
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
    pub fn build(self) -> Result<RetrievalTelemetry> {
        let logger = self.log_path.map(JsonlLogger::create).transpose()?;
        Ok(RetrievalTelemetry {
            inner: Arc::new(TelemetryInner {
                source: self.source,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle for retrieval operations. Logging and event publication
/// are both best-effort; failures never reach the caller.
#[derive(Clone)]
pub struct RetrievalTelemetry {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    source: String,
    logger: Option<JsonlLogger>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl fmt::Debug for RetrievalTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievalTelemetry")
            .field("source", &self.inner.source)
            .finish()
    }
}

impl RetrievalTelemetry {
    /// Writes a structured log line.
    pub fn log(&self, level: LogLevel, name: &str, payload: Value) {
        if let Some(logger) = &self.inner.logger {
            let event =
                LogEvent::new(&self.inner.source, level, name).with_payload(payload.clone());
            if let Err(err) = logger.log(&event) {
                tracing::warn!(%err, "telemetry log write failed");
            }
        }
        self.publish(name, payload);
    }

    fn publish(&self, kind: &str, payload: Value) {
        let Some(publisher) = &self.inner.publisher else {
            return;
        };
        let event = EngineEvent::new(&self.inner.source, kind, payload);
        // Publication needs an async context; outside one the event is dropped
        // rather than blocking the caller.
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
