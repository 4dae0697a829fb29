pub mod connection;
pub mod operations;

use std::fmt;

use async_trait::async_trait;

/// One message bound for the telemetry bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Debug)]
pub struct PublishError(pub String);

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "publish failed: {}", self.0)
    }
}

impl std::error::Error for PublishError {}

/// Sink for bridge telemetry. Implementations own their retry policy;
/// callers treat publishing as fire-and-forget and only log failures.
#[async_trait]
pub trait TelemetryPublisher: Send + Sync {
    async fn publish(&self, messages: &[TelemetryMessage]) -> Result<(), PublishError>;
}
