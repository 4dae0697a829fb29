/// Topic layout and telemetry publish operations
use async_trait::async_trait;
use time::OffsetDateTime;

use crate::models::DecodedMeasurement;
use crate::mqtt::connection::{publish_with_retry, MqttSettings};
use crate::mqtt::{PublishError, TelemetryMessage, TelemetryPublisher};
use crate::utils::format_datetime;

// Topic suffixes under the configurable root
const BOOT_TIME_TOPIC: &str = "bootTime";
const BOOT_COUNT_TOPIC: &str = "bootCount";
const LOOP_COUNT_TOPIC: &str = "loopCount";
const MEMORY_TOPIC: &str = "memory";
const MEASUREMENT_TOPIC: &str = "measurement";
const MEASUREMENT_TIME_TOPIC: &str = "measurementTime";

fn topic(root: &str, suffix: &str) -> String {
    format!("{}/{}", root, suffix)
}

/// Production publisher backed by the MQTT bus.
pub struct MqttPublisher {
    settings: MqttSettings,
}

impl MqttPublisher {
    pub fn new(settings: MqttSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl TelemetryPublisher for MqttPublisher {
    async fn publish(&self, messages: &[TelemetryMessage]) -> Result<(), PublishError> {
        publish_with_retry(&self.settings, messages).await
    }
}

/// Retained boot telemetry, published once at startup.
pub fn boot_messages(
    root: &str,
    boot_count: u64,
    boot_time: &OffsetDateTime,
) -> Vec<TelemetryMessage> {
    vec![
        TelemetryMessage {
            topic: topic(root, BOOT_TIME_TOPIC),
            payload: format_datetime(boot_time),
            retain: true,
        },
        TelemetryMessage {
            topic: topic(root, BOOT_COUNT_TOPIC),
            payload: boot_count.to_string(),
            retain: true,
        },
    ]
}

/// Per-cycle bookkeeping telemetry. The memory figure is omitted on hosts
/// without procfs.
pub fn cycle_messages(
    root: &str,
    loop_count: u64,
    resident_memory: Option<u64>,
) -> Vec<TelemetryMessage> {
    let mut messages = vec![TelemetryMessage {
        topic: topic(root, LOOP_COUNT_TOPIC),
        payload: loop_count.to_string(),
        retain: true,
    }];

    if let Some(bytes) = resident_memory {
        messages.push(TelemetryMessage {
            topic: topic(root, MEMORY_TOPIC),
            payload: bytes.to_string(),
            retain: true,
        });
    }

    messages
}

/// The canonical measurement record plus its formatted publish time.
pub fn measurement_messages(
    root: &str,
    measurement: &DecodedMeasurement,
    measured_at: &OffsetDateTime,
) -> Vec<TelemetryMessage> {
    let record = serde_json::to_string(measurement)
        .expect("measurement record serialization cannot fail");

    vec![
        TelemetryMessage {
            topic: topic(root, MEASUREMENT_TOPIC),
            payload: record,
            retain: true,
        },
        TelemetryMessage {
            topic: topic(root, MEASUREMENT_TIME_TOPIC),
            payload: format_datetime(measured_at),
            retain: true,
        },
    ]
}
