/// MQTT connection handling and bounded-retry publishing
use std::time::Duration;

use log::{debug, error, info};
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use tokio::time::{sleep, timeout};

use crate::mqtt::{PublishError, TelemetryMessage};

const MAX_RETRIES: usize = 5;
const WAIT_BETWEEN_RETRIES_SECS: u64 = 2;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const FLUSH_DELAY_SECS: u64 = 1;
const REQUEST_CHANNEL_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
}

/// Publish a batch of messages, reconnecting between attempts.
///
/// Each attempt opens a fresh connection, publishes every message at QoS 1
/// and disconnects; the bus sees the same short-lived sessions the original
/// battery-powered client produced.
pub async fn publish_with_retry(
    settings: &MqttSettings,
    messages: &[TelemetryMessage],
) -> Result<(), PublishError> {
    let mut last_error = String::new();

    for attempt in 0..MAX_RETRIES {
        match publish_once(settings, messages).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                error!("Publish attempt {} failed: {}", attempt + 1, e);
                last_error = e;
            }
        }

        if attempt < MAX_RETRIES - 1 {
            sleep(Duration::from_secs(WAIT_BETWEEN_RETRIES_SECS)).await;
        }
    }

    Err(PublishError(format!(
        "max retries exceeded: {}",
        last_error
    )))
}

async fn publish_once(
    settings: &MqttSettings,
    messages: &[TelemetryMessage],
) -> Result<(), String> {
    let mut options = MqttOptions::new(
        settings.client_id.clone(),
        settings.host.clone(),
        settings.port,
    );
    options.set_keep_alive(Duration::from_secs(30));
    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        options.set_credentials(username.clone(), password.clone());
    }

    let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

    // wait for the broker to acknowledge the connection before publishing
    loop {
        match timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), event_loop.poll()).await {
            Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => break,
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => return Err(format!("connect failed: {}", e)),
            Err(_) => return Err("connect timed out".to_string()),
        }
    }
    info!("Connected to MQTT server");

    // the event loop must keep being polled for deliveries to make progress
    let driver = tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("MQTT event loop ended: {}", e);
                    break;
                }
            }
        }
    });

    let result = async {
        for message in messages {
            client
                .publish(
                    message.topic.as_str(),
                    QoS::AtLeastOnce,
                    message.retain,
                    message.payload.clone(),
                )
                .await
                .map_err(|e| format!("publish to {} failed: {}", message.topic, e))?;
            info!("Published to MQTT: {} -> {}", message.topic, message.payload);
        }

        // give the broker time to take delivery before tearing down
        sleep(Duration::from_secs(FLUSH_DELAY_SECS)).await;
        client
            .disconnect()
            .await
            .map_err(|e| format!("disconnect failed: {}", e))
    }
    .await;

    let _ = driver.await;
    result
}
