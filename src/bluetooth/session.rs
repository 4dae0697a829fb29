/// Scale session state machine
///
/// Drives one full weigh-in cycle: discover, connect, time-sync, request
/// history, collect notifications, decode, select the latest measurement,
/// publish, then wait for the scale to stop advertising. One session at a
/// time; the enclosing loop in `main` runs cycles back to back forever.
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::sleep;

use crate::bluetooth::buffer::{NotificationBuffer, NOTIFICATION_BUFFER_CAPACITY};
use crate::bluetooth::link::{
    DeviceHandle, LinkError, ScaleConnection, ScaleLink, ScanObserver, CHR_BATTERY_LEVEL,
    CHR_CURRENT_TIME, CHR_MEASUREMENT_NOTIFY, CHR_REQUEST_HISTORY, SVC_BATTERY, SVC_CURRENT_TIME,
    SVC_MEASUREMENT,
};
use crate::bluetooth::protocol::{decode_measurement, encode_history_request, encode_time_sync};
use crate::models::{DecodedMeasurement, User};
use crate::mqtt::{operations, TelemetryPublisher};
use crate::status::StatusIndicator;
use crate::utils;
use crate::watchdog::Watchdog;

/// Pause before each drain while collecting. The scale streams history in
/// bursts and misbehaves when polled harder; empirical, not a protocol
/// guarantee.
const DRAIN_PACING_SECS: u64 = 1;
/// Bounded scan window used to detect the scale powering off its advertising.
const DISAPPEARANCE_SCAN_SECS: u64 = 3;
/// Pause between disappearance scans while the scale is still visible.
const DISAPPEARANCE_RECHECK_SECS: u64 = 5;

/// Timing knobs for one weigh-in cycle.
#[derive(Debug, Clone)]
pub struct SessionTiming {
    /// Settle window for the physical weighing to finish before requesting
    /// history.
    pub settle_secs: u64,
    /// Collection window for measurement notifications to arrive.
    pub collect_secs: u64,
}

/// Per-cycle working state, created fresh for every cycle so stale frames
/// from a previous session can never contaminate a new one. The discovered
/// device and the connection are scoped locals of the cycle body.
struct SessionState {
    pending: Arc<NotificationBuffer>,
    decoded: Vec<DecodedMeasurement>,
    canonical: Option<DecodedMeasurement>,
    time_synced: bool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            pending: Arc::new(NotificationBuffer::new(NOTIFICATION_BUFFER_CAPACITY)),
            decoded: Vec::new(),
            canonical: None,
            time_synced: false,
        }
    }
}

/// Feeds the watchdog and animates status on every scan advertisement.
struct ActivityObserver<'a> {
    watchdog: &'a dyn Watchdog,
    status: &'a dyn StatusIndicator,
}

impl ScanObserver for ActivityObserver<'_> {
    fn on_activity(&self) {
        self.watchdog.feed();
        self.status.tick();
    }
}

pub struct ScaleSessionController {
    link: Arc<dyn ScaleLink>,
    publisher: Arc<dyn TelemetryPublisher>,
    watchdog: Arc<dyn Watchdog>,
    status: Arc<dyn StatusIndicator>,
    users: Vec<User>,
    device_name: String,
    root_topic: String,
    timing: SessionTiming,
}

impl ScaleSessionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        link: Arc<dyn ScaleLink>,
        publisher: Arc<dyn TelemetryPublisher>,
        watchdog: Arc<dyn Watchdog>,
        status: Arc<dyn StatusIndicator>,
        users: Vec<User>,
        device_name: String,
        root_topic: String,
        timing: SessionTiming,
    ) -> Self {
        Self {
            link,
            publisher,
            watchdog,
            status,
            users,
            device_name,
            root_topic,
            timing,
        }
    }

    /// Drive one full weigh-in cycle.
    ///
    /// A failed connect returns to discovery without error; the scale only
    /// advertises briefly after someone steps on it, so missed connects are
    /// routine. Transport failures after the connection is established abort
    /// the cycle with the connection released first. The caller's loop is
    /// the retry mechanism either way.
    pub async fn run_cycle(&self) -> Result<(), LinkError> {
        let mut state = SessionState::new();

        let device = self.discover_scale().await?;

        let mut connection = match self.link.connect(&device).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Failed to connect to {}: {}", device.name, e);
                return Ok(());
            }
        };
        info!("Connected to scale: {}", device.name);

        let session_result = self.run_session(connection.as_mut(), &mut state).await;

        // released on every exit path, success and error alike
        if let Err(e) = connection.disconnect().await {
            warn!("Failed to disconnect from {}: {}", device.name, e);
        } else {
            info!("Leaving scale connection");
        }

        session_result?;

        self.wait_for_disappearance().await;
        Ok(())
    }

    async fn discover_scale(&self) -> Result<DeviceHandle, LinkError> {
        info!("Scanning for scale: {}", self.device_name);
        let observer = ActivityObserver {
            watchdog: self.watchdog.as_ref(),
            status: self.status.as_ref(),
        };

        let device = self.link.discover(&self.device_name, &observer).await?;
        self.status.clear();
        // the scale only powers its radio when someone steps on it
        info!("Found scale: {} ({})", device.name, device.address);
        Ok(device)
    }

    async fn run_session(
        &self,
        connection: &mut dyn ScaleConnection,
        state: &mut SessionState,
    ) -> Result<(), LinkError> {
        match self.read_battery_level(connection).await {
            Ok(level) => info!("Scale battery level: {}%", level),
            Err(e) => warn!("Failed to read battery level: {}", e),
        }

        self.update_scale_time(connection, state).await?;

        info!(
            "Weighing takes about {}s to finish...",
            self.timing.settle_secs
        );
        self.wait_feeding(self.timing.settle_secs).await;

        // subscribe before requesting so no frame is lost to timing
        connection
            .subscribe(SVC_MEASUREMENT, CHR_MEASUREMENT_NOTIFY, state.pending.clone())
            .await?;

        self.request_measurement_history(connection).await?;

        info!("Waiting for measurements...");
        self.collect_measurements(state).await;

        state.canonical = select_canonical(&state.decoded).cloned();

        match &state.canonical {
            Some(measurement) => {
                info!(
                    "Latest measurement: participant {} at {}, {:.1} kg",
                    measurement.participant_id, measurement.timestamp, measurement.weight_kg
                );
                self.publish_measurement(measurement).await;
            }
            None => info!("No measurements received."),
        }

        Ok(())
    }

    async fn read_battery_level(
        &self,
        connection: &mut dyn ScaleConnection,
    ) -> Result<u8, LinkError> {
        let payload = connection
            .read_characteristic(SVC_BATTERY, CHR_BATTERY_LEVEL)
            .await?;
        Ok(payload.first().copied().unwrap_or(0))
    }

    /// Write the current time to the scale, at most once per session.
    async fn update_scale_time(
        &self,
        connection: &mut dyn ScaleConnection,
        state: &mut SessionState,
    ) -> Result<(), LinkError> {
        if state.time_synced {
            debug!("Scale time already updated this session, skipping");
            return Ok(());
        }

        let now = utils::local_now();
        connection
            .write_characteristic(SVC_CURRENT_TIME, CHR_CURRENT_TIME, &encode_time_sync(&now))
            .await?;
        state.time_synced = true;
        info!("Updated scale time to: {}", utils::format_datetime(&now));
        Ok(())
    }

    async fn request_measurement_history(
        &self,
        connection: &mut dyn ScaleConnection,
    ) -> Result<(), LinkError> {
        // reference-table order is the request order the device expects
        for user in &self.users {
            debug!("Requesting measurements for participant {}", user.participant_id);
            connection
                .write_characteristic(
                    SVC_MEASUREMENT,
                    CHR_REQUEST_HISTORY,
                    &encode_history_request(user.participant_id),
                )
                .await?;
        }
        Ok(())
    }

    /// Drain the notification buffer once per pacing tick over the collection
    /// window, decoding every frame and skipping the ones that fail.
    async fn collect_measurements(&self, state: &mut SessionState) {
        let mut elapsed = 0;
        while elapsed < self.timing.collect_secs {
            sleep(Duration::from_secs(DRAIN_PACING_SECS)).await;
            self.watchdog.feed();
            self.status.tick();
            elapsed += DRAIN_PACING_SECS;

            for frame in state.pending.drain_all() {
                match decode_measurement(&frame, &self.users) {
                    Ok(measurement) => state.decoded.push(measurement),
                    Err(e) => warn!("Discarding measurement frame: {}", e),
                }
            }
        }
        self.status.clear();
        debug!("Collected {} decodable measurement(s)", state.decoded.len());
    }

    async fn publish_measurement(&self, measurement: &DecodedMeasurement) {
        let now = utils::local_now();
        let messages = operations::measurement_messages(&self.root_topic, measurement, &now);
        if let Err(e) = self.publisher.publish(&messages).await {
            warn!("Failed to publish measurement: {}", e);
        }
    }

    /// Block until the scale disables its BLE advertising, signalling the
    /// end of this weigh-in. Scan failures here end the cycle; the next
    /// cycle's discovery takes over.
    async fn wait_for_disappearance(&self) {
        info!("Waiting for scale to disable BLE advertising...");
        loop {
            match self
                .link
                .device_visible(
                    &self.device_name,
                    Duration::from_secs(DISAPPEARANCE_SCAN_SECS),
                )
                .await
            {
                Ok(false) => {
                    info!("Can't see {} anymore, cycle complete", self.device_name);
                    return;
                }
                Ok(true) => {
                    debug!("{} still visible, waiting...", self.device_name);
                    self.wait_feeding(DISAPPEARANCE_RECHECK_SECS).await;
                }
                Err(e) => {
                    warn!("Disappearance scan failed: {}", e);
                    return;
                }
            }
            self.watchdog.feed();
        }
    }

    /// Sleep in one-second steps, feeding the watchdog and ticking status
    /// between steps; a single long sleep could outlast the watchdog window.
    async fn wait_feeding(&self, seconds: u64) {
        for _ in 0..seconds {
            sleep(Duration::from_secs(1)).await;
            self.watchdog.feed();
            self.status.tick();
        }
        self.status.clear();
    }
}

/// The canonical measurement of a session is the strictly latest by device
/// timestamp; the first decoded wins on ties.
pub fn select_canonical(decoded: &[DecodedMeasurement]) -> Option<&DecodedMeasurement> {
    let mut latest: Option<&DecodedMeasurement> = None;
    for measurement in decoded {
        match latest {
            Some(current) if measurement.timestamp <= current.timestamp => {}
            _ => latest = Some(measurement),
        }
    }
    latest
}
