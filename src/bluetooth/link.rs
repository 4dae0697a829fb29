/// BLE transport abstraction and its BlueZ implementation
///
/// The session controller only sees the `ScaleLink`/`ScaleConnection` traits;
/// `BluerLink` is the production implementation and the tests script an
/// in-memory double against the same contract.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Uuid};
use futures_util::{pin_mut, Stream, StreamExt};
use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::bluetooth::buffer::NotificationBuffer;

// Standard GATT services
pub const SVC_BATTERY: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
pub const CHR_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
pub const SVC_CURRENT_TIME: Uuid = Uuid::from_u128(0x00001805_0000_1000_8000_00805f9b34fb);
pub const CHR_CURRENT_TIME: Uuid = Uuid::from_u128(0x00002a2b_0000_1000_8000_00805f9b34fb);

// Vendor measurement service
pub const SVC_MEASUREMENT: Uuid = Uuid::from_u128(0x352e3000_28e9_40b8_a361_6db4cca4147c);
pub const CHR_MEASUREMENT_NOTIFY: Uuid = Uuid::from_u128(0x352e3001_28e9_40b8_a361_6db4cca4147c);
pub const CHR_REQUEST_HISTORY: Uuid = Uuid::from_u128(0x352e3002_28e9_40b8_a361_6db4cca4147c);

/// While the radio is quiet the scan loop still wakes up this often to
/// report activity, so an unbounded scan can never starve the watchdog.
const IDLE_TICK_SECS: u64 = 1;

#[derive(Debug)]
pub enum LinkError {
    AdapterUnavailable(String),
    ScanFailed(String),
    ConnectFailed(String),
    DisconnectFailed(String),
    ServiceNotFound(Uuid),
    CharacteristicNotFound(Uuid),
    ReadFailed(String),
    WriteFailed(String),
    SubscribeFailed(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::AdapterUnavailable(msg) => write!(f, "Bluetooth adapter unavailable: {}", msg),
            LinkError::ScanFailed(msg) => write!(f, "scan failed: {}", msg),
            LinkError::ConnectFailed(msg) => write!(f, "connect failed: {}", msg),
            LinkError::DisconnectFailed(msg) => write!(f, "disconnect failed: {}", msg),
            LinkError::ServiceNotFound(uuid) => write!(f, "GATT service {} not found", uuid),
            LinkError::CharacteristicNotFound(uuid) => {
                write!(f, "GATT characteristic {} not found", uuid)
            }
            LinkError::ReadFailed(msg) => write!(f, "characteristic read failed: {}", msg),
            LinkError::WriteFailed(msg) => write!(f, "characteristic write failed: {}", msg),
            LinkError::SubscribeFailed(msg) => write!(f, "subscribe failed: {}", msg),
        }
    }
}

impl std::error::Error for LinkError {}

/// Handle for a discovered scale: transport address plus advertised name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub address: String,
    pub name: String,
}

/// Callback driven while scanning: once per advertisement seen (matching or
/// not) and at least once per idle second. The controller uses it to feed
/// the watchdog and animate status during the unbounded discovery phase.
pub trait ScanObserver: Send + Sync {
    fn on_activity(&self);
}

#[async_trait]
pub trait ScaleLink: Send + Sync {
    /// Scan until a device advertising `device_name` appears.
    async fn discover(
        &self,
        device_name: &str,
        observer: &dyn ScanObserver,
    ) -> Result<DeviceHandle, LinkError>;

    async fn connect(&self, device: &DeviceHandle) -> Result<Box<dyn ScaleConnection>, LinkError>;

    /// Bounded scan: is the device still advertising within `window`?
    async fn device_visible(
        &self,
        device_name: &str,
        window: Duration,
    ) -> Result<bool, LinkError>;
}

#[async_trait]
pub trait ScaleConnection: Send {
    async fn read_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, LinkError>;

    async fn write_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), LinkError>;

    /// Subscribe to notifications, forwarding every frame into `sink` until
    /// the connection is released.
    async fn subscribe(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        sink: Arc<NotificationBuffer>,
    ) -> Result<(), LinkError>;

    /// Release the connection. Must be called on every exit path from a
    /// session; the forwarding task is torn down here as well.
    async fn disconnect(&mut self) -> Result<(), LinkError>;
}

/// Production link over BlueZ.
pub struct BluerLink {
    adapter: Adapter,
}

impl BluerLink {
    pub async fn new() -> Result<Self, LinkError> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| LinkError::AdapterUnavailable(e.to_string()))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| LinkError::AdapterUnavailable(e.to_string()))?;
        adapter
            .set_powered(true)
            .await
            .map_err(|e| LinkError::AdapterUnavailable(e.to_string()))?;

        Ok(Self { adapter })
    }

    async fn start_discovery(
        &self,
    ) -> Result<impl Stream<Item = AdapterEvent> + Send, LinkError> {
        // Configure discovery for Low Energy devices only
        let filter = DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: false,
            ..Default::default()
        };

        // Apply the discovery filter (warn if it fails, but continue)
        if let Err(e) = self.adapter.set_discovery_filter(filter).await {
            warn!("Failed to set discovery filter: {}", e);
        }

        self.adapter
            .discover_devices()
            .await
            .map_err(|e| LinkError::ScanFailed(e.to_string()))
    }

    /// Advertised name of a device, None when unnamed or gone.
    async fn advertised_name(&self, addr: Address) -> Option<String> {
        let device = self.adapter.device(addr).ok()?;
        device.name().await.ok().flatten()
    }

    /// Check BlueZ's device cache for a currently-advertising match. BlueZ
    /// may know the device from an earlier session without emitting a fresh
    /// DeviceAdded event; the RSSI property is only populated while the
    /// device actually advertises.
    async fn cached_match(&self, device_name: &str) -> Option<DeviceHandle> {
        let addresses = self.adapter.device_addresses().await.ok()?;
        for addr in addresses {
            let Ok(device) = self.adapter.device(addr) else {
                continue;
            };
            if device.rssi().await.ok().flatten().is_none() {
                continue;
            }
            if let Ok(Some(name)) = device.name().await {
                if name == device_name {
                    return Some(DeviceHandle {
                        address: addr.to_string(),
                        name,
                    });
                }
            }
        }
        None
    }
}

#[async_trait]
impl ScaleLink for BluerLink {
    async fn discover(
        &self,
        device_name: &str,
        observer: &dyn ScanObserver,
    ) -> Result<DeviceHandle, LinkError> {
        let events = self.start_discovery().await?;
        pin_mut!(events);

        let mut idle = tokio::time::interval(Duration::from_secs(IDLE_TICK_SECS));
        idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(addr)) => {
                        observer.on_activity();
                        if let Some(name) = self.advertised_name(addr).await {
                            if name == device_name {
                                return Ok(DeviceHandle {
                                    address: addr.to_string(),
                                    name,
                                });
                            }
                        }
                    }
                    Some(_) => {}
                    None => {
                        return Err(LinkError::ScanFailed(
                            "discovery event stream ended".to_string(),
                        ))
                    }
                },
                _ = idle.tick() => {
                    observer.on_activity();
                    if let Some(handle) = self.cached_match(device_name).await {
                        return Ok(handle);
                    }
                }
            }
        }
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<Box<dyn ScaleConnection>, LinkError> {
        let addr: Address = device
            .address
            .parse()
            .map_err(|e| LinkError::ConnectFailed(format!("bad address: {}", e)))?;
        let device = self
            .adapter
            .device(addr)
            .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;
        device
            .connect()
            .await
            .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;

        Ok(Box::new(BluerConnection {
            device,
            notify_task: None,
        }))
    }

    async fn device_visible(
        &self,
        device_name: &str,
        window: Duration,
    ) -> Result<bool, LinkError> {
        let events = self.start_discovery().await?;
        pin_mut!(events);

        if self.cached_match(device_name).await.is_some() {
            return Ok(true);
        }

        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return Ok(false),
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(addr)) => {
                        if self.advertised_name(addr).await.as_deref() == Some(device_name) {
                            return Ok(true);
                        }
                    }
                    Some(_) => {}
                    None => return Ok(false),
                },
            }
        }
    }
}

struct BluerConnection {
    device: bluer::Device,
    notify_task: Option<JoinHandle<()>>,
}

impl BluerConnection {
    async fn find_characteristic(
        &self,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
    ) -> Result<bluer::gatt::remote::Characteristic, LinkError> {
        let services = match self.device.services().await {
            Ok(services) => services,
            Err(e) => {
                warn!("GATT service enumeration failed: {}", e);
                return Err(LinkError::ServiceNotFound(service_uuid));
            }
        };

        for service in services {
            let uuid = match service.uuid().await {
                Ok(uuid) => uuid,
                Err(e) => {
                    warn!("Failed to read service uuid: {}", e);
                    continue;
                }
            };
            if uuid != service_uuid {
                continue;
            }

            let characteristics = match service.characteristics().await {
                Ok(characteristics) => characteristics,
                Err(e) => {
                    warn!("GATT characteristic enumeration failed: {}", e);
                    return Err(LinkError::CharacteristicNotFound(characteristic_uuid));
                }
            };
            for characteristic in characteristics {
                if characteristic.uuid().await.ok() == Some(characteristic_uuid) {
                    return Ok(characteristic);
                }
            }
            return Err(LinkError::CharacteristicNotFound(characteristic_uuid));
        }

        Err(LinkError::ServiceNotFound(service_uuid))
    }
}

#[async_trait]
impl ScaleConnection for BluerConnection {
    async fn read_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, LinkError> {
        let characteristic = self.find_characteristic(service, characteristic).await?;
        characteristic
            .read()
            .await
            .map_err(|e| LinkError::ReadFailed(e.to_string()))
    }

    async fn write_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        let characteristic = self.find_characteristic(service, characteristic).await?;
        characteristic
            .write(payload)
            .await
            .map_err(|e| LinkError::WriteFailed(e.to_string()))
    }

    async fn subscribe(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        sink: Arc<NotificationBuffer>,
    ) -> Result<(), LinkError> {
        let characteristic = self.find_characteristic(service, characteristic).await?;
        let stream = characteristic
            .notify()
            .await
            .map_err(|e| LinkError::SubscribeFailed(e.to_string()))?;

        let task = tokio::spawn(async move {
            pin_mut!(stream);
            while let Some(frame) = stream.next().await {
                sink.push(frame);
            }
            debug!("Notification stream closed");
        });
        self.notify_task = Some(task);

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        if let Some(task) = self.notify_task.take() {
            // dropping the stream cancels the subscription
            task.abort();
        }
        self.device
            .disconnect()
            .await
            .map_err(|e| LinkError::DisconnectFailed(e.to_string()))
    }
}
