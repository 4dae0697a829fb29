/// Hardware watchdog feeding
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use log::warn;

/// External deadline timer that resets the device unless acknowledged
/// periodically. Feeding must never block for long and is safe to call from
/// any phase of a session.
pub trait Watchdog: Send + Sync {
    fn feed(&self);
}

/// Feeds a kernel watchdog device node (e.g. /dev/watchdog backed by softdog
/// or a board watchdog). Opening the node arms the timer.
pub struct HardwareWatchdog {
    device: Mutex<File>,
}

impl HardwareWatchdog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let device = OpenOptions::new().write(true).open(path)?;
        Ok(Self {
            device: Mutex::new(device),
        })
    }
}

impl Watchdog for HardwareWatchdog {
    fn feed(&self) {
        let mut device = match self.device.lock() {
            Ok(device) => device,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = device.write_all(b"\0").and_then(|_| device.flush()) {
            warn!("Failed to feed watchdog: {}", e);
        }
    }
}

/// Stand-in when no watchdog device is configured.
pub struct NullWatchdog;

impl Watchdog for NullWatchdog {
    fn feed(&self) {}
}
