/// Console activity feedback for the long-running scan and wait phases
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

const SPINNER: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Visual heartbeat driven by the session controller. Implementations must
/// be cheap; ticks arrive once per advertisement during scans.
pub trait StatusIndicator: Send + Sync {
    /// Advance the activity animation by one step.
    fn tick(&self);
    /// Clear any animation output.
    fn clear(&self);
}

/// Spinner on stdout, overwriting itself in place.
pub struct ConsoleStatus {
    index: AtomicUsize,
}

impl ConsoleStatus {
    pub fn new() -> Self {
        Self {
            index: AtomicUsize::new(0),
        }
    }
}

impl StatusIndicator for ConsoleStatus {
    fn tick(&self) {
        let index = self.index.fetch_add(1, Ordering::Relaxed) % SPINNER.len();
        let mut out = io::stdout();
        let _ = write!(out, "{}\u{8}", SPINNER[index]);
        let _ = out.flush();
    }

    fn clear(&self) {
        let mut out = io::stdout();
        let _ = write!(out, " \u{8}");
        let _ = out.flush();
    }
}

/// No-op indicator for headless runs and tests.
pub struct NullStatus;

impl StatusIndicator for NullStatus {
    fn tick(&self) {}
    fn clear(&self) {}
}
