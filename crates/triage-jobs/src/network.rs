//! Connectivity tracking with a single restore callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{info, warn};

type RestoredCallback = Box<dyn Fn() + Send + Sync>;

/// Tracks connected/disconnected state from external reports.
///
/// Exactly one callback may be registered. It runs once per
/// disconnected → connected transition, on the reporting task.
pub struct NetworkMonitor {
    connected: AtomicBool,
    on_restored: Mutex<Option<RestoredCallback>>,
}

impl NetworkMonitor {
    pub fn new(initially_connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(initially_connected),
            on_restored: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Register the restore callback, replacing any previous one.
    pub fn on_restored<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut slot = self.on_restored.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            warn!(subsystem = "network", "Replacing network restore callback");
        }
        *slot = Some(Box::new(callback));
    }

    /// Record the current connectivity. Returns true if this report restored
    /// the connection.
    pub fn report(&self, connected: bool) -> bool {
        let was_connected = self.connected.swap(connected, Ordering::SeqCst);
        if was_connected == connected {
            return false;
        }
        if !connected {
            warn!(subsystem = "network", "Network connection lost");
            return false;
        }

        info!(subsystem = "network", "Network connection restored");
        let slot = self.on_restored.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(callback) = slot.as_ref() {
            callback();
        }
        true
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting(monitor: &NetworkMonitor) -> Arc<AtomicUsize> {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        monitor.on_restored(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        fired
    }

    #[test]
    fn test_fires_once_per_transition() {
        let monitor = NetworkMonitor::new(false);
        let fired = counting(&monitor);

        assert!(monitor.report(true));
        assert!(!monitor.report(true));
        assert!(!monitor.report(true));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        monitor.report(false);
        monitor.report(true);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_loss_does_not_fire() {
        let monitor = NetworkMonitor::default();
        let fired = counting(&monitor);
        assert!(!monitor.report(false));
        assert!(!monitor.is_connected());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_only_latest_callback_runs() {
        let monitor = NetworkMonitor::new(false);
        let first = counting(&monitor);
        let second = counting(&monitor);

        monitor.report(true);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
