//! C1 — `MemoryMonitor`: system memory reporting and load admission
//! prediction.

use std::sync::Mutex;

use sysinfo::System;

/// A point-in-time memory status snapshot, as returned by
/// [`MemoryMonitor::status`].
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MemoryStatus {
    pub total_gb: f64,
    pub used_gb: f64,
    pub available_gb: f64,
    pub usage_percent: f64,
    pub threshold_percent: f64,
}

/// Reports system memory usage and predicts whether a prospective model
/// load would breach the configured threshold.
///
/// Backed by [`sysinfo`], refreshed on every read. `threshold_percent` is
/// fixed at construction and bounded to `[50, 99]`.
pub struct MemoryMonitor {
    system: Mutex<System>,
    threshold_percent: f64,
}

/// Error returned when a threshold outside `[50, 99]` is supplied.
#[derive(Debug, thiserror::Error)]
#[error("memory threshold {0} out of bounds; must be within [50, 99]")]
pub struct InvalidThreshold(pub f64);

impl MemoryMonitor {
    pub fn new(threshold_percent: f64) -> Result<Self, InvalidThreshold> {
        if !(50.0..=99.0).contains(&threshold_percent) {
            return Err(InvalidThreshold(threshold_percent));
        }
        let mut system = System::new();
        system.refresh_memory();
        Ok(Self {
            system: Mutex::new(system),
            threshold_percent,
        })
    }

    fn refreshed(&self) -> (f64, f64, f64) {
        let mut system = self.system.lock().expect("memory monitor mutex poisoned");
        system.refresh_memory();
        let total_bytes = system.total_memory() as f64;
        let used_bytes = system.used_memory() as f64;
        let total_gb = total_bytes / (1024.0 * 1024.0 * 1024.0);
        let used_gb = used_bytes / (1024.0 * 1024.0 * 1024.0);
        let available_gb = (total_gb - used_gb).max(0.0);
        (total_gb, used_gb, available_gb)
    }

    pub fn total_gb(&self) -> f64 {
        self.refreshed().0
    }

    pub fn used_gb(&self) -> f64 {
        self.refreshed().1
    }

    pub fn available_gb(&self) -> f64 {
        self.refreshed().2
    }

    pub fn usage_percent(&self) -> f64 {
        let (total_gb, used_gb, _) = self.refreshed();
        if total_gb <= 0.0 {
            return 0.0;
        }
        (used_gb / total_gb) * 100.0
    }

    /// Returns true iff loading an additional `estimated_gb` would keep
    /// usage at or below the configured threshold.
    pub fn can_load(&self, estimated_gb: f64) -> bool {
        let (total_gb, used_gb, _) = self.refreshed();
        if total_gb <= 0.0 {
            return false;
        }
        ((used_gb + estimated_gb) / total_gb) * 100.0 <= self.threshold_percent
    }

    pub fn threshold_percent(&self) -> f64 {
        self.threshold_percent
    }

    pub fn status(&self) -> MemoryStatus {
        let (total_gb, used_gb, available_gb) = self.refreshed();
        let usage_percent = if total_gb > 0.0 {
            (used_gb / total_gb) * 100.0
        } else {
            0.0
        };
        MemoryStatus {
            total_gb,
            used_gb,
            available_gb,
            usage_percent,
            threshold_percent: self.threshold_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_boundaries_are_enforced() {
        assert!(MemoryMonitor::new(50.0).is_ok());
        assert!(MemoryMonitor::new(99.0).is_ok());
        assert!(MemoryMonitor::new(49.9).is_err());
        assert!(MemoryMonitor::new(99.1).is_err());
    }

    #[test]
    fn can_load_respects_threshold_arithmetic() {
        let monitor = MemoryMonitor::new(90.0).unwrap();
        let (total_gb, used_gb, _) = monitor.refreshed();
        // An absurdly large request must never fit.
        assert!(!monitor.can_load(total_gb * 10.0));
        // Zero additional usage always fits unless we're already over.
        if (used_gb / total_gb) * 100.0 <= 90.0 {
            assert!(monitor.can_load(0.0));
        }
    }
}
