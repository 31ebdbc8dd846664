pub mod metrics;

pub use metrics::MetricsSnapshot;

use std::sync::atomic::{AtomicU64, Ordering};

/// 服务级计数器，只用于观测
pub struct ServiceMetrics {
    sessions_started: AtomicU64,
    sessions_active: AtomicU64,
    sessions_failed: AtomicU64,
    packets_emitted: AtomicU64,
    bytes_emitted: AtomicU64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        ServiceMetrics {
            sessions_started: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            packets_emitted: AtomicU64::new(0),
            bytes_emitted: AtomicU64::new(0),
        }
    }

    pub fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_finished(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn session_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_emitted(&self, bytes: u64) {
        self.packets_emitted.fetch_add(1, Ordering::Relaxed);
        self.bytes_emitted.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            packets_emitted: self.packets_emitted.load(Ordering::Relaxed),
            bytes_emitted: self.bytes_emitted.load(Ordering::Relaxed),
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}
