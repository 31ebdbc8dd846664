use std::fmt;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_started: u64,
    pub sessions_active: u64,
    pub sessions_failed: u64,
    pub packets_emitted: u64,
    pub bytes_emitted: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sessions started={} active={} failed={}, packets={} bytes={}",
            self.sessions_started, self.sessions_active, self.sessions_failed, self.packets_emitted, self.bytes_emitted
        )
    }
}
