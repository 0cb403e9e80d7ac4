use crate::state::AppState;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub hosts_registered: u32,
    pub hosts_reporting: u32,
    pub live_reservations: u32,
    pub streams_allocated: u32,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn get_health(&self, app: &AppState) -> KernelHealth {
        let tracker = app.distributor.tracker();
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            hosts_registered: app.registry.list().len() as u32,
            hosts_reporting: tracker.host_count() as u32,
            live_reservations: tracker.live_reservation_count() as u32,
            streams_allocated: app.distributor.ledger().stream_count() as u32,
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb) = line.split_whitespace().nth(1).and_then(|s| s.parse::<u64>().ok()) {
                        return (kb as f32) / 1024.0; // KB -> MB
                    }
                }
            }
        }
    }

    // inconnu hors Linux
    0.0
}
