//! Host disk and memory usage via `sysinfo`.

use async_trait::async_trait;
use sysinfo::{Disks, System};

use autopilot_core::{HostUsage, PlatformError, PlatformResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoHostUsage;

impl SysinfoHostUsage {
    pub fn new() -> Self {
        Self
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

#[async_trait]
impl HostUsage for SysinfoHostUsage {
    async fn disk_usage_percent(&self) -> PlatformResult<f64> {
        tokio::task::spawn_blocking(|| {
            let disks = Disks::new_with_refreshed_list();
            disks
                .list()
                .iter()
                .map(|d| percent(d.total_space().saturating_sub(d.available_space()), d.total_space()))
                .fold(0.0_f64, f64::max)
        })
        .await
        .map_err(|e| PlatformError::operation("disk_usage_percent", e.to_string()))
    }

    async fn memory_usage_percent(&self) -> PlatformResult<f64> {
        tokio::task::spawn_blocking(|| {
            let mut sys = System::new();
            sys.refresh_memory();
            percent(sys.used_memory(), sys.total_memory())
        })
        .await
        .map_err(|e| PlatformError::operation("memory_usage_percent", e.to_string()))
    }
}
