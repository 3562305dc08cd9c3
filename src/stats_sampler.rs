use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::engine::{ContainerEngine, CounterSnapshot};
use crate::file_manager::FileManager;

/// Derived resource usage of one instance at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSample {
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub disk_usage_bytes: u64,
}

impl StatsSample {
    /// Volume size in the panel's storage unit (bytes / 1 024 000).
    pub fn storage_usage(&self) -> f64 {
        self.disk_usage_bytes as f64 / (1024.0 * 1000.0)
    }

    /// `data` payload of a `status` frame. Percentages and storage are sent
    /// as fixed two-decimal strings.
    pub fn to_status_data(&self) -> Value {
        json!({
            "memory": {
                "usage": self.memory_usage,
                "limit": self.memory_limit,
                "percentage": format!("{:.2}", self.memory_percent),
            },
            "cpu": {
                "percentage": format!("{:.2}", self.cpu_percent),
            },
            "storage": {
                "usage": format!("{:.2}", self.storage_usage()),
            },
        })
    }
}

pub fn derive_sample(snapshot: &CounterSnapshot, disk_usage_bytes: u64) -> StatsSample {
    let memory_percent = if snapshot.memory_limit == 0 {
        0.0
    } else {
        round2(snapshot.memory_usage as f64 / snapshot.memory_limit as f64 * 100.0)
    };

    let cpu_delta = snapshot.cpu_total.saturating_sub(snapshot.precpu_total);
    let system_delta = snapshot.system_cpu.saturating_sub(snapshot.presystem_cpu);
    let cpu_percent = if system_delta == 0 {
        0.0
    } else {
        round2(cpu_delta as f64 / system_delta as f64 * snapshot.online_cpus as f64 * 100.0)
    };

    StatsSample {
        memory_usage: snapshot.memory_usage,
        memory_limit: snapshot.memory_limit,
        memory_percent,
        cpu_percent,
        disk_usage_bytes,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Clone)]
pub struct StatsSampler {
    engine: Arc<dyn ContainerEngine>,
    files: Arc<FileManager>,
}

impl StatsSampler {
    pub fn new(engine: Arc<dyn ContainerEngine>, files: Arc<FileManager>) -> Self {
        Self { engine, files }
    }

    /// One sample, or `None` if the container is missing or stopped or any
    /// read fails.
    pub async fn sample(&self, id: &str) -> Option<StatsSample> {
        let (snapshot, disk) = tokio::join!(self.engine.stats(id), self.files.directory_size(id));

        match (snapshot, disk) {
            (Ok(snapshot), Ok(disk)) => Some(derive_sample(&snapshot, disk)),
            (Err(e), _) | (_, Err(e)) => {
                debug!("No stats sample for {}: {}", id, e);
                None
            }
        }
    }
}
