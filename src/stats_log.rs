//! Rolling log of host-level resource snapshots persisted as JSON.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sysinfo::System;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{AgentError, AgentResult};

/// Entries older than this are pruned on every write.
const MAX_AGE_SECS: i64 = 50 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStat {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "RamMax")]
    pub ram_max: String,
    #[serde(rename = "Ram")]
    pub ram: String,
    #[serde(rename = "CoresMax")]
    pub cores_max: usize,
    #[serde(rename = "Cores")]
    pub cores: String,
}

/// Samples host memory and CPU. CPU usage needs two refreshes, so this
/// blocks for sysinfo's minimum update interval on the blocking pool.
pub async fn capture_system_stat() -> AgentResult<SystemStat> {
    tokio::task::spawn_blocking(|| {
        let mut system = System::new_all();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_cpu_usage();
        system.refresh_memory();

        let mib = |bytes: u64| bytes as f64 / (1024.0 * 1024.0);
        SystemStat {
            timestamp: Utc::now(),
            ram_max: format!("{:.2} MB", mib(system.total_memory())),
            ram: format!("{:.2} MB", mib(system.used_memory())),
            cores_max: system.cpus().len(),
            cores: format!("{:.2}%", system.global_cpu_usage()),
        }
    })
    .await
    .map_err(|e| AgentError::InternalError(format!("Stats capture panicked: {}", e)))
}

pub struct StatsLog {
    path: PathBuf,
    entries: Mutex<Vec<SystemStat>>,
}

impl StatsLog {
    /// Loads the retained history from `path`, dropping unreadable or expired
    /// entries. A missing or corrupt file starts an empty log.
    pub async fn open(path: PathBuf) -> AgentResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AgentError::FileSystemError(format!("Failed to create {:?}: {}", parent, e))
            })?;
        }

        let mut entries = load_entries(&path).await;
        prune(&mut entries, Utc::now());
        info!("Loaded {} system stats entries from {:?}", entries.len(), path);

        let log = Self {
            path,
            entries: Mutex::new(Vec::new()),
        };
        log.persist(&entries).await?;
        *log.entries.lock().await = entries;
        Ok(log)
    }

    pub async fn record(&self, stat: SystemStat) -> AgentResult<()> {
        let mut entries = self.entries.lock().await;
        entries.push(stat);
        prune(&mut entries, Utc::now());
        self.persist(&entries).await
    }

    /// Captures a host snapshot and appends it.
    pub async fn record_current(&self) -> AgentResult<SystemStat> {
        let stat = capture_system_stat().await?;
        self.record(stat.clone()).await?;
        debug!("Recorded system stats: {} / {}, CPU {}", stat.ram, stat.ram_max, stat.cores);
        Ok(stat)
    }

    pub async fn history(&self) -> Vec<SystemStat> {
        self.entries.lock().await.clone()
    }

    /// Records a snapshot every `period` until the task is dropped.
    pub async fn run(&self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(e) = self.record_current().await {
                error!("Failed to record system stats: {}", e);
            }
        }
    }

    /// Writes to a sibling temp file and renames it over the log.
    async fn persist(&self, entries: &[SystemStat]) -> AgentResult<()> {
        let temp_path = self.path.with_extension("tmp.json");
        let content = serde_json::to_vec_pretty(entries)?;

        tokio::fs::write(&temp_path, content).await.map_err(|e| {
            AgentError::FileSystemError(format!("Failed to write {:?}: {}", temp_path, e))
        })?;
        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| {
            AgentError::FileSystemError(format!("Failed to replace {:?}: {}", self.path, e))
        })?;
        Ok(())
    }
}

async fn load_entries(path: &Path) -> Vec<SystemStat> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(_) => return Vec::new(),
    };
    if content.trim().is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Vec<Value>>(&content) {
        Ok(values) => values
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect(),
        Err(e) => {
            warn!("Ignoring unreadable stats file {:?}: {}", path, e);
            Vec::new()
        }
    }
}

fn prune(entries: &mut Vec<SystemStat>, now: DateTime<Utc>) {
    let cutoff = now - chrono::Duration::seconds(MAX_AGE_SECS);
    entries.retain(|entry| entry.timestamp >= cutoff);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stat_at(timestamp: DateTime<Utc>) -> SystemStat {
        SystemStat {
            timestamp,
            ram_max: "16000.00 MB".to_string(),
            ram: "4000.00 MB".to_string(),
            cores_max: 8,
            cores: "12.50%".to_string(),
        }
    }

    #[tokio::test]
    async fn test_record_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage").join("systemStats.json");

        let log = StatsLog::open(path.clone()).await.unwrap();
        log.record(stat_at(Utc::now())).await.unwrap();
        drop(log);

        let reopened = StatsLog::open(path.clone()).await.unwrap();
        assert_eq!(reopened.history().await.len(), 1);

        let raw: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[0]["CoresMax"], 8);
        assert_eq!(raw[0]["Cores"], "12.50%");
        assert!(!path.with_extension("tmp.json").exists());
    }

    #[tokio::test]
    async fn test_expired_entries_are_pruned() {
        let dir = TempDir::new().unwrap();
        let log = StatsLog::open(dir.path().join("stats.json")).await.unwrap();

        log.record(stat_at(Utc::now() - chrono::Duration::minutes(51)))
            .await
            .unwrap();
        log.record(stat_at(Utc::now() - chrono::Duration::minutes(5)))
            .await
            .unwrap();

        assert_eq!(log.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, "{not json").unwrap();

        let log = StatsLog::open(path).await.unwrap();
        assert!(log.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_entries_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");
        let good = serde_json::to_value(stat_at(Utc::now())).unwrap();
        std::fs::write(
            &path,
            serde_json::to_string(&vec![good, serde_json::json!({"timestamp": 5})]).unwrap(),
        )
        .unwrap();

        let log = StatsLog::open(path).await.unwrap();
        assert_eq!(log.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_capture_reports_host_shape() {
        let stat = capture_system_stat().await.unwrap();
        assert!(stat.cores_max > 0);
        assert!(stat.ram_max.ends_with(" MB"));
        assert!(stat.cores.ends_with('%'));
    }
}
