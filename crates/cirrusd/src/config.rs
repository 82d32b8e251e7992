//! cirrus.toml configuration parser.
//!
//! One file seeds everything the daemon needs: monitor settings, the
//! policy registry, the topology, and the applications to supervise.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use cirrus_monitor::{DEFAULT_EVENT_BUFFER, DEFAULT_MONITOR_INTERVAL};
use cirrus_state::{Application, PolicySet, Service};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub policies: PolicySet,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub applications: Vec<Application>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSettings {
    /// Cluster monitor refresh period, e.g. "15s".
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Capacity of the status event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_interval() -> String {
    format!("{}s", DEFAULT_MONITOR_INTERVAL.as_secs())
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Refresh period for cluster monitors. Invalid values fall back to
    /// the default.
    pub fn monitor_interval(&self) -> Duration {
        match parse_duration(&self.monitor.interval) {
            Some(d) if !d.is_zero() => d,
            _ => {
                warn!(
                    interval = %self.monitor.interval,
                    "invalid monitor interval, using default"
                );
                DEFAULT_MONITOR_INTERVAL
            }
        }
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
