//! Resource probes: where raw utilization numbers come from.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use sysinfo::{Disks, Networks, System};
use tracing::debug;

/// One raw utilization reading, percentages (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceReading {
    pub cpu: f64,
    pub memory: f64,
    pub network: f64,
    pub data_store: f64,
}

/// Something that can measure resource utilization.
pub trait ResourceProbe: Send + Sync {
    fn read(&self) -> anyhow::Result<ResourceReading>;
}

struct ProbeState {
    system: System,
    networks: Networks,
    disks: Disks,
    last_read: Option<Instant>,
}

/// Reads host utilization through `sysinfo`.
///
/// CPU and network are rates, so the first reading after construction
/// reports them as zero.
pub struct SystemProbe {
    state: Mutex<ProbeState>,
    data_path: PathBuf,
    /// Link capacity in bits per second.
    capacity_bps: f64,
}

impl SystemProbe {
    pub fn new(data_path: impl Into<PathBuf>, network_capacity_mbps: u64) -> Self {
        Self {
            state: Mutex::new(ProbeState {
                system: System::new(),
                networks: Networks::new_with_refreshed_list(),
                disks: Disks::new_with_refreshed_list(),
                last_read: None,
            }),
            data_path: data_path.into(),
            capacity_bps: (network_capacity_mbps.max(1) as f64) * 1_000_000.0,
        }
    }
}

impl ResourceProbe for SystemProbe {
    fn read(&self) -> anyhow::Result<ResourceReading> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("system probe state poisoned"))?;

        state.system.refresh_cpu();
        state.system.refresh_memory();
        state.networks.refresh();
        state.disks.refresh();

        let cpu = state.system.global_cpu_info().cpu_usage() as f64;

        let total_memory = state.system.total_memory();
        let memory = if total_memory > 0 {
            state.system.used_memory() as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };

        let now = Instant::now();
        let bytes: u64 = state
            .networks
            .iter()
            .map(|(_, data)| data.received() + data.transmitted())
            .sum();
        let network = match state.last_read {
            Some(prev) => {
                let elapsed = now.duration_since(prev).as_secs_f64();
                if elapsed > 0.0 {
                    (bytes as f64 * 8.0 / elapsed) / self.capacity_bps * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        state.last_read = Some(now);

        let data_store = disk_usage_for(&state.disks, &self.data_path);

        let reading = ResourceReading {
            cpu: clamp_pct(cpu),
            memory: clamp_pct(memory),
            network: clamp_pct(network),
            data_store: clamp_pct(data_store),
        };
        debug!(?reading, "system probe read");
        Ok(reading)
    }
}

/// Used percentage of the disk whose mount point is the longest prefix of `path`.
fn disk_usage_for(disks: &Disks, path: &Path) -> f64 {
    let disk = disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len());

    match disk {
        Some(d) if d.total_space() > 0 => {
            let used = d.total_space().saturating_sub(d.available_space());
            used as f64 / d.total_space() as f64 * 100.0
        }
        _ => 0.0,
    }
}

pub(crate) fn clamp_pct(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 100.0) }
}

/// Replays a fixed sequence of readings, repeating the last one.
pub struct ScriptedProbe {
    readings: Mutex<Vec<ResourceReading>>,
}

impl ScriptedProbe {
    pub fn new(mut readings: Vec<ResourceReading>) -> Self {
        readings.reverse();
        Self {
            readings: Mutex::new(readings),
        }
    }
}

impl ResourceProbe for ScriptedProbe {
    fn read(&self) -> anyhow::Result<ResourceReading> {
        let mut readings = self
            .readings
            .lock()
            .map_err(|_| anyhow::anyhow!("scripted probe poisoned"))?;
        match readings.len() {
            0 => anyhow::bail!("scripted probe has no readings"),
            1 => Ok(readings[0]),
            _ => Ok(readings.pop().unwrap_or_default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(cpu: f64) -> ResourceReading {
        ResourceReading {
            cpu,
            ..Default::default()
        }
    }

    #[test]
    fn scripted_probe_replays_then_repeats_last() {
        let probe = ScriptedProbe::new(vec![reading(10.0), reading(20.0)]);
        assert_eq!(probe.read().unwrap().cpu, 10.0);
        assert_eq!(probe.read().unwrap().cpu, 20.0);
        assert_eq!(probe.read().unwrap().cpu, 20.0);
    }

    #[test]
    fn scripted_probe_without_readings_errors() {
        let probe = ScriptedProbe::new(Vec::new());
        assert!(probe.read().is_err());
    }

    #[test]
    fn system_probe_reports_percentages() {
        let probe = SystemProbe::new("/", 1000);
        let r = probe.read().unwrap();
        for v in [r.cpu, r.memory, r.network, r.data_store] {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn clamp_pct_bounds_values() {
        assert_eq!(clamp_pct(140.0), 100.0);
        assert_eq!(clamp_pct(-3.0), 0.0);
        assert_eq!(clamp_pct(f64::NAN), 0.0);
    }
}
