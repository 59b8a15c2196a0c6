use crate::collectors::ProbeError;
use crate::state::{now_unix, MetricSample};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use tracing::debug;

/// CPU usage is averaged over this window, so one sample blocks for about as long.
pub const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct MetricsSampler {
    system: Arc<Mutex<System>>,
}

impl MetricsSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_disks_list();
        Self {
            system: Arc::new(Mutex::new(system)),
        }
    }

    /// Reads CPU, memory and root-disk usage on the blocking pool.
    pub async fn sample(&self) -> Result<MetricSample, ProbeError> {
        let system = self.system.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = system
                .lock()
                .map_err(|_| ProbeError::LocalSampling("system handle poisoned".to_string()))?;
            Ok::<_, ProbeError>(sample_blocking(&mut guard))
        })
        .await
        .map_err(|err| ProbeError::LocalSampling(err.to_string()))?
    }
}

impl Default for MetricsSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn sample_blocking(system: &mut System) -> MetricSample {
    system.refresh_cpu();
    std::thread::sleep(CPU_SAMPLE_WINDOW);
    system.refresh_cpu();
    system.refresh_memory();
    system.refresh_disks();

    let cpu_pct = if system.cpus().is_empty() {
        debug!("no cpus reported, cpu usage unavailable");
        0.0
    } else {
        let sum: f32 = system.cpus().iter().map(|c| c.cpu_usage()).sum();
        (sum / system.cpus().len() as f32) as f64
    };

    let mem_pct = percent(system.used_memory(), system.total_memory());

    let disks: Vec<(String, u64, u64)> = system
        .disks()
        .iter()
        .map(|d| {
            (
                d.mount_point().to_string_lossy().to_string(),
                d.total_space(),
                d.available_space(),
            )
        })
        .collect();
    let disk_pct = root_disk_percent(&disks).unwrap_or_else(|| {
        debug!("no disks reported, disk usage unavailable");
        0.0
    });

    MetricSample {
        cpu_pct: clamp_percent(cpu_pct),
        mem_pct,
        disk_pct,
        sampled_at_unix: now_unix(),
    }
}

pub fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    clamp_percent((used as f64 / total as f64) * 100.0)
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Usage of the filesystem mounted at the root, falling back to the first
/// disk when no root mount is listed. Entries are `(mount, total, available)`.
pub fn root_disk_percent(disks: &[(String, u64, u64)]) -> Option<f64> {
    let root = disks
        .iter()
        .find(|(mount, _, _)| is_root_mount(mount))
        .or_else(|| disks.first())?;
    let (_, total, available) = root;
    Some(percent(total.saturating_sub(*available), *total))
}

fn is_root_mount(mount: &str) -> bool {
    let path = Path::new(mount);
    path == Path::new("/") || mount.eq_ignore_ascii_case("C:\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_handles_zero_total() {
        assert_eq!(percent(10, 0), 0.0);
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(percent(300, 200), 100.0);
    }

    #[test]
    fn root_disk_is_preferred() {
        let disks = vec![
            ("/boot".to_string(), 100, 90),
            ("/".to_string(), 1000, 250),
        ];
        assert_eq!(root_disk_percent(&disks), Some(75.0));
    }

    #[test]
    fn first_disk_is_fallback() {
        let disks = vec![("/data".to_string(), 400, 300)];
        assert_eq!(root_disk_percent(&disks), Some(25.0));
        assert_eq!(root_disk_percent(&[]), None);
    }

    #[tokio::test]
    async fn sample_stays_in_range() {
        let sampler = MetricsSampler::new();
        let sample = sampler.sample().await.expect("local sampling");
        for value in [sample.cpu_pct, sample.mem_pct, sample.disk_pct] {
            assert!((0.0..=100.0).contains(&value), "out of range: {value}");
        }
        assert!(sample.sampled_at_unix > 0);
    }

    #[tokio::test]
    async fn sampler_reuses_disk_list_across_samples() {
        let sampler = MetricsSampler::new();
        let disks_at_start = sampler.system.lock().unwrap().disks().len();

        for _ in 0..3 {
            let sample = sampler.sample().await.expect("local sampling");
            assert!((0.0..=100.0).contains(&sample.disk_pct));
        }
        assert_eq!(sampler.system.lock().unwrap().disks().len(), disks_at_start);
    }
}
