use serde::{Serialize, Serializer};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const HISTORY_CAPACITY: usize = 100;

/// One reading of the host's resource usage, all values in percent (0..100).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSample {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
    pub sampled_at_unix: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReachabilityResult {
    pub reachable: bool,
    pub checked_at_unix: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeoIpResult {
    pub ip: String,
    pub city: String,
    pub country: String,
    pub isp: String,
    pub is_vpn_suspected: bool,
}

/// Latest GeoIP lookup as seen by the dashboard. A failed lookup is not the
/// same as "no VPN detected".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GeoIpOutcome {
    Detected(GeoIpResult),
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "code", rename_all = "snake_case")]
pub enum SiteState {
    Unknown,
    Online,
    HttpError(u16),
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteStatus {
    pub name: String,
    pub url: String,
    pub status: SiteState,
    pub latency_ms: Option<u64>,
    pub checked_at_unix: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    CpuLoad,
    MemoryUsage,
    SiteLatency,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Threat {
    pub kind: ThreatKind,
    pub subject: String,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl ThreatLevel {
    pub fn from_active(count: usize) -> Self {
        match count {
            0 => ThreatLevel::Low,
            1 => ThreatLevel::Medium,
            _ => ThreatLevel::High,
        }
    }
}

/// Fixed-capacity FIFO. Pushing into a full history evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct History<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> History<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl<T: Serialize> Serialize for History<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.iter())
    }
}

/// Run-wide counters. Only the scheduler and the probe tasks it spawns
/// increment them; everyone else sees `StatsSnapshot` copies.
#[derive(Debug)]
pub struct Stats {
    started: Instant,
    started_at_unix: i64,
    total_scans: AtomicU64,
    threats_detected: AtomicU64,
    vpn_detections: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub total_scans: u64,
    pub threats_detected: u64,
    pub vpn_detections: u64,
    pub uptime_seconds: u64,
    pub started_at_unix: i64,
}

impl StatsSnapshot {
    /// Keeps the larger value of every counter, so counters never move backwards.
    pub fn merge(&mut self, other: StatsSnapshot) {
        self.total_scans = self.total_scans.max(other.total_scans);
        self.threats_detected = self.threats_detected.max(other.threats_detected);
        self.vpn_detections = self.vpn_detections.max(other.vpn_detections);
        self.uptime_seconds = self.uptime_seconds.max(other.uptime_seconds);
    }
}

impl Stats {
    pub fn new(now_unix: i64) -> Self {
        Self {
            started: Instant::now(),
            started_at_unix: now_unix,
            total_scans: AtomicU64::new(0),
            threats_detected: AtomicU64::new(0),
            vpn_detections: AtomicU64::new(0),
        }
    }

    /// Counts a scan and returns the new total.
    pub fn record_scan(&self) -> u64 {
        self.total_scans.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_threats(&self, count: u64) {
        if count > 0 {
            self.threats_detected.fetch_add(count, Ordering::SeqCst);
        }
    }

    pub fn record_vpn_detection(&self) {
        self.vpn_detections.fetch_add(1, Ordering::SeqCst);
    }

    pub fn total_scans(&self) -> u64 {
        self.total_scans.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_scans: self.total_scans.load(Ordering::SeqCst),
            threats_detected: self.threats_detected.load(Ordering::SeqCst),
            vpn_detections: self.vpn_detections.load(Ordering::SeqCst),
            uptime_seconds: self.started.elapsed().as_secs(),
            started_at_unix: self.started_at_unix,
        }
    }
}

/// Messages from the polling side to the dashboard. Each one is produced
/// independently; there is no combined snapshot.
#[derive(Debug, Clone)]
pub enum Update {
    Resources {
        sample: MetricSample,
        threats: Vec<Threat>,
        level: ThreatLevel,
    },
    Reachability(ReachabilityResult),
    GeoIp(GeoIpOutcome),
    Sites {
        statuses: Vec<SiteStatus>,
        threats: Vec<Threat>,
    },
    Stats(StatsSnapshot),
    Monitoring {
        running: bool,
    },
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
