//! Consumer side of the update channel. Owns the view shown over HTTP and
//! mirrored into Prometheus; nothing else writes to it.

use crate::config::SiteConfig;
use crate::metrics::Metrics;
use crate::state::{
    GeoIpOutcome, History, MetricSample, ReachabilityResult, SiteState, SiteStatus,
    StatsSnapshot, Threat, ThreatLevel, Update,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct DashboardState {
    pub started_at: String,
    pub monitoring: bool,
    pub current: Option<MetricSample>,
    pub history: History<MetricSample>,
    pub internet: Option<ReachabilityResult>,
    pub geoip: Option<GeoIpOutcome>,
    pub vpn_detected: bool,
    pub sites: Vec<SiteStatus>,
    pub site_latency: BTreeMap<String, History<u64>>,
    pub resource_threats: Vec<Threat>,
    pub site_threats: Vec<Threat>,
    pub threat_level: ThreatLevel,
    pub stats: StatsSnapshot,
}

impl DashboardState {
    pub fn new(sites: &[SiteConfig], started_at_unix: i64) -> Self {
        let started = UNIX_EPOCH + Duration::from_secs(started_at_unix.max(0) as u64);
        Self {
            started_at: humantime::format_rfc3339_seconds(started).to_string(),
            monitoring: false,
            current: None,
            history: History::default(),
            internet: None,
            geoip: None,
            vpn_detected: false,
            sites: sites
                .iter()
                .map(|s| SiteStatus {
                    name: s.name.clone(),
                    url: s.url.clone(),
                    status: SiteState::Unknown,
                    latency_ms: None,
                    checked_at_unix: 0,
                })
                .collect(),
            site_latency: BTreeMap::new(),
            resource_threats: Vec::new(),
            site_threats: Vec::new(),
            threat_level: ThreatLevel::Low,
            stats: StatsSnapshot {
                started_at_unix,
                ..StatsSnapshot::default()
            },
        }
    }

    pub fn apply(&mut self, update: Update) {
        match update {
            Update::Resources {
                sample,
                threats,
                level,
            } => {
                for threat in &threats {
                    warn!(
                        kind = ?threat.kind,
                        value = threat.value,
                        threshold = threat.threshold,
                        "resource threshold exceeded"
                    );
                }
                if level != self.threat_level {
                    info!(from = ?self.threat_level, to = ?level, "threat level changed");
                }
                self.current = Some(sample);
                self.history.push(sample);
                self.resource_threats = threats;
                self.threat_level = level;
            }
            Update::Reachability(result) => {
                let changed = self
                    .internet
                    .map_or(true, |prev| prev.reachable != result.reachable);
                if changed {
                    info!(reachable = result.reachable, "internet connectivity changed");
                }
                self.internet = Some(result);
            }
            Update::GeoIp(outcome) => {
                match &outcome {
                    GeoIpOutcome::Detected(result) => {
                        if result.is_vpn_suspected != self.vpn_detected {
                            info!(
                                vpn_suspected = result.is_vpn_suspected,
                                isp = %result.isp,
                                "vpn verdict changed"
                            );
                        }
                        self.vpn_detected = result.is_vpn_suspected;
                    }
                    GeoIpOutcome::Failed { reason } => {
                        info!(reason = %reason, "vpn check failed");
                    }
                }
                self.geoip = Some(outcome);
            }
            Update::Sites { statuses, threats } => {
                for threat in &threats {
                    warn!(
                        site = %threat.subject,
                        latency_ms = threat.value,
                        threshold_ms = threat.threshold,
                        "site latency above threshold"
                    );
                }
                for status in statuses {
                    self.merge_site(status);
                }
                self.site_threats = threats;
            }
            Update::Stats(snapshot) => {
                // Snapshots from spawned GeoIP and site tasks can arrive after a newer one.
                self.stats.merge(snapshot);
            }
            Update::Monitoring { running } => {
                self.monitoring = running;
            }
        }
    }

    fn merge_site(&mut self, status: SiteStatus) {
        if let Some(latency) = status.latency_ms {
            self.site_latency
                .entry(status.name.clone())
                .or_default()
                .push(latency);
        }
        match self.sites.iter_mut().find(|s| s.name == status.name) {
            Some(slot) => *slot = status,
            None => self.sites.push(status),
        }
    }
}

/// Drains the update channel until every sender is gone.
pub async fn run(
    mut updates: mpsc::UnboundedReceiver<Update>,
    state: Arc<RwLock<DashboardState>>,
    metrics: Arc<Metrics>,
) {
    while let Some(update) = updates.recv().await {
        let mut guard = state.write().await;
        guard.apply(update);
        metrics.update_from_state(&guard);
    }
    let samples = state.read().await.history.len();
    info!(samples, "update channel closed, dashboard stopping");
}
