use crate::collectors::geoip::GeoIpClassifier;
use crate::collectors::reachability;
use crate::collectors::sites::check_all;
use crate::collectors::system::MetricsSampler;
use crate::config::{AlertsConfig, Config};
use crate::metrics::Metrics;
use crate::state::{
    now_unix, GeoIpOutcome, MetricSample, SiteState, SiteStatus, Stats, Threat, ThreatKind,
    ThreatLevel, Update,
};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Start/stop toggle shared with the HTTP layer. It gates whether cycles run;
/// the polling loop itself keeps ticking either way.
pub struct MonitorControl {
    tx: watch::Sender<bool>,
}

impl MonitorControl {
    pub fn new(running: bool) -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(running);
        (Self { tx }, rx)
    }

    /// Returns true when the state actually changed.
    pub fn start(&self) -> bool {
        self.set(true)
    }

    pub fn stop(&self) -> bool {
        self.set(false)
    }

    pub fn is_running(&self) -> bool {
        *self.tx.borrow()
    }

    fn set(&self, running: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == running {
                false
            } else {
                *current = running;
                true
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub scan: u64,
    pub geoip_dispatched: bool,
    pub sites_dispatched: bool,
}

pub struct PollScheduler {
    cfg: Arc<Config>,
    stats: Arc<Stats>,
    metrics: Arc<Metrics>,
    client: Client,
    sampler: MetricsSampler,
    geoip: GeoIpClassifier,
    updates: mpsc::UnboundedSender<Update>,
}

impl PollScheduler {
    pub fn new(
        cfg: Arc<Config>,
        client: Client,
        stats: Arc<Stats>,
        metrics: Arc<Metrics>,
        updates: mpsc::UnboundedSender<Update>,
    ) -> Self {
        let geoip = GeoIpClassifier::new(client.clone(), &cfg.geoip);
        Self {
            cfg,
            stats,
            metrics,
            client,
            sampler: MetricsSampler::new(),
            geoip,
            updates,
        }
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    pub async fn run(
        self,
        mut control: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.cfg.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut control_open = true;

        let running = *control.borrow_and_update();
        info!(
            interval_secs = self.cfg.interval_secs,
            running, "poll scheduler started"
        );
        self.emit(Update::Monitoring { running });

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(
                        total_scans = self.stats.total_scans(),
                        "shutdown signal received, poll scheduler stopping"
                    );
                    break;
                }
                changed = control.changed(), if control_open => {
                    if changed.is_err() {
                        control_open = false;
                        continue;
                    }
                    let running = *control.borrow_and_update();
                    info!(running, "monitoring toggled");
                    self.emit(Update::Monitoring { running });
                }
                _ = ticker.tick() => {
                    if !*control.borrow() {
                        continue;
                    }
                    let report = self.run_cycle().await;
                    debug!(
                        scan = report.scan,
                        geoip = report.geoip_dispatched,
                        sites = report.sites_dispatched,
                        "poll cycle finished"
                    );
                }
            }
        }
    }

    /// One poll cycle. Resource sampling and reachability are awaited here;
    /// GeoIP and site checks are spawned and report on their own.
    pub async fn run_cycle(&self) -> CycleReport {
        let reachability_cfg = self.cfg.reachability.clone();
        let (sample, reachability) = tokio::join!(self.sampler.sample(), async move {
            if reachability_cfg.enabled {
                Some(reachability::probe(&reachability_cfg).await)
            } else {
                None
            }
        });

        let sample = sample.unwrap_or_else(|err| {
            warn!(error = %err, kind = err.kind(), "metrics sampling failed");
            self.metrics.inc_probe_error("metrics");
            MetricSample {
                cpu_pct: 0.0,
                mem_pct: 0.0,
                disk_pct: 0.0,
                sampled_at_unix: now_unix(),
            }
        });

        let scan = self.stats.record_scan();

        let threats = resource_threats(&sample, &self.cfg.alerts);
        self.stats.record_threats(threats.len() as u64);
        let level = ThreatLevel::from_active(threats.len());

        let geoip_dispatched =
            self.cfg.geoip.enabled && is_due(scan, self.cfg.geoip.every_n_scans);
        if geoip_dispatched {
            self.spawn_geoip();
        }

        let sites_dispatched = self.cfg.sites.enabled
            && !self.cfg.sites.targets.is_empty()
            && is_due(scan, self.cfg.sites.every_n_scans);
        if sites_dispatched {
            self.spawn_sites();
        }

        self.emit(Update::Resources {
            sample,
            threats,
            level,
        });
        if let Some(result) = reachability {
            if !result.reachable {
                self.metrics.inc_probe_error("reachability");
            }
            self.emit(Update::Reachability(result));
        }
        self.emit(Update::Stats(self.stats.snapshot()));

        CycleReport {
            scan,
            geoip_dispatched,
            sites_dispatched,
        }
    }

    fn spawn_geoip(&self) {
        let classifier = self.geoip.clone();
        let stats = self.stats.clone();
        let metrics = self.metrics.clone();
        let updates = self.updates.clone();
        tokio::spawn(async move {
            let outcome = match classifier.classify().await {
                Ok(result) => {
                    if result.is_vpn_suspected {
                        stats.record_vpn_detection();
                    }
                    GeoIpOutcome::Detected(result)
                }
                Err(err) => {
                    warn!(error = %err, kind = err.kind(), "geoip check failed");
                    metrics.inc_probe_error("geoip");
                    GeoIpOutcome::Failed {
                        reason: err.to_string(),
                    }
                }
            };
            let _ = updates.send(Update::GeoIp(outcome));
            let _ = updates.send(Update::Stats(stats.snapshot()));
        });
    }

    fn spawn_sites(&self) {
        let client = self.client.clone();
        let sites = self.cfg.sites.targets.clone();
        let timeout = self.cfg.sites.timeout();
        let alerts = self.cfg.alerts.clone();
        let stats = self.stats.clone();
        let metrics = self.metrics.clone();
        let updates = self.updates.clone();
        tokio::spawn(async move {
            let statuses = check_all(&client, &sites, timeout).await;
            for status in statuses.iter().filter(|s| s.status == SiteState::Offline) {
                debug!(site = %status.name, "site offline");
                metrics.inc_probe_error("sites");
            }
            let threats = latency_threats(&statuses, &alerts);
            stats.record_threats(threats.len() as u64);
            let _ = updates.send(Update::Sites { statuses, threats });
            let _ = updates.send(Update::Stats(stats.snapshot()));
        });
    }

    fn emit(&self, update: Update) {
        if self.updates.send(update).is_err() {
            debug!("dashboard channel closed, update dropped");
        }
    }
}

pub fn is_due(scan: u64, every_n_scans: u64) -> bool {
    every_n_scans > 0 && scan % every_n_scans == 0
}

pub fn resource_threats(sample: &MetricSample, alerts: &AlertsConfig) -> Vec<Threat> {
    if !alerts.threat_detection {
        return Vec::new();
    }

    let mut out = Vec::new();
    if sample.cpu_pct >= alerts.max_cpu_percent {
        out.push(Threat {
            kind: ThreatKind::CpuLoad,
            subject: "cpu".to_string(),
            value: sample.cpu_pct,
            threshold: alerts.max_cpu_percent,
        });
    }
    if sample.mem_pct >= alerts.max_memory_percent {
        out.push(Threat {
            kind: ThreatKind::MemoryUsage,
            subject: "memory".to_string(),
            value: sample.mem_pct,
            threshold: alerts.max_memory_percent,
        });
    }
    out
}

pub fn latency_threats(statuses: &[SiteStatus], alerts: &AlertsConfig) -> Vec<Threat> {
    if !alerts.threat_detection {
        return Vec::new();
    }

    statuses
        .iter()
        .filter_map(|s| {
            let latency = s.latency_ms?;
            (latency > alerts.max_latency_ms).then(|| Threat {
                kind: ThreatKind::SiteLatency,
                subject: s.name.clone(),
                value: latency as f64,
                threshold: alerts.max_latency_ms as f64,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    async fn offline_config() -> Config {
        let port = closed_port().await;
        let mut cfg = Config::default();
        cfg.interval_secs = 1;
        cfg.reachability.host = "127.0.0.1".to_string();
        cfg.reachability.port = port;
        cfg.reachability.timeout_ms = 500;
        cfg.geoip.url = format!("http://127.0.0.1:{port}/json/");
        cfg.geoip.timeout_ms = 500;
        cfg.sites.timeout_ms = 500;
        cfg.sites.targets = vec![
            SiteConfig {
                name: "a".to_string(),
                url: format!("http://127.0.0.1:{port}/a"),
            },
            SiteConfig {
                name: "b".to_string(),
                url: format!("http://127.0.0.1:{port}/b"),
            },
        ];
        cfg
    }

    fn scheduler(cfg: Config) -> (PollScheduler, mpsc::UnboundedReceiver<Update>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let metrics = Metrics::new().expect("metrics registry");
        let sched = PollScheduler::new(
            Arc::new(cfg),
            Client::builder().no_proxy().build().unwrap(),
            Arc::new(Stats::new(now_unix())),
            metrics,
            tx,
        );
        (sched, rx)
    }

    fn sample(cpu: f64, mem: f64) -> MetricSample {
        MetricSample {
            cpu_pct: cpu,
            mem_pct: mem,
            disk_pct: 10.0,
            sampled_at_unix: 0,
        }
    }

    #[test]
    fn cadence_matches_modulo() {
        let due: Vec<u64> = (1..=30).filter(|s| is_due(*s, 10)).collect();
        assert_eq!(due, vec![10, 20, 30]);
        let due: Vec<u64> = (1..=12).filter(|s| is_due(*s, 5)).collect();
        assert_eq!(due, vec![5, 10]);
        assert!(!is_due(5, 0));
    }

    #[test]
    fn resource_threats_respect_thresholds() {
        let alerts = AlertsConfig::default();
        assert!(resource_threats(&sample(10.0, 20.0), &alerts).is_empty());

        let threats = resource_threats(&sample(90.0, 95.0), &alerts);
        let kinds: Vec<ThreatKind> = threats.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![ThreatKind::CpuLoad, ThreatKind::MemoryUsage]);

        let disabled = AlertsConfig {
            threat_detection: false,
            ..AlertsConfig::default()
        };
        assert!(resource_threats(&sample(99.0, 99.0), &disabled).is_empty());
    }

    #[test]
    fn slow_sites_raise_latency_threats() {
        let alerts = AlertsConfig::default();
        let statuses = vec![
            SiteStatus {
                name: "fast".to_string(),
                url: "https://fast.example".to_string(),
                status: SiteState::Online,
                latency_ms: Some(120),
                checked_at_unix: 0,
            },
            SiteStatus {
                name: "slow".to_string(),
                url: "https://slow.example".to_string(),
                status: SiteState::Online,
                latency_ms: Some(900),
                checked_at_unix: 0,
            },
            SiteStatus {
                name: "down".to_string(),
                url: "https://down.example".to_string(),
                status: SiteState::Offline,
                latency_ms: None,
                checked_at_unix: 0,
            },
        ];

        let threats = latency_threats(&statuses, &alerts);
        assert_eq!(threats.len(), 1);
        assert_eq!(threats[0].subject, "slow");
    }

    #[test]
    fn control_reports_changes_only() {
        let (control, rx) = MonitorControl::new(true);
        assert!(control.is_running());
        assert!(!control.start());
        assert!(control.stop());
        assert!(!control.stop());
        assert!(!*rx.borrow());
        assert!(control.start());
        assert!(control.is_running());
    }

    #[tokio::test]
    async fn cycles_dispatch_on_schedule() {
        let (sched, _rx) = scheduler(offline_config().await);

        let mut geoip_scans = Vec::new();
        let mut site_scans = Vec::new();
        for expected in 1..=20 {
            let report = sched.run_cycle().await;
            assert_eq!(report.scan, expected);
            if report.geoip_dispatched {
                geoip_scans.push(report.scan);
            }
            if report.sites_dispatched {
                site_scans.push(report.scan);
            }
        }

        assert_eq!(geoip_scans, vec![10, 20]);
        assert_eq!(site_scans, vec![5, 10, 15, 20]);
        assert_eq!(sched.stats().total_scans(), 20);
    }

    #[tokio::test]
    async fn disabled_checkers_are_never_dispatched() {
        let mut cfg = offline_config().await;
        cfg.geoip.enabled = false;
        cfg.sites.enabled = false;
        let (sched, _rx) = scheduler(cfg);

        for _ in 0..10 {
            let report = sched.run_cycle().await;
            assert!(!report.geoip_dispatched);
            assert!(!report.sites_dispatched);
        }
    }

    #[tokio::test]
    async fn failures_become_status_updates() {
        let mut cfg = offline_config().await;
        cfg.geoip.every_n_scans = 1;
        cfg.sites.every_n_scans = 1;
        let (sched, mut rx) = scheduler(cfg);

        sched.run_cycle().await;

        let mut saw_unreachable = false;
        let mut geoip_failed = false;
        let mut offline_sites = 0;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !(geoip_failed && offline_sites == 2) {
            let update = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .expect("updates before deadline")
                .expect("channel open");
            match update {
                Update::Reachability(r) => saw_unreachable = !r.reachable,
                Update::GeoIp(GeoIpOutcome::Failed { .. }) => geoip_failed = true,
                Update::Sites { statuses, .. } => {
                    offline_sites = statuses
                        .iter()
                        .filter(|s| s.status == SiteState::Offline && s.latency_ms.is_none())
                        .count();
                }
                _ => {}
            }
        }
        assert!(saw_unreachable);
    }

    #[tokio::test]
    async fn stopped_scheduler_does_not_scan() {
        let (sched, _rx) = scheduler(offline_config().await);
        let stats = sched.stats();
        let (control, control_rx) = MonitorControl::new(true);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(sched.run(control_rx, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        control.stop();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let scans_when_stopped = stats.total_scans();
        assert!(scans_when_stopped >= 2, "got {scans_when_stopped}");

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(stats.total_scans(), scans_when_stopped);

        control.start();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(stats.total_scans() > scans_when_stopped);

        let _ = shutdown_tx.send(true);
        task.await.unwrap();
    }
}
