use crate::dashboard::DashboardState;
use crate::state::{GeoIpOutcome, SiteState, ThreatLevel};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub netsentry_cpu_usage_percent: Gauge,
    pub netsentry_memory_usage_percent: Gauge,
    pub netsentry_disk_usage_percent: Gauge,
    pub netsentry_last_sample_timestamp_seconds: Gauge,
    pub netsentry_internet_up: Gauge,
    pub netsentry_geoip_check_ok: Gauge,
    pub netsentry_vpn_suspected: Gauge,
    pub netsentry_site_up: GaugeVec,
    pub netsentry_site_latency_ms: GaugeVec,
    pub netsentry_site_status_code: GaugeVec,
    pub netsentry_sites_up: Gauge,
    pub netsentry_sites_down: Gauge,
    pub netsentry_threat_level: Gauge,
    pub netsentry_scans_total: Gauge,
    pub netsentry_threats_detected_total: Gauge,
    pub netsentry_vpn_detections_total: Gauge,
    pub netsentry_uptime_seconds: Gauge,
    pub netsentry_monitoring_running: Gauge,
    pub netsentry_scrape_count_total: Counter,
    pub netsentry_probe_errors_total: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let netsentry_cpu_usage_percent = Gauge::with_opts(opts!(
            "netsentry_cpu_usage_percent",
            "Average CPU usage across cores in percent (0..100)"
        ))?;
        let netsentry_memory_usage_percent = Gauge::with_opts(opts!(
            "netsentry_memory_usage_percent",
            "Memory usage in percent"
        ))?;
        let netsentry_disk_usage_percent = Gauge::with_opts(opts!(
            "netsentry_disk_usage_percent",
            "Root filesystem usage in percent"
        ))?;
        let netsentry_last_sample_timestamp_seconds = Gauge::with_opts(opts!(
            "netsentry_last_sample_timestamp_seconds",
            "Unix time of the latest resource sample"
        ))?;
        let netsentry_internet_up = Gauge::with_opts(opts!(
            "netsentry_internet_up",
            "1 if the reachability probe connected on its last attempt"
        ))?;
        let netsentry_geoip_check_ok = Gauge::with_opts(opts!(
            "netsentry_geoip_check_ok",
            "1 if the last GeoIP lookup succeeded"
        ))?;
        let netsentry_vpn_suspected = Gauge::with_opts(opts!(
            "netsentry_vpn_suspected",
            "1 if the last GeoIP lookup flagged a VPN, proxy or hosting provider"
        ))?;
        let netsentry_site_up = GaugeVec::new(
            opts!("netsentry_site_up", "1 if the site answered with HTTP 200"),
            &["site"],
        )?;
        let netsentry_site_latency_ms = GaugeVec::new(
            opts!("netsentry_site_latency_ms", "Site round-trip time in milliseconds"),
            &["site"],
        )?;
        let netsentry_site_status_code = GaugeVec::new(
            opts!(
                "netsentry_site_status_code",
                "Last HTTP status code per site, 0 when offline"
            ),
            &["site"],
        )?;
        let netsentry_sites_up =
            Gauge::with_opts(opts!("netsentry_sites_up", "Number of sites online"))?;
        let netsentry_sites_down = Gauge::with_opts(opts!(
            "netsentry_sites_down",
            "Number of sites offline or answering with an error"
        ))?;
        let netsentry_threat_level = Gauge::with_opts(opts!(
            "netsentry_threat_level",
            "Current threat level: 0 low, 1 medium, 2 high"
        ))?;
        let netsentry_scans_total =
            Gauge::with_opts(opts!("netsentry_scans_total", "Poll cycles executed"))?;
        let netsentry_threats_detected_total = Gauge::with_opts(opts!(
            "netsentry_threats_detected_total",
            "Threshold breaches detected since start"
        ))?;
        let netsentry_vpn_detections_total = Gauge::with_opts(opts!(
            "netsentry_vpn_detections_total",
            "GeoIP lookups that flagged a VPN since start"
        ))?;
        let netsentry_uptime_seconds =
            Gauge::with_opts(opts!("netsentry_uptime_seconds", "Daemon uptime in seconds"))?;
        let netsentry_monitoring_running = Gauge::with_opts(opts!(
            "netsentry_monitoring_running",
            "1 while poll cycles are enabled"
        ))?;
        let netsentry_scrape_count_total = Counter::with_opts(opts!(
            "netsentry_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let netsentry_probe_errors_total = CounterVec::new(
            opts!("netsentry_probe_errors_total", "Probe failures by probe"),
            &["probe"],
        )?;

        register(&registry, &netsentry_cpu_usage_percent)?;
        register(&registry, &netsentry_memory_usage_percent)?;
        register(&registry, &netsentry_disk_usage_percent)?;
        register(&registry, &netsentry_last_sample_timestamp_seconds)?;
        register(&registry, &netsentry_internet_up)?;
        register(&registry, &netsentry_geoip_check_ok)?;
        register(&registry, &netsentry_vpn_suspected)?;
        register(&registry, &netsentry_site_up)?;
        register(&registry, &netsentry_site_latency_ms)?;
        register(&registry, &netsentry_site_status_code)?;
        register(&registry, &netsentry_sites_up)?;
        register(&registry, &netsentry_sites_down)?;
        register(&registry, &netsentry_threat_level)?;
        register(&registry, &netsentry_scans_total)?;
        register(&registry, &netsentry_threats_detected_total)?;
        register(&registry, &netsentry_vpn_detections_total)?;
        register(&registry, &netsentry_uptime_seconds)?;
        register(&registry, &netsentry_monitoring_running)?;
        register(&registry, &netsentry_scrape_count_total)?;
        register(&registry, &netsentry_probe_errors_total)?;

        Ok(Arc::new(Self {
            registry,
            netsentry_cpu_usage_percent,
            netsentry_memory_usage_percent,
            netsentry_disk_usage_percent,
            netsentry_last_sample_timestamp_seconds,
            netsentry_internet_up,
            netsentry_geoip_check_ok,
            netsentry_vpn_suspected,
            netsentry_site_up,
            netsentry_site_latency_ms,
            netsentry_site_status_code,
            netsentry_sites_up,
            netsentry_sites_down,
            netsentry_threat_level,
            netsentry_scans_total,
            netsentry_threats_detected_total,
            netsentry_vpn_detections_total,
            netsentry_uptime_seconds,
            netsentry_monitoring_running,
            netsentry_scrape_count_total,
            netsentry_probe_errors_total,
        }))
    }

    pub fn update_from_state(&self, state: &DashboardState) {
        if let Some(sample) = state.current {
            self.netsentry_cpu_usage_percent.set(sample.cpu_pct);
            self.netsentry_memory_usage_percent.set(sample.mem_pct);
            self.netsentry_disk_usage_percent.set(sample.disk_pct);
            self.netsentry_last_sample_timestamp_seconds
                .set(sample.sampled_at_unix as f64);
        }

        if let Some(internet) = state.internet {
            self.netsentry_internet_up
                .set(if internet.reachable { 1.0 } else { 0.0 });
        }

        match &state.geoip {
            Some(GeoIpOutcome::Detected(result)) => {
                self.netsentry_geoip_check_ok.set(1.0);
                self.netsentry_vpn_suspected
                    .set(if result.is_vpn_suspected { 1.0 } else { 0.0 });
            }
            Some(GeoIpOutcome::Failed { .. }) => self.netsentry_geoip_check_ok.set(0.0),
            None => {}
        }

        let mut up = 0.0;
        let mut down = 0.0;
        for site in &state.sites {
            let (is_up, code) = match site.status {
                SiteState::Unknown => continue,
                SiteState::Online => (true, 200.0),
                SiteState::HttpError(code) => (false, code as f64),
                SiteState::Offline => (false, 0.0),
            };
            if is_up {
                up += 1.0;
            } else {
                down += 1.0;
            }
            self.netsentry_site_up
                .with_label_values(&[&site.name])
                .set(if is_up { 1.0 } else { 0.0 });
            self.netsentry_site_status_code
                .with_label_values(&[&site.name])
                .set(code);
            match site.latency_ms {
                Some(latency) => self
                    .netsentry_site_latency_ms
                    .with_label_values(&[&site.name])
                    .set(latency as f64),
                None => {
                    let _ = self
                        .netsentry_site_latency_ms
                        .remove_label_values(&[&site.name]);
                }
            }
        }
        self.netsentry_sites_up.set(up);
        self.netsentry_sites_down.set(down);

        self.netsentry_threat_level.set(match state.threat_level {
            ThreatLevel::Low => 0.0,
            ThreatLevel::Medium => 1.0,
            ThreatLevel::High => 2.0,
        });
        self.netsentry_scans_total
            .set(state.stats.total_scans as f64);
        self.netsentry_threats_detected_total
            .set(state.stats.threats_detected as f64);
        self.netsentry_vpn_detections_total
            .set(state.stats.vpn_detections as f64);
        self.netsentry_uptime_seconds
            .set(state.stats.uptime_seconds as f64);
        self.netsentry_monitoring_running
            .set(if state.monitoring { 1.0 } else { 0.0 });
    }

    pub fn inc_scrape_count(&self) {
        self.netsentry_scrape_count_total.inc();
    }

    pub fn inc_probe_error(&self, probe: &str) {
        self.netsentry_probe_errors_total
            .with_label_values(&[probe])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
