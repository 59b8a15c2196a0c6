use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub reachability: ReachabilityConfig,
    #[serde(default)]
    pub geoip: GeoIpConfig,
    #[serde(default)]
    pub sites: SitesConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReachabilityConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_reachability_host")]
    pub host: String,
    #[serde(default = "default_reachability_port")]
    pub port: u16,
    #[serde(default = "default_reachability_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeoIpConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_geoip_url")]
    pub url: String,
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_geoip_every_n_scans")]
    pub every_n_scans: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SitesConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_sites_every_n_scans")]
    pub every_n_scans: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_site_targets")]
    pub targets: Vec<SiteConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SiteConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertsConfig {
    #[serde(default = "default_enabled")]
    pub threat_detection: bool,
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f64,
    #[serde(default = "default_max_memory_percent")]
    pub max_memory_percent: f64,
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            interval_secs: default_interval_secs(),
            reachability: ReachabilityConfig::default(),
            geoip: GeoIpConfig::default(),
            sites: SitesConfig::default(),
            alerts: AlertsConfig::default(),
        }
    }
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_reachability_host(),
            port: default_reachability_port(),
            timeout_ms: default_reachability_timeout_ms(),
        }
    }
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_geoip_url(),
            timeout_ms: default_probe_timeout_ms(),
            every_n_scans: default_geoip_every_n_scans(),
        }
    }
}

impl Default for SitesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every_n_scans: default_sites_every_n_scans(),
            timeout_ms: default_probe_timeout_ms(),
            targets: default_site_targets(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            threat_detection: true,
            max_cpu_percent: default_max_cpu_percent(),
            max_memory_percent: default_max_memory_percent(),
            max_latency_ms: default_max_latency_ms(),
        }
    }
}

impl ReachabilityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl GeoIpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SitesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }

        validate_reachability(&self.reachability)?;
        validate_geoip(&self.geoip)?;
        validate_sites(&self.sites)?;
        validate_alerts(&self.alerts)?;

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_reachability(cfg: &ReachabilityConfig) -> Result<(), ConfigError> {
    if cfg.host.trim().is_empty() {
        return Err(ConfigError::Validation(
            "reachability.host must not be empty".to_string(),
        ));
    }
    if cfg.port == 0 {
        return Err(ConfigError::Validation(
            "reachability.port must be in 1..65535".to_string(),
        ));
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "reachability.timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_geoip(cfg: &GeoIpConfig) -> Result<(), ConfigError> {
    if cfg.url.trim().is_empty() {
        return Err(ConfigError::Validation(
            "geoip.url must not be empty".to_string(),
        ));
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "geoip.timeout_ms must be > 0".to_string(),
        ));
    }
    if cfg.every_n_scans == 0 {
        return Err(ConfigError::Validation(
            "geoip.every_n_scans must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_sites(cfg: &SitesConfig) -> Result<(), ConfigError> {
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "sites.timeout_ms must be > 0".to_string(),
        ));
    }
    if cfg.every_n_scans == 0 {
        return Err(ConfigError::Validation(
            "sites.every_n_scans must be >= 1".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for site in &cfg.targets {
        if site.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "sites.targets[*].name must not be empty".to_string(),
            ));
        }
        if !names.insert(site.name.clone()) {
            return Err(ConfigError::Validation(format!(
                "site name '{}' must be unique",
                site.name
            )));
        }
        if site.url.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "site '{}' url must not be empty",
                site.name
            )));
        }
    }
    Ok(())
}

fn validate_alerts(cfg: &AlertsConfig) -> Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&cfg.max_cpu_percent) {
        return Err(ConfigError::Validation(
            "alerts.max_cpu_percent must be in 0..100".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&cfg.max_memory_percent) {
        return Err(ConfigError::Validation(
            "alerts.max_memory_percent must be in 0..100".to_string(),
        ));
    }
    if cfg.max_latency_ms == 0 {
        return Err(ConfigError::Validation(
            "alerts.max_latency_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn default_listen() -> String {
    "127.0.0.1:9110".to_string()
}

const fn default_interval_secs() -> u64 {
    2
}

const fn default_enabled() -> bool {
    true
}

fn default_reachability_host() -> String {
    "8.8.8.8".to_string()
}

const fn default_reachability_port() -> u16 {
    53
}

const fn default_reachability_timeout_ms() -> u64 {
    3000
}

fn default_geoip_url() -> String {
    "https://ipapi.co/json/".to_string()
}

const fn default_probe_timeout_ms() -> u64 {
    5000
}

const fn default_geoip_every_n_scans() -> u64 {
    10
}

const fn default_sites_every_n_scans() -> u64 {
    5
}

fn default_site_targets() -> Vec<SiteConfig> {
    [
        ("Google", "https://google.com"),
        ("GitHub", "https://github.com"),
        ("Cloudflare", "https://cloudflare.com"),
    ]
    .into_iter()
    .map(|(name, url)| SiteConfig {
        name: name.to_string(),
        url: url.to_string(),
    })
    .collect()
}

const fn default_max_cpu_percent() -> f64 {
    85.0
}

const fn default_max_memory_percent() -> f64 {
    90.0
}

const fn default_max_latency_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_yaml_is_valid() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("example parses");
        cfg.validate().expect("example validates");
        assert_eq!(cfg.interval_secs, 2);
        assert_eq!(cfg.geoip.every_n_scans, 10);
        assert_eq!(cfg.sites.every_n_scans, 5);
        assert_eq!(cfg.sites.targets.len(), 3);
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").expect("empty mapping parses");
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.listen, "127.0.0.1:9110");
        assert_eq!(cfg.reachability.host, "8.8.8.8");
        assert_eq!(cfg.reachability.port, 53);
        assert_eq!(cfg.reachability.timeout(), Duration::from_secs(3));
        assert_eq!(cfg.geoip.timeout(), Duration::from_secs(5));
        assert!(cfg.alerts.threat_detection);
    }

    #[test]
    fn duplicate_site_names_are_rejected() {
        let mut cfg = Config::default();
        cfg.sites.targets.push(SiteConfig {
            name: "Google".to_string(),
            url: "https://google.com/again".to_string(),
        });
        let err = cfg.validate().expect_err("duplicate must fail");
        assert!(err.to_string().contains("unique"));
    }

    #[test]
    fn zero_cadence_is_rejected() {
        let mut cfg = Config::default();
        cfg.geoip.every_n_scans = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn thresholds_out_of_range_are_rejected() {
        let mut cfg = Config::default();
        cfg.alerts.max_memory_percent = 120.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_file_reports_read_error() {
        let err = Config::load_from_file("/nonexistent/netsentry.yaml").expect_err("must fail");
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
