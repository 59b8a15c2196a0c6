mod collectors;
mod config;
mod dashboard;
mod http;
mod metrics;
mod scheduler;
mod state;

use axum::serve;
use clap::Parser;
use config::Config;
use dashboard::DashboardState;
use metrics::Metrics;
use reqwest::Client;
use scheduler::{MonitorControl, PollScheduler};
use state::{now_unix, Stats};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "netsentry")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Disable the GeoIP/VPN check regardless of the config file.
    #[arg(long)]
    geoip_off: bool,
    /// Disable website checks regardless of the config file.
    #[arg(long)]
    sites_off: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load config");
            std::process::exit(1);
        }
    };
    if cli.geoip_off {
        cfg.geoip.enabled = false;
    }
    if cli.sites_off {
        cfg.sites.enabled = false;
    }
    let cfg = Arc::new(cfg);

    info!(
        listen = %cfg.listen,
        interval_secs = cfg.interval_secs,
        geoip = cfg.geoip.enabled,
        sites = cfg.sites.targets.len(),
        "starting netsentry"
    );

    let now = now_unix();
    let stats = Arc::new(Stats::new(now));
    let dashboard_state = Arc::new(RwLock::new(DashboardState::new(&cfg.sites.targets, now)));
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // Cycles run from startup; the toggle only pauses them.
    let (control, control_rx) = MonitorControl::new(true);
    let control = Arc::new(control);
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();

    let dashboard_task = tokio::spawn(dashboard::run(
        updates_rx,
        dashboard_state.clone(),
        metrics.clone(),
    ));

    let http_task = {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let http_state = dashboard_state.clone();
        let control = control.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, http_state, control);
            let addr: SocketAddr = match cfg.listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %cfg.listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to start HTTP server");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let scheduler_task = {
        let client = Client::builder()
            .user_agent(concat!("netsentry/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        let scheduler = PollScheduler::new(cfg.clone(), client, stats, metrics.clone(), updates_tx);
        tokio::spawn(scheduler.run(control_rx, shutdown_rx.clone()))
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("Ctrl+C received, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = scheduler_task.await;
    let _ = http_task.await;
    // In-flight probe tasks hold sender clones until their own timeouts fire.
    dashboard_task.abort();
    let _ = dashboard_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
