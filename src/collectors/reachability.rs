use crate::config::ReachabilityConfig;
use crate::state::{now_unix, ReachabilityResult};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tracing::debug;

/// Opens a TCP connection to `host:port`. Any failure, including the timeout,
/// means unreachable. No retries.
pub async fn check(host: &str, port: u16, timeout: Duration) -> bool {
    let addr = format!("{host}:{port}");
    connect_within(&addr, timeout, TcpStream::connect(&addr)).await
}

async fn connect_within<F, T>(addr: &str, timeout: Duration, connect: F) -> bool
where
    F: Future<Output = io::Result<T>>,
{
    match time::timeout(timeout, connect).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(err)) => {
            debug!(address = %addr, error = %err, "reachability connect failed");
            false
        }
        Err(_elapsed) => {
            debug!(address = %addr, "reachability connect timeout");
            false
        }
    }
}

pub async fn probe(cfg: &ReachabilityConfig) -> ReachabilityResult {
    let reachable = check(&cfg.host, cfg.port, cfg.timeout()).await;
    ReachabilityResult {
        reachable,
        checked_at_unix: now_unix(),
    }
}
