use crate::config::SiteConfig;
use crate::state::{now_unix, SiteState, SiteStatus};
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::warn;

/// Checks every site concurrently. The result keeps the configured order;
/// a site whose task died is reported offline.
pub async fn check_all(
    client: &Client,
    sites: &[SiteConfig],
    timeout: Duration,
) -> Vec<SiteStatus> {
    let mut tasks = JoinSet::new();
    for (idx, site) in sites.iter().cloned().enumerate() {
        let client = client.clone();
        tasks.spawn(async move { (idx, check_site(&client, &site, timeout).await) });
    }

    let mut slots: Vec<Option<SiteStatus>> = vec![None; sites.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, status)) => slots[idx] = Some(status),
            Err(err) => warn!(error = %err, "site check task failed"),
        }
    }

    slots
        .into_iter()
        .zip(sites)
        .map(|(slot, site)| slot.unwrap_or_else(|| offline(site)))
        .collect()
}

pub async fn check_site(client: &Client, site: &SiteConfig, timeout: Duration) -> SiteStatus {
    let start = Instant::now();
    match client.get(&site.url).timeout(timeout).send().await {
        Ok(resp) => {
            let latency_ms = start.elapsed().as_millis() as u64;
            let code = resp.status();
            let status = if code == StatusCode::OK {
                SiteState::Online
            } else {
                SiteState::HttpError(code.as_u16())
            };
            SiteStatus {
                name: site.name.clone(),
                url: site.url.clone(),
                status,
                latency_ms: Some(latency_ms),
                checked_at_unix: now_unix(),
            }
        }
        Err(err) => {
            warn!(site = %site.name, url = %site.url, error = %err, "site check failed");
            offline(site)
        }
    }
}

fn offline(site: &SiteConfig) -> SiteStatus {
    SiteStatus {
        name: site.name.clone(),
        url: site.url.clone(),
        status: SiteState::Offline,
        latency_ms: None,
        checked_at_unix: now_unix(),
    }
}
