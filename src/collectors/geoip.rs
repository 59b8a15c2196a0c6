use crate::collectors::ProbeError;
use crate::config::GeoIpConfig;
use crate::state::GeoIpResult;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const UNKNOWN: &str = "Unknown";
const SUSPICIOUS_ISP_MARKERS: [&str; 3] = ["vpn", "proxy", "hosting"];

#[derive(Debug, Deserialize)]
struct IpInfoPayload {
    ip: Option<String>,
    city: Option<String>,
    country_name: Option<String>,
    org: Option<String>,
    #[serde(default)]
    asn: Option<Value>,
}

#[derive(Clone)]
pub struct GeoIpClassifier {
    client: Client,
    url: String,
    timeout: Duration,
}

impl GeoIpClassifier {
    pub fn new(client: Client, cfg: &GeoIpConfig) -> Self {
        Self {
            client,
            url: cfg.url.clone(),
            timeout: cfg.timeout(),
        }
    }

    /// One lookup against the geolocation endpoint. Nothing is cached between calls.
    pub async fn classify(&self) -> Result<GeoIpResult, ProbeError> {
        let resp = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(ProbeError::Protocol(format!(
                "geoip endpoint returned {}",
                resp.status().as_u16()
            )));
        }

        let body = resp.bytes().await?;
        parse_payload(&body)
    }
}

pub fn parse_payload(body: &[u8]) -> Result<GeoIpResult, ProbeError> {
    let payload: IpInfoPayload = serde_json::from_slice(body)
        .map_err(|err| ProbeError::Protocol(format!("malformed geoip payload: {err}")))?;

    let asn_type = payload
        .asn
        .as_ref()
        .and_then(|asn| asn.get("type"))
        .and_then(Value::as_str);
    let isp = payload.org.unwrap_or_else(|| UNKNOWN.to_string());
    let is_vpn_suspected = is_vpn_suspected(&isp, asn_type);

    Ok(GeoIpResult {
        ip: payload.ip.unwrap_or_else(|| UNKNOWN.to_string()),
        city: payload.city.unwrap_or_else(|| UNKNOWN.to_string()),
        country: payload.country_name.unwrap_or_else(|| UNKNOWN.to_string()),
        isp,
        is_vpn_suspected,
    })
}

/// Heuristic only: matches the provider name, not the traffic.
pub fn is_vpn_suspected(isp: &str, asn_type: Option<&str>) -> bool {
    let isp = isp.to_lowercase();
    SUSPICIOUS_ISP_MARKERS.iter().any(|m| isp.contains(m)) || asn_type == Some("hosting")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::{routing::get, Router};
    use std::time::Instant;
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/json/")
    }

    fn local_client() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    fn classifier(url: String) -> GeoIpClassifier {
        let cfg = GeoIpConfig {
            url,
            timeout_ms: 2000,
            ..GeoIpConfig::default()
        };
        GeoIpClassifier::new(local_client(), &cfg)
    }

    #[test]
    fn vpn_org_is_suspected() {
        assert!(is_vpn_suspected("FastHost VPN Services", None));
        assert!(is_vpn_suspected("Some PROXY Network", None));
        assert!(is_vpn_suspected("Acme Hosting Ltd", None));
    }

    #[test]
    fn residential_org_is_not_suspected() {
        assert!(!is_vpn_suspected("Comcast Cable", None));
        assert!(!is_vpn_suspected("Comcast Cable", Some("isp")));
    }

    #[test]
    fn hosting_address_space_is_suspected() {
        assert!(is_vpn_suspected("Comcast Cable", Some("hosting")));
    }

    #[test]
    fn payload_fields_are_mapped() {
        let body = br#"{"ip":"203.0.113.7","city":"Berlin","country_name":"Germany","org":"Comcast Cable","asn":"AS7922"}"#;
        let result = parse_payload(body).unwrap();
        assert_eq!(result.ip, "203.0.113.7");
        assert_eq!(result.city, "Berlin");
        assert_eq!(result.country, "Germany");
        assert_eq!(result.isp, "Comcast Cable");
        assert!(!result.is_vpn_suspected);
    }

    #[test]
    fn nested_asn_type_is_honoured() {
        let body = br#"{"ip":"198.51.100.1","org":"Example Net","asn":{"type":"hosting"}}"#;
        let result = parse_payload(body).unwrap();
        assert!(result.is_vpn_suspected);
        assert_eq!(result.city, "Unknown");
    }

    #[test]
    fn malformed_payload_is_protocol_failure() {
        let err = parse_payload(b"<html>rate limited</html>").unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[tokio::test]
    async fn classify_reads_live_endpoint() {
        let app = Router::new().route(
            "/json/",
            get(|| async {
                r#"{"ip":"192.0.2.10","city":"Paris","country_name":"France","org":"FastHost VPN Services"}"#
            }),
        );
        let url = serve(app).await;

        let result = classifier(url).classify().await.unwrap();
        assert!(result.is_vpn_suspected);
        assert_eq!(result.country, "France");
    }

    #[tokio::test]
    async fn non_ok_status_is_failure() {
        let app = Router::new().route("/json/", get(|| async { AxumStatus::TOO_MANY_REQUESTS }));
        let url = serve(app).await;

        let err = classifier(url).classify().await.unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[tokio::test]
    async fn slow_endpoint_is_transport_failure_after_timeout() {
        let app = Router::new().route(
            "/json/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                r#"{"ip":"192.0.2.10"}"#
            }),
        );
        let cfg = GeoIpConfig {
            url: serve(app).await,
            timeout_ms: 200,
            ..GeoIpConfig::default()
        };
        let classifier = GeoIpClassifier::new(local_client(), &cfg);

        let start = Instant::now();
        let err = classifier.classify().await.unwrap_err();
        assert_eq!(err.kind(), "transport");
        assert!(start.elapsed() < cfg.timeout() + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn refused_connection_is_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = classifier(format!("http://{addr}/json/"))
            .classify()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport");
    }
}
