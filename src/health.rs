use axum::http::StatusCode;
use tokio::net::TcpStream;
use tracing::warn;

use crate::config::Config;

/// Outcome of the liveness probe: status plus the diagnostic body.
#[derive(Debug, PartialEq)]
pub struct HealthReport {
    pub status: StatusCode,
    pub body: String,
}

/// Dial the Grafana host and our own listen address.
///
/// Only proves something accepts TCP connections there, not that the API
/// behind it works.
pub async fn check(config: &Config) -> HealthReport {
    let mut failures = Vec::new();

    match config.grafana_dial_address() {
        Some(addr) => {
            if let Err(e) = TcpStream::connect(&addr).await {
                failures.push(format!("500 - {addr}: {e}"));
            }
        }
        None => failures.push(format!("500 - invalid grafana host {}", config.grafana_host)),
    }

    let local = config.listen_address();
    if let Err(e) = TcpStream::connect(&local).await {
        failures.push(format!("500 - local API - {local}: {e}"));
    }

    if failures.is_empty() {
        return HealthReport {
            status: StatusCode::OK,
            body: String::new(),
        };
    }

    let body = failures.join("\n");
    warn!("Health check failed: {}", body);
    HealthReport {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn config_for(grafana: &str, local_port: u16) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: local_port,
            grafana_host: grafana.to_string(),
            grafana_api_key: "key".to_string(),
            ..Config::default()
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_both_reachable() {
        let grafana = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = config_for(
            &format!("http://{}", grafana.local_addr().unwrap()),
            local.local_addr().unwrap().port(),
        );

        let report = check(&config).await;
        assert_eq!(report.status, StatusCode::OK);
        assert!(report.body.is_empty());
    }

    #[tokio::test]
    async fn test_grafana_unreachable() {
        let local = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = config_for(
            &format!("http://127.0.0.1:{}", closed_port().await),
            local.local_addr().unwrap().port(),
        );

        let report = check(&config).await;
        assert_eq!(report.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(report.body.starts_with("500 - 127.0.0.1:"));
        assert!(!report.body.contains("local API"));
    }

    #[tokio::test]
    async fn test_local_unreachable() {
        let grafana = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = config_for(
            &format!("http://{}", grafana.local_addr().unwrap()),
            closed_port().await,
        );

        let report = check(&config).await;
        assert_eq!(report.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(report.body.starts_with("500 - local API - "));
    }
}
