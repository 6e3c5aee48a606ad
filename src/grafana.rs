use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ConfigStore;

/// Body of `POST /api/annotations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnotationRequest {
    pub text: String,
    pub tags: Vec<String>,
    /// Start of the annotated region, epoch milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(rename = "timeEnd", skip_serializing_if = "Option::is_none")]
    pub time_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AnnotationResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    id: Option<i64>,
    #[serde(rename = "endId", default)]
    end_id: Option<i64>,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("Unable to post grafana annotation {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Error in grafana server response {0}")]
    Status(StatusCode),
    #[error("Unable to decode grafana response {0}")]
    Decode(#[source] reqwest::Error),
}

/// Destination of composed annotations.
#[async_trait]
pub trait AnnotationSender: Send + Sync {
    /// Deliver one annotation and return the server's status message.
    async fn send(&self, annotation: &AnnotationRequest) -> Result<String, SendError>;
}

/// Grafana HTTP API client.
///
/// The URL and key are read from the live configuration on every call, so a
/// reload retargets the client without rebuilding its connection pool.
pub struct GrafanaClient {
    client: reqwest::Client,
    config: Arc<ConfigStore>,
}

impl GrafanaClient {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl AnnotationSender for GrafanaClient {
    async fn send(&self, annotation: &AnnotationRequest) -> Result<String, SendError> {
        let config = self.config.current();
        let url = format!(
            "{}/api/annotations",
            config.grafana_host.trim_end_matches('/')
        );

        debug!("Posting annotation to {}: {:?}", url, annotation);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", config.grafana_api_key))
            .header("Content-Type", "application/json")
            .json(annotation)
            .send()
            .await
            .map_err(SendError::Transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(SendError::Status(status));
        }

        let body: AnnotationResponse = response.json().await.map_err(SendError::Decode)?;
        debug!("Grafana annotation id={:?} endId={:?}", body.id, body.end_id);
        Ok(body.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::{http::HeaderMap, routing::post, Json, Router};
    use serde_json::{json, Value};
    use tokio::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    /// Serve `app` on an ephemeral local port and return its base URL.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: &str, api_key: &str) -> GrafanaClient {
        let config = Config {
            grafana_host: base_url.to_string(),
            grafana_api_key: api_key.to_string(),
            ..Config::default()
        };
        GrafanaClient::new(Arc::new(ConfigStore::new(None, config)))
    }

    fn annotation() -> AnnotationRequest {
        AnnotationRequest {
            text: "reboot db".to_string(),
            tags: vec!["fyi".to_string(), "alice".to_string(), "infra".to_string()],
            time: None,
            time_end: None,
        }
    }

    #[tokio::test]
    async fn test_send_success() {
        let seen: Seen = Arc::default();
        let recorder = Arc::clone(&seen);
        let app = Router::new().route(
            "/api/annotations",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let recorder = Arc::clone(&recorder);
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    recorder.lock().await.push((auth, body));
                    Json(json!({"message": "Annotation added", "id": 1, "endId": 0}))
                }
            }),
        );
        let base = serve(app).await;

        let message = client(&format!("{base}/"), "key")
            .send(&annotation())
            .await
            .unwrap();
        assert_eq!(message, "Annotation added");

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_deref(), Some("Bearer key"));
        assert_eq!(
            seen[0].1,
            json!({"text": "reboot db", "tags": ["fyi", "alice", "infra"]})
        );
    }

    #[tokio::test]
    async fn test_send_non_200() {
        let app = Router::new().route(
            "/api/annotations",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "nope") }),
        );
        let base = serve(app).await;

        let err = client(&base, "bad")
            .send(&annotation())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error in grafana server response 401 Unauthorized"
        );
    }

    #[tokio::test]
    async fn test_send_undecodable_body() {
        let app = Router::new().route("/api/annotations", post(|| async { "not json" }));
        let base = serve(app).await;

        let err = client(&base, "key")
            .send(&annotation())
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Decode(_)));
        assert!(err
            .to_string()
            .starts_with("Unable to decode grafana response "));
    }

    #[tokio::test]
    async fn test_send_transport_error() {
        // Bind then drop to get a port with nothing listening on it.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}"), "key")
            .send(&annotation())
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Transport(_)));
        assert!(err
            .to_string()
            .starts_with("Unable to post grafana annotation"));
    }

    #[test]
    fn test_time_fields_serialized_when_set() {
        let mut request = annotation();
        request.time = Some(1_600_000_000_000);
        request.time_end = Some(1_600_000_060_000);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["time"], 1_600_000_000_000i64);
        assert_eq!(value["timeEnd"], 1_600_000_060_000i64);
    }
}
