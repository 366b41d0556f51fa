//! Collector endpoint client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use places_harvest::NormalizedRecord;

use crate::types::DeliveryError;

/// Acknowledgement of a delivered batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Records the collector reports as saved.
    pub saved: usize,
}

/// The remote collector records are delivered to.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Deliver one batch as a single request.
    async fn deliver(&self, records: &[NormalizedRecord]) -> Result<DeliveryReceipt, DeliveryError>;

    /// Whether the collector is reachable.
    async fn probe(&self) -> bool;
}

#[derive(Serialize)]
struct DeliveryBody<'a> {
    items: &'a [NormalizedRecord],
}

/// HTTP collector: `POST {endpoint}/api/data`, `GET {endpoint}/health`.
#[derive(Clone)]
pub struct HttpCollector {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCollector {
    pub fn new(endpoint: &str, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint)
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn deliver(&self, records: &[NormalizedRecord]) -> Result<DeliveryReceipt, DeliveryError> {
        let response = self
            .client
            .post(self.url("/api/data"))
            .json(&DeliveryBody { items: records })
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DeliveryError::InvalidBody(e.to_string()))?;

        // A missing or zero count means the collector did not say; assume all.
        let saved = body
            .get("saved")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .filter(|&n| n > 0)
            .unwrap_or(records.len());

        Ok(DeliveryReceipt { saved })
    }

    async fn probe(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                tracing::debug!("Health probe failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(name: &str) -> NormalizedRecord {
        NormalizedRecord::from(json!({ "name": name }).as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn test_deliver_posts_items_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/data"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success", "received": 2, "saved": 2
            })))
            .expect(1)
            .mount(&server)
            .await;

        let collector = HttpCollector::new(&format!("{}/", server.uri()), 5_000);
        let receipt = tokio_test::assert_ok!(collector.deliver(&[record("A"), record("B")]).await);
        assert_eq!(receipt.saved, 2);

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body, json!({ "items": [{ "name": "A" }, { "name": "B" }] }));
    }

    #[tokio::test]
    async fn test_saved_defaults_to_batch_size() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/data"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
            .mount(&server)
            .await;

        let collector = HttpCollector::new(&server.uri(), 5_000);
        let receipt = collector
            .deliver(&[record("A"), record("B"), record("C")])
            .await
            .unwrap();
        assert_eq!(receipt.saved, 3);
    }

    #[tokio::test]
    async fn test_error_status_is_delivery_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let collector = HttpCollector::new(&server.uri(), 5_000);
        let err = tokio_test::assert_err!(collector.deliver(&[record("A")]).await);
        assert_eq!(err, DeliveryError::Status(503));
        assert_eq!(err.to_string(), "HTTP 503");
    }

    #[tokio::test]
    async fn test_non_json_success_is_delivery_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let collector = HttpCollector::new(&server.uri(), 5_000);
        let err = collector.deliver(&[record("A")]).await.unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidBody(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        // Port 9 (discard) is not listening in test environments.
        let collector = HttpCollector::new("http://127.0.0.1:9", 1_000);
        let err = collector.deliver(&[record("A")]).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
        assert!(!collector.probe().await);
    }

    #[tokio::test]
    async fn test_probe_uses_health_route() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
            .mount(&server)
            .await;

        assert!(HttpCollector::new(&server.uri(), 5_000).probe().await);

        let down = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&down)
            .await;
        assert!(!HttpCollector::new(&down.uri(), 5_000).probe().await);
    }
}
