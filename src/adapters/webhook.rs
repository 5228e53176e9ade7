//! Generic webhook adapter: POSTs the serialized alert as JSON.

use crate::core::{Alert, DeliveryResponse, Destination, DestinationAdapter};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Delivers alerts to any destination that accepts a JSON POST.
///
/// Classification: 2xx is success; 429 and 5xx are transient (the sink may
/// recover); every other status is permanent (the request itself is bad).
/// Network-level failures are transient.
pub struct WebhookAdapter {
    client: reqwest::Client,
}

impl WebhookAdapter {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn classify(status: StatusCode, body: String) -> DeliveryResponse {
        let success = status.is_success();
        let transient = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
        DeliveryResponse {
            status_code: Some(status.as_u16()),
            success,
            permanent: !success && !transient,
            message: if success {
                "delivered".to_string()
            } else {
                format!("webhook returned {status}: {}", truncate(&body, 256))
            },
        }
    }
}

#[async_trait]
impl DestinationAdapter for WebhookAdapter {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert, destination: &Destination) -> Result<DeliveryResponse> {
        let Some(url) = destination.config.webhook_url.as_deref() else {
            return Ok(DeliveryResponse {
                status_code: None,
                success: false,
                permanent: true,
                message: "destination has no webhook URL".to_string(),
            });
        };

        debug!(
            alert_id = %alert.alert_id,
            destination_id = %destination.destination_id,
            "posting alert to webhook"
        );

        let mut request = self.client.post(url).json(alert);
        if let Some(token) = destination.config.api_token.as_deref() {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Ok(Self::classify(status, body))
            }
            // Connection resets and timeouts are the sink's bad day, not a
            // broken configuration.
            Err(e) => Ok(DeliveryResponse {
                status_code: None,
                success: false,
                permanent: false,
                message: format!("webhook request failed: {e}"),
            }),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DestinationConfig, DestinationType, Severity};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn destination(url: &str) -> Destination {
        Destination {
            destination_id: "hook-1".to_string(),
            destination_type: DestinationType::Webhook,
            display_name: "ops hook".to_string(),
            default_for_severity: vec![Severity::High],
            config: DestinationConfig {
                webhook_url: Some(url.to_string()),
                ..Default::default()
            },
        }
    }

    fn alert() -> Alert {
        Alert {
            alert_id: "a1".to_string(),
            severity: Severity::High,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn posts_the_serialized_alert_and_reports_success() {
        let server = MockServer::start().await;
        let alert = alert();
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(&alert))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let adapter = WebhookAdapter::new(Duration::from_secs(5)).unwrap();
        let response = adapter
            .deliver(&alert, &destination(&format!("{}/hook", server.uri())))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.status_code, Some(200));
    }

    #[tokio::test]
    async fn rate_limiting_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let adapter = WebhookAdapter::new(Duration::from_secs(5)).unwrap();
        let response = adapter
            .deliver(&alert(), &destination(&server.uri()))
            .await
            .unwrap();

        assert!(!response.success);
        assert!(!response.permanent);
        assert_eq!(response.status_code, Some(429));
    }

    #[tokio::test]
    async fn server_errors_are_transient_and_client_errors_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(400).set_body_string("no such channel"))
            .mount(&server)
            .await;

        let adapter = WebhookAdapter::new(Duration::from_secs(5)).unwrap();

        let flaky = adapter
            .deliver(&alert(), &destination(&format!("{}/flaky", server.uri())))
            .await
            .unwrap();
        assert!(!flaky.permanent);

        let bad = adapter
            .deliver(&alert(), &destination(&format!("{}/bad", server.uri())))
            .await
            .unwrap();
        assert!(bad.permanent);
        assert!(bad.message.contains("no such channel"));
    }

    #[tokio::test]
    async fn missing_webhook_url_is_a_permanent_failure() {
        let adapter = WebhookAdapter::new(Duration::from_secs(5)).unwrap();
        let mut dest = destination("http://unused.example.com");
        dest.config.webhook_url = None;

        let response = adapter.deliver(&alert(), &dest).await.unwrap();
        assert!(!response.success);
        assert!(response.permanent);
    }

    #[tokio::test]
    async fn connection_failure_is_transient() {
        // Nothing listens on this port.
        let adapter = WebhookAdapter::new(Duration::from_secs(1)).unwrap();
        let response = adapter
            .deliver(&alert(), &destination("http://127.0.0.1:1/hook"))
            .await
            .unwrap();

        assert!(!response.success);
        assert!(!response.permanent);
    }

    #[tokio::test]
    async fn api_token_is_sent_as_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let adapter = WebhookAdapter::new(Duration::from_secs(5)).unwrap();
        let mut dest = destination(&server.uri());
        dest.config.api_token = Some("s3cret".to_string());

        let response = adapter.deliver(&alert(), &dest).await.unwrap();
        assert!(response.success);
    }
}
