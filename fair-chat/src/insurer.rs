use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{
    config::ChatConfig,
    error::{ChatError, Result},
    query::QueryParams,
};

/// Request body of the insurer FAIR details endpoint. Absent filters are sent as `""`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsurerPayload {
    #[serde(rename = "insurerId")]
    pub insurer_id: String,
    #[serde(rename = "AttackType")]
    pub attack_type: String,
    #[serde(rename = "Year")]
    pub year: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

impl InsurerPayload {
    pub fn new(insurer_id: impl Into<String>, params: &QueryParams, user_id: Option<&str>) -> Self {
        Self {
            insurer_id: insurer_id.into(),
            attack_type: params.attack_type.clone().unwrap_or_default(),
            year: params.year.clone().unwrap_or_default(),
            user_id: user_id.unwrap_or_default().to_string(),
        }
    }
}

/// Source of the analytics data a turn is grounded in.
#[async_trait]
pub trait InsurerDataSource: Send + Sync {
    /// Returns the endpoint's JSON body untouched.
    async fn fetch_insurer_data(&self, payload: &InsurerPayload) -> Result<Value>;
}

/// HTTP client for the insurer analytics API.
pub struct InsurerClient {
    client: Client,
    url: String,
}

impl InsurerClient {
    pub fn new(url: impl Into<String>, accept_invalid_certs: bool) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| ChatError::InsurerRequest(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        Self::new(config.insurer_api_url.clone(), config.accept_invalid_certs)
    }
}

#[async_trait]
impl InsurerDataSource for InsurerClient {
    async fn fetch_insurer_data(&self, payload: &InsurerPayload) -> Result<Value> {
        debug!(
            url = %self.url,
            insurer_id = %payload.insurer_id,
            attack_type = %payload.attack_type,
            year = %payload.year,
            "Requesting insurer FAIR details"
        );

        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ChatError::InsurerRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::InsurerStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ChatError::InsurerRequest(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| ChatError::InsurerDecode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/api/GetInsurerFAIRDetails/", addr)
    }

    #[test]
    fn test_payload_field_names() {
        let params = QueryParams {
            attack_type: Some("Phishing".to_string()),
            year: None,
        };
        let payload = InsurerPayload::new("11", &params, None);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({"insurerId": "11", "AttackType": "Phishing", "Year": "", "userId": ""})
        );
    }

    #[tokio::test]
    async fn test_returns_parsed_body_and_sends_payload() {
        let router = Router::new().route(
            "/api/GetInsurerFAIRDetails/",
            post(|Json(body): Json<Value>| async move {
                Json(json!({ "received": body, "ale": 14270566.59 }))
            }),
        );
        let client = InsurerClient::new(serve(router).await, true).unwrap();

        let params = QueryParams {
            attack_type: Some("DDoS".to_string()),
            year: Some("2023".to_string()),
        };
        let payload = InsurerPayload::new("42", &params, Some("u-1"));
        let data = client.fetch_insurer_data(&payload).await.unwrap();

        assert_eq!(data["ale"], json!(14270566.59));
        assert_eq!(data["received"]["insurerId"], "42");
        assert_eq!(data["received"]["AttackType"], "DDoS");
        assert_eq!(data["received"]["Year"], "2023");
        assert_eq!(data["received"]["userId"], "u-1");
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let router = Router::new().route(
            "/api/GetInsurerFAIRDetails/",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let client = InsurerClient::new(serve(router).await, true).unwrap();

        let err = client
            .fetch_insurer_data(&InsurerPayload::new("11", &QueryParams::default(), None))
            .await
            .unwrap_err();
        match err {
            ChatError::InsurerStatus { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_json_is_an_error() {
        let router = Router::new().route(
            "/api/GetInsurerFAIRDetails/",
            post(|| async { "definitely not json" }),
        );
        let client = InsurerClient::new(serve(router).await, true).unwrap();

        let err = client
            .fetch_insurer_data(&InsurerPayload::new("11", &QueryParams::default(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InsurerDecode(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = InsurerClient::new(format!("http://{}/", addr), true).unwrap();
        let err = client
            .fetch_insurer_data(&InsurerPayload::new("11", &QueryParams::default(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InsurerRequest(_)));
    }
}
