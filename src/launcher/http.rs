//! HTTP launch service client
//!
//! - `POST {base}/calls` with `{ "origination_id", "phone_number", "metadata" }`
//!   -> `{ "call_id": string | null }`
//! - `GET {base}/calls/{id}` -> `{ "status": ..., "ended_reason": ... }`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde_json::{Value, json};

use super::{CallLauncher, CallStatus, LaunchError, LaunchOutcome};
use crate::domain::Metadata;
use crate::store::{endpoint, parse_base_url, parse_retry_after};

/// Statuses that mean the call is over
const ENDED_STATUSES: &[&str] = &["ended", "completed", "failed", "canceled", "cancelled", "no-answer", "busy"];

/// Connection settings for the launch service
#[derive(Debug, Clone)]
pub struct HttpCallLauncherConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub timeout: Duration,
}

impl Default for HttpCallLauncherConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081/v1".to_string(),
            api_key_env: "LEADDIAL_VOICE_API_KEY".to_string(),
            timeout: Duration::from_secs(20),
        }
    }
}

/// reqwest-backed [`CallLauncher`]
pub struct HttpCallLauncher {
    client: Client,
    api_key: String,
    base_url: Url,
}

impl HttpCallLauncher {
    /// Create a client, reading the API key from the configured env var
    pub fn new(config: HttpCallLauncherConfig) -> Result<Self, LaunchError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| LaunchError::MissingApiKey {
            env_var: config.api_key_env.clone(),
        })?;
        Self::with_api_key(api_key, config)
    }

    /// Create a client with an explicit API key
    pub fn with_api_key(api_key: String, config: HttpCallLauncherConfig) -> Result<Self, LaunchError> {
        let base_url =
            parse_base_url(&config.base_url).ok_or_else(|| LaunchError::InvalidBaseUrl(config.base_url.clone()))?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    fn calls_url(&self) -> Url {
        endpoint(&self.base_url, &["calls"])
    }

    fn call_url(&self, call_id: &str) -> Url {
        endpoint(&self.base_url, &["calls", call_id])
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, LaunchError> {
        let response: Response = request.bearer_auth(&self.api_key).send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = parse_retry_after(&response);
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LaunchError::from_status(status.as_u16(), body, retry_after));
        }

        response
            .json()
            .await
            .map_err(|e| LaunchError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }
}

fn build_launch_body(origination_id: &str, phone: &str, metadata: &Metadata) -> Value {
    json!({
        "origination_id": origination_id,
        "phone_number": phone,
        "metadata": metadata,
    })
}

/// An empty or missing call id counts as "accepted but untracked"
fn parse_launch_body(body: &Value) -> LaunchOutcome {
    let call_id = body
        .get("call_id")
        .or_else(|| body.get("id"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from);
    LaunchOutcome { call_id }
}

fn parse_status_body(body: &Value) -> Result<CallStatus, LaunchError> {
    let status = body
        .get("status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| LaunchError::InvalidResponse("call status missing `status`".to_string()))?
        .to_ascii_lowercase();
    let ended = ENDED_STATUSES.contains(&status.as_str());
    let reason = body
        .get("ended_reason")
        .and_then(|v| v.as_str())
        .map(String::from)
        .or_else(|| ended.then(|| status.clone()));

    Ok(CallStatus { ended, reason })
}

#[async_trait]
impl CallLauncher for HttpCallLauncher {
    async fn launch_call(
        &self,
        origination_id: &str,
        phone: &str,
        metadata: &Metadata,
    ) -> Result<LaunchOutcome, LaunchError> {
        let body = build_launch_body(origination_id, phone, metadata);
        let response = self.send(self.client.post(self.calls_url()).json(&body)).await?;
        Ok(parse_launch_body(&response))
    }

    async fn get_call_status(&self, call_id: &str) -> Result<CallStatus, LaunchError> {
        let response = self.send(self.client.get(self.call_url(call_id))).await?;
        parse_status_body(&response)
    }
}

impl std::fmt::Debug for HttpCallLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCallLauncher").field("base_url", &self.base_url.as_str()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let config = HttpCallLauncherConfig {
            base_url: "https://voice.example.com/v1/".to_string(),
            ..Default::default()
        };
        let launcher = HttpCallLauncher::with_api_key("key".to_string(), config).unwrap();
        assert_eq!(launcher.calls_url().as_str(), "https://voice.example.com/v1/calls");
        assert_eq!(launcher.call_url("c-9").as_str(), "https://voice.example.com/v1/calls/c-9");
        assert_eq!(
            launcher.call_url("c/9?x#y").as_str(),
            "https://voice.example.com/v1/calls/c%2F9%3Fx%23y"
        );
    }

    #[test]
    fn test_launch_body_forwards_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("lead_id".to_string(), json!("lead-1"));
        let body = build_launch_body("orig-1", "+14155550100", &metadata);

        assert_eq!(body["origination_id"], "orig-1");
        assert_eq!(body["phone_number"], "+14155550100");
        assert_eq!(body["metadata"]["lead_id"], "lead-1");
    }

    #[test]
    fn test_parse_launch_body() {
        assert_eq!(
            parse_launch_body(&json!({"call_id": "c-1"})).call_id.as_deref(),
            Some("c-1")
        );
        assert_eq!(parse_launch_body(&json!({"id": "c-2"})).call_id.as_deref(), Some("c-2"));
        assert!(parse_launch_body(&json!({"call_id": null})).call_id.is_none());
        assert!(parse_launch_body(&json!({"call_id": ""})).call_id.is_none());
        assert!(parse_launch_body(&json!({})).call_id.is_none());
    }

    #[test]
    fn test_parse_status_body() {
        let active = parse_status_body(&json!({"status": "in-progress"})).unwrap();
        assert!(!active.ended);
        assert!(active.reason.is_none());

        let ended = parse_status_body(&json!({"status": "ended", "ended_reason": "customer-ended-call"})).unwrap();
        assert!(ended.ended);
        assert_eq!(ended.reason.as_deref(), Some("customer-ended-call"));

        let no_answer = parse_status_body(&json!({"status": "NO-ANSWER"})).unwrap();
        assert!(no_answer.ended);
        assert_eq!(no_answer.reason.as_deref(), Some("no-answer"));
    }

    #[test]
    fn test_parse_status_body_missing_status() {
        let err = parse_status_body(&json!({"ended_reason": "x"})).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidResponse(_)));
    }

    #[test]
    fn test_missing_api_key() {
        let config = HttpCallLauncherConfig {
            api_key_env: "LEADDIAL_TEST_UNSET_VOICE_KEY".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            HttpCallLauncher::new(config),
            Err(LaunchError::MissingApiKey { .. })
        ));
    }
}
