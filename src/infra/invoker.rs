//! Cross-service action calls.
//!
//! Population resolves references by calling an action (`users.get`) on the
//! service that owns them. [`RemoteInvoker`] is that primitive; the broker
//! implements it in-process and [`HttpInvoker`] over HTTP.

use crate::transport::http::types::ApiResponse;
use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;

/// A single fallible RPC to a named action. No retry is done at this layer.
#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    async fn call(&self, action: &str, params: Map<String, JsonValue>) -> anyhow::Result<JsonValue>;
}

/// Splits `users.get` into (`users`, `get`). The service part may itself contain dots.
pub fn split_action_name(name: &str) -> anyhow::Result<(&str, &str)> {
    match name.rsplit_once('.') {
        Some((service, action)) if !service.is_empty() && !action.is_empty() => Ok((service, action)),
        _ => Err(anyhow!("action name '{}' must look like '<service>.<action>'", name)),
    }
}

/// Calls actions exposed by another entity-store instance at `POST {base}/api/{service}/{action}`.
#[derive(Clone)]
pub struct HttpInvoker {
    base_url: String,
    client: reqwest::Client,
}

impl HttpInvoker {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl RemoteInvoker for HttpInvoker {
    async fn call(&self, action: &str, params: Map<String, JsonValue>) -> anyhow::Result<JsonValue> {
        let (service, action_name) = split_action_name(action)?;
        let url = format!("{}/api/{}/{}", self.base_url, service, action_name);

        let response: ApiResponse = self
            .client
            .post(&url)
            .json(&JsonValue::Object(params))
            .send()
            .await
            .with_context(|| format!("calling {}", url))?
            .json()
            .await
            .with_context(|| format!("decoding response of {}", url))?;

        if !response.success {
            return Err(anyhow!(
                "{} failed: {}",
                action,
                response.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
        Ok(response.data.unwrap_or(JsonValue::Null))
    }
}
