//! Loki log-query capabilities.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::flow::context::ContextSnapshot;
use crate::registry::{Capability, Params, StepOutput};

use super::{param_str, str_from};

const DEFAULT_APP: &str = "chat-api";
const DEFAULT_LIMIT: u32 = 100;

/// Client for the Loki query_range API.
pub struct LokiClient {
    http: reqwest::Client,
    base_url: String,
}

impl LokiClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Run a LogQL query over the trailing `since` window, returning the raw
    /// log lines newest-last.
    pub async fn query_range(
        &self,
        query: &str,
        since: chrono::Duration,
        limit: u32,
    ) -> Result<Vec<String>> {
        let end = Utc::now();
        let start = end - since;
        let url = format!("{}/loki/api/v1/query_range", self.base_url);
        debug!(%url, %query, "Loki query");

        let response = self
            .http
            .get(&url)
            .query(&[
                ("query", query.to_string()),
                ("start", start.timestamp_nanos_opt().unwrap_or(0).to_string()),
                ("end", end.timestamp_nanos_opt().unwrap_or(0).to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;

        let body: Value = response.json().await.context("invalid Loki response")?;
        let mut lines = Vec::new();
        if let Some(streams) = body.pointer("/data/result").and_then(Value::as_array) {
            for stream in streams {
                if let Some(values) = stream.get("values").and_then(Value::as_array) {
                    for entry in values {
                        if let Some(line) = entry.get(1).and_then(Value::as_str) {
                            lines.push(line.to_string());
                        }
                    }
                }
            }
        }
        Ok(lines)
    }
}

fn target_app(context: &ContextSnapshot, params: &Params) -> String {
    param_str(params, "app")
        .or_else(|| str_from(context, "app_name"))
        .unwrap_or_else(|| DEFAULT_APP.to_string())
}

/// Error-level log lines for the target app over the last hour.
pub struct RecentErrors {
    pub client: Arc<LokiClient>,
}

#[async_trait]
impl Capability for RecentErrors {
    async fn invoke(&self, context: &ContextSnapshot, params: &Params) -> Result<StepOutput> {
        let app = target_app(context, params);
        let query = format!(r#"{{app="{app}"}} |= "error""#);
        let lines = self
            .client
            .query_range(&query, chrono::Duration::hours(1), DEFAULT_LIMIT)
            .await?;

        let report = if lines.is_empty() {
            format!("No error lines for '{app}' in the last hour")
        } else {
            format!(
                "{} error lines for '{app}' in the last hour:\n{}",
                lines.len(),
                lines.join("\n")
            )
        };
        Ok(StepOutput::new()
            .with_value("loki_recent_errors", Value::String(lines.join("\n")))
            .with_value("loki_error_count", Value::from(lines.len()))
            .with_report(report))
    }
}

/// HTTP request activity for the target app over the last 15 minutes.
pub struct HttpActivity {
    pub client: Arc<LokiClient>,
}

#[async_trait]
impl Capability for HttpActivity {
    async fn invoke(&self, context: &ContextSnapshot, params: &Params) -> Result<StepOutput> {
        let app = target_app(context, params);
        let query = format!(r#"{{app="{app}"}} |= "HTTP""#);
        let lines = self
            .client
            .query_range(&query, chrono::Duration::minutes(15), DEFAULT_LIMIT)
            .await?;

        Ok(StepOutput::new()
            .with_value("loki_http_activity", Value::String(lines.join("\n")))
            .with_value("loki_http_count", Value::from(lines.len()))
            .with_report(format!(
                "{} HTTP log lines for '{app}' in the last 15 minutes",
                lines.len()
            )))
    }
}
