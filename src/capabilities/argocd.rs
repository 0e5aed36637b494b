//! Argo CD deployment-tool capabilities.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::flow::context::ContextSnapshot;
use crate::registry::{Capability, Params, StepOutput};

use super::{param_str, str_from};

/// Client for the Argo CD HTTP API.
pub struct ArgoCdClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ArgoCdClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Build a client when both base URL and token are configured.
    pub fn from_settings(base_url: Option<&str>, token: Option<&str>) -> Option<Self> {
        match (base_url, token) {
            (Some(url), Some(token)) => Some(Self::new(url.to_string(), token.to_string())),
            _ => None,
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "Argo CD GET");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        response.json().await.context("invalid Argo CD response")
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "Argo CD POST");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .with_context(|| format!("POST {url}"))?;
        response.json().await.context("invalid Argo CD response")
    }
}

fn require_client(client: &Option<Arc<ArgoCdClient>>) -> Result<&Arc<ArgoCdClient>> {
    match client {
        Some(client) => Ok(client),
        None => bail!("Argo CD is not configured (ARGOCD_BASE_URL / ARGOCD_API_TOKEN)"),
    }
}

fn app_name(context: &ContextSnapshot, params: &Params) -> Result<String> {
    param_str(params, "app_name")
        .or_else(|| str_from(context, "app_name"))
        .ok_or_else(|| anyhow::anyhow!("no app_name in params or context"))
}

/// List applications with their sync and health status.
pub struct ListApps {
    pub client: Option<Arc<ArgoCdClient>>,
}

#[async_trait]
impl Capability for ListApps {
    async fn invoke(&self, _context: &ContextSnapshot, _params: &Params) -> Result<StepOutput> {
        let client = require_client(&self.client)?;
        let body = client.get_json("/api/v1/applications").await?;

        let mut apps = Vec::new();
        let mut lines = Vec::new();
        if let Some(items) = body.get("items").and_then(Value::as_array) {
            for item in items {
                let name = item
                    .pointer("/metadata/name")
                    .and_then(Value::as_str)
                    .unwrap_or("?");
                let sync = item
                    .pointer("/status/sync/status")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown");
                let health = item
                    .pointer("/status/health/status")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown");
                lines.push(format!("{name}: sync={sync} health={health}"));
                apps.push(json!({ "name": name, "sync": sync, "health": health }));
            }
        }

        Ok(StepOutput::new()
            .with_value("argocd_apps", Value::Array(apps))
            .with_report(format!("Argo CD applications:\n{}", lines.join("\n"))))
    }
}

/// Sync and health status for one application.
pub struct AppStatus {
    pub client: Option<Arc<ArgoCdClient>>,
}

#[async_trait]
impl Capability for AppStatus {
    async fn invoke(&self, context: &ContextSnapshot, params: &Params) -> Result<StepOutput> {
        let client = require_client(&self.client)?;
        let app = app_name(context, params)?;
        let body = client
            .get_json(&format!("/api/v1/applications/{app}"))
            .await?;

        let sync = body
            .pointer("/status/sync/status")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        let health = body
            .pointer("/status/health/status")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();

        Ok(StepOutput::new()
            .with_value("argocd_app_status", json!({ "app": app, "sync": sync, "health": health }))
            .with_value("argocd_app_sync", Value::String(sync.clone()))
            .with_value("argocd_app_health", Value::String(health.clone()))
            .with_report(format!("Argo CD app '{app}': sync={sync} health={health}")))
    }
}

/// Trigger a sync for one application. Mutating.
pub struct SyncApp {
    pub client: Option<Arc<ArgoCdClient>>,
}

#[async_trait]
impl Capability for SyncApp {
    async fn invoke(&self, context: &ContextSnapshot, params: &Params) -> Result<StepOutput> {
        let client = require_client(&self.client)?;
        let app = app_name(context, params)?;
        info!(%app, "Triggering Argo CD sync");
        client
            .post_json(&format!("/api/v1/applications/{app}/sync"), json!({}))
            .await?;

        Ok(StepOutput::new()
            .with_value("argocd_sync_triggered", Value::String(app.clone()))
            .with_report(format!("Triggered Argo CD sync for '{app}'")))
    }
}
