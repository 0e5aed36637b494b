//! LLM-gateway-backed capabilities (OpenRouter).
//!
//! The reasoning steps are opaque to the flow core: they take the context
//! snapshot, send the relevant fragments to the gateway, and return the
//! model's answer as an ordinary step output. No determinism or bounded
//! latency is assumed; the runner's step timeout is the only bound.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::flow::context::ContextSnapshot;
use crate::registry::{Capability, Params, StepOutput};

use super::str_from;

/// Context keys the summary step folds into its prompt, in report order.
const SUMMARY_KEYS: &[&str] = &[
    "k8s_pods_overview",
    "k8s_top_nodes",
    "k8s_top_pods",
    "k8s_events_recent",
    "argocd_apps",
    "loki_recent_errors",
    "explain_pods",
];

/// Client for an OpenAI-compatible chat completions gateway.
pub struct LlmGatewayClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl LlmGatewayClient {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        match &self.api_key {
            Some(key) => Ok(request.bearer_auth(key)),
            None => bail!("LLM gateway is not configured (OPENROUTER_API_KEY)"),
        }
    }

    /// One-shot chat completion.
    pub async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, model = %self.model, "LLM gateway chat");
        let request = self.http.post(&url).json(&json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        }));
        let body: Value = self
            .authorize(request)?
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .with_context(|| format!("POST {url}"))?
            .json()
            .await
            .context("invalid gateway response")?;

        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("gateway response has no message content"))
    }

    /// Model listing used as the gateway liveness probe.
    pub async fn list_models(&self) -> Result<usize> {
        let url = format!("{}/models", self.base_url);
        let body: Value = self
            .authorize(self.http.get(&url))?
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?
            .json()
            .await?;
        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0))
    }
}

/// Probe the LLM gateway.
pub struct GatewayHealth {
    pub client: Arc<LlmGatewayClient>,
}

#[async_trait]
impl Capability for GatewayHealth {
    async fn invoke(&self, _context: &ContextSnapshot, _params: &Params) -> Result<StepOutput> {
        let models = self.client.list_models().await?;
        Ok(StepOutput::new()
            .with_value("llm_gateway_health", Value::String("ok".to_string()))
            .with_value("llm_gateway_models", Value::from(models))
            .with_report(format!("LLM gateway healthy, {models} models available")))
    }
}

/// Ask the model to interpret the collected pods overview.
pub struct ExplainPods {
    pub client: Arc<LlmGatewayClient>,
}

#[async_trait]
impl Capability for ExplainPods {
    async fn invoke(&self, context: &ContextSnapshot, _params: &Params) -> Result<StepOutput> {
        let Some(pods) = str_from(context, "k8s_pods_overview") else {
            bail!("no pods overview in context; run k8s_pods_overview first");
        };
        let answer = self
            .client
            .chat(
                "You are a Kubernetes SRE. Explain the state of these pods, \
                 flagging anything not Running/Ready and likely causes. Be concise.",
                &pods,
            )
            .await?;
        Ok(StepOutput::new()
            .with_value("explain_pods", Value::String(answer.clone()))
            .with_report(format!("Pod analysis:\n{answer}")))
    }
}

/// Summarize everything collected so far into an operator-facing digest.
pub struct ClusterSummary {
    pub client: Arc<LlmGatewayClient>,
}

#[async_trait]
impl Capability for ClusterSummary {
    async fn invoke(&self, context: &ContextSnapshot, _params: &Params) -> Result<StepOutput> {
        let mut sections = Vec::new();
        for key in SUMMARY_KEYS {
            if let Some(value) = context.get(*key) {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if !text.is_empty() {
                    sections.push(format!("## {key}\n{text}"));
                }
            }
        }
        if sections.is_empty() {
            bail!("no collected context to summarize");
        }

        let answer = self
            .client
            .chat(
                "You are a Kubernetes SRE writing an incident-style cluster health \
                 summary. Start with an overall verdict (HEALTHY / DEGRADED / CRITICAL), \
                 then the key findings.",
                &sections.join("\n\n"),
            )
            .await?;

        Ok(StepOutput::new()
            .with_value("cluster_summary", Value::String(answer.clone()))
            .with_value(
                "incident_needed",
                Value::Bool(answer.contains("CRITICAL") || answer.contains("DEGRADED")),
            )
            .with_report(format!("Cluster summary:\n{answer}")))
    }
}
