//! Incident filing against the issue tracker (GitHub issues).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::flow::context::ContextSnapshot;
use crate::registry::{Capability, Params, StepOutput};

use super::{param_str, str_from};

/// Client for the GitHub issues API, scoped to one `owner/repo`.
pub struct IncidentClient {
    http: reqwest::Client,
    token: String,
    repo: String,
}

impl IncidentClient {
    pub fn new(token: String, repo: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            repo,
        }
    }

    pub fn from_settings(token: Option<&str>, repo: Option<&str>) -> Option<Self> {
        match (token, repo) {
            (Some(token), Some(repo)) => Some(Self::new(token.to_string(), repo.to_string())),
            _ => None,
        }
    }

    pub async fn create_issue(&self, title: &str, body: &str) -> Result<String> {
        let url = format!("https://api.github.com/repos/{}/issues", self.repo);
        let response: Value = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::USER_AGENT, "k8spilot")
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(&json!({ "title": title, "body": body }))
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .with_context(|| format!("POST {url}"))?
            .json()
            .await
            .context("invalid GitHub response")?;

        response
            .get("html_url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("GitHub response has no html_url"))
    }
}

/// File an incident issue when the run collected evidence that one is
/// needed. Mutating.
///
/// The decision input is the `incident_needed` context flag (set by the
/// summary step) or a `force: true` param; without either this is a no-op
/// that reports "no incident needed".
pub struct CreateIssue {
    pub client: Option<Arc<IncidentClient>>,
}

#[async_trait]
impl Capability for CreateIssue {
    async fn invoke(&self, context: &ContextSnapshot, params: &Params) -> Result<StepOutput> {
        let forced = params
            .get("force")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let needed = context
            .get("incident_needed")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if !forced && !needed {
            return Ok(StepOutput::new()
                .with_value("incident_created", Value::Bool(false))
                .with_report("No incident needed".to_string()));
        }

        let Some(client) = &self.client else {
            bail!("incident tracker is not configured (GITHUB_TOKEN / GITHUB_REPO)");
        };

        let title = param_str(params, "title")
            .unwrap_or_else(|| "Cluster health incident detected by k8spilot".to_string());
        let body = str_from(context, "cluster_summary")
            .or_else(|| str_from(context, "explain_pods"))
            .unwrap_or_else(|| "No summary available; see attached run report.".to_string());

        info!(repo = %client.repo, "Filing incident issue");
        let url = client.create_issue(&title, &body).await?;

        Ok(StepOutput::new()
            .with_value("incident_created", Value::Bool(true))
            .with_value("incident_url", Value::String(url.clone()))
            .with_report(format!("Created incident issue: {url}")))
    }
}
