//! kubectl-backed cluster observation capabilities.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::flow::context::ContextSnapshot;
use crate::registry::{Capability, Params, StepOutput};
use crate::subprocess::{ProcessCommand, ProcessRunner};

use super::{param_str, str_from};

/// Thin wrapper around the kubectl binary.
pub struct KubectlClient {
    runner: Arc<dyn ProcessRunner>,
    kubeconfig: Option<String>,
    timeout: Duration,
    default_namespace: String,
}

impl KubectlClient {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        kubeconfig: Option<String>,
        timeout: Duration,
        default_namespace: String,
    ) -> Self {
        Self {
            runner,
            kubeconfig,
            timeout,
            default_namespace,
        }
    }

    /// Namespace resolution order: step params, run context, configured
    /// default.
    fn namespace(&self, context: &ContextSnapshot, params: &Params) -> String {
        param_str(params, "namespace")
            .or_else(|| str_from(context, "namespace"))
            .unwrap_or_else(|| self.default_namespace.clone())
    }

    async fn run(&self, args: Vec<String>) -> Result<String> {
        let mut command = ProcessCommand::new("kubectl")
            .args(args.clone())
            .timeout(self.timeout);
        if let Some(kubeconfig) = &self.kubeconfig {
            command = command.env("KUBECONFIG", kubeconfig.clone());
        }

        debug!(?args, "Running kubectl");
        let output = self.runner.run(command).await.context("kubectl failed")?;
        if !output.status.success() {
            bail!(
                "kubectl {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            );
        }
        Ok(output.stdout)
    }
}

/// Operator-supplied extra kubectl args from step params, shell-split.
fn extra_args(params: &Params) -> Result<Vec<String>> {
    match param_str(params, "extra_args") {
        Some(raw) => shell_words::split(&raw)
            .with_context(|| format!("invalid extra_args '{raw}'")),
        None => Ok(Vec::new()),
    }
}

/// `kubectl get pods -o wide` for the target namespace.
pub struct PodsOverview {
    pub client: Arc<KubectlClient>,
}

#[async_trait]
impl Capability for PodsOverview {
    async fn invoke(&self, context: &ContextSnapshot, params: &Params) -> Result<StepOutput> {
        let namespace = self.client.namespace(context, params);
        let mut args = vec![
            "get".to_string(),
            "pods".to_string(),
            "-n".to_string(),
            namespace.clone(),
            "-o".to_string(),
            "wide".to_string(),
        ];
        args.extend(extra_args(params)?);
        let stdout = self.client.run(args).await?;
        Ok(StepOutput::new()
            .with_value("k8s_pods_overview", Value::String(stdout.clone()))
            .with_value("namespace", Value::String(namespace.clone()))
            .with_report(format!("Pods in namespace '{namespace}':\n{}", stdout.trim_end())))
    }
}

/// `kubectl top nodes`.
pub struct TopNodes {
    pub client: Arc<KubectlClient>,
}

#[async_trait]
impl Capability for TopNodes {
    async fn invoke(&self, _context: &ContextSnapshot, params: &Params) -> Result<StepOutput> {
        let mut args = vec!["top".to_string(), "nodes".to_string()];
        args.extend(extra_args(params)?);
        let stdout = self.client.run(args).await?;
        Ok(StepOutput::new()
            .with_value("k8s_top_nodes", Value::String(stdout.clone()))
            .with_report(format!("Node resource usage:\n{}", stdout.trim_end())))
    }
}

/// `kubectl top pods` for the target namespace.
pub struct TopPods {
    pub client: Arc<KubectlClient>,
}

#[async_trait]
impl Capability for TopPods {
    async fn invoke(&self, context: &ContextSnapshot, params: &Params) -> Result<StepOutput> {
        let namespace = self.client.namespace(context, params);
        let stdout = self
            .client
            .run(vec![
                "top".to_string(),
                "pods".to_string(),
                "-n".to_string(),
                namespace.clone(),
            ])
            .await?;
        Ok(StepOutput::new()
            .with_value("k8s_top_pods", Value::String(stdout.clone()))
            .with_report(format!(
                "Pod resource usage in '{namespace}':\n{}",
                stdout.trim_end()
            )))
    }
}

/// Recent events sorted by last timestamp.
pub struct EventsRecent {
    pub client: Arc<KubectlClient>,
}

#[async_trait]
impl Capability for EventsRecent {
    async fn invoke(&self, context: &ContextSnapshot, params: &Params) -> Result<StepOutput> {
        let namespace = self.client.namespace(context, params);
        let stdout = self
            .client
            .run(vec![
                "get".to_string(),
                "events".to_string(),
                "-n".to_string(),
                namespace.clone(),
                "--sort-by=.lastTimestamp".to_string(),
            ])
            .await?;
        Ok(StepOutput::new()
            .with_value("k8s_events_recent", Value::String(stdout.clone()))
            .with_report(format!(
                "Recent events in '{namespace}':\n{}",
                stdout.trim_end()
            )))
    }
}
