//! Builtin capability table.
//!
//! Wraps the tool adapters (kubectl, Argo CD, Loki, Cloudflare DNS, the LLM
//! gateway, the incident tracker) as registered capabilities. The table is
//! built once at startup; ids and mutating classifications are stable.

pub mod argocd;
pub mod dns;
pub mod incident;
pub mod kubectl;
pub mod llm;
pub mod loki;

use serde_json::Value;
use std::sync::Arc;

use crate::config::Settings;
use crate::error::Result;
use crate::flow::context::ContextSnapshot;
use crate::registry::{CapabilityDescriptor, CapabilityRegistry, Params};
use crate::subprocess::{ProcessRunner, TokioProcessRunner};

use argocd::ArgoCdClient;
use dns::CloudflareClient;
use incident::IncidentClient;
use kubectl::KubectlClient;
use llm::LlmGatewayClient;
use loki::LokiClient;

/// String param lookup.
pub(crate) fn param_str(params: &Params, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_string)
}

/// String context lookup.
pub(crate) fn str_from(context: &ContextSnapshot, key: &str) -> Option<String> {
    context.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Build the full builtin registry from settings.
pub fn builtin_registry(settings: &Settings) -> Result<CapabilityRegistry> {
    builtin_registry_with_runner(settings, Arc::new(TokioProcessRunner))
}

/// Variant with an injected process runner, for tests.
pub fn builtin_registry_with_runner(
    settings: &Settings,
    process_runner: Arc<dyn ProcessRunner>,
) -> Result<CapabilityRegistry> {
    let kubectl = Arc::new(KubectlClient::new(
        process_runner,
        settings.kubeconfig.clone(),
        settings.kubectl_timeout,
        settings.default_namespace.clone(),
    ));
    let argocd = ArgoCdClient::from_settings(
        settings.argocd_base_url.as_deref(),
        settings.argocd_api_token.as_deref(),
    )
    .map(Arc::new);
    let loki = Arc::new(LokiClient::new(settings.loki_url.clone()));
    let cloudflare = CloudflareClient::from_settings(
        settings.cloudflare_api_token.as_deref(),
        settings.cloudflare_zone_id.as_deref(),
    )
    .map(Arc::new);
    let gateway = Arc::new(LlmGatewayClient::new(
        settings.openrouter_base_url.clone(),
        settings.openrouter_api_key.clone(),
        settings.openrouter_model.clone(),
    ));
    let tracker = IncidentClient::from_settings(
        settings.github_token.as_deref(),
        settings.github_repo.as_deref(),
    )
    .map(Arc::new);

    let mut registry = CapabilityRegistry::new();

    registry.register(CapabilityDescriptor::new(
        "k8s_pods_overview",
        false,
        Arc::new(kubectl::PodsOverview {
            client: kubectl.clone(),
        }),
    ))?;
    registry.register(CapabilityDescriptor::new(
        "k8s_top_nodes",
        false,
        Arc::new(kubectl::TopNodes {
            client: kubectl.clone(),
        }),
    ))?;
    registry.register(CapabilityDescriptor::new(
        "k8s_top_pods",
        false,
        Arc::new(kubectl::TopPods {
            client: kubectl.clone(),
        }),
    ))?;
    registry.register(CapabilityDescriptor::new(
        "k8s_events_recent",
        false,
        Arc::new(kubectl::EventsRecent { client: kubectl }),
    ))?;

    registry.register(CapabilityDescriptor::new(
        "argocd_list_apps",
        false,
        Arc::new(argocd::ListApps {
            client: argocd.clone(),
        }),
    ))?;
    registry.register(CapabilityDescriptor::new(
        "argocd_app_status",
        false,
        Arc::new(argocd::AppStatus {
            client: argocd.clone(),
        }),
    ))?;
    registry.register(CapabilityDescriptor::new(
        "argocd_sync_app",
        true,
        Arc::new(argocd::SyncApp { client: argocd }),
    ))?;

    registry.register(CapabilityDescriptor::new(
        "loki_recent_errors",
        false,
        Arc::new(loki::RecentErrors {
            client: loki.clone(),
        }),
    ))?;
    registry.register(CapabilityDescriptor::new(
        "loki_http_activity",
        false,
        Arc::new(loki::HttpActivity { client: loki }),
    ))?;

    registry.register(CapabilityDescriptor::new(
        "dns_check_records",
        false,
        Arc::new(dns::CheckRecords {
            client: cloudflare.clone(),
        }),
    ))?;
    registry.register(CapabilityDescriptor::new(
        "dns_get_record",
        false,
        Arc::new(dns::GetRecord {
            client: cloudflare.clone(),
        }),
    ))?;
    registry.register(CapabilityDescriptor::new(
        "dns_upsert_record",
        true,
        Arc::new(dns::UpsertRecord { client: cloudflare }),
    ))?;

    registry.register(CapabilityDescriptor::new(
        "llm_gateway_health",
        false,
        Arc::new(llm::GatewayHealth {
            client: gateway.clone(),
        }),
    ))?;
    registry.register(CapabilityDescriptor::new(
        "explain_pods",
        false,
        Arc::new(llm::ExplainPods {
            client: gateway.clone(),
        }),
    ))?;
    registry.register(CapabilityDescriptor::new(
        "cluster_summary",
        false,
        Arc::new(llm::ClusterSummary { client: gateway }),
    ))?;

    registry.register(CapabilityDescriptor::new(
        "incident_create_issue",
        true,
        Arc::new(incident::CreateIssue { client: tracker }),
    ))?;

    Ok(registry)
}
