//! Process configuration, read once at startup from the environment.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Service settings. Everything the adapters and the flow runner need is
/// resolved here and passed down explicitly; nothing reads ambient
/// environment state after startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Safety gate policy: whether state-mutating capabilities may execute.
    pub allow_mutating: bool,
    /// Required per-step execution bound.
    pub step_timeout: Duration,
    pub default_namespace: String,
    pub default_flow: String,
    /// Directory holding `flow-*.yaml` definitions.
    pub config_dir: PathBuf,

    // kubectl
    pub kubeconfig: Option<String>,
    pub kubectl_timeout: Duration,

    // Argo CD
    pub argocd_base_url: Option<String>,
    pub argocd_api_token: Option<String>,

    // Loki
    pub loki_url: String,

    // Cloudflare DNS
    pub cloudflare_api_token: Option<String>,
    pub cloudflare_zone_id: Option<String>,

    // Incident tracker (GitHub issues)
    pub github_token: Option<String>,
    pub github_repo: Option<String>,

    // LLM gateway (OpenRouter)
    pub openrouter_base_url: String,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,

    // HTTP front-end
    pub api_host: String,
    pub api_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allow_mutating: false,
            step_timeout: Duration::from_secs(120),
            default_namespace: "default".to_string(),
            default_flow: "k8s-healthcheck".to_string(),
            config_dir: PathBuf::from("./config"),
            kubeconfig: None,
            kubectl_timeout: Duration::from_secs(20),
            argocd_base_url: None,
            argocd_api_token: None,
            loki_url: "http://loki:3100".to_string(),
            cloudflare_api_token: None,
            cloudflare_zone_id: None,
            github_token: None,
            github_repo: None,
            openrouter_base_url: "https://openrouter.ai/api/v1".to_string(),
            openrouter_api_key: None,
            openrouter_model: "openai/gpt-4o-mini".to_string(),
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            allow_mutating: env_bool("ALLOW_MUTATING", defaults.allow_mutating)?,
            step_timeout: env_secs("STEP_TIMEOUT", defaults.step_timeout)?,
            default_namespace: env_or("DEFAULT_NAMESPACE", defaults.default_namespace),
            default_flow: env_or("DEFAULT_FLOW", defaults.default_flow),
            config_dir: env_opt("CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_dir),
            kubeconfig: env_opt("KUBECONFIG"),
            kubectl_timeout: env_secs("KUBECTL_TIMEOUT", defaults.kubectl_timeout)?,
            argocd_base_url: env_opt("ARGOCD_BASE_URL"),
            argocd_api_token: env_opt("ARGOCD_API_TOKEN"),
            loki_url: env_or("LOKI_URL", defaults.loki_url),
            cloudflare_api_token: env_opt("CLOUDFLARE_API_TOKEN"),
            cloudflare_zone_id: env_opt("CLOUDFLARE_ZONE_ID"),
            github_token: env_opt("GITHUB_TOKEN"),
            github_repo: env_opt("GITHUB_REPO"),
            openrouter_base_url: env_or("OPENROUTER_BASE_URL", defaults.openrouter_base_url),
            openrouter_api_key: env_opt("OPENROUTER_API_KEY"),
            openrouter_model: env_or("OPENROUTER_MODEL", defaults.openrouter_model),
            api_host: env_or("API_HOST", defaults.api_host),
            api_port: env_parse("API_PORT", defaults.api_port)?,
        })
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: String) -> String {
    env_opt(key).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match env_opt(key) {
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => anyhow::bail!("{key}: expected a boolean, got '{other}'"),
        },
        None => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration> {
    match env_opt(key) {
        Some(value) => {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("{key}: expected seconds, got '{value}'"))?;
            Ok(Duration::from_secs(secs))
        }
        None => Ok(default),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(value) => value
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}: invalid value '{value}': {e}")),
        None => Ok(default),
    }
}
