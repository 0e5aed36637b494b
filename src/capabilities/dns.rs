//! Cloudflare DNS capabilities.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::flow::context::ContextSnapshot;
use crate::registry::{Capability, Params, StepOutput};

use super::param_str;

/// Client for the Cloudflare DNS records API, scoped to one zone.
pub struct CloudflareClient {
    http: reqwest::Client,
    token: String,
    zone_id: String,
}

impl CloudflareClient {
    pub fn new(token: String, zone_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            zone_id,
        }
    }

    pub fn from_settings(token: Option<&str>, zone_id: Option<&str>) -> Option<Self> {
        match (token, zone_id) {
            (Some(token), Some(zone_id)) => {
                Some(Self::new(token.to_string(), zone_id.to_string()))
            }
            _ => None,
        }
    }

    fn records_url(&self) -> String {
        format!(
            "https://api.cloudflare.com/client/v4/zones/{}/dns_records",
            self.zone_id
        )
    }

    pub async fn list_records(&self, name: Option<&str>) -> Result<Vec<Value>> {
        let mut request = self.http.get(self.records_url()).bearer_auth(&self.token);
        if let Some(name) = name {
            request = request.query(&[("name", name)]);
        }
        debug!(?name, "Cloudflare list DNS records");
        let body: Value = request
            .send()
            .await
            .context("Cloudflare list records")?
            .error_for_status()?
            .json()
            .await
            .context("invalid Cloudflare response")?;
        Ok(body
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn create_record(&self, record: &Value) -> Result<Value> {
        let body: Value = self
            .http
            .post(self.records_url())
            .bearer_auth(&self.token)
            .json(record)
            .send()
            .await
            .context("Cloudflare create record")?
            .error_for_status()?
            .json()
            .await?;
        Ok(body)
    }

    pub async fn update_record(&self, record_id: &str, record: &Value) -> Result<Value> {
        let url = format!("{}/{record_id}", self.records_url());
        let body: Value = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .json(record)
            .send()
            .await
            .context("Cloudflare update record")?
            .error_for_status()?
            .json()
            .await?;
        Ok(body)
    }
}

fn require_client(client: &Option<Arc<CloudflareClient>>) -> Result<&Arc<CloudflareClient>> {
    match client {
        Some(client) => Ok(client),
        None => bail!("Cloudflare is not configured (CLOUDFLARE_API_TOKEN / CLOUDFLARE_ZONE_ID)"),
    }
}

fn record_summary(record: &Value) -> String {
    let name = record.get("name").and_then(Value::as_str).unwrap_or("?");
    let rtype = record.get("type").and_then(Value::as_str).unwrap_or("?");
    let content = record.get("content").and_then(Value::as_str).unwrap_or("?");
    format!("{name} {rtype} -> {content}")
}

/// Verify that the expected record names exist in the zone.
pub struct CheckRecords {
    pub client: Option<Arc<CloudflareClient>>,
}

#[async_trait]
impl Capability for CheckRecords {
    async fn invoke(&self, _context: &ContextSnapshot, params: &Params) -> Result<StepOutput> {
        let client = require_client(&self.client)?;
        let expected: Vec<String> = params
            .get("names")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let records = client.list_records(None).await?;
        let present: Vec<&str> = records
            .iter()
            .filter_map(|r| r.get("name").and_then(Value::as_str))
            .collect();

        let mut lines = Vec::new();
        let mut missing = Vec::new();
        for name in &expected {
            if present.contains(&name.as_str()) {
                lines.push(format!("{name}: present"));
            } else {
                lines.push(format!("{name}: MISSING"));
                missing.push(name.clone());
            }
        }

        Ok(StepOutput::new()
            .with_value("dns_records_total", Value::from(records.len()))
            .with_value(
                "dns_missing_records",
                Value::Array(missing.into_iter().map(Value::String).collect()),
            )
            .with_report(format!(
                "DNS record check ({} records in zone):\n{}",
                records.len(),
                lines.join("\n")
            )))
    }
}

/// Fetch one record by name.
pub struct GetRecord {
    pub client: Option<Arc<CloudflareClient>>,
}

#[async_trait]
impl Capability for GetRecord {
    async fn invoke(&self, _context: &ContextSnapshot, params: &Params) -> Result<StepOutput> {
        let client = require_client(&self.client)?;
        let name =
            param_str(params, "name").ok_or_else(|| anyhow::anyhow!("missing 'name' param"))?;
        let records = client.list_records(Some(&name)).await?;
        let Some(record) = records.first() else {
            bail!("no DNS record named '{name}'");
        };
        Ok(StepOutput::new()
            .with_value("dns_record", record.clone())
            .with_report(format!("DNS record: {}", record_summary(record))))
    }
}

/// Create or update one record. Mutating.
pub struct UpsertRecord {
    pub client: Option<Arc<CloudflareClient>>,
}

#[async_trait]
impl Capability for UpsertRecord {
    async fn invoke(&self, _context: &ContextSnapshot, params: &Params) -> Result<StepOutput> {
        let client = require_client(&self.client)?;
        let name =
            param_str(params, "name").ok_or_else(|| anyhow::anyhow!("missing 'name' param"))?;
        let content = param_str(params, "content")
            .ok_or_else(|| anyhow::anyhow!("missing 'content' param"))?;
        let rtype = param_str(params, "type").unwrap_or_else(|| "A".to_string());
        let ttl = params.get("ttl").and_then(Value::as_u64).unwrap_or(300);
        let proxied = params
            .get("proxied")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let record = json!({
            "name": name,
            "type": rtype,
            "content": content,
            "ttl": ttl,
            "proxied": proxied,
        });

        let existing = client.list_records(Some(&name)).await?;
        let action = match existing
            .iter()
            .find(|r| r.get("type").and_then(Value::as_str) == Some(rtype.as_str()))
            .and_then(|r| r.get("id").and_then(Value::as_str))
        {
            Some(record_id) => {
                info!(%name, %rtype, "Updating DNS record");
                client.update_record(record_id, &record).await?;
                "updated"
            }
            None => {
                info!(%name, %rtype, "Creating DNS record");
                client.create_record(&record).await?;
                "created"
            }
        };

        Ok(StepOutput::new()
            .with_value("dns_upserted", json!({ "name": name, "action": action }))
            .with_report(format!("DNS record {action}: {name} {rtype} -> {content}")))
    }
}
