//! HTTP front-end for triggering flows.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::flow::{FlowRunner, FlowSet, RunResult};
use crate::registry::CapabilityRegistry;

/// API server wiring the loaded flows and the runner to HTTP routes.
pub struct ApiServer {
    state: Arc<ApiState>,
    host: String,
    port: u16,
}

pub struct ApiState {
    pub flows: Arc<FlowSet>,
    pub runner: Arc<FlowRunner>,
    pub registry: Arc<CapabilityRegistry>,
    pub default_flow: String,
    pub default_namespace: String,
}

impl ApiServer {
    pub fn new(state: ApiState, host: String, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            host,
            port,
        }
    }

    pub async fn start(self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let app = build_router(self.state);

        info!(%addr, "Starting API server");
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/flows", get(list_flows))
        .route("/capabilities", get(list_capabilities))
        .route("/run", post(run_default))
        .route("/run/{flow}", post(run_flow))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Initial input payload for a run.
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    pub namespace: Option<String>,
    pub app_name: Option<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_flows(State(state): State<Arc<ApiState>>) -> Json<Value> {
    Json(json!({ "flows": state.flows.names() }))
}

async fn list_capabilities(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let capabilities: Vec<Value> = state
        .registry
        .list()
        .into_iter()
        .map(|(id, mutating)| json!({ "id": id, "mutating": mutating }))
        .collect();
    Json(json!({ "capabilities": capabilities }))
}

async fn run_default(
    State(state): State<Arc<ApiState>>,
    request: Option<Json<RunRequest>>,
) -> std::result::Result<Json<RunResult>, (StatusCode, Json<Value>)> {
    let flow = state.default_flow.clone();
    execute(state, flow, request.map(|Json(r)| r).unwrap_or_default()).await
}

async fn run_flow(
    State(state): State<Arc<ApiState>>,
    Path(flow): Path<String>,
    request: Option<Json<RunRequest>>,
) -> std::result::Result<Json<RunResult>, (StatusCode, Json<Value>)> {
    execute(state, flow, request.map(|Json(r)| r).unwrap_or_default()).await
}

async fn execute(
    state: Arc<ApiState>,
    flow: String,
    request: RunRequest,
) -> std::result::Result<Json<RunResult>, (StatusCode, Json<Value>)> {
    let spec = state.flows.get(&flow).map_err(|e| {
        warn!(%flow, "Flow not found");
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": e.to_string() })),
        )
    })?;

    let mut initial = request.context;
    initial.insert(
        "namespace".to_string(),
        Value::String(
            request
                .namespace
                .unwrap_or_else(|| state.default_namespace.clone()),
        ),
    );
    if let Some(app_name) = request.app_name {
        initial.insert("app_name".to_string(), Value::String(app_name));
    }

    info!(%flow, "Run triggered via API");
    let result = state.runner.run(&spec, initial).await;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowSpec, StepDefinition};
    use crate::registry::{
        Capability, CapabilityDescriptor, Params, SafetyGate, StepOutput,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    struct Noop;

    #[async_trait]
    impl Capability for Noop {
        async fn invoke(
            &self,
            _context: &crate::flow::ContextSnapshot,
            _params: &Params,
        ) -> anyhow::Result<StepOutput> {
            Ok(StepOutput::new().with_report("ran"))
        }
    }

    fn state() -> Arc<ApiState> {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(CapabilityDescriptor::new("collect", false, Arc::new(Noop)))
            .unwrap();
        let registry = Arc::new(registry);

        let mut flows = FlowSet::new();
        flows
            .insert(FlowSpec::new(
                "diag",
                vec![StepDefinition {
                    run: "collect".into(),
                    params: Map::new(),
                    when: None,
                    timeout: None,
                }],
            ))
            .unwrap();

        Arc::new(ApiState {
            flows: Arc::new(flows),
            runner: Arc::new(FlowRunner::new(
                registry.clone(),
                SafetyGate::new(false),
                Duration::from_secs(5),
            )),
            registry,
            default_flow: "diag".to_string(),
            default_namespace: "default".to_string(),
        })
    }

    #[tokio::test]
    async fn unknown_flow_returns_not_found() {
        let result = execute(state(), "nope".to_string(), RunRequest::default()).await;
        let (status, _) = result.err().unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn run_returns_result_with_report() {
        let result = execute(state(), "diag".to_string(), RunRequest::default())
            .await
            .unwrap();
        assert_eq!(result.0.flow_name, "diag");
        assert_eq!(result.0.report_text, "ran");
    }
}
