use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error};

use k8spilot::api::{ApiServer, ApiState};
use k8spilot::capabilities::builtin_registry;
use k8spilot::config::Settings;
use k8spilot::flow::{FlowRunner, FlowSet, RunStatus};
use k8spilot::registry::SafetyGate;

/// Run declarative diagnostic and remediation flows against a cluster
#[derive(Parser)]
#[command(name = "k8spilot")]
#[command(about = "Operational automation flows for Kubernetes", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve,
    /// Run a flow once and print its report
    Run {
        /// Flow name (default flow from settings when omitted)
        flow: Option<String>,
        /// Target namespace
        #[arg(short, long)]
        namespace: Option<String>,
        /// Target application name
        #[arg(short, long)]
        app_name: Option<String>,
        /// Print the full run result as JSON instead of the report text
        #[arg(long)]
        json: bool,
    },
    /// List available flows
    Flows,
    /// List registered capabilities
    Capabilities,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    debug!("k8spilot started with verbosity level: {}", cli.verbose);

    let result = match cli.command {
        Some(Commands::Serve) | None => serve().await,
        Some(Commands::Run {
            flow,
            namespace,
            app_name,
            json,
        }) => run_once(flow, namespace, app_name, json).await,
        Some(Commands::Flows) => list_flows(),
        Some(Commands::Capabilities) => list_capabilities(),
    };

    if let Err(e) = result {
        error!("Fatal error: {}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn bootstrap() -> anyhow::Result<(Settings, Arc<k8spilot::CapabilityRegistry>, Arc<FlowSet>)> {
    let settings = Settings::from_env()?;
    let registry = Arc::new(builtin_registry(&settings)?);
    let flows = Arc::new(FlowSet::load_dir(&settings.config_dir, &registry)?);
    Ok((settings, registry, flows))
}

async fn serve() -> anyhow::Result<()> {
    let (settings, registry, flows) = bootstrap()?;
    let runner = Arc::new(FlowRunner::new(
        registry.clone(),
        SafetyGate::new(settings.allow_mutating),
        settings.step_timeout,
    ));

    let server = ApiServer::new(
        ApiState {
            flows,
            runner,
            registry,
            default_flow: settings.default_flow.clone(),
            default_namespace: settings.default_namespace.clone(),
        },
        settings.api_host.clone(),
        settings.api_port,
    );
    server.start().await
}

async fn run_once(
    flow: Option<String>,
    namespace: Option<String>,
    app_name: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let (settings, registry, flows) = bootstrap()?;
    let flow_name = flow.unwrap_or_else(|| settings.default_flow.clone());
    let spec = flows.get(&flow_name)?;

    let runner = FlowRunner::new(
        registry,
        SafetyGate::new(settings.allow_mutating),
        settings.step_timeout,
    );

    let mut initial = Map::new();
    initial.insert(
        "namespace".to_string(),
        Value::String(namespace.unwrap_or(settings.default_namespace)),
    );
    if let Some(app_name) = app_name {
        initial.insert("app_name".to_string(), Value::String(app_name));
    }

    let result = runner.run(&spec, initial).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for step in &result.steps {
            let note = step
                .error
                .as_ref()
                .map(|e| format!(" ({})", e.message))
                .unwrap_or_default();
            println!("[{:?}] {}{}", step.status, step.step, note);
        }
        println!();
        println!("{}", result.report_text);
    }

    if result.status == RunStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

fn list_flows() -> anyhow::Result<()> {
    let (_, _, flows) = bootstrap()?;
    for name in flows.names() {
        println!("{name}");
    }
    Ok(())
}

fn list_capabilities() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    let registry = builtin_registry(&settings)?;
    for (id, mutating) in registry.list() {
        let marker = if mutating { " (mutating)" } else { "" };
        println!("{id}{marker}");
    }
    Ok(())
}
