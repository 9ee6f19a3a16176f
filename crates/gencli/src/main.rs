use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gencore::{ExecutionEvent, GenerationProvider, WorkflowDefinition, WorkflowNode};
use genprovider::{HttpProvider, HttpProviderConfig, MockProvider};
use genruntime::{Engine, EngineConfig, MemoryStore, PollerConfig, StrategyRegistry};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "genflow")]
#[command(about = "Generation workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Provider API base URL; omit to run against the built-in mock
        #[arg(long)]
        base_url: Option<String>,

        /// Provider API token (or GENFLOW_API_TOKEN)
        #[arg(long)]
        token: Option<String>,

        /// Maximum concurrent provider jobs
        #[arg(short, long, default_value_t = 4)]
        concurrency: usize,
    },

    /// Validate a workflow file without running it
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types and their ports
    Nodes,

    /// Write an example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn load_workflow(path: &PathBuf) -> Result<WorkflowDefinition> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading workflow file {}", path.display()))?;
    serde_json::from_str(&raw).context("parsing workflow JSON")
}

fn build_registry() -> Arc<StrategyRegistry> {
    let mut registry = StrategyRegistry::new();
    gennodes::register_all(&mut registry);
    Arc::new(registry)
}

async fn run(
    file: PathBuf,
    base_url: Option<String>,
    token: Option<String>,
    concurrency: usize,
) -> Result<()> {
    let definition = load_workflow(&file)?;
    let registry = build_registry();

    let token = token.or_else(|| std::env::var("GENFLOW_API_TOKEN").ok());
    let (provider, poller): (Arc<dyn GenerationProvider>, PollerConfig) = match (base_url, token) {
        (Some(base_url), Some(token)) => (
            Arc::new(HttpProvider::new(HttpProviderConfig { base_url, token })),
            PollerConfig::default(),
        ),
        _ => {
            println!("No provider configured, running against the built-in mock.");
            (
                Arc::new(MockProvider::new()),
                PollerConfig {
                    interval: Duration::from_millis(250),
                    ..PollerConfig::default()
                },
            )
        }
    };

    let config = EngineConfig {
        concurrency,
        poller,
        ..EngineConfig::default()
    };
    let engine = Engine::new(registry, provider, Arc::new(MemoryStore::new()), config);
    let mut events = engine.subscribe();

    let execution_id = engine.start(definition).await?;
    println!("Execution {execution_id} started");

    while let Ok(event) = events.recv().await {
        match event {
            ExecutionEvent::JobUpdated {
                execution_id: id,
                node_id,
                status,
                error,
                ..
            } if id == execution_id => {
                match error {
                    Some(error) => println!("  {node_id}: {status:?} ({error})"),
                    None => println!("  {node_id}: {status:?}"),
                }
            }
            ExecutionEvent::CostUpdated {
                execution_id: id,
                total,
                ..
            } if id == execution_id => {
                println!("  running cost: ${total:.4}");
            }
            ExecutionEvent::ExecutionFinished {
                execution_id: id,
                status,
                total_cost,
                duration_ms,
                ..
            } if id == execution_id => {
                println!("Execution finished: {status:?} in {duration_ms}ms, total ${total_cost:.4}");
                break;
            }
            _ => {}
        }
    }

    for job in engine.jobs(execution_id).await? {
        let output = job
            .output
            .map(|o| o.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<10?} attempts={} cost=${:.4} output={}",
            job.node_id, job.status, job.attempt, job.cost, output
        );
    }

    engine.shutdown();
    Ok(())
}

fn validate(file: PathBuf) -> Result<()> {
    let definition = load_workflow(&file)?;
    let registry = build_registry();

    match genruntime::validate(&definition, &registry) {
        Ok(resolved) => {
            println!("Workflow is valid.");
            println!("Execution order: {}", resolved.order.join(" -> "));
            Ok(())
        }
        Err(e) => {
            anyhow::bail!("invalid workflow: {e}");
        }
    }
}

fn list_nodes() -> Result<()> {
    let registry = build_registry();
    for node_type in registry.list_node_types() {
        println!("{node_type}");
        if let Some(ports) = registry.ports(&node_type) {
            for port in &ports.inputs {
                println!("  in:  {} ({:?})", port.name, port.kind);
            }
            for port in &ports.outputs {
                println!("  out: {} ({:?})", port.name, port.kind);
            }
        }
    }
    Ok(())
}

fn init(output: PathBuf) -> Result<()> {
    let mut definition = WorkflowDefinition::new("example");
    definition.add_node(
        WorkflowNode::new("prompt", "input").with_data(json!({
            "value": "a lighthouse on a cliff at dusk, oil painting"
        })),
    );
    definition.add_node(WorkflowNode::new("image", "image.generate").with_data(json!({
        "model": "flux-dev",
        "aspect_ratio": "16:9"
    })));
    definition.add_node(WorkflowNode::new("result", "output"));
    definition.connect_handles("prompt", "value", "image", "prompt");
    definition.connect_handles("image", "url", "result", "input");

    std::fs::write(&output, serde_json::to_string_pretty(&definition)?)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Wrote example workflow to {}", output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            file,
            base_url,
            token,
            concurrency,
        } => run(file, base_url, token, concurrency).await,
        Commands::Validate { file } => validate(file),
        Commands::Nodes => list_nodes(),
        Commands::Init { output } => init(output),
    }
}
