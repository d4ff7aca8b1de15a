mod settings;

use clap::{Parser, Subcommand, ValueEnum};
use grantflow_orchestrator::{
    builtin_workflows, load_workflows, AgentRole, Mode, Orchestrator, OrchestratorConfig,
    OrchestratorEvent, WorkerError, WorkerRequest, WorkerResponse, WorkerRouter, WorkflowTemplate,
};
use serde_json::json;
use settings::{load_settings, Settings};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grantflow", about = "Grantflow: multi-agent grant application orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "grantflow.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List built-in and custom workflows
    Workflows,
    /// Run a workflow with the local simulated worker
    Run {
        /// Workflow id
        workflow: String,
        /// JSON context attached to every task that has none
        #[arg(long)]
        context: Option<String>,
        /// Roles whose tasks should fail (repeatable)
        #[arg(long = "fail", value_parser = parse_role)]
        failing: Vec<AgentRole>,
    },
    /// Print the effective configuration
    Config,
}

fn parse_role(value: &str) -> Result<AgentRole, String> {
    serde_json::from_value(json!(value.to_lowercase())).map_err(|_| {
        let roles: Vec<String> = AgentRole::ALL.iter().map(ToString::to_string).collect();
        format!("unknown role '{value}', expected one of: {}", roles.join(", "))
    })
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Stand-in worker: every role answers every task type with a canned
/// summary, except roles listed in `failing`.
fn local_worker(failing: &[AgentRole]) -> WorkerRouter {
    AgentRole::ALL
        .into_iter()
        .fold(WorkerRouter::new(), |router, role| {
            let fails = failing.contains(&role);
            router.fallback(role, move |req: WorkerRequest| async move {
                if fails {
                    return Err(WorkerError::Failed(format!(
                        "{role} is configured to fail"
                    )));
                }
                Ok(WorkerResponse::new(json!({
                    "role": req.role,
                    "type": req.task_type,
                    "summary": format!("{} handled {}: {}", req.role, req.task_type, req.description),
                    "context": req.context,
                })))
            })
        })
}

fn all_workflows(settings: &Settings, config_path: &Path) -> anyhow::Result<BTreeMap<String, WorkflowTemplate>> {
    let mut workflows = builtin_workflows();
    if let Some(dir) = settings.resolved_workflows_dir(config_path) {
        let custom = load_workflows(&dir)?;
        info!(count = custom.len(), dir = %dir.display(), "Custom workflows loaded");
        workflows.extend(custom);
    }
    Ok(workflows)
}

async fn run_workflow(
    config: OrchestratorConfig,
    mut template: WorkflowTemplate,
    context: Option<serde_json::Value>,
    failing: &[AgentRole],
) -> anyhow::Result<()> {
    if let Some(context) = context {
        for task in template.stages.iter_mut().flat_map(|s| s.tasks.iter_mut()) {
            if task.context.is_null() {
                task.context = context.clone();
            }
        }
    }

    if config.mode == Mode::Manual {
        info!("Config requests manual mode; running workflow in auto mode");
    }
    let orchestrator = Orchestrator::with_config(config.with_mode(Mode::Auto), local_worker(failing))?;
    orchestrator.on(|event: &OrchestratorEvent| {
        if let OrchestratorEvent::WorkflowStage { stage, progress, .. } = event {
            eprintln!("[{progress:>5.1}%] {stage}");
        }
    });
    orchestrator.start();

    let report = orchestrator.execute_workflow(&template).await?;
    orchestrator.stop();

    println!("{}", serde_json::to_string_pretty(&report)?);
    let metrics = orchestrator.metrics();
    println!(
        "\n{}: {} completed, {} failed, avg {:.1} ms/task",
        template.id,
        metrics.metrics.completed_tasks,
        metrics.metrics.failed_tasks,
        metrics.metrics.avg_task_duration_ms
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let settings = load_settings(&cli.config)?;

    match cli.command {
        Commands::Workflows => {
            let workflows = all_workflows(&settings, &cli.config)?;
            println!("Available workflows:");
            for template in workflows.values() {
                println!(
                    "  {:<24} {} ({} stage(s), {} task(s))",
                    template.id,
                    template.name,
                    template.stages.len(),
                    template.task_count()
                );
                if !template.description.is_empty() {
                    println!("  {:<24} {}", "", template.description);
                }
            }
            println!("\nTotal: {} workflow(s)", workflows.len());
        }
        Commands::Run {
            workflow,
            context,
            failing,
        } => {
            let mut workflows = all_workflows(&settings, &cli.config)?;
            let template = workflows
                .remove(&workflow)
                .ok_or_else(|| anyhow::anyhow!("Unknown workflow '{workflow}'"))?;
            let context = context
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(|e| anyhow::anyhow!("Invalid --context JSON: {e}"))?;
            info!(workflow = %template.id, "Running workflow");
            run_workflow(settings.orchestrator, template, context, &failing).await?;
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&settings)?);
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use grantflow_orchestrator::{TaskSpec, TaskStatus};
    use std::time::Duration;

    #[test]
    fn test_parse_role() {
        assert_eq!(parse_role("Writer").unwrap(), AgentRole::Writer);
        let err = parse_role("editor").unwrap_err();
        assert!(err.contains("analyzer"));
    }

    #[tokio::test]
    async fn test_local_worker_failure_injection() {
        let orch = Orchestrator::new(local_worker(&[AgentRole::Reviewer]));
        let ok = orch
            .create_task(TaskSpec::new(AgentRole::Writer, "draft_section"))
            .unwrap();
        let bad = orch
            .create_task(TaskSpec::new(AgentRole::Reviewer, "review_draft"))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), orch.run_until_idle())
            .await
            .unwrap()
            .unwrap();

        let ok = orch.task(ok.id).unwrap();
        assert_eq!(ok.status, TaskStatus::Completed);
        assert_eq!(ok.result.unwrap()["type"], "draft_section");
        let bad = orch.task(bad.id).unwrap();
        assert_eq!(bad.status, TaskStatus::Failed);
        assert_eq!(bad.error.as_deref(), Some("reviewer is configured to fail"));
    }

    #[test]
    fn test_all_workflows_merges_custom_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("flows")).unwrap();
        std::fs::write(
            dir.path().join("flows").join("budget.toml"),
            "id = \"budget-only\"\nname = \"Budget only\"\n",
        )
        .unwrap();
        let settings = Settings {
            workflows_dir: Some(PathBuf::from("flows")),
            ..Settings::default()
        };
        let workflows = all_workflows(&settings, &dir.path().join("grantflow.toml")).unwrap();
        assert!(workflows.contains_key("budget-only"));
        assert!(workflows.contains_key("grant-discovery"));
    }
}
