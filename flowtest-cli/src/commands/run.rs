use crate::commands::load_suites;
use crate::output;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::Result;
use serde_json::Value;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

use flowtest_engine::execution::events::LogLevel;
use flowtest_engine::{
    progress_channel, Collaborators, EngineConfig, ExecutionEvent, ExecutionMode, Orchestrator,
    ReqwestTransportFactory, RunResult,
};

/// Run API test suites
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Suite files or directories to search for *.flow.yml
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    /// Configuration file (default: ./flowtest.yml, then the user config dir)
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Set a global variable (can be repeated, format: name=value)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub variables: Vec<String>,

    /// Run independent suites concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Maximum suites per parallel batch
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Keep running a suite's steps after a failure
    #[arg(long)]
    pub continue_on_failure: bool,

    /// Keep running after a required suite fails
    #[arg(long)]
    pub no_fail_fast: bool,

    /// Never prompt; input steps use their CI defaults
    #[arg(long)]
    pub non_interactive: bool,

    /// HTTP timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Extra PEM CA certificate to trust
    #[arg(long, value_name = "FILE")]
    pub ca_cert: Option<PathBuf>,

    /// Write the JSON run report to this file
    #[arg(long, short = 'o', value_name = "FILE")]
    pub report: Option<PathBuf>,
}

/// Merge command line flags over the loaded configuration
fn apply_overrides(config: &mut EngineConfig, args: &RunArgs) -> Result<()> {
    for var_str in &args.variables {
        let Some((name, value)) = var_str.split_once('=') else {
            color_eyre::eyre::bail!("Invalid variable format '{}'. Expected name=value", var_str);
        };
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.into()));
        config.globals.insert(name.to_string(), value);
    }

    if args.parallel {
        config.execution.mode = ExecutionMode::Parallel;
    }
    if let Some(max) = args.max_parallel {
        config.execution.max_parallel = max;
    }
    if args.continue_on_failure {
        config.execution.continue_on_failure = true;
    }
    if args.no_fail_fast {
        config.execution.fail_fast_on_required = false;
    }
    if args.non_interactive {
        config.input.interactive = false;
    }
    if let Some(timeout) = args.timeout_ms {
        config.http.timeout_ms = timeout;
    }
    if let Some(cert) = &args.ca_cert {
        config.http.ca_cert = Some(cert.clone());
    }

    config.validate()?;
    Ok(())
}

fn render(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted { total_suites } => {
            println!();
            output::header(&format!("Running {} suite(s)", total_suites));
        }

        ExecutionEvent::RunCompleted {
            success,
            stats,
            duration,
        } => {
            println!();
            let summary = format!(
                "{} passed, {} failed, {} skipped in {:.2}s",
                stats.successful,
                stats.failed,
                stats.skipped,
                duration.as_secs_f64()
            );
            if *success {
                output::success(&summary);
            } else {
                output::failure(&summary);
            }
        }

        ExecutionEvent::SuiteStarted {
            suite_name,
            total_steps,
            ..
        } => {
            output::suite_header(suite_name, *total_steps);
        }

        ExecutionEvent::SuiteCompleted {
            suite_name,
            status,
            duration,
            ..
        } => {
            let line = format!(
                "  Suite '{}' {} ({:.2}s)",
                suite_name,
                output::outcome_label(*status),
                duration.as_secs_f64()
            );
            output::outcome_line(*status, &line);
        }

        ExecutionEvent::SuiteSkipped { node_id, reason } => {
            output::warning(&format!("  Suite '{}' skipped: {}", node_id, reason));
        }

        ExecutionEvent::SuiteCached { node_id } => {
            output::dim(&format!("  Suite '{}' reused from cache", node_id));
        }

        ExecutionEvent::StepStarted {
            step_name,
            step_index,
            ..
        } => {
            println!("    [Step {}] {}", step_index + 1, step_name);
        }

        ExecutionEvent::StepCompleted {
            status, duration, ..
        } => {
            let line = format!(
                "      {} ({:.2}s)",
                output::outcome_label(*status),
                duration.as_secs_f64()
            );
            output::outcome_line(*status, &line);
        }

        ExecutionEvent::StepSkipped {
            step_name, reason, ..
        } => {
            output::warning(&format!("      {} skipped: {}", step_name, reason));
        }

        ExecutionEvent::VariableExported { name, value, .. } => {
            output::dim(&format!("      [export] {} = {}", name, value));
        }

        ExecutionEvent::Log { level, message, .. } => match level {
            LogLevel::Error => output::error(message),
            LogLevel::Warning => output::warning(message),
            _ => output::dim(message),
        },
    }
}

fn print_failures(result: &RunResult) {
    if result.failed_suites.is_empty() {
        return;
    }
    println!();
    output::error(&format!("{} suite(s) failed:", result.failed_suites.len()));
    for failed in &result.failed_suites {
        output::error(&format!("  - [{}] {}", failed.node_id, failed.message));
    }
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let mut config = EngineConfig::load(args.config.as_deref())?;
    apply_overrides(&mut config, &args)?;

    let (suites, load_errors) = load_suites(&args.paths)?;
    if suites.is_empty() {
        color_eyre::eyre::bail!("No suites could be loaded");
    }

    let mut factory = ReqwestTransportFactory::new();
    if let Some(cert) = &config.http.ca_cert {
        factory = factory.with_ca_cert(cert)?;
    }
    let collaborators = Collaborators::new(Arc::new(factory))
        .with_input(Arc::new(config.input_provider()));

    let (tx, rx) = progress_channel();
    let orchestrator = Orchestrator::new(collaborators)
        .with_config(config.orchestrator_config())
        .with_interpolator(config.interpolator())
        .with_globals(config.globals.clone())
        .with_environment(config.environment_variables())
        .with_progress(tx);

    // Spawn execution in background
    let exec_handle = tokio::spawn(async move {
        orchestrator
            .execute_tests(suites, |stats| {
                debug!(
                    completed = stats.completed,
                    skipped = stats.skipped,
                    discovered = stats.discovered,
                    "progress"
                )
            })
            .await
    });

    // Process events in the foreground
    let mut events = UnboundedReceiverStream::new(rx);
    while let Some(event) = events.next().await {
        render(&event);
    }

    let result = exec_handle.await??;
    print_failures(&result);

    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&result)?)?;
        output::status("Report", &format!("{}", path.display()));
    }

    if !result.success || load_errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}
