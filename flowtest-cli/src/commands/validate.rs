use crate::commands::load_suites;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use flowtest_engine::execution::GraphErrorKind;
use flowtest_engine::DependencyGraph;

/// Validate suite files and their dependency graph
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Suite files or directories to search for *.flow.yml
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let (suites, load_errors) = load_suites(&args.paths)?;
    if load_errors > 0 {
        std::process::exit(1);
    }

    let steps: usize = suites.iter().map(|s| s.steps.len()).sum();
    output::check(&format!("Parsed {} suite(s), {} step(s)", suites.len(), steps));

    let graph = DependencyGraph::build(&suites);
    let plan = graph.resolve_order();
    if !plan.blocked.is_empty() {
        output::error(&format!("{} suite(s) cannot be ordered:", plan.blocked.len()));
        for (index, error) in &plan.blocked {
            let label = match error.kind {
                GraphErrorKind::CyclicDependency => "cycle",
                GraphErrorKind::BlockedByCycle => "blocked",
            };
            output::error(&format!("  - [{}] {}: {}", label, suites[*index].node_id, error.message));
        }
        std::process::exit(1);
    }

    let order: Vec<&str> = plan
        .order
        .iter()
        .map(|&i| suites[i].node_id.as_str())
        .collect();
    output::check(&format!("Execution order: {}", order.join(" -> ")));

    println!();
    output::success("Suites are valid");

    Ok(())
}
