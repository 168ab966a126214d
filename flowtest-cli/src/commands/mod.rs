// CLI Commands

pub mod run;
pub mod validate;

use crate::output;

use std::path::PathBuf;

use color_eyre::Result;
use flowtest_engine::{Suite, SuiteLoader};

/// Expand files and directories into suite document paths
pub fn collect_paths(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            paths.extend(SuiteLoader::discover(input)?);
        } else if input.is_file() {
            paths.push(input.clone());
        } else {
            color_eyre::eyre::bail!("Path not found: {}", input.display());
        }
    }
    paths.dedup();
    Ok(paths)
}

/// Load suites, printing every document that failed
pub fn load_suites(inputs: &[PathBuf]) -> Result<(Vec<Suite>, usize)> {
    let paths = collect_paths(inputs)?;
    if paths.is_empty() {
        color_eyre::eyre::bail!("No *.flow.yml suites found");
    }

    output::status("Loading", &format!("{} suite file(s)", paths.len()));
    let (suites, errors) = SuiteLoader::load_all(&paths);
    for error in &errors {
        output::error(&error.to_string());
    }
    Ok((suites, errors.len()))
}
