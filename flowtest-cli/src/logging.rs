// Logging
// tracing subscriber setup for the command line

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing on stderr
///
/// `RUST_LOG` takes precedence. Otherwise this crate and the engine log at
/// info (debug with `--verbose`) and dependencies at warn.
pub fn init(verbose: bool) {
    let default = if verbose {
        "flowtest=debug,warn"
    } else {
        "flowtest=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}
