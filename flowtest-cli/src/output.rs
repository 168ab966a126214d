// Console Output
// Styled stderr lines for run progress and validation results

use std::io::IsTerminal;
use std::sync::OnceLock;

use flowtest_engine::ExecutionStatus;

/// ANSI styles used by the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Accent,
    Bold,
    Dim,
    Green,
    GreenBold,
    Red,
    RedBold,
    Yellow,
    Blue,
}

impl Style {
    fn code(self) -> &'static str {
        match self {
            Style::Accent => "1;36",
            Style::Bold => "1",
            Style::Dim => "2",
            Style::Green => "32",
            Style::GreenBold => "1;32",
            Style::Red => "31",
            Style::RedBold => "1;31",
            Style::Yellow => "33",
            Style::Blue => "1;34",
        }
    }
}

/// Colors are off when `NO_COLOR` is set or stderr is not a terminal
fn colors_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal()
    })
}

fn paint(style: Style, text: &str, enabled: bool) -> String {
    if enabled {
        format!("\x1b[{}m{}\x1b[0m", style.code(), text)
    } else {
        text.to_string()
    }
}

fn styled(style: Style, text: &str) -> String {
    paint(style, text, colors_enabled())
}

/// Right-aligned action label, cargo style
pub fn status(action: &str, message: &str) {
    eprintln!("{} {}", styled(Style::Accent, &format!("{:>12}", action)), message);
}

pub fn success(message: &str) {
    eprintln!("{} {}", styled(Style::GreenBold, "  \u{2713}"), message);
}

pub fn failure(message: &str) {
    eprintln!("{} {}", styled(Style::RedBold, "  \u{2717}"), message);
}

/// A passed validation check
pub fn check(message: &str) {
    eprintln!("{} {}", styled(Style::Green, "  \u{2713}"), message);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", styled(Style::Yellow, "  !"), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", styled(Style::RedBold, "error:"), message);
}

pub fn dim(message: &str) {
    eprintln!("{}", styled(Style::Dim, message));
}

/// Whole line colored by outcome: green for success, red otherwise
pub fn outcome_line(status: ExecutionStatus, line: &str) {
    let style = if status.is_success() {
        Style::Green
    } else {
        Style::Red
    };
    eprintln!("{}", styled(style, line));
}

/// Short outcome marker used in suite and step lines
pub fn outcome_label(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Success => "OK",
        ExecutionStatus::Failure => "FAIL",
        ExecutionStatus::Skipped => "SKIP",
    }
}

pub fn suite_header(name: &str, total_steps: usize) {
    eprintln!(
        "{} '{}' ({} steps)",
        styled(Style::Blue, "  Suite"),
        name,
        total_steps
    );
}

pub fn header(message: &str) {
    eprintln!("{}", styled(Style::Bold, &format!("==> {}", message)));
}
