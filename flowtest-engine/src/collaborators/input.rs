// Input Provider
// Console prompts for input steps, with CI defaults when nobody is watching

use crate::collaborators::InputProvider;
use crate::error::StepError;
use crate::model::{InputSpec, InputType};
use crate::value::number_value;

use std::fmt;
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Mutex;
use tracing::{info, warn};

type SharedReader = Arc<Mutex<Pin<Box<dyn AsyncBufRead + Send>>>>;

/// Default prompt timeout
pub const DEFAULT_INPUT_TIMEOUT: Duration = Duration::from_secs(300);

/// Whether the process looks like it runs under CI
pub fn running_in_ci() -> bool {
    std::env::var("CI")
        .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

/// Reads answers from stdin
///
/// One buffered reader is shared by every prompt, so piped answers buffered
/// ahead of time reach later prompts.
#[derive(Clone)]
pub struct ConsoleInputProvider {
    interactive: bool,
    timeout: Duration,
    reader: SharedReader,
}

impl fmt::Debug for ConsoleInputProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleInputProvider")
            .field("interactive", &self.interactive)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for ConsoleInputProvider {
    fn default() -> Self {
        Self::new(!running_in_ci(), DEFAULT_INPUT_TIMEOUT)
    }
}

impl ConsoleInputProvider {
    pub fn new(interactive: bool, timeout: Duration) -> Self {
        Self {
            interactive,
            timeout,
            reader: Arc::new(Mutex::new(Box::pin(BufReader::new(tokio::io::stdin())))),
        }
    }

    /// Read answers from `source` instead of stdin
    pub fn with_reader<R>(mut self, source: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        self.reader = Arc::new(Mutex::new(Box::pin(BufReader::new(source))));
        self
    }

    /// Never prompts; answers come from `ci_default` or `default`
    pub fn non_interactive() -> Self {
        Self::new(false, DEFAULT_INPUT_TIMEOUT)
    }

    fn fallback(spec: &InputSpec, prefer_ci: bool) -> Result<Value, StepError> {
        let value = if prefer_ci {
            spec.ci_default.clone().or_else(|| spec.default.clone())
        } else {
            spec.default.clone().or_else(|| spec.ci_default.clone())
        };
        value.ok_or_else(|| StepError::Input {
            variable: spec.variable.clone(),
            message: "no value provided and no default configured".into(),
        })
    }

    async fn read_line(&self, spec: &InputSpec) -> Result<Option<String>, StepError> {
        let mut stderr = std::io::stderr();
        let default_hint = spec
            .default
            .as_ref()
            .map(|d| format!(" [{}]", d))
            .unwrap_or_default();
        let _ = write!(stderr, "{}{}: ", spec.prompt, default_hint);
        let _ = stderr.flush();

        let timeout = spec
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);
        let mut reader = self.reader.lock().await;
        let mut line = String::new();

        match tokio::time::timeout(timeout, reader.read_line(&mut line)).await {
            Ok(Ok(0)) => Ok(None),
            Ok(Ok(_)) => Ok(Some(line.trim_end_matches(['\r', '\n']).to_string())),
            Ok(Err(err)) => Err(StepError::Input {
                variable: spec.variable.clone(),
                message: err.to_string(),
            }),
            Err(_) => {
                warn!(variable = %spec.variable, "input timed out, using default");
                Ok(None)
            }
        }
    }
}

/// Convert raw text to the declared input type
pub fn convert_input(spec: &InputSpec, raw: &str) -> Result<Value, StepError> {
    let invalid = |expected: &str| StepError::Input {
        variable: spec.variable.clone(),
        message: format!("'{}' is not a valid {}", raw, expected),
    };
    match spec.input_type {
        InputType::Text | InputType::Password => Ok(Value::String(raw.to_string())),
        InputType::Number => raw
            .trim()
            .parse::<f64>()
            .map(number_value)
            .map_err(|_| invalid("number")),
        InputType::Boolean => match raw.trim().to_lowercase().as_str() {
            "y" | "yes" | "true" | "1" => Ok(Value::Bool(true)),
            "n" | "no" | "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(invalid("boolean")),
        },
    }
}

#[async_trait::async_trait]
impl InputProvider for ConsoleInputProvider {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    async fn prompt(&self, spec: &InputSpec) -> Result<Value, StepError> {
        if !self.interactive {
            info!(variable = %spec.variable, "non-interactive input, using default");
            return Self::fallback(spec, true);
        }

        match self.read_line(spec).await? {
            Some(raw) if !raw.is_empty() => convert_input(spec, &raw),
            _ => Self::fallback(spec, false),
        }
    }
}
