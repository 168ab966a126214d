// Engine Errors
// Error types shared across loading, configuration and orchestration

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Top-level error for the engine crate
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors raised while reading the engine configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Errors raised while loading a single suite document
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid suite {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

impl LoadError {
    pub fn invalid(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Path of the document that failed to load
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Io { path, .. } | Self::Yaml { path, .. } | Self::Invalid { path, .. } => path,
        }
    }
}

/// Run-level configuration conflicts detected before any suite executes
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(
        "Suites {suites:?} require interactive input, which cannot run in parallel mode; \
         switch to sequential mode or use a non-interactive input provider"
    )]
    InteractiveInParallel { suites: Vec<String> },
}

/// Errors raised by HTTP transports
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Failed to read certificate {path}: {source}")]
    Certificate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request failed: {0}")]
    Request(String),
}

/// Errors raised by interpolation strategies
#[derive(Debug, Clone, Error)]
pub enum InterpolationError {
    #[error("Expression evaluation failed for '{expression}': {message}")]
    Expression { expression: String, message: String },

    #[error("Unknown generator '{0}'")]
    UnknownGenerator(String),

    #[error("Strategy '{strategy}' failed: {message}")]
    Strategy { strategy: String, message: String },
}

/// Failures inside a single step; always converted into a failed step result
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error("Capture '{name}' failed: {message}")]
    Capture { name: String, message: String },

    #[error("Script failed: {0}")]
    Script(String),

    #[error("Input '{variable}' failed: {message}")]
    Input { variable: String, message: String },

    #[error("Call to '{target}' failed: {message}")]
    Call { target: String, message: String },

    #[error("Invalid step: {0}")]
    Invalid(String),
}
