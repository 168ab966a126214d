// Engine Configuration
// YAML run settings: scheduling, interpolation, globals, HTTP, scripts and input

use crate::collaborators::input::{running_in_ci, DEFAULT_INPUT_TIMEOUT};
use crate::collaborators::ConsoleInputProvider;
use crate::error::ConfigError;
use crate::execution::scope::VariableScope;
use crate::execution::{ExecutionMode, OrchestratorConfig};
use crate::expression::SandboxLimits;
use crate::interpolation::{Interpolator, DEFAULT_MAX_DEPTH};
use crate::value::VariableMap;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// File name looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "flowtest.yml";

/// Complete engine configuration; every field has a default
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub execution: ExecutionSettings,
    pub interpolation: InterpolationSettings,
    /// Variables visible to every suite
    pub globals: VariableMap,
    pub environment: EnvironmentSettings,
    pub http: HttpSettings,
    pub scripts: ScriptSettings,
    pub input: InputSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub mode: ExecutionMode,
    pub max_parallel: usize,
    pub fail_fast_on_required: bool,
    pub continue_on_failure: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            max_parallel: 4,
            fail_fast_on_required: true,
            continue_on_failure: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationSettings {
    pub max_depth: usize,
    /// Makes generated fake data reproducible
    pub faker_seed: Option<u64>,
}

impl Default for InterpolationSettings {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            faker_seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    /// Only expose variables with this prefix, stripped
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_ms: u64,
    /// PEM CA certificate trusted in addition to the system roots
    pub ca_cert: Option<PathBuf>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            ca_cert: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    pub timeout_ms: u64,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self { timeout_ms: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    pub interactive: bool,
    pub timeout_seconds: u64,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            interactive: !running_in_ci(),
            timeout_seconds: DEFAULT_INPUT_TIMEOUT.as_secs(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from YAML
    pub fn from_yaml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content, path)
    }

    /// Load the first configuration found
    ///
    /// An explicit path must exist. Otherwise `./flowtest.yml`, then the user
    /// config directory, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::search_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => {
                debug!(path = %path.display(), "loading config");
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Implicit configuration locations, highest precedence first
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("flowtest").join("config.yml"));
        }
        paths
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.max_parallel == 0 {
            return Err(ConfigError::Invalid(
                "execution.max_parallel must be at least 1".into(),
            ));
        }
        if self.interpolation.max_depth == 0 {
            return Err(ConfigError::Invalid(
                "interpolation.max_depth must be at least 1".into(),
            ));
        }
        if self.http.timeout_ms == 0 {
            return Err(ConfigError::Invalid("http.timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn script_limits(&self) -> SandboxLimits {
        SandboxLimits::default().with_timeout(Duration::from_millis(self.scripts.timeout_ms))
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            mode: self.execution.mode,
            max_parallel: self.execution.max_parallel,
            fail_fast_on_required: self.execution.fail_fast_on_required,
            continue_on_failure: self.execution.continue_on_failure,
            http_timeout: Duration::from_millis(self.http.timeout_ms),
            script_limits: self.script_limits(),
        }
    }

    pub fn interpolator(&self) -> Interpolator {
        Interpolator::with_options(
            self.interpolation.max_depth,
            self.interpolation.faker_seed,
            self.script_limits(),
        )
    }

    pub fn input_provider(&self) -> ConsoleInputProvider {
        ConsoleInputProvider::new(
            self.input.interactive,
            Duration::from_secs(self.input.timeout_seconds),
        )
    }

    /// Process environment filtered by the configured prefix
    pub fn environment_variables(&self) -> VariableMap {
        VariableScope::capture_environment(self.environment.prefix.as_deref())
    }
}
