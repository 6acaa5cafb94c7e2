//! Configuration types for Captain Harness.
//!
//! Every field has a default, so a missing `harness.yml` still yields a
//! usable configuration. A handful of environment variables override the
//! file after it is loaded, which lets CI point at a freshly built binary
//! without editing the checked-in config.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding `subject.binary`.
pub const BINARY_OVERRIDE_VAR: &str = "CAPTAIN_HARNESS_BINARY";
/// Environment variable overriding `fixtures.staging_dir`.
pub const STAGING_OVERRIDE_VAR: &str = "CAPTAIN_HARNESS_STAGING_DIR";
/// Environment variable overriding `concurrency`.
pub const CONCURRENCY_OVERRIDE_VAR: &str = "CAPTAIN_HARNESS_CONCURRENCY";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub subject: SubjectConfig,

    #[serde(default)]
    pub fixtures: FixtureConfig,

    #[serde(default)]
    pub matrix: MatrixConfig,

    #[serde(default)]
    pub credentials: CredentialConfig,

    /// Directory holding the `*.yml` scenario registry.
    #[serde(default = "default_scenarios_dir")]
    pub scenarios_dir: PathBuf,

    /// Maximum number of scenarios running at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_scenarios_dir() -> PathBuf {
    PathBuf::from("scenarios")
}

fn default_concurrency() -> usize {
    4
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            subject: SubjectConfig::default(),
            fixtures: FixtureConfig::default(),
            matrix: MatrixConfig::default(),
            credentials: CredentialConfig::default(),
            scenarios_dir: default_scenarios_dir(),
            concurrency: default_concurrency(),
        }
    }
}

/// Where the subject lives and where it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectConfig {
    /// Binary location; relative paths resolve against `working_dir`.
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Directory the subject is launched from.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
}

fn default_binary() -> PathBuf {
    PathBuf::from("dist/captain")
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            working_dir: default_working_dir(),
        }
    }
}

impl SubjectConfig {
    /// The binary path with `working_dir` applied.
    pub fn binary_path(&self) -> PathBuf {
        if self.binary.is_absolute() {
            self.binary.clone()
        } else {
            self.working_dir.join(&self.binary)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureConfig {
    /// Where isolated copies and redirect links are created.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("tmp/harness-fixtures")
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
        }
    }
}

/// Environment matrix activation and the synthetic entry's contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Presence marks a continuous-integration run.
    #[serde(default = "default_ci_marker")]
    pub ci_marker: String,

    /// When set, the synthetic entry is not yielded.
    #[serde(default = "default_only_inherited_var")]
    pub only_inherited_var: String,

    /// When set outside CI, the inherited entry is not yielded.
    #[serde(default = "default_skip_inherited_var")]
    pub skip_inherited_var: String,

    /// Variables copied from the harness environment into the synthetic entry.
    #[serde(default = "default_passthrough")]
    pub passthrough: Vec<String>,

    /// Fabricated provenance values for the synthetic entry.
    #[serde(default = "default_synthetic")]
    pub synthetic: BTreeMap<String, String>,
}

fn default_ci_marker() -> String {
    "CI".to_string()
}

fn default_only_inherited_var() -> String {
    "ONLY_INHERITED_ENV".to_string()
}

fn default_skip_inherited_var() -> String {
    "SKIP_INHERITED_ENV".to_string()
}

fn default_passthrough() -> Vec<String> {
    vec!["PATH".to_string(), "HOME".to_string()]
}

fn default_synthetic() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("CAPTAIN_BRANCH".to_string(), "main".to_string()),
        (
            "CAPTAIN_SHA".to_string(),
            "e4b8a9f6a3c1d2b5e7f90a1b2c3d4e5f60718293".to_string(),
        ),
        ("CAPTAIN_WHO".to_string(), "captain-harness".to_string()),
    ])
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            ci_marker: default_ci_marker(),
            only_inherited_var: default_only_inherited_var(),
            skip_inherited_var: default_skip_inherited_var(),
            passthrough: default_passthrough(),
            synthetic: default_synthetic(),
        }
    }
}

/// Credential routing between OSS and cloud mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(default = "default_token_var")]
    pub token_var: String,

    #[serde(default = "default_host_var")]
    pub host_var: String,
}

fn default_token_var() -> String {
    "RWX_ACCESS_TOKEN".to_string()
}

fn default_host_var() -> String {
    "CAPTAIN_HOST".to_string()
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            token_var: default_token_var(),
            host_var: default_host_var(),
        }
    }
}

impl HarnessConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        let config: Self = serde_yaml::from_str(&content)?;
        debug!(
            binary = %config.subject.binary.display(),
            staging_dir = %config.fixtures.staging_dir.display(),
            concurrency = config.concurrency,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Applies `CAPTAIN_HARNESS_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides using `lookup` in place of the process environment.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(binary) = present(BINARY_OVERRIDE_VAR) {
            debug!(from = BINARY_OVERRIDE_VAR, value = %binary, "Overriding subject.binary");
            self.subject.binary = PathBuf::from(binary);
        }
        if let Some(dir) = present(STAGING_OVERRIDE_VAR) {
            debug!(from = STAGING_OVERRIDE_VAR, value = %dir, "Overriding fixtures.staging_dir");
            self.fixtures.staging_dir = PathBuf::from(dir);
        }
        if let Some(raw) = present(CONCURRENCY_OVERRIDE_VAR) {
            self.concurrency = raw.parse().map_err(|_| ConfigError::InvalidValue {
                field: CONCURRENCY_OVERRIDE_VAR.to_string(),
                value: raw.clone(),
            })?;
        }
        Ok(())
    }

    /// Rejects configurations the harness cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency".to_string(),
                value: "0".to_string(),
            });
        }

        let names = [
            ("matrix.ci_marker", &self.matrix.ci_marker),
            ("matrix.only_inherited_var", &self.matrix.only_inherited_var),
            ("matrix.skip_inherited_var", &self.matrix.skip_inherited_var),
            ("credentials.token_var", &self.credentials.token_var),
            ("credentials.host_var", &self.credentials.host_var),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyVariableName(field.to_string()));
            }
        }
        if let Some(name) = self.matrix.synthetic.keys().find(|k| k.trim().is_empty()) {
            return Err(ConfigError::EmptyVariableName(format!(
                "matrix.synthetic[{name:?}]"
            )));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: '{value}'")]
    InvalidValue { field: String, value: String },

    #[error("Variable name for {0} must not be empty")]
    EmptyVariableName(String),
}
