//! Environment matrix generation.
//!
//! Each scenario runs once per active matrix entry:
//!
//! - **inherited**: the harness's own environment, so the subject sees real
//!   provider variables (branch, commit, actor) that cannot be fabricated.
//! - **synthetic**: fixed provenance values plus a short passthrough list, so
//!   the subject behaves the same on every machine.
//!
//! The generator works from an environment snapshot and never touches the
//! real process environment.

use crate::config::MatrixConfig;
use harness_proto::Environment;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Identifies which matrix entry produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MatrixLabel {
    #[serde(rename = "with-inherited-env")]
    Inherited,
    #[serde(rename = "without-inherited-env")]
    Synthetic,
}

impl MatrixLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inherited => "with-inherited-env",
            Self::Synthetic => "without-inherited-env",
        }
    }
}

impl fmt::Display for MatrixLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One environment variant a scenario runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixEntry {
    pub label: MatrixLabel,
    pub env: Environment,
}

impl MatrixEntry {
    /// Namespaces a logical identifier (e.g. a suite id) by this entry.
    ///
    /// Concurrent groups sharing remote state stay apart by naming alone.
    pub fn namespaced(&self, base: &str) -> String {
        format!("{base}-{}", self.label)
    }
}

/// Which matrix entries are active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatrixActivation {
    /// Running under continuous integration.
    pub ci: bool,
    /// Suppress the synthetic entry.
    pub only_inherited: bool,
    /// Suppress the inherited entry outside CI.
    pub skip_inherited: bool,
}

impl MatrixActivation {
    /// Reads activation flags from `env` using the configured variable names.
    pub fn from_environment(config: &MatrixConfig, env: &Environment) -> Self {
        Self {
            ci: flag_set(env, &config.ci_marker),
            only_inherited: flag_set(env, &config.only_inherited_var),
            skip_inherited: flag_set(env, &config.skip_inherited_var),
        }
    }

    /// CI always exercises the real provider variables.
    pub fn inherited_active(self) -> bool {
        self.ci || !self.skip_inherited
    }

    pub fn synthetic_active(self) -> bool {
        !self.ci && !self.only_inherited
    }
}

/// A variable counts as set unless absent, empty, `0`, or `false`.
fn flag_set(env: &Environment, name: &str) -> bool {
    env.get(name).is_some_and(|value| {
        let value = value.trim();
        !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
    })
}

/// Yields the environments a scenario must run under.
#[derive(Debug, Clone)]
pub struct EnvironmentMatrixGenerator {
    config: MatrixConfig,
    inherited: Environment,
}

impl EnvironmentMatrixGenerator {
    /// Creates a generator over an explicit inherited snapshot.
    pub fn new(config: MatrixConfig, inherited: Environment) -> Self {
        Self { config, inherited }
    }

    /// Creates a generator over the current process environment.
    pub fn from_process(config: MatrixConfig) -> Self {
        Self::new(config, Environment::from_process())
    }

    /// Activation derived from the inherited snapshot.
    pub fn activation(&self) -> MatrixActivation {
        MatrixActivation::from_environment(&self.config, &self.inherited)
    }

    pub fn config(&self) -> &MatrixConfig {
        &self.config
    }

    pub fn inherited(&self) -> &Environment {
        &self.inherited
    }

    pub fn inherited_entry(&self) -> MatrixEntry {
        MatrixEntry {
            label: MatrixLabel::Inherited,
            env: self.inherited.clone(),
        }
    }

    /// Passthrough variables that exist in the snapshot, then the fabricated
    /// values on top.
    pub fn synthetic_entry(&self) -> MatrixEntry {
        let mut env: Environment = self
            .config
            .passthrough
            .iter()
            .filter_map(|name| Some((name.clone(), self.inherited.get(name)?.to_string())))
            .collect();
        for (name, value) in &self.config.synthetic {
            env.set(name.clone(), value.clone());
        }
        MatrixEntry {
            label: MatrixLabel::Synthetic,
            env,
        }
    }

    /// Active entries, inherited first. May be empty.
    pub fn matrix(&self, activation: MatrixActivation) -> Vec<MatrixEntry> {
        let mut entries = Vec::with_capacity(2);
        if activation.inherited_active() {
            entries.push(self.inherited_entry());
        }
        if activation.synthetic_active() {
            entries.push(self.synthetic_entry());
        }
        debug!(
            ?activation,
            labels = ?entries.iter().map(|e| e.label).collect::<Vec<_>>(),
            "Environment matrix generated"
        );
        entries
    }
}
