//! Declarative scenario definitions and the YAML registry that holds them.
//!
//! A registry file is a YAML list of scenarios:
//!
//! ```yaml
//! - name: partition-index-0
//!   args: ["partition", "x.rb", "y.rb", "z.rb", "--suite-id", "{suite:captain-cli-partition}",
//!          "--index", "0", "--total", "2"]
//!   expect:
//!     exit_code: 0
//!     stdout: "x.rb z.rb"
//! ```
//!
//! Args and env values may use `{fixture:NAME}` (the isolated fixture path)
//! and `{suite:BASE}` (BASE namespaced by matrix entry). The subject's own
//! templating tokens like `{{ tests }}` are left alone.

use crate::expectation::{Expectation, ExpectationError};
use crate::fixtures::{Isolation, redirect_link_name};
use crate::matrix::MatrixEntry;
use harness_proto::{CaptureMode, Environment};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(fixture|suite):([A-Za-z0-9_.\-]+)\}").expect("placeholder pattern is valid")
});

/// Whether the scenario exercises OSS or cloud behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioMode {
    /// Credential stripped from the environment.
    #[default]
    Oss,
    /// Credential required; skipped without it.
    Cloud,
}

/// A fixture file a scenario needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureSpec {
    /// Name used by `{fixture:NAME}` placeholders.
    pub name: String,
    /// Source path, relative to the fixture root unless absolute.
    pub source: PathBuf,
    #[serde(default)]
    pub isolation: Isolation,
    /// Defaults to `<scenario name>-`.
    #[serde(default)]
    pub prefix: Option<String>,
}

/// One declared test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioDefinition {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub args: Vec<String>,

    /// Overrides merged over the matrix entry; these win on collision.
    #[serde(default)]
    pub env: Environment,

    #[serde(default)]
    pub fixtures: Vec<FixtureSpec>,

    #[serde(default)]
    pub mode: ScenarioMode,

    #[serde(default)]
    pub require_ci: bool,

    #[serde(default)]
    pub capture: CaptureMode,

    #[serde(default)]
    pub expect: Expectation,
}

impl ScenarioDefinition {
    pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: None,
            args: args.into_iter().map(Into::into).collect(),
            env: Environment::new(),
            fixtures: Vec::new(),
            mode: ScenarioMode::Oss,
            require_ci: false,
            capture: CaptureMode::Separate,
            expect: Expectation::default(),
        }
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.set(name, value);
        self
    }

    pub fn with_fixture(
        mut self,
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        isolation: Isolation,
    ) -> Self {
        self.fixtures.push(FixtureSpec {
            name: name.into(),
            source: source.into(),
            isolation,
            prefix: None,
        });
        self
    }

    pub fn with_mode(mut self, mode: ScenarioMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn requiring_ci(mut self) -> Self {
        self.require_ci = true;
        self
    }

    pub fn with_capture(mut self, capture: CaptureMode) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_expect(mut self, expect: Expectation) -> Self {
        self.expect = expect;
        self
    }

    /// Prefix used for this scenario's fixture.
    pub fn fixture_prefix(&self, spec: &FixtureSpec) -> String {
        spec.prefix
            .clone()
            .unwrap_or_else(|| format!("{}-", self.name))
    }

    /// Fixture names referenced from args and env values.
    pub fn referenced_fixtures(&self) -> HashSet<String> {
        self.args
            .iter()
            .map(String::as_str)
            .chain(self.env.iter().map(|(_, v)| v))
            .flat_map(|text| PLACEHOLDER.captures_iter(text))
            .filter(|caps| &caps[1] == "fixture")
            .map(|caps| caps[2].to_string())
            .collect()
    }

    fn validate(&self) -> Result<(), ScenarioError> {
        if self.name.trim().is_empty() {
            return Err(ScenarioError::EmptyName);
        }

        let mut declared = HashSet::new();
        for spec in &self.fixtures {
            if !declared.insert(spec.name.as_str()) {
                return Err(ScenarioError::DuplicateFixture {
                    scenario: self.name.clone(),
                    fixture: spec.name.clone(),
                });
            }
        }
        if let Some(unknown) = self
            .referenced_fixtures()
            .into_iter()
            .find(|name| !declared.contains(name.as_str()))
        {
            return Err(ScenarioError::UnknownFixture {
                scenario: self.name.clone(),
                fixture: unknown,
            });
        }

        self.expect
            .validate(self.capture)
            .map_err(|source| ScenarioError::InvalidExpectation {
                scenario: self.name.clone(),
                source,
            })
    }
}

/// Expands `{fixture:NAME}` and `{suite:BASE}` in `template`.
///
/// Unknown fixture names are left as written; the registry rejects them at
/// load time.
pub fn expand_placeholders(
    template: &str,
    fixtures: &BTreeMap<String, PathBuf>,
    entry: &MatrixEntry,
) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match &caps[1] {
            "fixture" => fixtures
                .get(&caps[2])
                .map_or_else(|| caps[0].to_string(), |p| p.display().to_string()),
            _ => entry.namespaced(&caps[2]),
        })
        .into_owned()
}

/// A validated collection of scenarios.
#[derive(Debug, Clone, Default)]
pub struct ScenarioRegistry {
    scenarios: Vec<ScenarioDefinition>,
}

impl ScenarioRegistry {
    /// Builds a registry, rejecting duplicate names and invalid scenarios.
    ///
    /// Redirect links live at a fixed staging path, so two redirect fixtures
    /// resolving to the same link name are rejected too: run concurrently,
    /// one of them would fail with `FixtureBusy`.
    pub fn new(scenarios: Vec<ScenarioDefinition>) -> Result<Self, ScenarioError> {
        let mut names = HashSet::new();
        let mut links: HashMap<String, &str> = HashMap::new();
        for scenario in &scenarios {
            scenario.validate()?;
            if !names.insert(scenario.name.as_str()) {
                return Err(ScenarioError::DuplicateName(scenario.name.clone()));
            }

            let redirects = scenario
                .fixtures
                .iter()
                .filter(|spec| spec.isolation == Isolation::Redirect);
            for spec in redirects {
                let Some(link) = redirect_link_name(&spec.source, &scenario.fixture_prefix(spec))
                else {
                    continue;
                };
                if let Some(first) = links.get(&link) {
                    return Err(ScenarioError::RedirectCollision {
                        link,
                        first: (*first).to_string(),
                        second: scenario.name.clone(),
                    });
                }
                links.insert(link, scenario.name.as_str());
            }
        }
        Ok(Self { scenarios })
    }

    /// Parses one registry file's contents.
    pub fn parse(path: &Path, content: &str) -> Result<Vec<ScenarioDefinition>, ScenarioError> {
        serde_yaml::from_str(content).map_err(|source| ScenarioError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads every `*.yml`/`*.yaml` file in `dir`, in file-name order.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let dir = dir.as_ref();
        let io_error = |source| ScenarioError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml")
            {
                files.push(path);
            }
        }
        files.sort();

        let mut scenarios = Vec::new();
        for path in &files {
            let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
                path: path.clone(),
                source,
            })?;
            let parsed = Self::parse(path, &content)?;
            debug!(file = %path.display(), count = parsed.len(), "Loaded scenario file");
            scenarios.extend(parsed);
        }

        Self::new(scenarios)
    }

    pub fn scenarios(&self) -> &[ScenarioDefinition] {
        &self.scenarios
    }

    pub fn get(&self, name: &str) -> Option<&ScenarioDefinition> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    /// Scenarios whose name contains `needle`.
    pub fn matching<'a>(&'a self, needle: &'a str) -> impl Iterator<Item = &'a ScenarioDefinition> {
        self.scenarios.iter().filter(move |s| s.name.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

/// Errors loading or validating scenarios.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Scenario name must not be empty")]
    EmptyName,

    #[error("Duplicate scenario name '{0}'")]
    DuplicateName(String),

    #[error("Scenario '{scenario}' declares fixture '{fixture}' more than once")]
    DuplicateFixture { scenario: String, fixture: String },

    #[error("Scenario '{scenario}' references undeclared fixture '{fixture}'")]
    UnknownFixture { scenario: String, fixture: String },

    #[error(
        "Scenarios '{first}' and '{second}' both redirect through '{link}'; give one a distinct prefix"
    )]
    RedirectCollision {
        link: String,
        first: String,
        second: String,
    },

    #[error("Scenario '{scenario}' has an invalid expectation: {source}")]
    InvalidExpectation {
        scenario: String,
        #[source]
        source: ExpectationError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixLabel;
    use tempfile::TempDir;

    fn entry(label: MatrixLabel) -> MatrixEntry {
        MatrixEntry {
            label,
            env: Environment::new(),
        }
    }

    #[test]
    fn test_parse_registry_file() {
        let yaml = r#"
- name: retry-failed-tests
  args: ["run", "--test-results", "{fixture:results}", "--retries", "1",
         "--retry-command", "echo {{ tests }}", "-c", "exit 1"]
  env:
    ABQ_SET_EXIT_CODE: "true"
  fixtures:
    - name: results
      source: fixtures/rspec-failed.json
      isolation: redirect
  expect:
    exit_code: 1
- name: version
  args: ["--version"]
  mode: oss
  expect:
    stdout_matches: '^v\d+\.\d+\.\d+'
- name: interleaved
  args: ["run", "--", "/bin/sh", "-c", "echo abc; echo def >&2"]
  capture: merged
  expect:
    combined_prefix: "abc\ndef\n"
"#;
        let scenarios = ScenarioRegistry::parse(Path::new("inline.yml"), yaml).unwrap();
        let registry = ScenarioRegistry::new(scenarios).unwrap();

        assert_eq!(registry.len(), 3);
        let retry = registry.get("retry-failed-tests").unwrap();
        assert_eq!(retry.fixtures[0].isolation, Isolation::Redirect);
        assert_eq!(retry.env.get("ABQ_SET_EXIT_CODE"), Some("true"));
        assert_eq!(retry.expect.exit_code, Some(1));
        assert_eq!(registry.get("version").unwrap().capture, CaptureMode::Separate);
        assert_eq!(registry.get("interleaved").unwrap().capture, CaptureMode::Merged);
    }

    #[test]
    fn test_expand_fixture_and_suite() {
        let fixtures = BTreeMap::from([(
            "results".to_string(),
            PathBuf::from("/stage/run-rspec-isolated-abc.json"),
        )]);

        let arg = expand_placeholders(
            "--test-results={fixture:results}",
            &fixtures,
            &entry(MatrixLabel::Synthetic),
        );
        assert_eq!(arg, "--test-results=/stage/run-rspec-isolated-abc.json");

        let suite = expand_placeholders(
            "{suite:captain-cli-quarantine}",
            &fixtures,
            &entry(MatrixLabel::Inherited),
        );
        assert_eq!(suite, "captain-cli-quarantine-with-inherited-env");
    }

    #[test]
    fn test_subject_templates_pass_through() {
        let fixtures = BTreeMap::new();
        let template = "bin/rspec {{ tests }} && echo '{{ testFiles }}'";
        assert_eq!(
            expand_placeholders(template, &fixtures, &entry(MatrixLabel::Synthetic)),
            template
        );
    }

    #[test]
    fn test_unknown_fixture_rejected() {
        let scenario = ScenarioDefinition::new("bad", ["run", "--test-results", "{fixture:nope}"]);
        let err = ScenarioRegistry::new(vec![scenario]).unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownFixture { ref fixture, .. } if fixture == "nope"));
    }

    #[test]
    fn test_fixture_referenced_from_env() {
        let scenario = ScenarioDefinition::new("env-ref", ["run"])
            .with_env("ABQ_STATE_FILE", "{fixture:state}")
            .with_fixture("state", "fixtures/state.json", Isolation::Copy);
        assert!(ScenarioRegistry::new(vec![scenario]).is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let a = ScenarioDefinition::new("same", ["--version"]);
        let b = ScenarioDefinition::new("same", ["--help"]);
        assert!(matches!(
            ScenarioRegistry::new(vec![a, b]),
            Err(ScenarioError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_duplicate_fixture_rejected() {
        let scenario = ScenarioDefinition::new("dup", ["run"])
            .with_fixture("results", "a.json", Isolation::Copy)
            .with_fixture("results", "b.json", Isolation::Redirect);
        assert!(matches!(
            ScenarioRegistry::new(vec![scenario]),
            Err(ScenarioError::DuplicateFixture { .. })
        ));
    }

    #[test]
    fn test_shared_redirect_link_rejected() {
        let shared = |name: &str, source: &str| {
            let mut scenario = ScenarioDefinition::new(name, ["run", "{fixture:results}"])
                .with_fixture("results", source, Isolation::Redirect);
            scenario.fixtures[0].prefix = Some("retry-".to_string());
            scenario
        };

        // Different directories, same file name and prefix: same link
        let err = ScenarioRegistry::new(vec![
            shared("retry-a", "fixtures/a/rspec.json"),
            shared("retry-b", "fixtures/b/rspec.json"),
        ])
        .unwrap_err();

        assert!(matches!(
            err,
            ScenarioError::RedirectCollision { ref link, ref first, ref second }
                if link == "retry-rspec.json" && first == "retry-a" && second == "retry-b"
        ));
    }

    #[test]
    fn test_redirect_collision_within_one_scenario() {
        let scenario = ScenarioDefinition::new("retry", ["run", "{fixture:a}", "{fixture:b}"])
            .with_fixture("a", "old/rspec.json", Isolation::Redirect)
            .with_fixture("b", "new/rspec.json", Isolation::Redirect);

        assert!(matches!(
            ScenarioRegistry::new(vec![scenario]),
            Err(ScenarioError::RedirectCollision { .. })
        ));
    }

    #[test]
    fn test_distinct_redirect_links_accepted() {
        // Default prefixes differ per scenario; copies never collide
        let a = ScenarioDefinition::new("retry-a", ["run", "{fixture:results}"])
            .with_fixture("results", "rspec.json", Isolation::Redirect);
        let b = ScenarioDefinition::new("retry-b", ["run", "{fixture:results}"])
            .with_fixture("results", "rspec.json", Isolation::Redirect);
        let mut c = ScenarioDefinition::new("copy", ["run", "{fixture:results}"])
            .with_fixture("results", "rspec.json", Isolation::Copy);
        c.fixtures[0].prefix = Some("retry-a-".to_string());

        assert!(ScenarioRegistry::new(vec![a, b, c]).is_ok());
    }

    #[test]
    fn test_merged_capture_with_stream_expectation_rejected() {
        let scenario = ScenarioDefinition::new("interleaved", ["run"])
            .with_capture(CaptureMode::Merged)
            .with_expect(Expectation {
                stderr: Some(String::new()),
                ..Expectation::default()
            });

        let err = ScenarioRegistry::new(vec![scenario]).unwrap_err();

        assert!(matches!(
            err,
            ScenarioError::InvalidExpectation {
                source: ExpectationError::CaptureMismatch { field: "stderr", .. },
                ..
            }
        ));
        assert!(err.to_string().contains("interleaved"));
    }

    #[test]
    fn test_default_fixture_prefix() {
        let scenario = ScenarioDefinition::new("quarantine-all", ["quarantine"])
            .with_fixture("results", "a.json", Isolation::Copy);
        assert_eq!(
            scenario.fixture_prefix(&scenario.fixtures[0]),
            "quarantine-all-"
        );
    }

    #[test]
    fn test_load_dir_in_file_order() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("b.yml"),
            "- name: second\n  args: [\"--version\"]\n",
        )
        .unwrap();
        std::fs::write(
            temp.path().join("a.yaml"),
            "- name: first\n  args: [\"--help\"]\n",
        )
        .unwrap();
        std::fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let registry = ScenarioRegistry::load_dir(temp.path()).unwrap();

        let names: Vec<_> = registry.scenarios().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(registry.matching("sec").count(), 1);
    }

    #[test]
    fn test_yaml_error_names_file() {
        let err = ScenarioRegistry::parse(Path::new("broken.yml"), "- name: [").unwrap_err();
        assert!(err.to_string().contains("broken.yml"));
    }
}
