//! Configuration parsing and management for jestcheck.
//!
//! This crate provides:
//! - Configuration types (`Config`, `OutputFormat`, etc.)
//! - TOML parsing and discovery of `jestcheck.toml`
//! - Precedence handling (CLI/env > config file > defaults)
//! - The platform context (repository, commit, pull request) of the CI run
//!
//! Everything is resolved once at startup into immutable values that the
//! pipeline receives explicitly.

use jestcheck_types::{
    CODE_INVALID_CONFIG, CODE_MISSING_TOKEN, CODE_UNKNOWN_OUTPUT_FORMAT, DEFAULT_BOT_LOGIN,
    DEFAULT_TEST_COMMAND, RESULTS_FILE,
};
use serde::Deserialize;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Name of the configuration file searched for by [`discover_config`].
pub const CONFIG_FILE_NAME: &str = "jestcheck.toml";

/// Default GitHub REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Default directory that receives saved coverage artifacts.
pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts/jestcheck";

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while building the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("Invalid config value: {0}")]
    InvalidValue(String),

    /// The output format is not one of the supported values.
    #[error("Unrecognized output format '{0}' (expected one of: json, lcov, clover, text)")]
    UnknownOutputFormat(String),

    /// No check-run name was configured.
    #[error("A check name is required (--check-name or check_name)")]
    MissingCheckName,

    /// No platform token was provided.
    #[error("GITHUB_TOKEN is required to publish results")]
    MissingToken,

    /// The CI event payload could not be read.
    #[error("Failed to read event payload '{path}': {message}")]
    Event { path: String, message: String },
}

impl ConfigError {
    /// Stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::MissingToken => CODE_MISSING_TOKEN,
            ConfigError::UnknownOutputFormat(_) => CODE_UNKNOWN_OUTPUT_FORMAT,
            _ => CODE_INVALID_CONFIG,
        }
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Format the test runner is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Structured JSON results with source locations (parsed and published).
    #[default]
    Json,
    /// LCOV coverage report.
    Lcov,
    /// Clover XML coverage report.
    Clover,
    /// Plain-text coverage report.
    Text,
}

impl OutputFormat {
    /// Name as accepted on the command line and used as reporter name.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Lcov => "lcov",
            OutputFormat::Clover => "clover",
            OutputFormat::Text => "text",
        }
    }

    /// Whether the run produces a results file that gets published.
    pub fn is_structured(self) -> bool {
        self == OutputFormat::Json
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "lcov" => Ok(OutputFormat::Lcov),
            "clover" => Ok(OutputFormat::Clover),
            "text" => Ok(OutputFormat::Text),
            _ => Err(ConfigError::UnknownOutputFormat(s.to_string())),
        }
    }
}

/// Configuration file contents (`jestcheck.toml`).
///
/// Every field is optional; unset fields fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Test command to run instead of `npm test`.
    #[serde(default)]
    pub test_command: Option<String>,

    /// Directory the test command runs in.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,

    /// Post a coverage comment on the pull request.
    #[serde(default)]
    pub coverage_comment: Option<bool>,

    /// Keep the coverage directory as a build artifact.
    #[serde(default)]
    pub save_coverage: Option<bool>,

    /// Output format (`json`, `lcov`, `clover`, `text`).
    #[serde(default)]
    pub output_format: Option<String>,

    /// Only run tests related to files changed since the base branch.
    #[serde(default)]
    pub changes_only: Option<bool>,

    /// Display name of the check run.
    #[serde(default)]
    pub check_name: Option<String>,

    /// Login of the bot whose coverage comments get replaced.
    #[serde(default)]
    pub bot_login: Option<String>,

    /// Where saved coverage artifacts are copied to.
    #[serde(default)]
    pub artifacts_dir: Option<PathBuf>,
}

/// Effective configuration with all values resolved.
///
/// This represents the final configuration after applying:
/// 1. Defaults
/// 2. Config file values
/// 3. CLI / environment overrides
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub test_command: String,
    pub working_directory: PathBuf,
    pub coverage_comment: bool,
    pub save_coverage: bool,
    pub output_format: OutputFormat,
    pub changes_only: bool,
    pub check_name: String,
    pub bot_login: String,
    pub artifacts_dir: PathBuf,
}

impl EffectiveConfig {
    /// Defaults with the given check name.
    pub fn with_check_name(check_name: impl Into<String>) -> Self {
        Self {
            test_command: DEFAULT_TEST_COMMAND.to_string(),
            working_directory: PathBuf::from("."),
            coverage_comment: true,
            save_coverage: false,
            output_format: OutputFormat::Json,
            changes_only: false,
            check_name: check_name.into(),
            bot_login: DEFAULT_BOT_LOGIN.to_string(),
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
        }
    }

    /// Whether the test runner should collect coverage.
    pub fn collects_coverage(&self) -> bool {
        self.coverage_comment || self.save_coverage
    }

    /// Path the structured results are written to.
    pub fn results_path(&self) -> PathBuf {
        self.working_directory.join(RESULTS_FILE)
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Load configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if let Some(format) = &config.output_format {
        format.parse::<OutputFormat>()?;
    }
    if let Some(command) = &config.test_command
        && command.trim().is_empty()
    {
        return Err(ConfigError::InvalidValue(
            "test_command must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Try to find and load configuration from the standard location.
///
/// Searches for `jestcheck.toml` in `start` and its parent directories.
/// A file that exists but fails to load is reported as an error rather than
/// skipped.
pub fn discover_config(start: &Path) -> Result<Option<(PathBuf, Config)>, ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.is_file() {
            let config = load_config(&config_path)?;
            return Ok(Some((config_path, config)));
        }

        if !current.pop() {
            break;
        }
    }

    Ok(None)
}

// ============================================================================
// Path Normalization
// ============================================================================

/// Make `path` absolute against the current directory and normalize it.
///
/// Symlinks are not resolved; the test runner reports paths the same way.
pub fn absolute_path(path: &Path) -> io::Result<PathBuf> {
    Ok(normalize_path(&std::path::absolute(path)?))
}

/// Drop `.` components and fold `..` into the preceding component, without
/// touching the file system. `..` at the root stays at the root.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

// ============================================================================
// Precedence Resolution
// ============================================================================

/// CLI / environment override options.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub test_command: Option<String>,
    pub working_directory: Option<PathBuf>,
    pub coverage_comment: Option<bool>,
    pub save_coverage: Option<bool>,
    pub output_format: Option<String>,
    pub changes_only: Option<bool>,
    pub check_name: Option<String>,
    pub bot_login: Option<String>,
    pub artifacts_dir: Option<PathBuf>,
}

/// Resolve effective configuration from the config file and CLI overrides.
///
/// Precedence: CLI > config file > defaults. Empty strings count as unset,
/// which is how CI systems pass optional inputs.
pub fn resolve_config(
    config: Option<&Config>,
    cli: &CliOverrides,
) -> Result<EffectiveConfig, ConfigError> {
    let file = config.cloned().unwrap_or_default();

    let check_name = non_empty(cli.check_name.clone())
        .or_else(|| non_empty(file.check_name.clone()))
        .ok_or(ConfigError::MissingCheckName)?;
    let mut effective = EffectiveConfig::with_check_name(check_name);

    if let Some(command) =
        non_empty(cli.test_command.clone()).or_else(|| non_empty(file.test_command))
    {
        effective.test_command = command;
    }
    if let Some(dir) = cli.working_directory.clone().or(file.working_directory) {
        effective.working_directory = dir;
    }
    if let Some(comment) = cli.coverage_comment.or(file.coverage_comment) {
        effective.coverage_comment = comment;
    }
    if let Some(save) = cli.save_coverage.or(file.save_coverage) {
        effective.save_coverage = save;
    }
    if let Some(format) =
        non_empty(cli.output_format.clone()).or_else(|| non_empty(file.output_format))
    {
        effective.output_format = format.parse()?;
    }
    if let Some(changes_only) = cli.changes_only.or(file.changes_only) {
        effective.changes_only = changes_only;
    }
    if let Some(login) = non_empty(cli.bot_login.clone()).or_else(|| non_empty(file.bot_login)) {
        effective.bot_login = login;
    }
    if let Some(dir) = cli.artifacts_dir.clone().or(file.artifacts_dir) {
        effective.artifacts_dir = dir;
    }

    Ok(effective)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Platform Context
// ============================================================================

/// Repository coordinates (`owner/name`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl FromStr for Repository {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Repository {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(ConfigError::InvalidValue(format!(
                "repository must be 'owner/name', got '{s}'"
            ))),
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Pull request the run belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub head_sha: Option<String>,
    pub base_ref: Option<String>,
}

/// Raw context inputs, as read from the CI environment or CLI flags.
#[derive(Debug, Clone, Default)]
pub struct ContextInputs {
    pub token: Option<String>,
    pub repository: Option<String>,
    pub sha: Option<String>,
    pub event_path: Option<PathBuf>,
    pub base_ref: Option<String>,
    pub pull_request: Option<u64>,
    pub api_url: Option<String>,
}

/// Where and for what the results get published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformContext {
    pub api_url: String,
    pub token: Option<String>,
    pub repository: Option<Repository>,
    pub sha: Option<String>,
    pub pull_request: Option<PullRequest>,
    base_ref: Option<String>,
}

impl PlatformContext {
    /// Commit the check run is attached to: the pull-request head when known,
    /// else the triggering commit.
    pub fn head_sha(&self) -> Option<&str> {
        self.pull_request
            .as_ref()
            .and_then(|pr| pr.head_sha.as_deref())
            .or(self.sha.as_deref())
    }

    /// Base branch of the pull request, if any.
    pub fn base_ref(&self) -> Option<&str> {
        self.base_ref
            .as_deref()
            .or_else(|| self.pull_request.as_ref()?.base_ref.as_deref())
    }

    /// Pull request number, if the run belongs to one.
    pub fn pull_request_number(&self) -> Option<u64> {
        self.pull_request.as_ref().map(|pr| pr.number)
    }

    /// The token, or [`ConfigError::MissingToken`].
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.token.as_deref().ok_or(ConfigError::MissingToken)
    }
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(default)]
    pull_request: Option<EventPullRequest>,
}

#[derive(Debug, Deserialize)]
struct EventPullRequest {
    number: u64,
    #[serde(default)]
    head: Option<EventRef>,
    #[serde(default)]
    base: Option<EventRef>,
}

#[derive(Debug, Deserialize)]
struct EventRef {
    #[serde(default)]
    sha: Option<String>,
    #[serde(default, rename = "ref")]
    ref_name: Option<String>,
}

/// Parse the pull request out of a CI event payload.
pub fn parse_event(content: &str) -> Result<Option<PullRequest>, serde_json::Error> {
    let event: EventPayload = serde_json::from_str(content)?;
    Ok(event.pull_request.map(|pr| PullRequest {
        number: pr.number,
        head_sha: pr.head.as_ref().and_then(|h| h.sha.clone()),
        base_ref: pr.base.as_ref().and_then(|b| b.ref_name.clone()),
    }))
}

/// Build the platform context from raw inputs.
///
/// An explicit pull-request number overrides the one in the event payload.
pub fn resolve_context(inputs: ContextInputs) -> Result<PlatformContext, ConfigError> {
    let repository = non_empty(inputs.repository)
        .map(|r| r.parse::<Repository>())
        .transpose()?;

    let mut pull_request = match &inputs.event_path {
        Some(path) if path.is_file() => {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Event {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            parse_event(&content).map_err(|e| ConfigError::Event {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
        }
        _ => None,
    };

    if let Some(number) = inputs.pull_request
        && pull_request.as_ref().map(|pr| pr.number) != Some(number)
    {
        pull_request = Some(PullRequest {
            number,
            head_sha: None,
            base_ref: None,
        });
    }

    Ok(PlatformContext {
        api_url: non_empty(inputs.api_url)
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        token: non_empty(inputs.token),
        repository,
        sha: non_empty(inputs.sha),
        pull_request,
        base_ref: non_empty(inputs.base_ref),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Path normalization
    // ========================================================================

    #[test]
    fn test_normalize_path_folds_parent_components() {
        assert_eq!(
            normalize_path(Path::new("/repo/sub/../proj/./src")),
            PathBuf::from("/repo/proj/src")
        );
        assert_eq!(normalize_path(Path::new("/../repo")), PathBuf::from("/repo"));
    }

    #[test]
    fn test_normalize_path_keeps_leading_parents_of_relative_paths() {
        assert_eq!(
            normalize_path(Path::new("../../a/./b/..")),
            PathBuf::from("../../a")
        );
        assert_eq!(normalize_path(Path::new("./a/..")), PathBuf::new());
    }

    #[test]
    fn test_absolute_path_is_normalized() {
        let path = absolute_path(Path::new("sub/../proj")).unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("proj"));
        assert!(!path.components().any(|c| matches!(
            c,
            Component::ParentDir | Component::CurDir
        )));
        assert_eq!(
            path,
            std::env::current_dir().unwrap().join("proj")
        );
    }

    fn overrides_with_name() -> CliOverrides {
        CliOverrides {
            check_name: Some("Unit tests".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = parse_config("").unwrap();
        assert!(config.check_name.is_none());
        assert!(config.output_format.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
test_command = "yarn test:ci"
working_directory = "packages/web"
coverage_comment = false
save_coverage = true
output_format = "lcov"
changes_only = true
check_name = "Web tests"
bot_login = "ci-bot[bot]"
artifacts_dir = "out/coverage"
"#;
        let config = parse_config(toml).unwrap();

        assert_eq!(config.test_command.as_deref(), Some("yarn test:ci"));
        assert_eq!(
            config.working_directory,
            Some(PathBuf::from("packages/web"))
        );
        assert_eq!(config.coverage_comment, Some(false));
        assert_eq!(config.save_coverage, Some(true));
        assert_eq!(config.output_format.as_deref(), Some("lcov"));
        assert_eq!(config.changes_only, Some(true));
        assert_eq!(config.check_name.as_deref(), Some("Web tests"));
        assert_eq!(config.bot_login.as_deref(), Some("ci-bot[bot]"));
        assert_eq!(config.artifacts_dir, Some(PathBuf::from("out/coverage")));
    }

    #[test]
    fn test_invalid_output_format_in_file() {
        let err = parse_config(r#"output_format = "html""#).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOutputFormat(ref v) if v == "html"));
        assert_eq!(err.code(), CODE_UNKNOWN_OUTPUT_FORMAT);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            parse_config("coverage_coment = true"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("LCOV".parse::<OutputFormat>().unwrap(), OutputFormat::Lcov);
        assert_eq!(
            "clover".parse::<OutputFormat>().unwrap(),
            OutputFormat::Clover
        );
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("junit".parse::<OutputFormat>().is_err());
        assert!(OutputFormat::Json.is_structured());
        assert!(!OutputFormat::Text.is_structured());
    }

    #[test]
    fn test_resolve_config_defaults() {
        let effective = resolve_config(None, &overrides_with_name()).unwrap();

        assert_eq!(effective.test_command, "npm test");
        assert_eq!(effective.working_directory, PathBuf::from("."));
        assert!(effective.coverage_comment);
        assert!(!effective.save_coverage);
        assert_eq!(effective.output_format, OutputFormat::Json);
        assert!(!effective.changes_only);
        assert_eq!(effective.check_name, "Unit tests");
        assert_eq!(effective.bot_login, DEFAULT_BOT_LOGIN);
        assert!(effective.collects_coverage());
    }

    #[test]
    fn test_resolve_config_requires_check_name() {
        let err = resolve_config(None, &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCheckName));
        assert_eq!(err.code(), CODE_INVALID_CONFIG);
    }

    #[test]
    fn test_resolve_config_cli_overrides_file() {
        let config = parse_config(
            r#"
check_name = "From file"
test_command = "yarn test"
coverage_comment = false
"#,
        )
        .unwrap();
        let cli = CliOverrides {
            check_name: Some("From CLI".to_string()),
            coverage_comment: Some(true),
            ..Default::default()
        };

        let effective = resolve_config(Some(&config), &cli).unwrap();

        assert_eq!(effective.check_name, "From CLI");
        assert_eq!(effective.test_command, "yarn test");
        assert!(effective.coverage_comment);
    }

    #[test]
    fn test_resolve_config_empty_strings_are_unset() {
        let cli = CliOverrides {
            check_name: Some("Tests".to_string()),
            test_command: Some(String::new()),
            output_format: Some("  ".to_string()),
            ..Default::default()
        };
        let effective = resolve_config(None, &cli).unwrap();
        assert_eq!(effective.test_command, "npm test");
        assert_eq!(effective.output_format, OutputFormat::Json);
    }

    #[test]
    fn test_resolve_config_unknown_format_is_fatal() {
        let cli = CliOverrides {
            output_format: Some("cobertura".to_string()),
            ..overrides_with_name()
        };
        assert!(matches!(
            resolve_config(None, &cli),
            Err(ConfigError::UnknownOutputFormat(_))
        ));
    }

    #[test]
    fn test_collects_coverage_when_only_saving() {
        let mut effective = EffectiveConfig::with_check_name("t");
        effective.coverage_comment = false;
        assert!(!effective.collects_coverage());
        effective.save_coverage = true;
        assert!(effective.collects_coverage());
    }

    #[test]
    fn test_results_path_is_under_working_directory() {
        let mut effective = EffectiveConfig::with_check_name("t");
        effective.working_directory = PathBuf::from("/repo/web");
        assert_eq!(
            effective.results_path(),
            PathBuf::from("/repo/web/coverage/coverage-final.json")
        );
    }

    #[test]
    fn test_discover_config_walks_up() {
        let temp = tempfile::TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            r#"check_name = "Discovered""#,
        )
        .unwrap();

        let (path, config) = discover_config(&nested).unwrap().unwrap();
        assert_eq!(path, temp.path().join(CONFIG_FILE_NAME));
        assert_eq!(config.check_name.as_deref(), Some("Discovered"));
    }

    #[test]
    fn test_discover_config_reports_broken_file() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE_NAME), "check_name = ").unwrap();
        assert!(discover_config(temp.path()).is_err());
    }

    #[test]
    fn test_repository_parse() {
        let repo: Repository = "octo/widgets".parse().unwrap();
        assert_eq!(repo.owner, "octo");
        assert_eq!(repo.name, "widgets");
        assert_eq!(repo.to_string(), "octo/widgets");
        assert!("octo".parse::<Repository>().is_err());
        assert!("octo/".parse::<Repository>().is_err());
        assert!("a/b/c".parse::<Repository>().is_err());
    }

    #[test]
    fn test_parse_event_pull_request() {
        let event = r#"{
            "action": "synchronize",
            "pull_request": {
                "number": 42,
                "head": {"sha": "headsha", "ref": "feature"},
                "base": {"sha": "basesha", "ref": "main"}
            }
        }"#;
        let pr = parse_event(event).unwrap().unwrap();
        assert_eq!(pr.number, 42);
        assert_eq!(pr.head_sha.as_deref(), Some("headsha"));
        assert_eq!(pr.base_ref.as_deref(), Some("main"));
    }

    #[test]
    fn test_parse_event_push_has_no_pull_request() {
        assert_eq!(parse_event(r#"{"ref": "refs/heads/main"}"#).unwrap(), None);
    }

    #[test]
    fn test_resolve_context_from_event_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let event_path = temp.path().join("event.json");
        std::fs::write(
            &event_path,
            r#"{"pull_request": {"number": 7, "head": {"sha": "prhead"}, "base": {"ref": "develop"}}}"#,
        )
        .unwrap();

        let context = resolve_context(ContextInputs {
            token: Some("t0k3n".to_string()),
            repository: Some("octo/widgets".to_string()),
            sha: Some("mergesha".to_string()),
            event_path: Some(event_path),
            base_ref: Some(String::new()),
            pull_request: None,
            api_url: Some("https://ghe.example.com/api/v3/".to_string()),
        })
        .unwrap();

        assert_eq!(context.head_sha(), Some("prhead"));
        assert_eq!(context.base_ref(), Some("develop"));
        assert_eq!(context.pull_request_number(), Some(7));
        assert_eq!(context.api_url, "https://ghe.example.com/api/v3");
        assert_eq!(context.require_token().unwrap(), "t0k3n");
    }

    #[test]
    fn test_resolve_context_without_event() {
        let context = resolve_context(ContextInputs {
            sha: Some("pushsha".to_string()),
            base_ref: Some("main".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(context.head_sha(), Some("pushsha"));
        assert_eq!(context.base_ref(), Some("main"));
        assert_eq!(context.pull_request_number(), None);
        assert_eq!(context.api_url, DEFAULT_API_URL);
        assert!(matches!(
            context.require_token(),
            Err(ConfigError::MissingToken)
        ));
    }

    #[test]
    fn test_resolve_context_explicit_pull_request() {
        let context = resolve_context(ContextInputs {
            pull_request: Some(99),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(context.pull_request_number(), Some(99));
        assert_eq!(context.head_sha(), None);
    }

    #[test]
    fn test_resolve_context_rejects_bad_event() {
        let temp = tempfile::TempDir::new().unwrap();
        let event_path = temp.path().join("event.json");
        std::fs::write(&event_path, "not json").unwrap();

        let err = resolve_context(ContextInputs {
            event_path: Some(event_path),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Event { .. }));
    }
}
