//! jestcheck runs a project's Jest test suite in CI and publishes the outcome
//! to GitHub: a check run with one annotation per failed assertion and a
//! pull-request comment with per-file coverage.

use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use jestcheck_adapters_github::GitHubClient;
use jestcheck_adapters_runner::ShellRunner;
use jestcheck_app::{
    AppError, EXIT_ERROR, EXIT_TESTS_FAILED, RecordingPlatform, RunOutcome, RunRequest,
    run_pipeline,
};
use jestcheck_config::{
    CliOverrides, ConfigError, ContextInputs, Repository, absolute_path, discover_config,
    load_config, resolve_config, resolve_context,
};
use jestcheck_ports::{ReviewPlatform, SystemClock};
use jestcheck_render::{DEFAULT_MAX_ANNOTATIONS, escape_data, render_workflow_annotations};
use jestcheck_types::{CODE_IO_ERROR, explain};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Commit used for dry runs when none is known.
const DRY_RUN_SHA: &str = "HEAD";

/// jestcheck runs Jest in CI and publishes results as a GitHub check run and coverage comment.
#[derive(Parser)]
#[command(name = "jestcheck")]
#[command(
    about = "Run Jest in CI and publish the results as a GitHub check run and a pull-request coverage comment."
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[allow(clippy::large_enum_variant)]
enum Commands {
    /// Run the tests and publish the results
    Run(RunArgs),
    /// Explain an error code
    Explain {
        /// Error code to explain
        code: String,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Test command to run (default: npm test)
    #[arg(long, env = "JESTCHECK_TEST_COMMAND")]
    test_command: Option<String>,

    /// Directory the tests run in (default: current directory)
    #[arg(long, env = "JESTCHECK_WORKING_DIRECTORY")]
    working_directory: Option<PathBuf>,

    /// Post a coverage table on the pull request (default: true)
    #[arg(long, env = "JESTCHECK_COVERAGE_COMMENT", value_parser = BoolishValueParser::new())]
    coverage_comment: Option<bool>,

    /// Copy the coverage directory to the artifacts directory (default: false)
    #[arg(long, env = "JESTCHECK_SAVE_COVERAGE", value_parser = BoolishValueParser::new())]
    save_coverage: Option<bool>,

    /// Output format: json, lcov, clover or text (default: json)
    #[arg(long, env = "JESTCHECK_OUTPUT_FORMAT")]
    output_format: Option<String>,

    /// Only run tests related to files changed since the base branch (default: false)
    #[arg(long, env = "JESTCHECK_CHANGES_ONLY", value_parser = BoolishValueParser::new())]
    changes_only: Option<bool>,

    /// Display name of the check run (required here or in the config file)
    #[arg(long, env = "JESTCHECK_CHECK_NAME")]
    check_name: Option<String>,

    /// Login whose previous coverage comments are replaced
    #[arg(long, env = "JESTCHECK_BOT_LOGIN")]
    bot_login: Option<String>,

    /// Directory that receives saved coverage
    #[arg(long, env = "JESTCHECK_ARTIFACTS_DIR")]
    artifacts_dir: Option<PathBuf>,

    /// Path to config file (default: auto-discover jestcheck.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// GitHub token (required unless --dry-run)
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Repository as owner/name
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repo: Option<String>,

    /// Commit the check run is attached to
    #[arg(long, env = "GITHUB_SHA")]
    sha: Option<String>,

    /// Path to the workflow event payload
    #[arg(long, env = "GITHUB_EVENT_PATH")]
    event_path: Option<PathBuf>,

    /// Base branch of the pull request
    #[arg(long, env = "GITHUB_BASE_REF")]
    base_ref: Option<String>,

    /// Pull request number (overrides the event payload)
    #[arg(long)]
    pr: Option<u64>,

    /// GitHub REST API URL
    #[arg(long, env = "GITHUB_API_URL")]
    api_url: Option<String>,

    /// Skip every GitHub call; only write local outputs
    #[arg(long)]
    dry_run: bool,

    /// Output path for the check-run payload JSON
    #[arg(long, default_value = "artifacts/jestcheck/check-run.json")]
    out: PathBuf,

    /// Output path for the coverage comment markdown
    #[arg(long)]
    md: Option<PathBuf>,

    /// Print failed assertions as GitHub workflow annotations
    #[arg(long)]
    workflow_annotations: bool,
}

/// CLI errors
#[derive(Debug, Error)]
enum CliError {
    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    DirCreate {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to resolve working directory '{path}': {source}")]
    WorkingDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Failed to serialize check run: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    App(#[from] AppError),
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::App(AppError::Config(e))
    }
}

impl CliError {
    fn code(&self) -> &'static str {
        match self {
            CliError::App(e) => e.code(),
            _ => CODE_IO_ERROR,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(code = e.code(), "{e}");
            println!("::error::{}", escape_data(&e.to_string()));
            EXIT_ERROR
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32, CliError> {
    match cli.command {
        Commands::Run(args) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(CliError::Runtime)?;
            runtime.block_on(run_tests(args))
        }
        Commands::Explain { code } => run_explain(&code),
    }
}

async fn run_tests(args: RunArgs) -> Result<i32, CliError> {
    let (request, context_api_url, repository, token) = build_request(&args)?;

    let platform: Box<dyn ReviewPlatform> = if args.dry_run {
        tracing::info!("dry run: GitHub will not be contacted");
        Box::new(RecordingPlatform::new(request.config.bot_login.clone()))
    } else {
        let token = token.ok_or(ConfigError::MissingToken)?;
        let repository = repository.ok_or_else(|| {
            ConfigError::InvalidValue(
                "a repository is required (GITHUB_REPOSITORY or --repo)".to_string(),
            )
        })?;
        Box::new(GitHubClient::new(&context_api_url, repository, token).map_err(AppError::from)?)
    };

    let outcome = run_pipeline(&request, &ShellRunner::new(), platform.as_ref(), &SystemClock)
        .await?;

    write_outputs(&args, &outcome)?;
    report_outcome(&outcome);
    Ok(outcome.exit_code)
}

/// Run request plus what the GitHub client needs: API URL, repository, token.
type Resolved = (RunRequest, String, Option<Repository>, Option<String>);

/// Resolve configuration and platform context into a run request.
fn build_request(args: &RunArgs) -> Result<Resolved, CliError> {
    let file_config = match &args.config {
        Some(path) => Some(load_config(path)?),
        None => {
            let cwd = std::env::current_dir().map_err(|e| CliError::WorkingDirectory {
                path: ".".to_string(),
                source: e,
            })?;
            discover_config(&cwd)?.map(|(path, config)| {
                tracing::debug!(path = %path.display(), "loaded config file");
                config
            })
        }
    };

    let overrides = CliOverrides {
        test_command: args.test_command.clone(),
        working_directory: args.working_directory.clone(),
        coverage_comment: args.coverage_comment,
        save_coverage: args.save_coverage,
        output_format: args.output_format.clone(),
        changes_only: args.changes_only,
        check_name: args.check_name.clone(),
        bot_login: args.bot_login.clone(),
        artifacts_dir: args.artifacts_dir.clone(),
    };
    let mut config = resolve_config(file_config.as_ref(), &overrides)?;
    config.working_directory = absolute_path(&config.working_directory).map_err(|e| {
        CliError::WorkingDirectory {
            path: config.working_directory.display().to_string(),
            source: e,
        }
    })?;

    let context = resolve_context(ContextInputs {
        token: args.token.clone(),
        repository: args.repo.clone(),
        sha: args.sha.clone(),
        event_path: args.event_path.clone(),
        base_ref: args.base_ref.clone(),
        pull_request: args.pr,
        api_url: args.api_url.clone(),
    })?;
    if !args.dry_run {
        context.require_token()?;
    }

    let head_sha = match context.head_sha() {
        Some(sha) => sha.to_string(),
        None if args.dry_run => DRY_RUN_SHA.to_string(),
        None => {
            return Err(ConfigError::InvalidValue(
                "a commit SHA is required (GITHUB_SHA or --sha)".to_string(),
            )
            .into());
        }
    };

    tracing::debug!(
        working_directory = %config.working_directory.display(),
        output_format = %config.output_format,
        pull_request = ?context.pull_request_number(),
        "resolved configuration"
    );

    let request = RunRequest {
        head_sha,
        pull_request: context.pull_request_number(),
        base_ref: context.base_ref().map(str::to_string),
        config,
    };
    Ok((request, context.api_url, context.repository, context.token))
}

fn write_outputs(args: &RunArgs, outcome: &RunOutcome) -> Result<(), CliError> {
    if let Some(payload) = &outcome.payload {
        let json = serde_json::to_string_pretty(payload)?;
        write_file(&args.out, &json)?;
        tracing::info!(path = %args.out.display(), "wrote check-run payload");

        if args.workflow_annotations {
            print!(
                "{}",
                render_workflow_annotations(payload, DEFAULT_MAX_ANNOTATIONS)
            );
        }
    }

    if let Some(md_path) = &args.md
        && let Some(body) = outcome.coverage.body()
    {
        write_file(md_path, body)?;
        tracing::info!(path = %md_path.display(), "wrote coverage comment");
    }
    Ok(())
}

fn report_outcome(outcome: &RunOutcome) {
    if let Some(output) = &outcome.run_output {
        eprint!("{}", output.stdout);
        eprint!("{}", output.stderr);
    }
    if outcome.exit_code != EXIT_TESTS_FAILED {
        return;
    }
    let message = match &outcome.payload {
        Some(payload) => payload.output.summary.clone(),
        None => match outcome.run_output.as_ref().and_then(|o| o.exit_code) {
            Some(code) => format!("Test command exited with code {code}"),
            None => "Test command was terminated".to_string(),
        },
    };
    println!("::error::{}", escape_data(&message));
}

fn run_explain(code: &str) -> Result<i32, CliError> {
    if let Some(info) = explain(code) {
        println!("Code: {}", info.code);
        println!("Name: {}", info.name);
        println!("Meaning: {}", info.description);
        println!("Remediation: {}", info.remediation);
        Ok(0)
    } else {
        eprintln!("Unknown code: {code}");
        Ok(EXIT_ERROR)
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), CliError> {
    ensure_parent_dir(path)?;
    fs::write(path, content).map_err(|e| CliError::FileWrite {
        path: path.display().to_string(),
        source: e,
    })
}

/// Ensure the parent directory of a path exists
fn ensure_parent_dir(path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| CliError::DirCreate {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jestcheck_config::{DEFAULT_ARTIFACTS_DIR, OutputFormat};
    use jestcheck_ports::RunOutput;
    use jestcheck_render::CoverageTable;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(args).expect("arguments should parse");
        match cli.command {
            Commands::Run(args) => args,
            Commands::Explain { .. } => panic!("unexpected explain command"),
        }
    }

    /// Drop anything clap picked up from a surrounding CI environment.
    fn without_ci_env(mut args: RunArgs) -> RunArgs {
        args.token = None;
        args.repo = None;
        args.sha = None;
        args.event_path = None;
        args.base_ref = None;
        args.api_url = None;
        args
    }

    #[test]
    fn test_cli_parsing() {
        let args = parse(&[
            "jestcheck",
            "run",
            "--check-name",
            "Jest",
            "--coverage-comment",
            "false",
            "--changes-only",
            "yes",
            "--output-format",
            "lcov",
        ]);
        assert_eq!(args.check_name.as_deref(), Some("Jest"));
        assert_eq!(args.coverage_comment, Some(false));
        assert_eq!(args.changes_only, Some(true));
        assert_eq!(args.output_format.as_deref(), Some("lcov"));
    }

    #[test]
    fn test_cli_default_values() {
        let args = parse(&["jestcheck", "run", "--check-name", "Jest"]);
        assert_eq!(args.out, PathBuf::from("artifacts/jestcheck/check-run.json"));
        assert!(args.md.is_none());
        assert!(!args.dry_run);
        assert!(!args.workflow_annotations);
        assert!(args.out.starts_with(DEFAULT_ARTIFACTS_DIR));
    }

    #[test]
    fn test_invalid_bool_is_rejected() {
        let result = Cli::try_parse_from(["jestcheck", "run", "--save-coverage", "maybe"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_explain_parses() {
        let cli =
            Cli::try_parse_from(["jestcheck", "explain", "jestcheck.tests.failed"]).unwrap();
        assert!(
            matches!(cli.command, Commands::Explain { code } if code == "jestcheck.tests.failed")
        );
    }

    #[test]
    fn test_build_request_dry_run_without_context() {
        let dir = TempDir::new().unwrap();
        let mut args = without_ci_env(parse(&[
            "jestcheck",
            "run",
            "--check-name",
            "Jest",
            "--dry-run",
        ]));
        args.working_directory = Some(dir.path().to_path_buf());
        args.config = Some(dir.path().join("missing.toml"));

        // An explicit config path must exist.
        assert!(build_request(&args).is_err());

        fs::write(dir.path().join("jestcheck.toml"), "output_format = \"clover\"\n").unwrap();
        args.config = Some(dir.path().join("jestcheck.toml"));
        let (request, api_url, repository, token) = build_request(&args).unwrap();

        assert_eq!(request.head_sha, DRY_RUN_SHA);
        assert_eq!(request.config.output_format, OutputFormat::Clover);
        assert!(request.config.working_directory.is_absolute());
        assert_eq!(api_url, "https://api.github.com");
        assert!(repository.is_none());
        assert!(token.is_none());
    }

    #[test]
    fn test_build_request_normalizes_working_directory() {
        let dir = TempDir::new().unwrap();
        let mut args = without_ci_env(parse(&[
            "jestcheck",
            "run",
            "--check-name",
            "Jest",
            "--dry-run",
        ]));
        fs::write(dir.path().join("jestcheck.toml"), "").unwrap();
        args.config = Some(dir.path().join("jestcheck.toml"));
        args.working_directory = Some(dir.path().join("sub/../proj/."));

        let (request, ..) = build_request(&args).unwrap();
        assert_eq!(request.config.working_directory, dir.path().join("proj"));
    }

    #[test]
    fn test_build_request_requires_token() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("jestcheck.toml"), "check_name = \"Jest\"\n").unwrap();
        let mut args = without_ci_env(parse(&["jestcheck", "run"]));
        args.sha = Some("abc".to_string());
        args.config = Some(dir.path().join("jestcheck.toml"));

        let err = build_request(&args).unwrap_err();
        assert_eq!(err.code(), jestcheck_types::CODE_MISSING_TOKEN);
    }

    #[test]
    fn test_unknown_output_format_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut args = without_ci_env(parse(&[
            "jestcheck",
            "run",
            "--check-name",
            "Jest",
            "--output-format",
            "xml",
            "--dry-run",
        ]));
        args.config = Some(dir.path().join("jestcheck.toml"));
        fs::write(dir.path().join("jestcheck.toml"), "").unwrap();
        args.working_directory = Some(dir.path().to_path_buf());

        let err = build_request(&args).unwrap_err();
        assert_eq!(err.code(), jestcheck_types::CODE_UNKNOWN_OUTPUT_FORMAT);
    }

    #[test]
    fn test_write_outputs_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let mut args = parse(&["jestcheck", "run", "--check-name", "Jest"]);
        args.out = dir.path().join("nested/check-run.json");
        args.md = Some(dir.path().join("nested/comment.md"));

        let outcome = RunOutcome {
            stage: jestcheck_app::Stage::Done,
            command: "npm test".to_string(),
            run_output: Some(RunOutput::default()),
            payload: None,
            coverage: CoverageTable::Rendered("body".to_string()),
            comments: None,
            artifacts: None,
            exit_code: 0,
        };
        write_outputs(&args, &outcome).unwrap();

        assert!(!args.out.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("nested/comment.md")).unwrap(),
            "body"
        );
    }
}
