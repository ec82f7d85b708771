//! Application orchestration for jestcheck.
//!
//! This crate provides [`run_pipeline`], which drives one CI run from start to
//! finish:
//!
//! 1. Build the test command from the effective configuration
//! 2. Run it and capture its output
//! 3. Save the coverage directory as an artifact, when requested
//! 4. Parse the structured results file
//! 5. Publish a check run with one annotation per failed assertion
//! 6. Replace the bot's previous coverage comment on the pull request
//!
//! The test runner, the review platform and the clock are ports, so the whole
//! pipeline runs against in-memory fakes in tests.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::join_all;
use jestcheck_adapters_results::{ResultsError, load_results};
use jestcheck_config::{ConfigError, EffectiveConfig, normalize_path};
use jestcheck_domain::{CheckTarget, build_check_payload, build_command};
use jestcheck_ports::{
    Clock, PlatformError, ReviewPlatform, RunOutput, RunnerError, TestRunner,
};
use jestcheck_render::{CoverageTable, render_coverage_table};
use jestcheck_types::{
    CODE_IO_ERROR, CODE_PLATFORM_REQUEST_FAILED, CODE_RESULTS_UNREADABLE, CODE_RUNNER_FAILED,
    COVERAGE_DIR, CheckPayload, Comment, CommentAuthor, StructuredResults,
};
use thiserror::Error;

/// Exit code of a run whose tests passed.
pub const EXIT_PASSED: i32 = 0;

/// Exit code of a run that could not complete.
pub const EXIT_ERROR: i32 = 1;

/// Exit code of a run whose tests failed.
pub const EXIT_TESTS_FAILED: i32 = 2;

// ============================================================================
// Request and Outcome Types
// ============================================================================

/// Step of the pipeline state machine.
///
/// Runs move strictly forward; `Failed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    CommandBuilt,
    ProcessExecuted,
    ResultsParsed,
    ChecksPublished,
    CommentsReconciled,
    Done,
    Failed,
}

/// Everything one pipeline run needs besides its ports.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Resolved configuration; `working_directory` should be absolute.
    pub config: EffectiveConfig,
    /// Commit the check run is attached to.
    pub head_sha: String,
    /// Pull request that receives the coverage comment.
    pub pull_request: Option<u64>,
    /// Base branch used for changed-files-only runs.
    pub base_ref: Option<String>,
}

/// Result of a completed pipeline run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Last stage reached.
    pub stage: Stage,
    /// The shell command that was run.
    pub command: String,
    /// Captured runner output, `None` when it could not be launched.
    pub run_output: Option<RunOutput>,
    /// Check run built from the results (structured output only).
    pub payload: Option<CheckPayload>,
    /// Coverage comment rendering.
    pub coverage: CoverageTable,
    /// Comment reconciliation summary, when comments were reconciled.
    pub comments: Option<ReconcileSummary>,
    /// Where coverage artifacts were saved.
    pub artifacts: Option<PathBuf>,
    /// Process exit code: [`EXIT_PASSED`] or [`EXIT_TESTS_FAILED`].
    pub exit_code: i32,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid or incomplete configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The test command could not be launched and nothing else can report it.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// The results file is missing or malformed.
    #[error(transparent)]
    Results(#[from] ResultsError),

    /// A review-platform request failed.
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// A local directory operation failed.
    #[error("Failed to {action} '{}': {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl AppError {
    /// Stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(e) => e.code(),
            AppError::Runner(_) => CODE_RUNNER_FAILED,
            AppError::Results(_) => CODE_RESULTS_UNREADABLE,
            AppError::Platform(_) => CODE_PLATFORM_REQUEST_FAILED,
            AppError::Io { .. } => CODE_IO_ERROR,
        }
    }

    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        AppError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

struct Progress {
    stage: Stage,
}

impl Progress {
    fn advance(&mut self, to: Stage) {
        tracing::debug!(from = ?self.stage, to = ?to, "pipeline stage");
        self.stage = to;
    }
}

/// Run the whole pipeline once.
///
/// On error the run is marked failed and the error is returned; nothing after
/// the failing step is attempted.
pub async fn run_pipeline<R, P, C>(
    request: &RunRequest,
    runner: &R,
    platform: &P,
    clock: &C,
) -> Result<RunOutcome, AppError>
where
    R: TestRunner + ?Sized,
    P: ReviewPlatform + ?Sized,
    C: Clock + ?Sized,
{
    let mut progress = Progress {
        stage: Stage::Start,
    };
    match drive(request, runner, platform, clock, &mut progress).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            tracing::error!(
                stage = ?progress.stage,
                code = err.code(),
                error = %err,
                "run failed"
            );
            progress.advance(Stage::Failed);
            Err(err)
        }
    }
}

async fn drive<R, P, C>(
    request: &RunRequest,
    runner: &R,
    platform: &P,
    clock: &C,
    progress: &mut Progress,
) -> Result<RunOutcome, AppError>
where
    R: TestRunner + ?Sized,
    P: ReviewPlatform + ?Sized,
    C: Clock + ?Sized,
{
    let config = &request.config;
    let working_dir = config.working_directory.as_path();
    let results_path = config.results_path();
    let structured = config.output_format.is_structured();

    if structured {
        prepare_results_file(&results_path)?;
    }
    let command = build_command(config, request.base_ref.as_deref(), &results_path);
    progress.advance(Stage::CommandBuilt);

    let run_output = match runner.run(&command, working_dir).await {
        Ok(output) => {
            tracing::info!(exit_code = ?output.exit_code, "test command exited");
            Some(output)
        }
        Err(err) if structured => {
            tracing::error!(error = %err, "test command could not be launched");
            None
        }
        Err(err) => return Err(err.into()),
    };
    progress.advance(Stage::ProcessExecuted);

    let artifacts = if config.save_coverage {
        save_coverage_artifacts(working_dir, &config.artifacts_dir)?
    } else {
        None
    };

    let mut outcome = RunOutcome {
        stage: progress.stage,
        command,
        run_output,
        payload: None,
        coverage: CoverageTable::NotCollected,
        comments: None,
        artifacts,
        exit_code: EXIT_PASSED,
    };

    if !structured {
        tracing::info!(
            format = %config.output_format,
            "output format is not structured; skipping publication"
        );
        let passed = outcome.run_output.as_ref().is_some_and(RunOutput::succeeded);
        outcome.exit_code = if passed { EXIT_PASSED } else { EXIT_TESTS_FAILED };
        progress.advance(Stage::Done);
        outcome.stage = progress.stage;
        return Ok(outcome);
    }

    let results = load_results(&results_path)?;
    progress.advance(Stage::ResultsParsed);
    tracing::info!(
        success = results.success,
        passed = results.num_passed_tests,
        failed = results.num_failed_tests,
        total = results.num_total_tests,
        "parsed test results"
    );

    let payload = publish_check_run(request, &results, platform, clock).await?;
    progress.advance(Stage::ChecksPublished);

    if config.coverage_comment {
        outcome.coverage = render_coverage_table(&results, working_dir);
        match (&outcome.coverage, request.pull_request) {
            (CoverageTable::NoEntries, _) => {
                tracing::error!(
                    code = jestcheck_types::CODE_COVERAGE_NO_ENTRIES,
                    "coverage map has no entries; skipping coverage comment"
                );
            }
            (CoverageTable::NotCollected, _) => {
                tracing::info!("no coverage collected; skipping coverage comment");
            }
            (CoverageTable::Rendered(_), None) => {
                tracing::info!("not a pull request; skipping coverage comment");
            }
            (CoverageTable::Rendered(body), Some(pull_request)) => {
                let summary = reconcile_comments(
                    platform,
                    pull_request,
                    &config.bot_login,
                    Some(body.as_str()),
                )
                .await?;
                outcome.comments = Some(summary);
                progress.advance(Stage::CommentsReconciled);
            }
        }
    }

    outcome.exit_code = if results.success {
        EXIT_PASSED
    } else {
        EXIT_TESTS_FAILED
    };
    outcome.payload = Some(payload);
    progress.advance(Stage::Done);
    outcome.stage = progress.stage;
    Ok(outcome)
}

/// Create the results directory and drop a stale results file, so a runner
/// that fails to start cannot leave an old run's results to be published.
fn prepare_results_file(results_path: &Path) -> Result<(), AppError> {
    if let Some(parent) = results_path.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::io("create directory", parent, e))?;
    }
    match fs::remove_file(results_path) {
        Ok(()) => {
            tracing::debug!(path = %results_path.display(), "removed stale results file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::io("remove stale results", results_path, e)),
    }
}

async fn publish_check_run<P, C>(
    request: &RunRequest,
    results: &StructuredResults,
    platform: &P,
    clock: &C,
) -> Result<CheckPayload, AppError>
where
    P: ReviewPlatform + ?Sized,
    C: Clock + ?Sized,
{
    let completed_at = clock
        .now()
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let payload = build_check_payload(
        results,
        &CheckTarget {
            name: &request.config.check_name,
            head_sha: &request.head_sha,
            working_dir: &request.config.working_directory,
            completed_at: Some(completed_at),
        },
    );
    platform.create_check_run(&payload).await?;
    Ok(payload)
}

// ============================================================================
// Comment Reconciliation
// ============================================================================

/// What [`reconcile_comments`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileSummary {
    /// Prior coverage comments removed.
    pub deleted: usize,
    /// Prior coverage comments whose deletion failed.
    pub delete_failures: usize,
    /// Whether a new comment was posted.
    pub posted: bool,
}

/// Replace the bot's previous coverage comments with `body`.
///
/// Prior comments are deleted concurrently and all deletions settle before
/// the new comment is created. Failed deletions are logged and counted, not
/// returned. With `body == None` the old comments are only removed.
pub async fn reconcile_comments<P>(
    platform: &P,
    pull_request: u64,
    bot_login: &str,
    body: Option<&str>,
) -> Result<ReconcileSummary, PlatformError>
where
    P: ReviewPlatform + ?Sized,
{
    let stale: Vec<u64> = platform
        .list_comments(pull_request)
        .await?
        .into_iter()
        .filter(|comment| comment.is_coverage_comment_by(bot_login))
        .map(|comment| comment.id)
        .collect();

    let results = join_all(stale.iter().map(|&id| async move {
        (id, platform.delete_comment(id).await)
    }))
    .await;

    let mut summary = ReconcileSummary::default();
    for (id, result) in results {
        match result {
            Ok(()) => summary.deleted += 1,
            Err(err) => {
                tracing::warn!(comment_id = id, error = %err, "failed to delete old coverage comment");
                summary.delete_failures += 1;
            }
        }
    }

    if let Some(body) = body {
        platform.create_comment(pull_request, body).await?;
        summary.posted = true;
    }

    tracing::info!(
        pull_request,
        deleted = summary.deleted,
        delete_failures = summary.delete_failures,
        posted = summary.posted,
        "reconciled coverage comments"
    );
    Ok(summary)
}

// ============================================================================
// Coverage Artifacts
// ============================================================================

/// Copy `<working_dir>/coverage` to `<artifacts_dir>/coverage`.
///
/// Returns the destination, or `None` when the runner wrote no coverage
/// directory.
pub fn save_coverage_artifacts(
    working_dir: &Path,
    artifacts_dir: &Path,
) -> Result<Option<PathBuf>, AppError> {
    let source = working_dir.join(COVERAGE_DIR);
    if !source.is_dir() {
        tracing::warn!(path = %source.display(), "no coverage directory to save");
        return Ok(None);
    }

    let destination = artifacts_dir.join(COVERAGE_DIR);
    let source_key =
        fs::canonicalize(&source).map_err(|e| AppError::io("resolve", &source, e))?;
    let destination_key =
        resolve_path(&destination).map_err(|e| AppError::io("resolve", &destination, e))?;
    if destination_key == source_key {
        tracing::info!(path = %source.display(), "coverage already in the artifacts directory");
        return Ok(Some(destination));
    }
    if destination_key.starts_with(&source_key) {
        return Err(ConfigError::InvalidValue(format!(
            "artifacts directory '{}' must not be inside the coverage directory '{}'",
            artifacts_dir.display(),
            source.display()
        ))
        .into());
    }

    copy_dir(&source, &destination)?;
    tracing::info!(
        from = %source.display(),
        to = %destination.display(),
        "saved coverage artifacts"
    );
    Ok(Some(destination))
}

/// Resolve symlinks in the longest existing prefix of `path`; the rest is
/// normalized lexically.
fn resolve_path(path: &Path) -> io::Result<PathBuf> {
    let absolute = normalize_path(&std::path::absolute(path)?);
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = fs::canonicalize(existing)?;
    resolved.extend(missing.iter().rev().copied());
    Ok(resolved)
}

fn copy_dir(source: &Path, destination: &Path) -> Result<(), AppError> {
    fs::create_dir_all(destination)
        .map_err(|e| AppError::io("create directory", destination, e))?;

    let entries = fs::read_dir(source).map_err(|e| AppError::io("read directory", source, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| AppError::io("read directory", source, e))?;
        let from = entry.path();
        let to = destination.join(entry.file_name());
        if from.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| AppError::io("copy", &from, e))?;
        }
    }
    Ok(())
}

// ============================================================================
// Recording Platform
// ============================================================================

/// In-memory [`ReviewPlatform`] that records every call.
///
/// Used for dry runs and as the platform fake in tests. Comments it creates
/// are authored by the login it was built with.
#[derive(Debug)]
pub struct RecordingPlatform {
    login: String,
    state: Mutex<RecordedCalls>,
}

#[derive(Debug, Default)]
struct RecordedCalls {
    check_runs: Vec<CheckPayload>,
    comments: Vec<Comment>,
    deleted: Vec<u64>,
    failing_deletes: BTreeSet<u64>,
    next_id: u64,
}

impl RecordingPlatform {
    /// Empty platform whose comments are authored by `login`.
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            state: Mutex::new(RecordedCalls {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Seed existing pull-request comments.
    pub fn with_comments(self, comments: Vec<Comment>) -> Self {
        {
            let mut state = self.lock();
            state.next_id = comments
                .iter()
                .map(|c| c.id + 1)
                .max()
                .unwrap_or(1)
                .max(state.next_id);
            state.comments = comments;
        }
        self
    }

    /// Make deleting comment `id` fail.
    pub fn fail_delete(self, id: u64) -> Self {
        self.lock().failing_deletes.insert(id);
        self
    }

    /// Check runs created so far.
    pub fn check_runs(&self) -> Vec<CheckPayload> {
        self.lock().check_runs.clone()
    }

    /// Comments currently on the pull request.
    pub fn comments(&self) -> Vec<Comment> {
        self.lock().comments.clone()
    }

    /// Identifiers of deleted comments, in deletion order.
    pub fn deleted(&self) -> Vec<u64> {
        self.lock().deleted.clone()
    }

    fn lock(&self) -> MutexGuard<'_, RecordedCalls> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ReviewPlatform for RecordingPlatform {
    async fn create_check_run(&self, payload: &CheckPayload) -> Result<(), PlatformError> {
        self.lock().check_runs.push(payload.clone());
        Ok(())
    }

    async fn list_comments(&self, _pull_request: u64) -> Result<Vec<Comment>, PlatformError> {
        Ok(self.comments())
    }

    async fn delete_comment(&self, comment_id: u64) -> Result<(), PlatformError> {
        let mut state = self.lock();
        let endpoint = format!("DELETE /issues/comments/{comment_id}");
        if state.failing_deletes.contains(&comment_id) {
            return Err(PlatformError::Status {
                endpoint,
                status: 500,
                message: "simulated failure".to_string(),
            });
        }
        let before = state.comments.len();
        state.comments.retain(|c| c.id != comment_id);
        if state.comments.len() == before {
            return Err(PlatformError::Status {
                endpoint,
                status: 404,
                message: "Not Found".to_string(),
            });
        }
        state.deleted.push(comment_id);
        Ok(())
    }

    async fn create_comment(&self, _pull_request: u64, body: &str) -> Result<(), PlatformError> {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.comments.push(Comment {
            id,
            body: body.to_string(),
            user: Some(CommentAuthor {
                login: self.login.clone(),
            }),
        });
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
