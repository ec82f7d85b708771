//! Core types and DTOs for jestcheck.
//!
//! This crate defines the data transfer objects passed between the pipeline
//! stages: the structured test results written by the test runner, the
//! check-run payload published to the review platform, pull-request comments,
//! and the registry of error codes.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Constants
// ============================================================================

/// Sentinel that starts every coverage comment posted by jestcheck.
///
/// Later runs use it to recognize (and delete) their own prior comments.
pub const COVERAGE_HEADER: &str = ":loop: **Code coverage**\n\n";

/// Test command used when no override is configured.
pub const DEFAULT_TEST_COMMAND: &str = "npm test";

/// Login of the bot identity whose comments are reconciled.
pub const DEFAULT_BOT_LOGIN: &str = "github-actions[bot]";

/// Results file location, relative to the working directory.
pub const RESULTS_FILE: &str = "coverage/coverage-final.json";

/// Directory the test runner writes coverage reports into, relative to the
/// working directory.
pub const COVERAGE_DIR: &str = "coverage";

// ============================================================================
// Error Codes
// ============================================================================

/// Error code for a missing platform token.
pub const CODE_MISSING_TOKEN: &str = "jestcheck.config.missing_token";

/// Error code for an unrecognized output format.
pub const CODE_UNKNOWN_OUTPUT_FORMAT: &str = "jestcheck.config.unknown_output_format";

/// Error code for any other invalid configuration.
pub const CODE_INVALID_CONFIG: &str = "jestcheck.config.invalid";

/// Error code for a test command that could not be launched.
pub const CODE_RUNNER_FAILED: &str = "jestcheck.runner.launch_failed";

/// Error code for a local file-system failure (results or artifact directories).
pub const CODE_IO_ERROR: &str = "jestcheck.runtime.io";

/// Error code for a results file that could not be read or parsed.
pub const CODE_RESULTS_UNREADABLE: &str = "jestcheck.results.unreadable";

/// Error code for a failed review-platform request.
pub const CODE_PLATFORM_REQUEST_FAILED: &str = "jestcheck.platform.request_failed";

/// Error code for a run whose tests failed.
pub const CODE_TESTS_FAILED: &str = "jestcheck.tests.failed";

/// Error code for a coverage map that contained no files.
pub const CODE_COVERAGE_NO_ENTRIES: &str = "jestcheck.coverage.no_entries";

/// Metadata for a jestcheck error code.
#[derive(Debug, Clone, Copy)]
pub struct CodeInfo {
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub remediation: &'static str,
}

/// Registry of all jestcheck codes.
pub const CODE_REGISTRY: &[CodeInfo] = &[
    CodeInfo {
        code: CODE_MISSING_TOKEN,
        name: "MissingToken",
        description: "No authentication token for the review platform was provided.",
        remediation: "Set GITHUB_TOKEN (or pass --token), or use --dry-run to skip publishing.",
    },
    CodeInfo {
        code: CODE_UNKNOWN_OUTPUT_FORMAT,
        name: "UnknownOutputFormat",
        description: "The configured output format is not one of json, lcov, clover or text.",
        remediation: "Set output_format / --output-format to a supported value.",
    },
    CodeInfo {
        code: CODE_INVALID_CONFIG,
        name: "InvalidConfig",
        description: "The configuration file or a required option is invalid.",
        remediation: "Fix the reported key in jestcheck.toml or provide the missing option.",
    },
    CodeInfo {
        code: CODE_RUNNER_FAILED,
        name: "RunnerFailed",
        description: "The test command could not be launched and no results file is read in this output format.",
        remediation: "Check that the shell and the test command exist in the working directory.",
    },
    CodeInfo {
        code: CODE_IO_ERROR,
        name: "IoError",
        description: "A local directory needed for results or artifacts could not be created or copied.",
        remediation: "Check permissions of the working directory and the artifacts directory.",
    },
    CodeInfo {
        code: CODE_RESULTS_UNREADABLE,
        name: "ResultsUnreadable",
        description: "The results file written by the test runner is missing or is not valid JSON.",
        remediation: "Check the test command output; the runner must support --json --outputFile.",
    },
    CodeInfo {
        code: CODE_PLATFORM_REQUEST_FAILED,
        name: "PlatformRequestFailed",
        description: "A request to the review platform failed.",
        remediation: "Verify the token permissions (checks: write, pull-requests: write) and the repository name.",
    },
    CodeInfo {
        code: CODE_TESTS_FAILED,
        name: "TestsFailed",
        description: "One or more tests failed.",
        remediation: "Inspect the check-run annotations for the failing assertions.",
    },
    CodeInfo {
        code: CODE_COVERAGE_NO_ENTRIES,
        name: "CoverageNoEntries",
        description: "Coverage was collected but the coverage map contained no files.",
        remediation: "Check collectCoverageFrom / coverage path ignore settings of the test runner.",
    },
];

/// Lookup code metadata by code string.
pub fn explain(code: &str) -> Option<&'static CodeInfo> {
    CODE_REGISTRY.iter().find(|info| info.code == code)
}

// ============================================================================
// Structured Results
// ============================================================================

/// Outcome of a single assertion (test case).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssertionStatus {
    Passed,
    Failed,
    Skipped,
    Pending,
    Todo,
    Disabled,
    Focused,
    /// Any status this version does not know about.
    #[serde(other)]
    Unknown,
}

impl AssertionStatus {
    /// Whether this outcome counts as a failure.
    pub fn is_failed(self) -> bool {
        self == AssertionStatus::Failed
    }
}

/// Source position reported for an assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionLocation {
    pub line: u32,
    #[serde(default)]
    pub column: Option<u32>,
}

/// A single assertion outcome inside a test file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub status: AssertionStatus,
    pub title: String,
    #[serde(default)]
    pub ancestor_titles: Vec<String>,
    #[serde(default)]
    pub full_name: String,
    /// Present when the runner was asked for locations in results.
    #[serde(default)]
    pub location: Option<AssertionLocation>,
    #[serde(default)]
    pub failure_messages: Vec<String>,
}

/// Results for one test file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFileResult {
    /// Absolute path of the test file.
    pub name: String,
    #[serde(default)]
    pub status: String,
    /// Aggregated failure output for the file (may contain ANSI sequences).
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub assertion_results: Vec<AssertionResult>,
}

/// One coverage metric (statements, branches, functions or lines).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageMetric {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub covered: u64,
    #[serde(deserialize_with = "deserialize_pct")]
    pub pct: f64,
}

impl CoverageMetric {
    /// Build a metric from raw counts using Istanbul's rounding.
    ///
    /// The percentage is truncated (not rounded) to two decimals and is
    /// `100` when there is nothing to cover.
    pub fn from_counts(covered: u64, total: u64) -> Self {
        let pct = if total > 0 {
            let scaled = (100_000.0 * covered as f64) / total as f64;
            (scaled / 10.0).floor() / 100.0
        } else {
            100.0
        };
        Self {
            total,
            covered,
            pct,
        }
    }
}

/// Runners print `"Unknown"` instead of a number for empty metrics.
fn deserialize_pct<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(100.0),
        serde_json::Value::String(s) => s.parse().unwrap_or(100.0),
        _ => 100.0,
    })
}

/// Per-file percentage summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub statements: CoverageMetric,
    pub branches: CoverageMetric,
    pub functions: CoverageMetric,
    pub lines: CoverageMetric,
}

/// Start or end of a source range in Istanbul coverage data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: u32,
    #[serde(default)]
    pub column: Option<u32>,
}

/// Source range of an Istanbul statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: SourcePosition,
    pub end: SourcePosition,
}

/// Raw Istanbul counters for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IstanbulFileCoverage {
    #[serde(default)]
    pub path: String,
    #[serde(rename = "statementMap")]
    pub statement_map: BTreeMap<String, SourceRange>,
    /// Statement hit counts keyed by statement id.
    pub s: BTreeMap<String, u64>,
    /// Function hit counts keyed by function id.
    pub f: BTreeMap<String, u64>,
    /// Branch hit counts keyed by branch id, one entry per branch arm.
    pub b: BTreeMap<String, Vec<u64>>,
}

/// Coverage for one file, either summarized or as raw counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileCoverage {
    Summary(CoverageSummary),
    Istanbul(IstanbulFileCoverage),
}

/// Coverage map keyed by file path, iterated in path order.
pub type CoverageMap = BTreeMap<String, FileCoverage>;

/// Structured results written by the test runner (`--json --outputFile`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredResults {
    pub success: bool,
    #[serde(default)]
    pub num_passed_tests: u32,
    #[serde(default)]
    pub num_failed_tests: u32,
    #[serde(default)]
    pub num_pending_tests: u32,
    #[serde(default)]
    pub num_total_tests: u32,
    #[serde(default)]
    pub num_passed_test_suites: u32,
    #[serde(default)]
    pub num_failed_test_suites: u32,
    #[serde(default)]
    pub num_total_test_suites: u32,
    #[serde(default)]
    pub test_results: Vec<TestFileResult>,
    #[serde(default)]
    pub coverage_map: Option<CoverageMap>,
}

impl StructuredResults {
    /// Iterate every failed assertion together with the file it belongs to.
    pub fn failed_assertions(&self) -> impl Iterator<Item = (&TestFileResult, &AssertionResult)> {
        self.test_results.iter().flat_map(|file| {
            file.assertion_results
                .iter()
                .filter(|assertion| assertion.status.is_failed())
                .map(move |assertion| (file, assertion))
        })
    }
}

// ============================================================================
// Check Run Payload
// ============================================================================

/// Status of a check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

/// Conclusion of a completed check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
}

/// Severity of a check-run annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationLevel {
    Notice,
    Warning,
    Failure,
}

/// A file-and-line scoped message attached to a check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Path relative to the working directory.
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub annotation_level: AnnotationLevel,
    pub title: String,
    pub message: String,
}

/// Output block of a check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutput {
    pub title: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// Check-run creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckPayload {
    pub name: String,
    pub head_sha: String,
    pub status: CheckStatus,
    pub conclusion: CheckConclusion,
    /// RFC 3339 completion timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub output: CheckOutput,
}

// ============================================================================
// Comments
// ============================================================================

/// Author of a pull-request comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentAuthor {
    pub login: String,
}

/// A pull-request comment as listed by the review platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    #[serde(default)]
    pub body: String,
    /// `None` for comments of deleted accounts.
    #[serde(default)]
    pub user: Option<CommentAuthor>,
}

impl Comment {
    /// Whether this is a coverage comment previously posted by `bot_login`.
    pub fn is_coverage_comment_by(&self, bot_login: &str) -> bool {
        self.user
            .as_ref()
            .is_some_and(|user| user.login == bot_login)
            && self.body.starts_with(COVERAGE_HEADER)
    }
}

// ============================================================================
// Tests
// ============================================================================
