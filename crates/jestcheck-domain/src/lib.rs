//! Pure domain logic for jestcheck.
//!
//! This crate implements the side-effect free stages of the pipeline:
//! assembling the test-runner command line, mapping structured results to a
//! check-run payload, and reducing per-file coverage to percentages.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use jestcheck_config::EffectiveConfig;
use jestcheck_types::{
    Annotation, AnnotationLevel, AssertionResult, CheckConclusion, CheckOutput, CheckPayload,
    CheckStatus, CoverageMetric, CoverageSummary, FileCoverage, IstanbulFileCoverage,
    StructuredResults,
};
use regex::Regex;

/// Commands whose extra arguments must follow a `--` separator to reach the
/// test runner instead of the package manager.
pub const PACKAGE_MANAGERS: &[&str] = &["npm", "npx", "pnpm", "pnpx", "yarn"];

/// Maximum length GitHub accepts for check-run text fields.
pub const MAX_TEXT_LEN: usize = 65_535;

/// Check-run title for a passing run.
pub const TITLE_PASSED: &str = "Jest tests passed";

/// Check-run title for a failing run.
pub const TITLE_FAILED: &str = "Jest tests failed";

const TRUNCATION_MARKER: &str = "\n… (truncated)";

// ============================================================================
// Command Builder
// ============================================================================

/// Whether `command` starts with a package-manager invocation.
pub fn uses_package_manager(command: &str) -> bool {
    command
        .split_whitespace()
        .next()
        .is_some_and(|first| PACKAGE_MANAGERS.contains(&first))
}

/// Assemble the shell command that runs the tests.
///
/// `base_ref` is the pull request's base branch, used for changed-files-only
/// runs. `results_path` is where structured results are written in JSON mode.
/// The result is not validated; bad combinations surface when the command runs.
pub fn build_command(
    config: &EffectiveConfig,
    base_ref: Option<&str>,
    results_path: &Path,
) -> String {
    let mut flags: Vec<String> = Vec::new();

    if config.output_format.is_structured() {
        flags.push("--testLocationInResults".to_string());
        flags.push("--json".to_string());
        flags.push(format!(
            "--outputFile={}",
            quote_arg(&results_path.display().to_string())
        ));
    } else {
        flags.push(format!("--coverageReporters={}", config.output_format));
    }

    if config.collects_coverage() {
        flags.push("--coverage".to_string());
    }

    if config.changes_only
        && let Some(base) = base_ref.map(str::trim).filter(|b| !b.is_empty())
    {
        flags.push(format!("--changedSince={}", quote_arg(base)));
    }

    let base = config.test_command.trim();
    let separator = if uses_package_manager(base) {
        " -- "
    } else {
        " "
    };
    format!("{base}{separator}{}", flags.join(" "))
}

/// Quote an argument for the shell when it contains whitespace.
fn quote_arg(arg: &str) -> String {
    if arg.chars().any(char::is_whitespace) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

// ============================================================================
// Text Helpers
// ============================================================================

static ANSI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[\x1B\x{9B}][\[\]()#;?]*(?:(?:(?:(?:;[-a-zA-Z\d/#&.:=?%@~_]+)*|[a-zA-Z\d]+(?:;[-a-zA-Z\d/#&.:=?%@~_]*)*)?\x07)|(?:(?:\d{1,4}(?:;\d{0,4})*)?[\dA-PR-TZcf-nq-uy=><~]))",
    )
    .expect("ANSI pattern is valid")
});

/// Remove ANSI escape sequences (colors, cursor movement, hyperlinks).
pub fn strip_ansi(text: &str) -> String {
    ANSI_PATTERN.replace_all(text, "").into_owned()
}

/// Make `path` relative to `working_dir` when it lies inside it.
///
/// Paths outside the working directory are returned unchanged.
pub fn relative_path(path: &str, working_dir: &Path) -> String {
    let prefix = working_dir.display().to_string();
    let prefix = prefix.trim_end_matches(['/', '\\']);
    if prefix.is_empty() || prefix == "." {
        return path.trim_start_matches("./").to_string();
    }
    match path.strip_prefix(prefix) {
        Some(rest) if rest.is_empty() => rest.to_string(),
        Some(rest) if rest.starts_with(['/', '\\']) => rest[1..].to_string(),
        _ => path.to_string(),
    }
}

/// Cut `text` to at most `max` bytes on a character boundary, marking the cut.
pub fn truncate_text(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max.saturating_sub(TRUNCATION_MARKER.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], TRUNCATION_MARKER)
}

// ============================================================================
// Check Payload Builder
// ============================================================================

/// Where the check run is attached and how it is named.
#[derive(Debug, Clone)]
pub struct CheckTarget<'a> {
    /// Display name of the check run.
    pub name: &'a str,
    /// Commit the check run belongs to.
    pub head_sha: &'a str,
    /// Prefix stripped from test file paths.
    pub working_dir: &'a Path,
    /// RFC 3339 completion timestamp.
    pub completed_at: Option<String>,
}

/// Map structured results to a check-run creation request.
///
/// Passing runs carry no annotations and no text. Failing runs get one
/// annotation per failed assertion and the per-file failure output as text.
pub fn build_check_payload(results: &StructuredResults, target: &CheckTarget<'_>) -> CheckPayload {
    let (conclusion, title, summary, text, annotations) = if results.success {
        (
            CheckConclusion::Success,
            TITLE_PASSED,
            passed_summary(results),
            None,
            Vec::new(),
        )
    } else {
        (
            CheckConclusion::Failure,
            TITLE_FAILED,
            failed_summary(results),
            Some(failure_text(results)),
            build_annotations(results, target.working_dir),
        )
    };

    CheckPayload {
        name: target.name.to_string(),
        head_sha: target.head_sha.to_string(),
        status: CheckStatus::Completed,
        conclusion,
        completed_at: target.completed_at.clone(),
        output: CheckOutput {
            title: title.to_string(),
            summary,
            text,
            annotations,
        },
    }
}

fn passed_summary(results: &StructuredResults) -> String {
    let suites = results.num_passed_test_suites;
    format!(
        "{} tests passing in {} suite{}.",
        results.num_passed_tests,
        suites,
        if suites == 1 { "" } else { "s" }
    )
}

fn failed_summary(results: &StructuredResults) -> String {
    format!(
        "Failed tests: {}/{}. Failed suites: {}/{}.",
        results.num_failed_tests,
        results.num_total_tests,
        results.num_failed_test_suites,
        results.num_total_test_suites
    )
}

fn failure_text(results: &StructuredResults) -> String {
    let messages: Vec<String> = results
        .test_results
        .iter()
        .filter(|file| !file.message.trim().is_empty())
        .map(|file| strip_ansi(&file.message))
        .collect();
    let body = truncate_text(messages.join("\n").trim_end(), MAX_TEXT_LEN - 8);
    format!("```\n{body}\n```")
}

/// One failure annotation per failed assertion, in result order.
pub fn build_annotations(results: &StructuredResults, working_dir: &Path) -> Vec<Annotation> {
    results
        .failed_assertions()
        .map(|(file, assertion)| {
            let line = assertion.location.map(|loc| loc.line).unwrap_or(0);
            Annotation {
                path: relative_path(&file.name, working_dir),
                start_line: line,
                end_line: line,
                annotation_level: AnnotationLevel::Failure,
                title: assertion_title(assertion),
                message: truncate_text(
                    &strip_ansi(&assertion.failure_messages.join("\n\n")),
                    MAX_TEXT_LEN,
                ),
            }
        })
        .collect()
}

/// `describe > nested describe > test` title of an assertion.
pub fn assertion_title(assertion: &AssertionResult) -> String {
    assertion
        .ancestor_titles
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(assertion.title.as_str()))
        .collect::<Vec<_>>()
        .join(" > ")
}

// ============================================================================
// Coverage Summaries
// ============================================================================

/// Percentages for one file's coverage.
pub fn summarize_coverage(coverage: &FileCoverage) -> CoverageSummary {
    match coverage {
        FileCoverage::Summary(summary) => *summary,
        FileCoverage::Istanbul(raw) => summarize_istanbul(raw),
    }
}

/// Reduce raw Istanbul counters the way Istanbul's own summary does.
fn summarize_istanbul(raw: &IstanbulFileCoverage) -> CoverageSummary {
    let statements = count_hits(raw.s.values().copied());
    let functions = count_hits(raw.f.values().copied());
    let branches = count_hits(raw.b.values().flatten().copied());

    // A line's hit count is the highest count of the statements starting on it.
    let mut lines: BTreeMap<u32, u64> = BTreeMap::new();
    for (id, range) in &raw.statement_map {
        let hits = raw.s.get(id).copied().unwrap_or(0);
        let entry = lines.entry(range.start.line).or_insert(hits);
        *entry = (*entry).max(hits);
    }
    let lines = count_hits(lines.into_values());

    CoverageSummary {
        statements,
        branches,
        functions,
        lines,
    }
}

fn count_hits(hits: impl Iterator<Item = u64>) -> CoverageMetric {
    let (covered, total) = hits.fold((0, 0), |(covered, total), h| {
        (covered + u64::from(h > 0), total + 1)
    });
    CoverageMetric::from_counts(covered, total)
}

// ============================================================================
// Tests
// ============================================================================
