//! Rendering utilities for jestcheck.
//!
//! This crate turns pipeline data into text:
//! - the Markdown coverage table posted as a pull-request comment
//! - GitHub workflow annotation commands for failed assertions
//!
//! # Example
//!
//! ```rust
//! use jestcheck_render::{CoverageTable, render_coverage_table};
//! use jestcheck_types::StructuredResults;
//! use std::path::Path;
//!
//! let results: StructuredResults = serde_json::from_str(r#"{"success": true}"#).unwrap();
//! assert_eq!(
//!     render_coverage_table(&results, Path::new("/repo")),
//!     CoverageTable::NotCollected
//! );
//! ```

use std::path::Path;

use jestcheck_domain::{relative_path, summarize_coverage};
use jestcheck_types::{AnnotationLevel, COVERAGE_HEADER, CheckPayload, StructuredResults};

/// Default maximum number of workflow annotations to emit.
pub const DEFAULT_MAX_ANNOTATIONS: usize = 50;

const COVERAGE_COLUMNS: [&str; 5] = ["Filename", "Statements", "Branches", "Functions", "Lines"];

// ============================================================================
// Coverage Table
// ============================================================================

/// Result of rendering the coverage comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverageTable {
    /// The run collected no coverage; nothing is posted.
    NotCollected,
    /// A coverage map was present but listed no files.
    NoEntries,
    /// Comment body: [`COVERAGE_HEADER`] followed by the table.
    Rendered(String),
}

impl CoverageTable {
    /// The comment body, when there is one to post.
    pub fn body(&self) -> Option<&str> {
        match self {
            CoverageTable::Rendered(body) => Some(body),
            _ => None,
        }
    }
}

/// Render the per-file coverage comment for a run.
///
/// Rows follow the coverage map's path order, with the working directory
/// stripped from each path.
pub fn render_coverage_table(results: &StructuredResults, working_dir: &Path) -> CoverageTable {
    let Some(map) = &results.coverage_map else {
        return CoverageTable::NotCollected;
    };
    if map.is_empty() {
        return CoverageTable::NoEntries;
    }

    let rows: Vec<Vec<String>> = map
        .iter()
        .map(|(path, coverage)| {
            let summary = summarize_coverage(coverage);
            vec![
                relative_path(path, working_dir),
                percent(summary.statements.pct),
                percent(summary.branches.pct),
                percent(summary.functions.pct),
                percent(summary.lines.pct),
            ]
        })
        .collect();

    let mut body = String::from(COVERAGE_HEADER);
    body.push_str(&markdown_table(
        &COVERAGE_COLUMNS,
        &[Align::Left, Align::Right, Align::Right, Align::Right, Align::Right],
        &rows,
    ));
    CoverageTable::Rendered(body)
}

fn percent(pct: f64) -> String {
    format!("{pct}%")
}

/// Column alignment in a Markdown table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

impl Align {
    fn delimiter(self) -> &'static str {
        match self {
            Align::Left => ":---",
            Align::Right => "---:",
        }
    }
}

/// Render a GitHub-flavored Markdown table without cell padding.
///
/// Pipes inside cells are escaped.
pub fn markdown_table(headers: &[&str], aligns: &[Align], rows: &[Vec<String>]) -> String {
    let mut output = String::new();

    output.push_str(&table_row(headers.iter().copied()));
    output.push_str(&table_row(
        (0..headers.len()).map(|i| aligns.get(i).copied().unwrap_or(Align::Left).delimiter()),
    ));
    for row in rows {
        output.push_str(&table_row(row.iter().map(String::as_str)));
    }

    output
}

fn table_row<'a>(cells: impl Iterator<Item = &'a str>) -> String {
    let cells: Vec<String> = cells.map(|cell| cell.replace('|', "\\|")).collect();
    format!("| {} |\n", cells.join(" | "))
}

// ============================================================================
// Workflow Annotations
// ============================================================================

/// Renders check-run annotations as GitHub workflow commands.
///
/// # Arguments
///
/// * `payload` - The check-run payload whose annotations are printed.
/// * `max_annotations` - Maximum number of commands to emit.
///
/// # Example Output
///
/// ```text
/// ::error file=src/sum.test.js,line=7,title=sum > adds::Expected: 3%0AReceived: 4
/// ```
pub fn render_workflow_annotations(payload: &CheckPayload, max_annotations: usize) -> String {
    let mut output = String::new();

    for annotation in payload.output.annotations.iter().take(max_annotations) {
        let level = match annotation.annotation_level {
            AnnotationLevel::Failure => "error",
            AnnotationLevel::Warning => "warning",
            AnnotationLevel::Notice => "notice",
        };

        let mut params = vec![format!("file={}", escape_property(&annotation.path))];
        if annotation.start_line > 0 {
            params.push(format!("line={}", annotation.start_line));
        }
        if !annotation.title.is_empty() {
            params.push(format!("title={}", escape_property(&annotation.title)));
        }

        output.push_str(&format!(
            "::{} {}::{}\n",
            level,
            params.join(","),
            escape_data(&annotation.message)
        ));
    }

    output
}

/// Escape the message part of a workflow command.
pub fn escape_data(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Escape a `key=value` property of a workflow command.
pub fn escape_property(value: &str) -> String {
    escape_data(value).replace(':', "%3A").replace(',', "%2C")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use jestcheck_types::{
        Annotation, CheckConclusion, CheckOutput, CheckStatus, CoverageMetric, CoverageSummary,
        FileCoverage,
    };
    use std::collections::BTreeMap;

    fn results_with_coverage(coverage_map: Option<BTreeMap<String, FileCoverage>>) -> StructuredResults {
        StructuredResults {
            success: true,
            num_passed_tests: 1,
            num_failed_tests: 0,
            num_pending_tests: 0,
            num_total_tests: 1,
            num_passed_test_suites: 1,
            num_failed_test_suites: 0,
            num_total_test_suites: 1,
            test_results: Vec::new(),
            coverage_map,
        }
    }

    fn summary(statements: f64, branches: f64, functions: f64, lines: f64) -> FileCoverage {
        let metric = |pct| CoverageMetric {
            total: 0,
            covered: 0,
            pct,
        };
        FileCoverage::Summary(CoverageSummary {
            statements: metric(statements),
            branches: metric(branches),
            functions: metric(functions),
            lines: metric(lines),
        })
    }

    // ========================================================================
    // Coverage table
    // ========================================================================

    #[test]
    fn test_no_coverage_map_is_not_collected() {
        let results = results_with_coverage(None);
        assert_eq!(
            render_coverage_table(&results, Path::new("/repo")),
            CoverageTable::NotCollected
        );
    }

    #[test]
    fn test_empty_coverage_map_is_no_entries() {
        let results = results_with_coverage(Some(BTreeMap::new()));
        let table = render_coverage_table(&results, Path::new("/repo"));
        assert_eq!(table, CoverageTable::NoEntries);
        assert!(table.body().is_none());
    }

    #[test]
    fn test_single_file_table() {
        let results = results_with_coverage(Some(BTreeMap::from([(
            "/repo/src/a.js".to_string(),
            summary(80.0, 70.0, 90.0, 85.0),
        )])));

        let table = render_coverage_table(&results, Path::new("/repo"));
        let body = table.body().expect("table should render");

        assert!(body.starts_with(COVERAGE_HEADER));
        let lines: Vec<&str> = body[COVERAGE_HEADER.len()..].lines().collect();
        assert_eq!(
            lines,
            vec![
                "| Filename | Statements | Branches | Functions | Lines |",
                "| :--- | ---: | ---: | ---: | ---: |",
                "| src/a.js | 80% | 70% | 90% | 85% |",
            ]
        );
    }

    #[test]
    fn test_rows_sorted_by_path_with_fractional_percentages() {
        let results = results_with_coverage(Some(BTreeMap::from([
            ("/repo/src/z.js".to_string(), summary(100.0, 100.0, 100.0, 100.0)),
            ("/repo/lib/b.js".to_string(), summary(66.66, 50.0, 33.33, 66.66)),
        ])));

        let table = render_coverage_table(&results, Path::new("/repo"));
        let rows: Vec<&str> = table
            .body()
            .expect("table should render")
            .lines()
            .filter(|line| line.starts_with("| ") && line.contains(".js"))
            .collect();

        assert_eq!(
            rows,
            vec![
                "| lib/b.js | 66.66% | 50% | 33.33% | 66.66% |",
                "| src/z.js | 100% | 100% | 100% | 100% |",
            ]
        );
    }

    #[test]
    fn test_raw_istanbul_coverage_is_summarized() {
        let json = r#"{
            "/repo/src/a.js": {
                "path": "/repo/src/a.js",
                "statementMap": {
                    "0": {"start": {"line": 1, "column": 0}, "end": {"line": 1, "column": 9}},
                    "1": {"start": {"line": 2, "column": 0}, "end": {"line": 2, "column": 9}}
                },
                "s": {"0": 1, "1": 0},
                "f": {"0": 1},
                "b": {}
            }
        }"#;
        let map: BTreeMap<String, FileCoverage> = serde_json::from_str(json).unwrap();
        let results = results_with_coverage(Some(map));

        let table = render_coverage_table(&results, Path::new("/repo"));
        assert!(
            table
                .body()
                .expect("table should render")
                .contains("| src/a.js | 50% | 100% | 100% | 50% |")
        );
    }

    #[test]
    fn test_markdown_table_escapes_pipes() {
        let table = markdown_table(
            &["A", "B"],
            &[Align::Left, Align::Right],
            &[vec!["x|y".to_string(), "1".to_string()]],
        );
        assert_eq!(table, "| A | B |\n| :--- | ---: |\n| x\\|y | 1 |\n");
    }

    // ========================================================================
    // Workflow annotations
    // ========================================================================

    fn payload(annotations: Vec<Annotation>) -> CheckPayload {
        CheckPayload {
            name: "Tests".to_string(),
            head_sha: "abc".to_string(),
            status: CheckStatus::Completed,
            conclusion: CheckConclusion::Failure,
            completed_at: None,
            output: CheckOutput {
                title: "Jest tests failed".to_string(),
                summary: String::new(),
                text: None,
                annotations,
            },
        }
    }

    fn annotation(line: u32, title: &str, message: &str) -> Annotation {
        Annotation {
            path: "src/sum.test.js".to_string(),
            start_line: line,
            end_line: line,
            annotation_level: AnnotationLevel::Failure,
            title: title.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_render_workflow_annotations() {
        let out = render_workflow_annotations(
            &payload(vec![annotation(7, "sum > adds", "Expected: 3\n\nReceived: 4")]),
            DEFAULT_MAX_ANNOTATIONS,
        );
        assert_eq!(
            out,
            "::error file=src/sum.test.js,line=7,title=sum > adds::Expected: 3%0A%0AReceived: 4\n"
        );
    }

    #[test]
    fn test_annotation_without_line_omits_line() {
        let out = render_workflow_annotations(&payload(vec![annotation(0, "t", "m")]), 10);
        assert_eq!(out, "::error file=src/sum.test.js,title=t::m\n");
    }

    #[test]
    fn test_annotations_respect_max() {
        let annotations = (1..=5).map(|i| annotation(i, "t", "m")).collect();
        let out = render_workflow_annotations(&payload(annotations), 2);
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn test_escape_property() {
        assert_eq!(escape_property("a: b, c"), "a%3A b%2C c");
        assert_eq!(escape_data("100%\r\n"), "100%25%0D%0A");
    }
}
