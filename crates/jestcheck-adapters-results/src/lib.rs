//! Reader for the structured results file written by the test runner.
//!
//! The file is taken as-is: it must exist and be valid JSON in the runner's
//! `--json` shape, but no semantic checks are made on the counts.

use std::path::{Path, PathBuf};

use jestcheck_types::StructuredResults;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while loading structured results.
#[derive(Debug, Error)]
pub enum ResultsError {
    /// The file is missing or unreadable.
    #[error("Failed to read test results '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid results JSON.
    #[error("Failed to parse test results '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ResultsError {
    /// Path of the offending file.
    pub fn path(&self) -> &Path {
        match self {
            ResultsError::Read { path, .. } | ResultsError::Parse { path, .. } => path,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Parse structured results from JSON text.
pub fn parse_results(text: &str) -> Result<StructuredResults, serde_json::Error> {
    serde_json::from_str(text)
}

/// Read and parse the results file at `path`.
pub fn load_results(path: &Path) -> Result<StructuredResults, ResultsError> {
    let text = std::fs::read_to_string(path).map_err(|source| ResultsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let results = parse_results(&text).map_err(|source| ResultsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(
        path = %path.display(),
        files = results.test_results.len(),
        success = results.success,
        "loaded test results"
    );
    Ok(results)
}

// ============================================================================
// Tests
// ============================================================================
