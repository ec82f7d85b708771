//! Shared port traits and boundary DTOs for jestcheck's hexagonal architecture.

use async_trait::async_trait;
use jestcheck_types::{CheckPayload, Comment};
use std::path::Path;
use thiserror::Error;

/// Captured output of a finished test-runner process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    /// Whether the process exited with status 0.
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The test runner process could not be launched or awaited.
///
/// A non-zero exit status is not an error; it is reported in [`RunOutput`].
#[derive(Debug, Error)]
#[error("failed to run `{command}`: {source}")]
pub struct RunnerError {
    pub command: String,
    #[source]
    pub source: std::io::Error,
}

/// Port for executing the assembled test command.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Run `command` in `working_dir` and capture its output.
    async fn run(&self, command: &str, working_dir: &Path) -> Result<RunOutput, RunnerError>;
}

/// Errors reported by a review platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The request could not be sent or its response could not be read.
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    /// The platform answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

/// Port for the hosted code-review platform.
///
/// Exactly the four operations the pipeline needs.
#[async_trait]
pub trait ReviewPlatform: Send + Sync {
    /// Create a completed check run for the payload's commit.
    async fn create_check_run(&self, payload: &CheckPayload) -> Result<(), PlatformError>;

    /// List all comments on a pull request.
    async fn list_comments(&self, pull_request: u64) -> Result<Vec<Comment>, PlatformError>;

    /// Delete a comment by identifier.
    async fn delete_comment(&self, comment_id: u64) -> Result<(), PlatformError>;

    /// Create a comment with `body` on a pull request.
    async fn create_comment(&self, pull_request: u64, body: &str) -> Result<(), PlatformError>;
}

/// Port for obtaining the current UTC time.
pub trait Clock: Send + Sync {
    /// Returns the current time in UTC.
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

/// System clock implementation that returns the actual current time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}
