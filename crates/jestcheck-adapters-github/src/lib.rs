//! GitHub REST adapter implementing the [`ReviewPlatform`] port.
//!
//! Check runs go to `/repos/{owner}/{repo}/check-runs`, comments to the
//! issue-comment endpoints of the pull request. GitHub accepts at most 50
//! annotations per request, so larger payloads are created with the first
//! batch and completed with follow-up updates of the same check run.

use std::time::Duration;

use async_trait::async_trait;
use jestcheck_config::Repository;
use jestcheck_ports::{PlatformError, ReviewPlatform};
use jestcheck_types::{Annotation, CheckPayload, Comment};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Method, Response};
use serde::{Deserialize, Serialize};

/// Annotations accepted by GitHub in one request.
pub const ANNOTATION_BATCH_SIZE: usize = 50;

/// Comments requested per page when listing.
pub const COMMENTS_PER_PAGE: usize = 100;

/// User agent sent with every request.
pub const JESTCHECK_USER_AGENT: &str = concat!("jestcheck/", env!("CARGO_PKG_VERSION"));

const API_VERSION: &str = "2022-11-28";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for one repository on a GitHub (or GitHub Enterprise) instance.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    repository: Repository,
    token: String,
}

#[derive(Debug, Deserialize)]
struct CreatedCheckRun {
    id: u64,
}

#[derive(Debug, Serialize)]
struct CheckRunUpdate<'a> {
    output: CheckRunUpdateOutput<'a>,
}

#[derive(Debug, Serialize)]
struct CheckRunUpdateOutput<'a> {
    title: &'a str,
    summary: &'a str,
    annotations: &'a [Annotation],
}

#[derive(Debug, Serialize)]
struct NewComment<'a> {
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

impl GitHubClient {
    /// Create a client for `repository` at `api_url` authenticated with `token`.
    pub fn new(
        api_url: &str,
        repository: Repository,
        token: impl Into<String>,
    ) -> Result<Self, PlatformError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        default_headers.insert(USER_AGENT, HeaderValue::from_static(JESTCHECK_USER_AGENT));
        default_headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(default_headers)
            .build()
            .map_err(|e| PlatformError::Transport {
                endpoint: api_url.to_string(),
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            repository,
            token: token.into(),
        })
    }

    fn repo_path(&self, suffix: &str) -> String {
        format!(
            "/repos/{}/{}/{}",
            self.repository.owner, self.repository.name, suffix
        )
    }

    /// Send a request and map non-success statuses to [`PlatformError::Status`].
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<Response, PlatformError> {
        let endpoint = format!("{method} {path}");
        let mut request = self
            .client
            .request(method, format!("{}{}", self.api_url, path))
            .header(AUTHORIZATION, format!("Bearer {}", self.token));
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| PlatformError::Transport {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        tracing::debug!(%endpoint, status = status.as_u16(), "github response");
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiMessage>(&text)
            .map(|m| m.message)
            .unwrap_or(text);
        Err(PlatformError::Status {
            endpoint,
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: Response,
        endpoint: &str,
    ) -> Result<T, PlatformError> {
        response.json::<T>().await.map_err(|e| PlatformError::Decode {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ReviewPlatform for GitHubClient {
    async fn create_check_run(&self, payload: &CheckPayload) -> Result<(), PlatformError> {
        let path = self.repo_path("check-runs");
        let annotations = &payload.output.annotations;
        let (first, rest) = annotations.split_at(annotations.len().min(ANNOTATION_BATCH_SIZE));

        let mut initial = payload.clone();
        initial.output.annotations = first.to_vec();
        let response = self
            .send(Method::POST, &path, &[], Some(&initial))
            .await?;
        let created: CreatedCheckRun = Self::decode(response, &format!("POST {path}")).await?;
        tracing::info!(
            check_run_id = created.id,
            name = %payload.name,
            conclusion = ?payload.conclusion,
            annotations = annotations.len(),
            "created check run"
        );

        let update_path = self.repo_path(&format!("check-runs/{}", created.id));
        for batch in rest.chunks(ANNOTATION_BATCH_SIZE) {
            let update = CheckRunUpdate {
                output: CheckRunUpdateOutput {
                    title: &payload.output.title,
                    summary: &payload.output.summary,
                    annotations: batch,
                },
            };
            self.send(Method::PATCH, &update_path, &[], Some(&update))
                .await?;
            tracing::debug!(
                check_run_id = created.id,
                batch = batch.len(),
                "appended annotations"
            );
        }

        Ok(())
    }

    async fn list_comments(&self, pull_request: u64) -> Result<Vec<Comment>, PlatformError> {
        let path = self.repo_path(&format!("issues/{pull_request}/comments"));
        let mut comments = Vec::new();

        for page in 1.. {
            let query = [
                ("per_page", COMMENTS_PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            let response = self
                .send::<()>(Method::GET, &path, &query, None)
                .await?;
            let batch: Vec<Comment> = Self::decode(response, &format!("GET {path}")).await?;
            let done = batch.len() < COMMENTS_PER_PAGE;
            comments.extend(batch);
            if done {
                break;
            }
        }

        tracing::debug!(pull_request, count = comments.len(), "listed comments");
        Ok(comments)
    }

    async fn delete_comment(&self, comment_id: u64) -> Result<(), PlatformError> {
        let path = self.repo_path(&format!("issues/comments/{comment_id}"));
        self.send::<()>(Method::DELETE, &path, &[], None).await?;
        tracing::debug!(comment_id, "deleted comment");
        Ok(())
    }

    async fn create_comment(&self, pull_request: u64, body: &str) -> Result<(), PlatformError> {
        let path = self.repo_path(&format!("issues/{pull_request}/comments"));
        self.send(Method::POST, &path, &[], Some(&NewComment { body }))
            .await?;
        tracing::info!(pull_request, "posted coverage comment");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
