//! REST client for the pull request files listing.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{ChangedFile, ChangedFilesSource, LookupError, RepositoryId, SourceId};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::files::{normalize_files, PullRequestFile};

/// Public GitHub REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// REST API version pinned by every request.
const API_VERSION: &str = "2022-11-28";

/// GitHub returns at most this many entries per page of the files listing.
const MAX_PER_PAGE: u32 = 100;

/// GitHub stops listing after 3000 files; with 100 per page that is 30 pages.
const DEFAULT_MAX_PAGES: u32 = 30;

/// Errors raised while constructing a [`GitHubClient`].
#[derive(Debug, Error)]
pub enum GitHubError {
    /// The underlying HTTP client could not be built.
    #[error("failed to build GitHub HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Connection settings for [`GitHubClient`].
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// Base URL of the REST API, without a trailing slash.
    pub api_url: String,
    /// Token sent as a bearer credential. Anonymous requests are heavily rate limited.
    pub token: Option<SecretString>,
    /// Timeout applied to each HTTP request.
    pub request_timeout: Duration,
    /// Entries requested per page (clamped to `1..=100`).
    pub per_page: u32,
    /// Upper bound on pages fetched for one pull request.
    pub max_pages: u32,
    /// `User-Agent` header; GitHub rejects requests without one.
    pub user_agent: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
            request_timeout: Duration::from_secs(10),
            per_page: MAX_PER_PAGE,
            max_pages: DEFAULT_MAX_PAGES,
            user_agent: concat!("changesync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Lists pull request files through the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    config: GitHubConfig,
}

impl GitHubClient {
    /// Builds a client from `config`.
    pub fn new(config: GitHubConfig) -> Result<Self, GitHubError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { http, config })
    }

    fn files_url(&self, owner: &str, repo: &str, number: SourceId) -> String {
        format!(
            "{}/repos/{owner}/{repo}/pulls/{number}/files",
            self.config.api_url.trim_end_matches('/')
        )
    }

    async fn fetch_page(&self, url: &str, page: u32) -> Result<Vec<PullRequestFile>, LookupError> {
        let per_page = self.config.per_page.clamp(1, MAX_PER_PAGE);
        let mut request = self
            .http
            .get(url)
            .query(&[("per_page", per_page), ("page", page)])
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(token) = &self.config.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()));
        }

        let response = request.send().await.map_err(|e| LookupError::Transport {
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| status.to_string());
            return Err(LookupError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Vec<PullRequestFile>>()
            .await
            .map_err(|e| LookupError::Decode {
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl ChangedFilesSource for GitHubClient {
    #[instrument(skip(self), fields(repository = %repository, source_id = %source_id))]
    async fn changed_files(
        &self,
        repository: &RepositoryId,
        source_id: SourceId,
    ) -> Result<Vec<ChangedFile>, LookupError> {
        let (owner, repo) =
            repository
                .owner_and_name()
                .ok_or_else(|| LookupError::InvalidRepository {
                    repository: repository.to_string(),
                })?;
        let url = self.files_url(owner, repo, source_id);
        let per_page = self.config.per_page.clamp(1, MAX_PER_PAGE) as usize;

        let mut files = Vec::new();
        for page in 1..=self.config.max_pages.max(1) {
            let batch = self.fetch_page(&url, page).await?;
            let short_page = batch.len() < per_page;
            debug!(page, entries = batch.len(), "Fetched pull request files page");
            files.extend(batch);
            if short_page {
                break;
            }
        }

        Ok(normalize_files(files))
    }
}
