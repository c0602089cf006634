//! GitHub tags API provider

use std::collections::HashMap;

use reqwest::Url;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::RepositoryKind;
use crate::provider::pagination::{MAX_PAGES, next_link};
use crate::provider::{Provider, ProviderError, ReduceOptions, check_status, http_client};
use crate::version::Version;

/// Default base URL for GitHub API
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

const PER_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

pub struct GithubProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    options: ReduceOptions,
}

impl GithubProvider {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            options: ReduceOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReduceOptions) -> Self {
        self.options = options;
        self
    }
}

impl Default for GithubProvider {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, None)
    }
}

#[async_trait::async_trait]
impl Provider for GithubProvider {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Github
    }

    async fn latest_versions(
        &self,
        name: &str,
        _part: &str,
        patterns: &[String],
    ) -> Result<HashMap<String, Version>, ProviderError> {
        let first = format!("{}/repos/{}/tags?per_page={}", self.base_url, name, PER_PAGE);
        let mut next = Some(Url::parse(&first).map_err(|e| ProviderError::InvalidUrl(e.to_string()))?);

        let reducer = self.options.spawn(patterns);
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                warn!("Stopping after {} tag pages for {}", MAX_PAGES, name);
                break;
            }

            let mut request = self
                .client
                .get(url.clone())
                .header(ACCEPT, "application/vnd.github+json");
            if let Some(token) = &self.token {
                request = request.header(AUTHORIZATION, format!("token {}", token));
            }

            let response = check_status(request.send().await?, name)?;
            next = next_link(response.headers(), &url);

            let tags: Vec<Tag> = response.json().await.map_err(|e| {
                warn!("Failed to parse GitHub tags response: {}", e);
                ProviderError::InvalidResponse(e.to_string())
            })?;

            debug!("Read {} tags from page {} of {}", tags.len(), pages, name);
            reducer.push_all(tags.into_iter().map(|tag| tag.name)).await?;
        }

        Ok(reducer.finish().await?)
    }
}
