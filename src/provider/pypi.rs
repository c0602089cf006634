//! PyPI JSON API provider

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::RepositoryKind;
use crate::provider::{Provider, ProviderError, ReduceOptions, check_status, http_client};
use crate::version::Version;

pub const DEFAULT_BASE_URL: &str = "https://pypi.org";

/// PyPI JSON API response structure; only release keys matter
#[derive(Debug, Deserialize)]
struct PypiResponse {
    #[serde(default)]
    releases: HashMap<String, serde_json::Value>,
}

pub struct PypiProvider {
    client: reqwest::Client,
    base_url: String,
    options: ReduceOptions,
}

impl PypiProvider {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            options: ReduceOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReduceOptions) -> Self {
        self.options = options;
        self
    }
}

impl Default for PypiProvider {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[async_trait::async_trait]
impl Provider for PypiProvider {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Pypi
    }

    async fn latest_versions(
        &self,
        name: &str,
        _part: &str,
        patterns: &[String],
    ) -> Result<HashMap<String, Version>, ProviderError> {
        let url = format!("{}/pypi/{}/json", self.base_url, name);
        debug!("Fetching PyPI package: {}", url);

        let response = check_status(self.client.get(&url).send().await?, name)?;
        let package: PypiResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse PyPI response: {}", e);
            ProviderError::InvalidResponse(e.to_string())
        })?;

        let reducer = self.options.spawn(patterns);
        reducer.push_all(package.releases.into_keys()).await?;
        Ok(reducer.finish().await?)
    }
}
