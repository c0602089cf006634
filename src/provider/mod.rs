//! Registry adapters resolving tracked patterns to their best version
//!
//! Every adapter enumerates raw tags (paginating, authenticating, or
//! parsing an index as its registry requires) and feeds them to a
//! [`TagReducer`], so the version vocabulary is identical across registries.
//!
//! # Modules
//!
//! - [`github`]: GitHub tags API with `Link` pagination
//! - [`docker`]: Docker registry v2 with bearer token exchange
//! - [`helm`]: Helm chart repository `index.yaml`
//! - [`npm`]: npm registry package document
//! - [`pypi`]: PyPI JSON API
//! - [`pagination`]: `Link` header parsing

pub mod docker;
pub mod error;
pub mod github;
pub mod helm;
pub mod npm;
pub mod pagination;
pub mod pypi;

use std::collections::HashMap;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use tracing::warn;

use crate::config::{DEFAULT_PARSE_WORKERS, ProvidersConfig};
use crate::model::RepositoryKind;
use crate::version::{PatternSet, SuffixRanking, TagReducer, Version};

pub use docker::DockerProvider;
pub use error::ProviderError;
pub use github::GithubProvider;
pub use helm::HelmProvider;
pub use npm::NpmProvider;
pub use pypi::PypiProvider;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Trait for resolving the best version per pattern from a registry
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Returns the kind of repository this implementation handles
    fn kind(&self) -> RepositoryKind;

    /// Resolve every pattern to its greatest matching version
    ///
    /// # Arguments
    /// * `name` - Repository identifier (e.g. "owner/repo", an index URL for Helm)
    /// * `part` - Sub-identifier, only meaningful for Helm (chart name)
    /// * `patterns` - Tracking expressions to resolve
    ///
    /// # Returns
    /// * `Ok(map)` - One entry per compilable pattern; the sentinel
    ///   [`Version::none`] when nothing matched
    /// * `Err(ProviderError)` - If the registry could not be read
    async fn latest_versions(
        &self,
        name: &str,
        part: &str,
        patterns: &[String],
    ) -> Result<HashMap<String, Version>, ProviderError>;
}

/// Settings for the reduction every provider performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceOptions {
    pub workers: usize,
    pub ranking: SuffixRanking,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_PARSE_WORKERS,
            ranking: SuffixRanking::default(),
        }
    }
}

impl ReduceOptions {
    pub(crate) fn spawn(&self, patterns: &[String]) -> TagReducer {
        let patterns = PatternSet::compile_with(patterns, self.ranking);
        TagReducer::spawn(Arc::new(patterns), self.workers)
    }
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .expect("Failed to create HTTP client")
}

/// Map registry status codes onto provider errors
pub(crate) fn check_status(
    response: reqwest::Response,
    name: &str,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();

    if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
        return Err(ProviderError::NotFound(name.to_string()));
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return Err(ProviderError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ProviderError::Unauthorized(format!("{} ({})", name, status)));
    }

    if !status.is_success() {
        warn!("Registry returned status {}: {}", status, response.url());
        return Err(ProviderError::InvalidResponse(format!(
            "Unexpected status: {}",
            status
        )));
    }

    Ok(response)
}

fn or_default<'a>(configured: &'a str, default: &'a str) -> &'a str {
    if configured.is_empty() {
        default
    } else {
        configured
    }
}

/// Create the providers enabled in configuration, keyed by repository kind
pub fn create_providers(
    config: &ProvidersConfig,
    options: ReduceOptions,
) -> HashMap<RepositoryKind, Arc<dyn Provider>> {
    let mut providers: HashMap<RepositoryKind, Arc<dyn Provider>> = HashMap::new();

    if config.github.enabled {
        providers.insert(
            RepositoryKind::Github,
            Arc::new(
                GithubProvider::new(
                    or_default(&config.github.base_url, github::DEFAULT_BASE_URL),
                    config.github.token.clone(),
                )
                .with_options(options),
            ),
        );
    }
    if config.docker.enabled {
        providers.insert(
            RepositoryKind::Docker,
            Arc::new(
                DockerProvider::new(
                    or_default(&config.docker.base_url, docker::DEFAULT_BASE_URL),
                    or_default(&config.docker.auth_url, docker::DEFAULT_AUTH_URL),
                )
                .with_options(options),
            ),
        );
    }
    if config.helm.enabled {
        providers.insert(
            RepositoryKind::Helm,
            Arc::new(HelmProvider::new().with_options(options)),
        );
    }
    if config.npm.enabled {
        providers.insert(
            RepositoryKind::Npm,
            Arc::new(
                NpmProvider::new(or_default(&config.npm.base_url, npm::DEFAULT_BASE_URL))
                    .with_options(options),
            ),
        );
    }
    if config.pypi.enabled {
        providers.insert(
            RepositoryKind::Pypi,
            Arc::new(
                PypiProvider::new(or_default(&config.pypi.base_url, pypi::DEFAULT_BASE_URL))
                    .with_options(options),
            ),
        );
    }

    providers
}
