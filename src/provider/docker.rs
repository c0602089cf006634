//! Docker registry v2 provider
//!
//! Tag listing requires a bearer token obtained anonymously from the
//! registry's token service, then follows `Link` pagination.

use std::collections::HashMap;

use reqwest::Url;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::RepositoryKind;
use crate::provider::pagination::{MAX_PAGES, next_link};
use crate::provider::{Provider, ProviderError, ReduceOptions, check_status, http_client};
use crate::version::Version;

/// Default base URL for Docker Hub registry
pub const DEFAULT_BASE_URL: &str = "https://registry-1.docker.io";

/// Default base URL for Docker Hub token service
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io";

const REGISTRY_SERVICE: &str = "registry.docker.io";
const PAGE_SIZE: &str = "100";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

pub struct DockerProvider {
    client: reqwest::Client,
    base_url: String,
    auth_url: String,
    options: ReduceOptions,
}

impl DockerProvider {
    pub fn new(base_url: &str, auth_url: &str) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_url: auth_url.trim_end_matches('/').to_string(),
            options: ReduceOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReduceOptions) -> Self {
        self.options = options;
        self
    }

    /// Official images live under the `library` namespace
    fn image_name(name: &str) -> String {
        if name.contains('/') {
            name.to_string()
        } else {
            format!("library/{}", name)
        }
    }

    async fn bearer_token(&self, image: &str) -> Result<String, ProviderError> {
        let url = Url::parse_with_params(
            &format!("{}/token", self.auth_url),
            &[
                ("service", REGISTRY_SERVICE.to_string()),
                ("scope", format!("repository:{}:pull", image)),
            ],
        )
        .map_err(|e| ProviderError::InvalidUrl(e.to_string()))?;

        let response = check_status(self.client.get(url).send().await?, image)?;
        let token: TokenResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse Docker token response: {}", e);
            ProviderError::Unauthorized(format!("{}: {}", image, e))
        })?;

        Ok(token.token)
    }
}

impl Default for DockerProvider {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, DEFAULT_AUTH_URL)
    }
}

#[async_trait::async_trait]
impl Provider for DockerProvider {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Docker
    }

    async fn latest_versions(
        &self,
        name: &str,
        _part: &str,
        patterns: &[String],
    ) -> Result<HashMap<String, Version>, ProviderError> {
        let image = Self::image_name(name);
        let token = self.bearer_token(&image).await?;

        let first = Url::parse_with_params(
            &format!("{}/v2/{}/tags/list", self.base_url, image),
            &[("n", PAGE_SIZE)],
        )
        .map_err(|e| ProviderError::InvalidUrl(e.to_string()))?;
        let mut next = Some(first);

        let reducer = self.options.spawn(patterns);
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                warn!("Stopping after {} tag pages for {}", MAX_PAGES, image);
                break;
            }

            let response = self
                .client
                .get(url.clone())
                .header(AUTHORIZATION, format!("Bearer {}", token))
                .send()
                .await?;
            let response = check_status(response, &image)?;
            next = next_link(response.headers(), &url);

            let list: TagList = response.json().await.map_err(|e| {
                warn!("Failed to parse Docker tags response: {}", e);
                ProviderError::InvalidResponse(e.to_string())
            })?;

            let tags = list.tags.unwrap_or_default();
            debug!("Read {} tags from page {} of {}", tags.len(), pages, image);
            reducer.push_all(tags).await?;
        }

        Ok(reducer.finish().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use rstest::rstest;

    #[rstest]
    #[case("nginx", "library/nginx")]
    #[case("vibioh/ketchup", "vibioh/ketchup")]
    fn image_name_expands_official_images(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(DockerProvider::image_name(name), expected);
    }

    #[tokio::test]
    async fn latest_versions_exchanges_token_and_follows_pages() {
        let mut server = Server::new_async().await;

        let token = server
            .mock("GET", "/token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("service".into(), "registry.docker.io".into()),
                Matcher::UrlEncoded("scope".into(), "repository:library/nginx:pull".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token": "abc", "access_token": "abc", "expires_in": 300}"#)
            .create_async()
            .await;

        let first = server
            .mock("GET", "/v2/library/nginx/tags/list")
            .match_query(Matcher::Exact("n=100".into()))
            .match_header("authorization", "Bearer abc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header(
                "link",
                r#"</v2/library/nginx/tags/list?n=100&last=1.25.3>; rel="next""#,
            )
            .with_body(r#"{"name": "library/nginx", "tags": ["1.24.0", "1.25.3", "latest"]}"#)
            .create_async()
            .await;

        let second = server
            .mock("GET", "/v2/library/nginx/tags/list")
            .match_query(Matcher::Exact("n=100&last=1.25.3".into()))
            .match_header("authorization", "Bearer abc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name": "library/nginx", "tags": ["1.27.0-alpine", "1.26.1"]}"#)
            .create_async()
            .await;

        let provider = DockerProvider::new(&server.url(), &server.url());
        let result = provider
            .latest_versions("nginx", "", &["stable".to_string(), "~1.25".to_string()])
            .await
            .unwrap();

        token.assert_async().await;
        first.assert_async().await;
        second.assert_async().await;
        assert_eq!(result["stable"].raw, "1.27.0-alpine");
        assert_eq!(result["~1.25"].raw, "1.25.3");
    }

    #[tokio::test]
    async fn latest_versions_reports_unauthorized_token_exchange() {
        let mut server = Server::new_async().await;

        let token = server
            .mock("GET", "/token")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let provider = DockerProvider::new(&server.url(), &server.url());
        let result = provider
            .latest_versions("private/image", "", &["stable".to_string()])
            .await;

        token.assert_async().await;
        assert!(matches!(result, Err(ProviderError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn latest_versions_handles_null_tag_list() {
        let mut server = Server::new_async().await;

        let _token = server
            .mock("GET", "/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token": "abc"}"#)
            .create_async()
            .await;

        let tags = server
            .mock("GET", "/v2/vibioh/empty/tags/list")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name": "vibioh/empty", "tags": null}"#)
            .create_async()
            .await;

        let provider = DockerProvider::new(&server.url(), &server.url());
        let result = provider
            .latest_versions("vibioh/empty", "", &["stable".to_string()])
            .await
            .unwrap();

        tags.assert_async().await;
        assert!(result["stable"].is_none());
    }
}
