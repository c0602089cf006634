//! npm registry provider

use std::collections::HashMap;

use serde::Deserialize;
use tracing::warn;

use crate::model::RepositoryKind;
use crate::provider::{Provider, ProviderError, ReduceOptions, check_status, http_client};
use crate::version::Version;

/// Default base URL for npm registry
pub const DEFAULT_BASE_URL: &str = "https://registry.npmjs.org";

/// Response from npm registry API
#[derive(Debug, Deserialize)]
struct NpmPackageResponse {
    #[serde(default)]
    versions: HashMap<String, serde_json::Value>,
}

pub struct NpmProvider {
    client: reqwest::Client,
    base_url: String,
    options: ReduceOptions,
}

impl NpmProvider {
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

    /// Encode package name for URL (handles scoped packages)
    fn encode_package_name(package_name: &str) -> String {
        if package_name.starts_with('@') {
            // Scoped package: @scope/name -> @scope%2Fname
            package_name.replace('/', "%2F")
        } else {
            package_name.to_string()
        }
    }
}

impl Default for NpmProvider {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[async_trait::async_trait]
impl Provider for NpmProvider {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Npm
    }

    async fn latest_versions(
        &self,
        name: &str,
        _part: &str,
        patterns: &[String],
    ) -> Result<HashMap<String, Version>, ProviderError> {
        let url = format!("{}/{}", self.base_url, Self::encode_package_name(name));

        let response = check_status(self.client.get(&url).send().await?, name)?;
        let package: NpmPackageResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse npm registry response: {}", e);
            ProviderError::InvalidResponse(e.to_string())
        })?;

        let reducer = self.options.spawn(patterns);
        reducer.push_all(package.versions.into_keys()).await?;
        Ok(reducer.finish().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn latest_versions_reduces_version_keys() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/lodash")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "name": "lodash",
                    "versions": {
                        "4.17.21": {},
                        "4.17.19": {},
                        "5.0.0-alpha.1": {},
                        "3.10.1": {}
                    }
                }"#,
            )
            .create_async()
            .await;

        let provider = NpmProvider::new(&server.url());
        let result = provider
            .latest_versions(
                "lodash",
                "",
                &["stable".to_string(), "^3.0".to_string(), "latest".to_string()],
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result["stable"].raw, "4.17.21");
        assert_eq!(result["^3.0"].raw, "3.10.1");
        assert_eq!(result["latest"].raw, "5.0.0-alpha.1");
    }

    #[tokio::test]
    async fn latest_versions_handles_scoped_package() {
        let mut server = Server::new_async().await;

        // Scoped packages use URL encoding: @types/node -> @types%2Fnode
        let mock = server
            .mock("GET", "/@types%2Fnode")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name": "@types/node", "versions": {"20.0.0": {}, "18.0.0": {}}}"#)
            .create_async()
            .await;

        let provider = NpmProvider::new(&server.url());
        let result = provider
            .latest_versions("@types/node", "", &["stable".to_string()])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result["stable"].raw, "20.0.0");
    }

    #[tokio::test]
    async fn latest_versions_returns_not_found_for_nonexistent_package() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/nonexistent-package")
            .with_status(404)
            .with_body(r#"{"error": "Not found"}"#)
            .create_async()
            .await;

        let provider = NpmProvider::new(&server.url());
        let result = provider
            .latest_versions("nonexistent-package", "", &["stable".to_string()])
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(ProviderError::NotFound(_))));
    }
}
