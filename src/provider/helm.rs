//! Helm chart repository provider
//!
//! Reads `index.yaml` and collects the `version` of every entry listed
//! under `entries.<chart>`.

use std::collections::HashMap;

use tracing::{debug, warn};
use tree_sitter::Node;

use crate::model::RepositoryKind;
use crate::provider::{Provider, ProviderError, ReduceOptions, check_status, http_client};
use crate::version::Version;

/// Node kinds that only wrap the structure we look for
const WRAPPERS: &[&str] = &["stream", "document", "block_node", "block_sequence_item"];

pub struct HelmProvider {
    client: reqwest::Client,
    options: ReduceOptions,
}

impl HelmProvider {
    pub fn new() -> Self {
        Self {
            client: http_client(),
            options: ReduceOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReduceOptions) -> Self {
        self.options = options;
        self
    }
}

impl Default for HelmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Provider for HelmProvider {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Helm
    }

    async fn latest_versions(
        &self,
        name: &str,
        part: &str,
        patterns: &[String],
    ) -> Result<HashMap<String, Version>, ProviderError> {
        let url = format!("{}/index.yaml", name.trim_end_matches('/'));
        debug!("Fetching Helm index: {}", url);

        let response = check_status(self.client.get(&url).send().await?, name)?;
        let content = response.text().await.map_err(|e| {
            warn!("Failed to read Helm index: {}", e);
            ProviderError::InvalidResponse(e.to_string())
        })?;

        let versions = chart_versions(&content, part)?
            .ok_or_else(|| ProviderError::NotFound(format!("{}#{}", name, part)))?;

        let reducer = self.options.spawn(patterns);
        reducer.push_all(versions).await?;
        Ok(reducer.finish().await?)
    }
}

/// Versions published for `chart`, or `None` when the chart is not indexed
pub fn chart_versions(content: &str, chart: &str) -> Result<Option<Vec<String>>, ProviderError> {
    let mut parser = tree_sitter::Parser::new();
    let language = tree_sitter_yaml::LANGUAGE;
    parser.set_language(&language.into()).map_err(|e| {
        warn!("Failed to set YAML language for tree-sitter: {}", e);
        ProviderError::InvalidResponse(e.to_string())
    })?;

    let tree = parser
        .parse(content, None)
        .ok_or_else(|| ProviderError::InvalidResponse("Failed to parse YAML".to_string()))?;

    let root = tree.root_node();
    let entries = pair_value(root, content, "entries")
        .ok_or_else(|| ProviderError::InvalidResponse("index has no entries".to_string()))?;

    let Some(chart_node) = pair_value(entries, content, chart) else {
        return Ok(None);
    };

    let Some(sequence) = unwrap_to(chart_node, "block_sequence") else {
        return Ok(Some(Vec::new()));
    };

    let mut cursor = sequence.walk();
    let versions = sequence
        .named_children(&mut cursor)
        .filter(|item| item.kind() == "block_sequence_item")
        .filter_map(|item| pair_value(item, content, "version"))
        .map(|value| node_text(value, content))
        .filter(|version| !version.is_empty())
        .collect();

    Ok(Some(versions))
}

/// Descend through wrapper nodes until a node of `kind` is found
fn unwrap_to<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    if node.kind() == kind {
        return Some(node);
    }
    if !WRAPPERS.contains(&node.kind()) {
        return None;
    }

    let mut cursor = node.walk();
    let found = node
        .named_children(&mut cursor)
        .find_map(|child| unwrap_to(child, kind));
    found
}

/// Value of the direct mapping entry named `key` below `node`
fn pair_value<'t>(node: Node<'t>, content: &str, key: &str) -> Option<Node<'t>> {
    let mapping = unwrap_to(node, "block_mapping")?;

    let mut cursor = mapping.walk();
    let value = mapping
        .named_children(&mut cursor)
        .filter(|pair| pair.kind() == "block_mapping_pair")
        .find(|pair| {
            pair.child_by_field_name("key")
                .is_some_and(|k| node_text(k, content) == key)
        })
        .and_then(|pair| pair.child_by_field_name("value"));
    value
}

/// Get text content of a node, removing quotes if present
fn node_text(node: Node, content: &str) -> String {
    let text = &content[node.byte_range()];
    text.trim()
        .trim_start_matches('"')
        .trim_end_matches('"')
        .trim_start_matches('\'')
        .trim_end_matches('\'')
        .to_string()
}
