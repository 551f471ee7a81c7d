//! `GET /navigation`: the full navigation tree, cache-through (C7).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Extension;
use axum::response::Response;
use serde_json::json;
use uuid::Uuid;

use crawler::NavigationNode;

use crate::cache::{cache_control_header, fingerprint, Fetcher};
use crate::error::ApiError;
use crate::server::app::AppState;
use crate::server::envelope::success;

pub async fn get_navigation(Extension(state): Extension<AppState>) -> Result<Response, ApiError> {
    let key = fingerprint("navigation", &[]);
    let ttl = Duration::from_secs(state.config.cache_ttl_navigation_secs);
    let max_depth = state.config.navigation_max_depth;

    let repository = state.repository.clone();
    let fetch: Fetcher = Arc::new(move || {
        let repository = repository.clone();
        Box::pin(async move {
            let nodes = repository.list_navigation().await?;
            Ok(build_tree(&nodes, max_depth))
        })
    });

    let outcome = state
        .cache
        .get_with_swr(&key, ttl, fetch, Some(state.bridge.as_trigger()))
        .await?;

    Ok(success(outcome.data, outcome.cached, outcome.stale, &cache_control_header(ttl)))
}

/// Arena + parent-index tree build: one pass groups
/// nodes by `parent_id`, a second pass materializes the JSON tree
/// depth-first from the roots, stopping at `max_depth` hops.
fn build_tree(nodes: &[NavigationNode], max_depth: u32) -> serde_json::Value {
    let mut children_of: HashMap<Option<Uuid>, Vec<&NavigationNode>> = HashMap::new();
    for node in nodes {
        children_of.entry(node.parent_id).or_default().push(node);
    }

    fn materialize(
        node: &NavigationNode,
        children_of: &HashMap<Option<Uuid>, Vec<&NavigationNode>>,
        depth: u32,
        max_depth: u32,
    ) -> serde_json::Value {
        let children = if depth >= max_depth {
            Vec::new()
        } else {
            children_of
                .get(&Some(node.id))
                .map(|kids| {
                    kids.iter()
                        .map(|kid| materialize(kid, children_of, depth + 1, max_depth))
                        .collect()
                })
                .unwrap_or_default()
        };

        json!({
            "id": node.id,
            "title": node.title,
            "sourceUrl": node.source_url,
            "lastScrapedAt": node.last_scraped_at,
            "children": children,
        })
    }

    let roots = children_of.get(&None).cloned().unwrap_or_default();
    serde_json::Value::Array(
        roots
            .into_iter()
            .map(|root| materialize(root, &children_of, 0, max_depth))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(id: Uuid, title: &str, parent_id: Option<Uuid>) -> NavigationNode {
        NavigationNode {
            id,
            title: title.to_string(),
            source_url: format!("https://shop.example.com/{title}"),
            parent_id,
            last_scraped_at: Utc::now(),
        }
    }

    #[test]
    fn builds_a_tree_from_flat_parent_pointers() {
        let root_id = Uuid::now_v7();
        let child_id = Uuid::now_v7();
        let nodes = vec![
            node(root_id, "Electronics", None),
            node(child_id, "Phones", Some(root_id)),
        ];

        let tree = build_tree(&nodes, 6);
        let roots = tree.as_array().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0]["title"], "Electronics");
        assert_eq!(roots[0]["children"][0]["title"], "Phones");
    }

    #[test]
    fn stops_descending_past_max_depth() {
        let root_id = Uuid::now_v7();
        let child_id = Uuid::now_v7();
        let nodes = vec![node(root_id, "Root", None), node(child_id, "Child", Some(root_id))];

        let tree = build_tree(&nodes, 0);
        assert!(tree.as_array().unwrap()[0]["children"].as_array().unwrap().is_empty());
    }
}
