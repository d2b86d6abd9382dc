//! Paginated search results returned by the upstream claims service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const LINK_NEXT: &str = "next";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEntry {
    #[serde(default)]
    pub resource: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default = "bundle_resource_type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default)]
    pub link: Vec<BundleLink>,
    #[serde(default)]
    pub entry: Vec<BundleEntry>,
}

fn bundle_resource_type() -> String {
    "Bundle".to_string()
}

impl Bundle {
    pub fn new(resources: Vec<Value>) -> Self {
        Self {
            resource_type: bundle_resource_type(),
            total: Some(resources.len() as u64),
            link: Vec::new(),
            entry: resources
                .into_iter()
                .map(|resource| BundleEntry {
                    resource: Some(resource),
                })
                .collect(),
        }
    }

    pub fn with_next(mut self, url: impl Into<String>) -> Self {
        self.link.push(BundleLink {
            relation: LINK_NEXT.to_string(),
            url: url.into(),
        });
        self
    }

    pub fn link(&self, relation: &str) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == relation)
            .map(|l| l.url.as_str())
    }

    pub fn next_link(&self) -> Option<&str> {
        self.link(LINK_NEXT)
    }

    /// Resources carried by the entries, skipping entries without one.
    pub fn resources(&self) -> impl Iterator<Item = &Value> {
        self.entry.iter().filter_map(|e| e.resource.as_ref())
    }
}
