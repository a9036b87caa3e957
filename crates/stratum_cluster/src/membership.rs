//! Cluster membership view.
//!
//! Membership itself is formed elsewhere; this is the read-mostly view the
//! protocol resolves targets against. Members keep insertion order so
//! broadcasts and reports are deterministic.

use crate::config::ClusterConfig;
use crate::dispatch::TargetSelector;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stratum_core::{CoreError, CoreResult, NodeName};
use tokio::sync::RwLock;

/// Cluster member information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Member name
    pub name: NodeName,
    /// Protocol address
    pub address: String,
}

impl Member {
    /// Create a new member
    #[must_use]
    pub fn new(name: NodeName, address: impl Into<String>) -> Self {
        Self {
            name,
            address: address.into(),
        }
    }
}

/// Cluster membership
pub struct Membership {
    /// Known members
    members: Arc<RwLock<IndexMap<NodeName, Member>>>,
    /// Member the caller is attached to
    local: NodeName,
}

impl Membership {
    /// Create an empty membership attached to `local`
    #[must_use]
    pub fn new(local: NodeName) -> Self {
        Self {
            members: Arc::new(RwLock::new(IndexMap::new())),
            local,
        }
    }

    /// Build the view described by a cluster file
    #[must_use]
    pub fn from_config(config: &ClusterConfig) -> Self {
        let members = config
            .members
            .iter()
            .map(|m| (m.name.clone(), Member::new(m.name.clone(), m.address.clone())))
            .collect();
        Self {
            members: Arc::new(RwLock::new(members)),
            local: config.local_node.clone(),
        }
    }

    /// Name of the local member
    #[must_use]
    pub fn local(&self) -> &NodeName {
        &self.local
    }

    /// Get all members
    pub async fn members(&self) -> Vec<Member> {
        self.members.read().await.values().cloned().collect()
    }

    /// Add or replace a member
    pub async fn add_member(&self, member: Member) {
        let mut members = self.members.write().await;
        members.insert(member.name.clone(), member);
    }

    /// Get a member by name
    pub async fn get_member(&self, name: &NodeName) -> Option<Member> {
        self.members.read().await.get(name).cloned()
    }

    /// Resolve a target selector to a member
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the target is not a member
    pub async fn resolve(&self, target: &TargetSelector) -> CoreResult<Member> {
        let name = match target {
            TargetSelector::Local => &self.local,
            TargetSelector::Node(name) => name,
        };
        self.get_member(name)
            .await
            .ok_or_else(|| CoreError::not_found("node", name.as_str()))
    }
}
