// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_NODE_NAME: &str = "Sim Node";
pub const DEFAULT_TOTAL_CORES: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Online,
    Offline,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
        }
    }
}

/// Self-reported host details sent on registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub total_cores: Option<u32>,
    #[serde(default)]
    pub enabled_cores: Option<u32>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: Uuid,
    /// Base64 Ed25519 public key
    pub public_key: String,
    pub claim_code: String,
    /// Owning account; set once when the node is claimed
    pub user_id: Option<String>,
    pub name: String,
    pub status: NodeStatus,
    pub total_cores: u32,
    pub max_parallel: u32,
    pub platform: Option<String>,
    pub version: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NodeRecord {
    pub fn new(public_key: String, claim_code: String, metadata: &NodeMetadata) -> Self {
        let total_cores = metadata.total_cores.unwrap_or(DEFAULT_TOTAL_CORES).max(1);
        let max_parallel = metadata
            .enabled_cores
            .unwrap_or(total_cores)
            .clamp(1, total_cores);
        Self {
            id: Uuid::new_v4(),
            public_key,
            claim_code,
            user_id: None,
            name: metadata
                .hostname
                .clone()
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_NODE_NAME.to_string()),
            status: NodeStatus::Pending,
            total_cores,
            max_parallel,
            platform: metadata.platform.clone(),
            version: metadata.version.clone(),
            last_seen_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.user_id.is_some()
    }
}

/// What a permission grant exposes to a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "accessType", content = "targetId", rename_all = "lowercase")]
pub enum PermissionScope {
    /// Any job on the coordinator
    Public,
    /// Jobs owned by one specific account
    User(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePermission {
    pub node_id: Uuid,
    #[serde(flatten)]
    pub scope: PermissionScope,
    pub granted_by: String,
    pub created_at: DateTime<Utc>,
}

/// The set of job owners whose work a node may claim
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimScope {
    pub owner: Option<String>,
    pub public: bool,
    pub users: Vec<String>,
}

impl ClaimScope {
    pub fn for_node(node: &NodeRecord, permissions: &[NodePermission]) -> Self {
        let mut scope = ClaimScope {
            owner: node.user_id.clone(),
            ..Default::default()
        };
        for permission in permissions {
            match &permission.scope {
                PermissionScope::Public => scope.public = true,
                PermissionScope::User(account) => {
                    if !scope.users.contains(account) {
                        scope.users.push(account.clone());
                    }
                }
            }
        }
        scope
    }

    /// Whether a job owned by `job_owner` is visible under this scope
    pub fn includes(&self, job_owner: &str) -> bool {
        self.public
            || self.owner.as_deref() == Some(job_owner)
            || self.users.iter().any(|u| u == job_owner)
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_none() && !self.public && self.users.is_empty()
    }
}
