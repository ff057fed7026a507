// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{
    ClaimScope, NodeMetadata, NodePermission, NodeRecord, NodeStatus, PermissionScope,
};
use crate::crypto::{derive_claim_code, VerifiedNode};
use crate::storage::{CoordinatorStore, OwnerLink, StoreError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Ownership(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Response body for a registration call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: Uuid,
    pub claim_code: String,
    pub claimed: bool,
}

/// Tracks node identities, their claim state and who may use them
#[derive(Clone)]
pub struct NodeRegistry {
    store: Arc<dyn CoordinatorStore>,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn CoordinatorStore>) -> Self {
        Self { store }
    }

    /// Register a verified key. Repeated calls return the existing identity.
    pub async fn register(
        &self,
        node: &VerifiedNode,
        metadata: &NodeMetadata,
    ) -> Result<(Registration, bool), RegistryError> {
        let public_key = node.public_key_base64();
        if let Some(existing) = self.store.find_node_by_key(&public_key).await? {
            debug!(node_id = %existing.id, "Node already registered");
            return Ok((registration_of(&existing), false));
        }

        let claim_code = derive_claim_code(&node.public_key);
        let record = NodeRecord::new(public_key, claim_code, metadata);
        let (stored, created) = self.store.insert_node_if_absent(record).await?;
        if created {
            info!(
                node_id = %stored.id,
                claim_code = %stored.claim_code,
                cores = stored.total_cores,
                "Registered new node"
            );
        }
        Ok((registration_of(&stored), created))
    }

    /// Record a heartbeat. Only claimed nodes are kept alive.
    pub async fn heartbeat(
        &self,
        node: &VerifiedNode,
        status: NodeStatus,
    ) -> Result<NodeRecord, RegistryError> {
        if status == NodeStatus::Pending {
            return Err(RegistryError::Validation(
                "heartbeat status must be online or offline".to_string(),
            ));
        }
        self.store
            .touch_claimed_node(&node.public_key_base64(), status, Utc::now())
            .await?
            .ok_or_else(|| RegistryError::NotFound("node".to_string()))
    }

    /// Link the node holding `claim_code` to `account`
    pub async fn link_to_account(
        &self,
        claim_code: &str,
        account: &str,
    ) -> Result<NodeRecord, RegistryError> {
        let code = claim_code.trim();
        if code.is_empty() {
            return Err(RegistryError::Validation("claimCode is required".to_string()));
        }
        let node = self
            .store
            .find_node_by_claim_code(code)
            .await?
            .ok_or_else(|| RegistryError::NotFound("node".to_string()))?;

        match self.store.link_node_owner(node.id, account).await? {
            Some(OwnerLink::Linked(record)) => {
                info!(node_id = %record.id, account = %account, "Node claimed");
                Ok(record)
            }
            Some(OwnerLink::AlreadyOwned(record))
                if record.user_id.as_deref() == Some(account) =>
            {
                Ok(record)
            }
            Some(OwnerLink::AlreadyOwned(record)) => {
                warn!(node_id = %record.id, "Claim attempt on node owned by another account");
                Err(RegistryError::Ownership(
                    "node already claimed by another account".to_string(),
                ))
            }
            None => Err(RegistryError::NotFound("node".to_string())),
        }
    }

    /// Let a node see work beyond its owner's jobs. Only the owner may grant.
    pub async fn grant_permission(
        &self,
        account: &str,
        node_id: Uuid,
        scope: PermissionScope,
    ) -> Result<NodePermission, RegistryError> {
        if let PermissionScope::User(target) = &scope {
            if target.trim().is_empty() {
                return Err(RegistryError::Validation(
                    "targetId is required for user access".to_string(),
                ));
            }
        }
        let node = self
            .store
            .get_node(node_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound("node".to_string()))?;
        if node.user_id.as_deref() != Some(account) {
            return Err(RegistryError::Ownership(
                "only the node owner may grant access".to_string(),
            ));
        }

        let permission = NodePermission {
            node_id,
            scope,
            granted_by: account.to_string(),
            created_at: Utc::now(),
        };
        self.store.insert_permission(permission.clone()).await?;
        info!(node_id = %node_id, scope = ?permission.scope, "Granted node permission");
        Ok(permission)
    }

    /// Look up the stored record behind a verified key
    pub async fn resolve_node(&self, node: &VerifiedNode) -> Result<NodeRecord, RegistryError> {
        self.store
            .find_node_by_key(&node.public_key_base64())
            .await?
            .ok_or_else(|| RegistryError::NotFound("node".to_string()))
    }

    pub async fn claim_scope(&self, node: &NodeRecord) -> Result<ClaimScope, RegistryError> {
        let permissions = self.store.permissions_for_node(node.id).await?;
        Ok(ClaimScope::for_node(node, &permissions))
    }
}

fn registration_of(node: &NodeRecord) -> Registration {
    Registration {
        id: node.id,
        claim_code: node.claim_code.clone(),
        claimed: node.is_claimed(),
    }
}
