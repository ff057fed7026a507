// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod registry;
pub mod types;

pub use registry::{NodeRegistry, Registration, RegistryError};
pub use types::{
    ClaimScope, NodeMetadata, NodePermission, NodeRecord, NodeStatus, PermissionScope,
};
