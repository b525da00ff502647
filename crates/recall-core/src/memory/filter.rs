//! ============================================================================
//! Metadata Filters - Exact-match predicates with mandatory tenant scope
//! ============================================================================
//! `MetadataFilter` is what callers build. `TenantFilter` is what the index
//! accepts: it can only be obtained from a filter that names an organization.
//! ============================================================================

use serde::{Deserialize, Serialize};

use super::error::MemoryError;
use super::types::{RecordMetadata, SenderRole};

/// Exact-match predicate over the record metadata schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub organization_id: Option<String>,
    pub user_id: Option<String>,
    pub sender_role: Option<SenderRole>,
}

impl MetadataFilter {
    /// Filter scoped to one organization
    pub fn for_organization(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: Some(organization_id.into()),
            ..Default::default()
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn sender_role(mut self, role: SenderRole) -> Self {
        self.sender_role = Some(role);
        self
    }

    /// Prove the filter carries a tenant constraint. `operation` names the
    /// store call for the error message.
    pub fn require_tenant(self, operation: &'static str) -> Result<TenantFilter, MemoryError> {
        let organization_id = match self.organization_id {
            Some(org) if !org.trim().is_empty() => org,
            _ => return Err(MemoryError::MissingTenantFilter(operation)),
        };

        if matches!(self.user_id.as_deref(), Some(u) if u.trim().is_empty()) {
            return Err(MemoryError::InvalidInput(
                "filter user_id must not be blank".to_string(),
            ));
        }

        Ok(TenantFilter {
            organization_id,
            user_id: self.user_id,
            sender_role: self.sender_role,
        })
    }
}

/// A filter proven to constrain `organization_id` exactly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantFilter {
    organization_id: String,
    user_id: Option<String>,
    sender_role: Option<SenderRole>,
}

impl TenantFilter {
    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn sender_role(&self) -> Option<SenderRole> {
        self.sender_role
    }

    /// Evaluate against a record's metadata
    pub fn matches(&self, metadata: &RecordMetadata) -> bool {
        metadata.organization_id == self.organization_id
            && self.user_id.as_deref().map_or(true, |u| metadata.user_id == u)
            && self.sender_role.map_or(true, |r| metadata.sender_role == r)
    }
}

impl std::fmt::Display for TenantFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "organization_id={}", self.organization_id)?;
        if let Some(user) = &self.user_id {
            write!(f, " user_id={}", user)?;
        }
        if let Some(role) = self.sender_role {
            write!(f, " sender_role={}", role)?;
        }
        Ok(())
    }
}
