use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use bastion_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known resource type names.
pub mod resource_types {
    /// Customer contact records.
    pub const CONTACT: &str = "contact";
    /// Sales leads.
    pub const LEAD: &str = "lead";
    /// Pipeline deals.
    pub const DEAL: &str = "deal";
    /// Marketing campaigns.
    pub const CAMPAIGN: &str = "campaign";
    /// Follow-up tasks.
    pub const TASK: &str = "task";
    /// Principal role assignments.
    pub const PRINCIPAL: &str = "principal";
    /// Envelope encryption keys and the secrets sealed under them.
    pub const ENCRYPTION_KEY: &str = "encryption_key";
}

const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validates a lowercase storage-safe identifier.
///
/// Accepted identifiers are interpolated into DDL and maintenance statements,
/// so only `[a-z][a-z0-9_]*` up to 63 bytes is allowed.
pub fn validate_identifier(kind: &str, value: &str) -> AppResult<()> {
    let mut chars = value.chars();
    let starts_with_letter = chars.next().is_some_and(|first| first.is_ascii_lowercase());
    let rest_is_valid = chars.all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    });

    if !starts_with_letter || !rest_is_valid || value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(AppError::Validation(format!(
            "{kind} '{value}' must match [a-z][a-z0-9_]* and be at most {MAX_IDENTIFIER_LENGTH} characters"
        )));
    }

    Ok(())
}

/// Logical resource type protected by access policies and audit capture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceType(String);

impl ResourceType {
    /// Creates a validated resource type.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        validate_identifier("resource type", value.as_str())?;
        Ok(Self(value))
    }

    /// Returns the resource type name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for ResourceType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Static registry entry binding a resource type to its storage table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedResource {
    resource_type: ResourceType,
    storage_table: String,
}

impl ProtectedResource {
    /// Creates a registry entry with validated names.
    pub fn new(resource_type: &str, storage_table: &str) -> AppResult<Self> {
        validate_identifier("storage table", storage_table)?;
        Ok(Self {
            resource_type: ResourceType::new(resource_type)?,
            storage_table: storage_table.to_owned(),
        })
    }

    /// Returns the resource type.
    #[must_use]
    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    /// Returns the storage table backing the resource type.
    #[must_use]
    pub fn storage_table(&self) -> &str {
        self.storage_table.as_str()
    }
}

/// Explicit list of protected resources every component iterates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedResourceRegistry {
    resources: Vec<ProtectedResource>,
}

impl ProtectedResourceRegistry {
    /// Creates a registry, rejecting duplicate resource types or tables.
    pub fn new(resources: Vec<ProtectedResource>) -> AppResult<Self> {
        let mut seen_types = HashSet::new();
        let mut seen_tables = HashSet::new();

        for resource in &resources {
            if !seen_types.insert(resource.resource_type().as_str()) {
                return Err(AppError::Validation(format!(
                    "resource type '{}' is registered more than once",
                    resource.resource_type()
                )));
            }
            if !seen_tables.insert(resource.storage_table()) {
                return Err(AppError::Validation(format!(
                    "storage table '{}' is registered more than once",
                    resource.storage_table()
                )));
            }
        }

        Ok(Self { resources })
    }

    /// Returns the CRM registry shipped with the platform.
    pub fn standard() -> AppResult<Self> {
        Self::new(vec![
            ProtectedResource::new(resource_types::CONTACT, "contacts")?,
            ProtectedResource::new(resource_types::LEAD, "leads")?,
            ProtectedResource::new(resource_types::DEAL, "deals")?,
            ProtectedResource::new(resource_types::CAMPAIGN, "campaigns")?,
            ProtectedResource::new(resource_types::TASK, "tasks")?,
        ])
    }

    /// Finds the entry for one resource type.
    #[must_use]
    pub fn find(&self, resource_type: &ResourceType) -> Option<&ProtectedResource> {
        self.resources
            .iter()
            .find(|resource| resource.resource_type() == resource_type)
    }

    /// Returns the entry for one resource type or a validation error.
    pub fn require(&self, resource_type: &ResourceType) -> AppResult<&ProtectedResource> {
        self.find(resource_type).ok_or_else(|| {
            AppError::Validation(format!(
                "resource type '{resource_type}' is not a registered protected resource"
            ))
        })
    }

    /// Iterates entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ProtectedResource> {
        self.resources.iter()
    }

    /// Returns the storage tables in declaration order.
    #[must_use]
    pub fn storage_tables(&self) -> Vec<String> {
        self.resources
            .iter()
            .map(|resource| resource.storage_table().to_owned())
            .collect()
    }
}

/// Stored protected resource document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedRecord {
    /// Resource type of the record.
    pub resource_type: ResourceType,
    /// Stable record identifier.
    pub record_id: String,
    /// Principal that created the record.
    pub created_by: String,
    /// Opaque business payload owned by the entity schema.
    pub data: Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ProtectedRecord {
    /// Returns the snapshot persisted into audit records.
    #[must_use]
    pub fn audit_snapshot(&self) -> Value {
        serde_json::json!({
            "record_id": self.record_id,
            "created_by": self.created_by,
            "data": self.data,
        })
    }
}
