use std::str::FromStr;

use bastion_core::{AppError, AppResult, RequestContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::resource::ResourceType;

/// Mutating operation captured by the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOperation {
    /// Resource was created.
    Create,
    /// Resource was modified.
    Update,
    /// Resource was removed.
    Delete,
}

impl AuditOperation {
    /// Returns a stable storage value for this operation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Returns whether a before snapshot must accompany the operation.
    #[must_use]
    pub fn requires_before(&self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }

    /// Returns whether an after snapshot must accompany the operation.
    #[must_use]
    pub fn requires_after(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

impl FromStr for AuditOperation {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(AppError::Validation(format!(
                "unknown audit operation '{value}'"
            ))),
        }
    }
}

/// Stable audit record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuditRecordId(Uuid);

impl AuditRecordId {
    /// Creates a random record identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AuditRecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditRecordId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Mutation facts handed to the change-capture log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeCapture {
    /// Mutated resource type.
    pub resource_type: ResourceType,
    /// Mutated resource identifier.
    pub resource_id: String,
    /// Mutation kind.
    pub operation: AuditOperation,
    /// State before the mutation.
    pub before: Option<Value>,
    /// State after the mutation.
    pub after: Option<Value>,
    /// Optional free-form description.
    pub description: Option<String>,
}

impl ChangeCapture {
    /// Validates the before/after presence rules for the operation.
    pub fn validate(&self) -> AppResult<()> {
        if self.resource_id.trim().is_empty() {
            return Err(AppError::Validation(
                "audited resource id must not be empty".to_owned(),
            ));
        }

        match (self.operation.requires_before(), self.before.is_some()) {
            (true, false) => {
                return Err(AppError::Validation(format!(
                    "{} of '{}' requires a before snapshot",
                    self.operation.as_str(),
                    self.resource_type
                )));
            }
            (false, true) => {
                return Err(AppError::Validation(format!(
                    "{} of '{}' must not carry a before snapshot",
                    self.operation.as_str(),
                    self.resource_type
                )));
            }
            _ => {}
        }

        match (self.operation.requires_after(), self.after.is_some()) {
            (true, false) => Err(AppError::Validation(format!(
                "{} of '{}' requires an after snapshot",
                self.operation.as_str(),
                self.resource_type
            ))),
            (false, true) => Err(AppError::Validation(format!(
                "{} of '{}' must not carry an after snapshot",
                self.operation.as_str(),
                self.resource_type
            ))),
            _ => Ok(()),
        }
    }
}

/// Immutable audit fact persisted once per committed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    record_id: AuditRecordId,
    resource_type: ResourceType,
    resource_id: String,
    operation: AuditOperation,
    before_snapshot: Option<Value>,
    after_snapshot: Option<Value>,
    actor_id: Option<String>,
    occurred_at: DateTime<Utc>,
    origin_ip: Option<String>,
    origin_agent: Option<String>,
    description: Option<String>,
}

impl AuditRecord {
    /// Builds a record from a validated capture and the request context.
    pub fn capture(
        capture: ChangeCapture,
        context: &RequestContext,
        occurred_at: DateTime<Utc>,
    ) -> AppResult<Self> {
        capture.validate()?;

        Ok(Self {
            record_id: AuditRecordId::new(),
            resource_type: capture.resource_type,
            resource_id: capture.resource_id,
            operation: capture.operation,
            before_snapshot: capture.before,
            after_snapshot: capture.after,
            actor_id: context.actor_id().map(str::to_owned),
            occurred_at,
            origin_ip: context.client_ip().map(str::to_owned),
            origin_agent: context.user_agent().map(str::to_owned),
            description: capture.description,
        })
    }

    /// Rehydrates a persisted record, re-checking the presence rules.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        record_id: AuditRecordId,
        resource_type: ResourceType,
        resource_id: String,
        operation: AuditOperation,
        before_snapshot: Option<Value>,
        after_snapshot: Option<Value>,
        actor_id: Option<String>,
        occurred_at: DateTime<Utc>,
        origin_ip: Option<String>,
        origin_agent: Option<String>,
        description: Option<String>,
    ) -> AppResult<Self> {
        let capture = ChangeCapture {
            resource_type,
            resource_id,
            operation,
            before: before_snapshot,
            after: after_snapshot,
            description,
        };
        capture.validate()?;

        Ok(Self {
            record_id,
            resource_type: capture.resource_type,
            resource_id: capture.resource_id,
            operation: capture.operation,
            before_snapshot: capture.before,
            after_snapshot: capture.after,
            actor_id,
            occurred_at,
            origin_ip,
            origin_agent,
            description: capture.description,
        })
    }

    /// Returns the record identifier.
    #[must_use]
    pub fn record_id(&self) -> AuditRecordId {
        self.record_id
    }

    /// Returns the mutated resource type.
    #[must_use]
    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    /// Returns the mutated resource identifier.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        self.resource_id.as_str()
    }

    /// Returns the mutation kind.
    #[must_use]
    pub fn operation(&self) -> AuditOperation {
        self.operation
    }

    /// Returns the state before the mutation.
    #[must_use]
    pub fn before_snapshot(&self) -> Option<&Value> {
        self.before_snapshot.as_ref()
    }

    /// Returns the state after the mutation.
    #[must_use]
    pub fn after_snapshot(&self) -> Option<&Value> {
        self.after_snapshot.as_ref()
    }

    /// Returns the acting principal, if known.
    #[must_use]
    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    /// Returns the capture timestamp.
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Returns the client address, if known.
    #[must_use]
    pub fn origin_ip(&self) -> Option<&str> {
        self.origin_ip.as_deref()
    }

    /// Returns the client user agent, if known.
    #[must_use]
    pub fn origin_agent(&self) -> Option<&str> {
        self.origin_agent.as_deref()
    }

    /// Returns the optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use bastion_core::{AppResult, RequestContext};
    use chrono::Utc;
    use serde_json::json;

    use super::{AuditOperation, AuditRecord, ChangeCapture};
    use crate::resource::ResourceType;

    fn capture(
        operation: AuditOperation,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> AppResult<ChangeCapture> {
        Ok(ChangeCapture {
            resource_type: ResourceType::new("contact")?,
            resource_id: "c1".to_owned(),
            operation,
            before,
            after,
            description: None,
        })
    }

    #[test]
    fn create_requires_after_and_forbids_before() -> AppResult<()> {
        assert!(capture(AuditOperation::Create, None, Some(json!({})))?.validate().is_ok());
        assert!(capture(AuditOperation::Create, None, None)?.validate().is_err());
        assert!(
            capture(AuditOperation::Create, Some(json!({})), Some(json!({})))?
                .validate()
                .is_err()
        );
        Ok(())
    }

    #[test]
    fn update_requires_both_snapshots() -> AppResult<()> {
        assert!(
            capture(AuditOperation::Update, Some(json!({})), Some(json!({})))?
                .validate()
                .is_ok()
        );
        assert!(capture(AuditOperation::Update, None, Some(json!({})))?.validate().is_err());
        assert!(capture(AuditOperation::Update, Some(json!({})), None)?.validate().is_err());
        Ok(())
    }

    #[test]
    fn delete_requires_before_and_forbids_after() -> AppResult<()> {
        assert!(capture(AuditOperation::Delete, Some(json!({})), None)?.validate().is_ok());
        assert!(
            capture(AuditOperation::Delete, Some(json!({})), Some(json!({})))?
                .validate()
                .is_err()
        );
        Ok(())
    }

    #[test]
    fn record_copies_origin_from_context() -> AppResult<()> {
        let context = RequestContext::for_actor("p1")
            .with_client_ip("10.0.0.7")
            .with_user_agent("crm-web/4.2");
        let record = AuditRecord::capture(
            capture(AuditOperation::Create, None, Some(json!({"name": "Ada"})))?,
            &context,
            Utc::now(),
        )?;

        assert_eq!(record.actor_id(), Some("p1"));
        assert_eq!(record.origin_ip(), Some("10.0.0.7"));
        assert_eq!(record.origin_agent(), Some("crm-web/4.2"));
        assert!(record.before_snapshot().is_none());
        Ok(())
    }
}
