use std::sync::Arc;

use bastion_core::{AppError, AppResult, RequestContext};
use bastion_domain::{
    AuditOperation, ChangeCapture, Principal, ProtectedRecord, ProtectedResource,
    ProtectedResourceRegistry, ResourceType, Role, resource_types,
};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use crate::{AccessPolicyEngine, ChangeCaptureLog, MutationStore, MutationTransaction};

#[cfg(test)]
mod tests;

/// Write path for protected resources.
///
/// Every mutation is authorized, applied and audited inside one transaction;
/// a failure at any step rolls the whole unit back.
pub struct AuditedMutationService {
    registry: ProtectedResourceRegistry,
    access_policy: AccessPolicyEngine,
    store: Arc<dyn MutationStore>,
    change_capture: Arc<ChangeCaptureLog>,
}

impl AuditedMutationService {
    /// Creates the service, requiring a policy for every registered type.
    pub fn new(
        registry: ProtectedResourceRegistry,
        access_policy: AccessPolicyEngine,
        store: Arc<dyn MutationStore>,
        change_capture: Arc<ChangeCaptureLog>,
    ) -> AppResult<Self> {
        access_policy.ensure_covers(&registry)?;
        Ok(Self {
            registry,
            access_policy,
            store,
            change_capture,
        })
    }

    /// Creates a record owned by the acting principal.
    pub async fn create_record(
        &self,
        context: &RequestContext,
        principal: &Principal,
        resource_type: &ResourceType,
        data: Value,
    ) -> AppResult<ProtectedRecord> {
        ensure_context_actor(context, principal)?;
        let resource = self.registry.require(resource_type)?.clone();
        self.access_policy
            .authorize(principal, resource_type, Some(principal.principal_id()))?;

        let now = Utc::now();
        let record = ProtectedRecord {
            resource_type: resource_type.clone(),
            record_id: Uuid::new_v4().to_string(),
            created_by: principal.principal_id().to_owned(),
            data,
            created_at: now,
            updated_at: now,
        };

        let mut transaction = self.store.begin().await?;
        let outcome = self
            .create_in_transaction(transaction.as_mut(), context, &resource, &record)
            .await;
        finish_transaction(transaction, outcome).await?;
        Ok(record)
    }

    /// Replaces the data of a record the principal may access.
    pub async fn update_record(
        &self,
        context: &RequestContext,
        principal: &Principal,
        resource_type: &ResourceType,
        record_id: &str,
        data: Value,
    ) -> AppResult<ProtectedRecord> {
        ensure_context_actor(context, principal)?;
        let resource = self.registry.require(resource_type)?.clone();

        let mut transaction = self.store.begin().await?;
        let outcome = self
            .update_in_transaction(
                transaction.as_mut(),
                context,
                principal,
                &resource,
                record_id,
                data,
            )
            .await;
        finish_transaction(transaction, outcome).await
    }

    /// Deletes a record the principal may access.
    pub async fn delete_record(
        &self,
        context: &RequestContext,
        principal: &Principal,
        resource_type: &ResourceType,
        record_id: &str,
    ) -> AppResult<()> {
        ensure_context_actor(context, principal)?;
        let resource = self.registry.require(resource_type)?.clone();

        let mut transaction = self.store.begin().await?;
        let outcome = self
            .delete_in_transaction(transaction.as_mut(), context, principal, &resource, record_id)
            .await;
        finish_transaction(transaction, outcome).await
    }

    /// Reads a record the principal may access.
    pub async fn read_record(
        &self,
        principal: &Principal,
        resource_type: &ResourceType,
        record_id: &str,
    ) -> AppResult<ProtectedRecord> {
        let resource = self.registry.require(resource_type)?;
        let record = self
            .store
            .find_record(resource, record_id)
            .await?
            .ok_or_else(|| not_found(resource, record_id))?;
        self.access_policy
            .authorize(principal, resource_type, Some(record.created_by.as_str()))?;
        Ok(record)
    }

    /// Changes a principal's role as an audited administrative action.
    ///
    /// The stored role is read and locked inside the same transaction that
    /// writes the new one. A principal with no stored role gets a `Create`
    /// audit record; otherwise the old and new roles are captured as an `Update`.
    pub async fn change_role(
        &self,
        context: &RequestContext,
        administrator: &Principal,
        target: &Principal,
        role: Role,
    ) -> AppResult<Principal> {
        ensure_context_actor(context, administrator)?;
        let principal_type = ResourceType::new(resource_types::PRINCIPAL)?;
        self.access_policy
            .authorize(administrator, &principal_type, None)?;

        let mut transaction = self.store.begin().await?;
        let outcome = self
            .change_role_in_transaction(
                transaction.as_mut(),
                context,
                principal_type,
                target.principal_id(),
                role,
            )
            .await;
        finish_transaction(transaction, outcome).await?;

        Ok(target.with_role(role))
    }

    async fn create_in_transaction(
        &self,
        transaction: &mut dyn MutationTransaction,
        context: &RequestContext,
        resource: &ProtectedResource,
        record: &ProtectedRecord,
    ) -> AppResult<()> {
        transaction.insert_record(resource, record).await?;
        self.change_capture
            .record(
                transaction,
                context,
                ChangeCapture {
                    resource_type: resource.resource_type().clone(),
                    resource_id: record.record_id.clone(),
                    operation: AuditOperation::Create,
                    before: None,
                    after: Some(record.audit_snapshot()),
                    description: None,
                },
            )
            .await?;
        Ok(())
    }

    async fn change_role_in_transaction(
        &self,
        transaction: &mut dyn MutationTransaction,
        context: &RequestContext,
        principal_type: ResourceType,
        principal_id: &str,
        role: Role,
    ) -> AppResult<()> {
        let current_role = transaction.find_principal_role(principal_id).await?;
        let capture = match current_role {
            Some(current) if current == role => return Ok(()),
            Some(current) => ChangeCapture {
                resource_type: principal_type,
                resource_id: principal_id.to_owned(),
                operation: AuditOperation::Update,
                before: Some(json!({ "role": current.as_str() })),
                after: Some(json!({ "role": role.as_str() })),
                description: Some(format!(
                    "role changed from '{}' to '{}'",
                    current.as_str(),
                    role.as_str()
                )),
            },
            None => ChangeCapture {
                resource_type: principal_type,
                resource_id: principal_id.to_owned(),
                operation: AuditOperation::Create,
                before: None,
                after: Some(json!({ "role": role.as_str() })),
                description: Some(format!("role '{}' assigned", role.as_str())),
            },
        };

        transaction.save_principal_role(principal_id, role).await?;
        self.change_capture
            .record(transaction, context, capture)
            .await?;
        Ok(())
    }

    async fn update_in_transaction(
        &self,
        transaction: &mut dyn MutationTransaction,
        context: &RequestContext,
        principal: &Principal,
        resource: &ProtectedResource,
        record_id: &str,
        data: Value,
    ) -> AppResult<ProtectedRecord> {
        let existing = transaction
            .find_record(resource, record_id)
            .await?
            .ok_or_else(|| not_found(resource, record_id))?;
        self.access_policy.authorize(
            principal,
            resource.resource_type(),
            Some(existing.created_by.as_str()),
        )?;

        let updated = ProtectedRecord {
            data,
            updated_at: Utc::now(),
            ..existing.clone()
        };
        transaction.update_record(resource, &updated).await?;
        self.change_capture
            .record(
                transaction,
                context,
                ChangeCapture {
                    resource_type: resource.resource_type().clone(),
                    resource_id: record_id.to_owned(),
                    operation: AuditOperation::Update,
                    before: Some(existing.audit_snapshot()),
                    after: Some(updated.audit_snapshot()),
                    description: None,
                },
            )
            .await?;
        Ok(updated)
    }

    async fn delete_in_transaction(
        &self,
        transaction: &mut dyn MutationTransaction,
        context: &RequestContext,
        principal: &Principal,
        resource: &ProtectedResource,
        record_id: &str,
    ) -> AppResult<()> {
        let existing = transaction
            .find_record(resource, record_id)
            .await?
            .ok_or_else(|| not_found(resource, record_id))?;
        self.access_policy.authorize(
            principal,
            resource.resource_type(),
            Some(existing.created_by.as_str()),
        )?;

        transaction.delete_record(resource, record_id).await?;
        self.change_capture
            .record(
                transaction,
                context,
                ChangeCapture {
                    resource_type: resource.resource_type().clone(),
                    resource_id: record_id.to_owned(),
                    operation: AuditOperation::Delete,
                    before: Some(existing.audit_snapshot()),
                    after: None,
                    description: None,
                },
            )
            .await?;
        Ok(())
    }
}

fn ensure_context_actor(context: &RequestContext, principal: &Principal) -> AppResult<()> {
    if context.actor_id() == Some(principal.principal_id()) {
        return Ok(());
    }

    Err(AppError::Validation(format!(
        "request context actor {:?} does not match principal '{}'",
        context.actor_id(),
        principal.principal_id()
    )))
}

fn not_found(resource: &ProtectedResource, record_id: &str) -> AppError {
    AppError::NotFound(format!(
        "{} '{record_id}' does not exist",
        resource.resource_type()
    ))
}

async fn finish_transaction<T>(
    transaction: Box<dyn MutationTransaction>,
    outcome: AppResult<T>,
) -> AppResult<T> {
    match outcome {
        Ok(value) => {
            transaction.commit().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = transaction.rollback().await {
                warn!(
                    error = %rollback_error,
                    "failed to roll back protected resource transaction"
                );
            }
            Err(error)
        }
    }
}
