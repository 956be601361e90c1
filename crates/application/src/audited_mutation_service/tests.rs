use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bastion_core::{AppError, AppResult, RequestContext};
use bastion_domain::{
    AuditOperation, AuditPartition, AuditRecord, Principal, ProtectedRecord, ProtectedResource,
    ProtectedResourceRegistry, ResourceType, Role,
};
use serde_json::json;
use tokio::sync::Mutex;

use super::AuditedMutationService;
use crate::{
    AccessPolicyEngine, AuditQuery, AuditRecordReader, AuditTransaction, ChangeCaptureLog,
    MutationStore, MutationTransaction, PartitionCatalog, PartitionManager,
};

type RecordKey = (String, String);

#[derive(Default)]
struct FakeState {
    records: HashMap<RecordKey, ProtectedRecord>,
    roles: HashMap<String, Role>,
    audit: Vec<AuditRecord>,
    partitions: Vec<AuditPartition>,
}

#[derive(Default)]
struct FakeStore {
    state: Arc<Mutex<FakeState>>,
    fail_audit: bool,
}

enum Staged {
    Put(RecordKey, ProtectedRecord),
    Remove(RecordKey),
    Role(String, Role),
    Audit(AuditRecord),
}

struct FakeTransaction {
    state: Arc<Mutex<FakeState>>,
    staged: Vec<Staged>,
    fail_audit: bool,
}

fn key(resource: &ProtectedResource, record_id: &str) -> RecordKey {
    (resource.storage_table().to_owned(), record_id.to_owned())
}

#[async_trait]
impl AuditTransaction for FakeTransaction {
    async fn append_audit_record(
        &mut self,
        _partition: &AuditPartition,
        record: &AuditRecord,
    ) -> AppResult<()> {
        if self.fail_audit {
            return Err(AppError::Internal("audit table unavailable".to_owned()));
        }
        self.staged.push(Staged::Audit(record.clone()));
        Ok(())
    }
}

#[async_trait]
impl MutationTransaction for FakeTransaction {
    async fn find_record(
        &mut self,
        resource: &ProtectedResource,
        record_id: &str,
    ) -> AppResult<Option<ProtectedRecord>> {
        let wanted = key(resource, record_id);
        for staged in self.staged.iter().rev() {
            match staged {
                Staged::Put(staged_key, record) if *staged_key == wanted => {
                    return Ok(Some(record.clone()));
                }
                Staged::Remove(staged_key) if *staged_key == wanted => return Ok(None),
                _ => {}
            }
        }
        Ok(self.state.lock().await.records.get(&wanted).cloned())
    }

    async fn insert_record(
        &mut self,
        resource: &ProtectedResource,
        record: &ProtectedRecord,
    ) -> AppResult<()> {
        self.staged.push(Staged::Put(
            key(resource, record.record_id.as_str()),
            record.clone(),
        ));
        Ok(())
    }

    async fn update_record(
        &mut self,
        resource: &ProtectedResource,
        record: &ProtectedRecord,
    ) -> AppResult<()> {
        self.insert_record(resource, record).await
    }

    async fn delete_record(
        &mut self,
        resource: &ProtectedResource,
        record_id: &str,
    ) -> AppResult<()> {
        self.staged.push(Staged::Remove(key(resource, record_id)));
        Ok(())
    }

    async fn find_principal_role(&mut self, principal_id: &str) -> AppResult<Option<Role>> {
        for staged in self.staged.iter().rev() {
            if let Staged::Role(staged_id, role) = staged
                && staged_id == principal_id
            {
                return Ok(Some(*role));
            }
        }
        Ok(self.state.lock().await.roles.get(principal_id).copied())
    }

    async fn save_principal_role(&mut self, principal_id: &str, role: Role) -> AppResult<()> {
        self.staged.push(Staged::Role(principal_id.to_owned(), role));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let mut state = self.state.lock().await;
        for staged in self.staged {
            match staged {
                Staged::Put(record_key, record) => {
                    state.records.insert(record_key, record);
                }
                Staged::Remove(record_key) => {
                    state.records.remove(&record_key);
                }
                Staged::Role(principal_id, role) => {
                    state.roles.insert(principal_id, role);
                }
                Staged::Audit(record) => state.audit.push(record),
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl MutationStore for FakeStore {
    async fn begin(&self) -> AppResult<Box<dyn MutationTransaction>> {
        Ok(Box::new(FakeTransaction {
            state: self.state.clone(),
            staged: Vec::new(),
            fail_audit: self.fail_audit,
        }))
    }

    async fn find_record(
        &self,
        resource: &ProtectedResource,
        record_id: &str,
    ) -> AppResult<Option<ProtectedRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .records
            .get(&key(resource, record_id))
            .cloned())
    }

    async fn find_principal_role(&self, principal_id: &str) -> AppResult<Option<Role>> {
        Ok(self.state.lock().await.roles.get(principal_id).copied())
    }
}

#[async_trait]
impl PartitionCatalog for FakeStore {
    async fn list_partitions(&self) -> AppResult<Vec<AuditPartition>> {
        Ok(self.state.lock().await.partitions.clone())
    }

    async fn create_partition(&self, partition: AuditPartition) -> AppResult<()> {
        self.state.lock().await.partitions.push(partition);
        Ok(())
    }
}

#[async_trait]
impl AuditRecordReader for FakeStore {
    async fn list_records(
        &self,
        _partitions: &[AuditPartition],
        query: &AuditQuery,
    ) -> AppResult<Vec<AuditRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .audit
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect())
    }
}

fn build_service(fail_audit: bool) -> AppResult<(AuditedMutationService, Arc<FakeStore>)> {
    let store = Arc::new(FakeStore {
        fail_audit,
        ..FakeStore::default()
    });
    let registry = ProtectedResourceRegistry::standard()?;
    let manager = Arc::new(PartitionManager::new(store.clone()));
    let log = Arc::new(ChangeCaptureLog::new(manager, store.clone()));
    let service = AuditedMutationService::new(
        registry.clone(),
        AccessPolicyEngine::standard(&registry)?,
        store.clone(),
        log,
    )?;
    Ok((service, store))
}

fn contact() -> AppResult<ResourceType> {
    ResourceType::new("contact")
}

#[tokio::test]
async fn create_commits_record_with_one_audit_record() -> AppResult<()> {
    let (service, store) = build_service(false)?;
    let rep = Principal::new("p1", Role::SalesRep)?;
    let context = RequestContext::for_actor("p1").with_client_ip("10.1.2.3");

    let record = service
        .create_record(&context, &rep, &contact()?, json!({"name": "Ada"}))
        .await?;

    let state = store.state.lock().await;
    assert_eq!(state.records.len(), 1);
    assert_eq!(state.audit.len(), 1);
    let audit = &state.audit[0];
    assert_eq!(audit.operation(), AuditOperation::Create);
    assert_eq!(audit.resource_id(), record.record_id);
    assert_eq!(audit.origin_ip(), Some("10.1.2.3"));
    assert!(audit.before_snapshot().is_none());
    assert_eq!(audit.after_snapshot(), Some(&record.audit_snapshot()));
    Ok(())
}

#[tokio::test]
async fn non_owner_update_is_denied_without_audit() -> AppResult<()> {
    let (service, store) = build_service(false)?;
    let owner = Principal::new("p1", Role::SalesRep)?;
    let other = Principal::new("p2", Role::SalesRep)?;
    let record = service
        .create_record(
            &RequestContext::for_actor("p1"),
            &owner,
            &contact()?,
            json!({"name": "Ada"}),
        )
        .await?;

    let result = service
        .update_record(
            &RequestContext::for_actor("p2"),
            &other,
            &contact()?,
            record.record_id.as_str(),
            json!({"name": "Eve"}),
        )
        .await;

    assert!(matches!(result, Err(AppError::PermissionDenied(_))));
    let state = store.state.lock().await;
    assert_eq!(state.audit.len(), 1);
    assert!(
        state
            .records
            .values()
            .all(|stored| stored.data == json!({"name": "Ada"}))
    );
    Ok(())
}

#[tokio::test]
async fn manager_update_records_before_and_after() -> AppResult<()> {
    let (service, store) = build_service(false)?;
    let owner = Principal::new("p1", Role::SalesRep)?;
    let manager = Principal::new("m1", Role::SalesManager)?;
    let record = service
        .create_record(
            &RequestContext::for_actor("p1"),
            &owner,
            &contact()?,
            json!({"stage": "new"}),
        )
        .await?;

    let updated = service
        .update_record(
            &RequestContext::for_actor("m1"),
            &manager,
            &contact()?,
            record.record_id.as_str(),
            json!({"stage": "qualified"}),
        )
        .await?;

    assert_eq!(updated.created_by, "p1");
    let state = store.state.lock().await;
    let audit = &state.audit[1];
    assert_eq!(audit.operation(), AuditOperation::Update);
    assert_eq!(audit.actor_id(), Some("m1"));
    assert_eq!(audit.before_snapshot(), Some(&record.audit_snapshot()));
    assert_eq!(audit.after_snapshot(), Some(&updated.audit_snapshot()));
    Ok(())
}

#[tokio::test]
async fn audit_failure_aborts_mutation() -> AppResult<()> {
    let (service, store) = build_service(true)?;
    let rep = Principal::new("p1", Role::SalesRep)?;

    let result = service
        .create_record(
            &RequestContext::for_actor("p1"),
            &rep,
            &contact()?,
            json!({"name": "Ada"}),
        )
        .await;

    assert!(matches!(result, Err(AppError::AuditCaptureFailed(_))));
    let state = store.state.lock().await;
    assert!(state.records.is_empty());
    assert!(state.audit.is_empty());
    Ok(())
}

#[tokio::test]
async fn delete_records_before_snapshot_only() -> AppResult<()> {
    let (service, store) = build_service(false)?;
    let owner = Principal::new("p1", Role::SalesRep)?;
    let context = RequestContext::for_actor("p1");
    let record = service
        .create_record(&context, &owner, &contact()?, json!({"name": "Ada"}))
        .await?;

    service
        .delete_record(&context, &owner, &contact()?, record.record_id.as_str())
        .await?;

    let missing = service
        .read_record(&owner, &contact()?, record.record_id.as_str())
        .await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
    let state = store.state.lock().await;
    let audit = &state.audit[1];
    assert_eq!(audit.operation(), AuditOperation::Delete);
    assert!(audit.after_snapshot().is_none());
    assert!(audit.before_snapshot().is_some());
    Ok(())
}

#[tokio::test]
async fn role_change_requires_admin_and_is_audited() -> AppResult<()> {
    let (service, store) = build_service(false)?;
    let manager = Principal::new("m1", Role::SalesManager)?;
    let admin = Principal::new("a1", Role::Admin)?;
    let target = Principal::new("p1", Role::SalesRep)?;

    let denied = service
        .change_role(
            &RequestContext::for_actor("m1"),
            &manager,
            &target,
            Role::SalesManager,
        )
        .await;
    assert!(matches!(denied, Err(AppError::PermissionDenied(_))));

    let promoted = service
        .change_role(
            &RequestContext::for_actor("a1"),
            &admin,
            &target,
            Role::SalesManager,
        )
        .await?;

    assert_eq!(promoted.role(), Role::SalesManager);
    let state = store.state.lock().await;
    assert_eq!(state.roles.get("p1"), Some(&Role::SalesManager));
    assert_eq!(state.audit.len(), 1);
    assert_eq!(state.audit[0].resource_type().as_str(), "principal");
    assert_eq!(state.audit[0].operation(), AuditOperation::Create);
    assert_eq!(
        state.audit[0].after_snapshot(),
        Some(&json!({"role": "sales_manager"}))
    );
    Ok(())
}

#[tokio::test]
async fn role_change_captures_stored_role_not_caller_copy() -> AppResult<()> {
    let (service, store) = build_service(false)?;
    let admin = Principal::new("a1", Role::Admin)?;
    store
        .state
        .lock()
        .await
        .roles
        .insert("p1".to_owned(), Role::Analyst);
    let stale_target = Principal::new("p1", Role::SalesRep)?;

    service
        .change_role(
            &RequestContext::for_actor("a1"),
            &admin,
            &stale_target,
            Role::CustomerSuccess,
        )
        .await?;
    let unchanged = service
        .change_role(
            &RequestContext::for_actor("a1"),
            &admin,
            &stale_target,
            Role::CustomerSuccess,
        )
        .await?;

    assert_eq!(unchanged.role(), Role::CustomerSuccess);
    let state = store.state.lock().await;
    assert_eq!(state.audit.len(), 1);
    assert_eq!(state.audit[0].operation(), AuditOperation::Update);
    assert_eq!(
        state.audit[0].before_snapshot(),
        Some(&json!({"role": "analyst"}))
    );
    assert_eq!(state.roles.get("p1"), Some(&Role::CustomerSuccess));
    Ok(())
}

#[tokio::test]
async fn mismatched_context_actor_is_rejected() -> AppResult<()> {
    let (service, _) = build_service(false)?;
    let rep = Principal::new("p1", Role::SalesRep)?;

    let result = service
        .create_record(
            &RequestContext::for_actor("someone-else"),
            &rep,
            &contact()?,
            json!({}),
        )
        .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    Ok(())
}
