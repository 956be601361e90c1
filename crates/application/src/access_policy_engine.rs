use std::collections::HashMap;
use std::sync::Arc;

use bastion_core::{AppError, AppResult};
use bastion_domain::{AccessPolicy, Principal, ProtectedResourceRegistry, ResourceType};
use tracing::debug;


/// Evaluates ownership-or-elevation policies for every protected resource type.
#[derive(Debug, Clone)]
pub struct AccessPolicyEngine {
    policies: Arc<HashMap<ResourceType, AccessPolicy>>,
}

impl AccessPolicyEngine {
    /// Registers policies, rejecting a second policy for the same type.
    pub fn new(policies: Vec<AccessPolicy>) -> AppResult<Self> {
        let mut registered = HashMap::with_capacity(policies.len());
        for policy in policies {
            let resource_type = policy.resource_type().clone();
            if registered.insert(resource_type.clone(), policy).is_some() {
                return Err(AppError::Validation(format!(
                    "access policy for '{resource_type}' is registered twice"
                )));
            }
        }

        Ok(Self {
            policies: Arc::new(registered),
        })
    }

    /// Builds the engine from the shipped policy catalog, checked against the registry.
    pub fn standard(registry: &ProtectedResourceRegistry) -> AppResult<Self> {
        let engine = Self::new(AccessPolicy::standard_catalog()?)?;
        engine.ensure_covers(registry)?;
        Ok(engine)
    }

    /// Fails when a registered resource type has no policy.
    pub fn ensure_covers(&self, registry: &ProtectedResourceRegistry) -> AppResult<()> {
        let missing: Vec<&str> = registry
            .iter()
            .map(|resource| resource.resource_type())
            .filter(|resource_type| !self.policies.contains_key(*resource_type))
            .map(ResourceType::as_str)
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        Err(AppError::Validation(format!(
            "protected resource types without access policy: {}",
            missing.join(", ")
        )))
    }

    /// Returns the policy registered for a type.
    #[must_use]
    pub fn policy(&self, resource_type: &ResourceType) -> Option<&AccessPolicy> {
        self.policies.get(resource_type)
    }

    /// Returns whether the principal may act on the resource.
    ///
    /// Unregistered types are an error rather than an implicit allow.
    pub fn is_authorized(
        &self,
        principal: &Principal,
        resource_type: &ResourceType,
        resource_owner: Option<&str>,
    ) -> AppResult<bool> {
        let policy = self.policies.get(resource_type).ok_or_else(|| {
            AppError::NotFound(format!(
                "no access policy is registered for resource type '{resource_type}'"
            ))
        })?;

        Ok(policy.allows(principal, resource_owner))
    }

    /// Ensures the principal may act on the resource.
    pub fn authorize(
        &self,
        principal: &Principal,
        resource_type: &ResourceType,
        resource_owner: Option<&str>,
    ) -> AppResult<()> {
        if self.is_authorized(principal, resource_type, resource_owner)? {
            return Ok(());
        }

        debug!(
            principal_id = %principal.principal_id(),
            role = %principal.role().as_str(),
            resource_type = %resource_type,
            "access policy denied request"
        );
        Err(AppError::PermissionDenied(format!(
            "principal '{}' with role '{}' may not access '{resource_type}' owned by {}",
            principal.principal_id(),
            principal.role().as_str(),
            resource_owner.map_or_else(|| "nobody".to_owned(), |owner| format!("'{owner}'"))
        )))
    }
}
