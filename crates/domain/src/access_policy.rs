use std::collections::BTreeSet;

use bastion_core::AppResult;
use serde::{Deserialize, Serialize};

use crate::principal::{Principal, Role};
use crate::resource::{ResourceType, resource_types};

/// Ownership-or-elevation predicate bound to one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    resource_type: ResourceType,
    elevated_roles: BTreeSet<Role>,
}

impl AccessPolicy {
    /// Creates a policy granting full access to the listed roles.
    pub fn new(
        resource_type: &str,
        elevated_roles: impl IntoIterator<Item = Role>,
    ) -> AppResult<Self> {
        Ok(Self {
            resource_type: ResourceType::new(resource_type)?,
            elevated_roles: elevated_roles.into_iter().collect(),
        })
    }

    /// Returns the protected resource type.
    #[must_use]
    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    /// Returns the roles that bypass the ownership check.
    #[must_use]
    pub fn elevated_roles(&self) -> &BTreeSet<Role> {
        &self.elevated_roles
    }

    /// Evaluates the policy for a principal and the resource creator.
    ///
    /// `resource_owner` is `None` for resources without a creator, which only
    /// elevated roles may touch.
    #[must_use]
    pub fn allows(&self, principal: &Principal, resource_owner: Option<&str>) -> bool {
        if self.elevated_roles.contains(&principal.role()) {
            return true;
        }

        resource_owner.is_some_and(|owner| owner == principal.principal_id())
    }

    /// Returns the policy set shipped with the platform.
    pub fn standard_catalog() -> AppResult<Vec<Self>> {
        Ok(vec![
            Self::new(resource_types::CONTACT, [Role::Admin, Role::SalesManager])?,
            Self::new(
                resource_types::LEAD,
                [Role::Admin, Role::SalesManager, Role::MarketingManager],
            )?,
            Self::new(resource_types::DEAL, [Role::Admin, Role::SalesManager])?,
            Self::new(resource_types::CAMPAIGN, [Role::Admin, Role::MarketingManager])?,
            Self::new(
                resource_types::TASK,
                [Role::Admin, Role::SalesManager, Role::CustomerSuccess],
            )?,
            Self::new(resource_types::PRINCIPAL, [Role::Admin])?,
            Self::new(resource_types::ENCRYPTION_KEY, [Role::Admin])?,
        ])
    }
}
