use std::str::FromStr;

use bastion_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Fixed role set assigned to every principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full administrative access.
    Admin,
    /// Manages the sales organisation and its pipeline.
    SalesManager,
    /// Manages marketing programmes and campaigns.
    MarketingManager,
    /// Read-oriented reporting role.
    Analyst,
    /// Works an individual book of contacts, leads and deals.
    SalesRep,
    /// Executes marketing campaigns.
    MarketingSpecialist,
    /// Supports existing customers.
    CustomerSuccess,
}

impl Role {
    /// Returns a stable storage value for this role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::SalesManager => "sales_manager",
            Self::MarketingManager => "marketing_manager",
            Self::Analyst => "analyst",
            Self::SalesRep => "sales_rep",
            Self::MarketingSpecialist => "marketing_specialist",
            Self::CustomerSuccess => "customer_success",
        }
    }

    /// Returns all known roles.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[Role] = &[
            Role::Admin,
            Role::SalesManager,
            Role::MarketingManager,
            Role::Analyst,
            Role::SalesRep,
            Role::MarketingSpecialist,
            Role::CustomerSuccess,
        ];

        ALL
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Self::Admin),
            "sales_manager" => Ok(Self::SalesManager),
            "marketing_manager" => Ok(Self::MarketingManager),
            "analyst" => Ok(Self::Analyst),
            "sales_rep" => Ok(Self::SalesRep),
            "marketing_specialist" => Ok(Self::MarketingSpecialist),
            "customer_success" => Ok(Self::CustomerSuccess),
            _ => Err(AppError::Validation(format!("unknown role value '{value}'"))),
        }
    }
}

/// Authenticated actor evaluated by access policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    principal_id: NonEmptyString,
    role: Role,
}

impl Principal {
    /// Creates a principal with a validated identifier.
    pub fn new(principal_id: impl Into<String>, role: Role) -> AppResult<Self> {
        Ok(Self {
            principal_id: NonEmptyString::new(principal_id)?,
            role,
        })
    }

    /// Returns the stable principal identifier.
    #[must_use]
    pub fn principal_id(&self) -> &str {
        self.principal_id.as_str()
    }

    /// Returns the assigned role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns a copy carrying a different role.
    ///
    /// Role changes go through the audited admin path; this only builds the
    /// resulting value.
    #[must_use]
    pub fn with_role(&self, role: Role) -> Self {
        Self {
            principal_id: self.principal_id.clone(),
            role,
        }
    }
}
