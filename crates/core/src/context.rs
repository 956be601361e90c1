use serde::{Deserialize, Serialize};

/// Request metadata captured at the request boundary.
///
/// Audit capture reads the actor and origin from this value only; nothing is
/// taken from connection or session state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    actor_id: Option<String>,
    client_ip: Option<String>,
    user_agent: Option<String>,
}

impl RequestContext {
    /// Creates a context for an authenticated actor.
    #[must_use]
    pub fn for_actor(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            client_ip: None,
            user_agent: None,
        }
    }

    /// Creates a context for system-initiated work with no human actor.
    #[must_use]
    pub fn system() -> Self {
        Self::default()
    }

    /// Attaches the client address reported by the request boundary.
    #[must_use]
    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    /// Attaches the client user agent reported by the request boundary.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Returns the acting principal id, if any.
    #[must_use]
    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    /// Returns the client address, if any.
    #[must_use]
    pub fn client_ip(&self) -> Option<&str> {
        self.client_ip.as_deref()
    }

    /// Returns the client user agent, if any.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}
