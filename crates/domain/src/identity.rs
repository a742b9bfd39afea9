use serde::{Deserialize, Serialize};

use crate::auth::Role;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub user_id: String,
    pub username: String,
}

impl ActorIdentity {
    pub fn with_user_id(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            user_id: user_id.clone(),
            username: user_id,
        }
    }
}

/// Caller identity plus the externally-owned facts that gate ledger writes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerActor {
    pub identity: ActorIdentity,
    pub role: Role,
    pub profile_complete: bool,
}

impl LedgerActor {
    pub fn new(identity: ActorIdentity, role: Role, profile_complete: bool) -> Self {
        Self {
            identity,
            role,
            profile_complete,
        }
    }

    pub fn system() -> Self {
        Self::new(ActorIdentity::with_user_id("system"), Role::System, true)
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }
}
