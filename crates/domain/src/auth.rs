use serde::{Deserialize, Serialize};

/// Platform role of the caller, issued by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Anonymous,
    Citizen,
    Community,
    Official,
    Admin,
    System,
}

impl Role {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "anonymous" | "guest" => Some(Role::Anonymous),
            "citizen" | "user" => Some(Role::Citizen),
            "community" => Some(Role::Community),
            "official" | "platform_maintainer" => Some(Role::Official),
            "admin" => Some(Role::Admin),
            "system" => Some(Role::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Anonymous => "anonymous",
            Role::Citizen => "citizen",
            Role::Community => "community",
            Role::Official => "official",
            Role::Admin => "admin",
            Role::System => "system",
        }
    }

    pub fn can_vote(&self) -> bool {
        matches!(self, Role::Community)
    }

    pub fn can_verify_resolution(&self) -> bool {
        matches!(self, Role::Community | Role::Official)
    }

    pub fn can_list_verifiers(&self) -> bool {
        matches!(
            self,
            Role::Community | Role::Official | Role::Admin | Role::System
        )
    }

    /// Officials and operators may register issues and apply penalties.
    pub fn is_official(&self) -> bool {
        matches!(self, Role::Official | Role::Admin | Role::System)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::System)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_community_members_vote() {
        assert!(Role::Community.can_vote());
        assert!(!Role::Citizen.can_vote());
        assert!(!Role::Official.can_vote());
        assert!(!Role::Admin.can_vote());
    }

    #[test]
    fn parses_legacy_aliases() {
        assert_eq!(Role::from_str("user"), Some(Role::Citizen));
        assert_eq!(Role::from_str("platform_maintainer"), Some(Role::Official));
        assert_eq!(Role::from_str("moderator"), None);
    }
}
