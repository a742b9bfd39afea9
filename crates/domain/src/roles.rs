//! Role tiers derived from a community-scoped RP total.
//!
//! The tier is recomputed from the current total on every award, so a penalty
//! that drops an account below a threshold demotes it immediately.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CivicRole {
    Resident,
    CivicHelper,
    CommunityValidator,
    CivicChampion,
}

/// Highest tier first; the first threshold the total reaches wins.
const ROLE_THRESHOLDS: [(CivicRole, u64); 4] = [
    (CivicRole::CivicChampion, 300),
    (CivicRole::CommunityValidator, 120),
    (CivicRole::CivicHelper, 50),
    (CivicRole::Resident, 0),
];

pub fn classify(total_rp: u64) -> CivicRole {
    ROLE_THRESHOLDS
        .iter()
        .find(|(_, threshold)| total_rp >= *threshold)
        .map(|(role, _)| *role)
        .unwrap_or(CivicRole::Resident)
}

impl CivicRole {
    pub const ALL: [CivicRole; 4] = [
        CivicRole::Resident,
        CivicRole::CivicHelper,
        CivicRole::CommunityValidator,
        CivicRole::CivicChampion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CivicRole::Resident => "resident",
            CivicRole::CivicHelper => "civic_helper",
            CivicRole::CommunityValidator => "community_validator",
            CivicRole::CivicChampion => "civic_champion",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CivicRole::Resident => "Resident",
            CivicRole::CivicHelper => "Civic Helper",
            CivicRole::CommunityValidator => "Community Validator",
            CivicRole::CivicChampion => "Civic Champion",
        }
    }

    pub fn threshold(&self) -> u64 {
        ROLE_THRESHOLDS
            .iter()
            .find(|(role, _)| role == self)
            .map(|(_, threshold)| *threshold)
            .unwrap_or(0)
    }

    pub fn next(&self) -> Option<CivicRole> {
        match self {
            CivicRole::Resident => Some(CivicRole::CivicHelper),
            CivicRole::CivicHelper => Some(CivicRole::CommunityValidator),
            CivicRole::CommunityValidator => Some(CivicRole::CivicChampion),
            CivicRole::CivicChampion => None,
        }
    }
}

impl fmt::Display for CivicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CivicRole {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "resident" => Ok(CivicRole::Resident),
            "civic_helper" => Ok(CivicRole::CivicHelper),
            "community_validator" => Ok(CivicRole::CommunityValidator),
            "civic_champion" => Ok(CivicRole::CivicChampion),
            _ => Err("unknown civic role"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NextRoleThreshold {
    pub role: CivicRole,
    pub threshold: u64,
    pub rp_needed: Option<u64>,
    pub achieved: bool,
}

pub fn next_role_threshold(total_rp: u64) -> NextRoleThreshold {
    let current = classify(total_rp);
    match current.next() {
        Some(next) => NextRoleThreshold {
            role: next,
            threshold: next.threshold(),
            rp_needed: Some(next.threshold().saturating_sub(total_rp)),
            achieved: false,
        },
        None => NextRoleThreshold {
            role: current,
            threshold: current.threshold(),
            rp_needed: None,
            achieved: true,
        },
    }
}
