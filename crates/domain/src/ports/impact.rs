use crate::DomainResult;
use crate::impact::CommunityImpactScore;

use super::BoxFuture;

pub trait ImpactScoreRepository: Send + Sync {
    fn get(&self, community_id: &str) -> BoxFuture<'_, DomainResult<Option<CommunityImpactScore>>>;
    /// Full-row replace keyed by community id.
    fn put(&self, score: &CommunityImpactScore) -> BoxFuture<'_, DomainResult<()>>;
}
