use std::sync::Arc;

use crate::impact::ImpactService;
use crate::ports::events::LedgerEventSink;
use crate::ports::impact::ImpactScoreRepository;
use crate::ports::issues::IssueRepository;
use crate::ports::reputation::ReputationRepository;
use crate::profile::ReputationQueryService;
use crate::quorum::QuorumResolver;
use crate::reputation::ReputationAccountant;
use crate::resolution::ResolutionService;
use crate::verification::VerificationService;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    pub quorum_threshold: u32,
    pub spam_cooldown_hours: u32,
    pub impact_compute_interval_hours: u32,
    pub impact_sla_hours: u32,
    /// Commit attempts after a concurrent account update before giving up.
    pub award_retry_limit: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            quorum_threshold: 3,
            spam_cooldown_hours: 24,
            impact_compute_interval_hours: 6,
            impact_sla_hours: 72,
            award_retry_limit: 8,
        }
    }
}

#[derive(Clone)]
pub struct LedgerPorts {
    pub issues: Arc<dyn IssueRepository>,
    pub reputation: Arc<dyn ReputationRepository>,
    pub impact: Arc<dyn ImpactScoreRepository>,
    pub events: Arc<dyn LedgerEventSink>,
}

/// Every ledger service wired over one set of ports.
#[derive(Clone)]
pub struct Ledger {
    pub config: LedgerConfig,
    pub accountant: ReputationAccountant,
    pub quorum: QuorumResolver,
    pub verification: VerificationService,
    pub resolution: ResolutionService,
    pub impact: ImpactService,
    pub queries: ReputationQueryService,
}

impl Ledger {
    pub fn new(ports: LedgerPorts, config: LedgerConfig) -> Self {
        let accountant = ReputationAccountant::new(ports.reputation.clone(), config.clone());
        let quorum = QuorumResolver::new(
            ports.issues.clone(),
            accountant.clone(),
            ports.events.clone(),
            config.clone(),
        );
        let verification =
            VerificationService::new(ports.issues.clone(), quorum.clone(), config.clone());
        let resolution = ResolutionService::new(
            ports.issues.clone(),
            accountant.clone(),
            ports.events.clone(),
        );
        let impact = ImpactService::new(
            ports.impact.clone(),
            ports.issues.clone(),
            ports.reputation.clone(),
            config.clone(),
        );
        let queries = ReputationQueryService::new(ports.reputation.clone());
        Self {
            config,
            accountant,
            quorum,
            verification,
            resolution,
            impact,
            queries,
        }
    }
}
