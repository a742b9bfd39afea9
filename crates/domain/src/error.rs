use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("voter already voted on this issue")]
    DuplicateVote,
    #[error("insufficient permission: {0}")]
    InsufficientPermission(String),
    #[error("issue not found")]
    IssueNotFound,
    #[error("verification quorum not met")]
    QuorumNotYetMet,
}
