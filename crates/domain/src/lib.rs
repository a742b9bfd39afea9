pub mod auth;
pub mod cooldown;
pub mod error;
pub mod idempotency;
pub mod identity;
pub mod impact;
pub mod issues;
pub mod jobs;
pub mod ledger;
pub mod memory;
pub mod ports;
pub mod profile;
pub mod quorum;
pub mod reputation;
pub mod resolution;
pub mod roles;
pub mod util;
pub mod verification;

pub type DomainResult<T> = Result<T, error::DomainError>;
