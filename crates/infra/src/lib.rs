pub mod config;
pub mod db;
pub mod events;
pub mod idempotency;
pub mod jobs;
pub mod logging;
pub mod notifications;
pub mod repositories;
