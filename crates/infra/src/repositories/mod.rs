mod impact;
mod issues;
mod reputation;

use civic_domain::error::DomainError;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use impact::SurrealImpactRepository;
pub use issues::SurrealIssueRepository;
pub use reputation::SurrealReputationRepository;

pub(crate) fn map_surreal_error(err: surrealdb::Error) -> DomainError {
    let error_message = err.to_string().to_lowercase();
    if error_message.contains("already exists")
        || error_message.contains("duplicate")
        || error_message.contains("unique")
        || error_message.contains("conflict")
    {
        return DomainError::Conflict;
    }
    DomainError::Validation(format!("surreal query failed: {error_message}"))
}

/// Statement errors of a transaction, lowercased. Once one statement fails
/// every other statement reports the cancelled transaction, so callers look
/// for their own markers across the whole set.
pub(crate) fn statement_errors(response: &mut surrealdb::Response) -> Vec<String> {
    response
        .take_errors()
        .into_values()
        .map(|err| err.to_string().to_lowercase())
        .collect()
}

pub(crate) fn contains_marker(errors: &[String], marker: &str) -> bool {
    errors.iter().any(|message| message.contains(marker))
}

pub(crate) fn unexpected(errors: Vec<String>) -> DomainError {
    DomainError::Validation(format!("surreal query failed: {}", errors.join("; ")))
}

pub(crate) fn decode_row<T: DeserializeOwned>(row: Value, what: &str) -> Result<T, DomainError> {
    serde_json::from_value(row)
        .map_err(|err| DomainError::Validation(format!("invalid {what} row: {err}")))
}

pub(crate) fn decode_rows<T: DeserializeOwned>(
    rows: Vec<Value>,
    what: &str,
) -> Result<Vec<T>, DomainError> {
    rows.into_iter().map(|row| decode_row(row, what)).collect()
}

