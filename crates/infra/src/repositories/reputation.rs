use std::sync::Arc;

use civic_domain::DomainResult;
use civic_domain::ports::BoxFuture;
use civic_domain::ports::reputation::{AwardCommit, AwardCommitOutcome, ReputationRepository};
use civic_domain::reputation::{ActivityEntry, ReputationAccount, ReputationEvent};
use serde_json::Value;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;

use super::{
    contains_marker, decode_row, decode_rows, map_surreal_error, statement_errors, unexpected,
};
use crate::db::{DbConfig, connect};

const STALE_ACCOUNT: &str = "stale_account";

/// Event id is the idempotency key, so a replayed award fails on `CREATE`
/// before the account is touched. The account write is guarded by the
/// version the caller planned against; `-1` stands for "no account yet".
const COMMIT_AWARD: &str = "\
    BEGIN TRANSACTION;\n\
    CREATE type::thing('reputation_event', $event_key) CONTENT $event;\n\
    LET $aid = type::thing('reputation_account', $account_key);\n\
    LET $current = (SELECT VALUE version FROM ONLY $aid) ?? -1;\n\
    IF $current != $expected_version { THROW 'stale_account'; };\n\
    UPSERT $aid CONTENT $account;\n\
    FOR $entry IN $activities {\n\
        CREATE type::thing('reputation_activity', $entry.activity_id) CONTENT $entry;\n\
    };\n\
    COMMIT TRANSACTION;";

const LIST_EVENTS: &str = "\
    SELECT * OMIT id FROM reputation_event WHERE user_id = $user_id \
    ORDER BY created_at_ms DESC, event_id DESC LIMIT $limit;";

const LIST_EVENTS_IN_COMMUNITY: &str = "\
    SELECT * OMIT id FROM reputation_event \
    WHERE user_id = $user_id AND community_id = $community_id \
    ORDER BY created_at_ms DESC, event_id DESC LIMIT $limit;";

#[derive(Clone)]
pub struct SurrealReputationRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealReputationRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self::with_client(connect(db_config).await?))
    }

    async fn list_accounts_where(
        &self,
        field: &'static str,
        value: String,
        limit: Option<usize>,
    ) -> DomainResult<Vec<ReputationAccount>> {
        let mut response = self
            .client
            .query(accounts_query(field, limit.is_some()))
            .bind(("value", value))
            .bind(("limit", limit.unwrap_or_default() as i64))
            .await
            .map_err(map_surreal_error)?;
        let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
        decode_rows(rows, "reputation account")
    }
}

fn accounts_query(field: &str, limited: bool) -> String {
    let limit_clause = if limited { " LIMIT $limit" } else { "" };
    format!(
        "SELECT * OMIT id FROM reputation_account WHERE {field} = $value \
         ORDER BY total_rp DESC, user_id ASC{limit_clause};"
    )
}

fn commit_outcome(errors: Vec<String>) -> DomainResult<AwardCommitOutcome> {
    if errors.is_empty() {
        return Ok(AwardCommitOutcome::Committed);
    }
    if contains_marker(&errors, "already exists") {
        return Ok(AwardCommitOutcome::DuplicateKey);
    }
    if contains_marker(&errors, STALE_ACCOUNT)
        || contains_marker(&errors, "conflict")
        || contains_marker(&errors, "resource busy")
    {
        return Ok(AwardCommitOutcome::StaleAccount);
    }
    Err(unexpected(errors))
}

impl ReputationRepository for SurrealReputationRepository {
    fn get_account(
        &self,
        user_id: &str,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ReputationAccount>>> {
        let key = civic_domain::reputation::account_key(user_id, community_id);
        Box::pin(async move {
            let mut response = self
                .client
                .query(
                    "SELECT * OMIT id FROM ONLY \
                     type::thing('reputation_account', $account_key);",
                )
                .bind(("account_key", key))
                .await
                .map_err(map_surreal_error)?;
            let row: Option<Value> = response.take(0).map_err(map_surreal_error)?;
            row.map(|row| decode_row(row, "reputation account")).transpose()
        })
    }

    fn list_accounts_for_user(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<ReputationAccount>>> {
        let user_id = user_id.to_string();
        Box::pin(self.list_accounts_where("user_id", user_id, None))
    }

    fn list_accounts_for_community(
        &self,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<ReputationAccount>>> {
        let community_id = community_id.to_string();
        Box::pin(self.list_accounts_where("community_id", community_id, None))
    }

    fn list_top_accounts(
        &self,
        community_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ReputationAccount>>> {
        let community_id = community_id.to_string();
        Box::pin(self.list_accounts_where("community_id", community_id, Some(limit)))
    }

    fn find_event_by_key(
        &self,
        idempotency_key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ReputationEvent>>> {
        let idempotency_key = idempotency_key.to_string();
        Box::pin(async move {
            let mut response = self
                .client
                .query("SELECT * OMIT id FROM ONLY type::thing('reputation_event', $event_key);")
                .bind(("event_key", idempotency_key))
                .await
                .map_err(map_surreal_error)?;
            let row: Option<Value> = response.take(0).map_err(map_surreal_error)?;
            row.map(|row| decode_row(row, "reputation event")).transpose()
        })
    }

    fn commit_award(
        &self,
        commit: &AwardCommit,
    ) -> BoxFuture<'_, DomainResult<AwardCommitOutcome>> {
        let commit = commit.clone();
        Box::pin(async move {
            let expected_version = commit
                .expected_version
                .map(|version| version as i64)
                .unwrap_or(-1);
            let mut response = self
                .client
                .query(COMMIT_AWARD)
                .bind(("event_key", commit.event.idempotency_key.clone()))
                .bind(("event", commit.event))
                .bind(("account_key", commit.account.key()))
                .bind(("expected_version", expected_version))
                .bind(("account", commit.account))
                .bind(("activities", commit.activities))
                .await
                .map_err(map_surreal_error)?;
            commit_outcome(statement_errors(&mut response))
        })
    }

    fn list_events(
        &self,
        user_id: &str,
        community_id: Option<&str>,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ReputationEvent>>> {
        let user_id = user_id.to_string();
        let community_id = community_id.map(str::to_string);
        Box::pin(async move {
            let query = match community_id {
                Some(community_id) => self
                    .client
                    .query(LIST_EVENTS_IN_COMMUNITY)
                    .bind(("community_id", community_id)),
                None => self.client.query(LIST_EVENTS),
            };
            let mut response = query
                .bind(("user_id", user_id))
                .bind(("limit", limit as i64))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            decode_rows(rows, "reputation event")
        })
    }

    fn list_activity(
        &self,
        user_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ActivityEntry>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let mut response = self
                .client
                .query(
                    "SELECT * OMIT id FROM reputation_activity WHERE user_id = $user_id \
                     ORDER BY created_at_ms DESC, activity_id DESC LIMIT $limit;",
                )
                .bind(("user_id", user_id))
                .bind(("limit", limit as i64))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            decode_rows(rows, "activity")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaderboard_query_is_capped_in_the_database() {
        let capped = accounts_query("community_id", true);
        assert!(capped.ends_with("ORDER BY total_rp DESC, user_id ASC LIMIT $limit;"));
        assert!(capped.contains("WHERE community_id = $value"));

        let full = accounts_query("user_id", false);
        assert!(!full.contains("LIMIT"));
    }

    #[test]
    fn replayed_key_wins_over_cancelled_statements() {
        let errors = vec![
            "database record `reputation_event:abc` already exists".to_string(),
            "the query was not executed due to a failed transaction".to_string(),
        ];
        assert_eq!(
            commit_outcome(errors).expect("outcome"),
            AwardCommitOutcome::DuplicateKey
        );
    }

    #[test]
    fn version_mismatch_maps_to_stale_account() {
        let errors = vec!["an error occurred: stale_account".to_string()];
        assert_eq!(
            commit_outcome(errors).expect("outcome"),
            AwardCommitOutcome::StaleAccount
        );
        assert_eq!(
            commit_outcome(Vec::new()).expect("outcome"),
            AwardCommitOutcome::Committed
        );
    }

    #[test]
    fn unknown_failures_surface_as_errors() {
        let errors = vec!["parse error near FOR".to_string()];
        assert!(commit_outcome(errors).is_err());
    }
}
