use std::sync::Arc;

use civic_domain::DomainResult;
use civic_domain::error::DomainError;
use civic_domain::issues::{IssueConsensusState, IssueFlag, IssueRegistration};
use civic_domain::ports::BoxFuture;
use civic_domain::ports::issues::{IssueRepository, QuorumCommit, VoteCommit};
use civic_domain::quorum::QuorumTransition;
use civic_domain::verification::{VoteOutcome, VoteRecord};
use serde::Deserialize;
use serde_json::Value;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;

use super::{
    contains_marker, decode_row, decode_rows, map_surreal_error, statement_errors, unexpected,
};
use crate::db::{DbConfig, connect};

const ISSUE_NOT_FOUND: &str = "issue_not_found";

const UPSERT_ISSUE: &str = "\
    BEGIN TRANSACTION;\n\
    LET $rid = type::thing('civic_issue', $issue_id);\n\
    IF (SELECT * FROM ONLY $rid) {\n\
        UPDATE $rid SET\n\
            category = $category,\n\
            status = $status,\n\
            resolved_at_ms = $resolved_at_ms ?? (\n\
                IF $status = 'resolved' THEN (resolved_at_ms ?? $now) ELSE resolved_at_ms END\n\
            ),\n\
            updated_at_ms = $now;\n\
    } ELSE {\n\
        CREATE $rid CONTENT $fresh;\n\
    };\n\
    SELECT * OMIT id FROM ONLY $rid;\n\
    COMMIT TRANSACTION;";

/// Insert the ballot, bump the matching counter and run the quorum
/// check-and-set while the issue row is held by the transaction.
const RECORD_VOTE: &str = "\
    BEGIN TRANSACTION;\n\
    LET $rid = type::thing('civic_issue', $issue_id);\n\
    LET $issue = (SELECT * FROM ONLY $rid);\n\
    IF !$issue { THROW 'issue_not_found'; };\n\
    CREATE type::thing('issue_vote', $vote_key) CONTENT $vote;\n\
    LET $correct = $issue.correct_votes + (IF $outcome = 'correct' THEN 1 ELSE 0 END);\n\
    LET $incorrect = $issue.incorrect_votes + (IF $outcome = 'incorrect' THEN 1 ELSE 0 END);\n\
    LET $fresh = !$issue.quorum_met AND ($correct + $incorrect) >= $threshold;\n\
    UPDATE $rid SET\n\
        correct_votes = $correct,\n\
        incorrect_votes = $incorrect,\n\
        quorum_met = quorum_met OR $fresh,\n\
        quorum_met_at_ms = IF $fresh THEN $now ELSE quorum_met_at_ms END,\n\
        consensus_accurate = IF $fresh THEN $correct > $incorrect ELSE consensus_accurate END,\n\
        updated_at_ms = $now;\n\
    SELECT *, $fresh AS fresh_quorum OMIT id FROM ONLY $rid;\n\
    COMMIT TRANSACTION;";

const TRY_RESOLVE_QUORUM: &str = "\
    BEGIN TRANSACTION;\n\
    LET $rid = type::thing('civic_issue', $issue_id);\n\
    LET $issue = (SELECT * FROM ONLY $rid);\n\
    IF !$issue { THROW 'issue_not_found'; };\n\
    LET $fresh = !$issue.quorum_met\n\
        AND ($issue.correct_votes + $issue.incorrect_votes) >= $threshold;\n\
    IF $fresh {\n\
        UPDATE $rid SET\n\
            quorum_met = true,\n\
            quorum_met_at_ms = $now,\n\
            consensus_accurate = correct_votes > incorrect_votes,\n\
            updated_at_ms = $now;\n\
    };\n\
    SELECT *, $fresh AS fresh_quorum OMIT id FROM ONLY $rid;\n\
    COMMIT TRANSACTION;";

const REOPEN_ISSUE: &str = "\
    UPDATE type::thing('civic_issue', $issue_id) SET\n\
        status = 'in_progress',\n\
        was_reopened = true,\n\
        reopened_count += 1,\n\
        resolution_verified = false,\n\
        resolved_at_ms = NONE,\n\
        updated_at_ms = $now\n\
    WHERE status = 'resolved' RETURN AFTER;\n\
    SELECT VALUE issue_id FROM ONLY type::thing('civic_issue', $issue_id);";

#[derive(Debug, Deserialize)]
struct QuorumRow {
    #[serde(flatten)]
    issue: IssueConsensusState,
    #[serde(default)]
    fresh_quorum: bool,
}

impl QuorumRow {
    fn transition(&self, threshold: u32) -> QuorumTransition {
        if self.fresh_quorum {
            QuorumTransition::Resolved {
                consensus_accurate: self.issue.consensus_accurate.unwrap_or(false),
            }
        } else if self.issue.quorum_met {
            QuorumTransition::AlreadyResolved
        } else {
            QuorumTransition::Pending {
                votes_needed: threshold.saturating_sub(self.issue.total_votes()),
            }
        }
    }
}

#[derive(Clone)]
pub struct SurrealIssueRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealIssueRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self::with_client(connect(db_config).await?))
    }

    /// Last statement result of a transaction, after mapping thrown markers.
    fn final_row(response: &mut surrealdb::Response) -> DomainResult<Option<Value>> {
        let errors = statement_errors(response);
        if contains_marker(&errors, ISSUE_NOT_FOUND) {
            return Err(DomainError::IssueNotFound);
        }
        if contains_marker(&errors, "already exists") {
            return Err(DomainError::DuplicateVote);
        }
        if !errors.is_empty() {
            return Err(unexpected(errors));
        }
        let last = response.num_statements().saturating_sub(1);
        response.take(last).map_err(map_surreal_error)
    }

    fn quorum_row(response: &mut surrealdb::Response) -> DomainResult<QuorumRow> {
        let row = Self::final_row(response)?.ok_or(DomainError::IssueNotFound)?;
        decode_row(row, "issue quorum")
    }
}

impl IssueRepository for SurrealIssueRepository {
    fn upsert_issue(
        &self,
        registration: &IssueRegistration,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<IssueConsensusState>> {
        let fresh = IssueConsensusState::from_registration(registration, now_ms);
        let registration = registration.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(UPSERT_ISSUE)
                .bind(("issue_id", registration.issue_id))
                .bind(("category", registration.category))
                .bind(("status", registration.status.as_str()))
                .bind(("resolved_at_ms", registration.resolved_at_ms))
                .bind(("now", now_ms))
                .bind(("fresh", fresh))
                .await
                .map_err(map_surreal_error)?;
            let row = Self::final_row(&mut response)?.ok_or(DomainError::IssueNotFound)?;
            decode_row(row, "issue")
        })
    }

    fn get_issue(
        &self,
        issue_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<IssueConsensusState>>> {
        let issue_id = issue_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT * OMIT id FROM ONLY type::thing('civic_issue', $issue_id);")
                .bind(("issue_id", issue_id))
                .await
                .map_err(map_surreal_error)?;
            let row: Option<Value> = response.take(0).map_err(map_surreal_error)?;
            row.map(|row| decode_row(row, "issue")).transpose()
        })
    }

    fn list_issues_by_community(
        &self,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<IssueConsensusState>>> {
        let community_id = community_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT * OMIT id FROM civic_issue WHERE community_id = $community_id \
                     ORDER BY issue_id ASC;",
                )
                .bind(("community_id", community_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            decode_rows(rows, "issue")
        })
    }

    fn record_vote(
        &self,
        vote: &VoteRecord,
        quorum_threshold: u32,
    ) -> BoxFuture<'_, DomainResult<VoteCommit>> {
        let vote = vote.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let outcome = match vote.outcome {
                VoteOutcome::Correct => "correct",
                VoteOutcome::Incorrect => "incorrect",
            };
            let mut response = client
                .query(RECORD_VOTE)
                .bind(("issue_id", vote.issue_id.clone()))
                .bind(("vote_key", vote.key()))
                .bind(("vote", vote.clone()))
                .bind(("outcome", outcome))
                .bind(("threshold", quorum_threshold))
                .bind(("now", vote.created_at_ms))
                .await
                .map_err(map_surreal_error)?;
            let row = Self::quorum_row(&mut response)?;
            let transition = row.transition(quorum_threshold);
            Ok(VoteCommit {
                vote,
                issue: row.issue,
                transition,
            })
        })
    }

    fn try_resolve_quorum(
        &self,
        issue_id: &str,
        quorum_threshold: u32,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<QuorumCommit>> {
        let issue_id = issue_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(TRY_RESOLVE_QUORUM)
                .bind(("issue_id", issue_id))
                .bind(("threshold", quorum_threshold))
                .bind(("now", now_ms))
                .await
                .map_err(map_surreal_error)?;
            let row = Self::quorum_row(&mut response)?;
            let transition = row.transition(quorum_threshold);
            Ok(QuorumCommit {
                issue: row.issue,
                transition,
            })
        })
    }

    fn set_issue_flag(
        &self,
        issue_id: &str,
        flag: IssueFlag,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<bool>> {
        let field = flag.field_name();
        // updated_at_ms first: SET clauses apply in order.
        let query = format!(
            "UPDATE type::thing('civic_issue', $issue_id) SET \
                 updated_at_ms = IF {field} = true THEN updated_at_ms ELSE $now END, \
                 {field} = true \
             RETURN BEFORE;"
        );
        let issue_id = issue_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(query)
                .bind(("issue_id", issue_id))
                .bind(("now", now_ms))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            let before = rows.into_iter().next().ok_or(DomainError::IssueNotFound)?;
            let was_set = before.get(field).and_then(Value::as_bool).unwrap_or(false);
            Ok(!was_set)
        })
    }

    fn reopen_issue(&self, issue_id: &str, now_ms: i64) -> BoxFuture<'_, DomainResult<bool>> {
        let issue_id = issue_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(REOPEN_ISSUE)
                .bind(("issue_id", issue_id))
                .bind(("now", now_ms))
                .await
                .map_err(map_surreal_error)?;
            let reopened: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            if !reopened.is_empty() {
                return Ok(true);
            }
            let existing: Option<String> = response.take(1).map_err(map_surreal_error)?;
            match existing {
                Some(_) => Ok(false),
                None => Err(DomainError::IssueNotFound),
            }
        })
    }

    fn get_vote(
        &self,
        issue_id: &str,
        voter_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<VoteRecord>>> {
        let key = civic_domain::verification::vote_key(issue_id, voter_id);
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT * OMIT id FROM ONLY type::thing('issue_vote', $vote_key);")
                .bind(("vote_key", key))
                .await
                .map_err(map_surreal_error)?;
            let row: Option<Value> = response.take(0).map_err(map_surreal_error)?;
            row.map(|row| decode_row(row, "vote")).transpose()
        })
    }

    fn list_votes(&self, issue_id: &str) -> BoxFuture<'_, DomainResult<Vec<VoteRecord>>> {
        let issue_id = issue_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT * OMIT id FROM issue_vote WHERE issue_id = $issue_id \
                     ORDER BY created_at_ms ASC, vote_id ASC;",
                )
                .bind(("issue_id", issue_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            decode_rows(rows, "vote")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_domain::issues::IssueStatus;

    fn row(correct: u32, incorrect: u32, quorum_met: bool, fresh: bool) -> QuorumRow {
        let registration = IssueRegistration {
            issue_id: "issue-1".into(),
            community_id: "ka__bengaluru".into(),
            reporter_id: "reporter".into(),
            category: None,
            status: IssueStatus::Reported,
            created_at_ms: Some(1_000),
            resolved_at_ms: None,
        };
        let mut issue = IssueConsensusState::from_registration(&registration, 1_000);
        issue.correct_votes = correct;
        issue.incorrect_votes = incorrect;
        issue.quorum_met = quorum_met;
        issue.consensus_accurate = quorum_met.then_some(correct > incorrect);
        QuorumRow {
            issue,
            fresh_quorum: fresh,
        }
    }

    #[test]
    fn transition_reports_votes_still_needed() {
        assert_eq!(
            row(1, 0, false, false).transition(3),
            QuorumTransition::Pending { votes_needed: 2 }
        );
    }

    #[test]
    fn transition_distinguishes_fresh_and_settled_quorum() {
        assert_eq!(
            row(2, 1, true, true).transition(3),
            QuorumTransition::Resolved {
                consensus_accurate: true
            }
        );
        assert_eq!(
            row(3, 1, true, false).transition(3),
            QuorumTransition::AlreadyResolved
        );
    }

    #[test]
    fn quorum_row_decodes_flattened_issue() {
        let mut value = serde_json::to_value(row(2, 1, true, false).issue).expect("encode");
        value["fresh_quorum"] = Value::Bool(true);
        let decoded: QuorumRow = decode_row(value, "issue quorum").expect("decode");
        assert!(decoded.fresh_quorum);
        assert_eq!(decoded.issue.correct_votes, 2);
    }
}
