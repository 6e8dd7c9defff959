//! Upload direction of the sync protocol.
//!
//! Unsynced rows are the entire work queue: nothing else records pending
//! uploads, so re-running the coordinator after any partial failure resumes
//! exactly where the acknowledged state ends. Flags flip to synced only
//! after the server acknowledges, which makes delivery at-least-once.

use std::collections::BTreeMap;

use sqlx::SqlitePool;

use super::client::{ApiClient, ApiError};
use super::payload::{split_private, AssembleError, AssembledAggregate, PayloadAssembler};
use super::protocol::InteractionBatchRequest;
use crate::db::{Filter, IdentityLinkRepository, Record, Repository, RepositoryError, Value};

/// Aggregates sent per bulk request.
pub const UPLOAD_BATCH_SIZE: usize = 20;

/// Outcome of one respondent batch pass.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub uploaded: usize,
    pub failed: usize,
    /// More unsynced roots remain beyond this batch.
    pub more_pending: bool,
}

/// Outcome of the interaction-only pass.
#[derive(Debug, Default)]
pub struct InteractionUploadOutcome {
    pub groups_uploaded: usize,
    pub groups_failed: usize,
    pub rows_uploaded: usize,
}

/// Combined result of a full upload run.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub respondents: UploadOutcome,
    pub interactions: InteractionUploadOutcome,
}

/// Errors from upload coordination. The batched paths catch server-side
/// failures themselves and fold them into the outcome; what propagates from
/// them is local store trouble.
#[derive(Debug)]
pub enum UploadError {
    Api(ApiError),
    Assemble(AssembleError),
    Repository(RepositoryError),
    Database(sqlx::Error),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::Api(e) => write!(f, "{}", e),
            UploadError::Assemble(e) => write!(f, "{}", e),
            UploadError::Repository(e) => write!(f, "{}", e),
            UploadError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UploadError::Api(e) => Some(e),
            UploadError::Assemble(e) => Some(e),
            UploadError::Repository(e) => Some(e),
            UploadError::Database(e) => Some(e),
        }
    }
}

impl From<ApiError> for UploadError {
    fn from(e: ApiError) -> Self {
        UploadError::Api(e)
    }
}

impl From<AssembleError> for UploadError {
    fn from(e: AssembleError) -> Self {
        UploadError::Assemble(e)
    }
}

impl From<RepositoryError> for UploadError {
    fn from(e: RepositoryError) -> Self {
        UploadError::Repository(e)
    }
}

impl From<sqlx::Error> for UploadError {
    fn from(e: sqlx::Error) -> Self {
        UploadError::Database(e)
    }
}

/// Pushes locally-created data to the server.
pub struct UploadCoordinator {
    assembler: PayloadAssembler,
    links: IdentityLinkRepository,
    respondents: Repository,
    statuses: Repository,
    interactions: Repository,
    subcategories: Repository,
}

impl UploadCoordinator {
    pub fn new(pool: SqlitePool) -> Result<Self, RepositoryError> {
        Ok(Self {
            assembler: PayloadAssembler::new(pool.clone())?,
            links: IdentityLinkRepository::new(pool.clone()),
            respondents: Repository::new(pool.clone(), "respondents")?,
            statuses: Repository::new(pool.clone(), "respondent_statuses")?,
            interactions: Repository::new(pool.clone(), "interactions")?,
            subcategories: Repository::new(pool, "interaction_subcategories")?,
        })
    }

    /// Full upload pass: respondent aggregates first, paging through any
    /// backlog, then interactions for already-promoted respondents.
    pub async fn run(&self, client: &ApiClient) -> Result<SyncSummary, UploadError> {
        let mut summary = SyncSummary::default();
        loop {
            let outcome = self.upload_respondents(client).await?;
            summary.respondents.uploaded += outcome.uploaded;
            summary.respondents.failed += outcome.failed;
            summary.respondents.more_pending = outcome.more_pending;
            // A batch that made no progress would repeat forever.
            if !outcome.more_pending || outcome.uploaded == 0 {
                break;
            }
        }
        summary.interactions = self.upload_interactions(client).await?;
        Ok(summary)
    }

    /// Uploads one batch of unsynced respondent aggregates. A request-level
    /// failure leaves the whole batch unsynced and is not an error here;
    /// per-aggregate rejections leave only that aggregate unsynced.
    pub async fn upload_respondents(
        &self,
        client: &ApiClient,
    ) -> Result<UploadOutcome, UploadError> {
        // One extra row tells us whether a backlog remains.
        let probe = self
            .respondents
            .filter_limit(
                &[("synced", Filter::Eq(Value::from(false)))],
                Some(UPLOAD_BATCH_SIZE as i64 + 1),
            )
            .await?;
        if probe.is_empty() {
            return Ok(UploadOutcome::default());
        }
        let more_pending = probe.len() > UPLOAD_BATCH_SIZE;
        let batch: Vec<Record> = probe.into_iter().take(UPLOAD_BATCH_SIZE).collect();

        let mut aggregates = Vec::new();
        let mut failed = 0usize;
        for row in &batch {
            let uuid = match row.get("uuid").and_then(Value::as_text) {
                Some(uuid) => uuid.to_string(),
                None => {
                    failed += 1;
                    continue;
                }
            };
            match self.assembler.assemble_respondent(&uuid).await {
                Ok(aggregate) => aggregates.push(aggregate),
                Err(e) => {
                    tracing::warn!("Skipping respondent {}: {}", uuid, e);
                    failed += 1;
                }
            }
        }
        if aggregates.is_empty() {
            return Ok(UploadOutcome {
                uploaded: 0,
                failed,
                more_pending,
            });
        }

        let payloads: Vec<serde_json::Value> =
            aggregates.iter().map(|a| a.payload.clone()).collect();
        let response = match client.upload_respondents_bulk(payloads).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Bulk upload request failed, keeping batch local: {}", e);
                return Ok(UploadOutcome {
                    uploaded: 0,
                    failed: failed + aggregates.len(),
                    more_pending,
                });
            }
        };

        let mut uploaded = 0usize;
        for aggregate in &aggregates {
            let result = response
                .results
                .iter()
                .find(|r| r.uuid == aggregate.client_uuid);
            match result.and_then(|r| r.id) {
                Some(server_id) => match self.finalize_respondent(aggregate, server_id).await {
                    Ok(()) => uploaded += 1,
                    Err(e) => {
                        tracing::warn!(
                            "Reconciling respondent {} failed: {}",
                            aggregate.client_uuid,
                            e
                        );
                        failed += 1;
                    }
                },
                None => {
                    match result {
                        Some(rejected) => tracing::warn!(
                            "Server rejected respondent {}: {}",
                            aggregate.client_uuid,
                            rejected.errors.join("; ")
                        ),
                        None => tracing::warn!(
                            "Server response omitted respondent {}",
                            aggregate.client_uuid
                        ),
                    }
                    failed += 1;
                }
            }
        }

        Ok(UploadOutcome {
            uploaded,
            failed,
            more_pending,
        })
    }

    /// Uploads unsynced interactions whose respondent already has a server
    /// id, one request per respondent. A failed group stays unsynced without
    /// blocking the others.
    pub async fn upload_interactions(
        &self,
        client: &ApiClient,
    ) -> Result<InteractionUploadOutcome, UploadError> {
        let rows = self
            .interactions
            .filter(&[("synced", Filter::Eq(Value::from(false)))])
            .await?;

        let mut groups: BTreeMap<i64, Vec<Record>> = BTreeMap::new();
        for row in rows {
            let respondent_uuid = match row.get("respondent_uuid").and_then(Value::as_text) {
                Some(uuid) => uuid.to_string(),
                None => continue,
            };
            let link = self.links.find_by_uuid(&respondent_uuid).await?;
            match link.and_then(|l| l.server_id) {
                Some(server_id) => groups.entry(server_id).or_default().push(row),
                None => {
                    // Rides along with the aggregate once its root uploads.
                    tracing::debug!("Interaction for {} awaits root promotion", respondent_uuid);
                }
            }
        }

        let mut outcome = InteractionUploadOutcome::default();
        for (server_id, rows) in &groups {
            match self
                .upload_interaction_group(client, *server_id, rows)
                .await
            {
                Ok(count) => {
                    outcome.groups_uploaded += 1;
                    outcome.rows_uploaded += count;
                }
                Err(e) => {
                    tracing::warn!(
                        "Interaction upload for server respondent {} failed: {}",
                        server_id,
                        e
                    );
                    outcome.groups_failed += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// Uploads one aggregate on its own, splitting contact fields onto the
    /// private sub-resource. Failures here are caller-visible, unlike the
    /// batched paths.
    pub async fn upload_respondent_single(
        &self,
        client: &ApiClient,
        uuid: &str,
    ) -> Result<i64, UploadError> {
        let aggregate = self.assembler.assemble_respondent(uuid).await?;
        let (public, private) = split_private(aggregate.payload.clone());

        let response = client.upload_respondent(&public).await?;
        let server_id = response.id;

        let has_private = private.as_object().map(|m| !m.is_empty()).unwrap_or(false);
        if has_private {
            if let Err(e) = client.upload_private_info(server_id, &private).await {
                tracing::warn!("Private info upload for {} failed, continuing: {}", uuid, e);
            }
        }

        self.finalize_respondent(&aggregate, server_id).await?;
        Ok(server_id)
    }

    async fn upload_interaction_group(
        &self,
        client: &ApiClient,
        server_id: i64,
        rows: &[Record],
    ) -> Result<usize, UploadError> {
        let mut payloads = Vec::with_capacity(rows.len());
        let mut interaction_ids = Vec::new();
        let mut subcategory_ids = Vec::new();
        for row in rows {
            if let Some(id) = row.get("id").and_then(Value::as_integer) {
                interaction_ids.push(id);
            }
            let (payload, sub_ids) = self.assembler.assemble_interaction(row).await?;
            payloads.push(payload);
            subcategory_ids.extend(sub_ids);
        }

        let batch = InteractionBatchRequest {
            respondent_id: server_id,
            interactions: payloads,
        };
        client.upload_interaction_batch(&batch).await?;

        self.mark_synced(&self.interactions, &interaction_ids)
            .await?;
        self.mark_synced(&self.subcategories, &subcategory_ids)
            .await?;
        Ok(interaction_ids.len())
    }

    /// Records the server mapping and reconciles local rows: dependents flip
    /// to synced, the root row leaves the local store. The identity link
    /// keeps dependent rows resolvable afterwards.
    async fn finalize_respondent(
        &self,
        aggregate: &AssembledAggregate,
        server_id: i64,
    ) -> Result<(), UploadError> {
        self.links
            .promote(&aggregate.client_uuid, server_id)
            .await?;
        self.mark_synced(&self.statuses, &aggregate.status_ids)
            .await?;
        self.mark_synced(&self.interactions, &aggregate.interaction_ids)
            .await?;
        self.mark_synced(&self.subcategories, &aggregate.subcategory_ids)
            .await?;
        self.respondents
            .delete_where("uuid", &Value::from(aggregate.client_uuid.as_str()))
            .await?;
        Ok(())
    }

    async fn mark_synced(&self, repo: &Repository, ids: &[i64]) -> Result<(), RepositoryError> {
        for id in ids {
            repo.update_where("synced", &Value::from(true), "id", &Value::Integer(*id))
                .await?;
        }
        Ok(())
    }
}
