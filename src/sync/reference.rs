//! Download direction of the sync protocol. Reference tables are
//! server-owned: a refresh replaces the local copy wholesale, there is no
//! row-level merging. Each set swaps inside one transaction, so an
//! interrupted refresh keeps the previous rows. Each refresh is stamped so
//! routine syncs skip tables fetched within the staleness window.

use chrono::Duration;
use sqlx::SqlitePool;

use super::client::ApiClient;
use super::protocol::{RemoteIndicator, RemoteOrganization, RemoteProject, RemoteTask, RemoteTerm};
use crate::db::{Repository, RepositoryError, SyncRecordStore};

/// Reference data younger than this is not fetched again.
pub const REFERENCE_MAX_AGE_HOURS: i64 = 12;

/// Which tables a refresh pass touched, keyed by primary table name.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    pub refreshed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Pulls server-owned reference data into the local cache.
pub struct ReferenceCacheSync {
    pool: SqlitePool,
    stamps: SyncRecordStore,
    tasks: Repository,
    indicators: Repository,
    subcategories: Repository,
    prerequisites: Repository,
    organizations: Repository,
    projects: Repository,
    terms: Repository,
}

impl ReferenceCacheSync {
    pub fn new(pool: SqlitePool) -> Result<Self, RepositoryError> {
        Ok(Self {
            stamps: SyncRecordStore::new(pool.clone()),
            tasks: Repository::new(pool.clone(), "tasks")?,
            indicators: Repository::new(pool.clone(), "indicators")?,
            subcategories: Repository::new(pool.clone(), "indicator_subcategories")?,
            prerequisites: Repository::new(pool.clone(), "indicator_prerequisites")?,
            organizations: Repository::new(pool.clone(), "organizations")?,
            projects: Repository::new(pool.clone(), "projects")?,
            terms: Repository::new(pool.clone(), "vocabulary_terms")?,
            pool,
        })
    }

    /// Refreshes every reference set that is stale (or all of them with
    /// `force`). A set that fails to fetch or swap leaves its current cache
    /// and stamp untouched and moves on to the next.
    pub async fn refresh_all(
        &self,
        client: &ApiClient,
        force: bool,
    ) -> Result<RefreshOutcome, RepositoryError> {
        let mut outcome = RefreshOutcome::default();
        self.refresh_tasks(client, force, &mut outcome).await?;
        self.refresh_indicators(client, force, &mut outcome).await?;
        self.refresh_organizations(client, force, &mut outcome)
            .await?;
        self.refresh_projects(client, force, &mut outcome).await?;
        self.refresh_vocabulary(client, force, &mut outcome).await?;
        Ok(outcome)
    }

    async fn refresh_tasks(
        &self,
        client: &ApiClient,
        force: bool,
        outcome: &mut RefreshOutcome,
    ) -> Result<(), RepositoryError> {
        if self.can_skip("tasks", force, outcome).await? {
            return Ok(());
        }
        let remote = match client.fetch_tasks().await {
            Ok(remote) => remote,
            Err(e) => return Self::note_failure("tasks", &e, outcome),
        };
        if let Err(e) = self.replace_tasks(&remote).await {
            return Self::note_failure("tasks", &e, outcome);
        }
        self.finish("tasks", remote.len(), outcome).await
    }

    /// Swaps the task rows in one transaction; an error rolls back to the
    /// previous rows.
    async fn replace_tasks(&self, remote: &[RemoteTask]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        self.tasks.clear_in(&mut tx).await?;
        for task in remote {
            self.tasks.insert_in(&mut tx, &task.to_record()).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Indicators carry their subcategories and prerequisites in one
    /// response, so the three tables share the indicators stamp.
    async fn refresh_indicators(
        &self,
        client: &ApiClient,
        force: bool,
        outcome: &mut RefreshOutcome,
    ) -> Result<(), RepositoryError> {
        if self.can_skip("indicators", force, outcome).await? {
            return Ok(());
        }
        let remote = match client.fetch_indicators().await {
            Ok(remote) => remote,
            Err(e) => return Self::note_failure("indicators", &e, outcome),
        };
        if let Err(e) = self.replace_indicators(&remote).await {
            return Self::note_failure("indicators", &e, outcome);
        }
        self.finish("indicators", remote.len(), outcome).await
    }

    /// One transaction across all three tables, so the set stays consistent.
    async fn replace_indicators(
        &self,
        remote: &[RemoteIndicator],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        // Children out first, parents in first.
        self.subcategories.clear_in(&mut tx).await?;
        self.prerequisites.clear_in(&mut tx).await?;
        self.indicators.clear_in(&mut tx).await?;
        for indicator in remote {
            self.indicators
                .insert_in(&mut tx, &indicator.to_record())
                .await?;
            for subcategory in &indicator.subcategories {
                self.subcategories
                    .insert_in(&mut tx, &subcategory.to_record(indicator.id))
                    .await?;
            }
            for prerequisite in &indicator.prerequisites {
                self.prerequisites
                    .insert_in(&mut tx, &prerequisite.to_record(indicator.id))
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn refresh_organizations(
        &self,
        client: &ApiClient,
        force: bool,
        outcome: &mut RefreshOutcome,
    ) -> Result<(), RepositoryError> {
        if self.can_skip("organizations", force, outcome).await? {
            return Ok(());
        }
        let remote = match client.fetch_organizations().await {
            Ok(remote) => remote,
            Err(e) => return Self::note_failure("organizations", &e, outcome),
        };
        if let Err(e) = self.replace_organizations(&remote).await {
            return Self::note_failure("organizations", &e, outcome);
        }
        self.finish("organizations", remote.len(), outcome).await
    }

    async fn replace_organizations(
        &self,
        remote: &[RemoteOrganization],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        self.organizations.clear_in(&mut tx).await?;
        for organization in remote {
            self.organizations
                .insert_in(&mut tx, &organization.to_record())
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn refresh_projects(
        &self,
        client: &ApiClient,
        force: bool,
        outcome: &mut RefreshOutcome,
    ) -> Result<(), RepositoryError> {
        if self.can_skip("projects", force, outcome).await? {
            return Ok(());
        }
        let remote = match client.fetch_projects().await {
            Ok(remote) => remote,
            Err(e) => return Self::note_failure("projects", &e, outcome),
        };
        if let Err(e) = self.replace_projects(&remote).await {
            return Self::note_failure("projects", &e, outcome);
        }
        self.finish("projects", remote.len(), outcome).await
    }

    async fn replace_projects(&self, remote: &[RemoteProject]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        self.projects.clear_in(&mut tx).await?;
        for project in remote {
            self.projects.insert_in(&mut tx, &project.to_record()).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn refresh_vocabulary(
        &self,
        client: &ApiClient,
        force: bool,
        outcome: &mut RefreshOutcome,
    ) -> Result<(), RepositoryError> {
        if self.can_skip("vocabulary_terms", force, outcome).await? {
            return Ok(());
        }
        let remote = match client.fetch_vocabulary().await {
            Ok(remote) => remote,
            Err(e) => return Self::note_failure("vocabulary_terms", &e, outcome),
        };
        if let Err(e) = self.replace_vocabulary(&remote).await {
            return Self::note_failure("vocabulary_terms", &e, outcome);
        }
        self.finish("vocabulary_terms", remote.len(), outcome).await
    }

    async fn replace_vocabulary(&self, remote: &[RemoteTerm]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        self.terms.clear_in(&mut tx).await?;
        for term in remote {
            self.terms.insert_in(&mut tx, &term.to_record()).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn can_skip(
        &self,
        table: &str,
        force: bool,
        outcome: &mut RefreshOutcome,
    ) -> Result<bool, RepositoryError> {
        if force {
            return Ok(false);
        }
        if self
            .stamps
            .is_fresh(table, Duration::hours(REFERENCE_MAX_AGE_HOURS))
            .await?
        {
            outcome.skipped.push(table.to_string());
            return Ok(true);
        }
        Ok(false)
    }

    fn note_failure(
        table: &str,
        error: &dyn std::fmt::Display,
        outcome: &mut RefreshOutcome,
    ) -> Result<(), RepositoryError> {
        tracing::warn!("Refreshing {} failed, keeping cached copy: {}", table, error);
        outcome.failed.push(table.to_string());
        Ok(())
    }

    async fn finish(
        &self,
        table: &str,
        count: usize,
        outcome: &mut RefreshOutcome,
    ) -> Result<(), RepositoryError> {
        self.stamps.touch(table).await?;
        outcome.refreshed.push(table.to_string());
        tracing::debug!("Replaced {} with {} row(s)", table, count);
        Ok(())
    }
}
