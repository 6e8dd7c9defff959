//! Sync CLI commands for exchanging data with the server.

use clap::{Args, Subcommand};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::{Filter, Repository, RepositoryError, Value};
use crate::sync::{
    check_server, ApiClient, ApiError, ReferenceCacheSync, RefreshOutcome, SyncSummary,
    UploadCoordinator, UploadError,
};

/// Sync with remote server
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration, server status, and pending work
    Status,
    /// Push unsynced respondents and interactions
    Upload,
    /// Push a single respondent aggregate
    UploadOne {
        /// Respondent UUID
        uuid: String,
    },
    /// Refresh cached reference data
    Refresh {
        /// Refresh even when the cached copy is fresh
        #[arg(long, short)]
        force: bool,
    },
}

impl SyncCommand {
    pub async fn run(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        match &self.command {
            None => self.full_sync(pool, config).await,
            Some(SyncSubcommand::Status) => self.status(pool, config).await,
            Some(SyncSubcommand::Upload) => self.upload(pool, config).await,
            Some(SyncSubcommand::UploadOne { uuid }) => self.upload_one(pool, config, uuid).await,
            Some(SyncSubcommand::Refresh { force }) => self.refresh(pool, config, *force).await,
        }
    }

    /// Upload first so freshly-promoted data is on the server, then pull
    /// reference updates.
    async fn full_sync(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        let client = self.connect(config).await?;

        println!("Syncing with server...");
        println!();

        let coordinator = UploadCoordinator::new(pool.clone())?;
        let summary = coordinator.run(&client).await?;
        print_upload_summary(&summary);

        let reference = ReferenceCacheSync::new(pool.clone())?;
        let outcome = reference.refresh_all(&client, false).await?;
        print_refresh_outcome(&outcome);

        println!();
        println!("Sync complete.");
        Ok(())
    }

    async fn upload(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        let client = self.connect(config).await?;

        println!("Uploading local data...");
        println!();

        let coordinator = UploadCoordinator::new(pool.clone())?;
        let summary = coordinator.run(&client).await?;
        print_upload_summary(&summary);
        Ok(())
    }

    async fn upload_one(
        &self,
        pool: &SqlitePool,
        config: &Config,
        uuid: &str,
    ) -> Result<(), SyncCommandError> {
        let client = self.connect(config).await?;

        let coordinator = UploadCoordinator::new(pool.clone())?;
        let server_id = coordinator.upload_respondent_single(&client, uuid).await?;
        println!("✓ uploaded {} as server id {}", uuid, server_id);
        Ok(())
    }

    async fn refresh(
        &self,
        pool: &SqlitePool,
        config: &Config,
        force: bool,
    ) -> Result<(), SyncCommandError> {
        let client = self.connect(config).await?;

        println!("Refreshing reference data...");
        println!();

        let reference = ReferenceCacheSync::new(pool.clone())?;
        let outcome = reference.refresh_all(&client, force).await?;
        print_refresh_outcome(&outcome);
        Ok(())
    }

    async fn status(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        println!("Sync Configuration");
        println!("==================");
        println!();

        if !config.sync.is_configured() {
            println!("Status: Not configured");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  sync:");
            println!("    server_url: \"https://sync.example.org\"");
            println!("    api_key: \"your-api-key\"");
            println!("    auto_sync: false");
            println!();
            println!("Or set environment variables:");
            println!("  FIELDSYNC_SYNC_URL");
            println!("  FIELDSYNC_SYNC_API_KEY");
            return Ok(());
        }

        let server_url = config.sync.server_url.as_deref().unwrap_or_default();
        let api_key = config.sync.api_key.as_deref().unwrap_or_default();
        let key_prefix: String = api_key.chars().take(8).collect();

        println!("Server:    {}", server_url);
        println!("API Key:   {}...", key_prefix);
        println!(
            "Auto-sync: {}",
            if config.sync.auto_sync {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!();

        let respondents = Repository::new(pool.clone(), "respondents")?;
        let interactions = Repository::new(pool.clone(), "interactions")?;
        let unsynced = [("synced", Filter::Eq(Value::from(false)))];
        println!(
            "Pending upload: {} respondent(s), {} interaction(s)",
            respondents.count(&unsynced).await?,
            interactions.count(&unsynced).await?
        );
        println!();

        print!("Server status: ");
        if check_server(server_url).await {
            println!("✓ connected");
        } else {
            println!("✗ unreachable");
        }

        Ok(())
    }

    async fn connect(&self, config: &Config) -> Result<ApiClient, SyncCommandError> {
        let client = ApiClient::from_config(&config.sync)?;
        let server_url = config.sync.server_url.as_deref().unwrap_or_default();
        if !check_server(server_url).await {
            return Err(SyncCommandError::Unreachable(server_url.to_string()));
        }
        Ok(client)
    }
}

fn print_upload_summary(summary: &SyncSummary) {
    let respondents = &summary.respondents;
    if respondents.uploaded == 0 && respondents.failed == 0 {
        println!("  ✓ respondents: nothing to upload");
    } else if respondents.failed == 0 {
        println!("  ✓ respondents: {} uploaded", respondents.uploaded);
    } else {
        println!(
            "  ✗ respondents: {} uploaded, {} failed",
            respondents.uploaded, respondents.failed
        );
    }

    let interactions = &summary.interactions;
    if interactions.groups_uploaded == 0 && interactions.groups_failed == 0 {
        println!("  ✓ interactions: nothing to upload");
    } else if interactions.groups_failed == 0 {
        println!(
            "  ✓ interactions: {} uploaded for {} respondent(s)",
            interactions.rows_uploaded, interactions.groups_uploaded
        );
    } else {
        println!(
            "  ✗ interactions: {} uploaded for {} respondent(s), {} respondent(s) failed",
            interactions.rows_uploaded, interactions.groups_uploaded, interactions.groups_failed
        );
    }
}

fn print_refresh_outcome(outcome: &RefreshOutcome) {
    for table in &outcome.refreshed {
        println!("  ✓ {} refreshed", table);
    }
    for table in &outcome.skipped {
        println!("  ✓ {} up to date", table);
    }
    for table in &outcome.failed {
        println!("  ✗ {} failed", table);
    }
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    Api(ApiError),
    Upload(UploadError),
    Store(RepositoryError),
    Unreachable(String),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::Api(e) => write!(f, "{}", e),
            SyncCommandError::Upload(e) => write!(f, "{}", e),
            SyncCommandError::Store(e) => write!(f, "{}", e),
            SyncCommandError::Unreachable(url) => {
                write!(f, "Server {} is unreachable. Try again later.", url)
            }
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::Api(e) => Some(e),
            SyncCommandError::Upload(e) => Some(e),
            SyncCommandError::Store(e) => Some(e),
            SyncCommandError::Unreachable(_) => None,
        }
    }
}

impl From<ApiError> for SyncCommandError {
    fn from(e: ApiError) -> Self {
        SyncCommandError::Api(e)
    }
}

impl From<UploadError> for SyncCommandError {
    fn from(e: UploadError) -> Self {
        SyncCommandError::Upload(e)
    }
}

impl From<RepositoryError> for SyncCommandError {
    fn from(e: RepositoryError) -> Self {
        SyncCommandError::Store(e)
    }
}
