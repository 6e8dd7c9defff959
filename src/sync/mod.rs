pub mod client;
pub mod payload;
pub mod protocol;
pub mod reference;
pub mod upload;

pub use client::{check_server, ApiClient, ApiError};
pub use reference::{ReferenceCacheSync, RefreshOutcome};
pub use upload::{SyncSummary, UploadCoordinator, UploadError};

use sqlx::SqlitePool;

use crate::config::Config;

/// Best-effort upload pass after a local write. Working offline is normal
/// operation, so nothing here surfaces as an error to the caller.
pub async fn maybe_auto_sync(pool: &SqlitePool, config: &Config) {
    if !config.sync.auto_sync || !config.sync.is_configured() {
        return;
    }

    let client = match ApiClient::from_config(&config.sync) {
        Ok(client) => client,
        Err(_) => return,
    };

    let server_url = config.sync.server_url.as_deref().unwrap_or_default();
    if !check_server(server_url).await {
        eprintln!("Auto-sync: server unreachable, skipping");
        return;
    }

    let coordinator = match UploadCoordinator::new(pool.clone()) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            eprintln!("Auto-sync: {}", e);
            return;
        }
    };
    match coordinator.run(&client).await {
        Ok(summary) => {
            let uploaded = summary.respondents.uploaded + summary.interactions.rows_uploaded;
            if uploaded > 0 {
                println!("Auto-sync: uploaded {} record(s)", uploaded);
            }
        }
        Err(e) => eprintln!("Auto-sync: {}", e),
    }
}
