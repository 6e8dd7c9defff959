use sqlx::SqlitePool;
use uuid::Uuid;

/// One client-generated identity and, once the server has acknowledged the
/// aggregate, its server-assigned counterpart. The mapping outlives the
/// local root row, so dependents created later still resolve their parent.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct IdentityLink {
    pub client_uuid: String,
    pub server_id: Option<i64>,
}

pub struct IdentityLinkRepository {
    pool: SqlitePool,
}

impl IdentityLinkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Registers a client identity. Safe to call repeatedly; an existing
    /// link, promoted or not, is returned untouched.
    pub async fn register(&self, client_uuid: &str) -> Result<IdentityLink, sqlx::Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO identity_links (client_uuid, server_id) VALUES (?, NULL)",
        )
        .bind(client_uuid)
        .execute(&self.pool)
        .await?;
        self.find_by_uuid(client_uuid)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_uuid(
        &self,
        client_uuid: &str,
    ) -> Result<Option<IdentityLink>, sqlx::Error> {
        sqlx::query_as(
            "SELECT client_uuid, server_id FROM identity_links WHERE client_uuid = ?",
        )
        .bind(client_uuid)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn find_by_server_id(
        &self,
        server_id: i64,
    ) -> Result<Option<IdentityLink>, sqlx::Error> {
        sqlx::query_as("SELECT client_uuid, server_id FROM identity_links WHERE server_id = ?")
            .bind(server_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// One-way promotion, null to concrete exactly once. Promoting again
    /// with the same id is a no-op; a conflicting id is kept out and logged,
    /// the link never reverts.
    pub async fn promote(
        &self,
        client_uuid: &str,
        server_id: i64,
    ) -> Result<IdentityLink, sqlx::Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO identity_links (client_uuid, server_id) VALUES (?, NULL)",
        )
        .bind(client_uuid)
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "UPDATE identity_links SET server_id = ? WHERE client_uuid = ? AND server_id IS NULL",
        )
        .bind(server_id)
        .bind(client_uuid)
        .execute(&self.pool)
        .await?;

        let link = self
            .find_by_uuid(client_uuid)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        if link.server_id != Some(server_id) {
            tracing::warn!(
                "Identity link {} already maps to {:?}, ignoring server id {}",
                client_uuid,
                link.server_id,
                server_id
            );
        }
        Ok(link)
    }

    /// Looks up the link for a server identity, minting a fresh client
    /// identity when the aggregate is first learned about from the server.
    pub async fn ensure_for_server_id(
        &self,
        server_id: i64,
    ) -> Result<IdentityLink, sqlx::Error> {
        if let Some(link) = self.find_by_server_id(server_id).await? {
            return Ok(link);
        }
        let client_uuid = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO identity_links (client_uuid, server_id) VALUES (?, ?)")
            .bind(&client_uuid)
            .bind(server_id)
            .execute(&self.pool)
            .await?;
        Ok(IdentityLink {
            client_uuid,
            server_id: Some(server_id),
        })
    }
}
