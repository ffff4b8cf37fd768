use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::error::StoreError;
use crate::installer::{Installer, InstallerKey, InstallerMetadata};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable keyed storage for installer records.
///
/// `name` is the uniqueness key. `versions` is stored as an opaque JSON map;
/// both searches query it without a fixed column per attribute. Records are
/// returned with their ID as stored; callers normalize it with
/// [`Installer::migrate_id`].
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Get an installer by name or ID.
    async fn get(&self, key: InstallerKey<'_>) -> Result<Option<Installer>>;

    /// List all installers, ordered by name.
    async fn list(&self) -> Result<Vec<Installer>>;

    /// Insert a new installer. Fails with [`StoreError::Conflict`] if the name exists.
    async fn insert(&self, installer: &Installer) -> Result<()>;

    /// Update an installer identified by name.
    ///
    /// Sparse: an empty `id`, a `None` thumbnail or an empty `versions` map
    /// leave the stored value untouched.
    async fn update(&self, installer: &Installer) -> Result<()>;

    /// Installers with at least one version providing `token`.
    ///
    /// Returned records only carry the matching versions.
    async fn search_by_provider(&self, token: &str) -> Result<Vec<Installer>>;

    /// Free-text search over names and version content, best match first.
    async fn search(&self, term: &str) -> Result<Vec<Installer>>;
}

/// SQLite-backed installer catalog
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("catalog.db");
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS installers (
                name TEXT NOT NULL UNIQUE,
                id TEXT NOT NULL,
                thumbnail TEXT,
                versions TEXT NOT NULL DEFAULT '{}',
                search_document TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS installers_id ON installers (id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn decode(row: &SqliteRow) -> Result<Installer> {
        let versions: String = row.get("versions");
        let versions: BTreeMap<String, InstallerMetadata> = serde_json::from_str(&versions)?;

        Ok(Installer {
            id: row.get("id"),
            name: row.get("name"),
            thumbnail: row.get("thumbnail"),
            versions,
        })
    }

    fn decode_all(rows: &[SqliteRow]) -> Result<Vec<Installer>> {
        rows.iter().map(Self::decode).collect()
    }
}

#[async_trait]
impl CatalogStore for Store {
    async fn get(&self, key: InstallerKey<'_>) -> Result<Option<Installer>> {
        let (sql, value) = match key {
            InstallerKey::Name(name) => (
                "SELECT name, id, thumbnail, versions FROM installers WHERE name = ?",
                name,
            ),
            InstallerKey::Id(id) => (
                "SELECT name, id, thumbnail, versions FROM installers WHERE id = ? LIMIT 1",
                id,
            ),
        };

        let row = sqlx::query(sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn list(&self) -> Result<Vec<Installer>> {
        let rows = sqlx::query("SELECT name, id, thumbnail, versions FROM installers ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        Self::decode_all(&rows)
    }

    async fn insert(&self, installer: &Installer) -> Result<()> {
        let versions = serde_json::to_string(&installer.versions)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO installers (name, id, thumbnail, versions, search_document, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&installer.name)
        .bind(&installer.id)
        .bind(&installer.thumbnail)
        .bind(&versions)
        .bind(installer.search_document())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(
                format!("installer '{}' already exists", installer.name),
            ),
            e => StoreError::Database(e),
        })?;

        Ok(())
    }

    async fn update(&self, installer: &Installer) -> Result<()> {
        let id = (!installer.id.is_empty()).then_some(installer.id.as_str());
        let (versions, search_document) = if installer.versions.is_empty() {
            (None, None)
        } else {
            (
                Some(serde_json::to_string(&installer.versions)?),
                Some(installer.search_document()),
            )
        };
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE installers SET
                id = COALESCE(?, id),
                thumbnail = COALESCE(?, thumbnail),
                versions = COALESCE(?, versions),
                search_document = COALESCE(?, search_document),
                updated_at = ?
            WHERE name = ?
            "#,
        )
        .bind(id)
        .bind(&installer.thumbnail)
        .bind(&versions)
        .bind(&search_document)
        .bind(&now)
        .bind(&installer.name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(installer.name.clone()));
        }
        Ok(())
    }

    async fn search_by_provider(&self, token: &str) -> Result<Vec<Installer>> {
        let rows = sqlx::query(
            r#"
            SELECT name, id, thumbnail, versions FROM installers
            WHERE EXISTS (
                SELECT 1 FROM json_each(installers.versions) AS v, json_each(v.value, '$.provides') AS p
                WHERE p.value = ?
            )
            ORDER BY name
            "#,
        )
        .bind(token)
        .fetch_all(&self.pool)
        .await?;

        let mut installers = Self::decode_all(&rows)?;
        for installer in &mut installers {
            installer.versions.retain(|_, metadata| metadata.provides(token));
        }
        Ok(installers)
    }

    async fn search(&self, term: &str) -> Result<Vec<Installer>> {
        let tokens: Vec<String> = term.split_whitespace().map(str::to_lowercase).collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        // Relevance is the number of occurrences of each token in the
        // lower-cased search document.
        let score = vec![
            "(length(search_document) - length(replace(search_document, ?, ''))) / length(?)";
            tokens.len()
        ]
        .join(" + ");
        let sql = format!(
            r#"
            SELECT name, id, thumbnail, versions FROM (
                SELECT name, id, thumbnail, versions, {} AS score FROM installers
            )
            WHERE score > 0
            ORDER BY score DESC, name ASC
            "#,
            score
        );

        let mut query = sqlx::query(&sql);
        for token in &tokens {
            query = query.bind(token).bind(token);
        }
        let rows = query.fetch_all(&self.pool).await?;

        Self::decode_all(&rows)
    }
}
