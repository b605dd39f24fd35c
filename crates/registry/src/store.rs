//! Registry store trait and SQLite implementation.

use crate::error::{RegistryError, RegistryResult};
use crate::lock::{WriteGuard, WriteLock};
use crate::migrations;
use crate::repos::{ApplicationRepo, ArtifactRepo, UsageRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Combined registry trait.
#[async_trait]
pub trait Registry: ArtifactRepo + ApplicationRepo + UsageRepo + Send + Sync {
    /// Apply pending schema upgrades.
    async fn migrate(&self) -> RegistryResult<()>;

    /// Check connectivity and on-disk integrity.
    async fn health_check(&self) -> RegistryResult<()>;

    /// Number of committed write transactions since open.
    fn write_count(&self) -> u64;
}

/// SQLite-based registry.
pub struct SqliteRegistry {
    pool: Pool<Sqlite>,
    lock: WriteLock,
    path: Option<PathBuf>,
    writes: AtomicU64,
}

impl SqliteRegistry {
    /// Open (creating if missing) the registry database at `path`.
    pub async fn new(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            lock: WriteLock::for_database(path),
            path: Some(path.to_path_buf()),
            writes: AtomicU64::new(0),
        };
        store.quick_check().await?;
        {
            let _guard = store.lock.acquire().await?;
            store.migrate().await?;
        }

        tracing::debug!(path = %path.display(), "Opened registry");
        Ok(store)
    }

    /// Private in-memory registry for tests.
    pub async fn in_memory() -> RegistryResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // The database lives only as long as its single connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            lock: WriteLock::process_local(),
            path: None,
            writes: AtomicU64::new(0),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Database file location, `None` for in-memory registries.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn quick_check(&self) -> RegistryResult<()> {
        let rows: Vec<String> = sqlx::query_scalar("PRAGMA quick_check")
            .fetch_all(&self.pool)
            .await?;
        match rows.as_slice() {
            [ok] if ok == "ok" => Ok(()),
            _ => Err(RegistryError::Corruption(rows.join("; "))),
        }
    }

    async fn write_lock(&self) -> RegistryResult<WriteGuard<'_>> {
        self.lock.acquire().await
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn migrate(&self) -> RegistryResult<()> {
        migrations::run(&self.pool).await
    }

    async fn health_check(&self) -> RegistryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        self.quick_check().await
    }

    fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use hoard_core::{ContentHash, SourceType};
    use sqlx::SqliteConnection;
    use std::collections::HashMap;
    use time::OffsetDateTime;
    use uuid::Uuid;

    const SELECT_APPS_FOR_ARTIFACT: &str = r#"
        SELECT a.name FROM usage u
        JOIN applications a ON a.app_id = u.app_id
        WHERE u.artifact_id = ?
        ORDER BY a.name
    "#;

    /// Delete one artifact row inside `conn`, refusing while apps use it.
    async fn delete_row(
        conn: &mut SqliteConnection,
        identifier: &str,
        force: bool,
    ) -> RegistryResult<ArtifactRow> {
        let row = sqlx::query_as::<_, ArtifactRow>("SELECT * FROM artifacts WHERE identifier = ?")
            .bind(identifier)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| RegistryError::NotFound(identifier.to_string()))?;

        let apps: Vec<String> = sqlx::query_scalar(SELECT_APPS_FOR_ARTIFACT)
            .bind(row.artifact_id)
            .fetch_all(&mut *conn)
            .await?;
        if !apps.is_empty() && !force {
            return Err(RegistryError::InUse {
                identifier: identifier.to_string(),
                apps,
            });
        }

        sqlx::query("DELETE FROM artifacts WHERE artifact_id = ?")
            .bind(row.artifact_id)
            .execute(&mut *conn)
            .await?;
        Ok(row)
    }

    /// Make `canonical` the holder at `canonical_path` and point `dependents` at it.
    async fn relink_rows(
        conn: &mut SqliteConnection,
        canonical: &str,
        canonical_path: &Path,
        dependents: &[String],
    ) -> RegistryResult<()> {
        let now = OffsetDateTime::now_utc();
        let path = path_str(canonical_path);

        let promoted = sqlx::query(
            r#"
            UPDATE artifacts
            SET canonical_path = ?, is_symlink = 0, symlink_target = NULL, last_verified_at = ?
            WHERE identifier = ?
            "#,
        )
        .bind(&path)
        .bind(now)
        .bind(canonical)
        .execute(&mut *conn)
        .await?;
        if promoted.rows_affected() == 0 {
            return Err(RegistryError::NotFound(canonical.to_string()));
        }

        for dependent in dependents.iter().filter(|d| d.as_str() != canonical) {
            let updated = sqlx::query(
                r#"
                UPDATE artifacts SET is_symlink = 1, symlink_target = ?, last_verified_at = ?
                WHERE identifier = ?
                "#,
            )
            .bind(&path)
            .bind(now)
            .bind(dependent)
            .execute(&mut *conn)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(RegistryError::NotFound(dependent.clone()));
            }
        }
        Ok(())
    }

    #[async_trait]
    impl ArtifactRepo for SqliteRegistry {
        async fn upsert_artifact(&self, artifact: &NewArtifact) -> RegistryResult<UpsertOutcome> {
            if artifact.is_symlink != artifact.symlink_target.is_some() {
                return Err(RegistryError::Internal(format!(
                    "{}: symlink_target must be set iff is_symlink",
                    artifact.identifier
                )));
            }
            let size = artifact.size_i64()?;
            let _guard = self.write_lock().await?;
            let mut tx = self.pool.begin().await?;

            let existing = sqlx::query_as::<_, ArtifactRow>(
                "SELECT * FROM artifacts WHERE identifier = ?",
            )
            .bind(&artifact.identifier)
            .fetch_optional(&mut *tx)
            .await?;

            let now = OffsetDateTime::now_utc();
            let canonical_path = path_str(&artifact.canonical_path);
            let target = artifact.symlink_target.as_deref().map(path_str);
            let hash = artifact.content_hash.map(|h| h.to_hex());

            let outcome = match existing {
                Some(row) if artifact.matches(&row) => {
                    // Nothing to write; the transaction rolls back on drop.
                    return Ok(UpsertOutcome::Unchanged);
                }
                Some(row) => {
                    // Keep a known hash only while the size still agrees with it.
                    let hash = match hash {
                        Some(hash) => Some(hash),
                        None if row.size_bytes == size => row.content_hash.clone(),
                        None => None,
                    };
                    sqlx::query(
                        r#"
                        UPDATE artifacts
                        SET canonical_path = ?, size_bytes = ?, content_hash = ?, source_type = ?,
                            is_symlink = ?, symlink_target = ?, last_verified_at = ?
                        WHERE artifact_id = ?
                        "#,
                    )
                    .bind(&canonical_path)
                    .bind(size)
                    .bind(hash)
                    .bind(artifact.source_type.as_str())
                    .bind(artifact.is_symlink)
                    .bind(&target)
                    .bind(now)
                    .bind(row.artifact_id)
                    .execute(&mut *tx)
                    .await?;
                    UpsertOutcome::Updated
                }
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO artifacts (
                            artifact_id, identifier, canonical_path, size_bytes, content_hash,
                            source_type, is_symlink, symlink_target, created_at, last_verified_at
                        )
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(Uuid::new_v4())
                    .bind(&artifact.identifier)
                    .bind(&canonical_path)
                    .bind(size)
                    .bind(hash)
                    .bind(artifact.source_type.as_str())
                    .bind(artifact.is_symlink)
                    .bind(&target)
                    .bind(now)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    UpsertOutcome::Inserted
                }
            };

            tx.commit().await?;
            self.record_write();
            tracing::debug!(identifier = %artifact.identifier, ?outcome, "Upserted artifact");
            Ok(outcome)
        }

        async fn get_artifact(&self, identifier: &str) -> RegistryResult<Option<ArtifactRow>> {
            let row = sqlx::query_as::<_, ArtifactRow>(
                "SELECT * FROM artifacts WHERE identifier = ?",
            )
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_artifacts(
            &self,
            source: Option<SourceType>,
        ) -> RegistryResult<Vec<ArtifactRow>> {
            let rows = match source {
                Some(source) => {
                    sqlx::query_as::<_, ArtifactRow>(
                        "SELECT * FROM artifacts WHERE source_type = ? ORDER BY identifier",
                    )
                    .bind(source.as_str())
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_as::<_, ArtifactRow>(
                        "SELECT * FROM artifacts ORDER BY identifier",
                    )
                    .fetch_all(&self.pool)
                    .await?
                }
            };
            Ok(rows)
        }

        async fn remove_artifact(
            &self,
            identifier: &str,
            force: bool,
        ) -> RegistryResult<ArtifactRow> {
            let _guard = self.write_lock().await?;
            let mut tx = self.pool.begin().await?;
            let row = delete_row(&mut *tx, identifier, force).await?;
            tx.commit().await?;
            self.record_write();
            tracing::debug!(identifier, "Removed artifact");
            Ok(row)
        }

        async fn find_orphaned(&self) -> RegistryResult<Vec<ArtifactRow>> {
            let rows = sqlx::query_as::<_, ArtifactRow>(
                r#"
                SELECT * FROM artifacts ar
                WHERE NOT EXISTS (SELECT 1 FROM usage u WHERE u.artifact_id = ar.artifact_id)
                ORDER BY ar.identifier
                "#,
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn set_content_hash(&self, identifier: &str, hash: ContentHash) -> RegistryResult<()> {
            let _guard = self.write_lock().await?;
            let hex = hash.to_hex();

            let current: Option<Option<String>> =
                sqlx::query_scalar("SELECT content_hash FROM artifacts WHERE identifier = ?")
                    .bind(identifier)
                    .fetch_optional(&self.pool)
                    .await?;
            match current {
                None => return Err(RegistryError::NotFound(identifier.to_string())),
                Some(Some(existing)) if existing == hex => return Ok(()),
                Some(_) => {}
            }

            sqlx::query(
                "UPDATE artifacts SET content_hash = ?, last_verified_at = ? WHERE identifier = ?",
            )
            .bind(hex)
            .bind(OffsetDateTime::now_utc())
            .bind(identifier)
            .execute(&self.pool)
            .await?;
            self.record_write();
            Ok(())
        }

        async fn mark_symlink(&self, identifier: &str, target: &Path) -> RegistryResult<()> {
            let _guard = self.write_lock().await?;
            let result = sqlx::query(
                r#"
                UPDATE artifacts SET is_symlink = 1, symlink_target = ?, last_verified_at = ?
                WHERE identifier = ?
                "#,
            )
            .bind(path_str(target))
            .bind(OffsetDateTime::now_utc())
            .bind(identifier)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(RegistryError::NotFound(identifier.to_string()));
            }
            self.record_write();
            Ok(())
        }

        async fn relink_group(
            &self,
            canonical: &str,
            canonical_path: &Path,
            dependents: &[String],
        ) -> RegistryResult<()> {
            let _guard = self.write_lock().await?;
            let mut tx = self.pool.begin().await?;
            relink_rows(&mut *tx, canonical, canonical_path, dependents).await?;
            tx.commit().await?;
            self.record_write();
            Ok(())
        }

        async fn promote_artifact(
            &self,
            removed: &str,
            force: bool,
            heir: &str,
            heir_path: &Path,
            others: &[String],
        ) -> RegistryResult<ArtifactRow> {
            let _guard = self.write_lock().await?;
            let mut tx = self.pool.begin().await?;
            let row = delete_row(&mut *tx, removed, force).await?;
            relink_rows(&mut *tx, heir, heir_path, others).await?;
            tx.commit().await?;
            self.record_write();
            tracing::debug!(removed, heir, relinked = others.len(), "Promoted artifact");
            Ok(row)
        }

        async fn symlinks_targeting(&self, path: &Path) -> RegistryResult<Vec<ArtifactRow>> {
            let rows = sqlx::query_as::<_, ArtifactRow>(
                r#"
                SELECT * FROM artifacts
                WHERE is_symlink = 1 AND symlink_target = ?
                ORDER BY created_at, identifier
                "#,
            )
            .bind(path_str(path))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl ApplicationRepo for SqliteRegistry {
        async fn register_app(&self, name: &str, root_path: &Path) -> RegistryResult<ApplicationRow> {
            let _guard = self.write_lock().await?;
            let root = path_str(root_path);

            let existing = sqlx::query_as::<_, ApplicationRow>(
                "SELECT * FROM applications WHERE name = ?",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(app) = existing {
                if app.root_path == root {
                    return Ok(app);
                }
                return Err(RegistryError::AlreadyExists(format!(
                    "application '{name}' is registered at {}",
                    app.root_path
                )));
            }

            let app = ApplicationRow {
                app_id: Uuid::new_v4(),
                name: name.to_string(),
                root_path: root,
                registered_at: OffsetDateTime::now_utc(),
            };
            sqlx::query(
                "INSERT INTO applications (app_id, name, root_path, registered_at) VALUES (?, ?, ?, ?)",
            )
            .bind(app.app_id)
            .bind(&app.name)
            .bind(&app.root_path)
            .bind(app.registered_at)
            .execute(&self.pool)
            .await?;
            self.record_write();
            Ok(app)
        }

        async fn unregister_app(&self, name: &str) -> RegistryResult<u64> {
            let _guard = self.write_lock().await?;
            let mut tx = self.pool.begin().await?;

            let app_id: Option<Uuid> =
                sqlx::query_scalar("SELECT app_id FROM applications WHERE name = ?")
                    .bind(name)
                    .fetch_optional(&mut *tx)
                    .await?;
            let app_id = app_id.ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

            let released = sqlx::query("DELETE FROM usage WHERE app_id = ?")
                .bind(app_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            sqlx::query("DELETE FROM applications WHERE app_id = ?")
                .bind(app_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            self.record_write();
            Ok(released)
        }

        async fn get_app(&self, name: &str) -> RegistryResult<Option<ApplicationRow>> {
            let row = sqlx::query_as::<_, ApplicationRow>(
                "SELECT * FROM applications WHERE name = ?",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_apps(&self) -> RegistryResult<Vec<ApplicationRow>> {
            let rows = sqlx::query_as::<_, ApplicationRow>(
                "SELECT * FROM applications ORDER BY name",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl UsageRepo for SqliteRegistry {
        async fn link_usage(&self, identifier: &str, app_name: &str) -> RegistryResult<UsageRow> {
            let _guard = self.write_lock().await?;
            let mut tx = self.pool.begin().await?;

            let artifact_id: Uuid =
                sqlx::query_scalar("SELECT artifact_id FROM artifacts WHERE identifier = ?")
                    .bind(identifier)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or_else(|| RegistryError::NotFound(identifier.to_string()))?;
            let app_id: Uuid = sqlx::query_scalar("SELECT app_id FROM applications WHERE name = ?")
                .bind(app_name)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| RegistryError::NotFound(format!("application '{app_name}'")))?;

            let row = sqlx::query_as::<_, UsageRow>(
                r#"
                INSERT INTO usage (artifact_id, app_id, last_used_at)
                VALUES (?, ?, ?)
                ON CONFLICT (artifact_id, app_id) DO UPDATE SET last_used_at = excluded.last_used_at
                RETURNING *
                "#,
            )
            .bind(artifact_id)
            .bind(app_id)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            self.record_write();
            Ok(row)
        }

        async fn apps_using(&self, identifier: &str) -> RegistryResult<Vec<String>> {
            let apps = sqlx::query_scalar(
                r#"
                SELECT a.name FROM usage u
                JOIN applications a ON a.app_id = u.app_id
                JOIN artifacts ar ON ar.artifact_id = u.artifact_id
                WHERE ar.identifier = ?
                ORDER BY a.name
                "#,
            )
            .bind(identifier)
            .fetch_all(&self.pool)
            .await?;
            Ok(apps)
        }

        async fn usage_map(&self) -> RegistryResult<HashMap<String, Vec<String>>> {
            let rows: Vec<(String, String)> = sqlx::query_as(
                r#"
                SELECT ar.identifier, a.name FROM usage u
                JOIN applications a ON a.app_id = u.app_id
                JOIN artifacts ar ON ar.artifact_id = u.artifact_id
                ORDER BY ar.identifier, a.name
                "#,
            )
            .fetch_all(&self.pool)
            .await?;

            let mut map: HashMap<String, Vec<String>> = HashMap::new();
            for (identifier, app) in rows {
                map.entry(identifier).or_default().push(app);
            }
            Ok(map)
        }
    }
}
