//! Ordered schema upgrades keyed by `PRAGMA user_version`.
//!
//! Each upgrade runs in its own transaction together with the version bump.
//! New schema changes are appended; existing entries never change.

use crate::error::{RegistryError, RegistryResult};
use sqlx::{Connection, Executor, Pool, Sqlite};

struct Upgrade {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

const UPGRADES: &[Upgrade] = &[
    Upgrade {
        version: 1,
        description: "artifact, application and usage tables",
        sql: V1_SQL,
    },
    Upgrade {
        version: 2,
        description: "indexes for duplicate scans and symlink lookups",
        sql: V2_SQL,
    },
];

pub(crate) fn latest_version() -> i64 {
    UPGRADES.last().map(|u| u.version).unwrap_or(0)
}

/// Bring the schema up to date, refusing databases written by a newer build.
pub(crate) async fn run(pool: &Pool<Sqlite>) -> RegistryResult<()> {
    let mut conn = pool.acquire().await?;

    let current: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(&mut *conn)
        .await?;
    if current > latest_version() {
        return Err(RegistryError::Corruption(format!(
            "registry schema version {current} is newer than supported version {}",
            latest_version()
        )));
    }

    for upgrade in UPGRADES.iter().filter(|u| u.version > current) {
        let mut tx = conn.begin().await?;
        (&mut *tx).execute(sqlx::raw_sql(upgrade.sql)).await?;
        let bump = format!("PRAGMA user_version = {}", upgrade.version);
        (&mut *tx).execute(sqlx::raw_sql(&bump)).await?;
        tx.commit().await?;
        tracing::info!(
            version = upgrade.version,
            description = upgrade.description,
            "Applied registry schema upgrade"
        );
    }

    Ok(())
}

const V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS artifacts (
    artifact_id BLOB PRIMARY KEY,
    identifier TEXT NOT NULL UNIQUE,
    canonical_path TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    content_hash TEXT,
    source_type TEXT NOT NULL,
    is_symlink INTEGER NOT NULL DEFAULT 0,
    symlink_target TEXT,
    created_at TEXT NOT NULL,
    last_verified_at TEXT NOT NULL,
    CHECK ((is_symlink = 0 AND symlink_target IS NULL)
        OR (is_symlink = 1 AND symlink_target IS NOT NULL))
);
CREATE INDEX IF NOT EXISTS idx_artifacts_source ON artifacts(source_type);

CREATE TABLE IF NOT EXISTS applications (
    app_id BLOB PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    root_path TEXT NOT NULL,
    registered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS usage (
    artifact_id BLOB NOT NULL REFERENCES artifacts(artifact_id) ON DELETE CASCADE,
    app_id BLOB NOT NULL REFERENCES applications(app_id) ON DELETE CASCADE,
    last_used_at TEXT NOT NULL,
    PRIMARY KEY (artifact_id, app_id)
);
CREATE INDEX IF NOT EXISTS idx_usage_app ON usage(app_id);
"#;

const V2_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_artifacts_size ON artifacts(size_bytes);
CREATE INDEX IF NOT EXISTS idx_artifacts_hash ON artifacts(content_hash) WHERE content_hash IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_artifacts_symlink_target ON artifacts(symlink_target) WHERE symlink_target IS NOT NULL;
"#;
