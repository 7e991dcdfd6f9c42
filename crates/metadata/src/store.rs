//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult, map_unique};
use crate::repos::{
    ArtifactRepo, BlobRepo, ChartRepo, HardUpdate, ImmutableRuleRepo, ProjectRepo, QuotaRepo,
    UsageUpdate,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    QuotaRepo + ProjectRepo + ArtifactRepo + BlobRepo + ChartRepo + ImmutableRuleRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout = Duration::from_secs(query_timeout_secs.unwrap_or(30));

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // Single connection: writers are serialised and the usage
        // read-modify-write needs no row lock.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout,
        };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs = store.query_timeout.as_secs(),
            "SQLite metadata store ready; query timeout is advisory only"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn warn_if_slow(&self, started: std::time::Instant, operation: &'static str) {
        let elapsed = started.elapsed();
        if elapsed > self.query_timeout {
            tracing::warn!(
                operation,
                elapsed_ms = elapsed.as_millis() as u64,
                "SQLite operation exceeded advisory query timeout"
            );
        }
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Insert a quota row and its zeroed (or given) usage row on `conn`.
async fn insert_quota_rows(
    conn: &mut SqliteConnection,
    reference: &str,
    reference_id: &str,
    hard: &tollgate_core::ResourceList,
    used: &tollgate_core::ResourceList,
) -> MetadataResult<i64> {
    let now = time::OffsetDateTime::now_utc();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO quota (reference, reference_id, hard, creation_time, update_time) VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(reference)
    .bind(reference_id)
    .bind(hard.to_json())
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_unique(e, || format!("quota {reference}/{reference_id}")))?;

    sqlx::query(
        "INSERT INTO quota_usage (reference, reference_id, used, creation_time, update_time) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(reference)
    .bind(reference_id)
    .bind(used.to_json())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_unique(e, || format!("quota usage {reference}/{reference_id}")))?;

    Ok(id)
}

/// Current `(hard, used)` of a quota, read inside `tx`.
async fn select_hard_and_used(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    reference: &str,
    reference_id: &str,
) -> MetadataResult<(tollgate_core::ResourceList, tollgate_core::ResourceList)> {
    let row: Option<(String, String)> = sqlx::query_as(
        r#"
        SELECT q.hard, u.used
        FROM quota q
        JOIN quota_usage u ON u.reference = q.reference AND u.reference_id = q.reference_id
        WHERE q.reference = ? AND q.reference_id = ?
        "#,
    )
    .bind(reference)
    .bind(reference_id)
    .fetch_optional(&mut **tx)
    .await?;

    let Some((hard, used)) = row else {
        return Err(MetadataError::NotFound(format!(
            "quota {reference}/{reference_id}"
        )));
    };
    Ok((
        tollgate_core::ResourceList::from_json(&hard)?,
        tollgate_core::ResourceList::from_json(&used)?,
    ))
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;
    use tollgate_core::{ImmutableRule, ResourceList};

    const QUOTA_SELECT: &str = r#"
        SELECT q.id, q.reference, q.reference_id, q.hard, u.used, q.creation_time, u.update_time
        FROM quota q
        JOIN quota_usage u ON u.reference = q.reference AND u.reference_id = q.reference_id
        WHERE q.reference = ? AND q.reference_id = ?
    "#;

    const ARTIFACT_COLUMNS: &str =
        "id, project_id, repository, tag, digest, kind, creation_time, push_time";

    #[async_trait]
    impl QuotaRepo for SqliteStore {
        async fn create_quota(
            &self,
            reference: &str,
            reference_id: &str,
            hard: &ResourceList,
            used: &ResourceList,
        ) -> MetadataResult<i64> {
            let mut tx = self.pool.begin().await?;
            let id = insert_quota_rows(&mut *tx, reference, reference_id, hard, used).await?;
            tx.commit().await?;
            Ok(id)
        }

        async fn ensure_quota(
            &self,
            reference: &str,
            reference_id: &str,
            hard: &ResourceList,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM quota WHERE reference = ? AND reference_id = ?)",
            )
            .bind(reference)
            .bind(reference_id)
            .fetch_one(&mut *tx)
            .await?;
            if exists {
                return Ok(false);
            }
            match insert_quota_rows(&mut *tx, reference, reference_id, hard, &hard.zero()).await {
                Ok(_) => {
                    tx.commit().await?;
                    Ok(true)
                }
                Err(MetadataError::AlreadyExists(_)) => Ok(false),
                Err(e) => Err(e),
            }
        }

        async fn get_quota(
            &self,
            reference: &str,
            reference_id: &str,
        ) -> MetadataResult<Option<Quota>> {
            let row = sqlx::query_as::<_, QuotaRow>(QUOTA_SELECT)
                .bind(reference)
                .bind(reference_id)
                .fetch_optional(&self.pool)
                .await?;
            row.map(Quota::try_from).transpose()
        }

        async fn update_quota_hard(
            &self,
            reference: &str,
            reference_id: &str,
            update: &HardUpdate,
        ) -> MetadataResult<ResourceList> {
            let mut tx = self.pool.begin().await?;
            let (hard, used) = select_hard_and_used(&mut tx, reference, reference_id).await?;

            let next = update(&hard, &used).map_err(MetadataError::Rejected)?;

            sqlx::query(
                "UPDATE quota SET hard = ?, update_time = ? WHERE reference = ? AND reference_id = ?",
            )
            .bind(next.to_json())
            .bind(OffsetDateTime::now_utc())
            .bind(reference)
            .bind(reference_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(used)
        }

        async fn update_quota_usage(
            &self,
            reference: &str,
            reference_id: &str,
            update: &UsageUpdate,
        ) -> MetadataResult<ResourceList> {
            let started = std::time::Instant::now();
            let mut tx = self.pool.begin().await?;
            let (hard, used) = select_hard_and_used(&mut tx, reference, reference_id).await?;

            // Dropping `tx` on the error path rolls back.
            let next = update(&hard, &used).map_err(MetadataError::Rejected)?;

            sqlx::query(
                "UPDATE quota_usage SET used = ?, update_time = ? WHERE reference = ? AND reference_id = ?",
            )
            .bind(next.to_json())
            .bind(OffsetDateTime::now_utc())
            .bind(reference)
            .bind(reference_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            self.warn_if_slow(started, "update_quota_usage");
            Ok(next)
        }
    }

    #[async_trait]
    impl ProjectRepo for SqliteStore {
        async fn create_project(
            &self,
            name: &str,
            owner_name: Option<&str>,
        ) -> MetadataResult<ProjectRow> {
            let project = sqlx::query_as::<_, ProjectRow>(
                "INSERT INTO projects (name, owner_name, creation_time) VALUES (?, ?, ?) RETURNING project_id, name, owner_name, creation_time",
            )
            .bind(name)
            .bind(owner_name)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_unique(e, || format!("project '{name}'")))?;
            Ok(project)
        }

        async fn delete_project(&self, project_id: i64) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM projects WHERE project_id = ?")
                .bind(project_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn get_project(&self, project_id: i64) -> MetadataResult<Option<ProjectRow>> {
            let row = sqlx::query_as::<_, ProjectRow>(
                "SELECT project_id, name, owner_name, creation_time FROM projects WHERE project_id = ?",
            )
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_project_by_name(&self, name: &str) -> MetadataResult<Option<ProjectRow>> {
            let row = sqlx::query_as::<_, ProjectRow>(
                "SELECT project_id, name, owner_name, creation_time FROM projects WHERE name = ?",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_projects(&self) -> MetadataResult<Vec<ProjectRow>> {
            let rows = sqlx::query_as::<_, ProjectRow>(
                "SELECT project_id, name, owner_name, creation_time FROM projects ORDER BY name",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl ArtifactRepo for SqliteStore {
        async fn get_artifact(
            &self,
            repository: &str,
            tag: &str,
        ) -> MetadataResult<Option<ArtifactRow>> {
            let row = sqlx::query_as::<_, ArtifactRow>(&format!(
                "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE repository = ? AND tag = ?"
            ))
            .bind(repository)
            .bind(tag)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_artifacts_by_digest(
            &self,
            repository: &str,
            digest: &str,
        ) -> MetadataResult<Vec<ArtifactRow>> {
            let rows = sqlx::query_as::<_, ArtifactRow>(&format!(
                "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE repository = ? AND digest = ? ORDER BY id"
            ))
            .bind(repository)
            .bind(digest)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn upsert_artifact(&self, artifact: &NewArtifact) -> MetadataResult<ArtifactRow> {
            let now = OffsetDateTime::now_utc();
            let row = sqlx::query_as::<_, ArtifactRow>(&format!(
                r#"
                INSERT INTO artifacts (project_id, repository, tag, digest, kind, creation_time, push_time)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(repository, tag) DO UPDATE
                SET digest = excluded.digest, kind = excluded.kind, push_time = excluded.push_time
                RETURNING {ARTIFACT_COLUMNS}
                "#
            ))
            .bind(artifact.project_id)
            .bind(&artifact.repository)
            .bind(&artifact.tag)
            .bind(&artifact.digest)
            .bind(&artifact.kind)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn delete_artifacts_by_digest(
            &self,
            repository: &str,
            digest: &str,
        ) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM artifacts WHERE repository = ? AND digest = ?")
                .bind(repository)
                .bind(digest)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }

        async fn list_repositories(&self) -> MetadataResult<Vec<String>> {
            let rows: Vec<String> =
                sqlx::query_scalar("SELECT DISTINCT repository FROM artifacts ORDER BY repository")
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows)
        }

        async fn add_artifact_blobs(
            &self,
            artifact_digest: &str,
            blob_digests: &[String],
        ) -> MetadataResult<()> {
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;
            for blob in blob_digests {
                sqlx::query(
                    "INSERT OR IGNORE INTO artifact_blobs (digest_af, digest_blob, creation_time) VALUES (?, ?, ?)",
                )
                .bind(artifact_digest)
                .bind(blob)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(())
        }

        async fn list_artifact_blobs(&self, artifact_digest: &str) -> MetadataResult<Vec<String>> {
            let rows: Vec<String> = sqlx::query_scalar(
                "SELECT digest_blob FROM artifact_blobs WHERE digest_af = ? ORDER BY digest_blob",
            )
            .bind(artifact_digest)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn exclusive_blobs(
            &self,
            project_id: i64,
            repository: &str,
            artifact_digest: &str,
        ) -> MetadataResult<Vec<BlobRow>> {
            let rows = sqlx::query_as::<_, BlobRow>(
                r#"
                SELECT b.id, b.digest, b.content_type, b.size, b.creation_time
                FROM blobs b
                JOIN artifact_blobs ab ON ab.digest_blob = b.digest
                JOIN project_blobs pb ON pb.blob_id = b.id AND pb.project_id = ?
                WHERE ab.digest_af = ?
                  AND b.digest NOT IN (
                      SELECT ab2.digest_blob
                      FROM artifact_blobs ab2
                      JOIN artifacts a ON a.digest = ab2.digest_af
                      WHERE a.project_id = ? AND NOT (a.repository = ? AND a.digest = ?)
                  )
                ORDER BY b.id
                "#,
            )
            .bind(project_id)
            .bind(artifact_digest)
            .bind(project_id)
            .bind(repository)
            .bind(artifact_digest)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_artifact_blobs_if_unused(
            &self,
            artifact_digest: &str,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                "DELETE FROM artifact_blobs WHERE digest_af = ? AND NOT EXISTS (SELECT 1 FROM artifacts WHERE digest = ?)",
            )
            .bind(artifact_digest)
            .bind(artifact_digest)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl BlobRepo for SqliteStore {
        async fn get_blob(&self, digest: &str) -> MetadataResult<Option<BlobRow>> {
            let row = sqlx::query_as::<_, BlobRow>(
                "SELECT id, digest, content_type, size, creation_time FROM blobs WHERE digest = ?",
            )
            .bind(digest)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn ensure_blob(
            &self,
            digest: &str,
            content_type: &str,
            size: i64,
        ) -> MetadataResult<BlobRow> {
            let row = sqlx::query_as::<_, BlobRow>(
                r#"
                INSERT INTO blobs (digest, content_type, size, creation_time)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(digest) DO UPDATE
                SET size = CASE WHEN blobs.size = 0 THEN excluded.size ELSE blobs.size END
                RETURNING id, digest, content_type, size, creation_time
                "#,
            )
            .bind(digest)
            .bind(content_type)
            .bind(size)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn blob_exists_in_project(
            &self,
            project_id: i64,
            digest: &str,
        ) -> MetadataResult<bool> {
            let exists: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM project_blobs pb
                    JOIN blobs b ON b.id = pb.blob_id
                    WHERE pb.project_id = ? AND b.digest = ?
                )
                "#,
            )
            .bind(project_id)
            .bind(digest)
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        }

        async fn link_blob_to_project(&self, project_id: i64, blob_id: i64) -> MetadataResult<()> {
            sqlx::query(
                "INSERT OR IGNORE INTO project_blobs (project_id, blob_id, creation_time) VALUES (?, ?, ?)",
            )
            .bind(project_id)
            .bind(blob_id)
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn unlink_blobs_from_project(
            &self,
            project_id: i64,
            blob_ids: &[i64],
        ) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;
            let mut removed = 0;
            for blob_id in blob_ids {
                let result =
                    sqlx::query("DELETE FROM project_blobs WHERE project_id = ? AND blob_id = ?")
                        .bind(project_id)
                        .bind(blob_id)
                        .execute(&mut *tx)
                        .await?;
                removed += result.rows_affected();
            }
            tx.commit().await?;
            Ok(removed)
        }
    }

    #[async_trait]
    impl ChartRepo for SqliteStore {
        async fn chart_version_exists(
            &self,
            project_id: i64,
            chart_name: &str,
            version: &str,
        ) -> MetadataResult<bool> {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM chart_versions WHERE project_id = ? AND chart_name = ? AND version = ?)",
            )
            .bind(project_id)
            .bind(chart_name)
            .bind(version)
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        }

        async fn add_chart_version(
            &self,
            project_id: i64,
            chart_name: &str,
            version: &str,
        ) -> MetadataResult<()> {
            sqlx::query(
                "INSERT OR IGNORE INTO chart_versions (project_id, chart_name, version, creation_time) VALUES (?, ?, ?, ?)",
            )
            .bind(project_id)
            .bind(chart_name)
            .bind(version)
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn delete_chart_version(
            &self,
            project_id: i64,
            chart_name: &str,
            version: &str,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "DELETE FROM chart_versions WHERE project_id = ? AND chart_name = ? AND version = ?",
            )
            .bind(project_id)
            .bind(chart_name)
            .bind(version)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl ImmutableRuleRepo for SqliteStore {
        async fn create_immutable_rule(&self, rule: &ImmutableRule) -> MetadataResult<i64> {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO immutable_rules (project_id, disabled, priority, rule_json, creation_time) VALUES (?, ?, ?, ?, ?) RETURNING id",
            )
            .bind(rule.project_id)
            .bind(rule.disabled)
            .bind(rule.priority)
            .bind(rule_json(rule)?)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&self.pool)
            .await?;
            Ok(id)
        }

        async fn list_immutable_rules(
            &self,
            project_id: i64,
        ) -> MetadataResult<Vec<ImmutableRule>> {
            let rows = sqlx::query_as::<_, ImmutableRuleRow>(
                "SELECT id, project_id, disabled, priority, rule_json FROM immutable_rules WHERE project_id = ? ORDER BY priority, id",
            )
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(ImmutableRule::try_from).collect()
        }

        async fn delete_immutable_rule(
            &self,
            project_id: i64,
            rule_id: i64,
        ) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM immutable_rules WHERE project_id = ? AND id = ?")
                .bind(project_id)
                .bind(rule_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Quota hard limits, one row per (reference, reference_id)
CREATE TABLE IF NOT EXISTS quota (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    reference TEXT NOT NULL,
    reference_id TEXT NOT NULL,
    hard TEXT NOT NULL,
    creation_time TEXT NOT NULL,
    update_time TEXT NOT NULL,
    UNIQUE(reference, reference_id)
);

-- Quota usage, created together with the quota row
CREATE TABLE IF NOT EXISTS quota_usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    reference TEXT NOT NULL,
    reference_id TEXT NOT NULL,
    used TEXT NOT NULL,
    creation_time TEXT NOT NULL,
    update_time TEXT NOT NULL,
    UNIQUE(reference, reference_id)
);

-- Projects
CREATE TABLE IF NOT EXISTS projects (
    project_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    owner_name TEXT,
    creation_time TEXT NOT NULL
);

-- Artifacts
CREATE TABLE IF NOT EXISTS artifacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(project_id) ON DELETE CASCADE,
    repository TEXT NOT NULL,
    tag TEXT NOT NULL,
    digest TEXT NOT NULL,
    kind TEXT NOT NULL,
    creation_time TEXT NOT NULL,
    push_time TEXT NOT NULL,
    UNIQUE(repository, tag)
);
CREATE INDEX IF NOT EXISTS idx_artifacts_repo_digest ON artifacts(repository, digest);
CREATE INDEX IF NOT EXISTS idx_artifacts_project ON artifacts(project_id);

-- Blobs
CREATE TABLE IF NOT EXISTS blobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    digest TEXT NOT NULL UNIQUE,
    content_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    creation_time TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS project_blobs (
    project_id INTEGER NOT NULL REFERENCES projects(project_id) ON DELETE CASCADE,
    blob_id INTEGER NOT NULL REFERENCES blobs(id) ON DELETE CASCADE,
    creation_time TEXT NOT NULL,
    PRIMARY KEY (project_id, blob_id)
);

CREATE TABLE IF NOT EXISTS artifact_blobs (
    digest_af TEXT NOT NULL,
    digest_blob TEXT NOT NULL,
    creation_time TEXT NOT NULL,
    PRIMARY KEY (digest_af, digest_blob)
);
CREATE INDEX IF NOT EXISTS idx_artifact_blobs_blob ON artifact_blobs(digest_blob);

-- Chart versions
CREATE TABLE IF NOT EXISTS chart_versions (
    project_id INTEGER NOT NULL REFERENCES projects(project_id) ON DELETE CASCADE,
    chart_name TEXT NOT NULL,
    version TEXT NOT NULL,
    creation_time TEXT NOT NULL,
    PRIMARY KEY (project_id, chart_name, version)
);

-- Immutable tag rules
CREATE TABLE IF NOT EXISTS immutable_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(project_id) ON DELETE CASCADE,
    disabled INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 0,
    rule_json TEXT NOT NULL,
    creation_time TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_immutable_rules_project ON immutable_rules(project_id);
"#;
