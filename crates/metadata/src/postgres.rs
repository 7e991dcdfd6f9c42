//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult, map_unique};
use crate::models::*;
use crate::repos::{
    ArtifactRepo, BlobRepo, ChartRepo, HardUpdate, ImmutableRuleRepo, ProjectRepo, QuotaRepo,
    UsageUpdate,
};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{PgConnection, Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;
use tollgate_core::config::PgSslMode;
use tollgate_core::{ImmutableRule, ResourceList};

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

const QUOTA_SELECT: &str = r#"
    SELECT q.id, q.reference, q.reference_id, q.hard, u.used, q.creation_time, u.update_time
    FROM quota q
    JOIN quota_usage u ON u.reference = q.reference AND u.reference_id = q.reference_id
    WHERE q.reference = $1 AND q.reference_id = $2
"#;

const ARTIFACT_COLUMNS: &str =
    "id, project_id, repository, tag, digest, kind, creation_time, push_time";

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Alias for [`PostgresStore::from_url`].
    pub async fn new(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        Self::from_url(url, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

/// Current `(hard, used)` of a quota. Row locks on both tables are held
/// until `tx` commits or rolls back.
async fn lock_hard_and_used(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    reference: &str,
    reference_id: &str,
) -> MetadataResult<(ResourceList, ResourceList)> {
    let row: Option<(String, String)> = sqlx::query_as(
        r#"
        SELECT q.hard, u.used
        FROM quota q
        JOIN quota_usage u ON u.reference = q.reference AND u.reference_id = q.reference_id
        WHERE q.reference = $1 AND q.reference_id = $2
        FOR UPDATE
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
    Ok((ResourceList::from_json(&hard)?, ResourceList::from_json(&used)?))
}

async fn insert_quota_rows(
    conn: &mut PgConnection,
    reference: &str,
    reference_id: &str,
    hard: &ResourceList,
    used: &ResourceList,
) -> MetadataResult<i64> {
    let now = OffsetDateTime::now_utc();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO quota (reference, reference_id, hard, creation_time, update_time) VALUES ($1, $2, $3, $4, $4) RETURNING id",
    )
    .bind(reference)
    .bind(reference_id)
    .bind(hard.to_json())
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_unique(e, || format!("quota {reference}/{reference_id}")))?;

    sqlx::query(
        "INSERT INTO quota_usage (reference, reference_id, used, creation_time, update_time) VALUES ($1, $2, $3, $4, $4)",
    )
    .bind(reference)
    .bind(reference_id)
    .bind(used.to_json())
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_unique(e, || format!("quota usage {reference}/{reference_id}")))?;

    Ok(id)
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements cannot hold several commands.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl QuotaRepo for PostgresStore {
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
        let now = OffsetDateTime::now_utc();

        let inserted = sqlx::query(
            r#"
            INSERT INTO quota (reference, reference_id, hard, creation_time, update_time)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (reference, reference_id) DO NOTHING
            "#,
        )
        .bind(reference)
        .bind(reference_id)
        .bind(hard.to_json())
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO quota_usage (reference, reference_id, used, creation_time, update_time)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (reference, reference_id) DO NOTHING
            "#,
        )
        .bind(reference)
        .bind(reference_id)
        .bind(hard.zero().to_json())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
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
        let (hard, used) = lock_hard_and_used(&mut tx, reference, reference_id).await?;

        let next = update(&hard, &used).map_err(MetadataError::Rejected)?;

        sqlx::query(
            "UPDATE quota SET hard = $1, update_time = $2 WHERE reference = $3 AND reference_id = $4",
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
        let mut tx = self.pool.begin().await?;
        let (hard, used) = lock_hard_and_used(&mut tx, reference, reference_id).await?;

        let next = update(&hard, &used).map_err(MetadataError::Rejected)?;

        sqlx::query(
            "UPDATE quota_usage SET used = $1, update_time = $2 WHERE reference = $3 AND reference_id = $4",
        )
        .bind(next.to_json())
        .bind(OffsetDateTime::now_utc())
        .bind(reference)
        .bind(reference_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next)
    }
}

#[async_trait]
impl ProjectRepo for PostgresStore {
    async fn create_project(
        &self,
        name: &str,
        owner_name: Option<&str>,
    ) -> MetadataResult<ProjectRow> {
        let project = sqlx::query_as::<_, ProjectRow>(
            "INSERT INTO projects (name, owner_name, creation_time) VALUES ($1, $2, $3) RETURNING project_id, name, owner_name, creation_time",
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
        let result = sqlx::query("DELETE FROM projects WHERE project_id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_project(&self, project_id: i64) -> MetadataResult<Option<ProjectRow>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT project_id, name, owner_name, creation_time FROM projects WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_project_by_name(&self, name: &str) -> MetadataResult<Option<ProjectRow>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT project_id, name, owner_name, creation_time FROM projects WHERE name = $1",
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
impl ArtifactRepo for PostgresStore {
    async fn get_artifact(
        &self,
        repository: &str,
        tag: &str,
    ) -> MetadataResult<Option<ArtifactRow>> {
        let row = sqlx::query_as::<_, ArtifactRow>(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE repository = $1 AND tag = $2"
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
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE repository = $1 AND digest = $2 ORDER BY id"
        ))
        .bind(repository)
        .bind(digest)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_artifact(&self, artifact: &NewArtifact) -> MetadataResult<ArtifactRow> {
        let row = sqlx::query_as::<_, ArtifactRow>(&format!(
            r#"
            INSERT INTO artifacts (project_id, repository, tag, digest, kind, creation_time, push_time)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (repository, tag) DO UPDATE
            SET digest = EXCLUDED.digest, kind = EXCLUDED.kind, push_time = EXCLUDED.push_time
            RETURNING {ARTIFACT_COLUMNS}
            "#
        ))
        .bind(artifact.project_id)
        .bind(&artifact.repository)
        .bind(&artifact.tag)
        .bind(&artifact.digest)
        .bind(&artifact.kind)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_artifacts_by_digest(
        &self,
        repository: &str,
        digest: &str,
    ) -> MetadataResult<u64> {
        let result = sqlx::query("DELETE FROM artifacts WHERE repository = $1 AND digest = $2")
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
        sqlx::query(
            r#"
            INSERT INTO artifact_blobs (digest_af, digest_blob, creation_time)
            SELECT $1, blob, $3 FROM UNNEST($2::text[]) AS blob
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(artifact_digest)
        .bind(blob_digests)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_artifact_blobs(&self, artifact_digest: &str) -> MetadataResult<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT digest_blob FROM artifact_blobs WHERE digest_af = $1 ORDER BY digest_blob",
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
            JOIN project_blobs pb ON pb.blob_id = b.id AND pb.project_id = $1
            WHERE ab.digest_af = $3
              AND b.digest NOT IN (
                  SELECT ab2.digest_blob
                  FROM artifact_blobs ab2
                  JOIN artifacts a ON a.digest = ab2.digest_af
                  WHERE a.project_id = $1 AND NOT (a.repository = $2 AND a.digest = $3)
              )
            ORDER BY b.id
            "#,
        )
        .bind(project_id)
        .bind(repository)
        .bind(artifact_digest)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_artifact_blobs_if_unused(&self, artifact_digest: &str) -> MetadataResult<u64> {
        let result = sqlx::query(
            "DELETE FROM artifact_blobs WHERE digest_af = $1 AND NOT EXISTS (SELECT 1 FROM artifacts WHERE digest = $1)",
        )
        .bind(artifact_digest)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BlobRepo for PostgresStore {
    async fn get_blob(&self, digest: &str) -> MetadataResult<Option<BlobRow>> {
        let row = sqlx::query_as::<_, BlobRow>(
            "SELECT id, digest, content_type, size, creation_time FROM blobs WHERE digest = $1",
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
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (digest) DO UPDATE
            SET size = CASE WHEN blobs.size = 0 THEN EXCLUDED.size ELSE blobs.size END
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

    async fn blob_exists_in_project(&self, project_id: i64, digest: &str) -> MetadataResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM project_blobs pb
                JOIN blobs b ON b.id = pb.blob_id
                WHERE pb.project_id = $1 AND b.digest = $2
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
            "INSERT INTO project_blobs (project_id, blob_id, creation_time) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
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
        let result =
            sqlx::query("DELETE FROM project_blobs WHERE project_id = $1 AND blob_id = ANY($2)")
                .bind(project_id)
                .bind(blob_ids)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ChartRepo for PostgresStore {
    async fn chart_version_exists(
        &self,
        project_id: i64,
        chart_name: &str,
        version: &str,
    ) -> MetadataResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM chart_versions WHERE project_id = $1 AND chart_name = $2 AND version = $3)",
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
            "INSERT INTO chart_versions (project_id, chart_name, version, creation_time) VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
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
            "DELETE FROM chart_versions WHERE project_id = $1 AND chart_name = $2 AND version = $3",
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
impl ImmutableRuleRepo for PostgresStore {
    async fn create_immutable_rule(&self, rule: &ImmutableRule) -> MetadataResult<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO immutable_rules (project_id, disabled, priority, rule_json, creation_time) VALUES ($1, $2, $3, $4, $5) RETURNING id",
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

    async fn list_immutable_rules(&self, project_id: i64) -> MetadataResult<Vec<ImmutableRule>> {
        let rows = sqlx::query_as::<_, ImmutableRuleRow>(
            "SELECT id, project_id, disabled, priority, rule_json FROM immutable_rules WHERE project_id = $1 ORDER BY priority, id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ImmutableRule::try_from).collect()
    }

    async fn delete_immutable_rule(&self, project_id: i64, rule_id: i64) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM immutable_rules WHERE project_id = $1 AND id = $2")
            .bind(project_id)
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
