// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed run store implementation.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::CoreError;

use super::{
    MarkFailed, MarkFinished, MarkRunning, MarkSuspended, RUN_COLUMNS, RunCreate, RunRecord,
    RunRow, RunStatus, RunStore, StateUpdate, encode_object, encode_value,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgres");

/// PostgreSQL-backed run store.
#[derive(Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    /// Create a new Postgres run store from an existing pool.
    ///
    /// The caller is responsible for having run the migrations; see
    /// [`migrate`](Self::migrate).
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded migrations against the pool.
    pub async fn migrate(pool: &PgPool) -> Result<(), CoreError> {
        MIGRATOR
            .run(pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })
    }

    async fn reload(&self, run_id: &str) -> Result<RunRecord, CoreError> {
        self.fetch(run_id).await?.ok_or_else(|| CoreError::RunNotFound {
            run_id: run_id.to_string(),
        })
    }

    async fn fetch(&self, run_id: &str) -> Result<Option<RunRecord>, CoreError> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM workflow_runs WHERE id = $1",
            RUN_COLUMNS
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RunRecord::try_from).transpose()
    }
}

#[async_trait::async_trait]
impl RunStore for PostgresRunStore {
    async fn create(&self, fields: RunCreate) -> Result<RunRecord, CoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO workflow_runs
                (id, workflow_id, subscriber_id, status, input, memory, context,
                 correlation_id, metadata, version, created_at, updated_at)
            VALUES ($1, $2, $3, 'idle', $4, $5, $6, $7, $8, 1, $9, $10)
            "#,
        )
        .bind(&id)
        .bind(&fields.workflow_id)
        .bind(&fields.subscriber_id)
        .bind(encode_object(fields.input.as_ref())?)
        .bind(encode_object(fields.memory.as_ref())?)
        .bind(encode_object(fields.context.as_ref())?)
        .bind(&fields.correlation_id)
        .bind(encode_object(fields.metadata.as_ref())?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.reload(&id).await
    }

    async fn find_by_id(&self, run_id: &str) -> Result<Option<RunRecord>, CoreError> {
        self.fetch(run_id).await
    }

    async fn find_suspended_by_subscriber(
        &self,
        subscriber_id: &str,
    ) -> Result<Option<RunRecord>, CoreError> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            SELECT {}
            FROM workflow_runs
            WHERE subscriber_id = $1 AND status = 'suspended'
            ORDER BY suspended_at DESC NULLS LAST, created_at DESC
            LIMIT 1
            "#,
            RUN_COLUMNS
        ))
        .bind(subscriber_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RunRecord::try_from).transpose()
    }

    async fn mark_running(
        &self,
        run_id: &str,
        expected_version: i64,
        fields: MarkRunning,
    ) -> Result<RunRecord, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = 'running',
                snapshot = $1,
                memory = $2,
                context = $3,
                last_resume_data = $4,
                version = version + 1,
                updated_at = $5
            WHERE id = $6 AND version = $7
            "#,
        )
        .bind(encode_value(fields.snapshot.as_ref())?)
        .bind(encode_object(fields.memory.as_ref())?)
        .bind(encode_object(fields.context.as_ref())?)
        .bind(encode_value(fields.last_resume_data.as_ref())?)
        .bind(Utc::now())
        .bind(run_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a lost race from a missing record.
            return match self.fetch(run_id).await? {
                Some(_) => Err(CoreError::RunConflict {
                    run_id: run_id.to_string(),
                    expected_version,
                }),
                None => Err(CoreError::RunNotFound {
                    run_id: run_id.to_string(),
                }),
            };
        }

        self.reload(run_id).await
    }

    async fn mark_suspended(
        &self,
        run_id: &str,
        fields: MarkSuspended,
    ) -> Result<RunRecord, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = 'suspended',
                suspended_step = $1,
                suspension_reason = $2,
                suspension_data = $3,
                last_resume_data = $4,
                suspended_at = $5,
                snapshot = $6,
                memory = $7,
                context = $8,
                version = version + 1,
                updated_at = $9
            WHERE id = $10
            "#,
        )
        .bind(&fields.step_id)
        .bind(&fields.reason)
        .bind(encode_value(fields.data.as_ref())?)
        .bind(encode_value(fields.last_resume_data.as_ref())?)
        .bind(Utc::now())
        .bind(encode_value(fields.snapshot.as_ref())?)
        .bind(encode_object(fields.memory.as_ref())?)
        .bind(encode_object(fields.context.as_ref())?)
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }

        self.reload(run_id).await
    }

    async fn mark_finished(
        &self,
        run_id: &str,
        fields: MarkFinished,
    ) -> Result<RunRecord, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = 'finished',
                finished_at = $1,
                snapshot = $2,
                memory = $3,
                context = $4,
                output = $5,
                version = version + 1,
                updated_at = $6
            WHERE id = $7
            "#,
        )
        .bind(Utc::now())
        .bind(encode_value(fields.snapshot.as_ref())?)
        .bind(encode_object(fields.memory.as_ref())?)
        .bind(encode_object(fields.context.as_ref())?)
        .bind(encode_object(fields.output.as_ref())?)
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }

        self.reload(run_id).await
    }

    async fn mark_failed(&self, run_id: &str, fields: MarkFailed) -> Result<RunRecord, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = 'failed',
                failed_at = $1,
                snapshot = $2,
                memory = $3,
                context = $4,
                error = $5,
                version = version + 1,
                updated_at = $6
            WHERE id = $7
            "#,
        )
        .bind(Utc::now())
        .bind(encode_value(fields.snapshot.as_ref())?)
        .bind(encode_object(fields.memory.as_ref())?)
        .bind(encode_object(fields.context.as_ref())?)
        .bind(&fields.error)
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }

        self.reload(run_id).await
    }

    async fn update_state(
        &self,
        run_id: &str,
        fields: StateUpdate,
    ) -> Result<RunRecord, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET input = $1,
                output = $2,
                memory = $3,
                metadata = $4,
                context = $5,
                updated_at = $6
            WHERE id = $7
            "#,
        )
        .bind(encode_object(fields.input.as_ref())?)
        .bind(encode_object(fields.output.as_ref())?)
        .bind(encode_object(fields.memory.as_ref())?)
        .bind(encode_object(fields.metadata.as_ref())?)
        .bind(encode_object(fields.context.as_ref())?)
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }

        self.reload(run_id).await
    }

    async fn list_runs(
        &self,
        subscriber_id: Option<&str>,
        status: Option<RunStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RunRecord>, CoreError> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            SELECT {}
            FROM workflow_runs
            WHERE ($1::text IS NULL OR subscriber_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
            RUN_COLUMNS
        ))
        .bind(subscriber_id)
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RunRecord::try_from).collect()
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        let result: Result<(i64,), _> = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await;
        Ok(result.is_ok())
    }
}
