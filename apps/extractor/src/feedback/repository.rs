//! Persistence seam for the feedback store.
//!
//! `PgFeedbackRepository` backs production; `InMemoryFeedbackRepository` is used
//! when no database is configured and by tests. A correction and its counter
//! update are written together: one transaction, or one lock scope.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use uuid::Uuid;

use crate::feedback::models::{CorrectionRow, FieldCounterRow, SegmentAssignment};

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid feedback: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait FeedbackRepository: Send + Sync {
    /// Stores a correction and counts it against its field in one unit of work.
    async fn save_correction(&self, row: &CorrectionRow) -> Result<(), FeedbackError>;

    /// Stores a segment assignment together with the correction it implies and
    /// that correction's counter update. Returns the assignment id.
    async fn save_segment_assignment(
        &self,
        row: &CorrectionRow,
        assignment: &SegmentAssignment,
    ) -> Result<Uuid, FeedbackError>;

    /// `total += 1`, and `corrected += 1` when `corrected` is set.
    async fn increment_field(
        &self,
        tenant: &str,
        field: &str,
        corrected: bool,
    ) -> Result<(), FeedbackError>;

    /// Corrections for `fields`, most used first.
    async fn corrections_for_fields(
        &self,
        tenant: &str,
        fields: &[String],
        limit: usize,
    ) -> Result<Vec<CorrectionRow>, FeedbackError>;

    /// Most recent corrections, the candidate window for keyword matching.
    async fn recent_corrections(
        &self,
        tenant: &str,
        limit: usize,
    ) -> Result<Vec<CorrectionRow>, FeedbackError>;

    async fn increment_usage(&self, ids: &[Uuid]) -> Result<(), FeedbackError>;

    async fn field_counters(&self, tenant: &str) -> Result<Vec<FieldCounterRow>, FeedbackError>;
}

// ────────────────────────────────────────────────────────────────────────────
// PostgreSQL
// ────────────────────────────────────────────────────────────────────────────

pub struct PgFeedbackRepository {
    pool: PgPool,
}

impl PgFeedbackRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_correction_row(
    conn: &mut PgConnection,
    row: &CorrectionRow,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO extraction_corrections
            (id, tenant_id, source_context, source_label, wrong_extraction,
             correct_value, correct_field, reasoning, context_hash, usage_count, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(row.id)
    .bind(&row.tenant_id)
    .bind(&row.source_context)
    .bind(&row.source_label)
    .bind(&row.wrong_extraction)
    .bind(&row.correct_value)
    .bind(&row.correct_field)
    .bind(&row.reasoning)
    .bind(&row.context_hash)
    .bind(row.usage_count)
    .bind(row.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn upsert_field_counter(
    conn: &mut PgConnection,
    tenant: &str,
    field: &str,
    corrected: bool,
) -> Result<(), sqlx::Error> {
    let corrected_delta: i64 = if corrected { 1 } else { 0 };
    sqlx::query(
        r#"
        INSERT INTO field_accuracy_metrics (tenant_id, field_name, total, corrected)
        VALUES ($1, $2, 1, $3)
        ON CONFLICT (tenant_id, field_name) DO UPDATE
        SET total = field_accuracy_metrics.total + 1,
            corrected = field_accuracy_metrics.corrected + EXCLUDED.corrected,
            updated_at = NOW()
        "#,
    )
    .bind(tenant)
    .bind(field)
    .bind(corrected_delta)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl FeedbackRepository for PgFeedbackRepository {
    async fn save_correction(&self, row: &CorrectionRow) -> Result<(), FeedbackError> {
        let mut tx = self.pool.begin().await?;
        insert_correction_row(&mut *tx, row).await?;
        upsert_field_counter(&mut *tx, &row.tenant_id, &row.correct_field, true).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_segment_assignment(
        &self,
        row: &CorrectionRow,
        assignment: &SegmentAssignment,
    ) -> Result<Uuid, FeedbackError> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;
        insert_correction_row(&mut *tx, row).await?;
        upsert_field_counter(&mut *tx, &row.tenant_id, &row.correct_field, true).await?;
        sqlx::query(
            r#"
            INSERT INTO segment_assignments
                (id, tenant_id, original_text, detected_category, assigned_field,
                 assigned_value, line_reference, correction_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(&row.tenant_id)
        .bind(&assignment.original_text)
        .bind(&assignment.detected_category)
        .bind(&assignment.assigned_field)
        .bind(&assignment.assigned_value)
        .bind(&assignment.line_reference)
        .bind(row.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn increment_field(
        &self,
        tenant: &str,
        field: &str,
        corrected: bool,
    ) -> Result<(), FeedbackError> {
        let mut conn = self.pool.acquire().await?;
        upsert_field_counter(&mut *conn, tenant, field, corrected).await?;
        Ok(())
    }

    async fn corrections_for_fields(
        &self,
        tenant: &str,
        fields: &[String],
        limit: usize,
    ) -> Result<Vec<CorrectionRow>, FeedbackError> {
        Ok(sqlx::query_as::<_, CorrectionRow>(
            r#"
            SELECT * FROM extraction_corrections
            WHERE tenant_id = $1 AND correct_field = ANY($2)
            ORDER BY usage_count DESC, created_at DESC
            LIMIT $3
            "#,
        )
        .bind(tenant)
        .bind(fields)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn recent_corrections(
        &self,
        tenant: &str,
        limit: usize,
    ) -> Result<Vec<CorrectionRow>, FeedbackError> {
        Ok(sqlx::query_as::<_, CorrectionRow>(
            r#"
            SELECT * FROM extraction_corrections
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn increment_usage(&self, ids: &[Uuid]) -> Result<(), FeedbackError> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE extraction_corrections SET usage_count = usage_count + 1 WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn field_counters(&self, tenant: &str) -> Result<Vec<FieldCounterRow>, FeedbackError> {
        Ok(sqlx::query_as::<_, FieldCounterRow>(
            r#"
            SELECT field_name, total, corrected
            FROM field_accuracy_metrics
            WHERE tenant_id = $1
            ORDER BY field_name
            "#,
        )
        .bind(tenant)
        .fetch_all(&self.pool)
        .await?)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    corrections: Vec<CorrectionRow>,
    assignments: Vec<(Uuid, String, SegmentAssignment, Uuid)>,
    counters: HashMap<(String, String), (i64, i64)>,
}

impl MemoryState {
    fn count(&mut self, tenant: &str, field: &str, corrected: bool) {
        let counter = self
            .counters
            .entry((tenant.to_string(), field.to_string()))
            .or_insert((0, 0));
        counter.0 += 1;
        if corrected {
            counter.1 += 1;
        }
    }

    fn store_correction(&mut self, row: &CorrectionRow) {
        self.corrections.push(row.clone());
        self.count(&row.tenant_id, &row.correct_field, true);
    }
}

#[derive(Default)]
pub struct InMemoryFeedbackRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryFeedbackRepository {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn assignment_count(&self) -> usize {
        self.state.lock().assignments.len()
    }
}

#[async_trait]
impl FeedbackRepository for InMemoryFeedbackRepository {
    async fn save_correction(&self, row: &CorrectionRow) -> Result<(), FeedbackError> {
        self.state.lock().store_correction(row);
        Ok(())
    }

    async fn save_segment_assignment(
        &self,
        row: &CorrectionRow,
        assignment: &SegmentAssignment,
    ) -> Result<Uuid, FeedbackError> {
        let id = Uuid::new_v4();
        let mut state = self.state.lock();
        state.store_correction(row);
        state
            .assignments
            .push((id, row.tenant_id.clone(), assignment.clone(), row.id));
        Ok(id)
    }

    async fn increment_field(
        &self,
        tenant: &str,
        field: &str,
        corrected: bool,
    ) -> Result<(), FeedbackError> {
        self.state.lock().count(tenant, field, corrected);
        Ok(())
    }

    async fn corrections_for_fields(
        &self,
        tenant: &str,
        fields: &[String],
        limit: usize,
    ) -> Result<Vec<CorrectionRow>, FeedbackError> {
        let state = self.state.lock();
        let mut rows: Vec<CorrectionRow> = state
            .corrections
            .iter()
            .filter(|r| r.tenant_id == tenant && fields.contains(&r.correct_field))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.usage_count
                .cmp(&a.usage_count)
                .then(b.created_at.cmp(&a.created_at))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn recent_corrections(
        &self,
        tenant: &str,
        limit: usize,
    ) -> Result<Vec<CorrectionRow>, FeedbackError> {
        let state = self.state.lock();
        let mut rows: Vec<CorrectionRow> = state
            .corrections
            .iter()
            .rev()
            .filter(|r| r.tenant_id == tenant)
            .cloned()
            .collect();
        rows.truncate(limit);
        Ok(rows)
    }

    async fn increment_usage(&self, ids: &[Uuid]) -> Result<(), FeedbackError> {
        let mut state = self.state.lock();
        for row in state.corrections.iter_mut().filter(|r| ids.contains(&r.id)) {
            row.usage_count += 1;
        }
        Ok(())
    }

    async fn field_counters(&self, tenant: &str) -> Result<Vec<FieldCounterRow>, FeedbackError> {
        let state = self.state.lock();
        let mut rows: Vec<FieldCounterRow> = state
            .counters
            .iter()
            .filter(|((t, _), _)| t == tenant)
            .map(|((_, field), (total, corrected))| FieldCounterRow {
                field_name: field.clone(),
                total: *total,
                corrected: *corrected,
            })
            .collect();
        rows.sort_by(|a, b| a.field_name.cmp(&b.field_name));
        Ok(rows)
    }
}
