use chrono::{SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};
use tracing::debug;

use signoff_core::domain::approval::{
    ApprovableRef, Approval, ApprovalDraft, ApprovalId, ApprovalStatus, Decision, OpeningId,
};
use signoff_core::domain::identity::UserId;
use signoff_core::domain::layer::LayerId;
use signoff_core::errors::{LedgerError, StoreError};
use signoff_core::ports::{ApprovalLedger, LevelWrite};

use super::{parse_timestamp, RepositoryError};
use crate::DbPool;

const APPROVAL_COLUMNS: &str = "id, approvable_type, approvable_id, layer_id, level, approver_id,
     sender_id, display_name, opening_id, status, decided_at, created_at, updated_at";

pub struct SqlApprovalLedger {
    pool: DbPool,
}

impl SqlApprovalLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn timestamp(value: chrono::DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_approval(row: &SqliteRow) -> Result<Approval, RepositoryError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let decided_at: Option<String> = row.try_get("decided_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let status = ApprovalStatus::parse(&status).ok_or_else(|| {
        RepositoryError::Decode(format!("approval {id}: unknown status `{status}`"))
    })?;

    Ok(Approval {
        subject: ApprovableRef::new(
            row.try_get::<String, _>("approvable_type")?,
            row.try_get::<String, _>("approvable_id")?,
        ),
        layer_id: LayerId(row.try_get("layer_id")?),
        level: row.try_get("level")?,
        approver: UserId(row.try_get("approver_id")?),
        sender: UserId(row.try_get("sender_id")?),
        display_name: row.try_get("display_name")?,
        opening_id: OpeningId(row.try_get("opening_id")?),
        status,
        decided_at: decided_at.as_deref().map(|v| parse_timestamp("decided_at", v)).transpose()?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        id: ApprovalId(id),
    })
}

/// Inserts one pending row. Returns `false` when the pending triple already
/// exists; the partial unique index makes this hold across writers.
async fn insert_pending(
    tx: &mut Transaction<'_, Sqlite>,
    approval: &Approval,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO approvals (id, approvable_type, approvable_id, layer_id, level, approver_id,
                                sender_id, display_name, opening_id, status, decided_at,
                                created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', NULL, ?, ?)
         ON CONFLICT DO NOTHING",
    )
    .bind(&approval.id.0)
    .bind(&approval.subject.type_key)
    .bind(&approval.subject.object_id)
    .bind(approval.layer_id.0)
    .bind(approval.level)
    .bind(approval.approver.0)
    .bind(approval.sender.0)
    .bind(&approval.display_name)
    .bind(&approval.opening_id.0)
    .bind(timestamp(approval.created_at))
    .bind(timestamp(approval.updated_at))
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn fetch_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: &ApprovalId,
) -> Result<Option<Approval>, RepositoryError> {
    let sql = format!("SELECT {APPROVAL_COLUMNS} FROM approvals WHERE id = ?");
    let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&mut **tx).await?;
    row.as_ref().map(row_to_approval).transpose()
}

fn store_error(error: impl Into<RepositoryError>) -> StoreError {
    StoreError::from(error.into())
}

#[async_trait::async_trait]
impl ApprovalLedger for SqlApprovalLedger {
    async fn exists_pending(
        &self,
        subject: &ApprovableRef,
        layer_id: LayerId,
        approver: UserId,
    ) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM approvals
             WHERE approvable_type = ? AND approvable_id = ? AND layer_id = ?
               AND approver_id = ? AND status = 'pending'",
        )
        .bind(&subject.type_key)
        .bind(&subject.object_id)
        .bind(layer_id.0)
        .bind(approver.0)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(count > 0)
    }

    async fn create(&self, draft: ApprovalDraft) -> Result<Approval, LedgerError> {
        let approval = Approval::from_draft(draft, Utc::now());
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let inserted = insert_pending(&mut tx, &approval).await.map_err(store_error)?;
        if !inserted {
            return Err(LedgerError::DuplicateApproval {
                subject: approval.subject,
                layer_id: approval.layer_id,
                approver: approval.approver,
            });
        }
        tx.commit().await.map_err(store_error)?;
        Ok(approval)
    }

    async fn open_level(&self, drafts: Vec<ApprovalDraft>) -> Result<LevelWrite, StoreError> {
        let now = Utc::now();
        let mut write = LevelWrite::default();
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        for draft in drafts {
            let approval = Approval::from_draft(draft.clone(), now);
            if insert_pending(&mut tx, &approval).await.map_err(store_error)? {
                write.created.push(approval);
            } else {
                debug!(
                    event_name = "approval.ledger.duplicate_skipped",
                    subject = %draft.subject,
                    layer_id = draft.layer_id.0,
                    approver_id = draft.approver.0,
                    "pending approval already exists, skipping"
                );
                write.duplicates.push(draft);
            }
        }

        tx.commit().await.map_err(store_error)?;
        Ok(write)
    }

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, StoreError> {
        let sql = format!("SELECT {APPROVAL_COLUMNS} FROM approvals WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(row.as_ref().map(row_to_approval).transpose()?)
    }

    async fn decide(
        &self,
        id: &ApprovalId,
        acting: UserId,
        decision: Decision,
    ) -> Result<Approval, LedgerError> {
        // The guarded write goes first so the transaction takes the write lock
        // up front instead of upgrading from a read under contention.
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let now = timestamp(Utc::now());
        let result = sqlx::query(
            "UPDATE approvals SET status = ?, decided_at = ?, updated_at = ?
             WHERE id = ? AND approver_id = ? AND status = 'pending'",
        )
        .bind(decision.status().as_str())
        .bind(&now)
        .bind(&now)
        .bind(&id.0)
        .bind(acting.0)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        let current = fetch_in_tx(&mut tx, id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| LedgerError::NotFound(id.clone()))?;

        if result.rows_affected() == 0 {
            if current.approver != acting {
                return Err(LedgerError::NotAuthorized { approval_id: id.clone(), acting });
            }
            return Err(LedgerError::AlreadyDecided {
                approval_id: id.clone(),
                status: current.status,
            });
        }

        tx.commit().await.map_err(store_error)?;
        Ok(current)
    }

    async fn list_for(&self, subject: &ApprovableRef) -> Result<Vec<Approval>, StoreError> {
        let sql = format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals
             WHERE approvable_type = ? AND approvable_id = ?
             ORDER BY seq ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(&subject.type_key)
            .bind(&subject.object_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(rows.iter().map(row_to_approval).collect::<Result<Vec<_>, _>>()?)
    }

    async fn latest_for(&self, subject: &ApprovableRef) -> Result<Option<Approval>, StoreError> {
        let sql = format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals
             WHERE approvable_type = ? AND approvable_id = ?
             ORDER BY seq DESC
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(&subject.type_key)
            .bind(&subject.object_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(row.as_ref().map(row_to_approval).transpose()?)
    }

    async fn pending_for_approver(&self, approver: UserId) -> Result<Vec<Approval>, StoreError> {
        let sql = format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals
             WHERE approver_id = ? AND status = 'pending'
             ORDER BY seq ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(approver.0)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(rows.iter().map(row_to_approval).collect::<Result<Vec<_>, _>>()?)
    }
}
