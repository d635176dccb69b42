use sqlx::{sqlite::SqliteRow, Row};

use signoff_core::domain::layer::{
    ApprovableType, ApprovableTypeId, ApproverLayer, ApproverSpec, LayerId, LayerStatus,
};
use signoff_core::errors::StoreError;
use signoff_core::ports::ConfigurationStore;

use super::RepositoryError;
use crate::DbPool;

pub struct SqlConfigurationStore {
    pool: DbPool,
}

impl SqlConfigurationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Every layer of a type regardless of status, ordered by level then id.
    pub async fn all_layers(
        &self,
        type_id: ApprovableTypeId,
    ) -> Result<Vec<ApproverLayer>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, approvable_type_id, level, approver_type, approver_id, status, description
             FROM approver_layers
             WHERE approvable_type_id = ?
             ORDER BY level ASC, id ASC",
        )
        .bind(type_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(layer_from_row).collect()
    }
}

fn approvable_type_from_row(row: &SqliteRow) -> Result<ApprovableType, RepositoryError> {
    Ok(ApprovableType {
        id: ApprovableTypeId(row.try_get("id")?),
        key: row.try_get("type_key")?,
        display_name: row.try_get("display_name")?,
    })
}

/// Approver specs are decoded here, once, so nothing downstream compares
/// approver type strings.
fn layer_from_row(row: &SqliteRow) -> Result<ApproverLayer, RepositoryError> {
    let id: i64 = row.try_get("id")?;
    let approver_type: String = row.try_get("approver_type")?;
    let approver_id: Option<i64> = row.try_get("approver_id")?;
    let status: String = row.try_get("status")?;

    let approver_spec = ApproverSpec::from_parts(&approver_type, approver_id)
        .map_err(|error| RepositoryError::Decode(format!("approver layer {id}: {error}")))?;
    let status = LayerStatus::parse(&status).ok_or_else(|| {
        RepositoryError::Decode(format!("approver layer {id}: unknown status `{status}`"))
    })?;

    Ok(ApproverLayer {
        id: LayerId(id),
        approvable_type_id: ApprovableTypeId(row.try_get("approvable_type_id")?),
        level: row.try_get("level")?,
        approver_spec,
        status,
        description: row.try_get("description")?,
    })
}

#[async_trait::async_trait]
impl ConfigurationStore for SqlConfigurationStore {
    async fn approvable_type(
        &self,
        type_key: &str,
    ) -> Result<Option<ApprovableType>, StoreError> {
        let row = sqlx::query(
            "SELECT id, type_key, display_name FROM approvable_types WHERE type_key = ?",
        )
        .bind(type_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(approvable_type_from_row).transpose()?)
    }

    async fn active_layers(
        &self,
        type_id: ApprovableTypeId,
    ) -> Result<Vec<ApproverLayer>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, approvable_type_id, level, approver_type, approver_id, status, description
             FROM approver_layers
             WHERE approvable_type_id = ? AND status = 'active'
             ORDER BY level ASC, id ASC",
        )
        .bind(type_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(layer_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use signoff_core::domain::identity::{RoleId, UserId};
    use signoff_core::domain::layer::{ApproverSpec, LayerStatus};
    use signoff_core::errors::StoreError;
    use signoff_core::ports::ConfigurationStore;

    use super::SqlConfigurationStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        sqlx::query("INSERT INTO approvable_types (id, type_key, display_name) VALUES (1, 'leave', 'Leave Request')")
            .execute(&pool)
            .await
            .expect("insert type");
        pool
    }

    async fn insert_layer(
        pool: &sqlx::SqlitePool,
        id: i64,
        level: i32,
        approver_type: &str,
        approver_id: Option<i64>,
        status: &str,
    ) {
        sqlx::query(
            "INSERT INTO approver_layers (id, approvable_type_id, level, approver_type, approver_id, status, description)
             VALUES (?, 1, ?, ?, ?, ?, '')",
        )
        .bind(id)
        .bind(level)
        .bind(approver_type)
        .bind(approver_id)
        .bind(status)
        .execute(pool)
        .await
        .expect("insert layer");
    }

    #[tokio::test]
    async fn loads_type_and_decodes_active_layers() {
        let pool = setup().await;
        insert_layer(&pool, 1, 2, "App\\Models\\User", Some(42), "active").await;
        insert_layer(&pool, 2, 1, "role", Some(5), "active").await;
        insert_layer(&pool, 3, 1, "reports_to", None, "inactive").await;

        let store = SqlConfigurationStore::new(pool);
        let leave = store.approvable_type("leave").await.expect("query").expect("type exists");
        assert_eq!(leave.display_name, "Leave Request");
        assert!(store.approvable_type("overtime").await.expect("query").is_none());

        let layers = store.active_layers(leave.id).await.expect("layers");
        let specs: Vec<(i32, ApproverSpec)> =
            layers.iter().map(|layer| (layer.level, layer.approver_spec)).collect();
        assert_eq!(
            specs,
            vec![(1, ApproverSpec::Role(RoleId(5))), (2, ApproverSpec::FixedUser(UserId(42)))]
        );

        let all = store.all_layers(leave.id).await.expect("all layers");
        assert_eq!(all.len(), 3);
        assert_eq!(all.iter().filter(|layer| layer.status == LayerStatus::Inactive).count(), 1);
    }

    #[tokio::test]
    async fn unknown_approver_type_is_a_decode_error() {
        let pool = setup().await;
        insert_layer(&pool, 1, 1, "App\\Models\\Department", Some(1), "active").await;

        let store = SqlConfigurationStore::new(pool);
        let leave = store.approvable_type("leave").await.expect("query").expect("type exists");
        let error = store.active_layers(leave.id).await.expect_err("decode should fail");

        assert!(matches!(error, StoreError::Decode(ref message) if message.contains("Department")));
    }
}
