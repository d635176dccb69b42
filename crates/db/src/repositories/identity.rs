use sqlx::{sqlite::SqliteRow, Row};

use signoff_core::domain::identity::{Employee, EmployeeId, Role, RoleId, User, UserId};
use signoff_core::errors::StoreError;
use signoff_core::ports::IdentityStore;

use super::RepositoryError;
use crate::DbPool;

const EMPLOYEE_COLUMNS: &str = "id, code, name, approval_line_code, user_id";

pub struct SqlIdentityStore {
    pool: DbPool,
}

impl SqlIdentityStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn employee_where(
        &self,
        clause: &str,
        bind: EmployeeKey<'_>,
    ) -> Result<Option<Employee>, RepositoryError> {
        let sql = format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE {clause} LIMIT 1");
        let query = sqlx::query(&sql);
        let query = match bind {
            EmployeeKey::Id(id) => query.bind(id),
            EmployeeKey::Code(code) => query.bind(code.to_string()),
        };
        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(employee_from_row).transpose()
    }
}

enum EmployeeKey<'a> {
    Id(i64),
    Code(&'a str),
}

fn employee_from_row(row: &SqliteRow) -> Result<Employee, RepositoryError> {
    Ok(Employee {
        id: EmployeeId(row.try_get("id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        approval_line_code: row.try_get("approval_line_code")?,
        user_id: row.try_get::<Option<i64>, _>("user_id")?.map(UserId),
    })
}

#[async_trait::async_trait]
impl IdentityStore for SqlIdentityStore {
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM users WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(User {
            id: UserId(row.try_get("id").map_err(RepositoryError::from)?),
            name: row.try_get("name").map_err(RepositoryError::from)?,
        }))
    }

    async fn find_employee_by_id(&self, id: EmployeeId) -> Result<Option<Employee>, StoreError> {
        Ok(self.employee_where("id = ?", EmployeeKey::Id(id.0)).await?)
    }

    async fn find_employee_by_code(&self, code: &str) -> Result<Option<Employee>, StoreError> {
        Ok(self.employee_where("code = ?", EmployeeKey::Code(code.trim())).await?)
    }

    async fn find_employee_for_user(&self, user: UserId) -> Result<Option<Employee>, StoreError> {
        Ok(self.employee_where("user_id = ? ORDER BY id ASC", EmployeeKey::Id(user.0)).await?)
    }

    async fn find_role_by_id(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM roles WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Role {
            id: RoleId(row.try_get("id").map_err(RepositoryError::from)?),
            name: row.try_get("name").map_err(RepositoryError::from)?,
        }))
    }

    async fn find_users_with_role(&self, id: RoleId) -> Result<Vec<UserId>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT user_id FROM user_roles WHERE role_id = ? ORDER BY user_id ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(ids.into_iter().map(UserId).collect())
    }
}
