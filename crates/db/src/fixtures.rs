//! TOML workflow catalog: users, roles, employees and approvable types with
//! their layers. Loading is idempotent so `signoff seed` can be rerun.

use serde::{Deserialize, Serialize};
use tracing::info;

use signoff_core::domain::identity::{Employee, EmployeeId, Role, RoleId, User, UserId};
use signoff_core::domain::layer::{
    ApprovableType, ApprovableTypeId, ApproverLayer, ApproverSpec, LayerId, LayerStatus,
};

use crate::connection::DbPool;
use crate::repositories::{InMemoryConfigurationStore, InMemoryIdentityStore, RepositoryError};

/// Built-in demo catalog.
pub const DEMO_CATALOG: &str = include_str!("../../../config/fixtures/demo_catalog.toml");

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct WorkflowCatalog {
    #[serde(default)]
    pub users: Vec<CatalogUser>,
    #[serde(default)]
    pub roles: Vec<CatalogRole>,
    #[serde(default)]
    pub employees: Vec<CatalogEmployee>,
    #[serde(default)]
    pub approvable_types: Vec<CatalogApprovableType>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CatalogUser {
    pub id: i64,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CatalogRole {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub members: Vec<i64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CatalogEmployee {
    pub id: i64,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub approval_line: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CatalogApprovableType {
    pub id: i64,
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub layers: Vec<CatalogLayer>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CatalogLayer {
    pub id: i64,
    pub level: i32,
    pub approver_type: String,
    #[serde(default)]
    pub approver_id: Option<i64>,
    #[serde(default = "default_layer_status")]
    pub status: String,
    #[serde(default)]
    pub description: String,
}

fn default_layer_status() -> String {
    LayerStatus::Active.as_str().to_string()
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CatalogSummary {
    pub users: usize,
    pub roles: usize,
    pub role_memberships: usize,
    pub employees: usize,
    pub approvable_types: usize,
    pub layers: usize,
}

impl WorkflowCatalog {
    /// Parses and validates a catalog. Every layer must decode to a known
    /// approver spec and status.
    pub fn parse(source: &str) -> Result<Self, RepositoryError> {
        let catalog: Self = toml::from_str(source)
            .map_err(|error| RepositoryError::Decode(format!("workflow catalog: {error}")))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn demo() -> Result<Self, RepositoryError> {
        Self::parse(DEMO_CATALOG)
    }

    fn validate(&self) -> Result<(), RepositoryError> {
        for approvable_type in &self.approvable_types {
            for layer in &approvable_type.layers {
                layer.decode(ApprovableTypeId(approvable_type.id))?;
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> CatalogSummary {
        CatalogSummary {
            users: self.users.len(),
            roles: self.roles.len(),
            role_memberships: self.roles.iter().map(|role| role.members.len()).sum(),
            employees: self.employees.len(),
            approvable_types: self.approvable_types.len(),
            layers: self.approvable_types.iter().map(|t| t.layers.len()).sum(),
        }
    }

    /// Upserts the catalog in one transaction.
    pub async fn load(&self, pool: &DbPool) -> Result<CatalogSummary, RepositoryError> {
        let mut tx = pool.begin().await?;

        for user in &self.users {
            sqlx::query(
                "INSERT INTO users (id, name) VALUES (?, ?)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            )
            .bind(user.id)
            .bind(&user.name)
            .execute(&mut *tx)
            .await?;
        }

        for role in &self.roles {
            sqlx::query(
                "INSERT INTO roles (id, name) VALUES (?, ?)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            )
            .bind(role.id)
            .bind(&role.name)
            .execute(&mut *tx)
            .await?;

            // The catalog owns each listed role's full membership.
            sqlx::query("DELETE FROM user_roles WHERE role_id = ?")
                .bind(role.id)
                .execute(&mut *tx)
                .await?;
            for member in &role.members {
                sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?, ?)")
                    .bind(member)
                    .bind(role.id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for employee in &self.employees {
            sqlx::query(
                "INSERT INTO employees (id, code, name, approval_line_code, user_id)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     code = excluded.code,
                     name = excluded.name,
                     approval_line_code = excluded.approval_line_code,
                     user_id = excluded.user_id",
            )
            .bind(employee.id)
            .bind(&employee.code)
            .bind(&employee.name)
            .bind(&employee.approval_line)
            .bind(employee.user_id)
            .execute(&mut *tx)
            .await?;
        }

        for approvable_type in &self.approvable_types {
            sqlx::query(
                "INSERT INTO approvable_types (id, type_key, display_name) VALUES (?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     type_key = excluded.type_key,
                     display_name = excluded.display_name",
            )
            .bind(approvable_type.id)
            .bind(&approvable_type.key)
            .bind(&approvable_type.display_name)
            .execute(&mut *tx)
            .await?;

            for layer in &approvable_type.layers {
                let decoded = layer.decode(ApprovableTypeId(approvable_type.id))?;
                sqlx::query(
                    "INSERT INTO approver_layers
                        (id, approvable_type_id, level, approver_type, approver_id, status, description)
                     VALUES (?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(id) DO UPDATE SET
                         approvable_type_id = excluded.approvable_type_id,
                         level = excluded.level,
                         approver_type = excluded.approver_type,
                         approver_id = excluded.approver_id,
                         status = excluded.status,
                         description = excluded.description",
                )
                .bind(decoded.id.0)
                .bind(approvable_type.id)
                .bind(decoded.level)
                .bind(decoded.approver_spec.type_str())
                .bind(decoded.approver_spec.id_value())
                .bind(decoded.status.as_str())
                .bind(&decoded.description)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        let summary = self.summary();
        info!(
            event_name = "catalog.loaded",
            users = summary.users,
            approvable_types = summary.approvable_types,
            layers = summary.layers,
            "workflow catalog loaded"
        );
        Ok(summary)
    }

    /// Fills in-memory stores with the same content `load` writes to SQLite.
    pub async fn populate(
        &self,
        configuration: &InMemoryConfigurationStore,
        identities: &InMemoryIdentityStore,
    ) -> Result<CatalogSummary, RepositoryError> {
        for user in &self.users {
            identities.insert_user(User { id: UserId(user.id), name: user.name.clone() }).await;
        }
        for role in &self.roles {
            identities.insert_role(Role { id: RoleId(role.id), name: role.name.clone() }).await;
            for member in &role.members {
                identities.assign_role(UserId(*member), RoleId(role.id)).await;
            }
        }
        for employee in &self.employees {
            identities
                .insert_employee(Employee {
                    id: EmployeeId(employee.id),
                    code: employee.code.clone(),
                    name: employee.name.clone(),
                    approval_line_code: employee.approval_line.clone(),
                    user_id: employee.user_id.map(UserId),
                })
                .await;
        }
        for approvable_type in &self.approvable_types {
            let type_id = ApprovableTypeId(approvable_type.id);
            configuration
                .insert_type(ApprovableType {
                    id: type_id,
                    key: approvable_type.key.clone(),
                    display_name: approvable_type.display_name.clone(),
                })
                .await;
            for layer in &approvable_type.layers {
                configuration.insert_layer(layer.decode(type_id)?).await;
            }
        }

        Ok(self.summary())
    }
}

impl CatalogLayer {
    fn decode(&self, type_id: ApprovableTypeId) -> Result<ApproverLayer, RepositoryError> {
        let approver_spec = ApproverSpec::from_parts(&self.approver_type, self.approver_id)
            .map_err(|error| RepositoryError::Decode(format!("layer {}: {error}", self.id)))?;
        let status = LayerStatus::parse(&self.status).ok_or_else(|| {
            RepositoryError::Decode(format!("layer {}: unknown status `{}`", self.id, self.status))
        })?;

        Ok(ApproverLayer {
            id: LayerId(self.id),
            approvable_type_id: type_id,
            level: self.level,
            approver_spec,
            status,
            description: self.description.clone(),
        })
    }
}
