use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::RwLock;

use signoff_core::domain::approval::{
    ApprovableRef, Approval, ApprovalDraft, ApprovalId, ApprovalStatus, Decision,
};
use signoff_core::domain::identity::{Employee, EmployeeId, Role, RoleId, User, UserId};
use signoff_core::domain::layer::{ApprovableType, ApprovableTypeId, ApproverLayer, LayerId};
use signoff_core::errors::{LedgerError, StoreError};
use signoff_core::ports::{ApprovalLedger, ConfigurationStore, IdentityStore, LevelWrite};

#[derive(Default)]
pub struct InMemoryConfigurationStore {
    types: RwLock<HashMap<String, ApprovableType>>,
    layers: RwLock<BTreeMap<LayerId, ApproverLayer>>,
}

impl InMemoryConfigurationStore {
    pub async fn insert_type(&self, approvable_type: ApprovableType) {
        let mut types = self.types.write().await;
        types.insert(approvable_type.key.clone(), approvable_type);
    }

    pub async fn insert_layer(&self, layer: ApproverLayer) {
        let mut layers = self.layers.write().await;
        layers.insert(layer.id, layer);
    }
}

#[async_trait::async_trait]
impl ConfigurationStore for InMemoryConfigurationStore {
    async fn approvable_type(
        &self,
        type_key: &str,
    ) -> Result<Option<ApprovableType>, StoreError> {
        let types = self.types.read().await;
        Ok(types.get(type_key).cloned())
    }

    async fn active_layers(
        &self,
        type_id: ApprovableTypeId,
    ) -> Result<Vec<ApproverLayer>, StoreError> {
        let layers = self.layers.read().await;
        Ok(layers
            .values()
            .filter(|layer| layer.approvable_type_id == type_id && layer.is_active())
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryIdentityStore {
    users: RwLock<HashMap<UserId, User>>,
    employees: RwLock<BTreeMap<EmployeeId, Employee>>,
    roles: RwLock<HashMap<RoleId, Role>>,
    memberships: RwLock<HashMap<RoleId, BTreeSet<UserId>>>,
}

impl InMemoryIdentityStore {
    pub async fn insert_user(&self, user: User) {
        let mut users = self.users.write().await;
        users.insert(user.id, user);
    }

    pub async fn insert_employee(&self, employee: Employee) {
        let mut employees = self.employees.write().await;
        employees.insert(employee.id, employee);
    }

    pub async fn insert_role(&self, role: Role) {
        let mut roles = self.roles.write().await;
        roles.insert(role.id, role);
    }

    pub async fn assign_role(&self, user: UserId, role: RoleId) {
        let mut memberships = self.memberships.write().await;
        memberships.entry(role).or_default().insert(user);
    }
}

#[async_trait::async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(&id).cloned())
    }

    async fn find_employee_by_id(&self, id: EmployeeId) -> Result<Option<Employee>, StoreError> {
        let employees = self.employees.read().await;
        Ok(employees.get(&id).cloned())
    }

    async fn find_employee_by_code(&self, code: &str) -> Result<Option<Employee>, StoreError> {
        let code = code.trim();
        let employees = self.employees.read().await;
        Ok(employees.values().find(|employee| employee.code == code).cloned())
    }

    async fn find_employee_for_user(&self, user: UserId) -> Result<Option<Employee>, StoreError> {
        let employees = self.employees.read().await;
        Ok(employees.values().find(|employee| employee.user_id == Some(user)).cloned())
    }

    async fn find_role_by_id(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        let roles = self.roles.read().await;
        Ok(roles.get(&id).cloned())
    }

    async fn find_users_with_role(&self, id: RoleId) -> Result<Vec<UserId>, StoreError> {
        let memberships = self.memberships.read().await;
        Ok(memberships.get(&id).map(|users| users.iter().copied().collect()).unwrap_or_default())
    }
}

/// Rows are kept in insertion order, which stands in for the SQL `seq`
/// column. Check-and-insert happens under one write lock.
#[derive(Default)]
pub struct InMemoryApprovalLedger {
    rows: RwLock<Vec<Approval>>,
    unavailable: AtomicBool,
}

impl InMemoryApprovalLedger {
    /// Makes every subsequent write fail with a backend error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("approval ledger unavailable".to_string()));
        }
        Ok(())
    }
}

fn is_pending_triple(row: &Approval, draft: &ApprovalDraft) -> bool {
    row.status.is_pending()
        && row.subject == draft.subject
        && row.layer_id == draft.layer_id
        && row.approver == draft.approver
}

#[async_trait::async_trait]
impl ApprovalLedger for InMemoryApprovalLedger {
    async fn exists_pending(
        &self,
        subject: &ApprovableRef,
        layer_id: LayerId,
        approver: UserId,
    ) -> Result<bool, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows.iter().any(|row| {
            row.status.is_pending()
                && &row.subject == subject
                && row.layer_id == layer_id
                && row.approver == approver
        }))
    }

    async fn create(&self, draft: ApprovalDraft) -> Result<Approval, LedgerError> {
        self.ensure_available()?;
        let mut rows = self.rows.write().await;
        if rows.iter().any(|row| is_pending_triple(row, &draft)) {
            return Err(LedgerError::DuplicateApproval {
                subject: draft.subject,
                layer_id: draft.layer_id,
                approver: draft.approver,
            });
        }
        let approval = Approval::from_draft(draft, Utc::now());
        rows.push(approval.clone());
        Ok(approval)
    }

    async fn open_level(&self, drafts: Vec<ApprovalDraft>) -> Result<LevelWrite, StoreError> {
        self.ensure_available()?;
        let now = Utc::now();
        let mut rows = self.rows.write().await;
        let mut write = LevelWrite::default();

        for draft in drafts {
            let duplicate = rows.iter().chain(write.created.iter()).any(|row| {
                is_pending_triple(row, &draft)
            });
            if duplicate {
                write.duplicates.push(draft);
            } else {
                write.created.push(Approval::from_draft(draft, now));
            }
        }

        rows.extend(write.created.iter().cloned());
        Ok(write)
    }

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows.iter().find(|row| &row.id == id).cloned())
    }

    async fn decide(
        &self,
        id: &ApprovalId,
        acting: UserId,
        decision: Decision,
    ) -> Result<Approval, LedgerError> {
        self.ensure_available()?;
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|row| &row.id == id)
            .ok_or_else(|| LedgerError::NotFound(id.clone()))?;

        if row.approver != acting {
            return Err(LedgerError::NotAuthorized { approval_id: id.clone(), acting });
        }
        if row.status != ApprovalStatus::Pending {
            return Err(LedgerError::AlreadyDecided { approval_id: id.clone(), status: row.status });
        }

        let now = Utc::now();
        row.status = decision.status();
        row.decided_at = Some(now);
        row.updated_at = now;
        Ok(row.clone())
    }

    async fn list_for(&self, subject: &ApprovableRef) -> Result<Vec<Approval>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows.iter().filter(|row| &row.subject == subject).cloned().collect())
    }

    async fn latest_for(&self, subject: &ApprovableRef) -> Result<Option<Approval>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows.iter().rev().find(|row| &row.subject == subject).cloned())
    }

    async fn pending_for_approver(&self, approver: UserId) -> Result<Vec<Approval>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|row| row.approver == approver && row.status.is_pending())
            .cloned()
            .collect())
    }
}
