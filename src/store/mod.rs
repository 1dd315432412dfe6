//! Persistence seam for the services
//!
//! [`Store`] hides whether records live in MongoDB or in process memory.
//! Services only talk to this trait, which keeps them testable without a
//! running database.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;

use crate::auth::Role;
use crate::db::schemas::{AgreementDoc, OrgUnitDoc, UserDoc, WorkLineDoc};
use crate::types::Result;

/// Id sequences, one per entity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    Users,
    OrgUnits,
    WorkLines,
    Agreements,
    Dimensions,
    Indicators,
    Tasks,
}

impl Sequence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sequence::Users => "users",
            Sequence::OrgUnits => "org_units",
            Sequence::WorkLines => "work_lines",
            Sequence::Agreements => "agreements",
            Sequence::Dimensions => "dimensions",
            Sequence::Indicators => "indicators",
            Sequence::Tasks => "tasks",
        }
    }
}

/// Record storage used by every service
#[async_trait]
pub trait Store: Send + Sync {
    /// Allocate the next id of a sequence (first id is 1)
    async fn next_id(&self, sequence: Sequence) -> Result<i64>;

    /// Insert a user; a taken email yields `Conflict`
    async fn insert_user(&self, user: UserDoc) -> Result<()>;
    async fn find_user(&self, id: i64) -> Result<Option<UserDoc>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserDoc>>;
    async fn find_users(&self, ids: &[i64]) -> Result<Vec<UserDoc>>;
    async fn list_users(&self) -> Result<Vec<UserDoc>>;
    /// Users of an org unit, optionally restricted to one role
    async fn list_users_in_org_unit(&self, org_unit_id: i64, role: Option<Role>) -> Result<Vec<UserDoc>>;
    /// Returns false when the user does not exist
    async fn replace_user(&self, user: UserDoc) -> Result<bool>;
    async fn delete_user(&self, id: i64) -> Result<bool>;

    async fn insert_org_unit(&self, org_unit: OrgUnitDoc) -> Result<()>;
    async fn find_org_unit(&self, id: i64) -> Result<Option<OrgUnitDoc>>;
    async fn list_org_units(&self) -> Result<Vec<OrgUnitDoc>>;

    /// Insert a work line; a taken name yields `Conflict`
    async fn insert_work_line(&self, work_line: WorkLineDoc) -> Result<()>;
    async fn find_work_line_by_name(&self, name: &str) -> Result<Option<WorkLineDoc>>;
    async fn find_work_lines(&self, ids: &[i64]) -> Result<Vec<WorkLineDoc>>;

    async fn insert_agreement(&self, agreement: AgreementDoc) -> Result<()>;
    async fn find_agreement(&self, id: i64) -> Result<Option<AgreementDoc>>;
    async fn find_agreement_by_dimension(&self, dimension_id: i64) -> Result<Option<AgreementDoc>>;
    async fn find_agreement_by_indicator(&self, indicator_id: i64) -> Result<Option<AgreementDoc>>;
    async fn find_agreement_by_task(&self, task_id: i64) -> Result<Option<AgreementDoc>>;
    async fn list_agreements(&self) -> Result<Vec<AgreementDoc>>;
    async fn list_agreements_by_creator(&self, creator_id: i64) -> Result<Vec<AgreementDoc>>;
    /// Agreements where the user is responsible for at least one dimension
    async fn list_agreements_by_responsible(&self, user_id: i64) -> Result<Vec<AgreementDoc>>;
    /// Replace the whole agreement record in one write
    ///
    /// Lands only when the stored `version` still equals `agreement.version`,
    /// and stores the record with the version bumped by one. Returns false
    /// when the record is missing or was replaced since it was read.
    async fn replace_agreement(&self, agreement: AgreementDoc) -> Result<bool>;
}
