//! MongoDB-backed store

use async_trait::async_trait;
use bson::doc;
use tracing::info;

use crate::auth::Role;
use crate::db::schemas::{
    AgreementDoc, OrgUnitDoc, UserDoc, WorkLineDoc, AGREEMENT_COLLECTION, ORG_UNIT_COLLECTION,
    USER_COLLECTION, WORK_LINE_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::store::{Sequence, Store};
use crate::types::{ConvenioError, Result};

/// Store backed by one MongoDB database
pub struct MongoStore {
    client: MongoClient,
    users: MongoCollection<UserDoc>,
    org_units: MongoCollection<OrgUnitDoc>,
    work_lines: MongoCollection<WorkLineDoc>,
    agreements: MongoCollection<AgreementDoc>,
}

impl MongoStore {
    /// Open every collection and apply its indexes
    pub async fn new(client: MongoClient) -> Result<Self> {
        let users = client.collection(USER_COLLECTION).await?;
        let org_units = client.collection(ORG_UNIT_COLLECTION).await?;
        let work_lines = client.collection(WORK_LINE_COLLECTION).await?;
        let agreements = client.collection(AGREEMENT_COLLECTION).await?;

        info!(db = client.db_name(), "MongoDB collections ready");

        Ok(Self {
            client,
            users,
            org_units,
            work_lines,
            agreements,
        })
    }
}

fn role_bson(role: Role) -> Result<bson::Bson> {
    bson::to_bson(&role).map_err(ConvenioError::from)
}

#[async_trait]
impl Store for MongoStore {
    async fn next_id(&self, sequence: Sequence) -> Result<i64> {
        self.client.next_sequence(sequence.as_str()).await
    }

    async fn insert_user(&self, user: UserDoc) -> Result<()> {
        self.users.insert_one(user).await.map_err(|e| match e {
            ConvenioError::Conflict(_) => ConvenioError::Conflict("Email already registered".into()),
            other => other,
        })
    }

    async fn find_user(&self, id: i64) -> Result<Option<UserDoc>> {
        self.users.find_one(doc! { "_id": id }).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserDoc>> {
        self.users.find_one(doc! { "email": email }).await
    }

    async fn find_users(&self, ids: &[i64]) -> Result<Vec<UserDoc>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.users.find_many(doc! { "_id": { "$in": ids.to_vec() } }).await
    }

    async fn list_users(&self) -> Result<Vec<UserDoc>> {
        self.users.find_many(doc! {}).await
    }

    async fn list_users_in_org_unit(&self, org_unit_id: i64, role: Option<Role>) -> Result<Vec<UserDoc>> {
        let mut filter = doc! { "org_unit_id": org_unit_id };
        if let Some(role) = role {
            filter.insert("role", role_bson(role)?);
        }
        self.users.find_many(filter).await
    }

    async fn replace_user(&self, user: UserDoc) -> Result<bool> {
        self.users.replace_one(doc! { "_id": user.id }, user).await.map_err(|e| match e {
            ConvenioError::Conflict(_) => ConvenioError::Conflict("Email already registered".into()),
            other => other,
        })
    }

    async fn delete_user(&self, id: i64) -> Result<bool> {
        self.users.delete_by_id(id).await
    }

    async fn insert_org_unit(&self, org_unit: OrgUnitDoc) -> Result<()> {
        self.org_units.insert_one(org_unit).await
    }

    async fn find_org_unit(&self, id: i64) -> Result<Option<OrgUnitDoc>> {
        self.org_units.find_one(doc! { "_id": id }).await
    }

    async fn list_org_units(&self) -> Result<Vec<OrgUnitDoc>> {
        self.org_units.find_many(doc! {}).await
    }

    async fn insert_work_line(&self, work_line: WorkLineDoc) -> Result<()> {
        self.work_lines.insert_one(work_line).await
    }

    async fn find_work_line_by_name(&self, name: &str) -> Result<Option<WorkLineDoc>> {
        self.work_lines.find_one(doc! { "name": name }).await
    }

    async fn find_work_lines(&self, ids: &[i64]) -> Result<Vec<WorkLineDoc>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.work_lines.find_many(doc! { "_id": { "$in": ids.to_vec() } }).await
    }

    async fn insert_agreement(&self, agreement: AgreementDoc) -> Result<()> {
        self.agreements.insert_one(agreement).await
    }

    async fn find_agreement(&self, id: i64) -> Result<Option<AgreementDoc>> {
        self.agreements.find_one(doc! { "_id": id }).await
    }

    async fn find_agreement_by_dimension(&self, dimension_id: i64) -> Result<Option<AgreementDoc>> {
        self.agreements
            .find_one(doc! { "dimensions.id": dimension_id })
            .await
    }

    async fn find_agreement_by_indicator(&self, indicator_id: i64) -> Result<Option<AgreementDoc>> {
        self.agreements
            .find_one(doc! { "dimensions.indicators.id": indicator_id })
            .await
    }

    async fn find_agreement_by_task(&self, task_id: i64) -> Result<Option<AgreementDoc>> {
        self.agreements
            .find_one(doc! { "dimensions.indicators.tasks.id": task_id })
            .await
    }

    async fn list_agreements(&self) -> Result<Vec<AgreementDoc>> {
        self.agreements.find_many(doc! {}).await
    }

    async fn list_agreements_by_creator(&self, creator_id: i64) -> Result<Vec<AgreementDoc>> {
        self.agreements
            .find_many(doc! { "creator_id": creator_id })
            .await
    }

    async fn list_agreements_by_responsible(&self, user_id: i64) -> Result<Vec<AgreementDoc>> {
        self.agreements
            .find_many(doc! { "dimensions.responsible_ids": user_id })
            .await
    }

    async fn replace_agreement(&self, mut agreement: AgreementDoc) -> Result<bool> {
        let filter = doc! { "_id": agreement.id, "version": agreement.version };
        agreement.version += 1;
        self.agreements.replace_one(filter, agreement).await
    }
}
