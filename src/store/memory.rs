//! In-memory store
//!
//! Used in dev mode when MongoDB is unreachable and by the service tests.
//! A single lock guards all collections so a write is atomic with respect to
//! every reader, matching the one-document writes of the Mongo store.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::auth::Role;
use crate::db::schemas::{AgreementDoc, Metadata, OrgUnitDoc, UserDoc, WorkLineDoc};
use crate::store::{Sequence, Store};
use crate::types::{ConvenioError, Result};

#[derive(Default)]
struct Collections {
    sequences: HashMap<Sequence, i64>,
    users: BTreeMap<i64, UserDoc>,
    org_units: BTreeMap<i64, OrgUnitDoc>,
    work_lines: BTreeMap<i64, WorkLineDoc>,
    agreements: BTreeMap<i64, AgreementDoc>,
}

/// Process-local store, lost on restart
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn agreement_where<F>(&self, pred: F) -> Option<AgreementDoc>
    where
        F: Fn(&AgreementDoc) -> bool,
    {
        self.inner
            .read()
            .await
            .agreements
            .values()
            .find(|a| pred(a))
            .cloned()
    }

    async fn agreements_where<F>(&self, pred: F) -> Vec<AgreementDoc>
    where
        F: Fn(&AgreementDoc) -> bool,
    {
        self.inner
            .read()
            .await
            .agreements
            .values()
            .filter(|a| pred(a))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn next_id(&self, sequence: Sequence) -> Result<i64> {
        let mut inner = self.inner.write().await;
        let seq = inner.sequences.entry(sequence).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }

    async fn insert_user(&self, mut user: UserDoc) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(ConvenioError::Conflict("Email already registered".into()));
        }
        user.metadata = Metadata::new();
        inner.users.insert(user.id, user);
        Ok(())
    }

    async fn find_user(&self, id: i64) -> Result<Option<UserDoc>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserDoc>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_users(&self, ids: &[i64]) -> Result<Vec<UserDoc>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn list_users(&self) -> Result<Vec<UserDoc>> {
        Ok(self.inner.read().await.users.values().cloned().collect())
    }

    async fn list_users_in_org_unit(&self, org_unit_id: i64, role: Option<Role>) -> Result<Vec<UserDoc>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .filter(|u| u.org_unit_id == org_unit_id)
            .filter(|u| role.map_or(true, |r| u.role == r))
            .cloned()
            .collect())
    }

    async fn replace_user(&self, mut user: UserDoc) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user.id) {
            return Ok(false);
        }
        if inner
            .users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(ConvenioError::Conflict("Email already registered".into()));
        }
        user.metadata.touch();
        inner.users.insert(user.id, user);
        Ok(true)
    }

    async fn delete_user(&self, id: i64) -> Result<bool> {
        Ok(self.inner.write().await.users.remove(&id).is_some())
    }

    async fn insert_org_unit(&self, mut org_unit: OrgUnitDoc) -> Result<()> {
        org_unit.metadata = Metadata::new();
        self.inner
            .write()
            .await
            .org_units
            .insert(org_unit.id, org_unit);
        Ok(())
    }

    async fn find_org_unit(&self, id: i64) -> Result<Option<OrgUnitDoc>> {
        Ok(self.inner.read().await.org_units.get(&id).cloned())
    }

    async fn list_org_units(&self) -> Result<Vec<OrgUnitDoc>> {
        Ok(self.inner.read().await.org_units.values().cloned().collect())
    }

    async fn insert_work_line(&self, mut work_line: WorkLineDoc) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.work_lines.values().any(|w| w.name == work_line.name) {
            return Err(ConvenioError::Conflict("Duplicate key".into()));
        }
        work_line.metadata = Metadata::new();
        inner.work_lines.insert(work_line.id, work_line);
        Ok(())
    }

    async fn find_work_line_by_name(&self, name: &str) -> Result<Option<WorkLineDoc>> {
        Ok(self
            .inner
            .read()
            .await
            .work_lines
            .values()
            .find(|w| w.name == name)
            .cloned())
    }

    async fn find_work_lines(&self, ids: &[i64]) -> Result<Vec<WorkLineDoc>> {
        let inner = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.work_lines.get(id).cloned())
            .collect())
    }

    async fn insert_agreement(&self, mut agreement: AgreementDoc) -> Result<()> {
        agreement.metadata = Metadata::new();
        self.inner
            .write()
            .await
            .agreements
            .insert(agreement.id, agreement);
        Ok(())
    }

    async fn find_agreement(&self, id: i64) -> Result<Option<AgreementDoc>> {
        Ok(self.inner.read().await.agreements.get(&id).cloned())
    }

    async fn find_agreement_by_dimension(&self, dimension_id: i64) -> Result<Option<AgreementDoc>> {
        Ok(self
            .agreement_where(|a| a.dimension_index(dimension_id).is_some())
            .await)
    }

    async fn find_agreement_by_indicator(&self, indicator_id: i64) -> Result<Option<AgreementDoc>> {
        Ok(self
            .agreement_where(|a| a.indicator_index(indicator_id).is_some())
            .await)
    }

    async fn find_agreement_by_task(&self, task_id: i64) -> Result<Option<AgreementDoc>> {
        Ok(self.agreement_where(|a| a.task_index(task_id).is_some()).await)
    }

    async fn list_agreements(&self) -> Result<Vec<AgreementDoc>> {
        Ok(self.agreements_where(|_| true).await)
    }

    async fn list_agreements_by_creator(&self, creator_id: i64) -> Result<Vec<AgreementDoc>> {
        Ok(self.agreements_where(|a| a.creator_id == creator_id).await)
    }

    async fn list_agreements_by_responsible(&self, user_id: i64) -> Result<Vec<AgreementDoc>> {
        Ok(self.agreements_where(|a| a.has_responsible(user_id)).await)
    }

    async fn replace_agreement(&self, mut agreement: AgreementDoc) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.agreements.get_mut(&agreement.id) {
            Some(slot) if slot.version == agreement.version => {
                agreement.version += 1;
                agreement.metadata.touch();
                *slot = agreement;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequences_are_independent() {
        let store = MemoryStore::new();
        assert_eq!(store.next_id(Sequence::Users).await.unwrap(), 1);
        assert_eq!(store.next_id(Sequence::Users).await.unwrap(), 2);
        assert_eq!(store.next_id(Sequence::Tasks).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryStore::new();
        let user = UserDoc {
            id: 1,
            email: "a@b.cl".into(),
            ..Default::default()
        };
        store.insert_user(user.clone()).await.unwrap();

        let err = store
            .insert_user(UserDoc { id: 2, ..user })
            .await
            .unwrap_err();
        assert!(matches!(err, ConvenioError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_stale_replace_is_rejected() {
        let store = MemoryStore::new();
        store
            .insert_agreement(AgreementDoc {
                id: 7,
                title: "Original".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let first = store.find_agreement(7).await.unwrap().unwrap();
        let second = first.clone();

        assert!(store
            .replace_agreement(AgreementDoc {
                title: "Primero".into(),
                ..first
            })
            .await
            .unwrap());
        assert!(!store
            .replace_agreement(AgreementDoc {
                title: "Segundo".into(),
                ..second
            })
            .await
            .unwrap());

        let stored = store.find_agreement(7).await.unwrap().unwrap();
        assert_eq!(stored.title, "Primero");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_replace_missing_agreement() {
        let store = MemoryStore::new();
        let replaced = store
            .replace_agreement(AgreementDoc {
                id: 42,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!replaced);
    }
}
