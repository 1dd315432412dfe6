//! Org units ("establecimientos")

use std::sync::Arc;
use tracing::info;

use crate::db::schemas::{Metadata, OrgUnitDoc};
use crate::services::views::OrgUnitView;
use crate::store::{Sequence, Store};
use crate::types::{ConvenioError, Result};

#[derive(Clone)]
pub struct OrgUnitService {
    store: Arc<dyn Store>,
}

impl OrgUnitService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, name: &str) -> Result<OrgUnitView> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConvenioError::BadRequest("nombre is required".into()));
        }

        let org_unit = OrgUnitDoc {
            id: self.store.next_id(Sequence::OrgUnits).await?,
            metadata: Metadata::new(),
            name: name.to_string(),
        };
        self.store.insert_org_unit(org_unit.clone()).await?;

        info!(id = org_unit.id, name, "Created org unit");
        Ok(OrgUnitView::from(&org_unit))
    }

    pub async fn list(&self) -> Result<Vec<OrgUnitView>> {
        Ok(self
            .store
            .list_org_units()
            .await?
            .iter()
            .map(OrgUnitView::from)
            .collect())
    }

    pub async fn get(&self, id: i64) -> Result<OrgUnitView> {
        self.store
            .find_org_unit(id)
            .await?
            .as_ref()
            .map(OrgUnitView::from)
            .ok_or_else(|| ConvenioError::NotFound(format!("Org unit {id} not found")))
    }

    /// Create `name` when no org unit exists yet
    ///
    /// Lets the first user register on an empty database.
    pub async fn bootstrap(&self, name: &str) -> Result<Option<OrgUnitView>> {
        if !self.store.list_org_units().await?.is_empty() {
            return Ok(None);
        }
        self.create(name).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> OrgUnitService {
        OrgUnitService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let service = service();
        let created = service.create("Liceo Bicentenario").await.unwrap();
        assert_eq!(created.id, 1);

        let fetched = service.get(created.id).await.unwrap();
        assert_eq!(fetched.nombre, "Liceo Bicentenario");
        assert_eq!(service.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_and_blank() {
        let service = service();
        assert!(matches!(
            service.get(9).await.unwrap_err(),
            ConvenioError::NotFound(_)
        ));
        assert!(matches!(
            service.create("  ").await.unwrap_err(),
            ConvenioError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_only_on_empty_store() {
        let service = service();
        assert!(service.bootstrap("Escuela Central").await.unwrap().is_some());
        assert!(service.bootstrap("Otra").await.unwrap().is_none());
        assert_eq!(service.list().await.unwrap().len(), 1);
    }
}
