//! Org unit ("establecimiento") document schema

use bson::Document;
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

pub const ORG_UNIT_COLLECTION: &str = "org_units";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct OrgUnitDoc {
    #[serde(rename = "_id")]
    pub id: i64,

    #[serde(default)]
    pub metadata: Metadata,

    pub name: String,
}

impl IntoIndexes for OrgUnitDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![]
    }
}

impl MutMetadata for OrgUnitDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
