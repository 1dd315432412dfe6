//! Work line document schema
//!
//! Work lines are free-text tags shared by indicators across agreements.
//! The unique name index backs the find-or-create in the service layer.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

pub const WORK_LINE_COLLECTION: &str = "work_lines";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct WorkLineDoc {
    #[serde(rename = "_id")]
    pub id: i64,

    #[serde(default)]
    pub metadata: Metadata,

    pub name: String,

    pub description: String,
}

impl IntoIndexes for WorkLineDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "name": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("name_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for WorkLineDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
