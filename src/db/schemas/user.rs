//! User document schema

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UserDoc {
    #[serde(rename = "_id")]
    pub id: i64,

    #[serde(default)]
    pub metadata: Metadata,

    pub name: String,

    /// Login identifier, unique across users
    pub email: String,

    /// Argon2 password hash
    pub password_hash: String,

    pub role: Role,

    pub org_unit_id: i64,
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "email": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("email_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "org_unit_id": 1, "role": 1 },
                Some(
                    IndexOptions::builder()
                        .name("org_unit_role_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
