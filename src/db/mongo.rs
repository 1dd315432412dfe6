//! MongoDB client and collection wrapper

use bson::{doc, Document};
use futures::StreamExt;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::{IndexOptions, ReturnDocument},
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use crate::db::schemas::{Metadata, COUNTER_COLLECTION};
use crate::types::ConvenioError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, ConvenioError> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast when the server is unreachable
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| ConvenioError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ConvenioError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, ConvenioError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Atomically allocate the next value of a named sequence
    pub async fn next_sequence(&self, name: &str) -> Result<i64, ConvenioError> {
        let counters = self
            .client
            .database(&self.db_name)
            .collection::<Document>(COUNTER_COLLECTION);

        let updated = counters
            .find_one_and_update(doc! { "_id": name }, doc! { "$inc": { "seq": 1_i64 } })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| ConvenioError::Database(format!("Sequence update failed: {}", e)))?
            .ok_or_else(|| ConvenioError::Database(format!("Sequence '{}' missing", name)))?;

        updated
            .get_i64("seq")
            .map_err(|e| ConvenioError::Database(format!("Sequence '{}' corrupt: {}", name, e)))
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    /// Create a new collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, ConvenioError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), ConvenioError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| ConvenioError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, setting metadata timestamps
    ///
    /// A unique index violation surfaces as `Conflict`.
    pub async fn insert_one(&self, mut item: T) -> Result<(), ConvenioError> {
        *item.mut_metadata() = Metadata::new();

        self.inner.insert_one(item).await.map_err(|e| {
            if is_duplicate_key(&e) {
                ConvenioError::Conflict("Duplicate key".into())
            } else {
                ConvenioError::Database(format!("Insert failed: {}", e))
            }
        })?;

        Ok(())
    }

    /// Find one document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, ConvenioError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| ConvenioError::Database(format!("Find failed: {}", e)))
    }

    /// Find many documents by filter, ordered by id
    pub async fn find_many(&self, filter: Document) -> Result<Vec<T>, ConvenioError> {
        let cursor = self
            .inner
            .find(filter)
            .sort(doc! { "_id": 1 })
            .await
            .map_err(|e| ConvenioError::Database(format!("Find failed: {}", e)))?;

        let results: Vec<T> = cursor
            .filter_map(|doc| async move {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Replace the document matching `filter`, bumping `updated_at`
    ///
    /// Returns false when no document matched.
    pub async fn replace_one(&self, filter: Document, mut item: T) -> Result<bool, ConvenioError> {
        item.mut_metadata().touch();

        let result = self
            .inner
            .replace_one(filter, item)
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    ConvenioError::Conflict("Duplicate key".into())
                } else {
                    ConvenioError::Database(format!("Replace failed: {}", e))
                }
            })?;

        Ok(result.matched_count > 0)
    }

    /// Remove the document with the given id
    pub async fn delete_by_id(&self, id: i64) -> Result<bool, ConvenioError> {
        let result = self
            .inner
            .delete_one(doc! { "_id": id })
            .await
            .map_err(|e| ConvenioError::Database(format!("Delete failed: {}", e)))?;

        Ok(result.deleted_count > 0)
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000
    )
}
