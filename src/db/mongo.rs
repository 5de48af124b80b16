//! MongoDB client, collection wrapper and [`EntityStore`] implementation

use bson::{doc, oid::ObjectId, Document};
use futures_util::stream::{Stream, TryStreamExt};
use mongodb::{
    options::{IndexOptions, ReturnDocument},
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use tracing::info;

use crate::db::schemas::{
    EmoteSetDoc, RoleDoc, UserDoc, EMOTE_SET_COLLECTION, ROLE_COLLECTION, USER_COLLECTION,
};
use crate::db::store::EntityStore;
use crate::mutate::UpdateDescription;
use crate::types::{MutationError, Result};

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast when the server is unreachable
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri).await.map_err(|e| {
            MutationError::Persistence(format!("Failed to connect to MongoDB: {}", e))
        })?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| MutationError::Persistence(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
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
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
{
    /// Create a new collection and apply indexes
    pub async fn new(client: &Client, db_name: &str, collection_name: &str) -> Result<Self> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<()> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner.create_indexes(indices).await.map_err(|e| {
            MutationError::Persistence(format!("Failed to create indexes: {}", e))
        })?;

        Ok(())
    }

    /// Find one document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| MutationError::Persistence(format!("Find failed: {}", e)))
    }

    /// Find many documents by filter. A document that fails to decode fails
    /// the whole read.
    pub async fn find_many(&self, filter: Document) -> Result<Vec<T>> {
        let cursor = self
            .inner
            .find(filter)
            .await
            .map_err(|e| MutationError::Persistence(format!("Find failed: {}", e)))?;

        collect_all(cursor).await
    }

    /// Conditionally update one document and return its post-image
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<Option<T>> {
        self.inner
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| MutationError::Persistence(format!("Update failed: {}", e)))
    }
}

async fn collect_all<T, E: Display>(
    cursor: impl Stream<Item = std::result::Result<T, E>>,
) -> Result<Vec<T>> {
    cursor
        .try_collect()
        .await
        .map_err(|e| MutationError::Persistence(format!("Error reading document: {}", e)))
}

/// MongoDB-backed entity store
#[derive(Clone)]
pub struct MongoStore {
    users: MongoCollection<UserDoc>,
    emote_sets: MongoCollection<EmoteSetDoc>,
    roles: MongoCollection<RoleDoc>,
}

impl MongoStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            users: mongo.collection(USER_COLLECTION).await?,
            emote_sets: mongo.collection(EMOTE_SET_COLLECTION).await?,
            roles: mongo.collection(ROLE_COLLECTION).await?,
        })
    }
}

#[async_trait::async_trait]
impl EntityStore for MongoStore {
    async fn find_user(&self, id: ObjectId) -> Result<Option<UserDoc>> {
        self.users.find_one(doc! { "_id": id }).await
    }

    async fn find_emote_set(&self, id: ObjectId) -> Result<Option<EmoteSetDoc>> {
        self.emote_sets.find_one(doc! { "_id": id }).await
    }

    async fn find_roles(&self, ids: &[ObjectId]) -> Result<Vec<RoleDoc>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.roles
            .find_many(doc! { "_id": { "$in": ids.to_vec() } })
            .await
    }

    async fn find_one_and_update_user(
        &self,
        filter: Document,
        update: &UpdateDescription,
    ) -> Result<Option<UserDoc>> {
        self.users
            .find_one_and_update(filter, update.to_document())
            .await
    }
}

#[cfg(test)]
mod tests {
    // Anything touching a live collection needs a running MongoDB instance;
    // MemoryStore covers the same conditional-update contract.
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn test_undecodable_document_fails_the_read() {
        let cursor = stream::iter(vec![Ok(1), Err("missing field `position`"), Ok(3)]);
        let err = collect_all(cursor).await.unwrap_err();
        assert!(matches!(err, MutationError::Persistence(ref msg) if msg.contains("position")));
    }

    #[tokio::test]
    async fn test_collects_every_document() {
        let cursor = stream::iter(vec![Ok::<_, String>(1), Ok(2)]);
        assert_eq!(collect_all(cursor).await.unwrap(), vec![1, 2]);
    }
}
