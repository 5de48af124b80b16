//! Conditional persistence of a staged builder

use bson::{oid::ObjectId, Bson, Document};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::db::schemas::UserDoc;
use crate::db::EntityStore;
use crate::mutate::builder::UserBuilder;
use crate::types::{MutationError, Result};

/// Equality filter a write is conditioned on.
///
/// Always pins the entity identifier; callers add every field their
/// authorization decision depended on.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter(Document);

impl Filter {
    pub fn by_id(id: ObjectId) -> Self {
        let mut doc = Document::new();
        doc.insert("_id", id);
        Self(doc)
    }

    /// Require `path` to still equal `value` at write time
    pub fn with(mut self, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.0.insert(path.into(), value.into());
        self
    }

    pub fn id(&self) -> Option<ObjectId> {
        self.0.get_object_id("_id").ok()
    }

    pub fn as_document(&self) -> &Document {
        &self.0
    }

    pub fn into_document(self) -> Document {
        self.0
    }
}

/// Issues one conditional update-and-fetch per builder
#[derive(Clone)]
pub struct MutationExecutor {
    store: Arc<dyn EntityStore>,
}

impl MutationExecutor {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Persist the builder's staged update if `filter` still matches.
    ///
    /// Cancellation is honoured only until the write is issued; once the
    /// store has the request the write runs to completion. Failures are not
    /// retried here, a retry needs a fresh builder and a fresh permission check.
    pub async fn apply(
        &self,
        ctx: &CancellationToken,
        builder: &mut UserBuilder,
        filter: Filter,
    ) -> Result<UserDoc> {
        if builder.is_applied() {
            return Err(MutationError::InvalidState(
                "builder has already been applied".into(),
            ));
        }

        let user_id = builder.user().id;
        if filter.id() != Some(user_id) {
            return Err(MutationError::InvalidState(
                "write filter must pin the entity identifier".into(),
            ));
        }

        if builder.update().is_empty() {
            return Err(MutationError::InvalidState("nothing staged to write".into()));
        }

        if ctx.is_cancelled() {
            return Err(MutationError::Cancelled(
                "mutation cancelled before write".into(),
            ));
        }

        let result = self
            .store
            .find_one_and_update_user(filter.into_document(), builder.update())
            .await;

        match result {
            Ok(Some(user)) => {
                builder.replace_user(user.clone());
                builder.mark_applied();
                debug!(user_id = %user_id, "conditional update applied");
                Ok(user)
            }
            Ok(None) => {
                debug!(user_id = %user_id, "conditional update matched nothing");
                Err(MutationError::conflict())
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "failed to update user");
                Err(match e {
                    MutationError::Persistence(msg) => MutationError::Persistence(msg),
                    other => MutationError::Persistence(other.to_string()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{ConnectionPlatform, UserConnection};
    use crate::db::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, MutationExecutor, UserDoc) {
        let store = Arc::new(MemoryStore::new());
        let mut user = UserDoc::new("alice");
        user.connections
            .push(UserConnection::new("c0", ConnectionPlatform::Twitch));
        user.connections
            .push(UserConnection::new("c1", ConnectionPlatform::Discord));
        store.insert_user(&user).await.unwrap();
        let executor = MutationExecutor::new(store.clone());
        (store, executor, user)
    }

    #[tokio::test]
    async fn test_apply_replaces_entity_and_seals_builder() {
        let (store, executor, user) = setup().await;
        let mut builder = UserBuilder::new(user.clone());
        builder.stage("display_name", "Alice").unwrap();

        let filter = Filter::by_id(user.id).with("username", "alice");
        let updated = executor
            .apply(&CancellationToken::new(), &mut builder, filter)
            .await
            .unwrap();

        assert_eq!(updated.display_name, "Alice");
        assert!(builder.is_applied());
        assert_eq!(builder.user(), &updated);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_filter_is_not_found_and_leaves_document() {
        let (store, executor, user) = setup().await;
        let mut builder = UserBuilder::new(user.clone());
        builder.stage("display_name", "Mallory").unwrap();

        let filter = Filter::by_id(user.id).with("username", "renamed");
        let err = executor
            .apply(&CancellationToken::new(), &mut builder, filter)
            .await
            .unwrap_err();

        assert!(matches!(err, MutationError::NotFound(_)));
        assert!(!builder.is_applied());
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap(), user);
    }

    #[tokio::test]
    async fn test_cancelled_before_write() {
        let (store, executor, user) = setup().await;
        let mut builder = UserBuilder::new(user.clone());
        builder.stage("display_name", "Alice").unwrap();

        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = executor
            .apply(&ctx, &mut builder, Filter::by_id(user.id))
            .await
            .unwrap_err();

        assert!(matches!(err, MutationError::Cancelled(_)));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_filter_must_pin_identifier() {
        let (_store, executor, user) = setup().await;
        let mut builder = UserBuilder::new(user);
        builder.stage("display_name", "Alice").unwrap();

        let err = executor
            .apply(
                &CancellationToken::new(),
                &mut builder,
                Filter::by_id(ObjectId::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MutationError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_applied_builder_cannot_be_reapplied() {
        let (store, executor, user) = setup().await;
        let mut builder = UserBuilder::new(user.clone());
        builder.stage("display_name", "Alice").unwrap();
        let ctx = CancellationToken::new();

        executor
            .apply(&ctx, &mut builder, Filter::by_id(user.id))
            .await
            .unwrap();
        let err = executor
            .apply(&ctx, &mut builder, Filter::by_id(user.id))
            .await
            .unwrap_err();

        assert!(matches!(err, MutationError::InvalidState(_)));
        assert_eq!(store.write_count(), 1);
    }
}
