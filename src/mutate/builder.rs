//! Staging wrapper around one user
//!
//! A [`UserBuilder`] holds the in-memory user, the update description that
//! will be sent to the store, and an "applied" flag. It represents a single
//! authorized in-flight write: once the executor has persisted it, every
//! staging call fails with `InvalidState`.

use bson::{doc, oid::ObjectId, Bson};

use crate::db::schemas::{UserConnection, UserDoc};
use crate::mutate::update::UpdateDescription;
use crate::types::{MutationError, Result};

/// Staged mutation of one user
#[derive(Debug)]
pub struct UserBuilder {
    user: UserDoc,
    update: UpdateDescription,
    applied: bool,
}

impl UserBuilder {
    /// Wrap a freshly loaded user
    pub fn new(user: UserDoc) -> Self {
        Self {
            user,
            update: UpdateDescription::new(),
            applied: false,
        }
    }

    /// Current staged (or, after apply, persisted) user
    pub fn user(&self) -> &UserDoc {
        &self.user
    }

    pub fn into_user(self) -> UserDoc {
        self.user
    }

    /// Accumulated update description
    pub fn update(&self) -> &UpdateDescription {
        &self.update
    }

    pub fn is_applied(&self) -> bool {
        self.applied
    }

    /// Seal the builder. Idempotent.
    pub fn mark_applied(&mut self) {
        self.applied = true;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.applied {
            return Err(MutationError::InvalidState(
                "builder has already been applied".into(),
            ));
        }
        Ok(())
    }

    /// Stage `value` at an arbitrary field path.
    ///
    /// Connections are only changed through the dedicated methods, which keep
    /// at least one connection on the user.
    pub fn stage(&mut self, path: &str, value: impl Into<Bson>) -> Result<&mut Self> {
        self.ensure_open()?;
        if is_rooted_at(path, "_id") {
            return Err(MutationError::InvalidState("identifier is immutable".into()));
        }
        if is_rooted_at(path, "connections") {
            return Err(MutationError::InvariantViolation(
                "connections can only be changed through connection updates".into(),
            ));
        }

        let value = value.into();
        let mut staged = UpdateDescription::new();
        staged.set(path, value.clone());

        let mut doc = bson::to_document(&self.user)?;
        staged.apply_to(&mut doc)?;
        self.user = bson::from_document(doc)?;
        self.update.set(path, value);

        Ok(self)
    }

    /// Bind (or with `None`, unbind) an emote set on a connection.
    /// Returns the connection's index.
    pub fn set_connection_emote_set(
        &mut self,
        connection_id: &str,
        emote_set_id: Option<ObjectId>,
    ) -> Result<usize> {
        self.ensure_open()?;
        let idx = self
            .user
            .connection(connection_id)
            .map(|(idx, _)| idx)
            .ok_or_else(|| MutationError::NotFound("unknown user connection".into()))?;

        self.user.connections[idx].emote_set_id = emote_set_id;
        self.update.set(
            format!("connections.{}.emote_set_id", idx),
            emote_set_id.map(Bson::ObjectId).unwrap_or(Bson::Null),
        );

        Ok(idx)
    }

    /// Stage removal of a connection, returning it with its prior index.
    /// The last remaining connection can never be removed.
    pub fn remove_connection(&mut self, connection_id: &str) -> Result<(UserConnection, usize)> {
        self.ensure_open()?;
        let idx = self
            .user
            .connection(connection_id)
            .map(|(idx, _)| idx)
            .ok_or_else(|| MutationError::NotFound("unknown user connection".into()))?;

        if self.user.connections.len() <= 1 {
            return Err(MutationError::InvariantViolation(
                "cannot unlink the last connection, that would render the account inaccessible"
                    .into(),
            ));
        }

        let removed = self.user.connections.remove(idx);
        self.update
            .pull("connections", doc! { "id": removed.id.clone() });

        Ok((removed, idx))
    }

    /// Stage adding a role. Returns false when the user already holds it.
    pub fn add_role(&mut self, role_id: ObjectId) -> Result<bool> {
        self.ensure_open()?;
        if self.user.has_role(role_id) {
            return Ok(false);
        }
        self.user.role_ids.push(role_id);
        self.update.add_to_set("role_ids", role_id);
        Ok(true)
    }

    /// Stage removing a role. Returns false when the user does not hold it.
    pub fn remove_role(&mut self, role_id: ObjectId) -> Result<bool> {
        self.ensure_open()?;
        if !self.user.has_role(role_id) {
            return Ok(false);
        }
        self.user.role_ids.retain(|id| *id != role_id);
        self.update.pull("role_ids", role_id);
        Ok(true)
    }

    /// Replace the staged user with the store's post-image
    pub(crate) fn replace_user(&mut self, user: UserDoc) {
        self.user = user;
    }
}

fn is_rooted_at(path: &str, root: &str) -> bool {
    path.split('.').next() == Some(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::ConnectionPlatform;

    fn user_with_connections(n: usize) -> UserDoc {
        let mut user = UserDoc::new("alice");
        for i in 0..n {
            user.connections
                .push(UserConnection::new(format!("c{}", i), ConnectionPlatform::Twitch));
        }
        user
    }

    #[test]
    fn test_stage_updates_entity_and_description() {
        let mut builder = UserBuilder::new(user_with_connections(1));
        builder.stage("display_name", "Alice").unwrap();

        assert_eq!(builder.user().display_name, "Alice");
        assert_eq!(
            builder.update().to_document(),
            doc! { "$set": { "display_name": "Alice" } }
        );
    }

    #[test]
    fn test_stage_rejects_identifier() {
        let mut builder = UserBuilder::new(user_with_connections(1));
        assert!(matches!(
            builder.stage("_id", ObjectId::new()),
            Err(MutationError::InvalidState(_))
        ));
        assert!(builder.update().is_empty());
    }

    #[test]
    fn test_stage_cannot_touch_connections() {
        let mut builder = UserBuilder::new(user_with_connections(2));
        for path in ["connections", "connections.0", "connections.1.id"] {
            assert!(matches!(
                builder.stage(path, Bson::Array(vec![])),
                Err(MutationError::InvariantViolation(_))
            ));
        }
        assert_eq!(builder.user().connections.len(), 2);
        assert!(builder.update().is_empty());

        // Fields that merely share the prefix are fine
        assert!(builder.stage("connections_note", "x").is_ok());
    }

    #[test]
    fn test_every_stage_call_fails_after_apply() {
        let mut builder = UserBuilder::new(user_with_connections(2));
        builder.mark_applied();
        builder.mark_applied();

        let invalid = |r: Result<()>| matches!(r, Err(MutationError::InvalidState(_)));
        assert!(invalid(builder.stage("display_name", "x").map(|_| ())));
        assert!(invalid(builder.set_connection_emote_set("c0", None).map(|_| ())));
        assert!(invalid(builder.remove_connection("c0").map(|_| ())));
        assert!(invalid(builder.add_role(ObjectId::new()).map(|_| ())));
        assert!(invalid(builder.remove_role(ObjectId::new()).map(|_| ())));
        assert_eq!(builder.user().connections.len(), 2);
    }

    #[test]
    fn test_set_connection_emote_set_uses_index_path() {
        let mut builder = UserBuilder::new(user_with_connections(2));
        let set_id = ObjectId::new();
        let idx = builder.set_connection_emote_set("c1", Some(set_id)).unwrap();

        assert_eq!(idx, 1);
        assert_eq!(builder.user().connections[1].emote_set_id, Some(set_id));
        assert_eq!(
            builder.update().to_document(),
            doc! { "$set": { "connections.1.emote_set_id": set_id } }
        );
    }

    #[test]
    fn test_unknown_connection_is_not_found() {
        let mut builder = UserBuilder::new(user_with_connections(2));
        assert!(matches!(
            builder.remove_connection("nope"),
            Err(MutationError::NotFound(_))
        ));
        assert!(matches!(
            builder.set_connection_emote_set("nope", None),
            Err(MutationError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_last_connection_is_invariant_violation() {
        let mut builder = UserBuilder::new(user_with_connections(1));
        assert!(matches!(
            builder.remove_connection("c0"),
            Err(MutationError::InvariantViolation(_))
        ));
        assert_eq!(builder.user().connections.len(), 1);
        assert!(builder.update().is_empty());
    }

    #[test]
    fn test_remove_connection_decrements_by_one() {
        for n in 2..5 {
            let mut builder = UserBuilder::new(user_with_connections(n));
            let (removed, idx) = builder.remove_connection("c1").unwrap();
            assert_eq!(removed.id, "c1");
            assert_eq!(idx, 1);
            assert_eq!(builder.user().connections.len(), n - 1);
        }
    }

    #[test]
    fn test_role_staging_is_noop_when_unchanged() {
        let role = ObjectId::new();
        let mut builder = UserBuilder::new(user_with_connections(1));

        assert!(builder.add_role(role).unwrap());
        assert!(!builder.add_role(role).unwrap());
        assert_eq!(builder.user().role_ids, vec![role]);

        let mut builder = UserBuilder::new(user_with_connections(1));
        assert!(!builder.remove_role(role).unwrap());
        assert!(builder.update().is_empty());
    }
}
