//! User mutation entry points
//!
//! Every entry point follows the same path: admission, load, permission
//! check, staging, conditional write, change record, dispatch. Loads and
//! admission honour the caller's cancellation token; once the write is
//! acknowledged the change record is always composed and dispatched.

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::auth::{
    check_emote_set_binding, check_role_assignment, evaluate, Action, Actor, Decision,
    EDITOR_GRANT,
};
use crate::db::schemas::{ConnectionPlatform, EmoteSetDoc, UserDoc};
use crate::db::EntityStore;
use crate::events::{
    ChangeMap, EventCondition, EventDispatcher, EventType, ObjectKind, UserConnectionModel,
    UserModel,
};
use crate::mutate::{AdmissionGate, AdmissionPermit, Filter, MutationExecutor, UserBuilder};
use crate::sync::{spawn_best_effort, IdentitySync, SyncAction};
use crate::types::{MutationError, Result};

/// Action on one element of a list field
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListItemAction {
    Add,
    Update,
    Remove,
}

/// Options for `update_connection`. Exactly one of the two must be given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionUpdate {
    pub unlink: bool,
    /// `Some(None)` unbinds the connection's emote set
    pub emote_set_id: Option<Option<ObjectId>>,
}

/// Mutation entry points for users
#[derive(Clone)]
pub struct UserOps {
    store: Arc<dyn EntityStore>,
    executor: MutationExecutor,
    dispatcher: EventDispatcher,
    gate: AdmissionGate,
    identity: Arc<dyn IdentitySync>,
}

impl UserOps {
    pub fn new(
        store: Arc<dyn EntityStore>,
        dispatcher: EventDispatcher,
        gate: AdmissionGate,
        identity: Arc<dyn IdentitySync>,
    ) -> Self {
        Self {
            executor: MutationExecutor::new(store.clone()),
            store,
            dispatcher,
            gate,
            identity,
        }
    }

    /// Wait for an admission slot for `actor_id`. Callers that hold the
    /// permit use the `*_admitted` entry points.
    pub async fn admit(&self, ctx: &CancellationToken, actor_id: ObjectId) -> Result<AdmissionPermit> {
        self.gate.acquire(ctx, actor_id).await
    }

    /// Load the acting user and compute its effective permission
    pub async fn resolve_actor(&self, ctx: &CancellationToken, actor_id: ObjectId) -> Result<Actor> {
        let user = cancellable(ctx, self.store.find_user(actor_id))
            .await?
            .ok_or_else(|| MutationError::NotFound("actor not found".into()))?;
        let roles = cancellable(ctx, self.store.find_roles(&user.role_ids)).await?;
        Ok(Actor::new(&user, &roles))
    }

    /// Bind `emote_set_id` to one of the user's connections, or unbind with `None`
    pub async fn set_connection_emote_set(
        &self,
        ctx: &CancellationToken,
        actor: &Actor,
        user_id: ObjectId,
        connection_id: &str,
        emote_set_id: Option<ObjectId>,
    ) -> Result<UserModel> {
        let permit = self.gate.acquire(ctx, actor.id).await?;
        self.set_connection_emote_set_admitted(
            ctx,
            &permit,
            actor,
            user_id,
            connection_id,
            emote_set_id,
        )
        .await
    }

    /// [`Self::set_connection_emote_set`] for a caller already holding `permit`
    pub async fn set_connection_emote_set_admitted(
        &self,
        ctx: &CancellationToken,
        permit: &AdmissionPermit,
        actor: &Actor,
        user_id: ObjectId,
        connection_id: &str,
        emote_set_id: Option<ObjectId>,
    ) -> Result<UserModel> {
        check_permit(permit, actor)?;

        let user = self.load_user(ctx, user_id).await?;
        let rule = authorize(actor, &user, Action::SetActiveEmoteSet)?;

        let (index, connection) = user
            .connection(connection_id)
            .ok_or_else(|| MutationError::NotFound("unknown user connection".into()))?;
        let previous_set_id = connection.emote_set_id;
        let before = UserConnectionModel::from(connection);

        let new_set = match emote_set_id {
            Some(id) => Some(
                self.load_emote_set(ctx, id)
                    .await?
                    .ok_or_else(|| MutationError::NotFound("emote set not found".into()))?,
            ),
            None => None,
        };
        if let Some(set) = &new_set {
            check_emote_set_binding(actor, &user, set).into_result()?;
        }
        // The previous set may have been deleted since it was bound
        let previous_set = match previous_set_id {
            Some(id) => self.load_emote_set(ctx, id).await?,
            None => None,
        };
        let before = before.with_emote_set(previous_set.as_ref());

        let mut filter = Filter::by_id(user.id)
            .with("username", user.username.clone())
            .with(format!("connections.{}.id", index), connection_id);
        // The grant must still be in place when the write lands
        if rule == EDITOR_GRANT {
            let grant = user
                .editors
                .iter()
                .enumerate()
                .find(|(_, e)| e.id == actor.id);
            if let Some((i, editor)) = grant {
                filter = filter
                    .with(format!("editors.{}.id", i), editor.id)
                    .with(
                        format!("editors.{}.permissions", i),
                        bson::to_bson(&editor.permissions)?,
                    );
            }
        }

        let mut builder = UserBuilder::new(user);
        builder.set_connection_emote_set(connection_id, emote_set_id)?;
        let updated = self.executor.apply(ctx, &mut builder, filter).await?;

        info!(
            user_id = %user_id,
            actor_id = %actor.id,
            connection_id,
            emote_set_id = ?emote_set_id.map(|id| id.to_hex()),
            "connection emote set updated"
        );

        match updated.connection(connection_id) {
            Some((index, connection)) => {
                let after = UserConnectionModel::from(connection).with_emote_set(new_set.as_ref());
                let change = ChangeMap::new(user_id, ObjectKind::User, actor)
                    .compose_at("connections", index, &before, &after);
                self.publish(user_id, change).await;
            }
            None => error!(
                user_id = %user_id,
                connection_id,
                "connection missing from post-image, change event not composed"
            ),
        }

        Ok(UserModel::from(&updated))
    }

    /// Remove a connection. The last connection can never be removed.
    pub async fn unlink_connection(
        &self,
        ctx: &CancellationToken,
        actor: &Actor,
        user_id: ObjectId,
        connection_id: &str,
    ) -> Result<UserModel> {
        let permit = self.gate.acquire(ctx, actor.id).await?;
        self.unlink_connection_admitted(ctx, &permit, actor, user_id, connection_id)
            .await
    }

    pub async fn unlink_connection_admitted(
        &self,
        ctx: &CancellationToken,
        permit: &AdmissionPermit,
        actor: &Actor,
        user_id: ObjectId,
        connection_id: &str,
    ) -> Result<UserModel> {
        check_permit(permit, actor)?;

        let user = self.load_user(ctx, user_id).await?;
        authorize(actor, &user, Action::UnlinkConnection)?;

        // Pin every connection so a concurrent unlink cannot empty the list
        let filter = user.connections.iter().enumerate().fold(
            Filter::by_id(user.id).with("username", user.username.clone()),
            |filter, (i, c)| filter.with(format!("connections.{}.id", i), c.id.clone()),
        );

        let mut builder = UserBuilder::new(user);
        let (removed, index) = builder.remove_connection(connection_id)?;

        // Composed up front: the removed connection is gone from the post-image
        let change = ChangeMap::new(user_id, ObjectKind::User, actor).pull_value(
            "connections",
            index,
            &UserConnectionModel::from(&removed),
        );

        let updated = self.executor.apply(ctx, &mut builder, filter).await?;

        info!(
            user_id = %user_id,
            actor_id = %actor.id,
            connection_id,
            platform = ?removed.platform,
            "connection unlinked"
        );

        self.publish(user_id, change).await;

        if removed.platform == ConnectionPlatform::Discord {
            spawn_best_effort(self.identity.clone(), SyncAction::Revoke, user_id);
        }

        Ok(UserModel::from(&updated))
    }

    /// Apply a connection update: either unlink, or change the bound emote set
    pub async fn update_connection(
        &self,
        ctx: &CancellationToken,
        actor: &Actor,
        user_id: ObjectId,
        connection_id: &str,
        update: ConnectionUpdate,
    ) -> Result<UserModel> {
        update.validate()?;
        let permit = self.gate.acquire(ctx, actor.id).await?;
        self.update_connection_admitted(ctx, &permit, actor, user_id, connection_id, update)
            .await
    }

    pub async fn update_connection_admitted(
        &self,
        ctx: &CancellationToken,
        permit: &AdmissionPermit,
        actor: &Actor,
        user_id: ObjectId,
        connection_id: &str,
        update: ConnectionUpdate,
    ) -> Result<UserModel> {
        update.validate()?;
        match update.emote_set_id {
            None => {
                self.unlink_connection_admitted(ctx, permit, actor, user_id, connection_id)
                    .await
            }
            Some(emote_set_id) => {
                self.set_connection_emote_set_admitted(
                    ctx,
                    permit,
                    actor,
                    user_id,
                    connection_id,
                    emote_set_id,
                )
                .await
            }
        }
    }

    /// Grant or revoke a role. Returns the user's role ids afterwards.
    pub async fn set_role(
        &self,
        ctx: &CancellationToken,
        actor: &Actor,
        user_id: ObjectId,
        role_id: ObjectId,
        action: ListItemAction,
    ) -> Result<Vec<ObjectId>> {
        validate_role_action(action)?;
        let permit = self.gate.acquire(ctx, actor.id).await?;
        self.set_role_admitted(ctx, &permit, actor, user_id, role_id, action)
            .await
    }

    pub async fn set_role_admitted(
        &self,
        ctx: &CancellationToken,
        permit: &AdmissionPermit,
        actor: &Actor,
        user_id: ObjectId,
        role_id: ObjectId,
        action: ListItemAction,
    ) -> Result<Vec<ObjectId>> {
        validate_role_action(action)?;
        check_permit(permit, actor)?;

        let user = self.load_user(ctx, user_id).await?;
        authorize(actor, &user, Action::AssignRole)?;

        let role = cancellable(ctx, self.store.find_roles(&[role_id]))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MutationError::NotFound("role not found".into()))?;
        check_role_assignment(actor, &role).into_result()?;

        let before = UserModel::from(&user);
        let filter = Filter::by_id(user.id).with("username", user.username.clone());

        let mut builder = UserBuilder::new(user);
        let changed = match action {
            ListItemAction::Add => builder.add_role(role_id)?,
            _ => builder.remove_role(role_id)?,
        };
        if !changed {
            debug!(user_id = %user_id, role_id = %role_id, ?action, "role assignment unchanged");
            return Ok(builder.into_user().role_ids);
        }

        let updated = self.executor.apply(ctx, &mut builder, filter).await?;

        info!(
            user_id = %user_id,
            actor_id = %actor.id,
            role = %role.name,
            ?action,
            "role assignment updated"
        );

        let change = ChangeMap::new(user_id, ObjectKind::User, actor)
            .compose(&before, &UserModel::from(&updated));
        self.publish(user_id, change).await;

        spawn_best_effort(self.identity.clone(), SyncAction::Sync, user_id);

        Ok(updated.role_ids)
    }

    async fn load_user(&self, ctx: &CancellationToken, id: ObjectId) -> Result<UserDoc> {
        cancellable(ctx, self.store.find_user(id))
            .await?
            .ok_or_else(|| MutationError::NotFound("user not found".into()))
    }

    async fn load_emote_set(
        &self,
        ctx: &CancellationToken,
        id: ObjectId,
    ) -> Result<Option<EmoteSetDoc>> {
        cancellable(ctx, self.store.find_emote_set(id)).await
    }

    /// Dispatch a change record for a persisted mutation. Never fails the caller.
    async fn publish(&self, user_id: ObjectId, change: Result<ChangeMap>) {
        let change = match change {
            Ok(change) => change,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "failed to compose change event");
                return;
            }
        };
        if change.is_empty() {
            debug!(user_id = %user_id, "mutation produced no visible change");
            return;
        }
        // Errors are logged by the dispatcher
        let _ = self
            .dispatcher
            .dispatch(EventType::UpdateUser, change, EventCondition::object(user_id))
            .await;
    }
}

impl ConnectionUpdate {
    fn validate(&self) -> Result<()> {
        match (self.unlink, &self.emote_set_id) {
            (true, Some(_)) => Err(MutationError::InvalidState(
                "cannot unlink a connection and change its emote set in one update".into(),
            )),
            (false, None) => Err(MutationError::InvalidState(
                "connection update has nothing to change".into(),
            )),
            _ => Ok(()),
        }
    }
}

fn validate_role_action(action: ListItemAction) -> Result<()> {
    if action == ListItemAction::Update {
        return Err(MutationError::InvalidState(
            "role assignments can only be added or removed".into(),
        ));
    }
    Ok(())
}

fn check_permit(permit: &AdmissionPermit, actor: &Actor) -> Result<()> {
    if permit.actor_id() != actor.id {
        return Err(MutationError::InvalidState(
            "admission permit was issued for another actor".into(),
        ));
    }
    Ok(())
}

/// Evaluate `action`, returning the name of the rule that allowed it
fn authorize(actor: &Actor, target: &UserDoc, action: Action) -> Result<&'static str> {
    match evaluate(actor, target, action) {
        Decision::Allow(rule) => Ok(rule),
        Decision::Deny(denial) => {
            let e = MutationError::Unauthorized(denial);
            debug!(
                actor_id = %actor.id,
                target_id = %target.id,
                action = action.name(),
                reason = %e,
                "mutation denied"
            );
            Err(e)
        }
    }
}

/// Run a store read unless `ctx` is cancelled first
async fn cancellable<T>(
    ctx: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(MutationError::Cancelled("mutation cancelled during load".into())),
        result = fut => result,
    }
}
