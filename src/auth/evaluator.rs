//! Permission evaluator
//!
//! Decisions are pure: they depend only on the actor, the target and the
//! action. Rules are evaluated top-down and the first one that decides wins:
//!
//! 1. `self_action`: the actor is the target and the action is self-service
//! 2. `global_permission`: the actor holds the action's global role bit
//! 3. `editor_grant`: the target granted the actor an editor permission covering the action
//!
//! When nothing matches the action is denied, naming the missing permission.

use crate::auth::actor::Actor;
use crate::auth::permissions::{EditorPermission, RolePermission};
use crate::db::schemas::{EmoteSetDoc, RoleDoc, UserDoc};
use crate::types::{Denial, MutationError, Result};

/// Mutations that go through the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Bind or unbind the emote set active on a connection
    SetActiveEmoteSet,
    /// Remove a connection from a user
    UnlinkConnection,
    /// Grant or revoke a role
    AssignRole,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::SetActiveEmoteSet => "set_active_emote_set",
            Action::UnlinkConnection => "unlink_connection",
            Action::AssignRole => "assign_role",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Action::SetActiveEmoteSet => "change the active Emote Set of this user",
            Action::UnlinkConnection => "unlink connections of this user",
            Action::AssignRole => "change the roles of this user",
        }
    }

    /// Whether a user may perform this action on themselves
    fn self_service(self) -> bool {
        match self {
            Action::SetActiveEmoteSet | Action::UnlinkConnection => true,
            Action::AssignRole => false,
        }
    }

    /// Global role bit that allows this action on any user
    fn global_permission(self) -> RolePermission {
        match self {
            Action::SetActiveEmoteSet | Action::UnlinkConnection => RolePermission::MANAGE_USERS,
            Action::AssignRole => RolePermission::MANAGE_ROLES,
        }
    }

    /// Editor bit that allows this action on the granting user
    fn editor_permission(self) -> Option<EditorPermission> {
        match self {
            Action::SetActiveEmoteSet => Some(EditorPermission::MANAGE_EMOTE_SETS),
            Action::UnlinkConnection | Action::AssignRole => None,
        }
    }
}

/// Outcome of a permission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Allowed, naming the rule that allowed it
    Allow(&'static str),
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    /// Turn a denial into `Unauthorized`
    pub fn into_result(self) -> Result<()> {
        match self {
            Decision::Allow(_) => Ok(()),
            Decision::Deny(denial) => Err(MutationError::Unauthorized(denial)),
        }
    }
}

type Check = fn(&Actor, &UserDoc, Action) -> Option<Decision>;

struct Rule {
    name: &'static str,
    check: Check,
}

/// Name of the rule that allows through a target's editor grant
pub const EDITOR_GRANT: &str = "editor_grant";

const RULES: &[Rule] = &[
    Rule {
        name: "self_action",
        check: self_action,
    },
    Rule {
        name: "global_permission",
        check: global_permission,
    },
    Rule {
        name: EDITOR_GRANT,
        check: editor_grant,
    },
];

fn self_action(actor: &Actor, target: &UserDoc, action: Action) -> Option<Decision> {
    (actor.id == target.id && action.self_service()).then_some(Decision::Allow("self_action"))
}

fn global_permission(actor: &Actor, _target: &UserDoc, action: Action) -> Option<Decision> {
    actor
        .has_permission(action.global_permission())
        .then_some(Decision::Allow("global_permission"))
}

fn editor_grant(actor: &Actor, target: &UserDoc, action: Action) -> Option<Decision> {
    let required = action.editor_permission()?;
    let editor = target.editor(actor.id)?;
    editor
        .permissions
        .contains(required)
        .then_some(Decision::Allow(EDITOR_GRANT))
}

fn deny(action: Action) -> Denial {
    let mut denial = Denial::new(
        action.global_permission().name(),
        format!("You are not allowed to {}", action.describe()),
    );
    if let Some(editor) = action.editor_permission() {
        denial = denial.with_field("editor_permission", editor.name());
    }
    denial
}

/// Decide whether `actor` may perform `action` on `target`
pub fn evaluate(actor: &Actor, target: &UserDoc, action: Action) -> Decision {
    for rule in RULES {
        if let Some(decision) = (rule.check)(actor, target, action) {
            tracing::trace!(
                actor_id = %actor.id,
                target_id = %target.id,
                action = action.name(),
                rule = rule.name,
                allowed = decision.is_allowed(),
                "permission evaluated"
            );
            return decision;
        }
    }
    tracing::trace!(
        actor_id = %actor.id,
        target_id = %target.id,
        action = action.name(),
        rule = "deny",
        allowed = false,
        "permission evaluated"
    );
    Decision::Deny(deny(action))
}

/// Whether `actor` may bind `set` to one of `target`'s connections.
///
/// The set must belong to the actor or to the target, unless the actor may
/// edit any set.
pub fn check_emote_set_binding(actor: &Actor, target: &UserDoc, set: &EmoteSetDoc) -> Decision {
    if set.owner_id == actor.id || set.owner_id == target.id {
        return Decision::Allow("set_owner");
    }
    if actor.has_permission(RolePermission::EDIT_ANY_EMOTE_SET) {
        return Decision::Allow("edit_any_emote_set");
    }
    Decision::Deny(
        Denial::new(
            RolePermission::EDIT_ANY_EMOTE_SET.name(),
            "You cannot assign another user's Emote Set to this channel",
        )
        .with_field("owner_id", set.owner_id.to_hex()),
    )
}

/// Whether `actor` outranks `role` enough to grant or revoke it
pub fn check_role_assignment(actor: &Actor, role: &RoleDoc) -> Decision {
    if actor.is_super_admin() {
        return Decision::Allow("super_administrator");
    }
    match actor.highest_role_position() {
        Some(position) if position > role.position => Decision::Allow("role_position"),
        _ => Decision::Deny(
            Denial::new(
                RolePermission::MANAGE_ROLES.name(),
                format!(
                    "Role '{}' is positioned at or above your highest role",
                    role.name
                ),
            )
            .with_field("role_id", role.id.to_hex()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::UserEditor;
    use bson::oid::ObjectId;

    fn plain(user: &UserDoc) -> Actor {
        Actor::with_permissions(user, RolePermission::NONE)
    }

    #[test]
    fn test_self_action_allowed() {
        let user = UserDoc::new("alice");
        let actor = plain(&user);
        assert_eq!(
            evaluate(&actor, &user, Action::SetActiveEmoteSet),
            Decision::Allow("self_action")
        );
        assert_eq!(
            evaluate(&actor, &user, Action::UnlinkConnection),
            Decision::Allow("self_action")
        );
    }

    #[test]
    fn test_role_assignment_is_not_self_service() {
        let user = UserDoc::new("alice");
        let decision = evaluate(&plain(&user), &user, Action::AssignRole);
        match decision {
            Decision::Deny(denial) => assert_eq!(denial.missing, "MANAGE_ROLES"),
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[test]
    fn test_global_permission_allows_third_party() {
        let target = UserDoc::new("alice");
        let moderator = UserDoc::new("mod");
        let actor = Actor::with_permissions(&moderator, RolePermission::MANAGE_USERS);
        assert_eq!(
            evaluate(&actor, &target, Action::UnlinkConnection),
            Decision::Allow("global_permission")
        );
        assert!(!evaluate(&actor, &target, Action::AssignRole).is_allowed());
    }

    #[test]
    fn test_editor_grant_must_cover_action() {
        let editor_user = UserDoc::new("editor");
        let mut target = UserDoc::new("alice");
        target.editors.push(UserEditor::new(
            editor_user.id,
            EditorPermission::MANAGE_EMOTE_SETS,
        ));
        let actor = plain(&editor_user);

        assert_eq!(
            evaluate(&actor, &target, Action::SetActiveEmoteSet),
            Decision::Allow(EDITOR_GRANT)
        );
        // Unlinking has no editor permission
        assert!(!evaluate(&actor, &target, Action::UnlinkConnection).is_allowed());

        target.editors[0].permissions = EditorPermission::MODIFY_EMOTES;
        assert!(!evaluate(&actor, &target, Action::SetActiveEmoteSet).is_allowed());
    }

    #[test]
    fn test_deny_names_missing_permission() {
        let target = UserDoc::new("alice");
        let stranger = UserDoc::new("mallory");
        match evaluate(&plain(&stranger), &target, Action::SetActiveEmoteSet) {
            Decision::Deny(denial) => {
                assert_eq!(denial.missing, "MANAGE_USERS");
                assert_eq!(
                    denial.fields.get("editor_permission").map(String::as_str),
                    Some("MANAGE_EMOTE_SETS")
                );
            }
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[test]
    fn test_evaluation_is_pure() {
        let target = UserDoc::new("alice");
        let stranger = plain(&UserDoc::new("mallory"));
        let owner = plain(&target);

        let first = evaluate(&stranger, &target, Action::SetActiveEmoteSet);
        let _ = evaluate(&owner, &target, Action::SetActiveEmoteSet);
        let _ = evaluate(&owner, &target, Action::UnlinkConnection);
        let second = evaluate(&stranger, &target, Action::SetActiveEmoteSet);
        assert_eq!(first, second);
    }

    #[test]
    fn test_emote_set_binding_ownership() {
        let target = UserDoc::new("alice");
        let owner = plain(&target);
        let other = ObjectId::new();

        let own_set = EmoteSetDoc::new("mine", target.id);
        assert!(check_emote_set_binding(&owner, &target, &own_set).is_allowed());

        let foreign = EmoteSetDoc::new("theirs", other);
        match check_emote_set_binding(&owner, &target, &foreign) {
            Decision::Deny(denial) => {
                assert_eq!(denial.fields.get("owner_id"), Some(&other.to_hex()));
            }
            other => panic!("expected deny, got {:?}", other),
        }

        let curator = Actor::with_permissions(
            &UserDoc::new("curator"),
            RolePermission::EDIT_ANY_EMOTE_SET,
        );
        assert!(check_emote_set_binding(&curator, &target, &foreign).is_allowed());
    }

    #[test]
    fn test_role_assignment_requires_higher_position() {
        let mut admin_user = UserDoc::new("admin");
        let admin_role = RoleDoc::new("admin", 50, RolePermission::MANAGE_ROLES);
        admin_user.role_ids.push(admin_role.id);
        let actor = Actor::new(&admin_user, &[admin_role.clone()]);

        let lower = RoleDoc::new("subscriber", 10, RolePermission::NONE);
        assert!(check_role_assignment(&actor, &lower).is_allowed());
        assert!(!check_role_assignment(&actor, &admin_role).is_allowed());
    }
}
