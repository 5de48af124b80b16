//! Acting identity

use bson::oid::ObjectId;

use crate::auth::permissions::RolePermission;
use crate::db::schemas::{RoleDoc, UserDoc};

/// The user a mutation is performed by, with its effective role permission
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub id: ObjectId,
    pub username: String,
    pub display_name: String,
    permissions: RolePermission,
    highest_position: Option<i32>,
}

impl Actor {
    /// Resolve an actor from its user document and role documents. Roles the
    /// user does not reference are ignored.
    pub fn new(user: &UserDoc, roles: &[RoleDoc]) -> Self {
        let held: Vec<&RoleDoc> = roles.iter().filter(|r| user.has_role(r.id)).collect();

        let mut allowed = RolePermission::NONE;
        let mut denied = RolePermission::NONE;
        for role in &held {
            allowed |= role.allowed;
            denied |= role.denied;
        }

        Self {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            permissions: allowed.remove(denied),
            highest_position: held.iter().map(|r| r.position).max(),
        }
    }

    /// Actor with explicit permissions and no roles
    pub fn with_permissions(user: &UserDoc, permissions: RolePermission) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            permissions,
            highest_position: None,
        }
    }

    pub fn permissions(&self) -> RolePermission {
        self.permissions
    }

    pub fn highest_role_position(&self) -> Option<i32> {
        self.highest_position
    }

    pub fn is_super_admin(&self) -> bool {
        self.permissions.contains(RolePermission::SUPER_ADMINISTRATOR)
    }

    pub fn has_permission(&self, permission: RolePermission) -> bool {
        self.is_super_admin() || self.permissions.contains(permission)
    }
}
