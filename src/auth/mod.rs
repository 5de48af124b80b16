//! Authorization for Chisel
//!
//! Provides:
//! - Role and editor permission bitsets
//! - Actor resolution (effective permission from held roles)
//! - The ordered permission evaluator and cross-entity checks

pub mod actor;
pub mod evaluator;
pub mod permissions;

pub use actor::Actor;
pub use evaluator::{
    check_emote_set_binding, check_role_assignment, evaluate, Action, Decision,
    EDITOR_GRANT,
};
pub use permissions::{EditorPermission, RolePermission};
