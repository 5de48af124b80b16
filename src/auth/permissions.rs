//! Permission bitsets
//!
//! `RolePermission` bits come from the roles a user holds (global scope).
//! `EditorPermission` bits come from a per-relationship editor grant and only
//! apply to the user that issued the grant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Global permission bits granted by roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RolePermission(u64);

impl RolePermission {
    pub const NONE: Self = Self(0);
    pub const CREATE_EMOTE_SET: Self = Self(1 << 0);
    pub const EDIT_EMOTE_SET: Self = Self(1 << 1);
    pub const EDIT_ANY_EMOTE_SET: Self = Self(1 << 2);
    pub const MANAGE_USERS: Self = Self(1 << 10);
    pub const MANAGE_ROLES: Self = Self(1 << 11);
    /// Implies every other bit
    pub const SUPER_ADMINISTRATOR: Self = Self(1 << 62);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn remove(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Name of a single bit, for denial messages
    pub fn name(self) -> &'static str {
        match self {
            Self::CREATE_EMOTE_SET => "CREATE_EMOTE_SET",
            Self::EDIT_EMOTE_SET => "EDIT_EMOTE_SET",
            Self::EDIT_ANY_EMOTE_SET => "EDIT_ANY_EMOTE_SET",
            Self::MANAGE_USERS => "MANAGE_USERS",
            Self::MANAGE_ROLES => "MANAGE_ROLES",
            Self::SUPER_ADMINISTRATOR => "SUPER_ADMINISTRATOR",
            _ => "UNKNOWN",
        }
    }
}

impl BitOr for RolePermission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RolePermission {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for RolePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Permission subset an editor holds over the user that granted it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditorPermission(u32);

impl EditorPermission {
    pub const NONE: Self = Self(0);
    pub const MODIFY_EMOTES: Self = Self(1 << 0);
    pub const USE_PRIVATE_EMOTES: Self = Self(1 << 1);
    pub const MANAGE_PROFILE: Self = Self(1 << 2);
    pub const MANAGE_OWNED_EMOTES: Self = Self(1 << 3);
    pub const MANAGE_EMOTE_SETS: Self = Self(1 << 4);
    pub const MANAGE_BILLING: Self = Self(1 << 5);
    pub const MANAGE_EDITORS: Self = Self(1 << 6);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::MODIFY_EMOTES => "MODIFY_EMOTES",
            Self::USE_PRIVATE_EMOTES => "USE_PRIVATE_EMOTES",
            Self::MANAGE_PROFILE => "MANAGE_PROFILE",
            Self::MANAGE_OWNED_EMOTES => "MANAGE_OWNED_EMOTES",
            Self::MANAGE_EMOTE_SETS => "MANAGE_EMOTE_SETS",
            Self::MANAGE_BILLING => "MANAGE_BILLING",
            Self::MANAGE_EDITORS => "MANAGE_EDITORS",
            _ => "UNKNOWN",
        }
    }
}

impl BitOr for EditorPermission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for EditorPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
