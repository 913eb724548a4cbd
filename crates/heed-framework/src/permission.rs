//! Permission gate for guarded actions and handlers.
//!
//! Levels are hierarchical: a super administrator is also an administrator,
//! and an administrator is also a group administrator in every group.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use heed_core::Event;

use crate::context::Context;

/// A permission level, from most to least privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PermissionLevel {
    /// Owner of the bot.
    SuperAdministrator = 0,
    /// Bot-wide administrator.
    Administrator = 1,
    /// Administrator of specific groups.
    GroupAdministrator = 2,
}

impl PermissionLevel {
    /// Returns true if holding `self` also grants `required`.
    pub fn grants(self, required: PermissionLevel) -> bool {
        (self as u8) <= (required as u8)
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SuperAdministrator => "super administrator",
            Self::Administrator => "administrator",
            Self::GroupAdministrator => "group administrator",
        })
    }
}

/// Decides whether the sender of an event holds a permission level.
pub trait PermissionManager: Send + Sync {
    /// Returns true if the sender of `event` holds `required`.
    fn has_permission(
        &self,
        required: PermissionLevel,
        event: &dyn Event,
        ctx: Option<&Context>,
    ) -> bool;

    /// Returns every level `user` holds, optionally scoped to a group.
    fn permission_list(&self, user: &str, group: Option<&str>) -> BTreeSet<PermissionLevel> {
        let _ = (user, group);
        BTreeSet::new()
    }

    /// Orders two users by their highest level. `Greater` means `a` outranks `b`.
    fn compare(&self, a: &str, b: &str, group: Option<&str>) -> Ordering {
        let best = |user: &str| self.permission_list(user, group).into_iter().next();
        match (best(a), best(b)) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    }
}

// =============================================================================
// Config-backed manager
// =============================================================================

/// Who holds which level, as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionTable {
    /// The single super administrator.
    #[serde(default)]
    pub super_administrator: Option<String>,

    /// Bot-wide administrators.
    #[serde(default)]
    pub administrators: Vec<String>,

    /// Group administrators: user id to the groups they administer.
    #[serde(default)]
    pub group_administrators: HashMap<String, Vec<String>>,
}

/// A [`PermissionManager`] backed by a static [`PermissionTable`].
#[derive(Debug, Clone, Default)]
pub struct ConfigPermissionManager {
    super_administrator: Option<String>,
    administrators: HashSet<String>,
    group_administrators: HashMap<String, HashSet<String>>,
}

impl ConfigPermissionManager {
    /// Builds a manager from a permission table.
    pub fn new(table: &PermissionTable) -> Self {
        Self {
            super_administrator: table.super_administrator.clone(),
            administrators: table.administrators.iter().cloned().collect(),
            group_administrators: table
                .group_administrators
                .iter()
                .map(|(user, groups)| (user.clone(), groups.iter().cloned().collect()))
                .collect(),
        }
    }

    /// Returns true if `user` is the super administrator.
    pub fn is_super_administrator(&self, user: &str) -> bool {
        self.super_administrator.as_deref() == Some(user)
    }

    /// Returns true if `user` is an administrator or above.
    pub fn is_administrator(&self, user: &str) -> bool {
        self.is_super_administrator(user) || self.administrators.contains(user)
    }

    /// Returns true if `user` administers `group`, or any group when `group` is `None`.
    pub fn is_group_administrator(&self, user: &str, group: Option<&str>) -> bool {
        if self.is_administrator(user) {
            return true;
        }
        match (self.group_administrators.get(user), group) {
            (Some(_), None) => true,
            (Some(groups), Some(group)) => groups.contains(group),
            (None, _) => false,
        }
    }
}

impl PermissionManager for ConfigPermissionManager {
    fn has_permission(
        &self,
        required: PermissionLevel,
        event: &dyn Event,
        _ctx: Option<&Context>,
    ) -> bool {
        let Some(sender) = event.sender_id() else {
            return false;
        };
        match required {
            PermissionLevel::SuperAdministrator => self.is_super_administrator(sender),
            PermissionLevel::Administrator => self.is_administrator(sender),
            PermissionLevel::GroupAdministrator => {
                self.is_group_administrator(sender, event.group_id())
            }
        }
    }

    fn permission_list(&self, user: &str, group: Option<&str>) -> BTreeSet<PermissionLevel> {
        let mut levels = BTreeSet::new();
        if self.is_super_administrator(user) {
            levels.insert(PermissionLevel::SuperAdministrator);
        }
        if self.is_administrator(user) {
            levels.insert(PermissionLevel::Administrator);
        }
        if self.is_group_administrator(user, group) {
            levels.insert(PermissionLevel::GroupAdministrator);
        }
        levels
    }
}
