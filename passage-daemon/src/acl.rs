//! Role- and group-based access control with per-object rule sets.
//!
//! The engine is built once from config and read-only afterwards. Evaluation
//! is two-staged: a global role gate (some effective role must grant the
//! permission), then the object's ordered allow/deny rules where any
//! applicable deny wins.

use std::collections::HashMap;

use subtle::ConstantTimeEq;

use passage_protocol::protocol::Auth;

use crate::config::{AclConfig, AclRuleSet};
use crate::errors::{DaemonError, Result};

/// Permission names the daemon checks. Roles granting anything outside this
/// list are a configuration error.
pub const PERMISSIONS: &[&str] = &[
    "proxy_start",
    "proxy_stop",
    "proxy_status",
    "proxy_info",
    "proxy_list",
    "proxy_setactive",
    "proxy_resolve",
];

/// Principal substituted when a request carries no auth block.
pub const ANONYMOUS: &str = "anon";

#[derive(Debug, Clone)]
struct UserEntry {
    roles: Vec<String>,
    token: String,
    /// Materialized at init from group membership.
    groups: Vec<String>,
}

#[derive(Debug, Clone)]
struct GroupEntry {
    roles: Vec<String>,
}

#[derive(Debug)]
pub struct AclEngine {
    enabled: bool,
    users: HashMap<String, UserEntry>,
    groups: HashMap<String, GroupEntry>,
    /// role name → granted permissions
    roles: HashMap<String, Vec<String>>,
}

impl AclEngine {
    /// Build the engine, validating roles against the permission allowlist
    /// and group members against the user table.
    pub fn new(config: &AclConfig, permissions: &[&str]) -> Result<Self> {
        for (role_name, role) in &config.roles {
            for permission in &role.permissions {
                if !permissions.contains(&permission.as_str()) {
                    return Err(DaemonError::InvalidPermission {
                        permission: permission.clone(),
                        role: role_name.clone(),
                    });
                }
            }
        }

        let mut users: HashMap<String, UserEntry> = config
            .users
            .iter()
            .map(|(name, user)| {
                (
                    name.clone(),
                    UserEntry {
                        roles: user.roles.clone(),
                        token: user.token.clone(),
                        groups: Vec::new(),
                    },
                )
            })
            .collect();

        let mut groups = HashMap::with_capacity(config.groups.len());
        for (key, group) in &config.groups {
            // An explicit name overrides the map key.
            let group_name = if group.name.is_empty() {
                key.clone()
            } else {
                group.name.clone()
            };
            for member in &group.members {
                match users.get_mut(member) {
                    Some(user) => user.groups.push(group_name.clone()),
                    None => {
                        return Err(DaemonError::UnknownGroupMember {
                            user: member.clone(),
                            group: group_name,
                        })
                    }
                }
            }
            groups.insert(
                group_name,
                GroupEntry {
                    roles: group.roles.clone(),
                },
            );
        }

        let roles = config
            .roles
            .iter()
            .map(|(name, role)| (name.clone(), role.permissions.clone()))
            .collect();

        Ok(Self {
            enabled: config.enabled,
            users,
            groups,
            roles,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Validate a credential block. With the engine disabled every caller is
    /// accepted as anonymous; enabled, a block is required and the token is
    /// compared in constant time.
    pub fn authenticate(&self, auth: Option<&Auth>) -> bool {
        if !self.enabled {
            return true;
        }
        let Some(auth) = auth else {
            return false;
        };
        let Some(user) = self.users.get(&auth.user) else {
            return false;
        };
        user.token
            .as_bytes()
            .ct_eq(auth.token.as_bytes())
            .into()
    }

    /// Check whether `user` holds `permission` for an object guarded by
    /// `rules`. An empty rule set is a permission-only check.
    pub fn can(&self, user: &str, permission: &str, rules: &AclRuleSet) -> bool {
        if !self.enabled {
            return true;
        }
        let Some(entry) = self.users.get(user) else {
            return false;
        };
        if !self.has_permission(entry, permission) {
            return false;
        }
        if rules.rules.is_empty() {
            return true;
        }

        let mut matches = false;
        for rule in &rules.rules {
            let perm_applies =
                rule.permissions.is_empty() || rule.permissions.iter().any(|p| p == permission);
            if !perm_applies {
                continue;
            }
            if !self.subject_matches(user, entry, &rule.subjects) {
                continue;
            }
            if rule.deny {
                return false;
            }
            matches = true;
        }
        matches
    }

    /// Effective roles: direct roles plus the roles of every group the user
    /// is in.
    fn has_permission(&self, entry: &UserEntry, permission: &str) -> bool {
        let direct = entry.roles.iter();
        let via_groups = entry
            .groups
            .iter()
            .filter_map(|g| self.groups.get(g))
            .flat_map(|g| g.roles.iter());

        for role_name in direct.chain(via_groups) {
            if let Some(granted) = self.roles.get(role_name) {
                if granted.iter().any(|p| p == permission) {
                    return true;
                }
            }
        }
        false
    }

    /// A rule subject matches the user by name or by one of the user's
    /// groups. Empty subject lists never match.
    fn subject_matches(&self, user: &str, entry: &UserEntry, subjects: &[String]) -> bool {
        subjects
            .iter()
            .any(|s| s == user || entry.groups.iter().any(|g| g == s))
    }
}

#[cfg(test)]
mod tests;
