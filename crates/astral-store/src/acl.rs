//! Access-control list: `user → (table → permission bitset)`.
//!
//! The empty-string table key denotes a global, cross-table grant.

use std::collections::HashMap;

use astral_types::Permissions;

/// In-memory ACL store.
#[derive(Debug, Clone, Default)]
pub struct AccessControl {
    entries: HashMap<String, HashMap<String, Permissions>>,
}

impl AccessControl {
    /// Empty ACL.
    pub fn new() -> Self {
        Self::default()
    }

    /// OR the given bits into the user's entry for `table` (empty table
    /// means global).
    pub fn grant(&mut self, user: &str, perms: Permissions, table: &str) {
        let entry = self
            .entries
            .entry(user.to_owned())
            .or_default()
            .entry(table.to_owned())
            .or_insert(Permissions::empty());
        *entry |= perms;
    }

    /// AND-NOT the given bits out of the user's entry for `table`.
    pub fn revoke(&mut self, user: &str, perms: Permissions, table: &str) {
        let entry = self
            .entries
            .entry(user.to_owned())
            .or_default()
            .entry(table.to_owned())
            .or_insert(Permissions::empty());
        *entry &= !perms;
    }

    /// Whether the requested bits are covered by the user's table entry or
    /// by the global entry.
    pub fn has_permission(&self, user: &str, perms: Permissions, table: &str) -> bool {
        let Some(tables) = self.entries.get(user) else {
            return false;
        };
        let table_grant = tables.get(table).copied().unwrap_or(Permissions::empty());
        if table_grant.contains(perms) {
            return true;
        }
        let global = tables.get("").copied().unwrap_or(Permissions::empty());
        global.contains(perms)
    }

    /// Effective bitset for a user: the table entry if present, else the
    /// global entry, else empty.
    pub fn user_permissions(&self, user: &str, table: &str) -> Permissions {
        let Some(tables) = self.entries.get(user) else {
            return Permissions::empty();
        };
        if !table.is_empty() {
            if let Some(bits) = tables.get(table) {
                return *bits;
            }
        }
        tables.get("").copied().unwrap_or(Permissions::empty())
    }
}
