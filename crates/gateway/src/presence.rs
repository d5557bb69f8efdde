//! Presence registry: live-connection tracking keyed by principal.
//!
//! A principal is online iff it owns at least one live connection. Counts
//! are derived from per-principal connection-id sets, so a duplicate
//! connect or a repeated disconnect can never skew them. Entries are
//! removed when the last connection goes away, so the map only ever holds
//! currently-online principals.

use common::types::{PrincipalId, Role};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Unique connection identifier.
pub type ConnectionId = Uuid;

/// Presence transition produced by connect/disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    /// First connection for the principal arrived.
    Online(PrincipalId),
    /// Last connection for the principal went away.
    Offline(PrincipalId),
}

#[derive(Debug)]
struct PresenceEntry {
    role: Role,
    connections: HashSet<ConnectionId>,
}

/// Tracks which principals currently hold live connections.
///
/// Mutations for one principal go through that key's entry guard, so they
/// serialize per principal while distinct principals proceed in parallel.
pub struct PresenceRegistry {
    entries: DashMap<PrincipalId, PresenceEntry>,
}

impl PresenceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a connection for a principal.
    ///
    /// Returns `Some(Online)` when the principal transitions from zero to
    /// one live connection, `None` otherwise.
    pub fn connect(
        &self,
        principal_id: &str,
        role: Role,
        connection_id: ConnectionId,
    ) -> Option<PresenceChange> {
        match self.entries.entry(principal_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().connections.insert(connection_id);
                None
            }
            Entry::Vacant(vacant) => {
                let mut connections = HashSet::new();
                connections.insert(connection_id);
                vacant.insert(PresenceEntry { role, connections });
                debug!("Principal {} went online", principal_id);
                Some(PresenceChange::Online(principal_id.to_string()))
            }
        }
    }

    /// Remove a connection for a principal.
    ///
    /// Disconnecting an unknown connection id is a no-op: teardown may run
    /// twice (network blip plus explicit close). Returns `Some(Offline)`
    /// when the principal's last connection went away.
    pub fn disconnect(
        &self,
        principal_id: &str,
        connection_id: &ConnectionId,
    ) -> Option<PresenceChange> {
        match self.entries.entry(principal_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get_mut().connections.remove(connection_id) {
                    return None;
                }
                if occupied.get().connections.is_empty() {
                    occupied.remove();
                    debug!("Principal {} went offline", principal_id);
                    Some(PresenceChange::Offline(principal_id.to_string()))
                } else {
                    None
                }
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Whether the principal currently owns at least one live connection.
    pub fn is_online(&self, principal_id: &str) -> bool {
        self.entries.contains_key(principal_id)
    }

    /// All currently-online principal ids.
    pub fn list_online(&self) -> Vec<PrincipalId> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Online principals visible on the public presence channel. Guests
    /// only ever see the online-seller set.
    pub fn online_freelancers(&self) -> Vec<PrincipalId> {
        self.entries
            .iter()
            .filter(|e| e.value().role == Role::Freelancer)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Number of online principals.
    pub fn online_count(&self) -> usize {
        self.entries.len()
    }

    /// Total live connections across all principals.
    pub fn connection_count(&self) -> usize {
        self.entries.iter().map(|e| e.value().connections.len()).sum()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> ConnectionId {
        Uuid::new_v4()
    }

    #[test]
    fn test_online_iff_connection_count_positive() {
        let registry = PresenceRegistry::new();
        assert!(!registry.is_online("u1"));

        let a = conn();
        let change = registry.connect("u1", Role::Freelancer, a);
        assert_eq!(change, Some(PresenceChange::Online("u1".to_string())));
        assert!(registry.is_online("u1"));
        assert_eq!(registry.connection_count(), 1);

        let change = registry.disconnect("u1", &a);
        assert_eq!(change, Some(PresenceChange::Offline("u1".to_string())));
        assert!(!registry.is_online("u1"));
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.online_count(), 0);
    }

    #[test]
    fn test_two_tabs_offline_fires_once() {
        let registry = PresenceRegistry::new();
        let tab_a = conn();
        let tab_b = conn();

        assert!(registry.connect("u1", Role::Freelancer, tab_a).is_some());
        assert!(registry.connect("u1", Role::Freelancer, tab_b).is_none());
        assert!(registry.is_online("u1"));

        assert!(registry.disconnect("u1", &tab_a).is_none());
        assert!(registry.is_online("u1"));

        let change = registry.disconnect("u1", &tab_b);
        assert_eq!(change, Some(PresenceChange::Offline("u1".to_string())));
        assert!(!registry.is_online("u1"));
    }

    #[test]
    fn test_disconnect_unknown_connection_is_noop() {
        let registry = PresenceRegistry::new();
        let a = conn();
        registry.connect("u1", Role::Client, a);

        // Unknown id, then double-disconnect of a real one.
        assert!(registry.disconnect("u1", &conn()).is_none());
        assert!(registry.is_online("u1"));

        assert!(registry.disconnect("u1", &a).is_some());
        assert!(registry.disconnect("u1", &a).is_none());
        assert!(registry.disconnect("u2", &a).is_none());
        assert_eq!(registry.online_count(), 0);
    }

    #[test]
    fn test_public_snapshot_filters_by_role() {
        let registry = PresenceRegistry::new();
        registry.connect("seller", Role::Freelancer, conn());
        registry.connect("buyer", Role::Client, conn());
        registry.connect("ops", Role::Admin, conn());

        let mut online = registry.list_online();
        online.sort();
        assert_eq!(online, vec!["buyer", "ops", "seller"]);

        assert_eq!(registry.online_freelancers(), vec!["seller"]);
    }

    #[test]
    fn test_reconnect_after_offline_fires_online_again() {
        let registry = PresenceRegistry::new();
        let a = conn();
        assert!(registry.connect("u1", Role::Freelancer, a).is_some());
        assert!(registry.disconnect("u1", &a).is_some());

        let b = conn();
        assert_eq!(
            registry.connect("u1", Role::Freelancer, b),
            Some(PresenceChange::Online("u1".to_string()))
        );
    }
}
