//! Registry of open feed connections
//!
//! Single source of truth for what is currently open, keyed by identity.
//! Only the lifecycle router mutates it; introspection gets copies.

use crate::ws::connection::{Connection, ConnectionId, ConnectionState, EndpointId};
use std::collections::HashMap;
use tokio::time::Instant;

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Endpoint already registered: {0}")]
    DuplicateIdentity(EndpointId),
}

/// Read-only copy of a registered connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub connection_id: ConnectionId,
    pub endpoint: EndpointId,
    pub state: ConnectionState,
    pub is_alive: bool,
    pub reconnect_enabled: bool,
    /// Constituent channels of a multiplexed connection
    pub streams: Option<Vec<String>>,
    pub opened_at: Option<Instant>,
}

impl SubscriptionInfo {
    fn of(conn: &Connection) -> Self {
        Self {
            connection_id: conn.id(),
            endpoint: conn.endpoint().clone(),
            state: conn.state(),
            is_alive: conn.is_alive(),
            reconnect_enabled: conn.reconnect_enabled(),
            streams: conn.streams().map(<[String]>::to_vec),
            opened_at: conn.opened_at(),
        }
    }
}

/// Mapping from identity to live connection
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    connections: HashMap<EndpointId, Connection>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Register an open connection
    ///
    /// Hands the connection back if its identity is already taken.
    pub fn insert(&mut self, conn: Connection) -> Result<(), (RegistryError, Connection)> {
        if self.connections.contains_key(conn.endpoint()) {
            let err = RegistryError::DuplicateIdentity(conn.endpoint().clone());
            return Err((err, conn));
        }
        self.connections.insert(conn.endpoint().clone(), conn);
        Ok(())
    }

    /// Remove an entry. Removing a missing identity is a no-op.
    pub fn remove(&mut self, endpoint: &EndpointId) -> Option<Connection> {
        self.connections.remove(endpoint)
    }

    /// Remove an entry only if it is still the given instance
    pub fn remove_instance(
        &mut self,
        endpoint: &EndpointId,
        id: ConnectionId,
    ) -> Option<Connection> {
        match self.connections.get(endpoint) {
            Some(conn) if conn.id() == id => self.connections.remove(endpoint),
            _ => None,
        }
    }

    pub fn get(&self, endpoint: &EndpointId) -> Option<&Connection> {
        self.connections.get(endpoint)
    }

    pub fn get_mut(&mut self, endpoint: &EndpointId) -> Option<&mut Connection> {
        self.connections.get_mut(endpoint)
    }

    pub fn contains(&self, endpoint: &EndpointId) -> bool {
        self.connections.contains_key(endpoint)
    }

    /// Copy of every entry, safe to hold while the registry keeps changing
    pub fn snapshot(&self) -> HashMap<EndpointId, SubscriptionInfo> {
        self.connections
            .iter()
            .map(|(endpoint, conn)| (endpoint.clone(), SubscriptionInfo::of(conn)))
            .collect()
    }

    pub fn connections_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
