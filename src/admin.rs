//! Operator-facing read/write surface over the connection registry.
//! Every read reflects one registry lock acquisition, so counts and
//! snapshots are consistent at the instant of the call and a session is
//! never observed mid-creation.

use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::client::ClientIdentity;
use crate::registry::ConnectionRegistry;
use crate::tracer::TraceEntry;

pub struct ServerAdmin<T> {
    registry: Arc<ConnectionRegistry<T>>,
}

impl<T> ServerAdmin<T> {
    pub fn new(registry: Arc<ConnectionRegistry<T>>) -> Self {
        Self { registry }
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    pub fn connection_limit(&self) -> i32 {
        self.registry.connection_limit()
    }

    pub fn set_connection_limit(&self, limit: i32) {
        self.registry.set_connection_limit(limit);
    }

    /// Distinct client types currently connected.
    pub fn client_types(&self) -> BTreeSet<String> {
        self.registry.clients().into_iter().map(|c| c.client_type_id).collect()
    }

    /// Distinct usernames currently connected (effective users, i.e. after
    /// any login-extension rewrite).
    pub fn users(&self) -> BTreeSet<String> {
        self.registry.clients().into_iter().map(|c| c.user.username).collect()
    }

    pub fn clients(&self) -> Vec<ClientIdentity> {
        self.registry.clients()
    }

    pub fn clients_for_user(&self, username: &str) -> Vec<ClientIdentity> {
        self.registry.clients_for_user(username)
    }

    pub fn clients_for_type(&self, client_type_id: &str) -> Vec<ClientIdentity> {
        self.registry.clients_for_type(client_type_id)
    }

    /// Copy of the client's call history; `None` for unknown client ids.
    pub fn client_log(&self, client_id: Uuid) -> Option<Vec<TraceEntry>> {
        self.registry.connection(client_id).map(|s| s.tracer().entries())
    }

    pub fn tracing_enabled(&self, client_id: Uuid) -> Option<bool> {
        self.registry.connection(client_id).map(|s| s.tracer().is_enabled())
    }

    /// Toggle call tracing for one client. Returns false for unknown client
    /// ids. Toggling clears the client's existing history.
    pub fn set_tracing(&self, client_id: Uuid, enabled: bool) -> bool {
        match self.registry.connection(client_id) {
            Some(session) => {
                session.tracer().set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    pub fn disconnect(&self, client_id: Uuid) {
        self.registry.disconnect(client_id);
    }

    pub fn disconnect_all(&self) {
        self.registry.disconnect_all();
    }

    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}
