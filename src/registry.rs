//! Admission-controlled registry of live client sessions.
//!
//! The central state machine: per client id, absent -> connected -> absent,
//! with idempotent reconnect, theft detection against a live client id and a
//! runtime-mutable connection limit. One coarse lock covers the
//! existence check, the capacity check and the insert, so concurrent
//! connects and disconnects for the same client id cannot interleave and
//! the limit cannot be exceeded under concurrent admission.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::auth::AuthChain;
use crate::client::ClientIdentity;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::tracer::MethodTracer;

/// Collaborator contract: turn an authenticated identity into an opaque
/// session object, and tear it down again. `create_session` failures surface
/// to the `connect` caller with their message intact; `close_session` is
/// best-effort and its failures are logged by the registry, never
/// propagated to the disconnect caller.
pub trait SessionHooks<T>: Send + Sync {
    fn create_session(&self, client: &ClientIdentity) -> anyhow::Result<T>;

    fn close_session(&self, _session: &T) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Cheap-clone handle over one live session: the effective (possibly
/// rewritten) identity, the opaque connection object and the tracer every
/// call on this connection records through. Two handles refer to the same
/// session iff they share the connection allocation.
#[derive(Debug)]
pub struct SessionHandle<T> {
    client: ClientIdentity,
    connection: Arc<T>,
    created_at: DateTime<Utc>,
    tracer: MethodTracer,
}

impl<T> Clone for SessionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            connection: Arc::clone(&self.connection),
            created_at: self.created_at,
            tracer: self.tracer.clone(),
        }
    }
}

impl<T> SessionHandle<T> {
    /// The identity that passed the auth chain; its user may differ from the
    /// one in the original request when a login extension rewrote it.
    pub fn client(&self) -> &ClientIdentity {
        &self.client
    }

    pub fn connection(&self) -> &Arc<T> {
        &self.connection
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn tracer(&self) -> &MethodTracer {
        &self.tracer
    }

    pub fn same_session(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.connection, &other.connection)
    }
}

pub struct ConnectionRegistry<T> {
    connections: Mutex<HashMap<Uuid, SessionHandle<T>>>,
    auth: AuthChain,
    hooks: Arc<dyn SessionHooks<T>>,
    connection_limit: AtomicI32,
    trace_buffer_size: usize,
    trace_default_enabled: bool,
    shutting_down: AtomicBool,
}

impl<T> ConnectionRegistry<T> {
    pub fn new(config: &ServerConfig, auth: AuthChain, hooks: Arc<dyn SessionHooks<T>>) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            auth,
            hooks,
            connection_limit: AtomicI32::new(config.connection_limit),
            trace_buffer_size: config.trace_buffer_size,
            trace_default_enabled: config.trace_default_enabled,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// The auth chain this registry consults; extension registration happens
    /// through this handle, normally during the startup phase before traffic
    /// begins.
    pub fn auth(&self) -> &AuthChain {
        &self.auth
    }

    /// Admit a connection attempt. Atomic from the caller's point of view:
    /// either the same live session is returned (reconnect), or a new
    /// session exists when this returns Ok, or nothing changed.
    pub fn connect(&self, request: &ClientIdentity) -> ServerResult<SessionHandle<T>> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ServerError::login("server is shutting down"));
        }
        if request.user.username.is_empty() {
            return Err(ServerError::configuration("connection request without a username"));
        }
        if request.client_type_id.is_empty() {
            return Err(ServerError::configuration("connection request without a client type"));
        }
        let mut connections = self.connections.lock();
        // Re-checked under the lock: a connect racing shutdown() must not
        // insert a session after the drain, where close_all would miss it.
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ServerError::login("server is shutting down"));
        }
        if let Some(existing) = connections.get(&request.client_id) {
            if existing.client.user == request.user {
                debug!(client = %request, "active session exists, idempotent reconnect");
                return Ok(existing.clone());
            }
            // A different user against a live client id is an impersonation
            // attempt; the existing session stays untouched.
            return Err(ServerError::authentication("wrong username or password"));
        }
        let limit = self.connection_limit.load(Ordering::SeqCst);
        if limit > 0 && connections.len() >= limit as usize {
            return Err(ServerError::not_available());
        }
        self.auth.validate(request)?;
        let effective = self.auth.login(request.clone())?;
        let connection = self
            .hooks
            .create_session(&effective)
            .map_err(|e| ServerError::session(format!("{e:#}")))?;
        let handle = SessionHandle {
            client: effective,
            connection: Arc::new(connection),
            created_at: Utc::now(),
            tracer: MethodTracer::new(self.trace_buffer_size, self.trace_default_enabled),
        };
        // Keyed by the original client id; the rewritten identity is what
        // gets remembered as the current user for the next attempt.
        connections.insert(request.client_id, handle.clone());
        info!(client = %handle.client, connections = connections.len(), "client connected");
        Ok(handle)
    }

    /// Remove the session, tear it down (best-effort) and notify the auth
    /// chain in reverse order. Unknown client ids are a no-op, supporting
    /// best-effort cleanup from callers that do not track connection state.
    pub fn disconnect(&self, client_id: Uuid) {
        let removed = self.connections.lock().remove(&client_id);
        if let Some(session) = removed {
            if let Err(e) = self.hooks.close_session(session.connection.as_ref()) {
                error!(client = %session.client, "error closing session: {e:#}");
            }
            self.auth.logout(&session.client);
            info!(client = %session.client, "client disconnected");
        }
    }

    pub fn disconnect_all(&self) {
        let ids: Vec<Uuid> = self.connections.lock().keys().copied().collect();
        for client_id in ids {
            self.disconnect(client_id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn connection(&self, client_id: Uuid) -> Option<SessionHandle<T>> {
        self.connections.lock().get(&client_id).cloned()
    }

    /// Snapshot of every connected identity; one lock acquisition, so the
    /// result is consistent at the instant of the call.
    pub fn clients(&self) -> Vec<ClientIdentity> {
        self.connections.lock().values().map(|s| s.client.clone()).collect()
    }

    pub fn clients_for_user(&self, username: &str) -> Vec<ClientIdentity> {
        self.connections
            .lock()
            .values()
            .filter(|s| s.client.user.username == username)
            .map(|s| s.client.clone())
            .collect()
    }

    pub fn clients_for_type(&self, client_type_id: &str) -> Vec<ClientIdentity> {
        self.connections
            .lock()
            .values()
            .filter(|s| s.client.client_type_id == client_type_id)
            .map(|s| s.client.clone())
            .collect()
    }

    /// Limit <= 0 means unlimited. Changing the limit never evicts live
    /// sessions; it only affects future admission decisions.
    pub fn connection_limit(&self) -> i32 {
        self.connection_limit.load(Ordering::SeqCst)
    }

    pub fn set_connection_limit(&self, limit: i32) {
        info!(limit, "connection limit changed");
        self.connection_limit.store(limit, Ordering::SeqCst);
    }

    /// Disconnect every live session, then close the auth chain extensions.
    /// Idempotent: the second call finds the flag set and returns.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(connections = self.connection_count(), "server shutting down");
        self.disconnect_all();
        self.auth.close_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}
