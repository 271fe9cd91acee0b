//! Pluggable login/validation chain consulted during admission.
//!
//! Two registration scopes per capability: shared extensions apply to every
//! client type in registration order, typed extensions to exactly one
//! `client_type_id` (at most one each; a duplicate registration is a
//! configuration error at setup time, never a runtime admission failure).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::client::ClientIdentity;
use crate::error::{ServerError, ServerResult};

/// A login extension may veto an admission attempt or rewrite the identity
/// the session factory will see (e.g. mapping an application user onto a
/// shared backing-service user).
pub trait LoginExtension: Send + Sync {
    fn login(&self, client: ClientIdentity) -> anyhow::Result<ClientIdentity>;

    /// Best-effort notification on disconnect; a failure here never blocks
    /// the disconnect, it is logged and swallowed by the chain.
    fn logout(&self, _client: &ClientIdentity) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called exactly once at server shutdown, even when the same instance
    /// is registered under several scopes.
    fn close(&self) {}
}

/// A validator may veto an admission attempt but never mutates the identity.
pub trait ConnectionValidator: Send + Sync {
    fn validate(&self, client: &ClientIdentity) -> anyhow::Result<()>;

    fn close(&self) {}
}

#[derive(Default)]
struct ChainState {
    shared_logins: Vec<Arc<dyn LoginExtension>>,
    typed_logins: HashMap<String, Arc<dyn LoginExtension>>,
    shared_validators: Vec<Arc<dyn ConnectionValidator>>,
    typed_validators: HashMap<String, Arc<dyn ConnectionValidator>>,
    closed: bool,
}

/// Ordered, read-mostly extension registry. Registration is serialized
/// behind the internal lock so the duplicate check is race-free; lookups
/// during admission take the read side only.
#[derive(Default)]
pub struct AuthChain {
    state: RwLock<ChainState>,
}

impl AuthChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_shared_login(&self, extension: Arc<dyn LoginExtension>) {
        self.state.write().shared_logins.push(extension);
    }

    pub fn register_login(&self, client_type_id: &str, extension: Arc<dyn LoginExtension>) -> ServerResult<()> {
        let mut state = self.state.write();
        if state.typed_logins.contains_key(client_type_id) {
            return Err(ServerError::configuration(format!(
                "login extension already registered for client type '{client_type_id}'"
            )));
        }
        state.typed_logins.insert(client_type_id.to_string(), extension);
        Ok(())
    }

    pub fn register_shared_validator(&self, validator: Arc<dyn ConnectionValidator>) {
        self.state.write().shared_validators.push(validator);
    }

    pub fn register_validator(&self, client_type_id: &str, validator: Arc<dyn ConnectionValidator>) -> ServerResult<()> {
        let mut state = self.state.write();
        if state.typed_validators.contains_key(client_type_id) {
            return Err(ServerError::configuration(format!(
                "validator already registered for client type '{client_type_id}'"
            )));
        }
        state.typed_validators.insert(client_type_id.to_string(), validator);
        Ok(())
    }

    /// Run every shared validator in registration order, then the typed one.
    /// Any rejection is terminal.
    pub fn validate(&self, client: &ClientIdentity) -> ServerResult<()> {
        let state = self.state.read();
        for validator in &state.shared_validators {
            validator.validate(client).map_err(|e| ServerError::validation(format!("{e:#}")))?;
        }
        if let Some(validator) = state.typed_validators.get(&client.client_type_id) {
            validator.validate(client).map_err(|e| ServerError::validation(format!("{e:#}")))?;
        }
        Ok(())
    }

    /// Thread the identity through every shared login extension in order,
    /// then the typed one: each stage receives the identity produced by the
    /// previous stage. The typed extension is selected by the client type of
    /// the original request, not of a rewritten identity.
    pub fn login(&self, client: ClientIdentity) -> ServerResult<ClientIdentity> {
        let state = self.state.read();
        let type_id = client.client_type_id.clone();
        let mut current = client;
        for extension in &state.shared_logins {
            current = extension.login(current).map_err(|e| ServerError::login(format!("{e:#}")))?;
        }
        if let Some(extension) = state.typed_logins.get(&type_id) {
            current = extension.login(current).map_err(|e| ServerError::login(format!("{e:#}")))?;
        }
        Ok(current)
    }

    /// Best-effort logout notifications in reverse order: typed first, then
    /// shared extensions in reverse registration order.
    pub fn logout(&self, client: &ClientIdentity) {
        let state = self.state.read();
        if let Some(extension) = state.typed_logins.get(&client.client_type_id) {
            if let Err(e) = extension.logout(client) {
                warn!(client = %client, "typed login extension failed to log out: {e:#}");
            }
        }
        for extension in state.shared_logins.iter().rev() {
            if let Err(e) = extension.logout(client) {
                warn!(client = %client, "shared login extension failed to log out: {e:#}");
            }
        }
    }

    /// Close every distinct registered extension and validator exactly once.
    /// An instance registered both shared and typed is deduplicated by
    /// allocation identity. Idempotent: the second call is a no-op.
    pub fn close_all(&self) {
        let mut state = self.state.write();
        if state.closed {
            return;
        }
        state.closed = true;
        debug!("closing auth chain extensions");
        let mut seen: Vec<*const ()> = Vec::new();
        for extension in state.shared_logins.iter().chain(state.typed_logins.values()) {
            let ptr = Arc::as_ptr(extension).cast::<()>();
            if !seen.contains(&ptr) {
                seen.push(ptr);
                extension.close();
            }
        }
        let mut seen: Vec<*const ()> = Vec::new();
        for validator in state.shared_validators.iter().chain(state.typed_validators.values()) {
            let ptr = Arc::as_ptr(validator).cast::<()>();
            if !seen.contains(&ptr) {
                seen.push(ptr);
                validator.close();
            }
        }
    }
}
