//! berth: the connection server core for synchronous RPC transports.
//!
//! Accepts authenticated client connections, enforces a runtime-mutable
//! connection limit, runs a pluggable login/validation chain, tracks nested
//! per-connection call history and exchanges short-lived single-use
//! credential tokens for out-of-band sign-on handoff. What the session
//! object behind a connection actually does is the collaborator's business:
//! the registry only creates it via [`registry::SessionHooks`] and tears it
//! down again.

pub mod admin;
pub mod auth;
pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod tracer;

pub use admin::ServerAdmin;
pub use auth::{AuthChain, ConnectionValidator, LoginExtension};
pub use broker::CredentialBroker;
pub use client::{ClientIdentity, User};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use registry::{ConnectionRegistry, SessionHandle, SessionHooks};
pub use tracer::{MethodTracer, TraceEntry};

// Test-only printing helper: expands to tprintln! during tests and is absent otherwise.
// Usage in tests: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In non-test builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}
