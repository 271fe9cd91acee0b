//! Short-lived, single-use credential tokens for out-of-band sign-on handoff.
//!
//! One component hands an already-verified user to another process via an
//! opaque token instead of re-transmitting credentials. A token is consumed
//! on first successful redemption and unredeemable after its TTL; a
//! background sweeper evicts expired, never-redeemed tokens so the store
//! stays bounded.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use base64::Engine;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::client::User;
use crate::config::ServerConfig;

/// Prefix marking a token smuggled through a generic argument vector, e.g.
/// a command-line style handoff: `authenticationToken:xxxx`.
pub const TOKEN_PREFIX: &str = "authenticationToken:";

struct TokenEntry {
    user: User,
    issued_at: Instant,
    ttl: Duration,
}

impl TokenEntry {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.issued_at) >= self.ttl
    }
}

struct BrokerShared {
    tokens: Mutex<HashMap<String, TokenEntry>>,
    stop: Mutex<bool>,
    stop_signal: Condvar,
}

impl BrokerShared {
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|_, entry| !entry.expired(now));
        before - tokens.len()
    }
}

/// Token store plus optional background sweeper thread. Issue, redeem and
/// sweep all go through one lock, so a concurrent redeem and sweep cannot
/// both claim the same token.
pub struct CredentialBroker {
    shared: Arc<BrokerShared>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    token_ttl: Duration,
}

// 256-bit random token, base64url without padding. A token must never be
// guessable, so a failing random source aborts instead of degrading.
fn generate_token() -> String {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).expect("secure random source unavailable");
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

impl CredentialBroker {
    /// A broker without a background sweeper; expired tokens are still
    /// unredeemable, they just linger until `sweep` is called.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BrokerShared {
                tokens: Mutex::new(HashMap::new()),
                stop: Mutex::new(false),
                stop_signal: Condvar::new(),
            }),
            sweeper: Mutex::new(None),
            token_ttl: ServerConfig::default().token_ttl,
        }
    }

    /// Broker wired from the server configuration: sweeper on the
    /// configured interval, `config.token_ttl` as the default validity
    /// used by [`CredentialBroker::issue_default`].
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut broker = Self::with_sweeper(config.sweep_interval);
        broker.token_ttl = config.token_ttl;
        broker
    }

    /// A broker with a sweeper thread removing expired entries every
    /// `interval`. The thread stops promptly on `shutdown` or drop.
    pub fn with_sweeper(interval: Duration) -> Self {
        let broker = Self::new();
        let shared = broker.shared.clone();
        let handle = std::thread::Builder::new()
            .name("berth-credential-sweeper".into())
            .spawn(move || loop {
                {
                    let mut stop = shared.stop.lock();
                    if *stop {
                        break;
                    }
                    shared.stop_signal.wait_for(&mut stop, interval);
                    if *stop {
                        break;
                    }
                }
                let removed = shared.sweep();
                if removed > 0 {
                    debug!(removed, "swept expired credential tokens");
                }
            })
            .expect("spawn credential sweeper thread");
        *broker.sweeper.lock() = Some(handle);
        broker
    }

    /// Issue a token with the broker's default validity.
    pub fn issue_default(&self, user: User) -> String {
        self.issue(user, self.token_ttl)
    }

    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    /// Store the user under a fresh unguessable token valid for `ttl`.
    pub fn issue(&self, user: User, ttl: Duration) -> String {
        let token = generate_token();
        let entry = TokenEntry { user, issued_at: Instant::now(), ttl };
        info!(username = %entry.user, ttl_ms = ttl.as_millis() as u64, "credential token issued");
        self.shared.tokens.lock().insert(token.clone(), entry);
        token
    }

    /// Atomically remove and return the user iff the token exists and has
    /// not expired. Missing and expired are indistinguishable to the caller;
    /// an expired entry is dropped on the way out.
    pub fn redeem(&self, token: &str) -> Option<User> {
        let mut tokens = self.shared.tokens.lock();
        match tokens.remove(token) {
            Some(entry) if !entry.expired(Instant::now()) => Some(entry.user),
            _ => None,
        }
    }

    /// Scan an argument vector for a `authenticationToken:`-prefixed value
    /// and return the payload after the prefix.
    pub fn extract_token<'a, I>(args: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        args.into_iter().find_map(|arg| arg.strip_prefix(TOKEN_PREFIX).map(str::to_string))
    }

    /// Remove all expired entries, independent of redemption. Returns the
    /// number removed.
    pub fn sweep(&self) -> usize {
        self.shared.sweep()
    }

    pub fn len(&self) -> usize {
        self.shared.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the sweeper thread, if any. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut stop = self.shared.stop.lock();
            *stop = true;
            self.shared.stop_signal.notify_all();
        }
        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Default for CredentialBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CredentialBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
