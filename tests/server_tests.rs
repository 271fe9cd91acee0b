//! End-to-end scenarios across the registry, auth chain, tracer and broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use berth::{
    AuthChain, ClientIdentity, ConnectionRegistry, ConnectionValidator, CredentialBroker,
    LoginExtension, ServerAdmin, ServerConfig, SessionHooks, User,
};
use uuid::Uuid;

// Shared subscriber init so scenario tests emit the server's lifecycle
// logs under RUST_LOG; repeat calls are fine, only the first one wins.
fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

#[derive(Debug)]
struct TestConnection {
    client: ClientIdentity,
}

struct TestHooks {
    created: AtomicUsize,
    closed: AtomicUsize,
}

impl TestHooks {
    fn new() -> Arc<Self> {
        Arc::new(Self { created: AtomicUsize::new(0), closed: AtomicUsize::new(0) })
    }
}

impl SessionHooks<TestConnection> for TestHooks {
    fn create_session(&self, client: &ClientIdentity) -> anyhow::Result<TestConnection> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(TestConnection { client: client.clone() })
    }

    fn close_session(&self, _session: &TestConnection) -> anyhow::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Shared login extension counting logins/logouts/closes.
struct CountingLogin {
    logins: AtomicUsize,
    logouts: AtomicUsize,
    closes: AtomicUsize,
}

impl CountingLogin {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            logins: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }
}

impl LoginExtension for CountingLogin {
    fn login(&self, client: ClientIdentity) -> anyhow::Result<ClientIdentity> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(client)
    }

    fn logout(&self, _client: &ClientIdentity) -> anyhow::Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Maps every application user onto one shared backing-service user.
struct BackingServiceLogin;

impl LoginExtension for BackingServiceLogin {
    fn login(&self, client: ClientIdentity) -> anyhow::Result<ClientIdentity> {
        Ok(client.with_user(User::new("service", "service-secret")))
    }
}

/// Rejects one client type unconditionally.
struct NoBatchValidator;

impl ConnectionValidator for NoBatchValidator {
    fn validate(&self, client: &ClientIdentity) -> anyhow::Result<()> {
        if client.client_type_id == "batch" {
            anyhow::bail!("batch clients are not accepted");
        }
        Ok(())
    }
}

fn request(username: &str, client_type: &str) -> ClientIdentity {
    ClientIdentity::new(User::new(username, "secret"), Uuid::new_v4(), client_type)
}

fn new_registry(
    limit: i32,
    auth: AuthChain,
) -> (Arc<ConnectionRegistry<TestConnection>>, Arc<TestHooks>) {
    let hooks = TestHooks::new();
    let config = ServerConfig { connection_limit: limit, ..ServerConfig::default() };
    (Arc::new(ConnectionRegistry::new(&config, auth, hooks.clone())), hooks)
}

#[test]
fn shared_validator_rejects_client_type_regardless_of_user() {
    let auth = AuthChain::new();
    auth.register_shared_validator(Arc::new(NoBatchValidator));
    let (registry, hooks) = new_registry(-1, auth);

    for username in ["scott", "john", "root"] {
        let err = registry.connect(&request(username, "batch")).unwrap_err();
        assert_eq!(err.kind_str(), "validation");
    }
    assert_eq!(hooks.created.load(Ordering::SeqCst), 0);

    // Other client types pass the same chain.
    registry.connect(&request("scott", "app")).unwrap();
    assert_eq!(registry.connection_count(), 1);
}

#[test]
fn login_rewrite_is_stored_but_admission_stays_keyed_on_the_request() {
    let auth = AuthChain::new();
    auth.register_shared_login(Arc::new(BackingServiceLogin));
    let (registry, _) = new_registry(-1, auth);

    let req = request("scott", "app");
    let session = registry.connect(&req).unwrap();
    // The session factory saw the rewritten identity and the session
    // remembers it, while the map key stays the request's client id.
    assert_eq!(session.client().user.username, "service");
    assert_eq!(session.connection().client.user.username, "service");
    assert_eq!(session.client().client_id, req.client_id);
    assert!(registry.connection(req.client_id).is_some());
}

#[test]
fn reconnect_after_rewrite_compares_against_the_stored_user() {
    // With a rewrite in place the stored user differs from the requesting
    // user, so a verbatim reconnect attempt is rejected as theft. This is
    // the documented consequence of keying theft detection on the stored
    // session's effective user.
    let auth = AuthChain::new();
    auth.register_login("app", Arc::new(BackingServiceLogin)).unwrap();
    let (registry, _) = new_registry(-1, auth);

    let req = request("scott", "app");
    registry.connect(&req).unwrap();
    let err = registry.connect(&req).unwrap_err();
    assert_eq!(err.kind_str(), "authentication");

    // Reconnecting as the effective user succeeds.
    let effective = ClientIdentity::new(User::new("service", "service-secret"), req.client_id, "app");
    registry.connect(&effective).unwrap();
    assert_eq!(registry.connection_count(), 1);
}

/// Typed extension whose logout always fails; the chain must log and move on.
struct FlakyLogout {
    logouts: AtomicUsize,
}

impl LoginExtension for FlakyLogout {
    fn login(&self, client: ClientIdentity) -> anyhow::Result<ClientIdentity> {
        Ok(client)
    }

    fn logout(&self, _client: &ClientIdentity) -> anyhow::Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("directory service unavailable")
    }
}

struct FailingCloseHooks;

impl SessionHooks<TestConnection> for FailingCloseHooks {
    fn create_session(&self, client: &ClientIdentity) -> anyhow::Result<TestConnection> {
        Ok(TestConnection { client: client.clone() })
    }

    fn close_session(&self, _session: &TestConnection) -> anyhow::Result<()> {
        anyhow::bail!("backing connection already gone")
    }
}

#[test]
fn failing_logout_and_teardown_never_block_disconnect() {
    init_logging();
    let auth = AuthChain::new();
    let flaky = Arc::new(FlakyLogout { logouts: AtomicUsize::new(0) });
    let healthy = CountingLogin::new();
    // The typed extension fails first; the shared one must still be notified.
    auth.register_login("app", flaky.clone()).unwrap();
    auth.register_shared_login(healthy.clone());
    let config = ServerConfig::default();
    let registry: Arc<ConnectionRegistry<TestConnection>> =
        Arc::new(ConnectionRegistry::new(&config, auth, Arc::new(FailingCloseHooks)));

    let req = request("scott", "app");
    registry.connect(&req).unwrap();
    registry.disconnect(req.client_id);

    assert_eq!(registry.connection_count(), 0, "failed teardown blocked removal");
    assert_eq!(flaky.logouts.load(Ordering::SeqCst), 1);
    assert_eq!(healthy.logouts.load(Ordering::SeqCst), 1, "failure blocked the next extension");

    // Shutdown after the fact stays clean as well.
    registry.shutdown();
    assert_eq!(registry.connection_count(), 0);
}

#[test]
fn shutdown_scenario_three_sessions_two_shared_extensions() {
    init_logging();
    let auth = AuthChain::new();
    let ext_a = CountingLogin::new();
    let ext_b = CountingLogin::new();
    auth.register_shared_login(ext_a.clone());
    auth.register_shared_login(ext_b.clone());
    let (registry, hooks) = new_registry(-1, auth);

    for username in ["a", "b", "c"] {
        registry.connect(&request(username, "app")).unwrap();
    }
    assert_eq!(registry.connection_count(), 3);
    assert_eq!(ext_a.logins.load(Ordering::SeqCst), 3);

    registry.shutdown();
    assert_eq!(registry.connection_count(), 0);
    assert_eq!(hooks.closed.load(Ordering::SeqCst), 3);
    assert_eq!(ext_a.logouts.load(Ordering::SeqCst), 3);
    assert_eq!(ext_b.logouts.load(Ordering::SeqCst), 3);
    assert_eq!(ext_a.closes.load(Ordering::SeqCst), 1);
    assert_eq!(ext_b.closes.load(Ordering::SeqCst), 1);

    registry.shutdown();
    assert_eq!(ext_a.closes.load(Ordering::SeqCst), 1);
    assert_eq!(ext_b.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn admin_surface_over_a_live_registry() {
    let (registry, _) = new_registry(10, AuthChain::new());
    let admin = ServerAdmin::new(registry.clone());

    let req = request("scott", "app");
    registry.connect(&req).unwrap();
    registry.connect(&request("john", "report")).unwrap();

    assert_eq!(admin.connection_count(), 2);
    assert_eq!(admin.connection_limit(), 10);
    admin.set_connection_limit(2);
    assert_eq!(registry.connection_limit(), 2);

    assert!(admin.users().contains("scott"));
    assert!(admin.client_types().contains("report"));

    // Trace a call through the session handle the transport would hold.
    assert!(admin.set_tracing(req.client_id, true));
    let session = registry.connection(req.client_id).unwrap();
    session.tracer().enter("select", "from=album");
    session.tracer().enter("fetch", "");
    session.tracer().exit("fetch", None).unwrap();
    session.tracer().exit("select", None).unwrap();

    let log = admin.client_log(req.client_id).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].children.len(), 1);

    admin.shutdown();
    assert_eq!(admin.connection_count(), 0);
}

#[test]
fn credential_handoff_between_two_components() {
    init_logging();
    // Component one: a connected, verified client asks for a token.
    let (registry, _) = new_registry(-1, AuthChain::new());
    let broker = CredentialBroker::with_sweeper(Duration::from_millis(50));
    let req = request("scott", "app");
    let session = registry.connect(&req).unwrap();
    let token = broker.issue(session.client().user.clone(), Duration::from_secs(5));

    // The token travels out-of-band inside a generic argument vector.
    let argv = vec!["--open".to_string(), format!("authenticationToken:{token}")];
    let found = CredentialBroker::extract_token(argv.iter().map(String::as_str)).unwrap();

    // Component two: redeems once, and only once.
    let user = broker.redeem(&found).unwrap();
    berth::tprintln!("redeemed handoff token for {}", user.username);
    assert_eq!(user.username, "scott");
    assert_eq!(user.secret(), "secret");
    assert!(broker.redeem(&found).is_none());

    broker.shutdown();
}

#[test]
fn duplicate_reconnect_racing_disconnect_settles_in_a_clean_state() {
    let (registry, _) = new_registry(-1, AuthChain::new());
    let req = Arc::new(request("scott", "app"));
    registry.connect(&req).unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let registry = registry.clone();
        let req = req.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..50 {
                let _ = registry.connect(&req);
                registry.disconnect(req.client_id);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    // Whatever interleaving happened, the registry holds either zero or one
    // session for the client id and a final disconnect empties it.
    assert!(registry.connection_count() <= 1);
    registry.disconnect(req.client_id);
    assert_eq!(registry.connection_count(), 0);
}
