//! Immutable identity values describing a connection attempt.
//! A `ClientIdentity` is what the transport hands the registry; admission is
//! keyed on `client_id` alone while the embedded `User` is re-checked on
//! every attempt.

use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User credentials. Exact-match equality on both username and secret;
/// the secret never appears in `Debug`/`Display` output or serialized form.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct User {
    pub username: String,
    #[serde(skip)]
    secret: String,
}

impl User {
    pub fn new<S: Into<String>>(username: S, secret: S) -> Self {
        Self { username: username.into(), secret: secret.into() }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Parse the `username:secret` form used in config and env values.
    /// Everything after the first ':' is the secret; a missing ':' means an
    /// empty secret.
    pub fn parse(value: &str) -> Self {
        match value.split_once(':') {
            Some((name, secret)) => Self::new(name, secret),
            None => Self::new(value, ""),
        }
    }
}

impl Debug for User {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User").field("username", &self.username).field("secret", &"***").finish()
    }
}

impl Display for User {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.username)
    }
}

/// One connection attempt. `client_id` is globally unique and stable across
/// reconnects from the same logical client; `client_type_id` selects which
/// typed auth extensions apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub user: User,
    pub client_id: Uuid,
    pub client_type_id: String,
    pub client_version: Option<String>,
    pub framework_version: String,
    pub parameters: HashMap<String, String>,
}

impl ClientIdentity {
    pub fn new<S: Into<String>>(user: User, client_id: Uuid, client_type_id: S) -> Self {
        Self {
            user,
            client_id,
            client_type_id: client_type_id.into(),
            client_version: None,
            framework_version: env!("CARGO_PKG_VERSION").to_string(),
            parameters: HashMap::new(),
        }
    }

    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        self.client_version = Some(version.into());
        self
    }

    pub fn with_parameter<S: Into<String>>(mut self, key: S, value: S) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Same identity with the user swapped out; this is what login extensions
    /// use to map an application-level user onto a backing-service one.
    pub fn with_user(mut self, user: User) -> Self {
        self.user = user;
        self
    }
}

impl Display for ClientIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{} [{}]", self.user, self.client_type_id, self.client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_parse_splits_on_first_colon() {
        let u = User::parse("scott:tiger");
        assert_eq!(u.username, "scott");
        assert_eq!(u.secret(), "tiger");

        let u = User::parse("scott:ti:ger");
        assert_eq!(u.secret(), "ti:ger");

        let u = User::parse("scott");
        assert_eq!(u.username, "scott");
        assert_eq!(u.secret(), "");
    }

    #[test]
    fn user_equality_is_exact_on_both_fields() {
        assert_eq!(User::new("scott", "tiger"), User::new("scott", "tiger"));
        assert_ne!(User::new("scott", "tiger"), User::new("scott", "TIGER"));
        assert_ne!(User::new("scott", "tiger"), User::new("Scott", "tiger"));
    }

    #[test]
    fn secret_hidden_from_debug_and_serde() {
        let u = User::new("scott", "tiger");
        let dbg = format!("{u:?}");
        assert!(!dbg.contains("tiger"), "secret leaked: {dbg}");

        let json = serde_json::to_string(&u).unwrap();
        assert!(!json.contains("tiger"), "secret serialized: {json}");
    }

    #[test]
    fn identity_builder() {
        let id = ClientIdentity::new(User::new("scott", "tiger"), Uuid::new_v4(), "unit-test")
            .with_version("1.2.3")
            .with_parameter("host", "db1");
        assert_eq!(id.client_type_id, "unit-test");
        assert_eq!(id.client_version.as_deref(), Some("1.2.3"));
        assert_eq!(id.parameters.get("host").map(String::as_str), Some("db1"));
        assert_eq!(id.framework_version, env!("CARGO_PKG_VERSION"));
    }
}
