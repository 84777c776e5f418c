use crate::error::ReconcileError;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Role Grants
// ============================================================================

/// A `(role, database)` pair authorizing a user within one database.
///
/// Ordered by database first, then role, which is the canonical order used
/// whenever a role set is rendered into a command or persisted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleGrant {
    #[serde(rename = "db")]
    pub database: String,
    pub role: String,
}

impl RoleGrant {
    pub fn new(role: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            role: role.into(),
        }
    }
}

impl fmt::Display for RoleGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.role, self.database)
    }
}

/// Role grants are unordered; duplicates collapse.
pub type RoleSet = BTreeSet<RoleGrant>;

// ============================================================================
// Keys
// ============================================================================

/// Natural key of a user: the username plus its authentication database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserKey {
    pub user: String,
    pub database: String,
}

impl UserKey {
    pub fn new(user: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            database: database.into(),
        }
    }

    /// The `"<database>.<user>"` token accepted by import.
    pub fn import_id(&self) -> String {
        format!("{}.{}", self.database, self.user)
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" in database \"{}\"", self.user, self.database)
    }
}

/// Key parsed from an import token of the form `"<database>.<user>"`.
///
/// Only the first separator is consumed, so `"a.b.c"` names user `"b.c"` in
/// database `"a"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportKey {
    pub database: String,
    pub user: String,
}

impl FromStr for ImportKey {
    type Err = ReconcileError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.split_once('.') {
            Some((database, user)) if !database.is_empty() && !user.is_empty() => Ok(Self {
                database: database.to_string(),
                user: user.to_string(),
            }),
            _ => Err(ReconcileError::MalformedImportId(token.to_string())),
        }
    }
}

impl From<ImportKey> for UserKey {
    fn from(key: ImportKey) -> Self {
        Self {
            user: key.user,
            database: key.database,
        }
    }
}

// ============================================================================
// Declared State
// ============================================================================

/// Desired state of a user as declared by the caller.
///
/// The password is write-only: it is sent on create and update, never read
/// back, and never printed by `Debug`.
#[derive(Debug, Deserialize)]
pub struct UserSpec {
    pub user: String,
    pub password: Secret<String>,
    #[serde(rename = "db")]
    pub database: String,
    #[serde(default)]
    pub roles: RoleSet,
}

impl UserSpec {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
        roles: impl IntoIterator<Item = RoleGrant>,
    ) -> Self {
        Self {
            user: user.into(),
            password: Secret::new(password.into()),
            database: database.into(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn key(&self) -> UserKey {
        UserKey::new(self.user.clone(), self.database.clone())
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

// ============================================================================
// Observed State
// ============================================================================

/// State of a user as last observed on the server.
///
/// Only ever built from a successful `usersInfo` read-back; `id` is the
/// server's identifier and is never generated locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledUser {
    pub id: String,
    pub user: String,
    #[serde(rename = "db")]
    pub database: String,
    pub roles: RoleSet,
    pub last_reconciled_at: DateTime<Utc>,
}

impl ReconciledUser {
    pub fn key(&self) -> UserKey {
        UserKey::new(self.user.clone(), self.database.clone())
    }

    /// Role differences between this observed state and `spec`, or `None`
    /// when the server already matches the declaration.
    ///
    /// Passwords cannot be compared since the server never returns them.
    pub fn drift_from(&self, spec: &UserSpec) -> Option<Drift> {
        let drift = Drift {
            missing: spec.roles.difference(&self.roles).cloned().collect(),
            unexpected: self.roles.difference(&spec.roles).cloned().collect(),
        };

        if drift.is_empty() { None } else { Some(drift) }
    }
}

/// Role grants that differ between declared and observed state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Drift {
    /// Declared but absent on the server.
    pub missing: RoleSet,
    /// Present on the server but not declared.
    pub unexpected: RoleSet,
}

impl Drift {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |set: &RoleSet| {
            set.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "missing [{}], unexpected [{}]",
            render(&self.missing),
            render(&self.unexpected)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed(roles: impl IntoIterator<Item = RoleGrant>) -> ReconciledUser {
        ReconciledUser {
            id: "7f1c2a9e-5b1d-4f4e-9d7a-0c8e6b2f3a10".to_string(),
            user: "alice".to_string(),
            database: "test".to_string(),
            roles: roles.into_iter().collect(),
            last_reconciled_at: Utc::now(),
        }
    }

    #[test]
    fn test_import_key_splits_on_first_separator() {
        let key: ImportKey = "test.alice".parse().expect("valid token");
        assert_eq!(key.database, "test");
        assert_eq!(key.user, "alice");

        let key: ImportKey = "a.b.c".parse().expect("valid token");
        assert_eq!(key.database, "a");
        assert_eq!(key.user, "b.c");
    }

    #[test]
    fn test_import_key_rejects_malformed_tokens() {
        for token in ["test", "", ".alice", "test.", "."] {
            let err = token.parse::<ImportKey>().unwrap_err();
            assert!(
                matches!(err, ReconcileError::MalformedImportId(ref t) if t == token),
                "token {:?} gave {:?}",
                token,
                err
            );
        }
    }

    #[test]
    fn test_user_key_import_id_round_trips() {
        let key = UserKey::new("b.c", "a");
        let parsed: ImportKey = key.import_id().parse().expect("valid token");
        assert_eq!(UserKey::from(parsed), key);
    }

    #[test]
    fn test_role_set_ignores_order_and_duplicates() {
        let a = UserSpec::new(
            "alice",
            "pw",
            "test",
            [RoleGrant::new("read", "a"), RoleGrant::new("readWrite", "b")],
        );
        let b = UserSpec::new(
            "alice",
            "pw",
            "test",
            [
                RoleGrant::new("readWrite", "b"),
                RoleGrant::new("read", "a"),
                RoleGrant::new("read", "a"),
            ],
        );
        assert_eq!(a.roles, b.roles);
        assert_eq!(a.roles.len(), 2);
    }

    #[test]
    fn test_user_spec_debug_redacts_password() {
        let spec = UserSpec::new("alice", "hunter2", "test", []);
        let rendered = format!("{:?}", spec);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(spec.password(), "hunter2");
    }

    #[test]
    fn test_user_spec_deserializes_from_declaration() {
        let spec: UserSpec = serde_json::from_str(
            r#"{
                "user": "test_1",
                "db": "test",
                "password": "test1",
                "roles": [
                    { "db": "test_other", "role": "read" },
                    { "db": "test", "role": "readWrite" }
                ]
            }"#,
        )
        .expect("declaration should parse");

        assert_eq!(spec.key(), UserKey::new("test_1", "test"));
        let roles: Vec<_> = spec.roles.iter().cloned().collect();
        assert_eq!(
            roles,
            vec![
                RoleGrant::new("readWrite", "test"),
                RoleGrant::new("read", "test_other"),
            ]
        );
    }

    #[test]
    fn test_drift_none_when_roles_match() {
        let spec = UserSpec::new("alice", "pw", "test", [RoleGrant::new("read", "a")]);
        assert!(observed([RoleGrant::new("read", "a")]).drift_from(&spec).is_none());
    }

    #[test]
    fn test_drift_reports_both_directions() {
        let spec = UserSpec::new("alice", "pw", "test", [RoleGrant::new("readWrite", "b")]);
        let drift = observed([RoleGrant::new("read", "a")])
            .drift_from(&spec)
            .expect("roles differ");

        assert_eq!(drift.missing, RoleSet::from([RoleGrant::new("readWrite", "b")]));
        assert_eq!(drift.unexpected, RoleSet::from([RoleGrant::new("read", "a")]));
        assert_eq!(drift.to_string(), "missing [readWrite@b], unexpected [read@a]");
    }

    #[test]
    fn test_reconciled_user_serializes_roles_sorted() {
        let user = observed([RoleGrant::new("read", "z"), RoleGrant::new("dbAdmin", "a")]);
        let json = serde_json::to_value(&user).expect("serializable");
        assert_eq!(json["db"], "test");
        assert_eq!(json["roles"][0]["db"], "a");
        assert_eq!(json["roles"][1]["db"], "z");

        let back: ReconciledUser = serde_json::from_value(json).expect("deserializable");
        assert_eq!(back, user);
    }
}
