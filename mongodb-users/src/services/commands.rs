//! Builders for the user-administration commands.
//!
//! Pure functions: no I/O, no logging. Role arrays are always emitted in
//! [`RoleSet`] order so equal role sets produce byte-identical commands.

use crate::error::ReconcileError;
use crate::models::{RoleSet, UserSpec};
use mongodb::bson::{doc, Bson, Document};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    CreateUser,
    UpdateUser,
    DropUser,
    UsersInfo,
}

impl CommandKind {
    /// The command's name as the server knows it (the document's first key).
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::CreateUser => "createUser",
            CommandKind::UpdateUser => "updateUser",
            CommandKind::DropUser => "dropUser",
            CommandKind::UsersInfo => "usersInfo",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An admin command document ready to run against one database.
#[derive(Clone, PartialEq)]
pub struct Command {
    kind: CommandKind,
    body: Document,
}

impl Command {
    fn new(kind: CommandKind, body: Document) -> Self {
        Self { kind, body }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn document(&self) -> &Document {
        &self.body
    }

    pub fn into_document(self) -> Document {
        self.body
    }

    /// Copy of the body with the password masked, safe to log.
    pub fn redacted(&self) -> Document {
        let mut body = self.body.clone();
        if body.contains_key("pwd") {
            body.insert("pwd", "***");
        }
        body
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("kind", &self.kind)
            .field("body", &self.redacted())
            .finish()
    }
}

pub fn build_create(spec: &UserSpec) -> Result<Command, ReconcileError> {
    validate(spec)?;
    Ok(Command::new(
        CommandKind::CreateUser,
        doc! {
            "createUser": spec.user.as_str(),
            "pwd": spec.password(),
            "roles": roles_array(&spec.roles),
        },
    ))
}

/// Full replace of password and roles. There is no partial update: a role
/// left out of `spec` is revoked.
pub fn build_update(spec: &UserSpec) -> Result<Command, ReconcileError> {
    validate(spec)?;
    Ok(Command::new(
        CommandKind::UpdateUser,
        doc! {
            "updateUser": spec.user.as_str(),
            "pwd": spec.password(),
            "roles": roles_array(&spec.roles),
        },
    ))
}

pub fn build_drop(user: &str) -> Command {
    Command::new(CommandKind::DropUser, doc! { "dropUser": user })
}

pub fn build_users_info(user: &str, database: &str) -> Command {
    Command::new(
        CommandKind::UsersInfo,
        doc! { "usersInfo": { "user": user, "db": database } },
    )
}

/// Reject specs that cannot name a user. Runs before anything is sent.
pub(crate) fn validate(spec: &UserSpec) -> Result<(), ReconcileError> {
    if spec.user.is_empty() {
        return Err(ReconcileError::InvalidSpec("user must not be empty".to_string()));
    }
    if spec.database.is_empty() {
        return Err(ReconcileError::InvalidSpec(format!(
            "database of user \"{}\" must not be empty",
            spec.user
        )));
    }
    Ok(())
}

fn roles_array(roles: &RoleSet) -> Vec<Bson> {
    roles
        .iter()
        .map(|grant| {
            Bson::Document(doc! {
                "role": grant.role.as_str(),
                "db": grant.database.as_str(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoleGrant;

    fn spec(roles: Vec<RoleGrant>) -> UserSpec {
        UserSpec::new("alice", "s3cret", "test", roles)
    }

    #[test]
    fn test_build_create_shape() {
        let command = build_create(&spec(vec![RoleGrant::new("readWrite", "test")]))
            .expect("valid spec");

        assert_eq!(command.kind(), CommandKind::CreateUser);
        assert_eq!(
            command.document(),
            &doc! {
                "createUser": "alice",
                "pwd": "s3cret",
                "roles": [{ "role": "readWrite", "db": "test" }],
            }
        );
        // The server dispatches on the first key.
        assert_eq!(command.document().keys().next().map(String::as_str), Some("createUser"));
    }

    #[test]
    fn test_build_update_is_full_replace() {
        let command = build_update(&spec(vec![])).expect("valid spec");
        assert_eq!(
            command.into_document(),
            doc! { "updateUser": "alice", "pwd": "s3cret", "roles": [] }
        );
    }

    #[test]
    fn test_role_order_does_not_change_command() {
        let a = spec(vec![
            RoleGrant::new("read", "reporting"),
            RoleGrant::new("readWrite", "app"),
        ]);
        let b = spec(vec![
            RoleGrant::new("readWrite", "app"),
            RoleGrant::new("read", "reporting"),
        ]);

        assert_eq!(build_create(&a).unwrap(), build_create(&b).unwrap());
        assert_eq!(build_update(&a).unwrap(), build_update(&b).unwrap());

        let roles = build_create(&a)
            .unwrap()
            .document()
            .get_array("roles")
            .unwrap()
            .clone();
        assert_eq!(
            roles,
            vec![
                Bson::Document(doc! { "role": "readWrite", "db": "app" }),
                Bson::Document(doc! { "role": "read", "db": "reporting" }),
            ]
        );
    }

    #[test]
    fn test_empty_user_or_database_rejected() {
        let no_user = UserSpec::new("", "pw", "test", []);
        assert!(matches!(build_create(&no_user), Err(ReconcileError::InvalidSpec(_))));
        assert!(matches!(build_update(&no_user), Err(ReconcileError::InvalidSpec(_))));

        let no_db = UserSpec::new("alice", "pw", "", []);
        assert!(matches!(build_create(&no_db), Err(ReconcileError::InvalidSpec(_))));
    }

    #[test]
    fn test_build_drop_and_users_info() {
        assert_eq!(build_drop("alice").document(), &doc! { "dropUser": "alice" });
        assert_eq!(
            build_users_info("alice", "test").document(),
            &doc! { "usersInfo": { "user": "alice", "db": "test" } }
        );
    }

    #[test]
    fn test_debug_never_prints_password() {
        let command = build_create(&spec(vec![])).unwrap();
        let rendered = format!("{:?}", command);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("***"));
        assert_eq!(command.document().get_str("pwd").unwrap(), "s3cret");
    }
}
