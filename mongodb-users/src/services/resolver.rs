//! Identity read-back.
//!
//! `createUser` and `updateUser` reply with nothing but `ok`, so the
//! server-assigned identifier and the effective role set are recovered with
//! a `usersInfo` query for the exact `(user, database)` pair.

use super::commands::build_users_info;
use super::executor::{command_succeeded, CommandExecutor};
use crate::error::{Phase, ReconcileError};
use crate::models::{ReconciledUser, RoleGrant, UserKey};
use chrono::Utc;
use mongodb::bson::{self, Binary, Document};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct UsersInfoReply {
    #[serde(default)]
    users: Vec<UserRecord>,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "userId", default)]
    user_id: Option<Binary>,
    user: String,
    db: String,
    #[serde(default)]
    roles: Vec<RoleRecord>,
}

#[derive(Debug, Deserialize)]
struct RoleRecord {
    role: String,
    db: String,
}

impl UserRecord {
    /// Prefer the immutable `userId` UUID; fall back to `_id` for servers
    /// that predate it.
    fn stable_id(&self) -> String {
        self.user_id
            .as_ref()
            .and_then(|binary| Uuid::from_slice(&binary.bytes).ok())
            .map(|uuid| uuid.to_string())
            .unwrap_or_else(|| self.id.clone())
    }

    fn into_reconciled(self) -> ReconciledUser {
        let id = self.stable_id();
        ReconciledUser {
            id,
            user: self.user,
            database: self.db,
            roles: self
                .roles
                .into_iter()
                .map(|r| RoleGrant::new(r.role, r.db))
                .collect(),
            last_reconciled_at: Utc::now(),
        }
    }
}

/// Look up exactly one user record for `key`.
///
/// Zero matches is [`ReconcileError::NotFound`]; more than one is
/// [`ReconcileError::AmbiguousResult`].
pub async fn resolve(
    executor: &dyn CommandExecutor,
    key: &UserKey,
) -> Result<ReconciledUser, ReconcileError> {
    let command = build_users_info(&key.user, &key.database);
    let reply = executor
        .execute(&key.database, &command)
        .await
        .map_err(|e| ReconcileError::from_executor(Phase::Read, key, e))?;

    if !command_succeeded(&reply) {
        return Err(ReconcileError::RemoteCommand {
            phase: Phase::Read,
            key: key.clone(),
            code: reply.get_i32("code").ok(),
            message: format!(
                "usersInfo did not report ok: 1 ({})",
                reply.get_str("errmsg").unwrap_or("no errmsg")
            ),
        });
    }
    let reply = decode(reply, key)?;

    let mut matches: Vec<UserRecord> = reply
        .users
        .into_iter()
        .filter(|record| record.user == key.user && record.db == key.database)
        .collect();

    match matches.len() {
        0 => {
            tracing::debug!(user = %key.user, database = %key.database, "No matching user record");
            Err(ReconcileError::NotFound(key.clone()))
        }
        1 => {
            let record = matches.remove(0);
            let user = record.into_reconciled();
            tracing::debug!(
                user = %user.user,
                database = %user.database,
                id = %user.id,
                roles = user.roles.len(),
                "Resolved user identity"
            );
            Ok(user)
        }
        count => {
            tracing::error!(
                user = %key.user,
                database = %key.database,
                count,
                "usersInfo returned more than one record for a fully qualified user"
            );
            Err(ReconcileError::AmbiguousResult {
                key: key.clone(),
                count,
            })
        }
    }
}

fn decode(reply: Document, key: &UserKey) -> Result<UsersInfoReply, ReconcileError> {
    bson::from_document(reply).map_err(|e| ReconcileError::RemoteCommand {
        phase: Phase::Read,
        key: key.clone(),
        code: None,
        message: format!("malformed usersInfo reply: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoleSet;
    use mongodb::bson::{doc, spec::BinarySubtype};

    #[test]
    fn test_stable_id_prefers_user_id() {
        let uuid = Uuid::new_v4();
        let user_id = Binary {
            subtype: BinarySubtype::Uuid,
            bytes: uuid.as_bytes().to_vec(),
        };
        let record: UserRecord = bson::from_document(doc! {
            "_id": "test.alice",
            "userId": user_id,
            "user": "alice",
            "db": "test",
            "roles": [],
        })
        .expect("record decodes");
        assert_eq!(record.stable_id(), uuid.to_string());
    }

    #[test]
    fn test_stable_id_falls_back_to_document_id() {
        let record: UserRecord = bson::from_document(doc! {
            "_id": "test.alice",
            "user": "alice",
            "db": "test",
        })
        .expect("record decodes");
        assert_eq!(record.stable_id(), "test.alice");
    }

    #[test]
    fn test_record_roles_become_a_set() {
        let record: UserRecord = bson::from_document(doc! {
            "_id": "test.alice",
            "user": "alice",
            "db": "test",
            "roles": [
                { "role": "read", "db": "z" },
                { "role": "readWrite", "db": "a" },
                { "role": "read", "db": "z" },
            ],
        })
        .expect("record decodes");

        let user = record.into_reconciled();
        assert_eq!(
            user.roles,
            RoleSet::from([RoleGrant::new("readWrite", "a"), RoleGrant::new("read", "z")])
        );
    }

    #[test]
    fn test_malformed_users_field_is_remote_command_error() {
        let key = UserKey::new("alice", "test");
        let err = decode(doc! { "users": "not-an-array", "ok": 1.0 }, &key).unwrap_err();
        match err {
            ReconcileError::RemoteCommand { phase, code, message, .. } => {
                assert_eq!(phase, Phase::Read);
                assert_eq!(code, None);
                assert!(message.starts_with("malformed usersInfo reply"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_users_field_decodes_as_empty() {
        let key = UserKey::new("alice", "test");
        let reply = decode(doc! { "ok": 1.0 }, &key).expect("reply decodes");
        assert!(reply.users.is_empty());
    }
}
