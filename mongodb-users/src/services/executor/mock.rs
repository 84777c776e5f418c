use super::{CommandExecutor, ExecutorError};
use crate::models::RoleGrant;
use crate::services::commands::{Command, CommandKind};
use async_trait::async_trait;
use mongodb::bson::{doc, spec::BinarySubtype, Binary, Bson, Document};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

const USER_NOT_FOUND: i32 = 11;
const BAD_VALUE: i32 = 2;
const USER_ALREADY_EXISTS: i32 = 51003;

/// A one-shot failure injected into the next command of a given kind.
#[derive(Debug, Clone)]
pub enum Fault {
    /// The call never completes.
    Transport(String),
    /// The server rejects the command with an error code.
    Reject {
        code: i32,
        code_name: String,
        message: String,
    },
    /// The reply arrives but reports `ok: 0` without a driver error.
    NotOk,
    /// The reply has no `ok` field and an unusable `users` field.
    MalformedReply,
}

impl Fault {
    fn into_reply(self) -> Result<Document, ExecutorError> {
        match self {
            Fault::Transport(message) => Err(ExecutorError::Transport(anyhow::anyhow!(message))),
            Fault::Reject {
                code,
                code_name,
                message,
            } => Err(ExecutorError::Command {
                code,
                code_name,
                message,
            }),
            Fault::NotOk => Ok(doc! {
                "ok": 0.0,
                "errmsg": "command not acknowledged",
                "code": 8000,
            }),
            Fault::MalformedReply => Ok(doc! { "users": "not-an-array" }),
        }
    }
}

/// A command as the mock saw it, password masked.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub database: String,
    pub kind: CommandKind,
    pub body: Document,
}

#[derive(Debug, Clone)]
struct StoredUser {
    id: Uuid,
    password: String,
    roles: Vec<Bson>,
}

/// In-memory stand-in for a server's user catalog.
///
/// Answers the four user commands the way a server does: server-assigned
/// UUIDs, `UserNotFound` on update/drop of a missing user, an error when
/// creating a user twice, and `usersInfo` replies shaped like the real ones.
#[derive(Default)]
pub struct MockExecutor {
    users: Mutex<BTreeMap<(String, String), StoredUser>>,
    calls: Mutex<Vec<RecordedCall>>,
    faults: Mutex<VecDeque<(CommandKind, Fault)>>,
    duplicate_records: AtomicBool,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `kind` command with `fault`.
    pub fn fail_next(&self, kind: CommandKind, fault: Fault) {
        lock(&self.faults).push_back((kind, fault));
    }

    /// Make `usersInfo` report every match twice.
    pub fn set_duplicate_records(&self, duplicate: bool) {
        self.duplicate_records.store(duplicate, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, kind: CommandKind) -> usize {
        lock(&self.calls).iter().filter(|c| c.kind == kind).count()
    }

    /// Create a user out of band, as another client would. Returns its id.
    pub fn insert_user(
        &self,
        database: &str,
        user: &str,
        password: &str,
        roles: impl IntoIterator<Item = RoleGrant>,
    ) -> String {
        let id = Uuid::new_v4();
        lock(&self.users).insert(
            (database.to_string(), user.to_string()),
            StoredUser {
                id,
                password: password.to_string(),
                roles: roles
                    .into_iter()
                    .map(|g| Bson::Document(doc! { "role": g.role, "db": g.database }))
                    .collect(),
            },
        );
        id.to_string()
    }

    /// Replace a user's roles out of band. Returns false if the user is absent.
    pub fn set_roles(
        &self,
        database: &str,
        user: &str,
        roles: impl IntoIterator<Item = RoleGrant>,
    ) -> bool {
        match lock(&self.users).get_mut(&(database.to_string(), user.to_string())) {
            Some(stored) => {
                stored.roles = roles
                    .into_iter()
                    .map(|g| Bson::Document(doc! { "role": g.role, "db": g.database }))
                    .collect();
                true
            }
            None => false,
        }
    }

    /// Drop a user out of band. Returns false if the user was absent.
    pub fn remove_user(&self, database: &str, user: &str) -> bool {
        lock(&self.users)
            .remove(&(database.to_string(), user.to_string()))
            .is_some()
    }

    pub fn password_of(&self, database: &str, user: &str) -> Option<String> {
        lock(&self.users)
            .get(&(database.to_string(), user.to_string()))
            .map(|stored| stored.password.clone())
    }

    pub fn user_count(&self) -> usize {
        lock(&self.users).len()
    }

    fn take_fault(&self, kind: CommandKind) -> Option<Fault> {
        let mut faults = lock(&self.faults);
        let position = faults.iter().position(|(k, _)| *k == kind)?;
        faults.remove(position).map(|(_, fault)| fault)
    }

    fn create_user(&self, database: &str, body: &Document) -> Result<Document, ExecutorError> {
        let user = required_str(body, "createUser")?;
        let password = required_str(body, "pwd")?;
        let roles = body.get_array("roles").cloned().unwrap_or_default();

        let mut users = lock(&self.users);
        let key = (database.to_string(), user.to_string());
        if users.contains_key(&key) {
            return Err(ExecutorError::Command {
                code: USER_ALREADY_EXISTS,
                code_name: format!("Location{}", USER_ALREADY_EXISTS),
                message: format!("User \"{}@{}\" already exists", user, database),
            });
        }

        users.insert(
            key,
            StoredUser {
                id: Uuid::new_v4(),
                password: password.to_string(),
                roles,
            },
        );
        Ok(doc! { "ok": 1.0 })
    }

    fn update_user(&self, database: &str, body: &Document) -> Result<Document, ExecutorError> {
        let user = required_str(body, "updateUser")?;
        let mut users = lock(&self.users);
        let stored = users
            .get_mut(&(database.to_string(), user.to_string()))
            .ok_or_else(|| user_not_found(user, database))?;

        if let Ok(password) = body.get_str("pwd") {
            stored.password = password.to_string();
        }
        if let Ok(roles) = body.get_array("roles") {
            stored.roles = roles.clone();
        }
        Ok(doc! { "ok": 1.0 })
    }

    fn drop_user(&self, database: &str, body: &Document) -> Result<Document, ExecutorError> {
        let user = required_str(body, "dropUser")?;
        lock(&self.users)
            .remove(&(database.to_string(), user.to_string()))
            .ok_or_else(|| user_not_found(user, database))?;
        Ok(doc! { "ok": 1.0 })
    }

    fn users_info(&self, body: &Document) -> Result<Document, ExecutorError> {
        let filter = body.get_document("usersInfo").map_err(|_| bad_value("usersInfo"))?;
        let user = required_str(filter, "user")?;
        let database = required_str(filter, "db")?;

        let mut records = Vec::new();
        if let Some(stored) = lock(&self.users).get(&(database.to_string(), user.to_string())) {
            let id = format!("{}.{}", database, user);
            let user_id = Bson::Binary(Binary {
                subtype: BinarySubtype::Uuid,
                bytes: stored.id.as_bytes().to_vec(),
            });
            let record = doc! {
                "_id": id,
                "userId": user_id,
                "user": user,
                "db": database,
                "roles": stored.roles.clone(),
                "mechanisms": ["SCRAM-SHA-1", "SCRAM-SHA-256"],
            };
            if self.duplicate_records.load(Ordering::SeqCst) {
                records.push(Bson::Document(record.clone()));
            }
            records.push(Bson::Document(record));
        }

        Ok(doc! { "users": records, "ok": 1.0 })
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute(&self, database: &str, command: &Command) -> Result<Document, ExecutorError> {
        lock(&self.calls).push(RecordedCall {
            database: database.to_string(),
            kind: command.kind(),
            body: command.redacted(),
        });

        if let Some(fault) = self.take_fault(command.kind()) {
            tracing::info!(
                database = %database,
                command = command.name(),
                fault = ?fault,
                "[MOCK] Injecting fault"
            );
            return fault.into_reply();
        }

        let body = command.document();
        match command.kind() {
            CommandKind::CreateUser => self.create_user(database, body),
            CommandKind::UpdateUser => self.update_user(database, body),
            CommandKind::DropUser => self.drop_user(database, body),
            CommandKind::UsersInfo => self.users_info(body),
        }
    }

    async fn health_check(&self) -> Result<(), ExecutorError> {
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn required_str<'a>(body: &'a Document, field: &str) -> Result<&'a str, ExecutorError> {
    body.get_str(field).map_err(|_| bad_value(field))
}

fn bad_value(field: &str) -> ExecutorError {
    ExecutorError::Command {
        code: BAD_VALUE,
        code_name: "BadValue".to_string(),
        message: format!("missing or invalid field \"{}\"", field),
    }
}

fn user_not_found(user: &str, database: &str) -> ExecutorError {
    ExecutorError::Command {
        code: USER_NOT_FOUND,
        code_name: "UserNotFound".to_string(),
        message: format!("Could not find user \"{}\" for db \"{}\"", user, database),
    }
}
