//! Domain models for mongodb-users.

pub mod user;

pub use user::{Drift, ImportKey, ReconciledUser, RoleGrant, RoleSet, UserKey, UserSpec};
