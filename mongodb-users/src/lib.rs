//! mongodb-users - Reconcile declared MongoDB users against a live server.
//!
//! The server only exposes imperative admin commands (`createUser`,
//! `updateUser`, `dropUser`, `usersInfo`). [`services::Reconciler`] maps a
//! declared [`models::UserSpec`] onto those commands and reads the result
//! back to recover the server-assigned identity.

pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use error::{Phase, ReconcileError};
