#![allow(dead_code)]

use mongodb_users::models::{RoleGrant, UserSpec};
use mongodb_users::services::{MockExecutor, Reconciler};
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,mongodb_users=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestApp {
    pub server: Arc<MockExecutor>,
    pub reconciler: Reconciler,
}

impl TestApp {
    pub fn spawn() -> Self {
        init_tracing();

        let server = Arc::new(MockExecutor::new());
        let reconciler = Reconciler::new(server.clone());
        Self { server, reconciler }
    }
}

pub fn grant(role: &str, database: &str) -> RoleGrant {
    RoleGrant::new(role, database)
}

pub fn spec(user: &str, database: &str, roles: &[(&str, &str)]) -> UserSpec {
    UserSpec::new(
        user,
        format!("{}-password", user),
        database,
        roles.iter().map(|(role, db)| grant(role, db)),
    )
}
