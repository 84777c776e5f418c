//! Connection settings for the MongoDB server whose users are managed.
//!
//! Values given explicitly (command-line flags or library callers) win;
//! anything left unset falls back to `MONGODB_*` environment variables.
//! Every missing or invalid attribute is reported at once instead of
//! stopping at the first.

use mongodb::options::{AuthMechanism, ClientOptions, Credential};
use secrecy::{ExposeSecret, Secret};
use service_core::error::AppError;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const HOST_ENV: &str = "MONGODB_HOST";
pub const USERNAME_ENV: &str = "MONGODB_USERNAME";
pub const PASSWORD_ENV: &str = "MONGODB_PASSWORD";
pub const AUTH_MECHANISM_ENV: &str = "MONGODB_AUTH_MECHANISM";
pub const AUTH_SOURCE_ENV: &str = "MONGODB_AUTH_SOURCE";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_APP_NAME: &str = "mongodb-users";

/// Explicitly supplied settings; any field may be left for the environment.
#[derive(Debug, Default)]
pub struct ProviderSettings {
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<Secret<String>>,
    pub auth_mechanism: Option<String>,
    pub auth_source: Option<String>,
    pub connect_timeout_secs: Option<u64>,
}

/// Fully resolved connection settings.
#[derive(Debug)]
pub struct ProviderConfig {
    pub host: String,
    pub username: String,
    pub password: Secret<String>,
    pub auth_mechanism: Option<AuthMechanism>,
    pub auth_source: Option<String>,
    pub connect_timeout: Duration,
    pub app_name: String,
}

/// One problem with one configuration attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub attribute: &'static str,
    pub summary: String,
    pub detail: String,
}

/// All configuration problems found in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{} ({}): {}", d.summary, d.attribute, d.detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

impl From<Diagnostics> for AppError {
    fn from(diagnostics: Diagnostics) -> Self {
        AppError::ConfigError(anyhow::Error::new(diagnostics))
    }
}

impl ProviderConfig {
    pub fn resolve(settings: ProviderSettings) -> Result<Self, Diagnostics> {
        Self::resolve_with(settings, |key| env::var(key).ok())
    }

    /// Resolve against an arbitrary variable source.
    pub fn resolve_with<F>(settings: ProviderSettings, lookup: F) -> Result<Self, Diagnostics>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut diagnostics = Vec::new();

        let host = settings.host.or_else(|| lookup(HOST_ENV)).unwrap_or_default();
        let username = settings
            .username
            .or_else(|| lookup(USERNAME_ENV))
            .unwrap_or_default();
        let password = settings
            .password
            .or_else(|| lookup(PASSWORD_ENV).map(Secret::new))
            .unwrap_or_else(|| Secret::new(String::new()));

        if host.is_empty() {
            diagnostics.push(missing("host", "Host", HOST_ENV));
        }
        if username.is_empty() {
            diagnostics.push(missing("username", "Username", USERNAME_ENV));
        }
        if password.expose_secret().is_empty() {
            diagnostics.push(missing("password", "Password", PASSWORD_ENV));
        }

        let auth_mechanism = match settings
            .auth_mechanism
            .or_else(|| lookup(AUTH_MECHANISM_ENV))
            .filter(|m| !m.is_empty())
        {
            Some(name) => match AuthMechanism::from_str(&name) {
                Ok(mechanism) => Some(mechanism),
                Err(e) => {
                    diagnostics.push(Diagnostic {
                        attribute: "auth_mechanism",
                        summary: "Invalid MongoDB Auth Mechanism".to_string(),
                        detail: format!(
                            "\"{}\" is not a supported authentication mechanism: {}. \
                             Pass --auth-mechanism or set the {} \
                             environment variable to a mechanism such as SCRAM-SHA-256.",
                            name, e, AUTH_MECHANISM_ENV
                        ),
                    });
                    None
                }
            },
            None => None,
        };

        let auth_source = settings
            .auth_source
            .or_else(|| lookup(AUTH_SOURCE_ENV))
            .filter(|s| !s.is_empty());

        if !diagnostics.is_empty() {
            return Err(Diagnostics(diagnostics));
        }

        Ok(Self {
            host,
            username,
            password,
            auth_mechanism,
            auth_source,
            connect_timeout: settings
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            app_name: DEFAULT_APP_NAME.to_string(),
        })
    }

    pub fn uri(&self) -> String {
        format!("mongodb://{}", self.host)
    }

    pub fn credential(&self) -> Credential {
        let mut credential = Credential::default();
        credential.username = Some(self.username.clone());
        credential.password = Some(self.password.expose_secret().clone());
        credential.mechanism = self.auth_mechanism.clone();
        credential.source = self.auth_source.clone();
        credential
    }

    pub async fn client_options(&self) -> Result<ClientOptions, AppError> {
        let mut options = ClientOptions::parse(self.uri()).await.map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Invalid MongoDB host \"{}\": {}",
                self.host,
                e
            ))
        })?;
        options.credential = Some(self.credential());
        options.connect_timeout = Some(self.connect_timeout);
        options.app_name = Some(self.app_name.clone());
        Ok(options)
    }
}

fn missing(attribute: &'static str, label: &str, env_var: &str) -> Diagnostic {
    Diagnostic {
        attribute,
        summary: format!("Missing MongoDB {}", label),
        detail: format!(
            "Cannot connect to MongoDB: the {} is missing or empty. \
             Pass --{} or set the {} environment variable. \
             If either is already set, ensure the value is not empty.",
            label.to_lowercase(),
            attribute,
            env_var
        ),
    }
}
