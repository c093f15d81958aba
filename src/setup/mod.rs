//! Operator credentials and the in-memory setup status.
//!
//! The status is the only mutable in-process state: `/api/status` and the
//! transport reads take the read lock, transport writes take the write lock.

use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{fmt, future::Future, sync::Arc};
use tokio::sync::RwLock;
use utoipa::ToSchema;

#[derive(Clone)]
pub struct OperatorCredentials {
    pub username: String,
    pub password: SecretString,
}

impl OperatorCredentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// Both fields are always compared, digest against digest.
    #[must_use]
    pub fn matches(&self, username: &str, password: &str) -> bool {
        let user_ok = digest_eq(self.username.as_bytes(), username.as_bytes());
        let pass_ok = digest_eq(self.password.expose_secret().as_bytes(), password.as_bytes());
        user_ok & pass_ok
    }
}

impl fmt::Debug for OperatorCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

fn digest_eq(left: &[u8], right: &[u8]) -> bool {
    let left = Sha256::digest(left);
    let right = Sha256::digest(right);
    left.iter()
        .zip(right.iter())
        .fold(0_u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Supplies the operator credentials used for setup login and `/admin` routes.
pub trait SecretProvider: Send + Sync {
    /// # Errors
    /// Returns an error when the credentials cannot be produced.
    fn operator_credentials(&self) -> Result<OperatorCredentials>;
}

/// Credentials handed over on the command line or through the environment.
#[derive(Debug, Clone)]
pub struct StaticSecretProvider {
    credentials: OperatorCredentials,
}

impl StaticSecretProvider {
    #[must_use]
    pub fn new(credentials: OperatorCredentials) -> Self {
        Self { credentials }
    }
}

impl SecretProvider for StaticSecretProvider {
    fn operator_credentials(&self) -> Result<OperatorCredentials> {
        Ok(self.credentials.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SetupStatus {
    pub database_ready: bool,
    pub schema_ready: bool,
    pub transport_configured: bool,
}

impl SetupStatus {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.database_ready && self.schema_ready && self.transport_configured
    }
}

pub struct SetupState {
    status: RwLock<SetupStatus>,
    secrets: Arc<dyn SecretProvider>,
}

impl SetupState {
    #[must_use]
    pub fn new(status: SetupStatus, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            status: RwLock::new(status),
            secrets,
        }
    }

    pub async fn status(&self) -> SetupStatus {
        *self.status.read().await
    }

    pub async fn set_transport_configured(&self, configured: bool) {
        self.status.write().await.transport_configured = configured;
    }

    /// Run a transport store change under the write lock and record
    /// `configured` only if it succeeds. Concurrent changes update the flag in
    /// the order their store calls completed.
    ///
    /// # Errors
    /// Returns the store error; the flag is left untouched.
    pub async fn change_transport<T, F>(&self, change: F, configured: bool) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut status = self.status.write().await;
        let value = change.await?;
        status.transport_configured = configured;
        Ok(value)
    }

    /// # Errors
    /// Returns an error if the secret provider fails.
    pub fn check_operator(&self, username: &str, password: &str) -> Result<bool> {
        Ok(self
            .secrets
            .operator_credentials()?
            .matches(username, password))
    }
}
