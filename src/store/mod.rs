//! Persistence seams for accounts, reset codes and mail transports.
//!
//! Handlers and the reset workflow only see these traits. [`PgStore`] backs
//! them with Postgres in production; tests use the in-memory store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::mail::TransportConfig;

#[cfg(test)]
pub(crate) mod memory;
mod postgres;
pub mod schema;

pub use postgres::PgStore;

/// Account row as far as the reset flow is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: i32,
    pub email: String,
}

/// A reset code as persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCode {
    pub account_id: i32,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// A transport configuration row.
#[derive(Debug, Clone)]
pub struct StoredTransport {
    pub id: i32,
    pub config: TransportConfig,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Look up an account by its already-normalized email.
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    async fn find_by_id(&self, id: i32) -> Result<Option<Account>>;

    /// Overwrite the stored password credential. Returns `false` when no row matched.
    async fn update_password(&self, id: i32, credential: &str) -> Result<bool>;
}

#[async_trait]
pub trait ResetCodeStore: Send + Sync {
    async fn insert_code(
        &self,
        account_id: i32,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Newest row for `code` whose expiration is strictly after `now`.
    async fn find_valid_code(&self, code: &str, now: DateTime<Utc>) -> Result<Option<StoredCode>>;

    /// Delete every row carrying `code`; returns the number of rows removed.
    async fn delete_code(&self, code: &str) -> Result<u64>;
}

#[async_trait]
pub trait TransportStore: Send + Sync {
    async fn active_transport(&self) -> Result<Option<StoredTransport>>;

    /// Deactivate every existing row and insert `config` as the only active one,
    /// atomically.
    async fn activate_transport(&self, config: &TransportConfig) -> Result<StoredTransport>;

    /// Rewrite the active row in place. `None` when nothing is active.
    async fn update_active_transport(
        &self,
        config: &TransportConfig,
    ) -> Result<Option<StoredTransport>>;

    /// Clear the active flag on every row; returns the number of rows touched.
    async fn deactivate_transports(&self) -> Result<u64>;
}
