//! Postgres implementation of the store traits.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{Instrument, info_span};

use super::{Account, AccountStore, ResetCodeStore, StoredCode, StoredTransport, TransportStore};
use crate::mail::TransportConfig;

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    Ok(Account {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
    })
}

fn transport_from_row(row: &PgRow) -> Result<StoredTransport> {
    let port: i32 = row.try_get("port")?;
    let port = u16::try_from(port).map_err(|_| anyhow!("stored SMTP port out of range: {port}"))?;
    let password: String = row.try_get("password")?;

    Ok(StoredTransport {
        id: row.try_get("id")?,
        config: TransportConfig::new(
            row.try_get::<String, _>("host")?,
            port,
            row.try_get::<String, _>("username")?,
            SecretString::from(password),
            row.try_get::<String, _>("from_email")?,
        ),
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl AccountStore for PgStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query = "SELECT id, email FROM users WHERE LOWER(email) = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account by email")?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<Account>> {
        let query = "SELECT id, email FROM users WHERE id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account by id")?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn update_password(&self, id: i32, credential: &str) -> Result<bool> {
        let query = "UPDATE users SET password = $1, updated_at = NOW() WHERE id = $2";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(credential)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update password")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ResetCodeStore for PgStore {
    async fn insert_code(
        &self,
        account_id: i32,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = "INSERT INTO reset_codes (user_id, code, expiration_time) VALUES ($1, $2, $3)";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account_id)
            .bind(code)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert reset code")?;

        Ok(())
    }

    async fn find_valid_code(&self, code: &str, now: DateTime<Utc>) -> Result<Option<StoredCode>> {
        let query = r"
            SELECT user_id, code, expiration_time
            FROM reset_codes
            WHERE code = $1 AND expiration_time > $2
            ORDER BY created_at DESC, id DESC
            LIMIT 1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(code)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup reset code")?;

        row.map(|row| -> Result<StoredCode> {
            Ok(StoredCode {
                account_id: row.try_get("user_id")?,
                code: row.try_get("code")?,
                expires_at: row.try_get("expiration_time")?,
            })
        })
        .transpose()
    }

    async fn delete_code(&self, code: &str) -> Result<u64> {
        let query = "DELETE FROM reset_codes WHERE code = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(code)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete reset code")?;

        Ok(result.rows_affected())
    }
}

const TRANSPORT_COLUMNS: &str =
    "id, host, port, username, password, from_email, is_active, created_at, updated_at";

#[async_trait]
impl TransportStore for PgStore {
    async fn active_transport(&self) -> Result<Option<StoredTransport>> {
        let query = format!(
            "SELECT {TRANSPORT_COLUMNS} FROM smtp_config WHERE is_active = TRUE ORDER BY id DESC LIMIT 1"
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup active SMTP configuration")?;

        row.as_ref().map(transport_from_row).transpose()
    }

    async fn activate_transport(&self, config: &TransportConfig) -> Result<StoredTransport> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin SMTP activation transaction")?;

        // Serializes concurrent activations so only one row ends up active.
        let lock = "LOCK TABLE smtp_config IN SHARE ROW EXCLUSIVE MODE";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "LOCK",
            db.statement = lock
        );
        sqlx::query(lock)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lock SMTP configurations")?;

        let deactivate = "UPDATE smtp_config SET is_active = FALSE, updated_at = NOW() WHERE is_active = TRUE";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = deactivate
        );
        sqlx::query(deactivate)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to deactivate SMTP configurations")?;

        let insert = format!(
            r"
            INSERT INTO smtp_config (host, port, username, password, from_email, is_active)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            RETURNING {TRANSPORT_COLUMNS}
            "
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = insert.as_str()
        );
        let row = sqlx::query(&insert)
            .bind(&config.host)
            .bind(i32::from(config.port))
            .bind(&config.username)
            .bind(config.password.expose_secret())
            .bind(&config.from_email)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert SMTP configuration")?;

        let stored = transport_from_row(&row)?;

        tx.commit()
            .await
            .context("commit SMTP activation transaction")?;

        Ok(stored)
    }

    async fn update_active_transport(
        &self,
        config: &TransportConfig,
    ) -> Result<Option<StoredTransport>> {
        let query = format!(
            r"
            UPDATE smtp_config
            SET host = $1, port = $2, username = $3, password = $4, from_email = $5, updated_at = NOW()
            WHERE id = (SELECT id FROM smtp_config WHERE is_active = TRUE ORDER BY id DESC LIMIT 1)
            RETURNING {TRANSPORT_COLUMNS}
            "
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(&config.host)
            .bind(i32::from(config.port))
            .bind(&config.username)
            .bind(config.password.expose_secret())
            .bind(&config.from_email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to update active SMTP configuration")?;

        row.as_ref().map(transport_from_row).transpose()
    }

    async fn deactivate_transports(&self) -> Result<u64> {
        let query = "UPDATE smtp_config SET is_active = FALSE, updated_at = NOW() WHERE is_active = TRUE";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to deactivate SMTP configurations")?;

        Ok(result.rows_affected())
    }
}
