//! Issue, verify and consume reset codes for an account.

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use super::ledger::{IssuedCode, Ledger};
use super::password::PasswordStorage;
use super::{normalize_email, valid_email};
use crate::mail::{MailError, MailSender};
use crate::store::{Account, AccountStore};

pub const RESET_SUBJECT: &str = "Password reset";

#[derive(Debug, Error)]
pub enum ResetError {
    #[error("{0}")]
    Invalid(&'static str),
    #[error("account not found")]
    AccountNotFound,
    #[error("code is invalid or expired")]
    NotFoundOrExpired,
    #[error("email and code do not match")]
    Mismatch,
    #[error("failed to deliver the reset code")]
    Delivery(#[source] MailError),
    #[error("reset store failure")]
    Store(#[source] anyhow::Error),
}

#[derive(Clone)]
pub struct ResetWorkflow {
    accounts: Arc<dyn AccountStore>,
    ledger: Ledger,
    mailer: Arc<dyn MailSender>,
    passwords: PasswordStorage,
}

impl ResetWorkflow {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        ledger: Ledger,
        mailer: Arc<dyn MailSender>,
        passwords: PasswordStorage,
    ) -> Self {
        Self {
            accounts,
            ledger,
            mailer,
            passwords,
        }
    }

    /// Create a code for the account behind `email` and mail it there.
    ///
    /// If delivery fails the code stays stored and valid until it expires.
    ///
    /// # Errors
    /// `Invalid` for a malformed email, `AccountNotFound` when no account
    /// matches, `Delivery` when the mail transport fails, `Store` otherwise.
    pub async fn issue(&self, email: &str) -> Result<IssuedCode, ResetError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(ResetError::Invalid("Missing email"));
        }
        if !valid_email(&email) {
            return Err(ResetError::Invalid("Invalid email"));
        }

        let Some(account) = self
            .accounts
            .find_by_email(&email)
            .await
            .map_err(ResetError::Store)?
        else {
            info!("Reset code requested for unknown account");
            return Err(ResetError::AccountNotFound);
        };

        let issued = self
            .ledger
            .issue(account.id)
            .await
            .map_err(ResetError::Store)?;

        let minutes = (self.ledger.ttl().num_seconds() / 60).max(1);
        let body = format!(
            "Your password reset code is: {}\n\nThe code expires in {minutes} minutes. If you did not request a reset, ignore this message.",
            issued.code
        );

        if let Err(err) = self.mailer.send(&account.email, RESET_SUBJECT, &body).await {
            error!(account_id = account.id, "Failed to send reset code: {err}");
            return Err(ResetError::Delivery(err));
        }

        info!(account_id = account.id, "Reset code sent");
        Ok(issued)
    }

    /// Check that `code` is live and belongs to `email`. Never mutates state.
    ///
    /// # Errors
    /// `NotFoundOrExpired` when the code is unknown or stale, `Mismatch` when it
    /// belongs to another address.
    pub async fn verify(&self, email: &str, code: &str) -> Result<Account, ResetError> {
        let email = normalize_email(email);
        let code = code.trim();
        if email.is_empty() || code.is_empty() {
            return Err(ResetError::Invalid("Missing email or code"));
        }

        let stored = self
            .ledger
            .lookup_valid(code)
            .await
            .map_err(ResetError::Store)?
            .ok_or(ResetError::NotFoundOrExpired)?;

        // Account removed after issuance: the code can no longer be used.
        let account = self
            .accounts
            .find_by_id(stored.account_id)
            .await
            .map_err(ResetError::Store)?
            .ok_or(ResetError::NotFoundOrExpired)?;

        if normalize_email(&account.email) != email {
            return Err(ResetError::Mismatch);
        }

        Ok(account)
    }

    /// Verify, overwrite the password, then drop the code.
    ///
    /// # Errors
    /// Everything [`Self::verify`] returns, plus `Invalid` for an empty password.
    pub async fn consume(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), ResetError> {
        if new_password.is_empty() {
            return Err(ResetError::Invalid("Missing new password"));
        }

        let account = self.verify(email, code).await?;

        let credential = self
            .passwords
            .encode_blocking(new_password.to_string())
            .await
            .map_err(ResetError::Store)?;

        let updated = self
            .accounts
            .update_password(account.id, &credential)
            .await
            .map_err(ResetError::Store)?;
        if !updated {
            return Err(ResetError::NotFoundOrExpired);
        }

        self.ledger.consume(code.trim()).await;

        info!(account_id = account.id, "Password reset completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::Stage;
    use crate::reset::ledger::tests::{ManualClock, start};
    use crate::store::memory::MemoryStore;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String, String)>>,
        fail: bool,
    }

    impl RecordingMailer {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<(String, String, String)> {
            self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl MailSender for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::at(Stage::Connect, "connection refused"));
            }
            if let Ok(mut sent) = self.sent.lock() {
                sent.push((to.to_string(), subject.to_string(), body.to_string()));
            }
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        mailer: Arc<RecordingMailer>,
        workflow: ResetWorkflow,
    }

    fn harness_with(mailer: RecordingMailer, passwords: PasswordStorage) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let mailer = Arc::new(mailer);
        let ledger = Ledger::new(store.clone(), clock.clone());
        let workflow = ResetWorkflow::new(store.clone(), ledger, mailer.clone(), passwords);
        Harness {
            store,
            clock,
            mailer,
            workflow,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingMailer::default(), PasswordStorage::Plaintext)
    }

    #[tokio::test]
    async fn full_reset_flow() -> Result<()> {
        let h = harness();
        let id = h.store.add_account("user@example.com", "old")?;

        let issued = h.workflow.issue("user@example.com").await?;
        assert_eq!(issued.expires_at, start() + TimeDelta::minutes(5));

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "user@example.com");
        assert_eq!(sent[0].1, RESET_SUBJECT);
        assert!(sent[0].2.contains(&issued.code));

        h.workflow.verify("USER@Example.com", &issued.code).await?;
        h.workflow
            .consume("user@example.com", &issued.code, "new-secret")
            .await?;

        assert_eq!(h.store.password_of(id)?.as_deref(), Some("new-secret"));
        assert!(h.store.codes_for(id)?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn verify_is_repeatable_until_consumed() -> Result<()> {
        let h = harness();
        h.store.add_account("user@example.com", "old")?;
        let issued = h.workflow.issue(" User@Example.com ").await?;

        h.workflow.verify("user@example.com", &issued.code).await?;
        h.workflow.verify("user@example.com", &issued.code).await?;
        h.workflow
            .consume("user@example.com", &issued.code, "pw")
            .await?;

        let again = h.workflow.verify("user@example.com", &issued.code).await;
        assert!(matches!(again, Err(ResetError::NotFoundOrExpired)));
        Ok(())
    }

    #[tokio::test]
    async fn other_accounts_email_is_a_mismatch() -> Result<()> {
        let h = harness();
        h.store.add_account("alice@example.com", "a")?;
        h.store.add_account("bob@example.com", "b")?;
        let issued = h.workflow.issue("alice@example.com").await?;

        let result = h.workflow.verify("bob@example.com", &issued.code).await;
        assert!(matches!(result, Err(ResetError::Mismatch)));

        let result = h
            .workflow
            .consume("bob@example.com", &issued.code, "stolen")
            .await;
        assert!(matches!(result, Err(ResetError::Mismatch)));
        assert_eq!(h.store.password_of(2)?.as_deref(), Some("b"));
        Ok(())
    }

    #[tokio::test]
    async fn expired_code_matches_unknown_code() -> Result<()> {
        let h = harness();
        h.store.add_account("user@example.com", "old")?;
        let issued = h.workflow.issue("user@example.com").await?;
        h.clock.set(issued.expires_at);

        let expired = h.workflow.verify("user@example.com", &issued.code).await;
        let unknown = h.workflow.verify("user@example.com", "99999999").await;
        assert!(matches!(expired, Err(ResetError::NotFoundOrExpired)));
        assert!(matches!(unknown, Err(ResetError::NotFoundOrExpired)));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_account_is_reported() -> Result<()> {
        let h = harness();
        let result = h.workflow.issue("ghost@example.com").await;
        assert!(matches!(result, Err(ResetError::AccountNotFound)));
        assert!(h.mailer.sent().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_input_is_rejected() {
        let h = harness();
        assert!(matches!(
            h.workflow.issue("   ").await,
            Err(ResetError::Invalid(_))
        ));
        assert!(matches!(
            h.workflow.issue("not-an-email").await,
            Err(ResetError::Invalid(_))
        ));
        assert!(matches!(
            h.workflow.verify("user@example.com", " ").await,
            Err(ResetError::Invalid(_))
        ));
        assert!(matches!(
            h.workflow.consume("user@example.com", "12345678", "").await,
            Err(ResetError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn failed_delivery_keeps_code_valid() -> Result<()> {
        let h = harness_with(RecordingMailer::failing(), PasswordStorage::Plaintext);
        let id = h.store.add_account("user@example.com", "old")?;

        let result = h.workflow.issue("user@example.com").await;
        let Err(ResetError::Delivery(err)) = result else {
            return Err(anyhow!("expected a delivery failure"));
        };
        assert_eq!(err.stage(), Some(Stage::Connect));

        let codes = h.store.codes_for(id)?;
        assert_eq!(codes.len(), 1);
        h.workflow.verify("user@example.com", &codes[0].code).await?;
        Ok(())
    }

    #[tokio::test]
    async fn argon2_storage_hashes_new_password() -> Result<()> {
        let h = harness_with(RecordingMailer::default(), PasswordStorage::Argon2);
        let id = h.store.add_account("user@example.com", "old")?;
        let issued = h.workflow.issue("user@example.com").await?;

        h.workflow
            .consume("user@example.com", &issued.code, "new-secret")
            .await?;

        let stored = h.store.password_of(id)?.unwrap_or_default();
        assert!(stored.starts_with("$argon2"), "{stored}");
        assert!(!stored.contains("new-secret"));
        Ok(())
    }

    #[tokio::test]
    async fn consume_succeeds_when_cleanup_fails() -> Result<()> {
        let h = harness();
        let id = h.store.add_account("user@example.com", "old")?;
        let issued = h.workflow.issue("user@example.com").await?;
        h.store.set_fail_deletes(true)?;

        h.workflow
            .consume("user@example.com", &issued.code, "new")
            .await?;
        assert_eq!(h.store.password_of(id)?.as_deref(), Some("new"));
        Ok(())
    }
}
