//! Issued reset codes: creation, time-bounded lookup and removal.

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::code;
use crate::store::{ResetCodeStore, StoredCode};

/// Default validity window for a reset code.
pub const DEFAULT_CODE_TTL_SECONDS: i64 = 300;

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Ledger {
    codes: Arc<dyn ResetCodeStore>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
}

impl Ledger {
    #[must_use]
    pub fn new(codes: Arc<dyn ResetCodeStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            codes,
            clock,
            ttl: TimeDelta::seconds(DEFAULT_CODE_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl = TimeDelta::seconds(seconds);
        self
    }

    #[must_use]
    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Persist a new code for `account_id`. Earlier codes for the account stay valid.
    ///
    /// # Errors
    /// Returns an error if the code cannot be stored.
    pub async fn issue(&self, account_id: i32) -> Result<IssuedCode> {
        let code = code::generate();
        let expires_at = self.clock.now() + self.ttl;

        self.codes.insert_code(account_id, &code, expires_at).await?;

        debug!(account_id, %expires_at, "Issued reset code");
        Ok(IssuedCode { code, expires_at })
    }

    /// The code if it exists and `now < expires_at`. Unknown and expired codes
    /// are indistinguishable to the caller.
    ///
    /// # Errors
    /// Returns an error if the store lookup fails.
    pub async fn lookup_valid(&self, code: &str) -> Result<Option<StoredCode>> {
        self.codes.find_valid_code(code, self.clock.now()).await
    }

    /// Remove the code. A missing row is fine and a store failure is only logged.
    pub async fn consume(&self, code: &str) {
        match self.codes.delete_code(code).await {
            Ok(0) => debug!("Reset code already removed"),
            Ok(_) => debug!("Reset code consumed"),
            Err(err) => warn!("Failed to delete consumed reset code: {err:#}"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Clock that only moves when told to.
    pub(crate) struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        pub(crate) fn new(start: DateTime<Utc>) -> Self {
            Self {
                now: Mutex::new(start),
            }
        }

        pub(crate) fn set(&self, to: DateTime<Utc>) {
            if let Ok(mut now) = self.now.lock() {
                *now = to;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
        }
    }

    pub(crate) fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn ledger() -> (Arc<MemoryStore>, Arc<ManualClock>, Ledger) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let ledger = Ledger::new(store.clone(), clock.clone());
        (store, clock, ledger)
    }

    #[tokio::test]
    async fn issue_sets_five_minute_expiry() -> Result<()> {
        let (store, _clock, ledger) = ledger();
        let issued = ledger.issue(7).await?;

        assert_eq!(issued.expires_at, start() + TimeDelta::minutes(5));
        assert_eq!(issued.code.len(), code::CODE_DIGITS);

        let stored = store.codes_for(7)?;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].code, issued.code);
        Ok(())
    }

    #[tokio::test]
    async fn valid_strictly_before_expiry() -> Result<()> {
        let (_store, clock, ledger) = ledger();
        let issued = ledger.issue(1).await?;

        clock.set(issued.expires_at - TimeDelta::milliseconds(1));
        assert!(ledger.lookup_valid(&issued.code).await?.is_some());

        clock.set(issued.expires_at);
        assert!(ledger.lookup_valid(&issued.code).await?.is_none());

        clock.set(issued.expires_at + TimeDelta::seconds(1));
        assert!(ledger.lookup_valid(&issued.code).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn expired_and_unknown_look_the_same() -> Result<()> {
        let (_store, clock, ledger) = ledger();
        let issued = ledger.issue(1).await?;
        clock.set(issued.expires_at + TimeDelta::minutes(1));

        let expired = ledger.lookup_valid(&issued.code).await?;
        let unknown = ledger.lookup_valid("not-a-code").await?;
        assert_eq!(expired, unknown);
        Ok(())
    }

    #[tokio::test]
    async fn consume_twice_is_a_noop() -> Result<()> {
        let (store, _clock, ledger) = ledger();
        let issued = ledger.issue(3).await?;

        ledger.consume(&issued.code).await;
        ledger.consume(&issued.code).await;

        assert!(store.codes_for(3)?.is_empty());
        assert!(ledger.lookup_valid(&issued.code).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn consume_swallows_store_failures() -> Result<()> {
        let (store, _clock, ledger) = ledger();
        let issued = ledger.issue(3).await?;
        store.set_fail_deletes(true)?;

        ledger.consume(&issued.code).await;

        assert_eq!(store.codes_for(3)?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn issuing_again_keeps_earlier_codes() -> Result<()> {
        let (_store, _clock, ledger) = ledger();
        let first = ledger.issue(9).await?;
        let second = ledger.issue(9).await?;

        assert!(ledger.lookup_valid(&first.code).await?.is_some());
        assert!(ledger.lookup_valid(&second.code).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn custom_ttl() -> Result<()> {
        let (_store, _clock, ledger) = ledger();
        let ledger = ledger.with_ttl_seconds(60);
        let issued = ledger.issue(1).await?;
        assert_eq!(issued.expires_at, start() + TimeDelta::seconds(60));
        Ok(())
    }
}
