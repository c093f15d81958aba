//! In-memory stores for tests.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};

use super::{Account, AccountStore, ResetCodeStore, StoredCode, StoredTransport, TransportStore};
use crate::mail::TransportConfig;

#[derive(Default)]
struct State {
    accounts: Vec<(Account, String)>,
    codes: Vec<(u64, StoredCode)>,
    transports: Vec<StoredTransport>,
    next_code_seq: u64,
    fail_deletes: bool,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    pub(crate) fn add_account(&self, email: &str, password: &str) -> Result<i32> {
        let mut state = self.state()?;
        let id = i32::try_from(state.accounts.len())? + 1;
        state.accounts.push((
            Account {
                id,
                email: email.to_string(),
            },
            password.to_string(),
        ));
        Ok(id)
    }

    pub(crate) fn password_of(&self, id: i32) -> Result<Option<String>> {
        Ok(self
            .state()?
            .accounts
            .iter()
            .find(|(account, _)| account.id == id)
            .map(|(_, password)| password.clone()))
    }

    pub(crate) fn codes_for(&self, account_id: i32) -> Result<Vec<StoredCode>> {
        Ok(self
            .state()?
            .codes
            .iter()
            .filter(|(_, code)| code.account_id == account_id)
            .map(|(_, code)| code.clone())
            .collect())
    }

    pub(crate) fn active_count(&self) -> Result<usize> {
        Ok(self
            .state()?
            .transports
            .iter()
            .filter(|transport| transport.is_active)
            .count())
    }

    pub(crate) fn set_fail_deletes(&self, fail: bool) -> Result<()> {
        self.state()?.fail_deletes = fail;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(self
            .state()?
            .accounts
            .iter()
            .find(|(account, _)| account.email.to_lowercase() == email)
            .map(|(account, _)| account.clone()))
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<Account>> {
        Ok(self
            .state()?
            .accounts
            .iter()
            .find(|(account, _)| account.id == id)
            .map(|(account, _)| account.clone()))
    }

    async fn update_password(&self, id: i32, credential: &str) -> Result<bool> {
        let mut state = self.state()?;
        match state.accounts.iter_mut().find(|(account, _)| account.id == id) {
            Some((_, password)) => {
                *password = credential.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ResetCodeStore for MemoryStore {
    async fn insert_code(
        &self,
        account_id: i32,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state()?;
        state.next_code_seq += 1;
        let seq = state.next_code_seq;
        state.codes.push((
            seq,
            StoredCode {
                account_id,
                code: code.to_string(),
                expires_at,
            },
        ));
        Ok(())
    }

    async fn find_valid_code(&self, code: &str, now: DateTime<Utc>) -> Result<Option<StoredCode>> {
        Ok(self
            .state()?
            .codes
            .iter()
            .filter(|(_, stored)| stored.code == code && stored.expires_at > now)
            .max_by_key(|(seq, _)| *seq)
            .map(|(_, stored)| stored.clone()))
    }

    async fn delete_code(&self, code: &str) -> Result<u64> {
        let mut state = self.state()?;
        if state.fail_deletes {
            bail!("delete refused");
        }
        let before = state.codes.len();
        state.codes.retain(|(_, stored)| stored.code != code);
        Ok(u64::try_from(before - state.codes.len())?)
    }
}

#[async_trait]
impl TransportStore for MemoryStore {
    async fn active_transport(&self) -> Result<Option<StoredTransport>> {
        Ok(self
            .state()?
            .transports
            .iter()
            .rev()
            .find(|transport| transport.is_active)
            .cloned())
    }

    async fn activate_transport(&self, config: &TransportConfig) -> Result<StoredTransport> {
        let mut state = self.state()?;
        for transport in &mut state.transports {
            transport.is_active = false;
        }
        let now = Utc::now();
        let stored = StoredTransport {
            id: i32::try_from(state.transports.len())? + 1,
            config: config.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.transports.push(stored.clone());
        Ok(stored)
    }

    async fn update_active_transport(
        &self,
        config: &TransportConfig,
    ) -> Result<Option<StoredTransport>> {
        let mut state = self.state()?;
        Ok(state
            .transports
            .iter_mut()
            .rev()
            .find(|transport| transport.is_active)
            .map(|transport| {
                transport.config = config.clone();
                transport.updated_at = Utc::now();
                transport.clone()
            }))
    }

    async fn deactivate_transports(&self) -> Result<u64> {
        let mut state = self.state()?;
        let mut touched = 0;
        for transport in state.transports.iter_mut().filter(|t| t.is_active) {
            transport.is_active = false;
            touched += 1;
        }
        Ok(touched)
    }
}
