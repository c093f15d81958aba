//! How a new password is written to the account store.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2,
    password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasswordStorage {
    /// Salted Argon2id PHC string.
    #[default]
    Argon2,
    /// Store the password as received. Only for account stores that predate hashing.
    Plaintext,
}

impl PasswordStorage {
    /// Turn a plain password into the credential stored on the account.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn encode(self, password: &str) -> Result<String> {
        match self {
            Self::Argon2 => {
                let salt = SaltString::generate(&mut OsRng);
                let hash = Argon2::default()
                    .hash_password(password.as_bytes(), &salt)
                    .map_err(|e| anyhow!("Password hashing failed: {e}"))?;
                Ok(hash.to_string())
            }
            Self::Plaintext => Ok(password.to_string()),
        }
    }

    /// [`Self::encode`] on the blocking pool; Argon2 is CPU bound.
    ///
    /// # Errors
    /// Returns an error if hashing fails or the blocking task panics.
    pub async fn encode_blocking(self, password: String) -> Result<String> {
        tokio::task::spawn_blocking(move || self.encode(&password))
            .await
            .map_err(|e| anyhow!("Password hashing task failed: {e}"))?
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Argon2 => "argon2",
            Self::Plaintext => "plaintext",
        }
    }
}

impl fmt::Display for PasswordStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PasswordStorage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "argon2" => Ok(Self::Argon2),
            "plaintext" => Ok(Self::Plaintext),
            other => Err(format!(
                "invalid password storage '{other}', expected argon2 or plaintext"
            )),
        }
    }
}
