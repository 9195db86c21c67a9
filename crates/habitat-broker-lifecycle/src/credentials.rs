//! Credential issuance.
//!
//! Secrets get a random name suffix, so a create can collide with an
//! existing secret. The issuer keeps drawing fresh names until one sticks
//! or the attempt window closes. A freshly created secret may not be
//! readable right away, so [`CredentialIssuer::verify_secret_exists`] polls
//! for it under the same window.

use std::sync::Arc;
use std::time::Duration;

use habitat_broker_core::config::CredentialsSection;
use habitat_broker_store::{ObjectStore, Secret, StoreError};
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BrokerError, BrokerResult};

/// Length of the random suffix appended to secret names.
pub const SECRET_SUFFIX_LEN: usize = 5;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A random string of lowercase letters and digits.
pub fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Timing of issue and verify loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wall-clock budget for one loop, measured from its first attempt.
    pub attempt_window: Duration,
    /// Pause between attempts.
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_window: Duration::from_secs(15),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl From<&CredentialsSection> for RetryPolicy {
    fn from(section: &CredentialsSection) -> Self {
        Self {
            attempt_window: section.attempt_window(),
            poll_interval: section.poll_interval(),
        }
    }
}

pub struct CredentialIssuer {
    store: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
}

impl CredentialIssuer {
    pub fn new(store: Arc<dyn ObjectStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Create a secret named `{name_prefix}-{suffix}` holding a single
    /// `data_key = data_value` entry.
    ///
    /// Name collisions are retried with a new suffix. Any other store error
    /// aborts immediately.
    pub async fn issue_secret(
        &self,
        name_prefix: &str,
        data_key: &str,
        data_value: &str,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> BrokerResult<Secret> {
        let deadline = Instant::now() + self.policy.attempt_window;
        let mut attempts = 0u32;

        loop {
            if Instant::now() >= deadline {
                return Err(BrokerError::RetriesExhausted(format!(
                    "could not create a secret with prefix {name_prefix} in namespace {namespace} \
                     after {attempts} attempts"
                )));
            }
            if cancel.is_cancelled() {
                return Err(cancelled("secret issuance"));
            }

            attempts += 1;
            let name = format!("{name_prefix}-{}", random_token(SECRET_SUFFIX_LEN));
            let secret = Secret::single(namespace, &name, data_key, data_value);

            match self.store.create_secret(&secret).await {
                Ok(created) => {
                    debug!(secret = %created.name, %namespace, attempts, "secret created");
                    return Ok(created);
                }
                Err(StoreError::AlreadyExists(_)) => {
                    warn!(secret = %name, %namespace, attempt = attempts, "secret name taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }

            self.pause(cancel, "secret issuance").await?;
        }
    }

    /// Wait until the named secret can be read back.
    ///
    /// `NotFound` is retried; any other store error aborts immediately.
    pub async fn verify_secret_exists(
        &self,
        name: &str,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> BrokerResult<()> {
        let deadline = Instant::now() + self.policy.attempt_window;
        let mut attempts = 0u32;

        loop {
            if Instant::now() >= deadline {
                return Err(BrokerError::RetriesExhausted(format!(
                    "secret {namespace}/{name} not visible after {attempts} attempts"
                )));
            }
            if cancel.is_cancelled() {
                return Err(cancelled("secret verification"));
            }

            attempts += 1;
            match self.store.get_secret(namespace, name).await {
                Ok(_) => {
                    debug!(secret = %name, %namespace, attempts, "secret verified");
                    return Ok(());
                }
                Err(StoreError::NotFound(_)) => {
                    debug!(secret = %name, %namespace, attempt = attempts, "secret not visible yet");
                }
                Err(e) => return Err(e.into()),
            }

            self.pause(cancel, "secret verification").await?;
        }
    }

    async fn pause(&self, cancel: &CancellationToken, what: &str) -> BrokerResult<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(cancelled(what)),
            _ = tokio::time::sleep(self.policy.poll_interval) => Ok(()),
        }
    }
}

fn cancelled(what: &str) -> BrokerError {
    BrokerError::Cancelled(format!("{what} was cancelled"))
}
