use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::BoxFuture;
use crate::ports::admission::{AdmissionLock, LockError};
use crate::quest::IdentityField;
use crate::util::uuid_v7_without_dashes;

#[derive(Clone, Debug)]
pub struct AdmissionConfig {
    /// Lifetime of a claim whose holder never releases it.
    pub lock_ttl: Duration,
    /// How long a contended attempt waits for the current holder to finish.
    pub claim_wait: Duration,
    pub claim_poll: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            claim_wait: Duration::from_secs(10),
            claim_poll: Duration::from_millis(25),
        }
    }
}

/// Lock keys for one admission attempt, sorted so that overlapping requests
/// always claim in the same order.
pub fn admission_keys(
    table: &str,
    quest_id: &str,
    identities: &[(IdentityField, String)],
) -> Vec<String> {
    let mut keys = identities
        .iter()
        .map(|(field, value)| {
            format!("admission:{table}:{quest_id}:{}={value}", field.column())
        })
        .collect::<Vec<_>>();
    keys.sort();
    keys.dedup();
    keys
}

/// Keys held by one admission attempt under a single owner token.
///
/// Call [`AdmissionClaims::release`] when the attempt finishes. If the
/// attempt is cancelled first (request timeout, client gone) the drop hands
/// the release to a background task so the keys do not linger for the TTL.
pub struct AdmissionClaims {
    lock: Arc<dyn AdmissionLock>,
    token: String,
    keys: Vec<String>,
}

impl AdmissionClaims {
    /// Claims every key in order. A key held elsewhere is polled until
    /// `claim_wait` runs out, then the attempt gives up with
    /// [`DomainError::AdmissionBusy`].
    pub async fn acquire(
        lock: Arc<dyn AdmissionLock>,
        keys: Vec<String>,
        config: &AdmissionConfig,
    ) -> DomainResult<Self> {
        let mut claims = Self {
            lock,
            token: uuid_v7_without_dashes(),
            keys: Vec::with_capacity(keys.len()),
        };
        let deadline = Instant::now() + config.claim_wait;

        for key in keys {
            loop {
                let acquired = match claims
                    .lock
                    .try_acquire(&key, &claims.token, config.lock_ttl)
                    .await
                {
                    Ok(acquired) => acquired,
                    Err(err) => {
                        claims.release().await;
                        return Err(DomainError::Store(err.to_string()));
                    }
                };
                if acquired {
                    break;
                }
                if Instant::now() >= deadline {
                    tracing::info!(key = %key, "admission key still claimed after waiting");
                    claims.release().await;
                    return Err(DomainError::AdmissionBusy);
                }
                tokio::time::sleep(config.claim_poll).await;
            }
            claims.keys.push(key);
        }
        Ok(claims)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Releases in reverse claim order. A key leaves the set only once its
    /// release call returned, so a cancelled release still gets finished by
    /// the drop.
    pub async fn release(mut self) {
        while let Some(key) = self.keys.last() {
            if let Err(err) = self.lock.release(key, &self.token).await {
                tracing::warn!(error = %err, key = %key, "failed to release admission key");
            }
            self.keys.pop();
        }
    }
}

impl Drop for AdmissionClaims {
    fn drop(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        let keys = std::mem::take(&mut self.keys);
        let token = std::mem::take(&mut self.token);
        let lock = Arc::clone(&self.lock);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for key in keys.iter().rev() {
                        if let Err(err) = lock.release(key, &token).await {
                            tracing::warn!(
                                error = %err,
                                key = %key,
                                "failed to release abandoned admission key"
                            );
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    keys = keys.len(),
                    "admission claims dropped outside a runtime; leaving them to expire"
                );
            }
        }
    }
}

#[derive(Clone, Debug)]
struct Claim {
    token: String,
    expires_at: Option<Instant>,
}

impl Claim {
    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryAdmissionLock {
    inner: Arc<Mutex<HashMap<String, Claim>>>,
}

impl InMemoryAdmissionLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn holder(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .get(key)
            .filter(|claim| claim.is_live())
            .map(|claim| claim.token.clone())
    }
}

impl AdmissionLock for InMemoryAdmissionLock {
    fn try_acquire<'a>(
        &'a self,
        key: &'a str,
        token: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool, LockError>> {
        Box::pin(async move {
            let mut guard = self.inner.lock().await;
            if let Some(claim) = guard.get(key)
                && claim.is_live()
            {
                return Ok(false);
            }
            let expires_at = if ttl.is_zero() {
                None
            } else {
                Some(Instant::now() + ttl)
            };
            guard.insert(
                key.to_string(),
                Claim {
                    token: token.to_string(),
                    expires_at,
                },
            );
            Ok(true)
        })
    }

    fn release<'a>(&'a self, key: &'a str, token: &'a str) -> BoxFuture<'a, Result<(), LockError>> {
        Box::pin(async move {
            let mut guard = self.inner.lock().await;
            if guard.get(key).is_some_and(|claim| claim.token == token) {
                guard.remove(key);
            }
            Ok(())
        })
    }
}
