use std::time::Duration;

use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("admission lock unavailable: {0}")]
    Unavailable(String),
    #[error("admission lock error: {0}")]
    Store(String),
}

/// Short-lived exclusive claims keyed by string. Every claim is owned by a
/// token; only that token can release it.
pub trait AdmissionLock: Send + Sync {
    /// Claims `key` for `ttl` on behalf of `token`. Returns `false` while any
    /// live claim exists on `key`.
    fn try_acquire<'a>(
        &'a self,
        key: &'a str,
        token: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool, LockError>>;

    /// Drops the claim on `key` if `token` still owns it. A claim that expired
    /// and was taken over stays with its new owner.
    fn release<'a>(&'a self, key: &'a str, token: &'a str) -> BoxFuture<'a, Result<(), LockError>>;
}
