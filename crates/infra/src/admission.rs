use std::time::Duration;

use questline_domain::ports::BoxFuture;
use questline_domain::ports::admission::{AdmissionLock, LockError};
use redis::Script;
use redis::aio::ConnectionManager;

const DEFAULT_PREFIX: &str = "questline:lock";

/// Deletes the key only while it still holds the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisAdmissionLock {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisAdmissionLock {
    pub async fn connect(redis_url: &str) -> Result<Self, LockError> {
        Self::connect_with_prefix(redis_url, DEFAULT_PREFIX).await
    }

    pub async fn connect_with_prefix(
        redis_url: &str,
        prefix: impl Into<String>,
    ) -> Result<Self, LockError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| LockError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| LockError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
        })
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    fn ttl_ms(ttl: Duration) -> u64 {
        let ms = ttl.as_millis() as u64;
        if ms == 0 { 1 } else { ms }
    }
}

impl AdmissionLock for RedisAdmissionLock {
    fn try_acquire<'a>(
        &'a self,
        key: &'a str,
        token: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool, LockError>> {
        let lock_key = self.lock_key(key);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let result: Option<String> = redis::cmd("SET")
                .arg(&lock_key)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(Self::ttl_ms(ttl))
                .query_async(&mut conn)
                .await
                .map_err(|err| LockError::Store(err.to_string()))?;
            Ok(result.is_some())
        })
    }

    fn release<'a>(&'a self, key: &'a str, token: &'a str) -> BoxFuture<'a, Result<(), LockError>> {
        let lock_key = self.lock_key(key);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let removed: i64 = Script::new(RELEASE_SCRIPT)
                .key(&lock_key)
                .arg(token)
                .invoke_async(&mut conn)
                .await
                .map_err(|err| LockError::Store(err.to_string()))?;
            if removed == 0 {
                tracing::debug!(key = %lock_key, "admission claim already expired or taken over");
            }
            Ok(())
        })
    }
}
