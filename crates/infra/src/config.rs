use serde::Deserialize;

pub const DATA_BACKEND_MEMORY: &str = "memory";
pub const DATA_BACKEND_REST: &str = "rest";
pub const LOCK_BACKEND_MEMORY: &str = "memory";
pub const LOCK_BACKEND_REDIS: &str = "redis";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub data_backend: String,
    pub store_url: String,
    pub store_api_key: String,
    pub store_timeout_ms: u64,
    pub allowed_origin: String,
    pub lock_backend: String,
    pub redis_url: String,
    pub admission_lock_ttl_ms: u64,
    pub admission_claim_wait_ms: u64,
    pub request_timeout_ms: u64,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = Self::builder()?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        let config: Self = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// An admission runs up to three store calls while holding its claims, so
    /// the claim TTL must outlast all of them. A waiting attempt must give up
    /// before the request timeout cuts it off.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let store_budget_ms = self.store_timeout_ms.saturating_mul(3);
        if self.admission_lock_ttl_ms <= store_budget_ms {
            return Err(config::ConfigError::Message(format!(
                "admission_lock_ttl_ms ({}) must exceed three store calls ({store_budget_ms} ms)",
                self.admission_lock_ttl_ms
            )));
        }
        if self.admission_claim_wait_ms >= self.request_timeout_ms {
            return Err(config::ConfigError::Message(format!(
                "admission_claim_wait_ms ({}) must be below request_timeout_ms ({})",
                self.admission_claim_wait_ms, self.request_timeout_ms
            )));
        }
        Ok(())
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError>
    {
        config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("data_backend", DATA_BACKEND_MEMORY)?
            .set_default("store_url", "")?
            .set_default("store_api_key", "")?
            .set_default("store_timeout_ms", 8_000)?
            .set_default("allowed_origin", "https://jupcatdemy.com")?
            .set_default("lock_backend", LOCK_BACKEND_MEMORY)?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("admission_lock_ttl_ms", 30_000)?
            .set_default("admission_claim_wait_ms", 10_000)?
            .set_default("request_timeout_ms", 30_000)?
            .set_default("rate_limit_per_second", 50)?
            .set_default("rate_limit_burst", 100)
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn is_test(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("test")
    }
}
