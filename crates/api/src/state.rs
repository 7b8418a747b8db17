use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use questline_domain::admission::{AdmissionConfig, InMemoryAdmissionLock};
use questline_domain::ports::admission::AdmissionLock;
use questline_domain::ports::store::RecordStore;
use questline_domain::quest::QuestType;
use questline_domain::records::InMemoryRecordStore;
use questline_domain::submissions::SubmissionService;
use questline_infra::admission::RedisAdmissionLock;
use questline_infra::config::{
    AppConfig, DATA_BACKEND_MEMORY, DATA_BACKEND_REST, LOCK_BACKEND_MEMORY, LOCK_BACKEND_REDIS,
};
use questline_infra::rest_store::RestRecordStore;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub submissions: SubmissionService,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn RecordStore> = match config.data_backend.as_str() {
            DATA_BACKEND_REST => Arc::new(RestRecordStore::from_config(&config)?),
            DATA_BACKEND_MEMORY => Arc::new(memory_store()),
            other => bail!("unknown data_backend '{other}'"),
        };
        let lock: Arc<dyn AdmissionLock> = match config.lock_backend.as_str() {
            LOCK_BACKEND_REDIS => Arc::new(RedisAdmissionLock::connect(&config.redis_url).await?),
            LOCK_BACKEND_MEMORY => Arc::new(InMemoryAdmissionLock::new()),
            other => bail!("unknown lock_backend '{other}'"),
        };
        tracing::info!(
            data_backend = store.name(),
            lock_backend = %config.lock_backend,
            "backends ready"
        );
        Ok(Self::with_backends(config, store, lock))
    }

    pub fn with_backends(
        config: AppConfig,
        store: Arc<dyn RecordStore>,
        lock: Arc<dyn AdmissionLock>,
    ) -> Self {
        let admission = AdmissionConfig {
            lock_ttl: Duration::from_millis(config.admission_lock_ttl_ms),
            claim_wait: Duration::from_millis(config.admission_claim_wait_ms),
            ..AdmissionConfig::default()
        };
        Self {
            config,
            submissions: SubmissionService::new(store, lock, admission),
        }
    }
}

/// In-memory store carrying the same `(quest_id, identity)` uniqueness the
/// hosted tables declare.
pub fn memory_store() -> InMemoryRecordStore {
    QuestType::ALL
        .into_iter()
        .flat_map(|quest_type| {
            quest_type
                .required_identities()
                .iter()
                .map(move |field| (quest_type.pending_table(), field.column()))
        })
        .fold(InMemoryRecordStore::new(), |store, (table, column)| {
            store.with_unique(table, ["quest_id", column])
        })
}
