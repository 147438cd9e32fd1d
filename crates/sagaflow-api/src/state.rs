//! Shared application state.
//!
//! Pins the engine's generic components to their production backends: the
//! SQLite stores and queue, the HTTP tool executor, and the in-memory
//! read cache. Everything here is cheap to clone; the pool and the Arcs
//! are shared across the HTTP layer, the worker, and the relay tick.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use sagaflow_core::breaker::BreakerRegistry;
use sagaflow_core::lock::LockManager;
use sagaflow_core::relay::OutboxRelay;
use sagaflow_core::scheduler::StepScheduler;
use sagaflow_core::tracer::ExecutionTracer;
use sagaflow_infra::cache::MemoryCacheStore;
use sagaflow_infra::config::{data_dir, load_engine_config};
use sagaflow_infra::planner::HttpPlanProvider;
use sagaflow_infra::sqlite::execution::SqliteExecutionStore;
use sagaflow_infra::sqlite::lock::SqliteLockStore;
use sagaflow_infra::sqlite::outbox::SqliteOutboxStore;
use sagaflow_infra::sqlite::pool::{default_database_url, DatabasePool};
use sagaflow_infra::sqlite::queue::SqliteStepQueue;
use sagaflow_infra::tools::HttpToolExecutor;
use sagaflow_types::config::EngineConfig;

const DEFAULT_TOOL_ENDPOINT: &str = "http://127.0.0.1:9100";

pub type ConcreteScheduler =
    StepScheduler<SqliteExecutionStore, SqliteLockStore, SqliteStepQueue, HttpToolExecutor>;
pub type ConcreteRelay = OutboxRelay<SqliteOutboxStore, Arc<MemoryCacheStore>>;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<ConcreteScheduler>,
    pub relay: Arc<ConcreteRelay>,
    pub planner: Option<Arc<HttpPlanProvider>>,
    pub store: SqliteExecutionStore,
    pub queue: SqliteStepQueue,
    pub cache: Arc<MemoryCacheStore>,
    pub config: EngineConfig,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize from the data directory: load config, open the database,
    /// and wire the engine components together.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;
        let config = load_engine_config(&data_dir).await;
        let db_pool = DatabasePool::new(&default_database_url()).await?;
        Ok(Self::with_pool(db_pool, config, data_dir))
    }

    pub fn with_pool(db_pool: DatabasePool, config: EngineConfig, data_dir: PathBuf) -> Self {
        let tracer = ExecutionTracer::new(1024);
        let store = SqliteExecutionStore::new(db_pool.clone());
        let queue = SqliteStepQueue::new(db_pool.clone(), config.visibility_timeout_ms);
        let locks = LockManager::new(
            SqliteLockStore::new(db_pool.clone()),
            config.step_lock_ttl_seconds,
            config.lock_grace_seconds,
            tracer.clone(),
        );
        let tools = HttpToolExecutor::new(
            config
                .tool_endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_TOOL_ENDPOINT.to_string()),
            HashMap::new(),
        );
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let scheduler = Arc::new(StepScheduler::new(
            store.clone(),
            locks,
            queue.clone(),
            tools,
            breakers,
            tracer.clone(),
            config.clone(),
        ));

        let cache = Arc::new(MemoryCacheStore::new());
        let relay = Arc::new(OutboxRelay::new(
            SqliteOutboxStore::new(db_pool.clone()),
            cache.clone(),
            config.relay_batch_size,
            tracer,
        ));
        let planner = config
            .planner_url
            .clone()
            .map(|url| Arc::new(HttpPlanProvider::new(url)));

        Self {
            scheduler,
            relay,
            planner,
            store,
            queue,
            cache,
            config,
            data_dir,
            db_pool,
        }
    }
}

#[cfg(test)]
pub(crate) async fn test_state() -> AppState {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let data_dir = dir.path().to_path_buf();
    std::mem::forget(dir);
    let pool = DatabasePool::new(&url).await.unwrap();
    AppState::with_pool(pool, EngineConfig::default(), data_dir)
}
