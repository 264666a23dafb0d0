use core::config::PipelineConfig;
use core::orchestrator::Orchestrator;
use core::scheduling::Ranker;
use core::weather::gateway::ForecastGateway;
use core::weather::store::SnapshotStore;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub gateway: ForecastGateway,
    pub store: SnapshotStore,
    pub ranker: Ranker,
    pub config: PipelineConfig,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: PipelineConfig) -> Self {
        let gateway = ForecastGateway::from_env(config.clone());
        let store = SnapshotStore::new(pool.clone());
        let ranker = Ranker::from_env(&config);
        let orchestrator = Arc::new(Orchestrator::new(
            pool.clone(),
            gateway.clone(),
            store.clone(),
            ranker.clone(),
            config.clone(),
        ));

        Self {
            pool,
            gateway,
            store,
            ranker,
            config,
            orchestrator,
        }
    }
}
