use std::sync::Arc;

use tracing::info;

use super::{
    config::Config,
    database::{RedisStore, init_redis},
    error::AppError,
    fanout::FanOut,
    ledger::Ledger,
    memory::MemoryStore,
    registry::Registry,
    store::Store,
};

pub type SharedState = Arc<State>;

pub struct State {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub fanout: Arc<FanOut>,
    pub ledger: Ledger,
    pub registry: Registry,
}

impl State {
    pub async fn new() -> Result<SharedState, AppError> {
        let config = Config::load().map_err(|e| AppError::InternalError(Box::new(e)))?;

        let store: Arc<dyn Store> = match &config.redis_url {
            Some(redis_url) => {
                let connection = init_redis(redis_url)
                    .await
                    .map_err(|e| AppError::InternalError(Box::new(e)))?;
                Arc::new(RedisStore::new(connection))
            }
            None => {
                info!("REDIS_URL not set, using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let state = Self::with_store(config, store);

        if let Some(admin) = &state.config.admin {
            state
                .registry
                .seed_admin(&admin.username, &admin.password, &admin.full_name)
                .await?;
        }

        Ok(state)
    }

    /// Wires ledger and registry to one store and one fan-out.
    pub fn with_store(config: Config, store: Arc<dyn Store>) -> SharedState {
        let fanout = Arc::new(FanOut::new(config.broadcast_buffer));

        let ledger = Ledger::new(store.clone(), fanout.clone(), config.store_timeout);
        let registry = Registry::new(
            store.clone(),
            fanout.clone(),
            config.auto_approve_candidates,
        );

        Arc::new(Self {
            config,
            store,
            fanout,
            ledger,
            registry,
        })
    }
}
