//! Application container
//!
//! The explicit application-scope container passed into controllers: no
//! module-level singletons. Initialization is staged (database, redis, blob
//! store, LLM gateway, sandbox broker, message broker, each idempotent to
//! retry at the process level) and `shutdown` runs in reverse order.

use crate::blob::BlobStore;
use crate::broker::{self, Broker, ConsumerSpec, Handler, SessionPendingEvent, SkillLearnEvent};
use crate::config::CoreConfig;
use crate::controller::{ingest, skill_learn};
use crate::error::{EngineError, Result};
use crate::llm::{self, LlmProvider};
use crate::lock::LockCoordinator;
use crate::sandbox::SandboxBroker;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct App {
    pub config: CoreConfig,
    pub pool: PgPool,
    pub locks: LockCoordinator,
    pub blob: BlobStore,
    pub llm: Arc<dyn LlmProvider>,
    pub sandbox: SandboxBroker,
    pub broker: Broker,
}

impl App {
    /// Bring every subsystem up, in dependency order.
    pub async fn init(config: CoreConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let pool = crate::storage::connect(&config).await?;
        crate::storage::run_migrations(&pool).await?;

        let locks = LockCoordinator::connect(&config.redis_url).await?;
        let blob = BlobStore::new(&config);
        let llm = llm::build_provider(&config);
        llm::sanity_check(llm.as_ref()).await?;

        let sandbox = SandboxBroker::new(&config, pool.clone(), blob.clone())?;
        let broker = Broker::connect(&config).await?;

        info!("engine initialized");
        Ok(Arc::new(Self {
            config,
            pool,
            locks,
            blob,
            llm,
            sandbox,
            broker,
        }))
    }

    /// Register the pipeline consumers on their queues.
    pub async fn register_consumers(app: &Arc<Self>) -> Result<()> {
        let bindings = broker::topology();
        let find = |exchange: &str| {
            bindings
                .iter()
                .find(|b| b.exchange == exchange)
                .cloned()
                .ok_or_else(|| EngineError::bad_request(format!("unknown exchange {exchange}")))
        };
        let handler_timeout = Duration::from_secs(app.config.mq_consumer_handler_timeout_secs);
        let retry_delay_unit = Duration::from_millis(app.config.mq_retry_delay_unit_ms);

        let session_app = app.clone();
        let session_handler: Handler = Arc::new(move |payload| {
            let app = session_app.clone();
            Box::pin(async move {
                let event: SessionPendingEvent = serde_json::from_slice(&payload)?;
                ingest::process_session_pending(&app, &event).await
            })
        });
        app.broker
            .register_consumer(
                ConsumerSpec {
                    binding: find(broker::exchanges::SESSION_PENDING)?,
                    max_retries: app.config.mq_default_max_retries,
                    retry_delay_unit,
                    handler_timeout,
                },
                session_handler,
            )
            .await?;

        let learn_app = app.clone();
        let learn_handler: Handler = Arc::new(move |payload| {
            let app = learn_app.clone();
            Box::pin(async move {
                let event: SkillLearnEvent = serde_json::from_slice(&payload)?;
                skill_learn::process_skill_learning(&app, &event).await
            })
        });
        app.broker
            .register_consumer(
                ConsumerSpec {
                    binding: find(broker::exchanges::LEARNING_SKILL)?,
                    max_retries: app.config.mq_default_max_retries,
                    retry_delay_unit,
                    handler_timeout,
                },
                learn_handler,
            )
            .await?;

        info!("pipeline consumers registered");
        Ok(())
    }

    /// Tear down in reverse init order.
    pub async fn shutdown(&self) {
        self.pool.close().await;
        info!("engine shut down");
    }
}
