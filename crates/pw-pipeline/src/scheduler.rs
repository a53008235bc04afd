//! Fixed-interval scheduler
//!
//! Owns every shared component and drives the pipeline either once or on a
//! fixed interval. Ticks are strictly serial; a failed tick is logged and
//! the loop continues. The repository's same-day overwrite makes a
//! partially-completed tick harmless: the next one restores convergence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use pw_adapters::registry::AdapterRegistry;
use pw_adapters::search::WebSearch;
use pw_aggregator::AggregatorClient;
use pw_config::Config;
use pw_store::PricingRepo;
use pw_types::AppResult;

use crate::backend_sync::BackendSync;
use crate::discovery::ModelDiscovery;
use crate::pipeline::PricingPipeline;
use crate::validate::PricingValidator;

pub struct Scheduler {
    config: Config,
    pipeline: PricingPipeline,
    backend_sync: BackendSync,
}

impl Scheduler {
    /// Wire up every component from configuration. HTTP clients and the
    /// repository are long-lived and shared across all ticks.
    pub fn new(config: Config) -> AppResult<Self> {
        let timeout = config.request_timeout();

        let aggregator = Arc::new(AggregatorClient::new(&config.aggregator, timeout)?);
        let repo = Arc::new(PricingRepo::new(&config.pricing_store, timeout)?);
        let search = Arc::new(WebSearch::new(config.web_search_key.clone(), timeout)?);
        let registry = Arc::new(AdapterRegistry::new(
            search,
            config.trusted_price_domains.clone(),
        ));
        let validator = Arc::new(PricingValidator::new(
            repo.clone(),
            config.price_change_threshold_percent,
            config.max_reasonable_price,
        ));
        let discovery = ModelDiscovery::new(
            aggregator.clone(),
            repo.clone(),
            config.model_filters.clone(),
        );
        let pipeline = PricingPipeline::new(
            &config,
            aggregator,
            repo.clone(),
            registry,
            validator,
            discovery,
        );
        let backend_sync = BackendSync::new(&config, repo)?;

        Ok(Self {
            config,
            pipeline,
            backend_sync,
        })
    }

    /// Run a single tick and return its outcome.
    pub async fn run_once(&self) -> AppResult<()> {
        self.tick(1).await
    }

    /// Run forever on the configured interval. Tick failures never stop the
    /// loop; ctrl-c during the sleep shuts down cleanly.
    pub async fn run_loop(&self) -> AppResult<()> {
        let interval = Duration::from_secs(self.config.run_interval_hours * 3600);

        info!(
            interval_hours = self.config.run_interval_hours,
            run_on_startup = self.config.run_on_startup,
            backend_sync_enabled = self.backend_sync.enabled(),
            "scheduler started"
        );

        let mut iteration: u64 = 0;

        loop {
            iteration += 1;
            let started = Instant::now();

            if iteration == 1 && !self.config.run_on_startup {
                info!("skipping initial run");
            } else if let Err(e) = self.tick(iteration).await {
                error!(iteration, error = %e, "scheduler_iteration_failed");
            }

            let sleep_for = interval.saturating_sub(started.elapsed());
            info!(
                sleep_secs = sleep_for.as_secs(),
                next_iteration = iteration + 1,
                "scheduler sleeping"
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("scheduler stopped");
                    return Ok(());
                }
            }
        }
    }

    async fn tick(&self, iteration: u64) -> AppResult<()> {
        let started = Instant::now();
        info!(iteration, "scheduler_iteration_started");

        if self.backend_sync.enabled() {
            // Informational: the sync that follows stages these anyway.
            if let Err(e) = self.backend_sync.missing_in_backend().await {
                warn!(error = %e, "missing-models check failed");
            }
        }

        self.pipeline.run().await?;

        if self.backend_sync.enabled() {
            self.backend_sync.run().await?;
        } else {
            info!("backend_sync_disabled");
        }

        info!(
            iteration,
            duration_secs = started.elapsed().as_secs_f64(),
            "scheduler_iteration_completed"
        );
        Ok(())
    }
}
