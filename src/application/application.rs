// This is where we define the core application state shared by the
// webserver and the worker, and how to start it up.

use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::cache::CacheTier;
use crate::metrics::Metrics;
use crate::queue::store::JobStore;
use crate::storage::StorageLayout;
use crate::xrepo::db;
use crate::xrepo::git::{GitHost, NullGitHost};
use crate::xrepo::store::CrossRepoIndex;

use super::config::configuration::Configuration;
use super::logging::tracing::tracing_subscribe;

static LOGGER_INSTALLED: OnceCell<bool> = OnceCell::new();

#[derive(Clone)]
pub struct Application {
    // Arc here because this is shared by every request and job in flight
    pub config: Arc<Configuration>,
    pub storage: StorageLayout,
    pub caches: Arc<CacheTier>,
    pub xrepo: CrossRepoIndex,
    pub jobs: JobStore,
    pub metrics: Arc<Metrics>,
    pub git: Arc<dyn GitHost>,
}

impl Application {
    pub async fn initialize(config: Configuration) -> Result<Self> {
        Self::initialize_with_git_host(config, Arc::new(NullGitHost)).await
    }

    pub async fn initialize_with_git_host(
        config: Configuration,
        git: Arc<dyn GitHost>,
    ) -> Result<Self> {
        debug!(?config, "configuration after loading");

        let storage = StorageLayout::new(config.storage_root.clone());
        storage.ensure_layout().await?;

        let pool = db::connect(&config.shared_db_path()).await?;
        let xrepo = CrossRepoIndex::new(pool.clone());
        let jobs = JobStore::new(pool, config.job_backoff_base());

        storage.migrate_filenames(&xrepo).await?;

        let metrics = Arc::new(Metrics::new());
        let caches = Arc::new(CacheTier::new(config.cache_capacities(), &metrics));

        Ok(Self {
            config: Arc::new(config),
            storage,
            caches,
            xrepo,
            jobs,
            metrics,
            git,
        })
    }

    pub fn install_logging(config: &Configuration) {
        if let Some(true) = LOGGER_INSTALLED.get() {
            return;
        }

        if !tracing_subscribe(config) {
            warn!("a tracing subscriber is already registered; keeping it");
        };

        if color_eyre::install().is_err() {
            warn!("color-eyre hooks were already set up, skipping");
        };

        LOGGER_INSTALLED.set(true).unwrap();
    }

    pub fn backend(&self) -> Backend {
        Backend::new(self.caches.clone(), self.xrepo.clone(), self.storage.clone())
    }
}
