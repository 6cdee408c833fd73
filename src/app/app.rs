//! Top-level application component.
//!
//! The [`App`] owns all global services and is the root for the application's functionality.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{read_config, ConfigError, ConfigHelper, ConfigSource};
use crate::fetch::{BatchDownloader, ContentFetcher};
use crate::report::{ReportSink, TracingReportSink};
use crate::repository::{CredentialChain, EnvCredentialResolver, RepositoryDescriptor};
use crate::resolve::{ResolutionOrchestrator, SideCache};
use crate::source::DeclarationSource;
use crate::sync::{SyncQueue, TrackingQueue};
use crate::util::CapacityManager;

const USER_AGENT: &str = concat!("artsync/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during App operations.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The HTTP client could not be built.
    #[error("failed to create HTTP client: {0}")]
    HttpClient(String),
}

/// Result type for App operations.
pub type Result<T> = std::result::Result<T, AppError>;

// =============================================================================
// Context Types
// =============================================================================

/// Context for creating an App.
#[derive(Default)]
pub struct AppContext {
    /// Source for configuration files.
    pub config_source: ConfigSource,
}

// =============================================================================
// App
// =============================================================================

/// The top-level application component.
///
/// Owns the configuration, the shared download pool and the resolution
/// orchestrator. Every queue built from one App resolves through the same
/// orchestrator, so identical dependencies never download twice at once.
pub struct App {
    config: ConfigHelper,
    repositories: Vec<RepositoryDescriptor>,
    downloader: BatchDownloader,
    orchestrator: Arc<ResolutionOrchestrator>,
    sink: Arc<dyn ReportSink>,
    scope: CancellationToken,
}

impl App {
    /// Create a new App with the given context.
    pub fn new(ctx: AppContext) -> Result<Self> {
        let config_result = read_config(&ctx.config_source)?;
        for warning in &config_result.warnings {
            warn!("{}", warning);
        }
        let config = ConfigHelper::new(config_result.config);
        let repositories = config.repositories()?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.config().network.connect_timeout.0)
            .build()
            .map_err(|e| AppError::HttpClient(e.to_string()))?;
        let fetcher = ContentFetcher::new(client).with_require_https(config.force_https());

        let credentials = CredentialChain::new()
            .with(EnvCredentialResolver::new())
            .with(config.static_credentials());
        let downloader = BatchDownloader::new(
            fetcher,
            CapacityManager::new(config.max_concurrent_downloads()),
            Arc::new(credentials),
            config.retry_policy(),
        );

        let side_cache = match config.side_cache_path() {
            Some(path) => SideCache::load(path),
            None => SideCache::in_memory(),
        };
        let orchestrator = ResolutionOrchestrator::new(
            downloader.clone(),
            config.cache_layout(),
            repositories.clone(),
            config.orchestrator_settings(),
        )
        .with_side_cache(Arc::new(side_cache));

        debug!(
            repositories = repositories.len(),
            pool = config.max_concurrent_downloads(),
            cache = %config.config().cache.path.display(),
            "app created"
        );

        Ok(Self {
            config,
            repositories,
            downloader,
            orchestrator: Arc::new(orchestrator),
            sink: Arc::new(TracingReportSink),
            scope: CancellationToken::new(),
        })
    }

    /// Replace the reporting sink used by queues created afterwards.
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Get the configuration helper.
    pub fn config(&self) -> &ConfigHelper {
        &self.config
    }

    /// Configured repositories in fallback order.
    pub fn repositories(&self) -> &[RepositoryDescriptor] {
        &self.repositories
    }

    pub fn downloader(&self) -> &BatchDownloader {
        &self.downloader
    }

    pub fn orchestrator(&self) -> &Arc<ResolutionOrchestrator> {
        &self.orchestrator
    }

    /// The root cancellation scope. Queues run in child scopes of it.
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Start a synchronization queue over `source`.
    pub fn sync_queue(&self, source: Arc<dyn DeclarationSource>) -> SyncQueue {
        SyncQueue::spawn(
            self.orchestrator.clone(),
            source,
            self.sink.clone(),
            &self.scope,
        )
    }

    /// Start a single-flight tracking queue over `source`.
    pub fn tracking_queue(&self, source: Arc<dyn DeclarationSource>) -> TrackingQueue {
        TrackingQueue::spawn(
            self.orchestrator.clone(),
            source,
            self.sink.clone(),
            &self.scope,
        )
    }
}
