//! The service facade: an explicit context object wiring configuration,
//! caches, resolvers, and the scheduler together.
//!
//! There are no ambient singletons: every [`ImageService`] is an
//! independent pipeline, so applications can run several side by side and
//! tests get deterministic setup and teardown.

use std::sync::Arc;

use tracing::info;

use crate::application::{ImageLoaderTask, PipelineContext, WorkScheduler};
use crate::domain::entities::{TaskParameter, base_key};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{
    Decoder, HttpTransport, InlineDispatcher, MainThreadDispatcher, Target,
};
use crate::infrastructure::config::PipelineConfig;
use crate::infrastructure::decode::DefaultDecoder;
use crate::infrastructure::disk_cache::DiskCache;
use crate::infrastructure::download::{DownloadCache, ReqwestTransport, RetryPolicy};
use crate::infrastructure::memory_cache::{CacheStats, MemoryCache};
use crate::infrastructure::resolvers::{BundleResolver, CompositeResolver, WrappedResolver};

/// Which cache layer an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    /// The in-memory decoded-image cache.
    Memory,
    /// The persistent raw-payload cache.
    Disk,
    /// Both layers.
    All,
}

/// Builder for [`ImageService`].
pub struct ImageServiceBuilder {
    config: PipelineConfig,
    decoder: Option<Arc<dyn Decoder>>,
    dispatcher: Option<Arc<dyn MainThreadDispatcher>>,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl ImageServiceBuilder {
    /// Starts a builder over the given configuration.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            decoder: None,
            dispatcher: None,
            transport: None,
        }
    }

    /// Replaces the default decoder.
    #[must_use]
    pub fn decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Replaces the inline dispatcher, e.g. with a UI-thread marshaler.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn MainThreadDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Replaces the default HTTP transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the service: opens the disk cache, constructs the caches and
    /// resolver chain, and starts the scheduler.
    ///
    /// # Errors
    /// Returns [`LoadError::Io`] when the disk cache cannot be opened or
    /// the HTTP client cannot be built.
    pub async fn build(self) -> LoadResult<ImageService> {
        let config = self.config;

        let disk_cache = Arc::new(
            DiskCache::new(config.resolved_cache_dir(), config.disk_cache_size)
                .await
                .map_err(|err| LoadError::Io(format!("failed to open disk cache: {err}")))?,
        );
        let memory_cache = Arc::new(MemoryCache::new(config.memory_cache_budget));

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(
                config.http_header_timeout,
                config.http_read_timeout,
            )?),
        };
        let retry = RetryPolicy {
            attempts: config.download_attempts,
            interval: config.download_retry_interval,
        };
        let download_cache = Arc::new(DownloadCache::new(disk_cache.clone(), transport, retry));

        let bundle = Arc::new(BundleResolver::new());
        let resolver = Arc::new(WrappedResolver::new(Arc::new(CompositeResolver::new(
            download_cache.clone(),
            bundle.clone(),
        ))));

        let decoder = self.decoder.unwrap_or_else(|| Arc::new(DefaultDecoder));
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(InlineDispatcher));

        let context = Arc::new(PipelineContext::new(
            config,
            memory_cache,
            disk_cache,
            resolver,
            decoder,
            dispatcher,
        ));
        let scheduler = WorkScheduler::new(context.clone());

        info!(budget = context.memory_cache.budget(), "image service ready");
        Ok(ImageService {
            context,
            scheduler,
            download_cache,
            bundle,
        })
    }
}

/// An independent image-loading pipeline.
pub struct ImageService {
    context: Arc<PipelineContext>,
    scheduler: WorkScheduler,
    download_cache: Arc<DownloadCache>,
    bundle: Arc<BundleResolver>,
}

impl std::fmt::Debug for ImageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageService")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl ImageService {
    /// Starts building a service.
    #[must_use]
    pub fn builder(config: PipelineConfig) -> ImageServiceBuilder {
        ImageServiceBuilder::new(config)
    }

    /// Submits a request. Cache hits complete before this returns; misses
    /// are scheduled. The returned task handle can be cancelled or
    /// inspected.
    pub async fn load_image(
        &self,
        parameters: TaskParameter,
        target: Option<Arc<dyn Target>>,
    ) -> Arc<ImageLoaderTask> {
        let task = ImageLoaderTask::new(parameters, target, self.context.clone());
        self.scheduler.load_image(task.clone()).await;
        task
    }

    /// Cancels a task and removes it from the pending queue.
    pub fn cancel(&self, task: &Arc<ImageLoaderTask>) {
        self.scheduler.cancel(task);
    }

    /// Prefetches several sources into the caches, with no delivery
    /// target. Returns the task handles; admission happens concurrently.
    pub async fn prefetch(&self, requests: Vec<TaskParameter>) -> Vec<Arc<ImageLoaderTask>> {
        let tasks: Vec<Arc<ImageLoaderTask>> = requests
            .into_iter()
            .map(|parameters| ImageLoaderTask::new(parameters, None, self.context.clone()))
            .collect();
        futures_util::future::join_all(
            tasks
                .iter()
                .map(|task| self.scheduler.load_image(task.clone())),
        )
        .await;
        tasks
    }

    /// Invalidates one cache entry: the key itself, every transformed
    /// variant of its base key in memory, and the base payload on disk.
    pub async fn invalidate_cache_entry(&self, key: &str, cache_type: CacheType) {
        let base = base_key(key).to_string();
        if matches!(cache_type, CacheType::Memory | CacheType::All) {
            self.context.memory_cache.remove(key);
            self.context.memory_cache.remove_similar(&base);
        }
        if matches!(cache_type, CacheType::Disk | CacheType::All) {
            self.context.disk_cache.remove(&base).await;
        }
    }

    /// Clears one or both cache layers.
    pub async fn clear_cache(&self, cache_type: CacheType) {
        if matches!(cache_type, CacheType::Memory | CacheType::All) {
            self.context.memory_cache.clear();
        }
        if matches!(cache_type, CacheType::Disk | CacheType::All) {
            self.context.disk_cache.clear().await;
        }
    }

    /// Pauses or resumes work; see
    /// [`WorkScheduler::set_pause_work`].
    pub fn set_pause_work(&self, paused: bool) {
        self.scheduler.set_pause_work(paused);
    }

    /// Sets the exit-early flag; see
    /// [`WorkScheduler::set_exit_tasks_early`].
    pub fn set_exit_tasks_early(&self, exit: bool) {
        self.scheduler.set_exit_tasks_early(exit);
    }

    /// Number of queued (not yet running) tasks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// Memory cache statistics.
    #[must_use]
    pub fn memory_stats(&self) -> CacheStats {
        self.context.memory_cache.stats()
    }

    /// Registers a named bundle/embedded resource.
    pub fn register_resource(&self, name: impl Into<String>, bytes: impl Into<bytes::Bytes>) {
        self.bundle.register(name, bytes);
    }

    /// Waits until queued disk writes are durable. Useful at shutdown and
    /// in tests.
    pub async fn flush_disk_writes(&self) {
        self.context.disk_cache.flush().await;
    }

    /// The shared pipeline context.
    #[must_use]
    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }

    /// The download cache coordinating URL fetches.
    #[must_use]
    pub fn download_cache(&self) -> &Arc<DownloadCache> {
        &self.download_cache
    }
}
