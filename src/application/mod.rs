//! Application layer: the scheduling pipeline.
//!
//! [`WorkScheduler`] admits requests, [`PendingTasksQueue`] orders the ones
//! that missed the caches, and [`ImageLoaderTask`] drives each request
//! through resolve, decode, transform, and delivery.

mod loader_task;
mod pending_queue;
mod scheduler;

pub use loader_task::ImageLoaderTask;
pub use pending_queue::PendingTasksQueue;
pub use scheduler::WorkScheduler;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;

use crate::domain::ports::{DataResolver, Decoder, MainThreadDispatcher};
use crate::infrastructure::config::PipelineConfig;
use crate::infrastructure::disk_cache::DiskCache;
use crate::infrastructure::memory_cache::MemoryCache;

/// Everything a running task needs, constructed once and shared.
///
/// An explicit context object instead of ambient globals: multiple
/// independent pipelines can coexist, and tests get deterministic setup and
/// teardown.
pub struct PipelineContext {
    /// Pipeline configuration.
    pub config: PipelineConfig,
    /// Decoded-image cache.
    pub memory_cache: Arc<MemoryCache>,
    /// Raw-payload cache.
    pub disk_cache: Arc<DiskCache>,
    /// The (wrapped) resolver chain.
    pub resolver: Arc<dyn DataResolver>,
    /// Decoder used by every task.
    pub decoder: Arc<dyn Decoder>,
    /// Callback marshaling boundary.
    pub dispatcher: Arc<dyn MainThreadDispatcher>,
    /// Bounds concurrent decode+transform work, independently of the
    /// worker pool.
    pub decode_gate: Arc<Semaphore>,
    exit_tasks_early: AtomicBool,
    pause_work: AtomicBool,
}

impl PipelineContext {
    /// Assembles a context from its parts.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        memory_cache: Arc<MemoryCache>,
        disk_cache: Arc<DiskCache>,
        resolver: Arc<dyn DataResolver>,
        decoder: Arc<dyn Decoder>,
        dispatcher: Arc<dyn MainThreadDispatcher>,
    ) -> Self {
        let decode_gate = Arc::new(Semaphore::new(config.max_parallel_decodes.max(1)));
        Self {
            config,
            memory_cache,
            disk_cache,
            resolver,
            decoder,
            dispatcher,
            decode_gate,
            exit_tasks_early: AtomicBool::new(false),
            pause_work: AtomicBool::new(false),
        }
    }

    /// True when tasks should abandon work at their next check point.
    #[must_use]
    pub fn exit_tasks_early(&self) -> bool {
        self.exit_tasks_early.load(Ordering::SeqCst)
    }

    pub(crate) fn set_exit_tasks_early(&self, value: bool) {
        self.exit_tasks_early.store(value, Ordering::SeqCst);
    }

    /// True while new and queued work is being cancelled instead of run.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pause_work.load(Ordering::SeqCst)
    }

    pub(crate) fn set_paused(&self, value: bool) {
        self.pause_work.store(value, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::domain::ports::InlineDispatcher;
    use crate::infrastructure::decode::DefaultDecoder;
    use crate::infrastructure::resolvers::WrappedResolver;
    use image::ImageEncoder;
    use tempfile::TempDir;

    /// Installs a test-friendly tracing subscriber; safe to call from
    /// every test, only the first call wins.
    pub(crate) fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// A minimal valid PNG payload for resolver stubs.
    pub(crate) fn png_bytes() -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(2, 2);
        let mut out = Vec::new();
        image::codecs::png::PngEncoder::new(&mut out)
            .write_image(img.as_bytes(), 2, 2, image::ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    pub(crate) async fn make_context(
        resolver: Arc<dyn DataResolver>,
    ) -> (Arc<PipelineContext>, TempDir) {
        make_context_with_decoder(resolver, Arc::new(DefaultDecoder)).await
    }

    pub(crate) async fn make_context_with_decoder(
        resolver: Arc<dyn DataResolver>,
        decoder: Arc<dyn Decoder>,
    ) -> (Arc<PipelineContext>, TempDir) {
        init_tracing();
        // Tasks see the same wrapped chain the service wires up.
        let resolver: Arc<dyn DataResolver> = Arc::new(WrappedResolver::new(resolver));
        let dir = TempDir::new().unwrap();
        let disk_cache = Arc::new(
            DiskCache::new(dir.path().to_path_buf(), 1024 * 1024)
                .await
                .unwrap(),
        );
        let memory_cache = Arc::new(MemoryCache::new(Some(16 * 1024 * 1024)));
        let config = PipelineConfig {
            max_parallel_tasks: 2,
            max_parallel_decodes: 2,
            ..PipelineConfig::default()
        };
        let context = Arc::new(PipelineContext::new(
            config,
            memory_cache,
            disk_cache,
            resolver,
            decoder,
            Arc::new(InlineDispatcher),
        ));
        (context, dir)
    }
}
