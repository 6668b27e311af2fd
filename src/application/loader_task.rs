//! Per-request loading task.
//!
//! Each task walks one request through cache check, resolve, decode,
//! transform, and delivery, with bounded retry and cooperative
//! cancellation. Progress is re-checked after every suspension point: a
//! task that became cancelled, completed, or obsolete (exit-early) unwinds
//! instead of doing further work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace, warn};

use crate::application::PipelineContext;
use crate::domain::cancellation::CancellationSignal;
use crate::domain::entities::{
    ImageInformation, ImageSource, LoadingResult, Priority, TaskParameter, base_key, compose_key,
};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{ImageHandle, Target};
use crate::infrastructure::decode::decoded_cost;

/// State machine driving one image-loading request.
///
/// Created per request and destroyed after the finish callback fires. The
/// callback contract is exact: finish fires exactly once on every outcome;
/// success and error are mutually exclusive and fire at most once; a
/// cancelled task fires neither success nor error.
pub struct ImageLoaderTask {
    parameters: TaskParameter,
    key: Option<String>,
    target: Option<Arc<dyn Target>>,
    context: Arc<PipelineContext>,
    signal: CancellationSignal,
    completed: AtomicBool,
    cancelled: AtomicBool,
    finished: AtomicBool,
    oom_cleared: AtomicBool,
}

impl std::fmt::Debug for ImageLoaderTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoaderTask")
            .field("key", &self.key)
            .field("completed", &self.is_completed())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ImageLoaderTask {
    /// Creates a task for `parameters`, delivering to `target` when given.
    #[must_use]
    pub fn new(
        parameters: TaskParameter,
        target: Option<Arc<dyn Target>>,
        context: Arc<PipelineContext>,
    ) -> Arc<Self> {
        let key = parameters.cache_key();
        Arc::new(Self {
            parameters,
            key,
            target,
            context,
            signal: CancellationSignal::new(),
            completed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            oom_cleared: AtomicBool::new(false),
        })
    }

    /// The full cache key, when one could be computed.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The cache key for `path`, falling back to the request's own path,
    /// with the request's ordered transformation keys appended. `None` when
    /// the effective path is empty.
    #[must_use]
    pub fn key_for(&self, path: Option<&str>) -> Option<String> {
        let tkeys: Vec<String> = self
            .parameters
            .transformations
            .iter()
            .map(|t| t.key())
            .collect();
        compose_key(path.unwrap_or_else(|| self.parameters.key_path()), &tkeys)
    }

    /// The request parameters.
    #[must_use]
    pub fn parameters(&self) -> &TaskParameter {
        &self.parameters
    }

    /// Scheduling priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.parameters.priority
    }

    /// Identity of the delivery destination, for coalescing.
    #[must_use]
    pub fn destination_id(&self) -> Option<u64> {
        self.target.as_ref().and_then(|target| target.destination_id())
    }

    /// True once the task delivered its result.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// True once the task was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The task's cancellation signal.
    #[must_use]
    pub fn signal(&self) -> &CancellationSignal {
        &self.signal
    }

    /// Cancels the task: raises the signal and fires the finish callback.
    /// The success callback can no longer fire. Removing the task from the
    /// pending queue is the scheduler's job; a cancelled task that is still
    /// queued is skipped at dequeue.
    pub fn cancel(&self) {
        if self.is_completed() || self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(key = ?self.key, "task cancelled");
        self.signal.cancel();
        self.finish();
    }

    /// Abandons the task without treating it as an error: only the finish
    /// callback fires. Used when exit-early is set at admission.
    pub(crate) fn abandon(&self) {
        trace!(key = ?self.key, "task abandoned");
        self.finish();
    }

    /// The synchronous-fast-path phase: checks the memory cache, then the
    /// disk cache, completing the task on a hit. Returns true when the task
    /// was completed here and must not be queued.
    pub async fn prepare_and_try_load_from_cache(&self) -> bool {
        if !self.should_continue() {
            return false;
        }
        let Some(key) = self.key.clone() else {
            return false;
        };

        if let Some((image, info)) = self.context.memory_cache.get(&key) {
            trace!(key = %key, "fast path: memory cache hit");
            self.deliver_success(image, info, LoadingResult::MemoryCache);
            self.complete();
            self.finish();
            return true;
        }

        // The disk cache stores raw payloads under the base key; a hit
        // still pays decode+transform, but skips resolve and the queue.
        let base = base_key(&key).to_string();
        if let Some(bytes) = self.context.disk_cache.get_bytes(&base).await {
            if !self.should_continue() {
                return false;
            }
            let info = ImageInformation::new(self.parameters.source.identifier.clone());
            match self
                .generate_and_deliver(bytes, LoadingResult::DiskCache, info)
                .await
            {
                Ok(()) => {
                    self.finish();
                    return true;
                }
                Err(err) if err.is_cancellation() => return false,
                Err(err) => {
                    // Unusable payload: purge it so the queued pipeline
                    // fetches fresh data instead of re-reading it.
                    warn!(key = %base, error = %err, "disk cache payload unusable, purging");
                    self.context.disk_cache.remove(&base).await;
                }
            }
        }
        false
    }

    /// Runs the full pipeline with the retry loop. Called from a worker
    /// slot after the fast path missed.
    pub async fn run(&self) {
        if !self.should_continue() {
            self.finish();
            return;
        }

        if let Some(source) = self.parameters.loading_placeholder.clone() {
            self.deliver_placeholder(source).await;
        }

        let mut attempts_left = self.parameters.retry_count;
        let failure = loop {
            match self.try_generate().await {
                Ok(()) => break None,
                Err(err) if err.is_cancellation() => break Some(err),
                Err(LoadError::OutOfMemory)
                    if !self.oom_cleared.swap(true, Ordering::SeqCst) =>
                {
                    // One uncharged retry after releasing the biggest
                    // memory consumer we control.
                    warn!(key = ?self.key, "out of memory, clearing memory cache and retrying");
                    self.context.memory_cache.clear();
                }
                Err(err) if err.is_retriable() && attempts_left > 0 => {
                    attempts_left -= 1;
                    debug!(
                        key = ?self.key,
                        remaining = attempts_left,
                        delay_ms = self.parameters.retry_delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(self.parameters.retry_delay) => {}
                        () = self.signal.cancelled() => break Some(LoadError::Cancelled),
                    }
                    if !self.should_continue() {
                        break Some(LoadError::Cancelled);
                    }
                }
                Err(err) => break Some(err),
            }
        };

        if let Some(err) = failure
            && !err.is_cancellation()
            && !self.is_cancelled()
            && !self.is_completed()
        {
            debug!(key = ?self.key, error = %err, "task failed");
            if let Some(source) = self.parameters.error_placeholder.clone() {
                self.deliver_placeholder(source).await;
            } else {
                self.deliver_empty();
            }
            self.fire_error(&err);
        }

        self.finish();
    }

    /// One generation attempt: resolve, buffer, decode, transform, deliver.
    async fn try_generate(&self) -> LoadResult<()> {
        self.ensure_active()?;

        // A concurrent task for the same key may have landed meanwhile.
        if let Some(key) = &self.key
            && let Some((image, info)) = self.context.memory_cache.get(key)
        {
            self.deliver_success(image, info, LoadingResult::MemoryCache);
            self.complete();
            return Ok(());
        }

        let data = self
            .context
            .resolver
            .resolve(&self.parameters.source.identifier, &self.parameters, &self.signal)
            .await?;
        self.ensure_active()?;

        let mut reader = data.reader;
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await.map_err(LoadError::from)?;
        self.ensure_active()?;

        self.generate_and_deliver(Bytes::from(buffer), data.result, data.info)
            .await
    }

    /// Decodes and transforms `bytes` under the decode gate, stores the
    /// result in the memory cache, and delivers it.
    async fn generate_and_deliver(
        &self,
        bytes: Bytes,
        result: LoadingResult,
        mut info: ImageInformation,
    ) -> LoadResult<()> {
        let permit = tokio::select! {
            permit = self.context.decode_gate.acquire() => {
                permit.map_err(|_| LoadError::Cancelled)?
            }
            () = self.signal.cancelled() => return Err(LoadError::Cancelled),
        };
        self.ensure_active()?;

        let decoder = self.context.decoder.clone();
        let transformations = self.parameters.transformations.clone();
        let downsample = self.parameters.downsample;
        type Generated = (image::DynamicImage, (u32, u32));
        let generated = tokio::task::spawn_blocking(move || -> LoadResult<Generated> {
            let decoded = decoder.decode(&bytes, downsample)?;
            let decoded_dimensions = (decoded.width(), decoded.height());
            let mut current = decoded;
            for transformation in &transformations {
                current = transformation.transform(current)?;
            }
            Ok((current, decoded_dimensions))
        })
        .await
        .map_err(|err| LoadError::Io(format!("decode task panicked: {err}")))??;
        drop(permit);
        self.ensure_active()?;

        let (image, (decoded_width, decoded_height)) = generated;
        info.set_original_dimensions(decoded_width, decoded_height);
        info.set_current_dimensions(image.width(), image.height());
        if let Some(key) = &self.key {
            info.cache_key = Some(key.clone());
        }

        let image: ImageHandle = Arc::new(image);
        if let Some(key) = &self.key {
            let cost = decoded_cost(&image);
            self.context
                .memory_cache
                .add(key, info.clone(), image.clone(), cost);
        }

        self.deliver_success(image, info, result);
        self.complete();
        Ok(())
    }

    /// Best-effort placeholder delivery; failures are logged and ignored.
    async fn deliver_placeholder(&self, source: ImageSource) {
        if self.target.is_none() || self.is_cancelled() {
            return;
        }
        let placeholder_params = TaskParameter::builder(source.clone()).build();
        let resolved = self
            .context
            .resolver
            .resolve(&source.identifier, &placeholder_params, &self.signal)
            .await;
        let mut data = match resolved {
            Ok(data) => data,
            Err(err) => {
                debug!(identifier = %source.identifier, error = %err, "placeholder resolve failed");
                return;
            }
        };
        let mut buffer = Vec::new();
        if data.reader.read_to_end(&mut buffer).await.is_err() {
            return;
        }
        let decoder = self.context.decoder.clone();
        let bytes = Bytes::from(buffer);
        let decoded =
            tokio::task::spawn_blocking(move || decoder.decode(&bytes, None)).await;
        if let Ok(Ok(image)) = decoded {
            let image: ImageHandle = Arc::new(image);
            let target = self.target.clone();
            let signal = self.signal.clone();
            let info = data.info;
            self.context.dispatcher.post(Box::new(move || {
                if signal.is_cancelled() {
                    return;
                }
                if let Some(target) = target
                    && target.is_valid()
                {
                    target.set(&image, &info);
                }
            }));
        }
    }

    fn deliver_success(&self, image: ImageHandle, info: ImageInformation, result: LoadingResult) {
        let target = self.target.clone();
        let callback = self.parameters.take_on_success();
        let signal = self.signal.clone();
        debug!(key = ?self.key, source = %result, "image loaded");
        self.context.dispatcher.post(Box::new(move || {
            if signal.is_cancelled() {
                return;
            }
            if let Some(target) = target
                && target.is_valid()
            {
                target.set(&image, &info);
            }
            if let Some(callback) = callback {
                callback(&info, result);
            }
        }));
    }

    fn deliver_empty(&self) {
        let Some(target) = self.target.clone() else {
            return;
        };
        let signal = self.signal.clone();
        self.context.dispatcher.post(Box::new(move || {
            if !signal.is_cancelled() && target.is_valid() {
                target.set_as_empty();
            }
        }));
    }

    fn fire_error(&self, err: &LoadError) {
        if let Some(callback) = self.parameters.take_on_error() {
            let err = err.clone();
            self.context
                .dispatcher
                .post(Box::new(move || callback(&err)));
        }
    }

    /// Fires the finish callback exactly once and drops the parameter
    /// closures.
    fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(callback) = self.parameters.take_on_finish() {
            self.context.dispatcher.post(callback);
        }
        self.parameters.dispose();
    }

    fn complete(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }

    fn should_continue(&self) -> bool {
        !self.is_completed()
            && !self.is_cancelled()
            && !self.signal.is_cancelled()
            && !self.context.exit_tasks_early()
    }

    fn ensure_active(&self) -> LoadResult<()> {
        if self.should_continue() {
            Ok(())
        } else {
            Err(LoadError::Cancelled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{make_context, make_context_with_decoder, png_bytes};
    use crate::domain::entities::{ImageSource, ImageType};
    use crate::domain::ports::{DataResolver, Decoder, MockTarget, ResolvedData};
    use crate::infrastructure::decode::DefaultDecoder;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct CountingResolver {
        calls: AtomicU32,
        delay: Duration,
        outcome: fn() -> LoadResult<Vec<u8>>,
    }

    impl CountingResolver {
        fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
                outcome: || Ok(png_bytes()),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                delay,
                outcome: || Ok(png_bytes()),
            })
        }

        fn failing_transient() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
                outcome: || Err(LoadError::TransientIo("flaky network".into())),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl DataResolver for CountingResolver {
        async fn resolve(
            &self,
            identifier: &str,
            _parameters: &TaskParameter,
            signal: &CancellationSignal,
        ) -> LoadResult<ResolvedData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(self.delay) => {}
                    () = signal.cancelled() => return Err(LoadError::Cancelled),
                }
            }
            let bytes = (self.outcome)()?;
            Ok(ResolvedData {
                reader: Box::new(std::io::Cursor::new(bytes)),
                result: LoadingResult::Internet,
                info: ImageInformation::new(identifier),
            })
        }
    }

    struct Callbacks {
        success: Arc<AtomicU32>,
        error: Arc<AtomicU32>,
        finish: Arc<AtomicU32>,
    }

    fn instrumented(builder: crate::domain::entities::TaskParameterBuilder) -> (TaskParameter, Callbacks) {
        let success = Arc::new(AtomicU32::new(0));
        let error = Arc::new(AtomicU32::new(0));
        let finish = Arc::new(AtomicU32::new(0));
        let params = builder
            .on_success({
                let success = success.clone();
                move |_, _| {
                    success.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_error({
                let error = error.clone();
                move |_| {
                    error.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_finish({
                let finish = finish.clone();
                move || {
                    finish.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build();
        (params, Callbacks { success, error, finish })
    }

    #[tokio::test]
    async fn test_successful_run_fires_success_and_finish_once() {
        let resolver = CountingResolver::succeeding();
        let (context, _dir) = make_context(resolver.clone()).await;
        let (params, callbacks) =
            instrumented(TaskParameter::builder(ImageSource::url("https://x/a.png")));
        let task = ImageLoaderTask::new(params, None, context.clone());

        task.run().await;

        assert!(task.is_completed());
        assert_eq!(resolver.calls(), 1);
        assert_eq!(callbacks.success.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.error.load(Ordering::SeqCst), 0);
        assert_eq!(callbacks.finish.load(Ordering::SeqCst), 1);
        // The decoded image landed in the memory cache under the full key.
        assert!(context.memory_cache.get("https://x/a.png").is_some());
    }

    #[tokio::test]
    async fn test_retry_count_three_invokes_resolver_four_times() {
        let resolver = CountingResolver::failing_transient();
        let (context, _dir) = make_context(resolver.clone()).await;
        let (params, callbacks) = instrumented(
            TaskParameter::builder(ImageSource::url("https://x/flaky.png"))
                .retry(3, Duration::from_millis(1)),
        );
        let task = ImageLoaderTask::new(params, None, context);

        task.run().await;

        assert_eq!(resolver.calls(), 4);
        assert_eq!(callbacks.success.load(Ordering::SeqCst), 0);
        assert_eq!(callbacks.error.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.finish.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_completion_suppresses_success() {
        let resolver = CountingResolver::slow(Duration::from_millis(100));
        let (context, _dir) = make_context(resolver).await;
        let (params, callbacks) =
            instrumented(TaskParameter::builder(ImageSource::url("https://x/slow.png")));
        let task = ImageLoaderTask::new(params, None, context);

        let runner = {
            let task = task.clone();
            tokio::spawn(async move { task.run().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        task.cancel();
        runner.await.unwrap();

        assert!(task.is_cancelled());
        assert!(!task.is_completed());
        assert_eq!(callbacks.success.load(Ordering::SeqCst), 0);
        assert_eq!(callbacks.error.load(Ordering::SeqCst), 0);
        assert_eq!(callbacks.finish.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_task_never_enters_pipeline() {
        let resolver = CountingResolver::succeeding();
        let (context, _dir) = make_context(resolver.clone()).await;
        let (params, callbacks) =
            instrumented(TaskParameter::builder(ImageSource::url("https://x/a.png")));
        let task = ImageLoaderTask::new(params, None, context);

        task.cancel();
        task.run().await;

        assert_eq!(resolver.calls(), 0);
        assert_eq!(callbacks.finish.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.success.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exit_tasks_early_abandons_without_error() {
        let resolver = CountingResolver::succeeding();
        let (context, _dir) = make_context(resolver.clone()).await;
        context.set_exit_tasks_early(true);
        let (params, callbacks) =
            instrumented(TaskParameter::builder(ImageSource::url("https://x/a.png")));
        let task = ImageLoaderTask::new(params, None, context);

        task.run().await;

        assert_eq!(resolver.calls(), 0);
        assert_eq!(callbacks.success.load(Ordering::SeqCst), 0);
        assert_eq!(callbacks.error.load(Ordering::SeqCst), 0);
        assert_eq!(callbacks.finish.load(Ordering::SeqCst), 1);
    }

    struct OomDecoder {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl Decoder for OomDecoder {
        fn decode(
            &self,
            bytes: &[u8],
            downsample: Option<(u32, u32)>,
        ) -> LoadResult<image::DynamicImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(LoadError::OutOfMemory);
            }
            DefaultDecoder.decode(bytes, downsample)
        }
    }

    #[tokio::test]
    async fn test_oom_clears_memory_cache_and_retries_uncharged() {
        let resolver = CountingResolver::succeeding();
        let decoder = Arc::new(OomDecoder {
            failures: AtomicU32::new(1),
            calls: AtomicU32::new(0),
        });
        let (context, _dir) =
            make_context_with_decoder(resolver, decoder.clone()).await;

        // Seed an unrelated entry so the clear is observable.
        context.memory_cache.add(
            "unrelated",
            ImageInformation::new("unrelated"),
            Arc::new(image::DynamicImage::new_rgb8(1, 1)),
            4,
        );

        let (params, callbacks) =
            instrumented(TaskParameter::builder(ImageSource::url("https://x/big.png")));
        let task = ImageLoaderTask::new(params, None, context.clone());
        task.run().await;

        assert_eq!(decoder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(callbacks.success.load(Ordering::SeqCst), 1);
        assert!(context.memory_cache.get("unrelated").is_none());
    }

    #[tokio::test]
    async fn test_second_oom_is_a_failure() {
        let resolver = CountingResolver::succeeding();
        let decoder = Arc::new(OomDecoder {
            failures: AtomicU32::new(u32::MAX),
            calls: AtomicU32::new(0),
        });
        let (context, _dir) = make_context_with_decoder(resolver, decoder.clone()).await;

        let (params, callbacks) =
            instrumented(TaskParameter::builder(ImageSource::url("https://x/big.png")));
        let task = ImageLoaderTask::new(params, None, context);
        task.run().await;

        // Initial attempt plus the single uncharged retry.
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(callbacks.success.load(Ordering::SeqCst), 0);
        assert_eq!(callbacks.error.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.finish.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fast_path_memory_hit() {
        let resolver = CountingResolver::succeeding();
        let (context, _dir) = make_context(resolver.clone()).await;
        context.memory_cache.add(
            "https://x/hot.png",
            ImageInformation::new("https://x/hot.png"),
            Arc::new(image::DynamicImage::new_rgb8(1, 1)),
            4,
        );

        let (params, callbacks) =
            instrumented(TaskParameter::builder(ImageSource::url("https://x/hot.png")));
        let task = ImageLoaderTask::new(params, None, context);

        assert!(task.prepare_and_try_load_from_cache().await);
        assert!(task.is_completed());
        assert_eq!(resolver.calls(), 0);
        assert_eq!(callbacks.success.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.finish.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fast_path_disk_hit_decodes_and_populates_memory() {
        let resolver = CountingResolver::succeeding();
        let (context, _dir) = make_context(resolver.clone()).await;
        context
            .disk_cache
            .add_to_saving_queue_if_not_exists(
                "https://x/warm.png",
                Bytes::from(png_bytes()),
                Duration::from_secs(3600),
            )
            .await;
        context.disk_cache.flush().await;

        let (params, callbacks) =
            instrumented(TaskParameter::builder(ImageSource::url("https://x/warm.png")));
        let task = ImageLoaderTask::new(params, None, context.clone());

        assert!(task.prepare_and_try_load_from_cache().await);
        assert_eq!(resolver.calls(), 0);
        assert_eq!(callbacks.success.load(Ordering::SeqCst), 1);
        assert!(context.memory_cache.get("https://x/warm.png").is_some());
    }

    #[tokio::test]
    async fn test_fast_path_miss_returns_false() {
        let resolver = CountingResolver::succeeding();
        let (context, _dir) = make_context(resolver).await;
        let (params, callbacks) =
            instrumented(TaskParameter::builder(ImageSource::url("https://x/cold.png")));
        let task = ImageLoaderTask::new(params, None, context);

        assert!(!task.prepare_and_try_load_from_cache().await);
        assert!(!task.is_completed());
        assert_eq!(callbacks.finish.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_delivers_to_target() {
        let resolver = CountingResolver::succeeding();
        let (context, _dir) = make_context(resolver).await;

        let mut target = MockTarget::new();
        target.expect_is_valid().return_const(true);
        target
            .expect_set()
            .times(1)
            .withf(|_, info| info.image_type == ImageType::Png)
            .return_const(());

        let (params, _callbacks) =
            instrumented(TaskParameter::builder(ImageSource::url("https://x/a.png")));
        let task = ImageLoaderTask::new(params, Some(Arc::new(target)), context);
        task.run().await;
        assert!(task.is_completed());
    }

    #[tokio::test]
    async fn test_failure_without_placeholder_sets_target_empty() {
        let resolver = CountingResolver::failing_transient();
        let (context, _dir) = make_context(resolver).await;

        let mut target = MockTarget::new();
        target.expect_is_valid().return_const(true);
        target.expect_set_as_empty().times(1).return_const(());

        let (params, callbacks) =
            instrumented(TaskParameter::builder(ImageSource::url("https://x/gone.png")));
        let task = ImageLoaderTask::new(params, Some(Arc::new(target)), context);
        task.run().await;

        assert_eq!(callbacks.error.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_key_for_uses_override_path() {
        let resolver = CountingResolver::succeeding();
        let (context, _dir) = make_context(resolver).await;
        let params = TaskParameter::builder(ImageSource::url("https://x/a.png")).build();
        let task = ImageLoaderTask::new(params, None, context);

        assert_eq!(task.key_for(None).as_deref(), Some("https://x/a.png"));
        assert_eq!(task.key_for(Some("other")).as_deref(), Some("other"));
        assert_eq!(task.key_for(Some("")), None);
    }
}
