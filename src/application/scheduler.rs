//! Admission control and the bounded worker pool.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, trace};

use crate::application::loader_task::ImageLoaderTask;
use crate::application::pending_queue::PendingTasksQueue;
use crate::application::PipelineContext;

/// Admits, orders, de-duplicates, and cancels image-loading tasks.
///
/// Cache hits are completed synchronously on the caller's async task and
/// never enter the worker pool. Misses are queued by priority and drained
/// by up to `max_parallel_tasks` concurrent workers. A slot freed by a
/// cancelled task admits the next-highest-priority task in the same drain
/// cycle: every enqueue and every task completion triggers exactly one
/// dispatch attempt, and dequeued tasks that are already cancelled are
/// skipped without consuming the slot.
pub struct WorkScheduler {
    context: Arc<PipelineContext>,
    queue: Arc<PendingTasksQueue>,
    workers: Arc<Semaphore>,
}

impl std::fmt::Debug for WorkScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkScheduler")
            .field("pending", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl WorkScheduler {
    /// Creates a scheduler over the shared context.
    #[must_use]
    pub fn new(context: Arc<PipelineContext>) -> Self {
        let workers = Arc::new(Semaphore::new(context.config.max_parallel_tasks.max(1)));
        Self {
            context,
            queue: Arc::new(PendingTasksQueue::new()),
            workers,
        }
    }

    /// Admits a task: completes it synchronously on a cache hit, queues it
    /// otherwise. While paused, new tasks are cancelled instead.
    pub async fn load_image(&self, task: Arc<ImageLoaderTask>) {
        if self.context.is_paused() {
            debug!(key = ?task.key(), "work paused, cancelling incoming task");
            task.cancel();
            return;
        }

        if task.prepare_and_try_load_from_cache().await {
            trace!(key = ?task.key(), "completed on the cache fast path");
            return;
        }
        if task.is_cancelled() || task.is_completed() {
            return;
        }
        if self.context.exit_tasks_early() {
            task.abandon();
            return;
        }

        let stale = self.queue.cancel_when_same_destination(&task);
        if stale > 0 {
            debug!(count = stale, "coalesced stale tasks for reused destination");
        }
        self.queue.enqueue(task);
        self.dispatch();
    }

    /// Cancels a task and removes it from the pending queue.
    pub fn cancel(&self, task: &Arc<ImageLoaderTask>) {
        self.queue.remove(task);
        task.cancel();
    }

    /// Removes a task from the pending queue without cancelling it.
    pub fn remove_pending_task(&self, task: &Arc<ImageLoaderTask>) {
        self.queue.remove(task);
    }

    /// Pauses or resumes work. Pausing cancels every queued task and every
    /// task submitted while paused.
    pub fn set_pause_work(&self, paused: bool) {
        self.context.set_paused(paused);
        debug!(paused = paused, "pause state changed");
        if paused {
            let drained = self.queue.drain();
            for task in &drained {
                task.cancel();
            }
            if !drained.is_empty() {
                debug!(count = drained.len(), "cancelled queued tasks on pause");
            }
        }
    }

    /// Sets the exit-early flag. Running tasks abandon work at their next
    /// check point; queued tasks abandon at pipeline entry.
    pub fn set_exit_tasks_early(&self, exit: bool) {
        self.context.set_exit_tasks_early(exit);
        debug!(exit = exit, "exit-early state changed");
    }

    /// Number of queued (not yet running) tasks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Spawns one drain pass over the queue.
    fn dispatch(&self) {
        let queue = self.queue.clone();
        let workers = self.workers.clone();
        let context = self.context.clone();
        tokio::spawn(drain(queue, workers, context));
    }
}

/// Runs queued tasks until the queue is empty, one at a time per acquired
/// worker permit. Several drain passes may run concurrently; the semaphore
/// bounds how many tasks actually execute.
async fn drain(
    queue: Arc<PendingTasksQueue>,
    workers: Arc<Semaphore>,
    context: Arc<PipelineContext>,
) {
    loop {
        let Ok(permit) = workers.clone().acquire_owned().await else {
            return;
        };
        let Some(task) = next_live(&queue, &context) else {
            return;
        };
        task.run().await;
        drop(permit);
        if queue.is_empty() {
            return;
        }
    }
}

/// Pops until a runnable task is found. Cancelled or completed tasks are
/// dropped without consuming the worker slot; while paused, queued tasks
/// are cancelled instead of run.
fn next_live(
    queue: &PendingTasksQueue,
    context: &PipelineContext,
) -> Option<Arc<ImageLoaderTask>> {
    while let Some(task) = queue.dequeue() {
        if task.is_cancelled() || task.is_completed() {
            continue;
        }
        if context.is_paused() {
            task.cancel();
            continue;
        }
        return Some(task);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{make_context, png_bytes};
    use crate::domain::cancellation::CancellationSignal;
    use crate::domain::entities::{
        ImageInformation, ImageSource, LoadingResult, TaskParameter,
    };
    use crate::domain::errors::{LoadError, LoadResult};
    use crate::domain::ports::{DataResolver, ResolvedData, Target};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct SlowResolver {
        calls: AtomicU32,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl DataResolver for SlowResolver {
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
            Ok(ResolvedData {
                reader: Box::new(std::io::Cursor::new(png_bytes())),
                result: LoadingResult::Internet,
                info: ImageInformation::new(identifier),
            })
        }
    }

    struct Destination(u64);

    impl Target for Destination {
        fn set(
            &self,
            _image: &crate::domain::ports::ImageHandle,
            _info: &ImageInformation,
        ) {
        }
        fn set_as_empty(&self) {}
        fn is_valid(&self) -> bool {
            true
        }
        fn destination_id(&self) -> Option<u64> {
            Some(self.0)
        }
    }

    fn counted_task(
        context: &Arc<PipelineContext>,
        url: &str,
        target: Option<Arc<dyn Target>>,
    ) -> (Arc<ImageLoaderTask>, Arc<AtomicU32>, Arc<AtomicU32>) {
        let success = Arc::new(AtomicU32::new(0));
        let finish = Arc::new(AtomicU32::new(0));
        let params = TaskParameter::builder(ImageSource::url(url))
            .on_success({
                let success = success.clone();
                move |_, _| {
                    success.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_finish({
                let finish = finish.clone();
                move || {
                    finish.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build();
        (
            ImageLoaderTask::new(params, target, context.clone()),
            success,
            finish,
        )
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_miss_is_queued_and_completed_by_a_worker() {
        let resolver = Arc::new(SlowResolver {
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        });
        let (context, _dir) = make_context(resolver.clone()).await;
        let scheduler = WorkScheduler::new(context);

        let (task, success, finish) =
            counted_task(&scheduler.context, "https://x/a.png", None);
        scheduler.load_image(task.clone()).await;

        wait_until(|| task.is_completed()).await;
        assert_eq!(success.load(Ordering::SeqCst), 1);
        assert_eq!(finish.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_fast_path_skips_queue() {
        let resolver = Arc::new(SlowResolver {
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        });
        let (context, _dir) = make_context(resolver.clone()).await;
        context.memory_cache.add(
            "https://x/hot.png",
            ImageInformation::new("https://x/hot.png"),
            Arc::new(image::DynamicImage::new_rgb8(1, 1)),
            4,
        );
        let scheduler = WorkScheduler::new(context);

        let (task, success, finish) =
            counted_task(&scheduler.context, "https://x/hot.png", None);
        scheduler.load_image(task.clone()).await;

        // Completed inline: no queue, no worker, no resolver call.
        assert!(task.is_completed());
        assert_eq!(success.load(Ordering::SeqCst), 1);
        assert_eq!(finish.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_pause_cancels_new_and_queued_tasks() {
        let resolver = Arc::new(SlowResolver {
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(200),
        });
        let (context, _dir) = make_context(resolver.clone()).await;
        let scheduler = WorkScheduler::new(context);

        scheduler.set_pause_work(true);
        let (task, success, finish) =
            counted_task(&scheduler.context, "https://x/paused.png", None);
        scheduler.load_image(task.clone()).await;

        assert!(task.is_cancelled());
        assert_eq!(success.load(Ordering::SeqCst), 0);
        assert_eq!(finish.load(Ordering::SeqCst), 1);

        // Resuming admits new work again.
        scheduler.set_pause_work(false);
        let (task, _success, finish) =
            counted_task(&scheduler.context, "https://x/resumed.png", None);
        scheduler.load_image(task.clone()).await;
        wait_until(|| task.is_completed()).await;
        assert_eq!(finish.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_task_cancels_queued_task_for_same_destination() {
        let resolver = Arc::new(SlowResolver {
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(80),
        });
        let (context, _dir) = make_context(resolver.clone()).await;
        // One worker so later submissions stay queued behind the blocker.
        let context = {
            let mut config = context.config.clone();
            config.max_parallel_tasks = 1;
            Arc::new(PipelineContext::new(
                config,
                context.memory_cache.clone(),
                context.disk_cache.clone(),
                resolver.clone(),
                context.decoder.clone(),
                context.dispatcher.clone(),
            ))
        };
        let scheduler = WorkScheduler::new(context);

        let (blocker, _, _) = counted_task(&scheduler.context, "https://x/blocker.png", None);
        scheduler.load_image(blocker.clone()).await;

        let destination: Arc<dyn Target> = Arc::new(Destination(42));
        let (stale, stale_success, stale_finish) = counted_task(
            &scheduler.context,
            "https://x/stale.png",
            Some(destination.clone()),
        );
        scheduler.load_image(stale.clone()).await;
        assert_eq!(scheduler.pending_count(), 1);

        let (fresh, fresh_success, _) = counted_task(
            &scheduler.context,
            "https://x/fresh.png",
            Some(destination),
        );
        scheduler.load_image(fresh.clone()).await;

        // The stale task was cancelled on admission of the fresh one.
        assert!(stale.is_cancelled());
        assert_eq!(stale_finish.load(Ordering::SeqCst), 1);

        wait_until(|| fresh.is_completed()).await;
        assert_eq!(stale_success.load(Ordering::SeqCst), 0);
        assert_eq!(fresh_success.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_removes_from_queue() {
        let resolver = Arc::new(SlowResolver {
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(100),
        });
        let (context, _dir) = make_context(resolver.clone()).await;
        let scheduler = WorkScheduler::new(context);

        // Fill both workers, then queue one more.
        let (a, _, _) = counted_task(&scheduler.context, "https://x/a.png", None);
        let (b, _, _) = counted_task(&scheduler.context, "https://x/b.png", None);
        let (queued, success, finish) =
            counted_task(&scheduler.context, "https://x/queued.png", None);
        scheduler.load_image(a).await;
        scheduler.load_image(b).await;
        scheduler.load_image(queued.clone()).await;

        scheduler.cancel(&queued);
        assert_eq!(scheduler.pending_count(), 0);
        assert_eq!(finish.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(success.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exit_tasks_early_abandons_admissions() {
        let resolver = Arc::new(SlowResolver {
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        });
        let (context, _dir) = make_context(resolver.clone()).await;
        let scheduler = WorkScheduler::new(context);

        scheduler.set_exit_tasks_early(true);
        let (task, success, finish) =
            counted_task(&scheduler.context, "https://x/late.png", None);
        scheduler.load_image(task.clone()).await;

        assert_eq!(success.load(Ordering::SeqCst), 0);
        assert_eq!(finish.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending_count(), 0);
    }
}
