//! Port for marshaling callbacks onto one logical thread.

/// Marshals a closure onto the application's designated callback thread.
///
/// Success, error, and finish callbacks - and target mutations - always go
/// through this boundary so UI-affecting side effects happen on one logical
/// thread regardless of which worker performed the I/O or decode.
pub trait MainThreadDispatcher: Send + Sync {
    /// Runs or schedules `job` on the dispatch thread.
    fn post(&self, job: Box<dyn FnOnce() + Send>);
}

/// Dispatcher that runs jobs inline on the calling thread.
///
/// The default for headless use and tests; UI embedders supply their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl MainThreadDispatcher for InlineDispatcher {
    fn post(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}
