//! pixcache - an asynchronous image loading and caching pipeline.
//!
//! This crate provides the scheduling and caching engine behind image-heavy
//! applications: a priority work scheduler with request coalescing, a
//! per-request task state machine with bounded retry, a cost-bounded LRU
//! memory cache, a journaled crash-safe disk cache, and a download cache
//! with per-URL in-flight de-duplication. Platform concerns (decoding,
//! pixel transforms, render targets, thread marshaling) sit behind narrow
//! port traits in [`domain::ports`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the scheduling pipeline.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing caches, download, and resolver adapters.
pub mod infrastructure;
/// Service facade wiring configuration, caches, and scheduler together.
pub mod service;

pub use application::{ImageLoaderTask, PendingTasksQueue, PipelineContext, WorkScheduler};
pub use domain::entities::{
    DownloadResult, ImageInformation, ImageSource, ImageType, LoadingResult, Priority,
    SourceKind, TaskParameter, TaskParameterBuilder,
};
pub use domain::cancellation::CancellationSignal;
pub use domain::errors::{LoadError, LoadResult};
pub use infrastructure::config::PipelineConfig;
pub use service::{CacheType, ImageService, ImageServiceBuilder};

/// Current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
