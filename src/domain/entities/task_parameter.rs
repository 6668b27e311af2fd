//! Immutable-once-built request specification.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncRead;

use crate::domain::entities::cache_key::compose_key;
use crate::domain::entities::{ImageInformation, LoadingResult};
use crate::domain::errors::LoadError;
use crate::domain::ports::Transformation;

/// Default time-to-live for disk cache entries (30 days).
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Scheduling priority of a request. Higher priorities dequeue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    /// Background work, e.g. prefetching.
    Low,
    /// The default.
    #[default]
    Normal,
    /// User-visible work that should jump the queue.
    High,
}

/// The kind of source an identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A path on the local filesystem.
    File,
    /// A URL fetched through the download cache.
    Url,
    /// A resource registered in the application bundle registry.
    Bundle,
    /// A compiled-in embedded resource.
    Embedded,
    /// A caller-supplied raw stream.
    Stream,
    /// An inline `data:` URL (base64 or literal payload).
    DataUrl,
}

/// A source: what kind of thing the identifier is, plus the identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    /// The source kind.
    pub kind: SourceKind,
    /// The identifier: path, URL, resource name, or data-url text.
    pub identifier: String,
}

impl ImageSource {
    /// A local file source.
    #[must_use]
    pub fn file(path: impl Into<String>) -> Self {
        Self { kind: SourceKind::File, identifier: path.into() }
    }

    /// A URL source.
    #[must_use]
    pub fn url(url: impl Into<String>) -> Self {
        Self { kind: SourceKind::Url, identifier: url.into() }
    }

    /// A bundle resource source.
    #[must_use]
    pub fn bundle(name: impl Into<String>) -> Self {
        Self { kind: SourceKind::Bundle, identifier: name.into() }
    }

    /// An embedded resource source.
    #[must_use]
    pub fn embedded(name: impl Into<String>) -> Self {
        Self { kind: SourceKind::Embedded, identifier: name.into() }
    }

    /// A caller-supplied stream source. The stream itself is attached via
    /// [`TaskParameterBuilder::stream`].
    #[must_use]
    pub fn stream(name: impl Into<String>) -> Self {
        Self { kind: SourceKind::Stream, identifier: name.into() }
    }

    /// A data-url source.
    #[must_use]
    pub fn data_url(url: impl Into<String>) -> Self {
        Self { kind: SourceKind::DataUrl, identifier: url.into() }
    }
}

/// A caller-supplied raw byte stream.
pub type RawStream = Box<dyn AsyncRead + Send + Unpin>;

type SuccessCallback = Box<dyn FnOnce(&ImageInformation, LoadingResult) + Send>;
type ErrorCallback = Box<dyn FnOnce(&LoadError) + Send>;
type FinishCallback = Box<dyn FnOnce() + Send>;

/// The immutable specification of one image-loading request.
///
/// Built once through [`TaskParameterBuilder`] and then owned exclusively by
/// its task. The one-shot pieces (the raw stream and the callbacks) are
/// taken out as the pipeline consumes them; [`TaskParameter::dispose`] drops
/// whatever remains so closures release their captures after delivery.
pub struct TaskParameter {
    /// What to load.
    pub source: ImageSource,
    /// Scheduling priority.
    pub priority: Priority,
    /// Number of retry attempts after the initial one.
    pub retry_count: u32,
    /// Delay before each retry attempt.
    pub retry_delay: Duration,
    /// Disk cache TTL for payloads this request causes to be persisted.
    pub cache_duration: Duration,
    /// Ordered transformations applied after decoding.
    pub transformations: Vec<Arc<dyn Transformation>>,
    /// Target size for decode-time downsampling; never upscales.
    pub downsample: Option<(u32, u32)>,
    /// Replaces the path portion of the cache key when set.
    pub custom_cache_key: Option<String>,
    /// Source delivered to the target when loading fails.
    pub error_placeholder: Option<ImageSource>,
    /// Source delivered to the target before work begins.
    pub loading_placeholder: Option<ImageSource>,
    raw_stream: Mutex<Option<RawStream>>,
    on_success: Mutex<Option<SuccessCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
    on_finish: Mutex<Option<FinishCallback>>,
}

impl std::fmt::Debug for TaskParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskParameter")
            .field("source", &self.source)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .field("custom_cache_key", &self.custom_cache_key)
            .finish_non_exhaustive()
    }
}

impl TaskParameter {
    /// Starts building a request for the given source.
    #[must_use]
    pub fn builder(source: ImageSource) -> TaskParameterBuilder {
        TaskParameterBuilder::new(source)
    }

    /// The path portion of the cache key: the custom override when present,
    /// the source identifier otherwise.
    #[must_use]
    pub fn key_path(&self) -> &str {
        self.custom_cache_key
            .as_deref()
            .unwrap_or(&self.source.identifier)
    }

    /// Composes the full cache key for this request, or `None` when the
    /// path is empty.
    #[must_use]
    pub fn cache_key(&self) -> Option<String> {
        let tkeys: Vec<String> = self.transformations.iter().map(|t| t.key()).collect();
        compose_key(self.key_path(), &tkeys)
    }

    /// Takes the caller-supplied raw stream, if one was attached and not
    /// yet consumed.
    #[must_use]
    pub fn take_raw_stream(&self) -> Option<RawStream> {
        self.raw_stream.lock().take()
    }

    /// Takes the success callback. At most one caller ever receives it.
    #[must_use]
    pub fn take_on_success(&self) -> Option<SuccessCallback> {
        self.on_success.lock().take()
    }

    /// Takes the error callback. At most one caller ever receives it.
    #[must_use]
    pub fn take_on_error(&self) -> Option<ErrorCallback> {
        self.on_error.lock().take()
    }

    /// Takes the finish callback. At most one caller ever receives it.
    #[must_use]
    pub fn take_on_finish(&self) -> Option<FinishCallback> {
        self.on_finish.lock().take()
    }

    /// Drops every remaining closure and the raw stream, releasing their
    /// captures. Called after the finish callback has fired.
    pub fn dispose(&self) {
        drop(self.raw_stream.lock().take());
        drop(self.on_success.lock().take());
        drop(self.on_error.lock().take());
        drop(self.on_finish.lock().take());
    }
}

/// Builder for [`TaskParameter`].
pub struct TaskParameterBuilder {
    source: ImageSource,
    priority: Priority,
    retry_count: u32,
    retry_delay: Duration,
    cache_duration: Duration,
    transformations: Vec<Arc<dyn Transformation>>,
    downsample: Option<(u32, u32)>,
    custom_cache_key: Option<String>,
    error_placeholder: Option<ImageSource>,
    loading_placeholder: Option<ImageSource>,
    raw_stream: Option<RawStream>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    on_finish: Option<FinishCallback>,
}

impl TaskParameterBuilder {
    /// Starts a builder for the given source.
    #[must_use]
    pub fn new(source: ImageSource) -> Self {
        Self {
            source,
            priority: Priority::default(),
            retry_count: 0,
            retry_delay: Duration::from_millis(250),
            cache_duration: DEFAULT_CACHE_DURATION,
            transformations: Vec::new(),
            downsample: None,
            custom_cache_key: None,
            error_placeholder: None,
            loading_placeholder: None,
            raw_stream: None,
            on_success: None,
            on_error: None,
            on_finish: None,
        }
    }

    /// Sets the scheduling priority.
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the retry policy: `count` extra attempts, each preceded by
    /// `delay`.
    #[must_use]
    pub const fn retry(mut self, count: u32, delay: Duration) -> Self {
        self.retry_count = count;
        self.retry_delay = delay;
        self
    }

    /// Sets the disk cache TTL for payloads persisted on behalf of this
    /// request.
    #[must_use]
    pub const fn cache_duration(mut self, duration: Duration) -> Self {
        self.cache_duration = duration;
        self
    }

    /// Appends a transformation. Order matters and is part of the cache key.
    #[must_use]
    pub fn transformation(mut self, transformation: Arc<dyn Transformation>) -> Self {
        self.transformations.push(transformation);
        self
    }

    /// Sets the decode-time downsample target size.
    #[must_use]
    pub const fn downsample(mut self, width: u32, height: u32) -> Self {
        self.downsample = Some((width, height));
        self
    }

    /// Replaces the path portion of the cache key.
    #[must_use]
    pub fn custom_cache_key(mut self, key: impl Into<String>) -> Self {
        self.custom_cache_key = Some(key.into());
        self
    }

    /// Source delivered to the target when loading fails.
    #[must_use]
    pub fn error_placeholder(mut self, source: ImageSource) -> Self {
        self.error_placeholder = Some(source);
        self
    }

    /// Source delivered to the target before work begins.
    #[must_use]
    pub fn loading_placeholder(mut self, source: ImageSource) -> Self {
        self.loading_placeholder = Some(source);
        self
    }

    /// Attaches the raw stream backing a [`SourceKind::Stream`] source.
    #[must_use]
    pub fn stream(mut self, stream: RawStream) -> Self {
        self.raw_stream = Some(stream);
        self
    }

    /// Callback fired at most once on success, after the target was set.
    #[must_use]
    pub fn on_success(
        mut self,
        callback: impl FnOnce(&ImageInformation, LoadingResult) + Send + 'static,
    ) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    /// Callback fired at most once when every attempt and fallback failed.
    #[must_use]
    pub fn on_error(mut self, callback: impl FnOnce(&LoadError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Callback fired exactly once when the task finishes, whether by
    /// success, failure, or cancellation.
    #[must_use]
    pub fn on_finish(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_finish = Some(Box::new(callback));
        self
    }

    /// Builds the immutable parameter set.
    #[must_use]
    pub fn build(self) -> TaskParameter {
        TaskParameter {
            source: self.source,
            priority: self.priority,
            retry_count: self.retry_count,
            retry_delay: self.retry_delay,
            cache_duration: self.cache_duration,
            transformations: self.transformations,
            downsample: self.downsample,
            custom_cache_key: self.custom_cache_key,
            error_placeholder: self.error_placeholder,
            loading_placeholder: self.loading_placeholder,
            raw_stream: Mutex::new(self.raw_stream),
            on_success: Mutex::new(self.on_success),
            on_error: Mutex::new(self.on_error),
            on_finish: Mutex::new(self.on_finish),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedTransformation(&'static str);

    impl Transformation for NamedTransformation {
        fn key(&self) -> String {
            self.0.to_string()
        }

        fn transform(
            &self,
            image: image::DynamicImage,
        ) -> crate::domain::errors::LoadResult<image::DynamicImage> {
            Ok(image)
        }
    }

    #[test]
    fn test_cache_key_includes_ordered_transformations() {
        let params = TaskParameter::builder(ImageSource::url("https://x/img.png"))
            .transformation(Arc::new(NamedTransformation("gray")))
            .transformation(Arc::new(NamedTransformation("blur=2")))
            .build();
        assert_eq!(
            params.cache_key().as_deref(),
            Some("https://x/img.png;gray;blur=2")
        );
    }

    #[test]
    fn test_custom_key_replaces_path_only() {
        let params = TaskParameter::builder(ImageSource::url("https://x/img.png?sig=abc"))
            .custom_cache_key("img")
            .transformation(Arc::new(NamedTransformation("gray")))
            .build();
        assert_eq!(params.cache_key().as_deref(), Some("img;gray"));
    }

    #[test]
    fn test_empty_path_has_no_key() {
        let params = TaskParameter::builder(ImageSource::url("")).build();
        assert_eq!(params.cache_key(), None);
    }

    #[test]
    fn test_callbacks_are_one_shot() {
        let params = TaskParameter::builder(ImageSource::url("u"))
            .on_finish(|| {})
            .build();
        assert!(params.take_on_finish().is_some());
        assert!(params.take_on_finish().is_none());
    }

    #[test]
    fn test_dispose_drops_callbacks() {
        let params = TaskParameter::builder(ImageSource::url("u"))
            .on_success(|_, _| {})
            .on_error(|_| {})
            .on_finish(|| {})
            .build();
        params.dispose();
        assert!(params.take_on_success().is_none());
        assert!(params.take_on_error().is_none());
        assert!(params.take_on_finish().is_none());
    }
}
