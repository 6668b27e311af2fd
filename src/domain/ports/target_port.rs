//! Port for the delivery destination of a loaded image.

use crate::domain::entities::ImageInformation;
use crate::domain::ports::ImageHandle;

/// A destination a loaded image is delivered to, typically a view or
/// widget. Calls arrive through the main-thread dispatcher.
#[cfg_attr(test, mockall::automock)]
pub trait Target: Send + Sync {
    /// Delivers the loaded image.
    fn set(&self, image: &ImageHandle, info: &ImageInformation);

    /// Clears the destination, e.g. before work begins or after a failure
    /// with no error placeholder.
    fn set_as_empty(&self);

    /// Returns false once the destination is gone (recycled view, dropped
    /// widget); deliveries are skipped then.
    fn is_valid(&self) -> bool;

    /// Stable identity of the underlying native control, used to cancel
    /// stale queued work when a destination is reused. `None` means the
    /// target never coalesces (e.g. prefetch sinks).
    fn destination_id(&self) -> Option<u64> {
        None
    }
}
