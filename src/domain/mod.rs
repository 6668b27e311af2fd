//! Domain layer: entities, errors, ports, and the cancellation primitive.

/// Cooperative cancellation signal shared between a task and its owners.
pub mod cancellation;
/// Core entities: cache keys, image metadata, request parameters.
pub mod entities;
/// Error taxonomy for the loading pipeline.
pub mod errors;
/// Port definitions the core depends on.
pub mod ports;

pub use cancellation::CancellationSignal;
