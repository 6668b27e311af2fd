//! Core entities of the loading pipeline.

mod cache_key;
mod download;
mod image_info;
mod task_parameter;

pub use cache_key::{base_key, compose_key, is_variant_of};
pub use download::{DownloadResult, LoadingResult};
pub use image_info::{ImageInformation, ImageType};
pub use task_parameter::{
    ImageSource, Priority, RawStream, SourceKind, TaskParameter, TaskParameterBuilder,
};
