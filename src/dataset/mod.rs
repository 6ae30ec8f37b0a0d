//! Dataset module
//!
//! - [`loader`]: class-folder discovery and image decoding
//! - [`augmentation`]: random affine augmentation
//! - [`generator`]: endless, epoch-aligned batch streams
//! - [`burn_dataset`]: conversion of batches into Burn tensors

pub mod augmentation;
pub mod burn_dataset;
pub mod generator;
pub mod loader;

pub use augmentation::{Augmenter, TransformParams};
pub use burn_dataset::{ImageBatch, ImageBatcher, ImageItem};
pub use generator::{DataSource, DataSplits, DatasetPreparer, EpochBatches};
pub use loader::{ClassFolder, ImageSample};
