//! Burn batching
//!
//! `ImageBatcher` turns preprocessed items into the tensors consumed by the
//! classifier: images `[n, 3, h, w]` in [0, 1] and binary targets `[n, 1]`.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

use crate::config::ImageSize;

/// One preprocessed image
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// CHW image, already augmented and rescaled
    pub image: Vec<f32>,
    /// 0 or 1
    pub label: usize,
}

/// A batch of images and their binary targets
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// `[batch, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch, 1]`
    pub targets: Tensor<B, 2, Int>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stacks [`ImageItem`]s into an [`ImageBatch`]
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    size: ImageSize,
}

impl ImageBatcher {
    pub fn new(size: ImageSize) -> Self {
        Self { size }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let height = self.size.height as usize;
        let width = self.size.width as usize;

        let mut images_data = Vec::with_capacity(batch_size * 3 * height * width);
        let mut targets_data = Vec::with_capacity(batch_size);
        for item in items {
            images_data.extend(item.image);
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, height, width]),
            device,
        );
        let targets =
            Tensor::<B, 2, Int>::from_data(TensorData::new(targets_data, [batch_size, 1]), device);

        ImageBatch { images, targets }
    }
}
