//! Batch generators
//!
//! A [`DataSource`] is a restartable, endless stream of batches over one
//! [`ClassFolder`]. One epoch covers every sample exactly once in
//! `ceil(N / batch_size)` batches; the last batch may be short. Shuffled
//! sources draw a new order at the start of every epoch.

use burn::data::dataset::Dataset;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{ImageSize, PipelineConfig};
use crate::dataset::augmentation::Augmenter;
use crate::dataset::burn_dataset::ImageItem;
use crate::dataset::loader::{load_resized, to_chw, ClassFolder, ImageSample};
use crate::utils::error::Result;

/// Scale applied to raw pixel values after augmentation
pub const RESCALE: f32 = 1.0 / 255.0;

impl Dataset<ImageSample> for ClassFolder {
    fn get(&self, index: usize) -> Option<ImageSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Decode, resize, optionally augment and rescale one sample
pub fn load_item(
    sample: &ImageSample,
    size: ImageSize,
    augmenter: Option<&Augmenter>,
    seed: u64,
) -> Result<ImageItem> {
    let img = load_resized(&sample.path, size)?;
    let mut image = to_chw(&img);

    if let Some(augmenter) = augmenter {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        image = augmenter.augment(&image, size.height as usize, size.width as usize, &mut rng);
    }
    image.iter_mut().for_each(|v| *v *= RESCALE);

    Ok(ImageItem {
        image,
        label: sample.label,
    })
}

/// Endless batch stream over one split
#[derive(Debug)]
pub struct DataSource {
    name: String,
    folder: ClassFolder,
    size: ImageSize,
    batch_size: usize,
    augmenter: Option<Augmenter>,
    shuffle: bool,
    seed: u64,
    rng: ChaCha8Rng,
    order: Vec<usize>,
    batch_index: usize,
}

impl DataSource {
    pub fn new(
        name: impl Into<String>,
        folder: ClassFolder,
        size: ImageSize,
        batch_size: usize,
        augmenter: Option<Augmenter>,
        shuffle: bool,
        seed: u64,
    ) -> Self {
        let order = (0..folder.len()).collect();
        Self {
            name: name.into(),
            folder,
            size,
            batch_size: batch_size.max(1),
            augmenter,
            shuffle,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            order,
            batch_index: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        Dataset::len(&self.folder)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn image_size(&self) -> ImageSize {
        self.size
    }

    pub fn is_augmented(&self) -> bool {
        self.augmenter.is_some()
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    /// Seed of the shuffle and augmentation stream
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// `ceil(len / batch_size)`
    pub fn batches_per_epoch(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }

    /// Rewind to the start of an epoch
    pub fn reset(&mut self) {
        self.batch_index = 0;
    }

    /// Next batch of the endless stream
    pub fn next_batch(&mut self) -> Result<Vec<ImageItem>> {
        if self.batch_index == 0 && self.shuffle {
            self.order.shuffle(&mut self.rng);
        }

        let start = self.batch_index * self.batch_size;
        let end = (start + self.batch_size).min(self.len());
        let indices = &self.order[start..end];
        let seeds: Vec<u64> = indices.iter().map(|_| self.rng.gen()).collect();

        let augmenter = self.augmenter.as_ref();
        let items = indices
            .par_iter()
            .zip(seeds)
            .map(|(&idx, seed)| {
                let sample = &self.folder.samples[idx];
                load_item(sample, self.size, augmenter, seed)
            })
            .collect::<Result<Vec<_>>>()?;

        self.batch_index += 1;
        if self.batch_index >= self.batches_per_epoch() {
            self.batch_index = 0;
        }

        debug!("{}: batch of {} images", self.name, items.len());
        Ok(items)
    }

    /// Iterate over exactly one epoch, starting from its first batch
    pub fn epoch(&mut self) -> EpochBatches<'_> {
        self.reset();
        let remaining = self.batches_per_epoch();
        EpochBatches {
            source: self,
            remaining,
        }
    }
}

/// Iterator over the batches of one epoch
pub struct EpochBatches<'a> {
    source: &'a mut DataSource,
    remaining: usize,
}

impl Iterator for EpochBatches<'_> {
    type Item = Result<Vec<ImageItem>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.source.next_batch())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for EpochBatches<'_> {}

/// The three data sources of a run
#[derive(Debug)]
pub struct DataSplits {
    pub train: DataSource,
    pub validation: DataSource,
    pub test: DataSource,
}

/// Builds the three data sources from the configuration
pub struct DatasetPreparer<'a> {
    config: &'a PipelineConfig,
}

impl<'a> DatasetPreparer<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Scan all three split directories and wrap them in data sources
    ///
    /// Every split is shuffled each epoch from its own seed (`seed`,
    /// `seed + 1`, `seed + 2`). Validation and test share the training
    /// augmentation only when `augment_eval_data` is set.
    pub fn prepare(&self) -> Result<DataSplits> {
        let config = self.config;
        let seed = config.seed.unwrap_or_else(rand::random);

        let train_folder = ClassFolder::scan(&config.train_dir)?;
        let val_folder = ClassFolder::scan(&config.val_dir)?;
        let test_folder = ClassFolder::scan(&config.test_dir)?;

        if train_folder.class_names != val_folder.class_names
            || train_folder.class_names != test_folder.class_names
        {
            warn!(
                "Class folder names differ between splits: train {:?}, validation {:?}, test {:?}",
                train_folder.class_names, val_folder.class_names, test_folder.class_names
            );
        }

        let augmenter = Augmenter::new(config.augmentation_params.clone());
        let eval_augmenter = if config.augment_eval_data {
            if !config.augmentation_params.is_identity() {
                warn!("Validation and test data are augmented (augment_eval_data = true)");
            }
            Some(augmenter.clone())
        } else {
            None
        };

        info!(
            "Classes: {} = 0, {} = 1",
            train_folder.class_names[0], train_folder.class_names[1]
        );

        let size = config.img_size;
        let batch_size = config.batch_size;
        let splits = DataSplits {
            train: DataSource::new("train", train_folder, size, batch_size, Some(augmenter), true, seed),
            validation: DataSource::new(
                "validation",
                val_folder,
                size,
                batch_size,
                eval_augmenter.clone(),
                true,
                seed.wrapping_add(1),
            ),
            test: DataSource::new("test", test_folder, size, batch_size, eval_augmenter, true, seed.wrapping_add(2)),
        };

        for source in [&splits.train, &splits.validation, &splits.test] {
            info!(
                "{}: {} images, {} batches per epoch{}",
                source.name(),
                source.len(),
                source.batches_per_epoch(),
                if source.is_augmented() { ", augmented" } else { "" }
            );
        }
        Ok(splits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AugmentationParams;
    use crate::dataset::loader::tests::make_split;
    use crate::model::tests::test_config;
    use std::collections::HashSet;
    use std::path::Path;
    use tempfile::TempDir;

    fn source(dir: &TempDir, per_class: usize, batch_size: usize) -> DataSource {
        make_split(dir.path(), per_class);
        let folder = ClassFolder::scan(dir.path()).unwrap();
        DataSource::new("test", folder, ImageSize::new(8, 8), batch_size, None, true, 0)
    }

    #[test]
    fn test_batches_per_epoch_is_ceil() {
        let dir = TempDir::new().unwrap();
        let mut src = source(&dir, 5, 4);

        assert_eq!(src.len(), 10);
        assert_eq!(src.batches_per_epoch(), 3);

        let sizes: Vec<usize> = src.epoch().map(|b| b.unwrap().len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_epoch_covers_every_sample_with_binary_labels() {
        let dir = TempDir::new().unwrap();
        let mut src = source(&dir, 3, 2);

        let items: Vec<ImageItem> = src.epoch().flat_map(|b| b.unwrap()).collect();
        assert_eq!(items.len(), 6);
        assert!(items.iter().all(|item| item.label <= 1));
        assert_eq!(items.iter().filter(|item| item.label == 1).count(), 3);
        assert!(items
            .iter()
            .all(|item| item.image.iter().all(|v| (0.0..=1.0).contains(v))));
    }

    #[test]
    fn test_stream_is_endless_and_reshuffles() {
        let dir = TempDir::new().unwrap();
        make_split(dir.path(), 4);
        let folder = ClassFolder::scan(dir.path()).unwrap();
        let mut src = DataSource::new("train", folder, ImageSize::new(4, 4), 8, None, true, 11);

        let mut orders = HashSet::new();
        for _ in 0..6 {
            let batch = src.next_batch().unwrap();
            assert_eq!(batch.len(), 8);
            let labels: Vec<usize> = batch.iter().map(|i| i.label).collect();
            orders.insert(labels);
        }
        assert!(orders.len() > 1);
    }

    #[test]
    fn test_unshuffled_source_keeps_order() {
        let dir = TempDir::new().unwrap();
        make_split(dir.path(), 2);
        let folder = ClassFolder::scan(dir.path()).unwrap();
        let mut src = DataSource::new("val", folder, ImageSize::new(4, 4), 4, None, false, 0);

        let labels: Vec<usize> = src.next_batch().unwrap().iter().map(|i| i.label).collect();
        assert_eq!(labels, vec![0, 0, 1, 1]);
    }

    fn prepared(root: &Path, augment_eval_data: bool) -> DataSplits {
        for split in ["train", "val", "test"] {
            make_split(&root.join(split), 3);
        }
        let mut config = test_config(root);
        config.batch_size = 4;
        config.augment_eval_data = augment_eval_data;
        config.augmentation_params = AugmentationParams {
            horizontal_flip: true,
            ..AugmentationParams::none()
        };
        DatasetPreparer::new(&config).prepare().unwrap()
    }

    #[test]
    fn test_prepare_augments_eval_splits_when_enabled() {
        let dir = TempDir::new().unwrap();
        let splits = prepared(dir.path(), true);

        for source in [&splits.train, &splits.validation, &splits.test] {
            assert!(source.is_augmented(), "{} not augmented", source.name());
            assert!(source.is_shuffled(), "{} not shuffled", source.name());
            assert_eq!(source.len(), 6);
            assert_eq!(source.batches_per_epoch(), 2);
        }
        assert_eq!(
            [splits.train.seed(), splits.validation.seed(), splits.test.seed()],
            [0, 1, 2]
        );
    }

    #[test]
    fn test_prepare_leaves_eval_splits_plain_when_disabled() {
        let dir = TempDir::new().unwrap();
        let splits = prepared(dir.path(), false);

        assert!(splits.train.is_augmented());
        assert!(!splits.validation.is_augmented());
        assert!(!splits.test.is_augmented());
        for source in [&splits.train, &splits.validation, &splits.test] {
            assert!(source.is_shuffled());
            assert_eq!(source.batches_per_epoch(), 2);
        }
        assert_eq!(splits.validation.name(), "validation");
        assert_eq!(splits.test.seed(), 2);
    }

    #[test]
    fn test_load_item_rescales() {
        let dir = TempDir::new().unwrap();
        make_split(dir.path(), 1);
        let folder = ClassFolder::scan(dir.path()).unwrap();
        let sample = folder.get(0).unwrap();

        let item = load_item(&sample, ImageSize::new(6, 6), None, 0).unwrap();
        assert_eq!(item.image.len(), 3 * 36);
        assert!((item.image[0] - 40.0 / 255.0).abs() < 1e-6);

        let augmenter = Augmenter::new(AugmentationParams {
            horizontal_flip: true,
            ..AugmentationParams::none()
        });
        let flipped = load_item(&sample, ImageSize::new(6, 6), Some(&augmenter), 5).unwrap();
        // solid-colour image is flip invariant
        assert_eq!(flipped.image, item.image);
    }
}
