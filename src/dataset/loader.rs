//! Class-folder loader
//!
//! Discovers the samples of one split directory:
//!
//! ```text
//! train_dir/
//! ├── cats/
//! │   ├── 001.jpg
//! │   └── nested/002.png
//! └── dogs/
//!     └── ...
//! ```
//!
//! Subfolder names sorted alphanumerically define the labels (`cats` = 0,
//! `dogs` = 1). Images are found recursively below each class folder.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::ImageSize;
use crate::utils::error::{Error, Result};
use crate::NUM_CLASSES;

/// File extensions recognised as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "ppm", "tif", "tiff"];

/// A single image file and its label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
}

/// The samples of one split directory
#[derive(Debug, Clone)]
pub struct ClassFolder {
    /// Directory that was scanned
    pub root: PathBuf,
    /// Class names indexed by label
    pub class_names: Vec<String>,
    /// All samples, grouped by class, files sorted within each class
    pub samples: Vec<ImageSample>,
}

impl ClassFolder {
    /// Scan `root` for exactly two class subfolders holding at least one image
    pub fn scan(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::Data(format!(
                "Dataset directory does not exist: {}",
                root.display()
            )));
        }

        let mut class_names = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                class_names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        class_names.sort();

        if class_names.len() != NUM_CLASSES {
            return Err(Error::Data(format!(
                "Expected {} class subfolders in {}, found {}: {:?}",
                NUM_CLASSES,
                root.display(),
                class_names.len(),
                class_names
            )));
        }

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let mut paths: Vec<PathBuf> = WalkDir::new(root.join(class_name))
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
                .map(|e| e.into_path())
                .collect();
            paths.sort();

            debug!("Class '{}' (label {}): {} images", class_name, label, paths.len());
            samples.extend(paths.into_iter().map(|path| ImageSample { path, label }));
        }

        if samples.is_empty() {
            return Err(Error::Data(format!("no samples found in {}", root.display())));
        }

        info!(
            "Found {} images belonging to {} classes in {}",
            samples.len(),
            class_names.len(),
            root.display()
        );

        Ok(Self {
            root: root.to_path_buf(),
            class_names,
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples per label
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.class_names.len()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }
}

/// Whether the path has a recognised image extension
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Decode an image as RGB and resize it with nearest-neighbour sampling
pub fn load_resized(path: &Path, size: ImageSize) -> Result<RgbImage> {
    let img = ImageReader::open(path)
        .map_err(|e| Error::Image(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| Error::Image(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| Error::Image(path.to_path_buf(), e.to_string()))?;

    let rgb = img.to_rgb8();
    if rgb.width() == size.width && rgb.height() == size.height {
        return Ok(rgb);
    }
    Ok(image::imageops::resize(
        &rgb,
        size.width,
        size.height,
        FilterType::Nearest,
    ))
}

/// Convert an RGB image to a CHW float buffer with raw 0..=255 values
pub fn to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let plane = height * width;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let idx = y as usize * width + x as usize;
        data[idx] = pixel[0] as f32;
        data[plane + idx] = pixel[1] as f32;
        data[2 * plane + idx] = pixel[2] as f32;
    }

    data
}
