//! Pipeline Configuration
//!
//! Typed, eagerly validated configuration loaded once at startup. The file
//! format follows the extension: `.yaml`/`.yml` or `.toml`.
//!
//! ```yaml
//! train_dir: data/train
//! val_dir: data/val
//! test_dir: data/test
//! img_size: [150, 150]
//! batch_size: 32
//! augmentation_params:
//!   rotation_range: 40
//!   width_shift_range: 0.2
//!   height_shift_range: 0.2
//!   shear_range: 0.2
//!   zoom_range: 0.2
//!   horizontal_flip: true
//! learning_rate: 0.0001
//! epochs: 50
//! model_save_path: models
//! log_dir: logs
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::pretrained::torchvision_url;
use crate::model::resnet::ResNetDepth;
use crate::utils::error::{Error, Result};

/// Target image dimensions, written as `[height, width]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct ImageSize {
    pub height: u32,
    pub width: u32,
}

impl ImageSize {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    /// Number of values in one CHW image tensor
    pub fn num_values(&self) -> usize {
        3 * self.height as usize * self.width as usize
    }
}

impl From<[u32; 2]> for ImageSize {
    fn from([height, width]: [u32; 2]) -> Self {
        Self { height, width }
    }
}

impl From<ImageSize> for [u32; 2] {
    fn from(size: ImageSize) -> Self {
        [size.height, size.width]
    }
}

/// Random augmentation ranges applied to the training source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AugmentationParams {
    /// Maximum rotation in degrees (±)
    pub rotation_range: f32,
    /// Horizontal shift: fraction of the width when < 1, pixels otherwise
    pub width_shift_range: f32,
    /// Vertical shift: fraction of the height when < 1, pixels otherwise
    pub height_shift_range: f32,
    /// Maximum shear angle in degrees (±)
    pub shear_range: f32,
    /// Zoom factors are drawn from `[1 - zoom_range, 1 + zoom_range]`
    pub zoom_range: f32,
    /// Randomly mirror half of the images left/right
    pub horizontal_flip: bool,
}

impl AugmentationParams {
    /// Identity parameters (no augmentation)
    pub fn none() -> Self {
        Self {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
        }
    }

    /// True when no transform would ever change an image
    pub fn is_identity(&self) -> bool {
        self.rotation_range == 0.0
            && self.width_shift_range == 0.0
            && self.height_shift_range == 0.0
            && self.shear_range == 0.0
            && self.zoom_range == 0.0
            && !self.horizontal_flip
    }
}

/// Monitoring policy parameters for the fit loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CallbackParams {
    /// Epochs without val_loss improvement before training halts
    pub early_stopping_patience: usize,
    /// Epochs without val_loss improvement before the learning rate decays
    pub lr_patience: usize,
    /// Multiplier applied to the learning rate on plateau
    pub lr_factor: f64,
    /// Learning-rate floor
    pub min_lr: f64,
}

impl Default for CallbackParams {
    fn default() -> Self {
        Self {
            early_stopping_patience: 10,
            lr_patience: 5,
            lr_factor: 0.2,
            min_lr: 1e-6,
        }
    }
}

fn default_pretrained_weights() -> PathBuf {
    PathBuf::from("weights/resnet50_imagenet.mpk")
}

fn default_true() -> bool {
    true
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Training images, one subfolder per class
    pub train_dir: PathBuf,
    /// Validation images, one subfolder per class
    pub val_dir: PathBuf,
    /// Test images, one subfolder per class
    pub test_dir: PathBuf,
    /// Images are resized to this size before augmentation
    pub img_size: ImageSize,
    pub batch_size: usize,
    pub augmentation_params: AugmentationParams,
    /// Initial Adam learning rate
    pub learning_rate: f64,
    pub epochs: usize,
    /// Directory receiving per-epoch and best-model checkpoints
    pub model_save_path: PathBuf,
    /// Directory receiving the metrics event log
    pub log_dir: PathBuf,

    /// Cached Burn record of the ImageNet-pretrained backbone; a `.pth`
    /// checkpoint with the same stem is imported when the record is missing
    #[serde(default = "default_pretrained_weights")]
    pub pretrained_weights: PathBuf,
    /// Checkpoint URL; the torchvision checkpoint of `backbone` when absent
    #[serde(default)]
    pub pretrained_weights_url: Option<String>,
    /// Fetch the checkpoint when neither record nor checkpoint exists
    #[serde(default = "default_true")]
    pub download_pretrained: bool,
    #[serde(default)]
    pub backbone: ResNetDepth,
    /// Validation and test sources reuse the augmenting training generator
    #[serde(default = "default_true")]
    pub augment_eval_data: bool,
    /// Seed for shuffling and augmentation (random when absent)
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub callbacks: CallbackParams,
}

impl PipelineConfig {
    /// Read, parse, resolve and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config {}: {e}", path.display())))?;

        let mut config = Self::parse(&content, path)?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration document; the format follows the extension of `origin`
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        let ext = origin
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "toml" => toml::from_str(content)
                .map_err(|e| Error::Config(format!("Failed to parse config {}: {e}", origin.display()))),
            "yaml" | "yml" => serde_yaml::from_str(content)
                .map_err(|e| Error::Config(format!("Failed to parse config {}: {e}", origin.display()))),
            other => Err(Error::Config(format!(
                "Unsupported config format '{}' for {} (expected .yaml, .yml or .toml)",
                other,
                origin.display()
            ))),
        }
    }

    /// Where to fetch the backbone checkpoint, `None` when downloading is off
    pub fn weights_url(&self) -> Option<String> {
        if !self.download_pretrained {
            return None;
        }
        Some(
            self.pretrained_weights_url
                .clone()
                .unwrap_or_else(|| torchvision_url(self.backbone).to_string()),
        )
    }

    /// Make every relative path relative to `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.train_dir,
            &mut self.val_dir,
            &mut self.test_dir,
            &mut self.model_save_path,
            &mut self.log_dir,
            &mut self.pretrained_weights,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Config(msg));

        if self.img_size.height == 0 || self.img_size.width == 0 {
            return fail(format!(
                "img_size must be two positive integers, got [{}, {}]",
                self.img_size.height, self.img_size.width
            ));
        }
        if self.batch_size == 0 {
            return fail("batch_size must be positive".to_string());
        }
        if self.epochs == 0 {
            return fail("epochs must be positive".to_string());
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return fail(format!("learning_rate must be positive, got {}", self.learning_rate));
        }

        let aug = &self.augmentation_params;
        for (name, value) in [
            ("rotation_range", aug.rotation_range),
            ("width_shift_range", aug.width_shift_range),
            ("height_shift_range", aug.height_shift_range),
            ("shear_range", aug.shear_range),
            ("zoom_range", aug.zoom_range),
        ] {
            if !value.is_finite() || value < 0.0 {
                return fail(format!("augmentation_params.{name} must be >= 0, got {value}"));
            }
        }
        if aug.zoom_range >= 1.0 {
            return fail(format!(
                "augmentation_params.zoom_range must be < 1, got {}",
                aug.zoom_range
            ));
        }

        let cb = &self.callbacks;
        if !(cb.lr_factor > 0.0 && cb.lr_factor < 1.0) {
            return fail(format!("callbacks.lr_factor must be in (0, 1), got {}", cb.lr_factor));
        }
        if cb.min_lr < 0.0 {
            return fail(format!("callbacks.min_lr must be >= 0, got {}", cb.min_lr));
        }

        Ok(())
    }

    /// Log the effective configuration
    pub fn log_summary(&self) {
        info!("Configuration:");
        info!("  Train dir:        {}", self.train_dir.display());
        info!("  Validation dir:   {}", self.val_dir.display());
        info!("  Test dir:         {}", self.test_dir.display());
        info!("  Image size:       {}x{}", self.img_size.height, self.img_size.width);
        info!("  Batch size:       {}", self.batch_size);
        info!("  Epochs:           {}", self.epochs);
        info!("  Learning rate:    {}", self.learning_rate);
        info!("  Backbone:         {}", self.backbone);
        info!("  Weights:          {}", self.pretrained_weights.display());
        info!("  Model save path:  {}", self.model_save_path.display());
        info!("  Log dir:          {}", self.log_dir.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const YAML: &str = r#"
train_dir: data/train
val_dir: data/val
test_dir: /abs/test
img_size: [150, 150]
batch_size: 32
augmentation_params:
  rotation_range: 40
  width_shift_range: 0.2
  height_shift_range: 0.2
  shear_range: 0.2
  zoom_range: 0.2
  horizontal_flip: true
learning_rate: 0.0001
epochs: 50
model_save_path: models
log_dir: logs
"#;

    #[test]
    fn test_parse_yaml_with_defaults() {
        let config = PipelineConfig::parse(YAML, Path::new("config.yaml")).unwrap();

        assert_eq!(config.img_size, ImageSize::new(150, 150));
        assert_eq!(config.batch_size, 32);
        assert!(config.augmentation_params.horizontal_flip);
        assert_eq!(config.backbone, ResNetDepth::ResNet50);
        assert!(config.augment_eval_data);
        assert_eq!(config.callbacks, CallbackParams::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_weights_url_defaults_to_torchvision() {
        let mut config = PipelineConfig::parse(YAML, Path::new("config.yaml")).unwrap();
        assert!(config.download_pretrained);
        assert_eq!(
            config.weights_url().as_deref(),
            Some("https://download.pytorch.org/models/resnet50-0676ba61.pth")
        );

        config.backbone = ResNetDepth::ResNet18;
        assert!(config.weights_url().unwrap().contains("resnet18"));

        config.pretrained_weights_url = Some("https://mirror.local/r18.pth".to_string());
        assert_eq!(config.weights_url().as_deref(), Some("https://mirror.local/r18.pth"));

        config.download_pretrained = false;
        assert_eq!(config.weights_url(), None);
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let without_epochs = YAML.replace("epochs: 50\n", "");
        let err = PipelineConfig::parse(&without_epochs, Path::new("config.yaml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("epochs"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let with_typo = format!("{YAML}learning_rat: 0.1\n");
        assert!(PipelineConfig::parse(&with_typo, Path::new("config.yaml")).is_err());
    }

    #[test]
    fn test_unsupported_extension() {
        let err = PipelineConfig::parse(YAML, Path::new("config.ini")).unwrap_err();
        assert!(err.to_string().contains("Unsupported"));
    }

    #[test]
    fn test_validation_errors() {
        let base = PipelineConfig::parse(YAML, Path::new("config.yaml")).unwrap();

        let mut config = base.clone();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.img_size = ImageSize::new(0, 150);
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.learning_rate = -1.0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.augmentation_params.zoom_range = 1.5;
        assert!(config.validate().is_err());

        let mut config = base;
        config.callbacks.lr_factor = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, YAML).unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.train_dir, dir.path().join("data/train"));
        assert_eq!(config.log_dir, dir.path().join("logs"));
        assert_eq!(config.test_dir, PathBuf::from("/abs/test"));
    }

    #[test]
    fn test_load_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let toml_doc = r#"
train_dir = "train"
val_dir = "val"
test_dir = "test"
img_size = [64, 48]
batch_size = 4
learning_rate = 0.001
epochs = 3
model_save_path = "models"
log_dir = "logs"
backbone = "resnet18"
augment_eval_data = false
seed = 7

[augmentation_params]
rotation_range = 10.0
width_shift_range = 0.1
height_shift_range = 0.1
shear_range = 0.0
zoom_range = 0.1
horizontal_flip = false

[callbacks]
early_stopping_patience = 3
"#;
        fs::write(&path, toml_doc).unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.img_size, ImageSize::new(64, 48));
        assert_eq!(config.backbone, ResNetDepth::ResNet18);
        assert!(!config.augment_eval_data);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.callbacks.early_stopping_patience, 3);
        assert_eq!(config.callbacks.lr_patience, 5);
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
