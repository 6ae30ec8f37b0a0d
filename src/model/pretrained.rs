//! Pretrained backbone weights
//!
//! ImageNet weights come from the torchvision ResNet checkpoints (`.pth`).
//! A checkpoint is downloaded when missing, imported once with burn-import's
//! PyTorch recorder and cached next to it as a Burn record
//! (`CompactRecorder`, `.mpk`). Later runs load the cached record directly.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    nn::{conv::Conv2d, BatchNorm},
    record::{CompactRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use tracing::info;

use crate::model::resnet::{BasicBlock, Bottleneck, ResNet, ResNetDepth, ResidualBlock};
use crate::utils::error::{Error, Result};

/// Extension appended by `CompactRecorder`
pub const RECORD_EXTENSION: &str = "mpk";

/// Extension of a PyTorch checkpoint
pub const CHECKPOINT_EXTENSION: &str = "pth";

/// ImageNet-1k checkpoint published by torchvision for `depth`
pub fn torchvision_url(depth: ResNetDepth) -> &'static str {
    match depth {
        ResNetDepth::ResNet18 => "https://download.pytorch.org/models/resnet18-f37072fd.pth",
        ResNetDepth::ResNet34 => "https://download.pytorch.org/models/resnet34-b627a593.pth",
        ResNetDepth::ResNet50 => "https://download.pytorch.org/models/resnet50-0676ba61.pth",
    }
}

/// Key rewrites from a torchvision state dict to the trunk modules below
///
/// Shortcut layers are a `Sequential` in torchvision (`downsample.0` conv,
/// `downsample.1` batch norm). Batch-norm `weight`/`bias` become
/// `gamma`/`beta` inside the PyTorch adapter itself. `fc.*` and
/// `num_batches_tracked` have no counterpart and are ignored.
pub fn torchvision_load_args(checkpoint: &Path) -> LoadArgs {
    LoadArgs::new(checkpoint.to_path_buf())
        .with_key_remap(r"downsample\.0\.", "downsample.conv.")
        .with_key_remap(r"downsample\.1\.", "downsample.bn.")
}

macro_rules! torchvision_trunk {
    ($name:ident, $block:ident, $variant:ident) => {
        /// Stem and stages laid out like the torchvision state dict
        #[derive(Module, Debug)]
        pub struct $name<B: Backend> {
            pub conv1: Conv2d<B>,
            pub bn1: BatchNorm<B>,
            pub layer1: Vec<$block<B>>,
            pub layer2: Vec<$block<B>>,
            pub layer3: Vec<$block<B>>,
            pub layer4: Vec<$block<B>>,
        }

        impl<B: Backend> $name<B> {
            pub fn from_resnet(resnet: ResNet<B>) -> Result<Self> {
                let ResNet {
                    conv1,
                    bn1,
                    layer1,
                    layer2,
                    layer3,
                    layer4,
                    ..
                } = resnet;

                let unwrap = |stage: Vec<ResidualBlock<B>>| -> Result<Vec<$block<B>>> {
                    stage
                        .into_iter()
                        .map(|block| match block {
                            ResidualBlock::$variant(block) => Ok(block),
                            _ => Err(Error::Model(format!(
                                "{} holds only {} blocks",
                                stringify!($name),
                                stringify!($block)
                            ))),
                        })
                        .collect()
                };

                Ok(Self {
                    conv1,
                    bn1,
                    layer1: unwrap(layer1)?,
                    layer2: unwrap(layer2)?,
                    layer3: unwrap(layer3)?,
                    layer4: unwrap(layer4)?,
                })
            }

            pub fn into_resnet(self) -> ResNet<B> {
                let wrap = |stage: Vec<$block<B>>| -> Vec<ResidualBlock<B>> {
                    stage.into_iter().map(ResidualBlock::$variant).collect()
                };
                ResNet::from_parts(
                    self.conv1,
                    self.bn1,
                    [
                        wrap(self.layer1),
                        wrap(self.layer2),
                        wrap(self.layer3),
                        wrap(self.layer4),
                    ],
                )
            }
        }
    };
}

torchvision_trunk!(BasicTrunk, BasicBlock, Basic);
torchvision_trunk!(BottleneckTrunk, Bottleneck, Bottleneck);

/// Load a torchvision checkpoint into `backbone`
pub fn import_torchvision<B: Backend>(
    backbone: ResNet<B>,
    checkpoint: &Path,
    device: &B::Device,
) -> Result<ResNet<B>> {
    info!("Importing PyTorch checkpoint {}", checkpoint.display());
    let recorder = PyTorchFileRecorder::<FullPrecisionSettings>::default();
    let args = torchvision_load_args(checkpoint);
    let fail = |e: burn::record::RecorderError| {
        Error::Model(format!("Failed to import {}: {e}", checkpoint.display()))
    };

    if backbone.is_bottleneck() {
        let trunk = BottleneckTrunk::from_resnet(backbone)?;
        let record: <BottleneckTrunk<B> as Module<B>>::Record =
            Recorder::<B>::load(&recorder, args, device).map_err(fail)?;
        Ok(trunk.load_record(record).into_resnet())
    } else {
        let trunk = BasicTrunk::from_resnet(backbone)?;
        let record: <BasicTrunk<B> as Module<B>>::Record =
            Recorder::<B>::load(&recorder, args, device).map_err(fail)?;
        Ok(trunk.load_record(record).into_resnet())
    }
}

/// Where the backbone weights come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
    /// Converted Burn record
    Record(PathBuf),
    /// PyTorch checkpoint still to be imported
    Checkpoint(PathBuf),
}

/// Location of the pretrained backbone weights
#[derive(Debug, Clone)]
pub struct PretrainedWeights {
    path: PathBuf,
    url: Option<String>,
}

impl PretrainedWeights {
    /// `path` names the cached record; its `.pth` sibling holds the checkpoint
    pub fn new(path: impl Into<PathBuf>, url: Option<String>) -> Self {
        Self {
            path: path.into(),
            url,
        }
    }

    /// Record file as written by the recorder
    pub fn record_path(&self) -> PathBuf {
        self.path.with_extension(RECORD_EXTENSION)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.path.with_extension(CHECKPOINT_EXTENSION)
    }

    /// Cached record if present, else the checkpoint, downloaded first when
    /// missing and a URL is known
    pub fn ensure_available(&self) -> Result<WeightSource> {
        let record = self.record_path();
        if record.exists() {
            return Ok(WeightSource::Record(record));
        }

        let checkpoint = self.checkpoint_path();
        if checkpoint.exists() {
            return Ok(WeightSource::Checkpoint(checkpoint));
        }

        match &self.url {
            Some(url) => {
                download(url, &checkpoint)?;
                Ok(WeightSource::Checkpoint(checkpoint))
            }
            None => Err(Error::Model(format!(
                "Pretrained weights not found at {} or {} and downloading is disabled",
                record.display(),
                checkpoint.display()
            ))),
        }
    }

    /// Load the weights into `backbone`, converting a checkpoint on first use
    pub fn load<B: Backend>(&self, backbone: ResNet<B>, device: &B::Device) -> Result<ResNet<B>> {
        let expected = backbone.num_params();

        let backbone = match self.ensure_available()? {
            WeightSource::Record(record) => {
                info!("Loading pretrained backbone from {}", record.display());
                backbone
                    .load_file(&record, &CompactRecorder::new(), device)
                    .map_err(|e| {
                        Error::Model(format!(
                            "Failed to load pretrained weights {}: {e}",
                            record.display()
                        ))
                    })?
            }
            WeightSource::Checkpoint(checkpoint) => {
                let backbone = import_torchvision(backbone, &checkpoint, device)?;
                let record = self.record_path();
                backbone
                    .clone()
                    .save_file(&record, &CompactRecorder::new())
                    .map_err(|e| Error::Model(format!("Failed to cache {}: {e}", record.display())))?;
                info!("Cached converted weights at {}", record.display());
                backbone
            }
        };

        if backbone.num_params() != expected {
            return Err(Error::Model(format!(
                "Pretrained weights do not match the backbone ({} vs {} parameters)",
                backbone.num_params(),
                expected
            )));
        }

        Ok(backbone)
    }
}

fn download(url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    info!("Downloading pretrained weights from {}", url);
    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::Model(format!("Failed to download {url}: {e}")))?;
    let bytes = response
        .bytes()
        .map_err(|e| Error::Model(format!("Failed to read response from {url}: {e}")))?;

    let partial = dest.with_extension("part");
    let mut file = fs::File::create(&partial)?;
    file.write_all(&bytes)?;
    fs::rename(&partial, dest)?;

    info!("Saved {} bytes to {}", bytes.len(), dest.display());
    Ok(())
}
