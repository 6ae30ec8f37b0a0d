//! Model summary table

use std::fmt;

use burn::{module::Module, tensor::backend::Backend};
use serde::Serialize;

use crate::config::ImageSize;
use crate::model::classifier::TransferClassifier;
use crate::utils::format_number;

/// One row of the summary table
#[derive(Debug, Clone, Serialize)]
pub struct LayerSummary {
    pub name: String,
    /// Output shape without the batch dimension
    pub output_shape: Vec<usize>,
    pub trainable: bool,
}

/// Layer listing and parameter counts of a [`TransferClassifier`]
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub backbone: String,
    pub layers: Vec<LayerSummary>,
    pub total_params: usize,
    pub trainable_params: usize,
    pub non_trainable_params: usize,
}

impl ModelSummary {
    pub fn new<B: Backend>(
        model: &TransferClassifier<B>,
        backbone: impl Into<String>,
        input: ImageSize,
    ) -> Self {
        let (height, width) = (input.height as usize, input.width as usize);
        let mut layers = vec![LayerSummary {
            name: "input".to_string(),
            output_shape: vec![3, height, width],
            trainable: false,
        }];

        let stages = model.backbone.stage_shapes(height, width);
        let channels = stages.last().map_or(0, |(_, shape)| shape[0]);
        layers.extend(stages.into_iter().map(|(name, shape)| LayerSummary {
            name,
            output_shape: shape.to_vec(),
            trainable: false,
        }));
        layers.push(LayerSummary {
            name: "global_average_pooling".to_string(),
            output_shape: vec![channels],
            trainable: false,
        });
        layers.extend(model.head.layer_shapes().into_iter().map(|(name, units)| LayerSummary {
            name,
            output_shape: vec![units],
            trainable: true,
        }));

        let total_params = model.num_params();
        let trainable_params = model.trainable_params();

        Self {
            backbone: backbone.into(),
            layers,
            total_params,
            trainable_params,
            non_trainable_params: total_params.saturating_sub(trainable_params),
        }
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(64);
        writeln!(f, "Model: transfer_classifier ({})", self.backbone)?;
        writeln!(f, "{rule}")?;
        writeln!(f, "{:<36} {:<20} {}", "Layer", "Output Shape", "Trainable")?;
        writeln!(f, "{}", "-".repeat(64))?;
        for layer in &self.layers {
            let shape = format!(
                "(None, {})",
                layer
                    .output_shape
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            writeln!(
                f,
                "{:<36} {:<20} {}",
                layer.name,
                shape,
                if layer.trainable { "yes" } else { "no" }
            )?;
        }
        writeln!(f, "{rule}")?;
        writeln!(f, "Total params: {}", format_number(self.total_params))?;
        writeln!(f, "Trainable params: {}", format_number(self.trainable_params))?;
        write!(f, "Non-trainable params: {}", format_number(self.non_trainable_params))
    }
}
