//! Transfer classifier
//!
//! Frozen ResNet backbone + trainable [`ClassificationHead`]. Images in
//! [0, 1] are standardised with the ImageNet channel statistics the
//! torchvision weights were trained with. During training the backbone runs
//! on the inner (non-autodiff) backend, so no gradient ever reaches it and
//! its batch-norm layers use their stored statistics.

use burn::{
    module::{AutodiffModule, Module},
    tensor::{
        activation::sigmoid,
        backend::{AutodiffBackend, Backend},
        Tensor,
    },
};

use crate::model::head::ClassificationHead;
use crate::model::resnet::ResNet;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// `(x - mean) / std` per RGB channel of `[batch, 3, h, w]`
pub fn normalize_imagenet<B: Backend>(images: Tensor<B, 4>) -> Tensor<B, 4> {
    let device = images.device();
    let mean = Tensor::<B, 1>::from_floats(IMAGENET_MEAN, &device).reshape([1, 3, 1, 1]);
    let std = Tensor::<B, 1>::from_floats(IMAGENET_STD, &device).reshape([1, 3, 1, 1]);
    (images - mean) / std
}

#[derive(Module, Debug)]
pub struct TransferClassifier<B: Backend> {
    pub backbone: ResNet<B>,
    pub head: ClassificationHead<B>,
}

impl<B: Backend> TransferClassifier<B> {
    /// Attach a head to a backbone and freeze the backbone
    pub fn new(backbone: ResNet<B>, head: ClassificationHead<B>) -> Self {
        Self {
            backbone: backbone.no_grad(),
            head,
        }
    }

    /// Images `[batch, 3, h, w]` in [0, 1] → logits `[batch, 1]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(normalize_imagenet(images)))
    }

    /// Probabilities of class 1, `[batch, 1]`
    pub fn predict_proba(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward(images))
    }

    /// Parameters updated during training
    pub fn trainable_params(&self) -> usize {
        self.head.trainable_params()
    }

    /// All parameters, including running statistics
    pub fn total_params(&self) -> usize {
        self.num_params()
    }

    pub fn non_trainable_params(&self) -> usize {
        self.total_params().saturating_sub(self.trainable_params())
    }
}

impl<B: AutodiffBackend> TransferClassifier<B> {
    /// Training forward pass: the backbone is evaluated outside the autodiff
    /// graph in inference mode, the head records gradients.
    pub fn forward_train(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.valid().forward(normalize_imagenet(images.inner()));
        self.head.forward(Tensor::from_inner(features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::head::HeadConfig;
    use crate::model::resnet::{ResNetConfig, ResNetDepth};
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray>;

    fn small_model(device: &<TestBackend as Backend>::Device) -> TransferClassifier<TestBackend> {
        let backbone = ResNetConfig::new(ResNetDepth::ResNet18).init(device);
        let head = HeadConfig::new(ResNetDepth::ResNet18.out_channels()).init(device);
        TransferClassifier::new(backbone, head)
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model = small_model(&device);
        let images = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);

        assert_eq!(model.forward_train(images.clone()).dims(), [2, 1]);

        let probs = model.valid().predict_proba(images.inner());
        let values: Vec<f32> = probs.into_data().iter::<f32>().collect();
        assert!(values.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_normalize_centres_imagenet_mean() {
        let device = Default::default();
        let images = Tensor::<NdArray, 1>::from_floats(IMAGENET_MEAN, &device)
            .reshape([1, 3, 1, 1])
            .repeat_dim(2, 2)
            .repeat_dim(3, 2);

        let out = normalize_imagenet(images);
        assert_eq!(out.dims(), [1, 3, 2, 2]);
        let values: Vec<f32> = out.into_data().iter::<f32>().collect();
        assert!(values.iter().all(|v| v.abs() < 1e-6));

        let ones = normalize_imagenet(Tensor::<NdArray, 4>::ones([1, 3, 1, 1], &device));
        let values: Vec<f32> = ones.into_data().iter::<f32>().collect();
        assert!((values[0] - (1.0 - 0.485) / 0.229).abs() < 1e-5);
    }

    #[test]
    fn test_trainable_params_are_head_params() {
        let device = Default::default();
        let model = small_model(&device);

        assert_eq!(model.trainable_params(), model.head.trainable_params());
        assert!(model.non_trainable_params() >= model.backbone.num_params());
    }

    #[test]
    fn test_backbone_receives_no_gradient() {
        let device = Default::default();
        let model = small_model(&device);
        let images = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);

        let grads = model.forward_train(images).sum().backward();

        assert!(model.backbone.conv1.weight.grad(&grads).is_none());
        assert!(model.head.output.weight.grad(&grads).is_some());
    }
}
