//! Backend selection
//!
//! CUDA when the `cuda` feature is enabled, NdArray (CPU) otherwise.

use burn::backend::Autodiff;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray")))]
compile_error!("At least one backend (cuda or ndarray) must be enabled!");

/// Autodiff backend the head is trained on
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Device type of the default backend
pub type DefaultDevice = <DefaultBackend as burn::tensor::backend::Backend>::Device;

/// Get the default device
pub fn default_device() -> DefaultDevice {
    DefaultDevice::default()
}

/// Human-readable name of the compiled-in backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
    {
        "NdArray (CPU)"
    }
}
