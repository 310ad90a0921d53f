#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Device abstraction for dispatching the kinematic/dynamic thread's compute
//! kernels and copying memory to and from them.
//!
//! The simulation core never talks to a GPU API directly. Instead it builds
//! [`BufferView`]s over its own managed arrays and dispatches a [`Kernel`]
//! through a [`ComputeBackend`]. [`CpuBackend`] is a reference implementation
//! that runs every kernel in ordinary Rust and is what the test suite and the
//! default single-machine build use; [`wgpu_backend::WgpuBackend`] is the
//! sketch of a real GPU path.

mod backend;
pub mod kernels;
pub mod layout;
mod cpu_backend;
#[cfg(feature = "gpu")]
pub mod wgpu_backend;

pub use backend::ComputeBackend;
pub use cpu_backend::CpuBackend;

use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("buffer shape mismatch: {0}")]
    ShapeMismatch(&'static str),
    #[error("backend not available")]
    BackendUnavailable,
    #[error("kernel not implemented by this backend: {0}")]
    NotImplemented(&'static str),
}

/// The fixed set of compute kernels the kinematic and dynamic threads
/// dispatch. Kernels that touch per-contact or per-owner data are always
/// `#[must_use]`-sized to the current body/contact count; the caller resizes
/// buffers between steps as those counts change.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// kT broad-phase: per-sphere count of bins its inflated AABB touches.
    SphereBinTouchCounts,
    /// kT broad-phase: scatter `(binID, sphereID)` pairs at their prefix-summed offsets.
    ScatterBinSpherePairs,
    /// kT narrow-phase: candidate enumeration + geometric filtering within each active bin.
    NarrowPhaseSphereContacts,
    /// kT history mapper: map the new contact list onto the previous one.
    MapContactHistory,
    /// dT force evaluation: per-contact force/torque using the jitified force law.
    EvaluateContactForces,
    /// dT integrator: advance owner pose and velocity by one step.
    IntegrateOwners,
    /// Generic segmented sum reduction, used to fold per-contact forces onto owners
    /// and to prefix-sum per-sphere bin touch counts.
    SegmentedReduceSum,
    /// Generic scatter-add, used by the integrator to accumulate gravity and
    /// wildcard-driven terms onto the per-owner force buffer.
    ScatterAdd,
    /// Generic gather, used to fetch material properties by index.
    Gather,
}

#[derive(Clone)]
pub struct BufferView {
    pub data: Arc<[u8]>,
    /// Number of elements per dimension.
    pub shape: Vec<usize>,
    /// Size in bytes of a single element described by the innermost dimension of `shape`.
    pub element_size_in_bytes: usize,
}

impl BufferView {
    #[must_use]
    pub fn new(data: Arc<[u8]>, shape: Vec<usize>, element_size_in_bytes: usize) -> Self {
        Self {
            data,
            shape,
            element_size_in_bytes,
        }
    }

    /// Checks that `data.len()` matches the product of `shape` times the element size.
    pub fn validate(&self) -> Result<(), ComputeError> {
        let expected_elements = self.shape.iter().product::<usize>();
        let expected_bytes = expected_elements * self.element_size_in_bytes;
        if self.data.len() != expected_bytes {
            return Err(ComputeError::ShapeMismatch(
                "buffer data length does not match product of shape dimensions and element size",
            ));
        }
        Ok(())
    }
}

/// Picks a reasonable default backend: `CpuBackend` unless the `gpu` feature
/// is enabled and a device can be acquired, in which case callers should
/// prefer constructing `wgpu_backend::WgpuBackend` explicitly.
#[must_use]
pub fn default_backend() -> Arc<dyn ComputeBackend> {
    Arc::new(CpuBackend::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_shape_fails_validation() {
        let bad = BufferView::new(vec![0u8; 12].into(), vec![4, 4], 1);
        assert!(matches!(bad.validate(), Err(ComputeError::ShapeMismatch(_))));
    }

    #[test]
    fn correct_shape_validates() {
        let good = BufferView::new(vec![0u8; 16].into(), vec![4, 4], 1);
        assert!(good.validate().is_ok());
    }
}
