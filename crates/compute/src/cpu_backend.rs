use crate::{kernels, BufferView, ComputeBackend, ComputeError, Kernel};

/// Reference CPU implementation of every kernel. Used by the test suite and
/// as the default backend when no GPU device is requested.
#[derive(Default, Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ComputeBackend for CpuBackend {
    fn dispatch(
        &self,
        shader: &Kernel,
        binds: &[BufferView],
        _workgroups: [u32; 3],
    ) -> Result<Vec<Vec<u8>>, ComputeError> {
        for buffer_view in binds {
            buffer_view.validate()?;
        }
        match shader {
            Kernel::SphereBinTouchCounts => kernels::handle_sphere_bin_touch_counts(binds),
            Kernel::ScatterBinSpherePairs => kernels::handle_scatter_bin_sphere_pairs(binds),
            Kernel::NarrowPhaseSphereContacts => kernels::handle_narrow_phase_sphere_contacts(binds),
            Kernel::MapContactHistory => kernels::handle_map_contact_history(binds),
            Kernel::EvaluateContactForces => kernels::handle_evaluate_contact_forces(binds),
            Kernel::IntegrateOwners => kernels::handle_integrate_owners(binds),
            Kernel::SegmentedReduceSum => kernels::handle_segmented_reduce_sum(binds),
            Kernel::ScatterAdd => kernels::handle_scatter_add(binds),
            Kernel::Gather => kernels::handle_gather(binds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_shape_fails() {
        let cpu = CpuBackend::new();
        let bad_buf = BufferView::new(vec![0u8; 12].into(), vec![4], 4);
        let result = cpu.dispatch(&Kernel::Gather, &[bad_buf], [1, 1, 1]);
        assert!(
            matches!(result, Err(ComputeError::ShapeMismatch(_))),
            "Expected ShapeMismatch error, got {result:?}"
        );
    }
}
