use crate::{BufferView, ComputeError};
use bytemuck::{Pod, Zeroable};

/// Owner pose and velocity state advanced in place by the integrator kernel.
/// Mirrors the subset of `crates/dem`'s owner arrays a GPU dispatch needs;
/// voxel/sub-voxel decomposition and quaternion renormalization are handled
/// by the pure-Rust reference integrator, which this kernel approximates for
/// the common translational forward-Euler case.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq)]
pub struct OwnerState {
    pub pos: [f32; 3],
    pub mass: f32,
    pub vel: [f32; 3],
    pub fixed: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq)]
pub struct IntegratorParams {
    pub gravity: [f32; 3],
    pub h: f32,
}

pub fn handle_integrate_owners(binds: &[BufferView]) -> Result<Vec<Vec<u8>>, ComputeError> {
    if binds.len() < 3 {
        return Err(ComputeError::ShapeMismatch(
            "IntegrateOwners kernel expects 3 buffers",
        ));
    }
    let owners_view = &binds[0];
    let forces_view = &binds[1];
    let params_view = &binds[2];

    if owners_view.element_size_in_bytes != std::mem::size_of::<OwnerState>() {
        return Err(ComputeError::ShapeMismatch(
            "IntegrateOwners expects OwnerState-sized owners",
        ));
    }
    if forces_view.element_size_in_bytes != std::mem::size_of::<[f32; 3]>() {
        return Err(ComputeError::ShapeMismatch(
            "IntegrateOwners expects a per-owner force vec3 buffer",
        ));
    }
    if params_view.data.len() != std::mem::size_of::<IntegratorParams>() {
        return Err(ComputeError::ShapeMismatch(
            "IntegrateOwners expects a single IntegratorParams uniform",
        ));
    }

    let owners: &[OwnerState] = bytemuck::cast_slice(&owners_view.data);
    let forces: &[[f32; 3]] = bytemuck::cast_slice(&forces_view.data);
    let params: &IntegratorParams = bytemuck::from_bytes(&params_view.data);

    if forces.len() != owners.len() {
        return Err(ComputeError::ShapeMismatch(
            "IntegrateOwners requires one net force per owner",
        ));
    }

    let mut out = owners.to_vec();
    for (owner, force) in out.iter_mut().zip(forces.iter()) {
        if owner.fixed != 0 {
            continue;
        }
        let accel = [
            force[0] / owner.mass + params.gravity[0],
            force[1] / owner.mass + params.gravity[1],
            force[2] / owner.mass + params.gravity[2],
        ];
        owner.vel[0] += accel[0] * params.h;
        owner.vel[1] += accel[1] * params.h;
        owner.vel[2] += accel[2] * params.h;
        owner.pos[0] += owner.vel[0] * params.h;
        owner.pos[1] += owner.vel[1] * params.h;
        owner.pos[2] += owner.vel[2] * params.h;
    }

    Ok(vec![bytemuck::cast_slice(&out).to_vec()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ComputeBackend, CpuBackend, Kernel};
    use std::sync::Arc;

    #[test]
    fn gravity_accelerates_a_free_owner_downward() {
        let owners = vec![OwnerState { pos: [0.0; 3], mass: 1.0, vel: [0.0; 3], fixed: 0 }];
        let forces: Vec<[f32; 3]> = vec![[0.0; 3]];
        let params = IntegratorParams { gravity: [0.0, -9.8, 0.0], h: 0.1 };

        let cpu = CpuBackend::new();
        let owners_bytes: Arc<[u8]> = bytemuck::cast_slice(&owners).to_vec().into();
        let owners_view = BufferView::new(owners_bytes, vec![owners.len()], std::mem::size_of::<OwnerState>());
        let forces_bytes: Arc<[u8]> = bytemuck::cast_slice(&forces).to_vec().into();
        let forces_view = BufferView::new(forces_bytes, vec![forces.len()], std::mem::size_of::<[f32; 3]>());
        let params_bytes: Arc<[u8]> = bytemuck::bytes_of(&params).to_vec().into();
        let params_view = BufferView::new(params_bytes, vec![1], std::mem::size_of::<IntegratorParams>());

        let result = cpu
            .dispatch(&Kernel::IntegrateOwners, &[owners_view, forces_view, params_view], [1, 1, 1])
            .expect("dispatch failed");
        let out: &[OwnerState] = bytemuck::cast_slice(&result[0]);
        assert!((out[0].vel[1] - (-0.98)).abs() < 1e-5);
        assert!(out[0].pos[1] < 0.0);
    }

    #[test]
    fn fixed_owners_never_move() {
        let owners = vec![OwnerState { pos: [1.0, 2.0, 3.0], mass: 1.0, vel: [0.0; 3], fixed: 1 }];
        let forces: Vec<[f32; 3]> = vec![[100.0, 100.0, 100.0]];
        let params = IntegratorParams { gravity: [0.0, -9.8, 0.0], h: 0.1 };

        let cpu = CpuBackend::new();
        let owners_bytes: Arc<[u8]> = bytemuck::cast_slice(&owners).to_vec().into();
        let owners_view = BufferView::new(owners_bytes, vec![owners.len()], std::mem::size_of::<OwnerState>());
        let forces_bytes: Arc<[u8]> = bytemuck::cast_slice(&forces).to_vec().into();
        let forces_view = BufferView::new(forces_bytes, vec![forces.len()], std::mem::size_of::<[f32; 3]>());
        let params_bytes: Arc<[u8]> = bytemuck::bytes_of(&params).to_vec().into();
        let params_view = BufferView::new(params_bytes, vec![1], std::mem::size_of::<IntegratorParams>());

        let result = cpu
            .dispatch(&Kernel::IntegrateOwners, &[owners_view, forces_view, params_view], [1, 1, 1])
            .expect("dispatch failed");
        let out: &[OwnerState] = bytemuck::cast_slice(&result[0]);
        assert_eq!(out[0].pos, [1.0, 2.0, 3.0]);
        assert_eq!(out[0].vel, [0.0, 0.0, 0.0]);
    }
}
