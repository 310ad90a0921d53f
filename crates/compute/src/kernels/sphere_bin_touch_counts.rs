use crate::{BufferView, ComputeError};
use bytemuck::{Pod, Zeroable};

/// A single sphere sample as seen by the broad-phase kernels: world-space
/// center, radius, owning clump id and family tag.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq)]
pub struct SphereSample {
    pub center: [f32; 3],
    pub radius: f32,
    pub owner_id: u32,
    pub family: u32,
    pub material_id: u32,
    pub _pad: u32,
}

/// Uniform grid description shared by the two broad-phase passes.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq)]
pub struct GridConfig {
    pub origin: [f32; 3],
    pub bin_size: f32,
    pub nb: [u32; 3],
    pub envelope: f32,
}

/// Inclusive bin-index range a sphere's inflated AABB occupies along one axis.
fn axis_range(center: f32, radius_plus_envelope: f32, origin: f32, bin_size: f32, nb: u32) -> (u32, u32) {
    let lo = ((center - radius_plus_envelope - origin) / bin_size).floor();
    let hi = ((center + radius_plus_envelope - origin) / bin_size).floor();
    let lo = lo.max(0.0) as u32;
    let hi = (hi.max(0.0) as u32).min(nb.saturating_sub(1));
    (lo, hi.max(lo))
}

pub fn touch_count(sphere: &SphereSample, grid: &GridConfig) -> u32 {
    let r = sphere.radius + grid.envelope;
    let (xlo, xhi) = axis_range(sphere.center[0], r, grid.origin[0], grid.bin_size, grid.nb[0]);
    let (ylo, yhi) = axis_range(sphere.center[1], r, grid.origin[1], grid.bin_size, grid.nb[1]);
    let (zlo, zhi) = axis_range(sphere.center[2], r, grid.origin[2], grid.bin_size, grid.nb[2]);
    (xhi - xlo + 1) * (yhi - ylo + 1) * (zhi - zlo + 1)
}

pub fn handle_sphere_bin_touch_counts(binds: &[BufferView]) -> Result<Vec<Vec<u8>>, ComputeError> {
    if binds.len() < 3 {
        return Err(ComputeError::ShapeMismatch(
            "SphereBinTouchCounts kernel expects 3 buffers",
        ));
    }
    let spheres_view = &binds[0];
    let grid_view = &binds[1];
    if spheres_view.element_size_in_bytes != std::mem::size_of::<SphereSample>() {
        return Err(ComputeError::ShapeMismatch(
            "SphereBinTouchCounts expects SphereSample-sized elements",
        ));
    }
    if grid_view.data.len() != std::mem::size_of::<GridConfig>() {
        return Err(ComputeError::ShapeMismatch(
            "SphereBinTouchCounts expects a single GridConfig uniform",
        ));
    }
    let spheres: &[SphereSample] = bytemuck::cast_slice(&spheres_view.data);
    let grid: &GridConfig = bytemuck::from_bytes(&grid_view.data);

    let counts: Vec<u32> = spheres.iter().map(|s| touch_count(s, grid)).collect();
    Ok(vec![bytemuck::cast_slice(&counts).to_vec()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ComputeBackend, CpuBackend, Kernel};
    use std::sync::Arc;

    fn grid() -> GridConfig {
        GridConfig {
            origin: [0.0, 0.0, 0.0],
            bin_size: 1.0,
            nb: [10, 10, 10],
            envelope: 0.0,
        }
    }

    #[test]
    fn sphere_well_inside_one_bin_touches_one_bin() {
        let sample = SphereSample {
            center: [0.5, 0.5, 0.5],
            radius: 0.1,
            owner_id: 0,
            family: 0,
            material_id: 0, _pad: 0,
        };
        assert_eq!(touch_count(&sample, &grid()), 1);
    }

    #[test]
    fn sphere_straddling_a_boundary_touches_two_bins() {
        let sample = SphereSample {
            center: [1.0, 0.5, 0.5],
            radius: 0.2,
            owner_id: 0,
            family: 0,
            material_id: 0, _pad: 0,
        };
        assert_eq!(touch_count(&sample, &grid()), 2);
    }

    #[test]
    fn dispatch_matches_reference_touch_count() {
        let cpu = CpuBackend::new();
        let spheres = vec![
            SphereSample { center: [0.5, 0.5, 0.5], radius: 0.1, owner_id: 0, family: 0, material_id: 0, _pad: 0 },
            SphereSample { center: [1.0, 0.5, 0.5], radius: 0.2, owner_id: 1, family: 0, material_id: 0, _pad: 0 },
        ];
        let spheres_bytes: Arc<[u8]> = bytemuck::cast_slice(&spheres).to_vec().into();
        let spheres_view = BufferView::new(spheres_bytes, vec![spheres.len()], std::mem::size_of::<SphereSample>());
        let grid_bytes: Arc<[u8]> = bytemuck::bytes_of(&grid()).to_vec().into();
        let grid_view = BufferView::new(grid_bytes, vec![1], std::mem::size_of::<GridConfig>());
        let out_bytes: Arc<[u8]> = vec![0u8; spheres.len() * 4].into();
        let out_view = BufferView::new(out_bytes, vec![spheres.len()], 4);

        let result = cpu
            .dispatch(&Kernel::SphereBinTouchCounts, &[spheres_view, grid_view, out_view], [1, 1, 1])
            .expect("dispatch failed");
        let counts: &[u32] = bytemuck::cast_slice(&result[0]);
        assert_eq!(counts, &[1, 2]);
    }
}
