use super::sphere_bin_touch_counts::{GridConfig, SphereSample};
use crate::{BufferView, ComputeError};
use bytemuck::{Pod, Zeroable};

/// One `(binID, sphereID)` touch pair, as produced by the broad-phase scatter pass.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq, Eq)]
pub struct BinSpherePair {
    pub bin_id: u32,
    pub sphere_id: u32,
}

fn bin_id_of(ix: u32, iy: u32, iz: u32, nb: [u32; 3]) -> u32 {
    (iz * nb[1] + iy) * nb[0] + ix
}

/// Recomputes the same inflated-AABB bin range as `sphere_bin_touch_counts`
/// and writes one `BinSpherePair` per touched bin at `offset..offset+count`.
fn scatter_one(sphere_idx: u32, sphere: &SphereSample, grid: &GridConfig, offset: u32, out: &mut [BinSpherePair]) {
    let r = sphere.radius + grid.envelope;
    let axis = |c: f32, o: f32, nb: u32| -> (u32, u32) {
        let lo = ((c - r - o) / grid.bin_size).floor().max(0.0) as u32;
        let hi = (((c + r - o) / grid.bin_size).floor().max(0.0) as u32).min(nb.saturating_sub(1));
        (lo, hi.max(lo))
    };
    let (xlo, xhi) = axis(sphere.center[0], grid.origin[0], grid.nb[0]);
    let (ylo, yhi) = axis(sphere.center[1], grid.origin[1], grid.nb[1]);
    let (zlo, zhi) = axis(sphere.center[2], grid.origin[2], grid.nb[2]);

    let mut k = 0usize;
    for iz in zlo..=zhi {
        for iy in ylo..=yhi {
            for ix in xlo..=xhi {
                out[offset as usize + k] = BinSpherePair {
                    bin_id: bin_id_of(ix, iy, iz, grid.nb),
                    sphere_id: sphere_idx,
                };
                k += 1;
            }
        }
    }
}

pub fn handle_scatter_bin_sphere_pairs(binds: &[BufferView]) -> Result<Vec<Vec<u8>>, ComputeError> {
    if binds.len() < 4 {
        return Err(ComputeError::ShapeMismatch(
            "ScatterBinSpherePairs kernel expects 4 buffers",
        ));
    }
    let spheres_view = &binds[0];
    let offsets_view = &binds[1];
    let grid_view = &binds[2];
    let out_view = &binds[3];

    if spheres_view.element_size_in_bytes != std::mem::size_of::<SphereSample>() {
        return Err(ComputeError::ShapeMismatch(
            "ScatterBinSpherePairs expects SphereSample-sized elements",
        ));
    }
    if offsets_view.element_size_in_bytes != std::mem::size_of::<u32>() {
        return Err(ComputeError::ShapeMismatch(
            "ScatterBinSpherePairs expects u32 prefix-sum offsets",
        ));
    }
    let spheres: &[SphereSample] = bytemuck::cast_slice(&spheres_view.data);
    let offsets: &[u32] = bytemuck::cast_slice(&offsets_view.data);
    let grid: &GridConfig = bytemuck::from_bytes(&grid_view.data);

    if offsets.len() != spheres.len() {
        return Err(ComputeError::ShapeMismatch(
            "ScatterBinSpherePairs requires one offset per sphere",
        ));
    }

    let total_pairs = out_view.shape.iter().product::<usize>();
    let mut out = vec![BinSpherePair { bin_id: 0, sphere_id: 0 }; total_pairs];
    for (i, sphere) in spheres.iter().enumerate() {
        scatter_one(i as u32, sphere, grid, offsets[i], &mut out);
    }
    Ok(vec![bytemuck::cast_slice(&out).to_vec()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::sphere_bin_touch_counts::touch_count;
    use crate::{ComputeBackend, CpuBackend, Kernel};
    use std::sync::Arc;

    #[test]
    fn scatter_offsets_match_touch_counts() {
        let grid = GridConfig {
            origin: [0.0, 0.0, 0.0],
            bin_size: 1.0,
            nb: [10, 10, 10],
            envelope: 0.0,
        };
        let spheres = vec![
            SphereSample { center: [0.5, 0.5, 0.5], radius: 0.1, owner_id: 0, family: 0, material_id: 0, _pad: 0 },
            SphereSample { center: [1.0, 0.5, 0.5], radius: 0.2, owner_id: 1, family: 0, material_id: 0, _pad: 0 },
        ];
        let counts: Vec<u32> = spheres.iter().map(|s| touch_count(s, &grid)).collect();
        let mut offsets = vec![0u32; spheres.len()];
        let mut running = 0u32;
        for (i, c) in counts.iter().enumerate() {
            offsets[i] = running;
            running += c;
        }

        let cpu = CpuBackend::new();
        let spheres_bytes: Arc<[u8]> = bytemuck::cast_slice(&spheres).to_vec().into();
        let spheres_view = BufferView::new(spheres_bytes, vec![spheres.len()], std::mem::size_of::<SphereSample>());
        let offsets_bytes: Arc<[u8]> = bytemuck::cast_slice(&offsets).to_vec().into();
        let offsets_view = BufferView::new(offsets_bytes, vec![offsets.len()], 4);
        let grid_bytes: Arc<[u8]> = bytemuck::bytes_of(&grid).to_vec().into();
        let grid_view = BufferView::new(grid_bytes, vec![1], std::mem::size_of::<GridConfig>());
        let out_bytes: Arc<[u8]> = vec![0u8; running as usize * std::mem::size_of::<BinSpherePair>()].into();
        let out_view = BufferView::new(out_bytes, vec![running as usize], std::mem::size_of::<BinSpherePair>());

        let result = cpu
            .dispatch(
                &Kernel::ScatterBinSpherePairs,
                &[spheres_view, offsets_view, grid_view, out_view],
                [1, 1, 1],
            )
            .expect("dispatch failed");
        let pairs: &[BinSpherePair] = bytemuck::cast_slice(&result[0]);
        assert_eq!(pairs.len(), running as usize);
        assert!(pairs.iter().any(|p| p.sphere_id == 1));
    }
}
