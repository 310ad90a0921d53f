//! Hierarchical integer spatial addressing: voxel bit-width allocation,
//! voxel/sub-voxel coordinate packing, and bin sizing.
//!
//! Grounded on `original_source/src/DEM/APIPrivate.cpp::figureOutNV` and
//! `::decideBinSize`: the bit-ranking/doubling-threshold loop and the
//! base/leftover-bit distribution below follow that routine's structure
//! exactly rather than reinventing the "rank extents, grant extra bits"
//! prose of the distilled spec.

use crate::constants::{BIN_ID_MAX, VOXEL_COUNT_POWER2, VOXEL_RES_POWER2};
use crate::error::DemError;

/// One of the three world axes, used to mark an "exact" domain dimension.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Bit-widths and physical length unit derived from the user's requested
/// domain size. `nv[i]` is the voxel-coordinate bit-width along axis `i`;
/// `l` is the physical length of one sub-voxel count.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VoxelLayout {
    pub nv: [u32; 3],
    pub l: f64,
    pub voxel_size: [f64; 3],
    pub world_size: [f64; 3],
}

impl VoxelLayout {
    /// `ℓ · 2^VOXEL_RES_POWER2 · 2^nv[axis]`, the physical extent one axis's
    /// voxel range actually covers.
    #[must_use]
    pub fn axis_world_size(&self, axis: usize) -> f64 {
        self.world_size[axis]
    }
}

/// Computes the three voxel bit-widths and the shared length unit `ℓ` for a
/// requested box of size `user_box` (meters), optionally pinning one axis to
/// be dimensioned exactly (rather than rounded up to satisfy the other two).
///
/// # Errors
/// Returns [`DemError::Configuration`] if any requested extent is
/// non-positive (a zero domain is a fatal configuration error per §6).
pub fn figure_out_nv(user_box: [f64; 3], exact_axis: Option<Axis>) -> Result<VoxelLayout, DemError> {
    if user_box.iter().any(|&s| !(s > 0.0)) {
        return Err(DemError::Configuration(
            "domain box dimensions must all be strictly positive".to_string(),
        ));
    }

    // Rank the three extents ascending, remembering which axis each came from.
    let mut ranked: [(usize, f64); 3] = [(0, user_box[0]), (1, user_box[1]), (2, user_box[2])];
    ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    let axis_of_rank = [ranked[0].0, ranked[1].0, ranked[2].0];
    let mut xyz = [ranked[0].1, ranked[1].1, ranked[2].1];

    // Grant the larger of each neighboring pair an extra bit whenever it
    // exceeds sqrt(2) times the smaller, doubling the smaller in-place so the
    // next comparison sees the adjustment.
    let mut extra_bits = [0u32; 2];
    while xyz[0] < xyz[1] {
        if (2.0_f64).sqrt() * xyz[0] > xyz[1] {
            break;
        }
        extra_bits[0] += 1;
        xyz[0] *= 2.0;
    }
    while xyz[1] < xyz[2] {
        if (2.0_f64).sqrt() * xyz[1] > xyz[2] {
            break;
        }
        extra_bits[1] += 1;
        xyz[1] *= 2.0;
    }

    let base_bits = (VOXEL_COUNT_POWER2 - extra_bits[0] - extra_bits[1]) / 3;
    let mut left_over = (VOXEL_COUNT_POWER2 - extra_bits[0] - extra_bits[1]) % 3;
    let mut bits_3rd = base_bits;
    let mut bits_2nd = bits_3rd + extra_bits[0];
    let mut bits_1st = bits_2nd + extra_bits[1];
    // Leftover bits go to the axis with the fewest bits first.
    while left_over > 0 {
        if bits_3rd < bits_2nd {
            bits_3rd += 1;
        } else if bits_2nd < bits_1st {
            bits_2nd += 1;
        } else {
            bits_1st += 1;
        }
        left_over -= 1;
    }
    let mut bits = [bits_3rd, bits_2nd, bits_1st];
    let ranked_box = [ranked[0].1, ranked[1].1, ranked[2].1];

    let l = match exact_axis {
        None => {
            // l is the max of the three axis-implied values, so every axis fits.
            let l3 = ranked_box[0] / 2f64.powi(VOXEL_RES_POWER2 as i32) / 2f64.powi(bits[0] as i32);
            let l2 = ranked_box[1] / 2f64.powi(VOXEL_RES_POWER2 as i32) / 2f64.powi(bits[1] as i32);
            let l1 = ranked_box[2] / 2f64.powi(VOXEL_RES_POWER2 as i32) / 2f64.powi(bits[2] as i32);
            l3.max(l2).max(l1)
        }
        Some(exact) => {
            let exact_rank = axis_of_rank.iter().position(|&a| a == axis_index(exact)).unwrap();
            let not_exact: Vec<usize> = (0..3).filter(|&r| r != exact_rank).collect();
            let mut l = ranked_box[exact_rank] / 2f64.powi(VOXEL_RES_POWER2 as i32) / 2f64.powi(bits[exact_rank] as i32);
            for &other in &not_exact {
                while l * 2f64.powi(VOXEL_RES_POWER2 as i32) * 2f64.powi(bits[other] as i32) < ranked_box[other] {
                    bits[exact_rank] -= 1;
                    bits[other] += 1;
                    l = ranked_box[exact_rank] / 2f64.powi(VOXEL_RES_POWER2 as i32) / 2f64.powi(bits[exact_rank] as i32);
                }
            }
            l
        }
    };

    let mut nv = [0u32; 3];
    for rank in 0..3 {
        nv[axis_of_rank[rank]] = bits[rank];
    }

    let voxel_size = [
        2f64.powi(VOXEL_RES_POWER2 as i32) * l,
        2f64.powi(VOXEL_RES_POWER2 as i32) * l,
        2f64.powi(VOXEL_RES_POWER2 as i32) * l,
    ];
    let world_size = [
        voxel_size[0] * 2f64.powi(nv[0] as i32),
        voxel_size[1] * 2f64.powi(nv[1] as i32),
        voxel_size[2] * 2f64.powi(nv[2] as i32),
    ];

    Ok(VoxelLayout {
        nv,
        l,
        voxel_size,
        world_size,
    })
}

fn axis_index(a: Axis) -> usize {
    match a {
        Axis::X => 0,
        Axis::Y => 1,
        Axis::Z => 2,
    }
}

/// `(voxelID, sx, sy, sz)`: the integer address of a point in the simulated
/// world. `voxel_id` packs `(ix, iy, iz)` at the bit-widths carried by the
/// owning [`VoxelLayout`]; `sx/sy/sz` are sub-voxel offsets in
/// `[0, 2^VOXEL_RES_POWER2)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SpatialAddress {
    pub voxel_id: u64,
    pub sx: u32,
    pub sy: u32,
    pub sz: u32,
}

impl SpatialAddress {
    #[must_use]
    pub fn pack_voxel(layout: &VoxelLayout, ix: u32, iy: u32, iz: u32) -> u64 {
        u64::from(ix) | (u64::from(iy) << layout.nv[0]) | (u64::from(iz) << (layout.nv[0] + layout.nv[1]))
    }

    #[must_use]
    pub fn unpack_voxel(layout: &VoxelLayout, voxel_id: u64) -> (u32, u32, u32) {
        let x_mask = (1u64 << layout.nv[0]) - 1;
        let y_mask = (1u64 << layout.nv[1]) - 1;
        let ix = (voxel_id & x_mask) as u32;
        let iy = ((voxel_id >> layout.nv[0]) & y_mask) as u32;
        let iz = (voxel_id >> (layout.nv[0] + layout.nv[1])) as u32;
        (ix, iy, iz)
    }

    /// Converts a physical-space point (relative to the domain origin) into
    /// its spatial address.
    #[must_use]
    pub fn from_physical(layout: &VoxelLayout, p: [f64; 3]) -> Self {
        let res = f64::from(1u32 << VOXEL_RES_POWER2);
        let mut ix = [0u32; 3];
        let mut s = [0u32; 3];
        for axis in 0..3 {
            let total_counts = p[axis].max(0.0) / layout.l;
            let voxel = (total_counts / res) as u32;
            let sub = (total_counts - f64::from(voxel) * res).round() as u32;
            // Normalize overflow: a sub-voxel coordinate never equals 2^VOXEL_RES_POWER2.
            let (voxel, sub) = if sub >= (1u32 << VOXEL_RES_POWER2) {
                (voxel + 1, sub - (1u32 << VOXEL_RES_POWER2))
            } else {
                (voxel, sub)
            };
            ix[axis] = voxel;
            s[axis] = sub;
        }
        Self {
            voxel_id: Self::pack_voxel(layout, ix[0], ix[1], ix[2]),
            sx: s[0],
            sy: s[1],
            sz: s[2],
        }
    }

    /// Converts back to physical space (relative to the domain origin).
    #[must_use]
    pub fn to_physical(&self, layout: &VoxelLayout) -> [f64; 3] {
        let (ix, iy, iz) = Self::unpack_voxel(layout, self.voxel_id);
        let res = f64::from(1u32 << VOXEL_RES_POWER2);
        [
            (f64::from(ix) * res + f64::from(self.sx)) * layout.l,
            (f64::from(iy) * res + f64::from(self.sy)) * layout.l,
            (f64::from(iz) * res + f64::from(self.sz)) * layout.l,
        ]
    }
}

/// A uniform grid of cubic bins covering the domain, used by the broad-phase.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BinGrid {
    pub bin_size: f64,
    pub nb: [u32; 3],
}

impl BinGrid {
    /// Builds a bin grid for `layout` with the requested `bin_size`.
    ///
    /// # Errors
    /// Returns [`DemError::Configuration`] if the total bin count would
    /// overflow the configured bin-index type.
    pub fn new(layout: &VoxelLayout, bin_size: f64) -> Result<Self, DemError> {
        if !(bin_size > 0.0) {
            return Err(DemError::Configuration("bin size must be strictly positive".to_string()));
        }
        let nb = [
            (layout.axis_world_size(0) / bin_size).ceil() as u32 + 1,
            (layout.axis_world_size(1) / bin_size).ceil() as u32 + 1,
            (layout.axis_world_size(2) / bin_size).ceil() as u32 + 1,
        ];
        let total = u64::from(nb[0]) * u64::from(nb[1]) * u64::from(nb[2]);
        if total > BIN_ID_MAX {
            return Err(DemError::Configuration(format!(
                "total bin count {total} exceeds the bin-index capacity {BIN_ID_MAX}; increase binSize"
            )));
        }
        Ok(Self { bin_size, nb })
    }

    #[must_use]
    pub fn total_bins(&self) -> u64 {
        u64::from(self.nb[0]) * u64::from(self.nb[1]) * u64::from(self.nb[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_budget_is_conserved_for_a_cubic_box() {
        let layout = figure_out_nv([10.0, 10.0, 10.0], None).unwrap();
        assert_eq!(layout.nv.iter().sum::<u32>(), VOXEL_COUNT_POWER2);
    }

    #[test]
    fn bit_budget_is_conserved_for_an_elongated_box() {
        let layout = figure_out_nv([100.0, 3.0, 5.0], None).unwrap();
        assert_eq!(layout.nv.iter().sum::<u32>(), VOXEL_COUNT_POWER2);
    }

    #[test]
    fn world_box_is_at_least_the_user_box_along_every_axis() {
        for box_size in [[1.5, 1.5, 0.0001], [2.0, 2.0, 2.0], [0.01, 50.0, 3.0]] {
            let layout = figure_out_nv(box_size, None).unwrap();
            for axis in 0..3 {
                assert!(
                    layout.axis_world_size(axis) >= box_size[axis] - 1e-9,
                    "axis {axis}: world {} < user {}",
                    layout.axis_world_size(axis),
                    box_size[axis]
                );
            }
        }
    }

    #[test]
    fn zero_extent_is_a_configuration_error() {
        assert!(figure_out_nv([0.0, 1.0, 1.0], None).is_err());
    }

    #[test]
    fn spatial_round_trip_within_one_length_unit() {
        let layout = figure_out_nv([10.0, 10.0, 10.0], None).unwrap();
        let p = [3.3333, 7.777, 1.111];
        let addr = SpatialAddress::from_physical(&layout, p);
        let back = addr.to_physical(&layout);
        for axis in 0..3 {
            assert!((back[axis] - p[axis]).abs() <= layout.l * 2.0);
        }
    }

    #[test]
    fn bin_grid_rejects_overflowing_configuration() {
        let layout = figure_out_nv([1e9, 1e9, 1e9], None).unwrap();
        assert!(BinGrid::new(&layout, 1e-6).is_err());
    }
}
