//! kT broad-phase: sphere/bin touch counts, prefix sum, and pair scatter,
//! dispatched through [`compute::ComputeBackend`] (§4.5).

use crate::error::DemError;
use crate::scene::{OwnerKind, SceneState};
use crate::spatial::BinGrid;
use crate::template::TemplateStore;
use compute::kernels::scatter_bin_sphere_pairs::BinSpherePair;
use compute::kernels::sphere_bin_touch_counts::{GridConfig, SphereSample};
use compute::{BufferView, ComputeBackend, Kernel};
use std::sync::Arc;

use crate::constants::MAX_SPHERES_PER_BIN;

/// One sphere component flattened out of every clump owner in the scene,
/// in world space, ready to feed the broad-phase kernels.
#[derive(Copy, Clone, Debug)]
pub struct FlattenedSphere {
    pub owner: u32,
    pub family: u32,
    pub material: u32,
    pub center: [f64; 3],
    pub radius: f64,
}

/// Flattens every clump owner's components into world-space spheres.
/// Analytical and mesh owners are not spheres and are handled separately by
/// narrow-phase.
#[must_use]
pub fn flatten_spheres(scene: &SceneState, templates: &TemplateStore) -> Vec<FlattenedSphere> {
    let mut out = Vec::new();
    for (idx, owner) in scene.owners().iter().enumerate() {
        if let OwnerKind::Clump(handle) = owner.kind {
            let pos = owner.pos.to_physical(&scene.layout);
            let template = templates.clump(handle);
            for component in &template.components {
                let offset = owner.ori.rotate_vector(component.offset);
                out.push(FlattenedSphere {
                    owner: idx as u32,
                    family: owner.family,
                    material: component.material.0,
                    center: [pos[0] + offset[0], pos[1] + offset[1], pos[2] + offset[2]],
                    radius: component.radius,
                });
            }
        }
    }
    out
}

fn to_sphere_samples(spheres: &[FlattenedSphere]) -> Vec<SphereSample> {
    spheres
        .iter()
        .map(|s| SphereSample {
            center: [s.center[0] as f32, s.center[1] as f32, s.center[2] as f32],
            radius: s.radius as f32,
            owner_id: s.owner,
            family: s.family,
            material_id: s.material,
            _pad: 0,
        })
        .collect()
}

/// Runs the two broad-phase kernel dispatches and returns every
/// `(binID, sphereID)` touch pair, sorted by bin.
///
/// # Errors
/// Returns [`DemError::RuntimeAssertion`] if any bin would end up holding
/// more than [`MAX_SPHERES_PER_BIN`] spheres (invariant: broad-phase bins
/// are bounded, per the Non-goals on unbounded per-bin growth).
pub fn run_broad_phase(
    backend: &dyn ComputeBackend,
    spheres: &[FlattenedSphere],
    grid: &BinGrid,
    envelope: f64,
) -> Result<Vec<BinSpherePair>, DemError> {
    if spheres.is_empty() {
        return Ok(Vec::new());
    }
    let samples = to_sphere_samples(spheres);
    let grid_config = GridConfig {
        origin: [0.0, 0.0, 0.0],
        bin_size: grid.bin_size as f32,
        nb: grid.nb,
        envelope: envelope as f32,
    };

    let samples_bytes: Arc<[u8]> = bytemuck::cast_slice(&samples).to_vec().into();
    let samples_view = BufferView::new(samples_bytes, vec![samples.len()], std::mem::size_of::<SphereSample>());
    let grid_bytes: Arc<[u8]> = bytemuck::bytes_of(&grid_config).to_vec().into();
    let grid_view = BufferView::new(grid_bytes, vec![1], std::mem::size_of::<GridConfig>());
    let counts_out = BufferView::new(Arc::from(Vec::<u8>::new()), vec![0], 4);

    let counts_result = backend.dispatch(
        &Kernel::SphereBinTouchCounts,
        &[samples_view.clone(), grid_view.clone(), counts_out],
        [1, 1, 1],
    )?;
    let counts: &[u32] = bytemuck::cast_slice(&counts_result[0]);

    let mut offsets = vec![0u32; counts.len()];
    let mut running = 0u32;
    for (i, c) in counts.iter().enumerate() {
        offsets[i] = running;
        running += c;
    }

    let offsets_bytes: Arc<[u8]> = bytemuck::cast_slice(&offsets).to_vec().into();
    let offsets_view = BufferView::new(offsets_bytes, vec![offsets.len()], 4);
    let pairs_out = BufferView::new(
        Arc::from(vec![0u8; running as usize * std::mem::size_of::<BinSpherePair>()]),
        vec![running as usize],
        std::mem::size_of::<BinSpherePair>(),
    );

    let pairs_result = backend.dispatch(
        &Kernel::ScatterBinSpherePairs,
        &[samples_view, offsets_view, grid_view, pairs_out],
        [1, 1, 1],
    )?;
    let pairs: Vec<BinSpherePair> = bytemuck::cast_slice(&pairs_result[0]).to_vec();

    let mut per_bin_count = std::collections::HashMap::<u32, usize>::new();
    for pair in &pairs {
        *per_bin_count.entry(pair.bin_id).or_insert(0) += 1;
    }
    if let Some((&bin, &n)) = per_bin_count.iter().find(|(_, &n)| n > MAX_SPHERES_PER_BIN) {
        return Err(DemError::RuntimeAssertion(format!(
            "bin {bin} holds {n} spheres, exceeding the MAX_SPHERES_PER_BIN cap of {MAX_SPHERES_PER_BIN}; increase binSize"
        )));
    }

    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Owner, Quaternion};
    use crate::spatial::{figure_out_nv, SpatialAddress};
    use crate::template::{ClumpComponent, ClumpTemplate, MaterialHandle};
    use compute::CpuBackend;

    #[test]
    fn flatten_spheres_rotates_component_offsets_by_owner_orientation() {
        let layout = figure_out_nv([10.0, 10.0, 10.0], None).unwrap();
        let mut scene = SceneState::new(layout);
        let mut templates = TemplateStore::default();
        let handle = templates.load_clump_type(ClumpTemplate {
            components: vec![ClumpComponent { offset: [1.0, 0.0, 0.0], radius: 0.2, material: MaterialHandle(0) }],
            mass: 1.0,
            moi: [1.0; 3],
            volume: 1.0,
        });

        // 90 degrees about +Z: local +X offset should land at world +Y.
        let half = std::f64::consts::FRAC_PI_4;
        let ori = Quaternion([half.cos(), 0.0, 0.0, half.sin()]);
        scene.add_owner(Owner {
            kind: OwnerKind::Clump(handle),
            pos: SpatialAddress::from_physical(&layout, [5.0, 5.0, 5.0]),
            ori,
            vel: [0.0; 3],
            ang_vel: [0.0; 3],
            acc: [0.0; 3],
            ang_acc: [0.0; 3],
            family: 0,
            wildcards: [0.0; crate::constants::W_MAX],
        });

        let spheres = flatten_spheres(&scene, &templates);
        assert_eq!(spheres.len(), 1);
        assert!((spheres[0].center[0] - 5.0).abs() < 1e-6, "rotated offset should not remain along world X");
        assert!((spheres[0].center[1] - 6.0).abs() < 1e-6, "rotated offset should land along world Y");
    }

    #[test]
    fn two_spheres_in_the_same_bin_are_both_reported() {
        let grid = BinGrid {
            bin_size: 10.0,
            nb: [2, 2, 2],
        };
        let spheres = vec![
            FlattenedSphere { owner: 0, family: 0, material: 0, center: [1.0, 1.0, 1.0], radius: 0.5 },
            FlattenedSphere { owner: 1, family: 0, material: 0, center: [1.5, 1.0, 1.0], radius: 0.5 },
        ];
        let backend = CpuBackend::new();
        let pairs = run_broad_phase(&backend, &spheres, &grid, 0.0).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].bin_id, pairs[1].bin_id);
    }

    #[test]
    fn empty_scene_yields_no_pairs() {
        let grid = BinGrid { bin_size: 1.0, nb: [1, 1, 1] };
        let backend = CpuBackend::new();
        let pairs = run_broad_phase(&backend, &[], &grid, 0.0).unwrap();
        assert!(pairs.is_empty());
    }

    #[test]
    fn overcrowded_bin_is_a_runtime_assertion() {
        let grid = BinGrid { bin_size: 1000.0, nb: [1, 1, 1] };
        let spheres: Vec<FlattenedSphere> = (0..(MAX_SPHERES_PER_BIN as u32 + 1))
            .map(|i| FlattenedSphere { owner: i, family: 0, material: 0, center: [500.0, 500.0, 500.0], radius: 0.1 })
            .collect();
        let backend = CpuBackend::new();
        let result = run_broad_phase(&backend, &spheres, &grid, 0.0);
        assert!(matches!(result, Err(DemError::RuntimeAssertion(_))));
    }
}
