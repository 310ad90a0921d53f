//! Read-only scene statistics, computed once when the scene build finalizes.
//!
//! The teacher's counters pattern (`compute`'s kernels take pre-sized output
//! buffers rather than growing them) is mirrored here at the scene level:
//! rather than mutable running counters touched throughout the run, this is
//! a snapshot struct computed once and handed to the coordinator so kernel
//! dispatch buffers can be sized up front.

use crate::scene::SceneState;
use crate::template::TemplateStore;

/// Counts and extrema computed from the finalized scene and template store,
/// used to size kernel dispatch buffers before the first production.
#[derive(Copy, Clone, Debug, Default)]
pub struct SceneStats {
    pub owner_count: u32,
    pub clump_owner_count: u32,
    pub analytical_owner_count: u32,
    pub mesh_owner_count: u32,
    pub sphere_component_count: u32,
    pub max_components_per_clump: u32,
    pub distinct_families: u32,
}

impl SceneStats {
    #[must_use]
    pub fn compute(scene: &SceneState, templates: &TemplateStore) -> Self {
        use crate::scene::OwnerKind;
        use std::collections::HashSet;

        let mut stats = Self::default();
        let mut families = HashSet::new();
        for owner in scene.owners() {
            stats.owner_count += 1;
            families.insert(owner.family);
            match owner.kind {
                OwnerKind::Clump(handle) => {
                    stats.clump_owner_count += 1;
                    let n = templates.clump(handle).components.len() as u32;
                    stats.sphere_component_count += n;
                    stats.max_components_per_clump = stats.max_components_per_clump.max(n);
                }
                OwnerKind::Analytical(_) => stats.analytical_owner_count += 1,
                OwnerKind::Mesh(_) => stats.mesh_owner_count += 1,
            }
        }
        stats.distinct_families = families.len() as u32;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Owner, OwnerKind, Quaternion};
    use crate::spatial::{figure_out_nv, SpatialAddress};
    use crate::template::{ClumpComponent, ClumpTemplate, MaterialHandle};
    use crate::constants::W_MAX;

    #[test]
    fn stats_count_owners_and_components_by_kind() {
        let layout = figure_out_nv([10.0, 10.0, 10.0], None).unwrap();
        let mut scene = SceneState::new(layout);
        let mut templates = TemplateStore::default();
        let clump = templates.load_clump_type(ClumpTemplate {
            components: vec![
                ClumpComponent { offset: [0.0; 3], radius: 0.1, material: MaterialHandle(0) },
                ClumpComponent { offset: [0.2, 0.0, 0.0], radius: 0.1, material: MaterialHandle(0) },
            ],
            mass: 1.0,
            moi: [1.0; 3],
            volume: 1.0,
        });
        scene.add_owner(Owner {
            kind: OwnerKind::Clump(clump),
            pos: SpatialAddress::from_physical(&layout, [0.0; 3]),
            ori: Quaternion::default(),
            vel: [0.0; 3],
            ang_vel: [0.0; 3],
            acc: [0.0; 3],
            ang_acc: [0.0; 3],
            family: 1,
            wildcards: [0.0; W_MAX],
        });
        scene.add_owner(Owner {
            kind: OwnerKind::Analytical(0),
            pos: SpatialAddress::from_physical(&layout, [0.0; 3]),
            ori: Quaternion::default(),
            vel: [0.0; 3],
            ang_vel: [0.0; 3],
            acc: [0.0; 3],
            ang_acc: [0.0; 3],
            family: 2,
            wildcards: [0.0; W_MAX],
        });

        let stats = SceneStats::compute(&scene, &templates);
        assert_eq!(stats.owner_count, 2);
        assert_eq!(stats.clump_owner_count, 1);
        assert_eq!(stats.analytical_owner_count, 1);
        assert_eq!(stats.sphere_component_count, 2);
        assert_eq!(stats.max_components_per_clump, 2);
        assert_eq!(stats.distinct_families, 2);
    }
}
