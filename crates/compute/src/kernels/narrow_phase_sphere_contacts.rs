use super::scatter_bin_sphere_pairs::BinSpherePair;
use super::sphere_bin_touch_counts::SphereSample;
use crate::{BufferView, ComputeError};
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;

/// Sphere-sphere contact type tag, mirrored from the broader contact-type
/// enum the core keeps in `crates/dem`.
pub const CONTACT_TYPE_SPHERE_SPHERE: u32 = 0;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq, Eq)]
pub struct ContactCandidate {
    pub id_a: u32,
    pub id_b: u32,
    pub contact_type: u32,
    pub _pad: u32,
}

/// Header prefixed to the mask buffer: the envelope distance `β` added to
/// every geometric test, followed by the flattened triangular mask bytes.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq)]
pub struct NarrowPhaseConfig {
    pub envelope: f32,
    pub f_max: u32,
}

/// Index into the flattened upper triangle of the family contact-mask matrix.
///
/// `a` must be strictly less than `b`; callers normalize the pair order first.
#[must_use]
pub fn locate_mask_pair(a: u32, b: u32, f_max: u32) -> usize {
    debug_assert!(a < b);
    let a = u64::from(a);
    let b = u64::from(b);
    let f_max = u64::from(f_max);
    (a * (2 * f_max - a - 1) / 2 + (b - a - 1)) as usize
}

fn mask_prevents(mask: &[u8], fa: u32, fb: u32, f_max: u32) -> bool {
    if fa == fb {
        return false;
    }
    let (lo, hi) = if fa < fb { (fa, fb) } else { (fb, fa) };
    let idx = locate_mask_pair(lo, hi, f_max);
    mask.get(idx).copied().unwrap_or(0) != 0
}

pub fn handle_narrow_phase_sphere_contacts(binds: &[BufferView]) -> Result<Vec<Vec<u8>>, ComputeError> {
    if binds.len() < 4 {
        return Err(ComputeError::ShapeMismatch(
            "NarrowPhaseSphereContacts kernel expects 4 buffers",
        ));
    }
    let pairs_view = &binds[0];
    let spheres_view = &binds[1];
    let mask_view = &binds[2];

    if pairs_view.element_size_in_bytes != std::mem::size_of::<BinSpherePair>() {
        return Err(ComputeError::ShapeMismatch(
            "NarrowPhaseSphereContacts expects BinSpherePair-sized elements",
        ));
    }
    if spheres_view.element_size_in_bytes != std::mem::size_of::<SphereSample>() {
        return Err(ComputeError::ShapeMismatch(
            "NarrowPhaseSphereContacts expects SphereSample-sized elements",
        ));
    }

    let pairs: &[BinSpherePair] = bytemuck::cast_slice(&pairs_view.data);
    let spheres: &[SphereSample] = bytemuck::cast_slice(&spheres_view.data);
    let config_size = std::mem::size_of::<NarrowPhaseConfig>();
    if mask_view.data.len() < config_size {
        return Err(ComputeError::ShapeMismatch(
            "NarrowPhaseSphereContacts mask buffer is missing its NarrowPhaseConfig header",
        ));
    }
    let config: &NarrowPhaseConfig = bytemuck::from_bytes(&mask_view.data[..config_size]);
    let mask: &[u8] = &mask_view.data[config_size..];
    let envelope = config.envelope;
    let f_max = config.f_max;

    let mut by_bin: HashMap<u32, Vec<u32>> = HashMap::new();
    for pair in pairs {
        by_bin.entry(pair.bin_id).or_default().push(pair.sphere_id);
    }

    let mut bin_ids: Vec<u32> = by_bin.keys().copied().collect();
    bin_ids.sort_unstable();

    let mut contacts = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for bin_id in bin_ids {
        let mut members = by_bin[&bin_id].clone();
        members.sort_unstable();
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                let ia = members[i];
                let ib = members[j];
                let sa = &spheres[ia as usize];
                let sb = &spheres[ib as usize];
                if sa.owner_id == sb.owner_id {
                    continue;
                }
                if mask_prevents(mask, sa.family, sb.family, f_max) {
                    continue;
                }
                let dx = [
                    sa.center[0] - sb.center[0],
                    sa.center[1] - sb.center[1],
                    sa.center[2] - sb.center[2],
                ];
                let dist2 = dx[0] * dx[0] + dx[1] * dx[1] + dx[2] * dx[2];
                let reach = sa.radius + sb.radius + envelope;
                if dist2 > reach * reach {
                    continue;
                }
                let key = if ia < ib { (ia, ib) } else { (ib, ia) };
                if !seen.insert(key) {
                    continue;
                }
                contacts.push(ContactCandidate {
                    id_a: key.0,
                    id_b: key.1,
                    contact_type: CONTACT_TYPE_SPHERE_SPHERE,
                    _pad: 0,
                });
            }
        }
    }

    Ok(vec![bytemuck::cast_slice(&contacts).to_vec()])
}
