//! kT narrow-phase: exact geometric contact tests (§4.6).
//!
//! Sphere-sphere candidates are resolved by dispatching
//! `compute::Kernel::NarrowPhaseSphereContacts`. Sphere-plane, sphere-plate
//! and sphere-mesh contacts have no compute-kernel counterpart (the device
//! kernel only enumerates sphere-sphere pairs) so they are tested on the
//! host against every analytical/mesh owner directly; the scene sizes this
//! work to stay small since analytical/mesh owner counts are expected to be
//! orders of magnitude below sphere counts.

use crate::broad_phase::FlattenedSphere;
use crate::error::DemError;
use crate::family::FamilyPolicy;
use crate::scene::{Quaternion, SceneState};
use crate::template::{AnalyticalTemplate, MaterialHandle, MeshFacet, MeshTemplate, TemplateStore};
use compute::kernels::narrow_phase_sphere_contacts::{ContactCandidate, NarrowPhaseConfig, CONTACT_TYPE_SPHERE_SPHERE};
use compute::kernels::scatter_bin_sphere_pairs::BinSpherePair;
use compute::kernels::sphere_bin_touch_counts::SphereSample;
use compute::{BufferView, ComputeBackend, Kernel};
use std::sync::Arc;

pub const CONTACT_TYPE_SPHERE_MESH: u32 = 1;
pub const CONTACT_TYPE_SPHERE_PLANE: u32 = 2;
pub const CONTACT_TYPE_SPHERE_PLATE: u32 = 3;

/// Synthetic partner radius used when evaluating a sphere-vs-analytical or
/// sphere-vs-mesh-facet force: large enough that Hertz-Mindlin's reduced
/// radius `r_star = r_a*r_b/(r_a+r_b)` collapses to `r_a`, as if the sphere
/// met a flat surface of infinite curvature.
pub const ANALYTICAL_VIRTUAL_RADIUS: f64 = 1.0e6;

/// One of the two non-sphere contact partners a component can touch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContactPartner {
    Sphere(u32),
    Analytical(u32),
    MeshFacet { owner: u32, facet: u32 },
}

/// An exact contact between sphere component `a` and `partner`.
#[derive(Copy, Clone, Debug)]
pub struct Contact {
    pub a: u32,
    pub partner: ContactPartner,
    pub contact_type: u32,
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

fn mask_bytes(policy: &FamilyPolicy, f_max: u32) -> Vec<u8> {
    // Families range 0..=f_max inclusive (f_max itself is an addressable,
    // always-fixed family), matching `FamilyPolicy`'s own matrix sizing.
    let n = crate::family::locate_mask_pair(f_max - 1, f_max) + 1;
    let mut bytes = vec![0u8; n];
    for a in 0..=f_max {
        for b in (a + 1)..=f_max {
            if !policy.admissible(a, b) {
                bytes[crate::family::locate_mask_pair(a, b)] = 1;
            }
        }
    }
    bytes
}

/// Resolves sphere-sphere candidates via the compute kernel.
///
/// # Errors
/// Propagates [`compute::ComputeError`] as [`DemError::Backend`].
pub fn sphere_sphere_contacts(
    backend: &dyn ComputeBackend,
    spheres: &[FlattenedSphere],
    pairs: &[BinSpherePair],
    policy: &FamilyPolicy,
    f_max: u32,
    envelope: f64,
) -> Result<Vec<Contact>, DemError> {
    if pairs.is_empty() {
        return Ok(Vec::new());
    }
    let samples = to_sphere_samples(spheres);
    let samples_bytes: Arc<[u8]> = bytemuck::cast_slice(&samples).to_vec().into();
    let samples_view = BufferView::new(samples_bytes, vec![samples.len()], std::mem::size_of::<SphereSample>());
    let pairs_bytes: Arc<[u8]> = bytemuck::cast_slice(pairs).to_vec().into();
    let pairs_view = BufferView::new(pairs_bytes, vec![pairs.len()], std::mem::size_of::<BinSpherePair>());

    let config = NarrowPhaseConfig { envelope: envelope as f32, f_max };
    let mut mask_buf = bytemuck::bytes_of(&config).to_vec();
    mask_buf.extend(mask_bytes(policy, f_max));
    let mask_view = BufferView::new(mask_buf.clone().into(), vec![mask_buf.len()], 1);
    let out_view = BufferView::new(Arc::from(Vec::<u8>::new()), vec![0], std::mem::size_of::<ContactCandidate>());

    let result = backend.dispatch(
        &Kernel::NarrowPhaseSphereContacts,
        &[pairs_view, samples_view, mask_view, out_view],
        [1, 1, 1],
    )?;
    let candidates: &[ContactCandidate] = bytemuck::cast_slice(&result[0]);
    Ok(candidates
        .iter()
        .filter(|c| c.contact_type == CONTACT_TYPE_SPHERE_SPHERE)
        .map(|c| Contact {
            a: c.id_a,
            partner: ContactPartner::Sphere(c.id_b),
            contact_type: CONTACT_TYPE_SPHERE_SPHERE,
        })
        .collect())
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}
fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}
fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}
fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]]
}

/// Host-side tests against every analytical plane/plate and mesh facet.
/// O(spheres × analytical/mesh owners); acceptable since those owner counts
/// are expected to be small relative to the sphere population.
#[must_use]
pub fn analytical_and_mesh_contacts(
    spheres: &[FlattenedSphere],
    scene: &SceneState,
    templates: &TemplateStore,
    policy: &FamilyPolicy,
    envelope: f64,
) -> Vec<Contact> {
    use crate::scene::OwnerKind;

    let mut out = Vec::new();
    for (idx, owner) in spheres.iter().enumerate() {
        for (other_idx, other_owner) in scene.owners().iter().enumerate() {
            if !policy.admissible(owner.family, other_owner.family) {
                continue;
            }
            let owner_pos = other_owner.pos.to_physical(&scene.layout);
            let owner_ori = other_owner.ori;
            match other_owner.kind {
                OwnerKind::Analytical(handle) => {
                    let template = &templates.analytical[handle as usize];
                    if let Some(mut contact) = test_sphere_analytical(idx as u32, owner, owner_pos, owner_ori, template, envelope) {
                        contact.partner = ContactPartner::Analytical(other_idx as u32);
                        out.push(contact);
                    }
                }
                OwnerKind::Mesh(handle) => {
                    let mesh = &templates.meshes[handle as usize];
                    for (facet_idx, facet) in mesh.facets.iter().enumerate() {
                        if test_sphere_facet(owner, owner_pos, owner_ori, facet, envelope) {
                            out.push(Contact {
                                a: idx as u32,
                                partner: ContactPartner::MeshFacet { owner: other_idx as u32, facet: facet_idx as u32 },
                                contact_type: CONTACT_TYPE_SPHERE_MESH,
                            });
                        }
                    }
                }
                OwnerKind::Clump(_) => {}
            }
        }
    }
    out
}

fn test_sphere_analytical(
    sphere_idx: u32,
    sphere: &FlattenedSphere,
    owner_pos: [f64; 3],
    owner_ori: Quaternion,
    template: &AnalyticalTemplate,
    envelope: f64,
) -> Option<Contact> {
    match template {
        AnalyticalTemplate::Plane { relative_pos, outward_normal, .. } => {
            let plane_point = add(owner_pos, owner_ori.rotate_vector(*relative_pos));
            let n = owner_ori.rotate_vector(*outward_normal);
            let signed_dist = dot(sub(sphere.center, plane_point), n);
            if signed_dist <= sphere.radius + envelope {
                Some(Contact {
                    a: sphere_idx,
                    partner: ContactPartner::Analytical(0),
                    contact_type: CONTACT_TYPE_SPHERE_PLANE,
                })
            } else {
                None
            }
        }
        AnalyticalTemplate::Plate { relative_pos, normal, half_extents, .. } => {
            let plate_point = add(owner_pos, owner_ori.rotate_vector(*relative_pos));
            let n = owner_ori.rotate_vector(*normal);
            let signed_dist = dot(sub(sphere.center, plate_point), n);
            if signed_dist > sphere.radius + envelope {
                return None;
            }
            // Project onto the plate plane and clip against its half-extents.
            let proj = sub(sphere.center, plate_point);
            let tangent_dist = norm([proj[0] - n[0] * signed_dist, proj[1] - n[1] * signed_dist, proj[2] - n[2] * signed_dist]);
            if tangent_dist > half_extents[0].max(half_extents[1]) + sphere.radius {
                return None;
            }
            Some(Contact {
                a: sphere_idx,
                partner: ContactPartner::Analytical(0),
                contact_type: CONTACT_TYPE_SPHERE_PLATE,
            })
        }
    }
}

fn test_sphere_facet(
    sphere: &FlattenedSphere,
    owner_pos: [f64; 3],
    owner_ori: Quaternion,
    facet: &crate::template::MeshFacet,
    envelope: f64,
) -> bool {
    let v = [
        add(owner_pos, owner_ori.rotate_vector(facet.vertices[0])),
        add(owner_pos, owner_ori.rotate_vector(facet.vertices[1])),
        add(owner_pos, owner_ori.rotate_vector(facet.vertices[2])),
    ];
    let closest = closest_point_on_triangle(sphere.center, v);
    norm(sub(sphere.center, closest)) <= sphere.radius + envelope
}

/// Closest point on triangle `v` to `p`, via barycentric clamping.
fn closest_point_on_triangle(p: [f64; 3], v: [[f64; 3]; 3]) -> [f64; 3] {
    let ab = sub(v[1], v[0]);
    let ac = sub(v[2], v[0]);
    let ap = sub(p, v[0]);
    let d1 = dot(ab, ap);
    let d2 = dot(ac, ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return v[0];
    }
    let bp = sub(p, v[1]);
    let d3 = dot(ab, bp);
    let d4 = dot(ac, bp);
    if d3 >= 0.0 && d4 <= d3 {
        return v[1];
    }
    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let t = d1 / (d1 - d3);
        return [v[0][0] + ab[0] * t, v[0][1] + ab[1] * t, v[0][2] + ab[2] * t];
    }
    let cp = sub(p, v[2]);
    let d5 = dot(ab, cp);
    let d6 = dot(ac, cp);
    if d6 >= 0.0 && d5 <= d6 {
        return v[2];
    }
    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let t = d2 / (d2 - d6);
        return [v[0][0] + ac[0] * t, v[0][1] + ac[1] * t, v[0][2] + ac[2] * t];
    }
    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let t = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        let bc = sub(v[2], v[1]);
        return [v[1][0] + bc[0] * t, v[1][1] + bc[1] * t, v[1][2] + bc[2] * t];
    }
    let denom = 1.0 / (va + vb + vc);
    let v_coef = vb * denom;
    let w_coef = vc * denom;
    [
        v[0][0] + ab[0] * v_coef + ac[0] * w_coef,
        v[0][1] + ab[1] * v_coef + ac[1] * w_coef,
        v[0][2] + ab[2] * v_coef + ac[2] * w_coef,
    ]
}

/// Contact-point, surface normal, and material for a sphere-vs-analytical
/// contact, used by dT to build a [`crate::force::ContactKinematics`]
/// against the [`ANALYTICAL_VIRTUAL_RADIUS`] stand-in.
#[must_use]
pub fn analytical_contact_geometry(
    owner_pos: [f64; 3],
    owner_ori: Quaternion,
    template: &AnalyticalTemplate,
    sphere_center: [f64; 3],
) -> ([f64; 3], MaterialHandle) {
    match template {
        AnalyticalTemplate::Plane { relative_pos, outward_normal, material } => {
            let plane_point = add(owner_pos, owner_ori.rotate_vector(*relative_pos));
            let n = owner_ori.rotate_vector(*outward_normal);
            let signed_dist = dot(sub(sphere_center, plane_point), n);
            (sub(sphere_center, scale(n, signed_dist)), *material)
        }
        AnalyticalTemplate::Plate { relative_pos, normal, material, .. } => {
            let plate_point = add(owner_pos, owner_ori.rotate_vector(*relative_pos));
            let n = owner_ori.rotate_vector(*normal);
            let signed_dist = dot(sub(sphere_center, plate_point), n);
            (sub(sphere_center, scale(n, signed_dist)), *material)
        }
    }
}

/// Contact-point and material for a sphere-vs-mesh-facet contact.
#[must_use]
pub fn facet_contact_geometry(owner_pos: [f64; 3], owner_ori: Quaternion, facet: &MeshFacet, sphere_center: [f64; 3]) -> ([f64; 3], MaterialHandle) {
    let v = [
        add(owner_pos, owner_ori.rotate_vector(facet.vertices[0])),
        add(owner_pos, owner_ori.rotate_vector(facet.vertices[1])),
        add(owner_pos, owner_ori.rotate_vector(facet.vertices[2])),
    ];
    (closest_point_on_triangle(sphere_center, v), facet.material)
}

fn add(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}
fn scale(a: [f64; 3], s: f64) -> [f64; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::MaterialHandle;

    #[test]
    fn sphere_resting_on_plane_is_a_contact() {
        let sphere = FlattenedSphere { owner: 0, family: 0, material: 0, center: [0.0, 0.5, 0.0], radius: 0.5 };
        let plane = AnalyticalTemplate::Plane {
            relative_pos: [0.0; 3],
            outward_normal: [0.0, 1.0, 0.0],
            material: MaterialHandle(0),
        };
        let contact = test_sphere_analytical(0, &sphere, [0.0; 3], Quaternion::default(), &plane, 0.0);
        assert!(contact.is_some());
    }

    #[test]
    fn sphere_far_above_plane_has_no_contact() {
        let sphere = FlattenedSphere { owner: 0, family: 0, material: 0, center: [0.0, 5.0, 0.0], radius: 0.5 };
        let plane = AnalyticalTemplate::Plane {
            relative_pos: [0.0; 3],
            outward_normal: [0.0, 1.0, 0.0],
            material: MaterialHandle(0),
        };
        assert!(test_sphere_analytical(0, &sphere, [0.0; 3], Quaternion::default(), &plane, 0.0).is_none());
    }

    #[test]
    fn closest_point_on_triangle_returns_a_vertex_for_an_exterior_corner_region() {
        let tri = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let p = [-1.0, -1.0, 0.0];
        let closest = closest_point_on_triangle(p, tri);
        assert_eq!(closest, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn rotated_plane_owner_rotates_its_normal_before_the_contact_test() {
        // Plane's local outward normal is +Y; owner rotated 90 degrees about
        // +X so the world-space normal becomes +Z. A sphere sitting just
        // above the plane along +Z should register a contact, and the
        // unrotated (+Y) offset position should not.
        let half = std::f64::consts::FRAC_PI_4;
        let owner_ori = Quaternion([half.cos(), half.sin(), 0.0, 0.0]);
        let plane = AnalyticalTemplate::Plane {
            relative_pos: [0.0; 3],
            outward_normal: [0.0, 1.0, 0.0],
            material: MaterialHandle(0),
        };
        let sphere_along_world_z = FlattenedSphere { owner: 0, family: 0, material: 0, center: [0.0, 0.0, 0.5], radius: 0.5 };
        assert!(test_sphere_analytical(0, &sphere_along_world_z, [0.0; 3], owner_ori, &plane, 0.0).is_some());

        let sphere_along_world_y = FlattenedSphere { owner: 0, family: 0, material: 0, center: [0.0, 5.0, 0.0], radius: 0.5 };
        assert!(test_sphere_analytical(0, &sphere_along_world_y, [0.0; 3], owner_ori, &plane, 0.0).is_none());
    }
}
