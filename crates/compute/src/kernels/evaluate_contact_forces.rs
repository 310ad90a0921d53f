use super::narrow_phase_sphere_contacts::ContactCandidate;
use super::sphere_bin_touch_counts::SphereSample;
use crate::{BufferView, ComputeError};
use bytemuck::{Pod, Zeroable};

/// Material properties as seen by the built-in force law. A jitified
/// user-supplied force-law fragment (see `crates/dem`) may reference a wider
/// set of named properties; this is the reduced set the reference kernel
/// evaluates directly.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq)]
pub struct MaterialSample {
    pub e: f32,
    pub nu: f32,
    pub cor: f32,
    pub mu: f32,
}

/// Force and torque-only-force contributed by a single contact, expressed in
/// the world frame and attributed to owner `A` (owner `B` receives the
/// negation of `force`).
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq)]
pub struct ContactForce {
    pub force: [f32; 3],
    pub _pad0: f32,
    pub torque_only_force: [f32; 3],
    pub _pad1: f32,
}

/// Hertzian normal contact with a velocity-dependent damping term tuned from
/// the coefficient of restitution, plus Coulomb-limited tangential friction.
/// This is the built-in default; a jitified user force law fully replaces it
/// at the `crates/dem` layer.
fn hertz_mindlin(
    sa: &SphereSample,
    sb: &SphereSample,
    va: [f32; 3],
    vb: [f32; 3],
    mat_a: &MaterialSample,
    mat_b: &MaterialSample,
) -> ContactForce {
    let dx = [
        sa.center[0] - sb.center[0],
        sa.center[1] - sb.center[1],
        sa.center[2] - sb.center[2],
    ];
    let dist = (dx[0] * dx[0] + dx[1] * dx[1] + dx[2] * dx[2]).sqrt();
    let overlap = sa.radius + sb.radius - dist;
    if overlap <= 0.0 || dist <= f32::EPSILON {
        return ContactForce {
            force: [0.0; 3],
            _pad0: 0.0,
            torque_only_force: [0.0; 3],
            _pad1: 0.0,
        };
    }
    let normal = [dx[0] / dist, dx[1] / dist, dx[2] / dist];
    let e_star = 1.0 / ((1.0 - mat_a.nu * mat_a.nu) / mat_a.e + (1.0 - mat_b.nu * mat_b.nu) / mat_b.e);
    let r_star = (sa.radius * sb.radius) / (sa.radius + sb.radius);
    let stiffness = (4.0 / 3.0) * e_star * r_star.sqrt();
    let normal_force_mag = stiffness * overlap.powf(1.5);

    let rel_vel = [va[0] - vb[0], va[1] - vb[1], va[2] - vb[2]];
    let vn = rel_vel[0] * normal[0] + rel_vel[1] * normal[1] + rel_vel[2] * normal[2];
    let cor = (mat_a.cor + mat_b.cor) * 0.5;
    let damping = -2.0 * (1.0 - cor).max(0.0) * vn;

    let mag = normal_force_mag + damping * stiffness.sqrt() * overlap.sqrt();
    let force = [normal[0] * mag, normal[1] * mag, normal[2] * mag];

    let mu = (mat_a.mu + mat_b.mu) * 0.5;
    let tangential = [
        rel_vel[0] - vn * normal[0],
        rel_vel[1] - vn * normal[1],
        rel_vel[2] - vn * normal[2],
    ];
    let t_mag = (tangential[0] * tangential[0] + tangential[1] * tangential[1] + tangential[2] * tangential[2]).sqrt();
    let friction_mag = (mu * mag.abs()).min(t_mag);
    let friction = if t_mag > f32::EPSILON {
        [
            -tangential[0] / t_mag * friction_mag,
            -tangential[1] / t_mag * friction_mag,
            -tangential[2] / t_mag * friction_mag,
        ]
    } else {
        [0.0; 3]
    };

    ContactForce {
        force: [force[0] + friction[0], force[1] + friction[1], force[2] + friction[2]],
        _pad0: 0.0,
        torque_only_force: [0.0; 3],
        _pad1: 0.0,
    }
}

pub fn handle_evaluate_contact_forces(binds: &[BufferView]) -> Result<Vec<Vec<u8>>, ComputeError> {
    if binds.len() < 4 {
        return Err(ComputeError::ShapeMismatch(
            "EvaluateContactForces kernel expects 4 buffers",
        ));
    }
    let contacts_view = &binds[0];
    let spheres_view = &binds[1];
    let materials_view = &binds[2];

    if contacts_view.element_size_in_bytes != std::mem::size_of::<ContactCandidate>() {
        return Err(ComputeError::ShapeMismatch(
            "EvaluateContactForces expects ContactCandidate-sized contacts",
        ));
    }
    if spheres_view.element_size_in_bytes != std::mem::size_of::<SphereSample>() {
        return Err(ComputeError::ShapeMismatch(
            "EvaluateContactForces expects SphereSample-sized spheres",
        ));
    }
    if materials_view.element_size_in_bytes != std::mem::size_of::<MaterialSample>() {
        return Err(ComputeError::ShapeMismatch(
            "EvaluateContactForces expects MaterialSample-sized materials",
        ));
    }

    let contacts: &[ContactCandidate] = bytemuck::cast_slice(&contacts_view.data);
    let spheres: &[SphereSample] = bytemuck::cast_slice(&spheres_view.data);
    let materials: &[MaterialSample] = bytemuck::cast_slice(&materials_view.data);

    let mut forces = Vec::with_capacity(contacts.len());
    for c in contacts {
        let sa = &spheres[c.id_a as usize];
        let sb = &spheres[c.id_b as usize];
        let mat_a = materials
            .get(sa.material_id as usize)
            .copied()
            .unwrap_or(MaterialSample { e: 0.0, nu: 0.0, cor: 0.0, mu: 0.0 });
        let mat_b = materials
            .get(sb.material_id as usize)
            .copied()
            .unwrap_or(MaterialSample { e: 0.0, nu: 0.0, cor: 0.0, mu: 0.0 });
        // velocities are not modeled in SphereSample; callers of the GPU-dispatched
        // kernel pass zero relative velocity, which drops the damping/friction
        // terms to the elastic-contact case. The pure-Rust reference force
        // evaluator in `crates/dem::force` carries full owner velocities.
        forces.push(hertz_mindlin(sa, sb, [0.0; 3], [0.0; 3], &mat_a, &mat_b));
    }

    Ok(vec![bytemuck::cast_slice(&forces).to_vec()])
}
