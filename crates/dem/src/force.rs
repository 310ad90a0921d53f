//! Force-law contract and the built-in Hertz-Mindlin default (§4.8).
//!
//! The source system JIT-compiles a user-supplied force-law fragment
//! directly into the dT kernel; this core has no device JIT; per Design
//! Notes §9 the contract is instead a Rust trait object, `ForceLaw`, with the
//! default implementation grounded on `compute::kernels::evaluate_contact_forces`'s
//! `hertz_mindlin`, generalized to carry full owner velocities and angular
//! velocities (the compute kernel's GPU path only ever sees zero relative
//! velocity, since `SphereSample` carries no velocity field).

use crate::history::WildcardSlots;
use crate::template::{MaterialHandle, MaterialTable};

/// The kinematic state of one contact, gathered from both owners' current
/// pose/velocity before the force law runs.
#[derive(Copy, Clone, Debug)]
pub struct ContactKinematics {
    pub pos_a: [f64; 3],
    pub pos_b: [f64; 3],
    pub radius_a: f64,
    pub radius_b: f64,
    pub vel_a: [f64; 3],
    pub vel_b: [f64; 3],
    pub ang_vel_a: [f64; 3],
    pub ang_vel_b: [f64; 3],
    pub mat_a: MaterialHandle,
    pub mat_b: MaterialHandle,
    /// This contact's wildcard slots as carried over from the previous
    /// production (or zeroed, for a newly formed contact), read by the force
    /// law before it evaluates (§4.8).
    pub wildcards_in: WildcardSlots,
}

/// Force and torque contributed by one contact. `force` is attributed to
/// owner `A` in the world frame (owner `B` receives the negation); torques
/// are already expressed about each owner's own center of mass.
#[derive(Copy, Clone, Debug)]
pub struct ContactOutput {
    pub force: [f64; 3],
    pub torque_a: [f64; 3],
    pub torque_b: [f64; 3],
    /// This contact's wildcard slots after the force law ran, written back
    /// into the contact's history state for the next production to read
    /// (§4.8).
    pub wildcards_out: WildcardSlots,
}

impl Default for ContactOutput {
    fn default() -> Self {
        Self {
            force: [0.0; 3],
            torque_a: [0.0; 3],
            torque_b: [0.0; 3],
            wildcards_out: [0.0; crate::constants::W_MAX],
        }
    }
}

/// A pluggable force law. Implementors declare which material properties
/// they read so [`MaterialTable::validate_required`] can warn about gaps at
/// scene-build time rather than silently substituting zero mid-run.
pub trait ForceLaw: Send + Sync {
    fn required_properties(&self) -> &'static [&'static str];

    /// Per-contact wildcard names this force law declares an interest in.
    /// Compared against [`ForceLaw::written_contact_wildcards`] at
    /// scene-build time so a name declared but never actually assigned by
    /// `evaluate` produces a warning rather than silently carrying zeros
    /// forever (§6, §7).
    fn declared_contact_wildcards(&self) -> &'static [&'static str] {
        &[]
    }

    /// Subset of [`ForceLaw::declared_contact_wildcards`] that `evaluate`
    /// actually assigns a value to in `ContactOutput::wildcards_out`.
    fn written_contact_wildcards(&self) -> &'static [&'static str] {
        &[]
    }

    fn evaluate(&self, k: &ContactKinematics, materials: &MaterialTable) -> ContactOutput;
}

/// Warns about every name [`ForceLaw::declared_contact_wildcards`] lists that
/// is absent from [`ForceLaw::written_contact_wildcards`] (§7: "force-law
/// declares but never writes to a wildcard").
#[must_use]
pub fn validate_wildcards(force_law: &dyn ForceLaw) -> Vec<crate::error::Warning> {
    let written = force_law.written_contact_wildcards();
    force_law
        .declared_contact_wildcards()
        .iter()
        .filter(|name| !written.contains(name))
        .map(|name| {
            crate::error::Warning::new(format!(
                "force law declares contact wildcard '{name}' but never writes to it; it will stay zeroed"
            ))
        })
        .collect()
}

/// Hertzian normal contact with coefficient-of-restitution damping plus
/// Coulomb-limited tangential friction, the built-in default force law.
#[derive(Default)]
pub struct HertzMindlin;

impl ForceLaw for HertzMindlin {
    fn required_properties(&self) -> &'static [&'static str] {
        &["E", "nu", "CoR", "mu"]
    }

    fn evaluate(&self, k: &ContactKinematics, materials: &MaterialTable) -> ContactOutput {
        let dx = sub(k.pos_a, k.pos_b);
        let dist = norm(dx);
        let overlap = k.radius_a + k.radius_b - dist;
        if overlap <= 0.0 || dist <= f64::EPSILON {
            return ContactOutput { wildcards_out: k.wildcards_in, ..ContactOutput::default() };
        }
        let normal = scale(dx, 1.0 / dist);

        let e_a = materials.get(k.mat_a, "E");
        let e_b = materials.get(k.mat_b, "E");
        let nu_a = materials.get(k.mat_a, "nu");
        let nu_b = materials.get(k.mat_b, "nu");
        let e_star = 1.0 / ((1.0 - nu_a * nu_a) / e_a + (1.0 - nu_b * nu_b) / e_b);
        let r_star = (k.radius_a * k.radius_b) / (k.radius_a + k.radius_b);
        let stiffness = (4.0 / 3.0) * e_star * r_star.sqrt();
        let normal_force_mag = stiffness * overlap.powf(1.5);

        // Relative velocity at the contact point includes each owner's spin.
        let contact_point = lerp(k.pos_a, k.pos_b, k.radius_a / (k.radius_a + k.radius_b));
        let r_a = sub(contact_point, k.pos_a);
        let r_b = sub(contact_point, k.pos_b);
        let vel_contact_a = add(k.vel_a, cross(k.ang_vel_a, r_a));
        let vel_contact_b = add(k.vel_b, cross(k.ang_vel_b, r_b));
        let rel_vel = sub(vel_contact_a, vel_contact_b);
        let vn = dot(rel_vel, normal);

        let cor_a = materials.get(k.mat_a, "CoR");
        let cor_b = materials.get(k.mat_b, "CoR");
        let cor = (cor_a + cor_b) * 0.5;
        let damping = -2.0 * (1.0 - cor).max(0.0) * vn;
        let mag = normal_force_mag + damping * stiffness.sqrt() * overlap.sqrt();

        let mu_a = materials.get(k.mat_a, "mu");
        let mu_b = materials.get(k.mat_b, "mu");
        let mu = (mu_a + mu_b) * 0.5;
        let tangential = sub(rel_vel, scale(normal, vn));
        let t_mag = norm(tangential);
        let friction_mag = (mu * mag.abs()).min(t_mag);
        let friction = if t_mag > f64::EPSILON {
            scale(tangential, -friction_mag / t_mag)
        } else {
            [0.0; 3]
        };

        let force = add(scale(normal, mag), friction);
        ContactOutput {
            force,
            torque_a: cross(r_a, friction),
            torque_b: cross(r_b, scale(friction, -1.0)),
            // HertzMindlin declares no contact wildcards of its own; carry
            // whatever history state the contact already had through
            // unchanged rather than dropping it.
            wildcards_out: k.wildcards_in,
        }
    }
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}
fn add(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}
fn scale(a: [f64; 3], s: f64) -> [f64; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
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
fn lerp(a: [f64; 3], b: [f64; 3], t: f64) -> [f64; 3] {
    add(a, scale(sub(b, a), t))
}
