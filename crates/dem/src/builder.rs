//! Scene-build façade (§6): the ordered sequence of calls a caller issues
//! before `Initialize()` to describe materials, templates, owners, the
//! domain, and run parameters.

use crate::constants::W_MAX;
use crate::error::{DemError, Warning};
use crate::expr::{Expr, PrescribedAxis, PrescribedMotion};
use crate::family::FamilyPolicy;
use crate::force::{ForceLaw, HertzMindlin};
use crate::integrator::IntegrationRule;
use crate::scene::{Owner, OwnerKind, Quaternion, SceneState};
use crate::spatial::{figure_out_nv, Axis, BinGrid};
use crate::template::{
    AnalyticalTemplate, ClumpComponent, ClumpTemplate, ClumpTemplateHandle, MaterialHandle, MeshTemplate, TemplateStore,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Owner spec captured before the domain box (and therefore the voxel
/// layout) is known; finalized into real [`Owner`]s at `Initialize()`.
struct PendingOwner {
    kind: OwnerKind,
    pos: [f64; 3],
    vel: [f64; 3],
    ori: Quaternion,
    family: u32,
}

/// Opaque handle to a batch of owners added by one `AddClumps` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchHandle(pub Vec<u32>);

/// Opaque handle returned by `Track`; resolved to a live owner id once the
/// scene is finalized.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TrackerHandle(pub u32);

/// What an inspector computes over the owners matching its predicate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InspectorQuantity {
    OwnerCount,
    MaxAbsVelocity,
    AveragePosition(Axis),
}

/// A read-only scene-wide query, evaluated against the current state.
pub struct Inspector {
    pub quantity: InspectorQuantity,
    pub predicate: Option<Expr>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InspectorHandle(pub u32);

/// Builds a [`crate::solver::DemSolver`] by accumulating materials,
/// templates, owners, and run parameters, then packing them into a
/// finalized scene at `Initialize()`.
pub struct SceneBuilder {
    templates: TemplateStore,
    pending_owners: Vec<PendingOwner>,
    policy: FamilyPolicy,
    domain: Option<([f64; 3], Option<Axis>)>,
    gravity: [f64; 3],
    h: f64,
    update_freq_u: u32,
    max_velocity: f64,
    safety_param: f64,
    bin_size: Option<f64>,
    rule: IntegrationRule,
    force_law: Arc<dyn ForceLaw>,
    inspectors: Vec<Inspector>,
    trackers: Vec<u32>,
    warnings: Vec<Warning>,
}

impl Default for SceneBuilder {
    fn default() -> Self {
        Self {
            templates: TemplateStore::default(),
            pending_owners: Vec::new(),
            policy: FamilyPolicy::new(),
            domain: None,
            gravity: [0.0, -9.81, 0.0],
            h: 1e-5,
            update_freq_u: 1,
            max_velocity: 10.0,
            safety_param: 0.0,
            bin_size: None,
            rule: IntegrationRule::ForwardEuler,
            force_law: Arc::new(HertzMindlin),
            inspectors: Vec::new(),
            trackers: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl SceneBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_material(&mut self, props: &HashMap<String, f64>) -> MaterialHandle {
        self.templates.materials.load(props)
    }

    pub fn load_clump_type(
        &mut self,
        mass: f64,
        moi: [f64; 3],
        components: Vec<([f64; 3], f64, MaterialHandle)>,
    ) -> ClumpTemplateHandle {
        let components = components
            .into_iter()
            .map(|(offset, radius, material)| ClumpComponent { offset, radius, material })
            .collect();
        let volume = 1.0; // derived geometry volume is out of scope; caller-supplied mass/MOI are authoritative.
        self.templates.load_clump_type(ClumpTemplate { components, mass, moi, volume })
    }

    pub fn add_clumps(
        &mut self,
        template: ClumpTemplateHandle,
        positions: &[[f64; 3]],
        velocities: Option<&[[f64; 3]]>,
        orientations: Option<&[Quaternion]>,
        families: Option<&[u32]>,
    ) -> BatchHandle {
        let mut ids = Vec::with_capacity(positions.len());
        for (i, &pos) in positions.iter().enumerate() {
            let vel = velocities.map_or([0.0; 3], |v| v[i]);
            let ori = orientations.map_or(Quaternion::default(), |o| o[i]);
            let family = families.map_or(0, |f| f[i]);
            let idx = self.pending_owners.len() as u32;
            self.pending_owners.push(PendingOwner { kind: OwnerKind::Clump(template), pos, vel, ori, family });
            ids.push(idx);
        }
        BatchHandle(ids)
    }

    pub fn add_plane(&mut self, pos: [f64; 3], outward_normal: [f64; 3], material: MaterialHandle) -> u32 {
        let handle = self.templates.add_analytical(AnalyticalTemplate::Plane {
            relative_pos: [0.0; 3],
            outward_normal,
            material,
        });
        let idx = self.pending_owners.len() as u32;
        self.pending_owners.push(PendingOwner {
            kind: OwnerKind::Analytical(handle),
            pos,
            vel: [0.0; 3],
            ori: Quaternion::default(),
            family: crate::constants::F_MAX,
        });
        idx
    }

    pub fn add_plate(
        &mut self,
        pos: [f64; 3],
        normal: [f64; 3],
        half_extents: [f64; 2],
        material: MaterialHandle,
    ) -> u32 {
        let handle = self.templates.add_analytical(AnalyticalTemplate::Plate {
            relative_pos: [0.0; 3],
            normal,
            half_extents,
            material,
        });
        let idx = self.pending_owners.len() as u32;
        self.pending_owners.push(PendingOwner {
            kind: OwnerKind::Analytical(handle),
            pos,
            vel: [0.0; 3],
            ori: Quaternion::default(),
            family: crate::constants::F_MAX,
        });
        idx
    }

    /// Adds a mesh owner from already-parsed triangle data. Stands in for
    /// `AddWavefrontMeshObject`, whose file parsing is out of scope.
    pub fn add_mesh_object(&mut self, pos: [f64; 3], mesh: MeshTemplate) -> u32 {
        let handle = self.templates.add_mesh(mesh);
        let idx = self.pending_owners.len() as u32;
        self.pending_owners.push(PendingOwner {
            kind: OwnerKind::Mesh(handle),
            pos,
            vel: [0.0; 3],
            ori: Quaternion::default(),
            family: crate::constants::F_MAX,
        });
        idx
    }

    pub fn instruct_box_domain_dimension(&mut self, x: f64, y: f64, z: f64, exact_axis: Option<Axis>) {
        self.domain = Some(([x, y, z], exact_axis));
    }

    pub fn set_gravitational_acceleration(&mut self, g: [f64; 3]) {
        self.gravity = g;
    }

    pub fn set_init_time_step(&mut self, h: f64) {
        self.h = h;
    }

    /// Sets how many dT steps a single kT contact production may be reused
    /// for before a fresh one is required. `0` and `1` both mean "produce
    /// every step" (sync). `u32::MAX` requests unbounded drift: the source
    /// system's negative-`U` convention, reused here as a sentinel since the
    /// rest of the API treats `U` as unsigned (§4.11).
    pub fn set_cd_update_freq(&mut self, u: u32) {
        self.update_freq_u = u;
    }

    pub fn set_max_velocity(&mut self, v: f64) {
        self.max_velocity = v;
    }

    pub fn set_expand_safety_param(&mut self, s: f64) {
        self.safety_param = s;
    }

    pub fn set_init_bin_size(&mut self, b: f64) {
        self.bin_size = Some(b);
    }

    pub fn set_integrator(&mut self, rule: IntegrationRule) {
        self.rule = rule;
    }

    pub fn set_force_law(&mut self, force_law: Arc<dyn ForceLaw>) {
        self.force_law = force_law;
    }

    pub fn disable_contact_between_families(&mut self, a: u32, b: u32) {
        self.policy.disable_contact(a, b);
    }

    pub fn enable_contact_between_families(&mut self, a: u32, b: u32) {
        self.policy.enable_contact(a, b);
    }

    pub fn set_family_fixed(&mut self, family: u32) {
        self.policy.set_fixed(family);
    }

    /// Registers an on-fly family-transition rule: any owner currently in
    /// `from` whose `when` predicate evaluates true is moved to `to`,
    /// evaluated on kT ahead of the following broad-phase production (§4.4).
    pub fn add_family_transition(&mut self, from: u32, to: u32, when: Expr) {
        self.policy.add_transition(from, to, when);
    }

    pub fn set_family_prescribed_ang_vel(&mut self, family: u32, x: Expr, y: Expr, z: Expr, as_position: bool) {
        let mut motion = self.policy.prescribed_motion(family).cloned().unwrap_or_default();
        let axes = [x, y, z];
        for (axis, expr) in axes.into_iter().enumerate() {
            if as_position {
                motion.pos[axis] = PrescribedAxis(Some(expr));
            } else {
                motion.vel[axis] = PrescribedAxis(Some(expr));
            }
        }
        self.policy.set_prescribed_motion(family, motion);
    }

    pub fn create_inspector(&mut self, quantity: InspectorQuantity, predicate: Option<Expr>) -> InspectorHandle {
        let handle = InspectorHandle(self.inspectors.len() as u32);
        self.inspectors.push(Inspector { quantity, predicate });
        handle
    }

    #[must_use]
    pub fn track(&mut self, owner_id: u32) -> TrackerHandle {
        let handle = TrackerHandle(self.trackers.len() as u32);
        self.trackers.push(owner_id);
        handle
    }

    /// Packs every accumulated owner spec into a finalized [`SceneState`],
    /// consuming the builder. Called once by
    /// [`crate::solver::DemSolver::initialize`].
    ///
    /// # Errors
    /// Returns [`DemError::Configuration`] if the domain was never set, or
    /// if [`figure_out_nv`]/[`BinGrid::new`] reject the requested geometry.
    pub fn finalize(
        mut self,
    ) -> Result<
        (
            SceneState,
            TemplateStore,
            FamilyPolicy,
            Arc<dyn ForceLaw>,
            BinGrid,
            RunParams,
            Vec<Inspector>,
            Vec<u32>,
            Vec<Warning>,
        ),
        DemError,
    > {
        let (box_size, exact_axis) = self
            .domain
            .ok_or_else(|| DemError::Configuration("InstructBoxDomainDimension was never called".to_string()))?;
        let layout = figure_out_nv(box_size, exact_axis)?;
        let bin_size = self.bin_size.unwrap_or_else(|| layout.l * f64::from(1u32 << crate::constants::VOXEL_RES_POWER2) * 2.0);
        let grid = BinGrid::new(&layout, bin_size)?;

        self.warnings
            .extend(self.templates.materials.validate_required(self.force_law.required_properties()));
        self.warnings.extend(crate::force::validate_wildcards(self.force_law.as_ref()));

        let mut scene = SceneState::new(layout);
        for pending in self.pending_owners {
            // `F_MAX` is reserved for always-fixed bodies (invariant 4);
            // analytical/mesh owners default to it intentionally, but a
            // clump — ordinarily a movable body — assigned to it will never
            // move under any force, which a caller naming a non-reserved
            // family for everything else is unlikely to expect.
            if pending.family == crate::constants::F_MAX && matches!(pending.kind, OwnerKind::Clump(_)) {
                self.warnings.push(Warning::new(format!(
                    "reserved family {} (F_MAX) was assigned to a clump owner; it will never move regardless of forces",
                    crate::constants::F_MAX
                )));
            }
            scene.add_owner(Owner {
                kind: pending.kind,
                pos: crate::spatial::SpatialAddress::from_physical(&layout, pending.pos),
                ori: pending.ori,
                vel: pending.vel,
                ang_vel: [0.0; 3],
                acc: [0.0; 3],
                ang_acc: [0.0; 3],
                family: pending.family,
                wildcards: [0.0; W_MAX],
            });
        }
        self.templates.finalize_embedding();

        let envelope = self.max_velocity * self.h * f64::from(self.update_freq_u) * self.safety_param.max(1.0);
        let params = RunParams {
            gravity: self.gravity,
            h: self.h,
            update_freq_u: self.update_freq_u,
            max_velocity: self.max_velocity,
            safety_param: self.safety_param,
            envelope,
            rule: self.rule,
        };

        Ok((scene, self.templates, self.policy, self.force_law, grid, params, self.inspectors, self.trackers, self.warnings))
    }
}

/// Run-time parameters fixed at `Initialize()`.
#[derive(Copy, Clone, Debug)]
pub struct RunParams {
    pub gravity: [f64; 3],
    pub h: f64,
    pub update_freq_u: u32,
    pub max_velocity: f64,
    pub safety_param: f64,
    /// `β = v_max · h · U · s`, the contact-detection expansion envelope
    /// auto-derived for a constant timestep run.
    pub envelope: f64,
    pub rule: IntegrationRule,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_fails_without_a_domain() {
        let builder = SceneBuilder::new();
        assert!(matches!(builder.finalize(), Err(DemError::Configuration(_))));
    }

    #[test]
    fn finalize_packs_every_added_owner() {
        let mut builder = SceneBuilder::new();
        builder.instruct_box_domain_dimension(10.0, 10.0, 10.0, None);
        let mut props = HashMap::new();
        props.insert("E".to_string(), 1e9);
        let mat = builder.load_material(&props);
        let clump = builder.load_clump_type(1.0, [1.0; 3], vec![([0.0; 3], 0.5, mat)]);
        builder.add_clumps(clump, &[[1.0, 1.0, 1.0], [2.0, 2.0, 2.0]], None, None, None);
        let (scene, _, _, _, _, _, _, _, _) = builder.finalize().unwrap();
        assert_eq!(scene.len(), 2);
    }

    #[test]
    fn envelope_formula_matches_v_max_h_u_s() {
        let mut builder = SceneBuilder::new();
        builder.instruct_box_domain_dimension(10.0, 10.0, 10.0, None);
        builder.set_max_velocity(2.0);
        builder.set_init_time_step(0.01);
        builder.set_cd_update_freq(5);
        builder.set_expand_safety_param(1.5);
        let (_, _, _, _, _, params, _, _, _) = builder.finalize().unwrap();
        assert!((params.envelope - 2.0 * 0.01 * 5.0 * 1.5).abs() < 1e-9);
    }
}
