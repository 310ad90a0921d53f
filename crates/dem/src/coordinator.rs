//! Two-thread kT/dT coordination (§5, Design Notes §9).
//!
//! The source system's condition-variable rendezvous is expressed here as
//! two actors with typed mailboxes over bounded `std::sync::mpsc` channels,
//! plus a `parking_lot::Mutex`-guarded freshness flag pair — the same
//! synchronization primitive the compute crate's `gpu` feature already
//! depends on for its device path. `kT` and `dT` each run as one
//! `std::thread::spawn`'d worker owned by the [`Coordinator`]; the driver
//! blocks on a `std::sync::mpsc::Receiver` standing in for `cv_mainCanProceed`.

use crate::broad_phase::{flatten_spheres, run_broad_phase, FlattenedSphere};
use crate::constants::F_MAX;
use crate::error::DemError;
use crate::expr::EvalContext;
use crate::family::FamilyPolicy;
use crate::force::{ContactKinematics, ContactOutput, ForceLaw};
use crate::history::{map_history, WildcardSlots};
use crate::integrator::{accumulate_loads, step as integrate_step, IntegrationRule};
use crate::narrow_phase::{analytical_and_mesh_contacts, sphere_sphere_contacts, Contact, ContactPartner};
use crate::scene::SceneState;
use crate::spatial::BinGrid;
use crate::template::TemplateStore;
use compute::ComputeBackend;
use parking_lot::Mutex;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

/// How far dT may run ahead of kT's last production before it must block
/// and wait for a fresh contact list.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateFrequency {
    /// kT produces a fresh contact list every dT step.
    Sync,
    /// dT may reuse a contact list for up to `u` steps before blocking.
    BoundedDrift { u: u32 },
    /// dT always reuses the latest available contact list, warning (not
    /// blocking) when it runs further than Sync would have allowed.
    UnboundedDrift,
}

/// A dT production request: the pose snapshot kT should build a fresh
/// contact list from, plus the previous production's contacts/wildcards
/// (owned by the coordinator, since dT is the one that actually updates
/// wildcard values step to step) for the history mapper to remap against.
pub struct PoseSnapshot {
    pub spheres: Vec<FlattenedSphere>,
    pub time: f64,
    pub prev_contacts: Vec<Contact>,
    pub prev_wildcards: Vec<WildcardSlots>,
}

/// A kT production result: the fresh contact list (geometry plus carried
/// wildcard state) dT should evaluate forces against. Cloned by the
/// [`Coordinator`] when dT is permitted to reuse it across several steps
/// under [`UpdateFrequency::BoundedDrift`]/`UnboundedDrift`.
#[derive(Clone)]
pub struct ContactSet {
    pub contacts: Vec<Contact>,
    pub wildcards: Vec<WildcardSlots>,
}

pub enum KtMailbox {
    PoseSnapshot(PoseSnapshot),
    Shutdown,
}

/// kT's reply to the coordinator: either a fresh production, or the fatal
/// error that ended the kT thread.
enum KtResult {
    Produced(ContactSet),
    Failed,
}

pub enum DtMailbox {
    ContactSet(ContactSet),
    Shutdown,
}

struct FreshnessFlags {
    pose_fresh: bool,
    contacts_fresh: bool,
}

/// Owns the two worker threads and the channels that stand in for the
/// condition-variable rendezvous the source system uses.
pub struct Coordinator {
    kt_tx: SyncSender<KtMailbox>,
    kt_result_rx: Receiver<KtResult>,
    dt_tx: SyncSender<DtMailbox>,
    dt_handle: Option<std::thread::JoinHandle<()>>,
    kt_handle: Option<std::thread::JoinHandle<()>>,
    step_done_rx: Receiver<Result<Vec<WildcardSlots>, DemError>>,
    fatal: Arc<Mutex<Option<DemError>>>,
    freshness: Arc<Mutex<FreshnessFlags>>,
    /// On-fly family-transition rules, evaluated against the scene before
    /// each kT production so the following broad-phase sees the new family
    /// assignments (§4.4).
    policy: Arc<FamilyPolicy>,
    h: f64,
    time: f64,
    /// How many dT steps a kT production may be reused for before a fresh
    /// one is required (§4.11, §5).
    update_freq: UpdateFrequency,
    /// Most recently produced contact set, reused across drift steps.
    cached: Option<ContactSet>,
    /// Remaining steps the cached production may still cover under
    /// `BoundedDrift`.
    budget: u32,
}

impl Coordinator {
    /// Spawns the kT and dT worker threads. `scene` is shared behind a
    /// mutex since dT owns pose/velocity writes and kT only ever reads a
    /// snapshot copied out before a production begins.
    #[must_use]
    pub fn spawn(
        scene: Arc<Mutex<SceneState>>,
        templates: Arc<TemplateStore>,
        policy: Arc<FamilyPolicy>,
        force_law: Arc<dyn ForceLaw>,
        backend: Arc<dyn ComputeBackend>,
        grid: BinGrid,
        envelope: f64,
        gravity: [f64; 3],
        h: f64,
        rule: IntegrationRule,
        update_freq_u: u32,
    ) -> Self {
        let update_freq = match update_freq_u {
            0 | 1 => UpdateFrequency::Sync,
            u32::MAX => UpdateFrequency::UnboundedDrift,
            u => UpdateFrequency::BoundedDrift { u },
        };

        let (kt_tx, kt_rx) = sync_channel::<KtMailbox>(2);
        let (kt_result_tx, kt_result_rx) = sync_channel::<KtResult>(2);
        let (dt_tx, dt_rx) = sync_channel::<DtMailbox>(2);
        let (step_done_tx, step_done_rx) = sync_channel::<Result<Vec<WildcardSlots>, DemError>>(2);

        let fatal = Arc::new(Mutex::new(None));
        let freshness = Arc::new(Mutex::new(FreshnessFlags { pose_fresh: false, contacts_fresh: false }));

        let kt_fatal = Arc::clone(&fatal);
        let kt_freshness = Arc::clone(&freshness);
        let kt_policy = Arc::clone(&policy);
        let kt_backend = Arc::clone(&backend);
        let kt_scene = Arc::clone(&scene);
        let kt_templates = Arc::clone(&templates);
        let kt_handle = std::thread::spawn(move || {
            while let Ok(msg) = kt_rx.recv() {
                let snapshot = match msg {
                    KtMailbox::PoseSnapshot(s) => s,
                    KtMailbox::Shutdown => break,
                };
                if kt_fatal.lock().is_some() {
                    break;
                }
                let result = run_kt_production(
                    &snapshot,
                    &kt_policy,
                    kt_backend.as_ref(),
                    &kt_scene,
                    &kt_templates,
                    &grid,
                    envelope,
                    &snapshot.prev_contacts,
                    &snapshot.prev_wildcards,
                );
                match result {
                    Ok((contacts, wildcards)) => {
                        kt_freshness.lock().contacts_fresh = true;
                        if kt_result_tx.send(KtResult::Produced(ContactSet { contacts, wildcards })).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        *kt_fatal.lock() = Some(e);
                        let _ = kt_result_tx.send(KtResult::Failed);
                        break;
                    }
                }
            }
        });

        let dt_fatal = Arc::clone(&fatal);
        let dt_freshness = Arc::clone(&freshness);
        let dt_scene = Arc::clone(&scene);
        let dt_templates = Arc::clone(&templates);
        let dt_policy = Arc::clone(&policy);
        let dt_force_law = Arc::clone(&force_law);
        let dt_step_done_tx = step_done_tx.clone();
        let dt_handle = std::thread::spawn(move || {
            while let Ok(msg) = dt_rx.recv() {
                let contact_set = match msg {
                    DtMailbox::ContactSet(c) => c,
                    DtMailbox::Shutdown => break,
                };
                if dt_fatal.lock().is_some() {
                    break;
                }
                let mut scene = dt_scene.lock();
                let result = run_dt_step(
                    &mut scene,
                    &dt_templates,
                    &dt_policy,
                    dt_force_law.as_ref(),
                    &dt_templates.materials,
                    &contact_set,
                    gravity,
                    h,
                    rule,
                );
                dt_freshness.lock().contacts_fresh = false;
                let send_result = dt_step_done_tx.send(result);
                if send_result.is_err() {
                    break;
                }
            }
        });

        Self {
            kt_tx,
            kt_result_rx,
            dt_tx,
            dt_handle: Some(dt_handle),
            kt_handle: Some(kt_handle),
            step_done_rx,
            fatal,
            freshness,
            policy,
            h,
            time: 0.0,
            update_freq,
            cached: None,
            budget: 0,
        }
    }

    /// Advances one dT step. A fresh kT production is requested whenever the
    /// drift budget under `update_freq` is exhausted (always, under `Sync`);
    /// otherwise the previous production is reused, matching the source
    /// system's `CD update frequency` knob (§4.11, §5).
    pub fn run_one_step(&mut self, scene: &Mutex<SceneState>, templates: &TemplateStore) -> Result<(), DemError> {
        if let Some(err) = self.fatal.lock().take() {
            return Err(err);
        }

        let need_fresh = match self.update_freq {
            UpdateFrequency::Sync => true,
            UpdateFrequency::BoundedDrift { .. } => self.cached.is_none() || self.budget == 0,
            UpdateFrequency::UnboundedDrift => self.cached.is_none(),
        };

        if need_fresh {
            let time = self.time;
            let spheres = {
                let mut scene = scene.lock();
                apply_family_transitions(&mut scene, &self.policy, time);
                flatten_spheres(&scene, templates)
            };
            // The previous production's contacts/wildcards come from `cached`,
            // which dT's own per-step updates below keep current — kT never
            // tracks this state itself, since dT is the one actually mutating
            // wildcard values (§2, §4.7).
            let (prev_contacts, prev_wildcards) = match &self.cached {
                Some(set) => (set.contacts.clone(), set.wildcards.clone()),
                None => (Vec::new(), Vec::new()),
            };
            self.freshness.lock().pose_fresh = true;
            let snapshot = PoseSnapshot { spheres, time, prev_contacts, prev_wildcards };
            if self.kt_tx.send(KtMailbox::PoseSnapshot(snapshot)).is_err() {
                return Err(DemError::RuntimeAssertion("kT worker thread has already exited".to_string()));
            }
            match self.kt_result_rx.recv() {
                Ok(KtResult::Produced(set)) => {
                    self.cached = Some(set);
                    if let UpdateFrequency::BoundedDrift { u } = self.update_freq {
                        self.budget = u.saturating_sub(1);
                    }
                }
                Ok(KtResult::Failed) | Err(_) => {
                    if let Some(err) = self.fatal.lock().take() {
                        return Err(err);
                    }
                    return Err(DemError::RuntimeAssertion("kT worker thread has already exited".to_string()));
                }
            }
        } else if let UpdateFrequency::BoundedDrift { .. } = self.update_freq {
            self.budget -= 1;
        }

        let contact_set = self
            .cached
            .clone()
            .ok_or_else(|| DemError::RuntimeAssertion("no contact production available".to_string()))?;
        if self.dt_tx.send(DtMailbox::ContactSet(contact_set)).is_err() {
            return Err(DemError::RuntimeAssertion("dT worker thread has already exited".to_string()));
        }
        let result = self
            .step_done_rx
            .recv()
            .map_err(|_| DemError::RuntimeAssertion("dT worker thread has already exited".to_string()))?;
        self.time += self.h;
        let updated_wildcards = result?;
        // Feed dT's per-contact wildcard updates back into the cached
        // production so a reused (drift) step sees the latest values and the
        // next kT production's history mapper remaps from them correctly.
        if let Some(cached) = &mut self.cached {
            cached.wildcards = updated_wildcards;
        }
        Ok(())
    }

    /// Sends `Shutdown` to both workers and joins them, draining any fatal
    /// error recorded before the shutdown signal arrived.
    pub fn shutdown(mut self) -> Result<(), DemError> {
        let _ = self.kt_tx.send(KtMailbox::Shutdown);
        let _ = self.dt_tx.send(DtMailbox::Shutdown);
        if let Some(h) = self.kt_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.dt_handle.take() {
            let _ = h.join();
        }
        if let Some(err) = self.fatal.lock().take() {
            return Err(err);
        }
        Ok(())
    }
}

/// Evaluates every registered on-fly family-transition rule against each
/// owner's current position/velocity/time and applies the first matching
/// reassignment, run ahead of flattening so the subsequent broad-phase
/// production sees the new family assignments (§4.4, invariant-adjacent:
/// affects which pairs the family mask admits).
fn apply_family_transitions(scene: &mut SceneState, policy: &FamilyPolicy, time: f64) {
    let owners_len = scene.owners().len();
    for idx in 0..owners_len {
        let owner = idx as u32;
        let family = scene.get_owner_family(owner);
        let ctx = EvalContext {
            time,
            pos: scene.get_owner_pos(owner),
            vel: scene.get_owner_vel(owner),
        };
        if let Some(new_family) = policy.evaluate_transitions(family, &ctx) {
            scene.change_family(owner, new_family);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_kt_production(
    snapshot: &PoseSnapshot,
    policy: &FamilyPolicy,
    backend: &dyn ComputeBackend,
    scene: &Mutex<SceneState>,
    templates: &TemplateStore,
    grid: &BinGrid,
    envelope: f64,
    prev_contacts: &[Contact],
    prev_wildcards: &[WildcardSlots],
) -> Result<(Vec<Contact>, Vec<WildcardSlots>), DemError> {
    let pairs = run_broad_phase(backend, &snapshot.spheres, grid, envelope)?;
    let mut contacts = sphere_sphere_contacts(backend, &snapshot.spheres, &pairs, policy, F_MAX, envelope)?;
    contacts.retain(|c| match c.partner {
        ContactPartner::Sphere(b) => {
            let owner_a = snapshot.spheres[c.a as usize].owner;
            let owner_b = snapshot.spheres[b as usize].owner;
            owner_a != owner_b
        }
        _ => true,
    });
    {
        let scene = scene.lock();
        contacts.extend(analytical_and_mesh_contacts(&snapshot.spheres, &scene, templates, policy, envelope));
    }
    let (_, wildcards) = map_history(prev_contacts, prev_wildcards, &contacts);
    Ok((contacts, wildcards))
}

#[allow(clippy::too_many_arguments)]
fn run_dt_step(
    scene: &mut SceneState,
    templates: &TemplateStore,
    policy: &FamilyPolicy,
    force_law: &dyn ForceLaw,
    materials: &crate::template::MaterialTable,
    contact_set: &ContactSet,
    gravity: [f64; 3],
    h: f64,
    rule: IntegrationRule,
) -> Result<Vec<WildcardSlots>, DemError> {
    use crate::scene::OwnerKind;

    let spheres = flatten_spheres(scene, templates);
    // Pairwise (sphere-sphere) contributions go through `accumulate_loads`'s
    // signed-twice rule; single-owner (analytical/mesh) contributions are
    // accumulated directly since there is no second owner to receive the
    // negated force.
    let mut pair_contributions = Vec::with_capacity(contact_set.contacts.len());
    let mut single_contributions: Vec<(u32, ContactOutput)> = Vec::new();
    // Read before evaluation, written back after (§4.8); untouched (skipped)
    // contacts carry their previous value through unchanged.
    let mut wildcards_out = contact_set.wildcards.clone();
    for (idx, contact) in contact_set.contacts.iter().enumerate() {
        let wildcards_in = contact_set.wildcards[idx];
        let sa = &spheres[contact.a as usize];
        let vel_a = scene.get_owner_vel(sa.owner);
        let ang_vel_a = scene.get_owner_ang_vel(sa.owner);
        let family_a = scene.get_owner_family(sa.owner);

        // Families can change mid-step (direct `change_family` calls, or
        // on-fly transitions) between the kT production that built this
        // contact and the dT step that evaluates it, especially when a
        // stale `ContactSet` is reused under bounded/unbounded drift.
        // Re-check admissibility here rather than trusting the mask baked
        // into the production.
        let partner_family = match contact.partner {
            ContactPartner::Sphere(b) => scene.get_owner_family(spheres[b as usize].owner),
            ContactPartner::Analytical(owner_idx) => scene.get_owner_family(owner_idx),
            ContactPartner::MeshFacet { owner, .. } => scene.get_owner_family(owner),
        };
        if !policy.admissible(family_a, partner_family) {
            continue;
        }

        let (owner_b, k) = match contact.partner {
            ContactPartner::Sphere(b) => {
                let sb = &spheres[b as usize];
                let vel_b = scene.get_owner_vel(sb.owner);
                let ang_vel_b = scene.get_owner_ang_vel(sb.owner);
                (
                    Some(sb.owner),
                    ContactKinematics {
                        pos_a: sa.center,
                        pos_b: sb.center,
                        radius_a: sa.radius,
                        radius_b: sb.radius,
                        vel_a,
                        vel_b,
                        ang_vel_a,
                        ang_vel_b,
                        mat_a: crate::template::MaterialHandle(sa.material),
                        mat_b: crate::template::MaterialHandle(sb.material),
                        wildcards_in,
                    },
                )
            }
            ContactPartner::Analytical(owner_idx) => {
                let owner_pos = scene.get_owner_pos(owner_idx);
                let owner_ori = scene.get_owner_ori_q(owner_idx);
                let OwnerKind::Analytical(handle) = scene.owners()[owner_idx as usize].kind else {
                    continue;
                };
                let template = &templates.analytical[handle as usize];
                let (contact_point, mat_b) = crate::narrow_phase::analytical_contact_geometry(owner_pos, owner_ori, template, sa.center);
                (
                    None,
                    ContactKinematics {
                        pos_a: sa.center,
                        pos_b: contact_point,
                        radius_a: sa.radius,
                        radius_b: crate::narrow_phase::ANALYTICAL_VIRTUAL_RADIUS,
                        vel_a,
                        vel_b: scene.get_owner_vel(owner_idx),
                        ang_vel_a,
                        ang_vel_b: [0.0; 3],
                        mat_a: crate::template::MaterialHandle(sa.material),
                        mat_b,
                        wildcards_in,
                    },
                )
            }
            ContactPartner::MeshFacet { owner, facet } => {
                let owner_pos = scene.get_owner_pos(owner);
                let owner_ori = scene.get_owner_ori_q(owner);
                let OwnerKind::Mesh(handle) = scene.owners()[owner as usize].kind else {
                    continue;
                };
                let mesh = &templates.meshes[handle as usize];
                let (contact_point, mat_b) =
                    crate::narrow_phase::facet_contact_geometry(owner_pos, owner_ori, &mesh.facets[facet as usize], sa.center);
                (
                    None,
                    ContactKinematics {
                        pos_a: sa.center,
                        pos_b: contact_point,
                        radius_a: sa.radius,
                        radius_b: crate::narrow_phase::ANALYTICAL_VIRTUAL_RADIUS,
                        vel_a,
                        vel_b: scene.get_owner_vel(owner),
                        ang_vel_a,
                        ang_vel_b: [0.0; 3],
                        mat_a: crate::template::MaterialHandle(sa.material),
                        mat_b,
                        wildcards_in,
                    },
                )
            }
        };

        let out: ContactOutput = force_law.evaluate(&k, materials);
        wildcards_out[idx] = out.wildcards_out;
        match owner_b {
            Some(owner_b) => pair_contributions.push((sa.owner, owner_b, out)),
            None => single_contributions.push((sa.owner, out)),
        }
    }

    let owner_count = scene.owners().len();
    let mut loads = accumulate_loads(owner_count, &pair_contributions);
    for (owner, out) in single_contributions {
        loads[owner as usize].force = add3(loads[owner as usize].force, out.force);
        loads[owner as usize].torque = add3(loads[owner as usize].torque, out.torque_a);
    }
    let has_mover = scene.owners().iter().any(|o| matches!(o.kind, OwnerKind::Clump(_)));
    if has_mover {
        integrate_step(scene, templates, policy, &loads, gravity, h, rule, 0.0);
    }
    Ok(wildcards_out)
}

fn add3(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}
