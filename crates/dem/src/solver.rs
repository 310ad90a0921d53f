//! `DemSolver`: the top-level driver handle (§4.11, §6).

use crate::builder::{BatchHandle, Inspector, InspectorHandle, InspectorQuantity, RunParams, SceneBuilder, TrackerHandle};
use crate::coordinator::Coordinator;
use crate::error::{DemError, Warning};
use crate::family::FamilyPolicy;
use crate::force::ForceLaw;
use crate::scene::{Quaternion, SceneState};
use crate::spatial::BinGrid;
use crate::template::{ClumpTemplateHandle, TemplateStore};
use compute::ComputeBackend;
use parking_lot::Mutex;
use std::sync::Arc;

/// Owns the finalized scene/template/policy state and the kT/dT worker
/// pair. Constructed via [`DemSolver::initialize`], which consumes a
/// [`SceneBuilder`].
pub struct DemSolver {
    scene: Arc<Mutex<SceneState>>,
    templates: Arc<TemplateStore>,
    policy: Arc<FamilyPolicy>,
    force_law: Arc<dyn ForceLaw>,
    backend: Arc<dyn ComputeBackend>,
    grid: BinGrid,
    params: RunParams,
    coordinator: Option<Coordinator>,
    inspectors: Vec<Inspector>,
    trackers: Vec<u32>,
    warnings: Vec<Warning>,
}

impl DemSolver {
    /// Finalizes `builder` and spawns the kT/dT worker pair.
    ///
    /// # Errors
    /// Propagates any [`DemError::Configuration`] from [`SceneBuilder::finalize`].
    pub fn initialize(builder: SceneBuilder, backend: Arc<dyn ComputeBackend>) -> Result<Self, DemError> {
        let (scene, templates, policy, force_law, grid, params, inspectors, trackers, warnings) = builder.finalize()?;
        let scene = Arc::new(Mutex::new(scene));
        let templates = Arc::new(templates);
        let policy = Arc::new(policy);

        let coordinator = Coordinator::spawn(
            Arc::clone(&scene),
            Arc::clone(&templates),
            Arc::clone(&policy),
            Arc::clone(&force_law),
            Arc::clone(&backend),
            grid,
            params.envelope,
            params.gravity,
            params.h,
            params.rule,
            params.update_freq_u,
        );

        Ok(Self {
            scene,
            templates,
            policy,
            force_law,
            backend,
            grid,
            params,
            coordinator: Some(coordinator),
            inspectors,
            trackers,
            warnings,
        })
    }

    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Advances the simulation by `duration` seconds, rounding to the
    /// nearest whole number of `h`-sized steps.
    ///
    /// # Errors
    /// Returns whatever fatal error either worker thread raised.
    pub fn do_dynamics(&mut self, duration: f64) -> Result<(), DemError> {
        let steps = (duration / self.params.h).round().max(0.0) as u32;
        let coordinator = self
            .coordinator
            .as_mut()
            .ok_or_else(|| DemError::RuntimeAssertion("DemSolver used after finalize()".to_string()))?;
        for _ in 0..steps {
            coordinator.run_one_step(&self.scene, &self.templates)?;
        }
        Ok(())
    }

    /// Identical to [`Self::do_dynamics`]: this driver's step loop already
    /// blocks on the dT result each step, so there is no separate
    /// fire-and-forget variant to distinguish it from.
    pub fn do_dynamics_then_sync(&mut self, duration: f64) -> Result<(), DemError> {
        self.do_dynamics(duration)
    }

    /// Shuts down the kT/dT worker pair and surfaces any fatal error they
    /// recorded. After this call the solver's accessors still work but
    /// `do_dynamics` will error.
    ///
    /// # Errors
    /// Propagates a fatal error raised by either worker before shutdown.
    pub fn finalize(&mut self) -> Result<(), DemError> {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.shutdown()?;
        }
        Ok(())
    }

    /// Grows the owner arrays with more clumps of an already-loaded
    /// template, permitted only between `do_dynamics` calls (§4.10). The
    /// worker pair is restarted against the grown scene.
    ///
    /// # Errors
    /// Propagates a fatal error raised by the previous worker pair during
    /// shutdown.
    pub fn append_clumps(&mut self, template: ClumpTemplateHandle, positions: &[[f64; 3]], family: u32) -> Result<BatchHandle, DemError> {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.shutdown()?;
        }
        let mut ids = Vec::with_capacity(positions.len());
        {
            let mut scene = self.scene.lock();
            for &pos in positions {
                let id = scene.add_owner(crate::scene::Owner {
                    kind: crate::scene::OwnerKind::Clump(template),
                    pos: crate::spatial::SpatialAddress::from_physical(&scene.layout, pos),
                    ori: Quaternion::default(),
                    vel: [0.0; 3],
                    ang_vel: [0.0; 3],
                    acc: [0.0; 3],
                    ang_acc: [0.0; 3],
                    family,
                    wildcards: [0.0; crate::constants::W_MAX],
                });
                ids.push(id);
            }
        }
        self.coordinator = Some(Coordinator::spawn(
            Arc::clone(&self.scene),
            Arc::clone(&self.templates),
            Arc::clone(&self.policy),
            Arc::clone(&self.force_law),
            Arc::clone(&self.backend),
            self.grid,
            self.params.envelope,
            self.params.gravity,
            self.params.h,
            self.params.rule,
            self.params.update_freq_u,
        ));
        Ok(BatchHandle(ids))
    }

    #[must_use]
    pub fn get_owner_pos(&self, tracker: TrackerHandle) -> [f64; 3] {
        let owner = self.trackers[tracker.0 as usize];
        self.scene.lock().get_owner_pos(owner)
    }

    #[must_use]
    pub fn get_owner_vel(&self, tracker: TrackerHandle) -> [f64; 3] {
        let owner = self.trackers[tracker.0 as usize];
        self.scene.lock().get_owner_vel(owner)
    }

    #[must_use]
    pub fn get_owner_ori_q(&self, tracker: TrackerHandle) -> Quaternion {
        let owner = self.trackers[tracker.0 as usize];
        self.scene.lock().get_owner_ori_q(owner)
    }

    #[must_use]
    pub fn get_owner_ang_vel(&self, tracker: TrackerHandle) -> [f64; 3] {
        let owner = self.trackers[tracker.0 as usize];
        self.scene.lock().get_owner_ang_vel(owner)
    }

    #[must_use]
    pub fn get_owner_acc(&self, tracker: TrackerHandle) -> [f64; 3] {
        let owner = self.trackers[tracker.0 as usize];
        self.scene.lock().get_owner_acc(owner)
    }

    #[must_use]
    pub fn get_owner_ang_acc(&self, tracker: TrackerHandle) -> [f64; 3] {
        let owner = self.trackers[tracker.0 as usize];
        self.scene.lock().get_owner_ang_acc(owner)
    }

    #[must_use]
    pub fn get_owner_family(&self, tracker: TrackerHandle) -> u32 {
        let owner = self.trackers[tracker.0 as usize];
        self.scene.lock().get_owner_family(owner)
    }

    pub fn change_family(&mut self, tracker: TrackerHandle, family: u32) {
        let owner = self.trackers[tracker.0 as usize];
        self.scene.lock().change_family(owner, family);
    }

    /// `changeOwnerSizes`: rescales the sphere radii and offsets of each
    /// named owner's clump by `factor`, in place. Clump templates are shared
    /// by every owner instantiated from them, so a scaled owner is given its
    /// own private template (mass/MOI/volume scaled to match) rather than
    /// mutating the shared one; siblings instantiated from the same template
    /// are unaffected. Mirrors [`Self::append_clumps`]'s restart dance: the
    /// worker pair is shut down for exclusive template-store access and
    /// respawned against the mutated scene.
    ///
    /// # Errors
    /// Propagates a fatal error raised by the previous worker pair during
    /// shutdown.
    pub fn change_owner_sizes(&mut self, trackers: &[TrackerHandle], factors: &[f64]) -> Result<(), DemError> {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.shutdown()?;
        }
        {
            let mut scene = self.scene.lock();
            let templates = Arc::get_mut(&mut self.templates)
                .expect("coordinator shutdown joined both workers; no other template-store handle remains");
            for (tracker, &factor) in trackers.iter().zip(factors) {
                let owner = self.trackers[tracker.0 as usize];
                let crate::scene::OwnerKind::Clump(handle) = scene.owners()[owner as usize].kind else {
                    continue;
                };
                let mut scaled = templates.clump(handle).clone();
                for component in &mut scaled.components {
                    component.offset = [component.offset[0] * factor, component.offset[1] * factor, component.offset[2] * factor];
                    component.radius *= factor;
                }
                let volume_factor = factor * factor * factor;
                scaled.mass *= volume_factor;
                scaled.volume *= volume_factor;
                let moi_factor = factor.powi(5);
                scaled.moi = [scaled.moi[0] * moi_factor, scaled.moi[1] * moi_factor, scaled.moi[2] * moi_factor];
                let new_handle = templates.load_clump_type(scaled);
                scene.owners_mut()[owner as usize].kind = crate::scene::OwnerKind::Clump(new_handle);
            }
        }
        self.coordinator = Some(Coordinator::spawn(
            Arc::clone(&self.scene),
            Arc::clone(&self.templates),
            Arc::clone(&self.policy),
            Arc::clone(&self.force_law),
            Arc::clone(&self.backend),
            self.grid,
            self.params.envelope,
            self.params.gravity,
            self.params.h,
            self.params.rule,
            self.params.update_freq_u,
        ));
        Ok(())
    }

    /// Evaluates one of the inspectors registered at scene-build time.
    #[must_use]
    pub fn evaluate_inspector(&self, handle: InspectorHandle, time: f64) -> f64 {
        let inspector = &self.inspectors[handle.0 as usize];
        let scene = self.scene.lock();
        let matches = |owner: &crate::scene::Owner| -> bool {
            inspector.predicate.as_ref().map_or(true, |expr| {
                let ctx = crate::expr::EvalContext {
                    time,
                    pos: owner.pos.to_physical(&scene.layout),
                    vel: owner.vel,
                };
                expr.eval_bool(&ctx)
            })
        };
        match inspector.quantity {
            InspectorQuantity::OwnerCount => scene.owners().iter().filter(|o| matches(o)).count() as f64,
            InspectorQuantity::MaxAbsVelocity => scene
                .owners()
                .iter()
                .filter(|o| matches(o))
                .map(|o| (o.vel[0].powi(2) + o.vel[1].powi(2) + o.vel[2].powi(2)).sqrt())
                .fold(0.0, f64::max),
            InspectorQuantity::AveragePosition(axis) => {
                let axis_idx = match axis {
                    crate::spatial::Axis::X => 0,
                    crate::spatial::Axis::Y => 1,
                    crate::spatial::Axis::Z => 2,
                };
                let matching: Vec<_> = scene.owners().iter().filter(|o| matches(o)).collect();
                if matching.is_empty() {
                    return 0.0;
                }
                let sum: f64 = matching.iter().map(|o| o.pos.to_physical(&scene.layout)[axis_idx]).sum();
                sum / matching.len() as f64
            }
        }
    }
}
