use anyhow::Result;
use dem::{DemSolver, SceneBuilder};
use std::collections::HashMap;

/// Drops a single sphere onto a ground plane and reports its trajectory.
pub fn run() -> Result<()> {
    tracing_subscriber::fmt::init();

    tracing::info!("Building scene...");
    let mut builder = SceneBuilder::new();

    let mut material = HashMap::new();
    material.insert("E".to_string(), 1.0e8);
    material.insert("nu".to_string(), 0.3);
    material.insert("CoR".to_string(), 0.6);
    material.insert("mu".to_string(), 0.4);
    let mat = builder.load_material(&material);

    let radius = 0.1;
    let clump = builder.load_clump_type(1.0, [0.004, 0.004, 0.004], vec![([0.0, 0.0, 0.0], radius, mat)]);

    builder.instruct_box_domain_dimension(4.0, 4.0, 4.0, None);
    builder.add_plane([0.0, 0.0, 0.0], [0.0, 1.0, 0.0], mat);
    let batch = builder.add_clumps(clump, &[[0.0, 1.0, 0.0]], None, None, None);
    let tracker = builder.track(batch.0[0]);

    builder.set_gravitational_acceleration([0.0, -9.81, 0.0]);
    builder.set_init_time_step(1.0e-4);
    builder.set_max_velocity(5.0);
    builder.set_expand_safety_param(1.2);

    let mut solver = DemSolver::initialize(builder, compute::default_backend())?;
    for warning in solver.warnings() {
        tracing::warn!("{warning}");
    }

    tracing::info!("Running dynamics...");
    let num_steps = 200;
    let step_duration = 0.005;
    for i in 0..num_steps {
        solver.do_dynamics(step_duration)?;
        if (i + 1) % 50 == 0 {
            let pos = solver.get_owner_pos(tracker);
            tracing::info!("step {} complete, sphere height = {:.4}", i + 1, pos[1]);
        }
    }

    let final_pos = solver.get_owner_pos(tracker);
    tracing::info!("Final sphere position: {final_pos:?}");
    solver.finalize()?;

    Ok(())
}
