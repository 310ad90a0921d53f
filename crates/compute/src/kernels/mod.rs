// This module re-exports handlers for each kernel operation.

// Broad-phase, narrow-phase, and history (kinematic thread)
pub mod sphere_bin_touch_counts;
pub use sphere_bin_touch_counts::handle_sphere_bin_touch_counts;
pub mod scatter_bin_sphere_pairs;
pub use scatter_bin_sphere_pairs::handle_scatter_bin_sphere_pairs;
pub mod narrow_phase_sphere_contacts;
pub use narrow_phase_sphere_contacts::handle_narrow_phase_sphere_contacts;
pub mod map_contact_history;
pub use map_contact_history::handle_map_contact_history;

// Force evaluation and integration (dynamic thread)
pub mod evaluate_contact_forces;
pub use evaluate_contact_forces::handle_evaluate_contact_forces;
pub mod integrate_owners;
pub use integrate_owners::handle_integrate_owners;

// Generic array primitives reused by several passes (prefix sums, gathers)
pub mod segmented_reduce_sum_op;
pub use segmented_reduce_sum_op::handle_segmented_reduce_sum;
pub mod scatter_add_op;
pub use scatter_add_op::handle_scatter_add;
pub mod gather_op;
pub use gather_op::handle_gather;
