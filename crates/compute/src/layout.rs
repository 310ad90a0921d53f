/// Binding slot for the first input storage buffer.
pub const STORAGE_IN: u32 = 0;
/// Binding slot for the second input buffer used by binary operations.
pub const STORAGE_IN2: u32 = 1;
/// Binding slot for the third input buffer used by ternary operations.
pub const STORAGE_IN3: u32 = 2;
/// Binding slot for the output storage buffer.
pub const STORAGE_OUT: u32 = 3;
/// Binding slot for uniform configuration data.
pub const UNIFORM_SC: u32 = 4;

const _: () = assert!(STORAGE_OUT == 3);

/// Returns the expected number of buffer bindings for a given kernel.
///
/// The layout is stable across backends and used when creating bind groups.
pub const fn binding_count(kernel: &crate::Kernel) -> u32 {
    match kernel {
        // kT broad-phase
        crate::Kernel::SphereBinTouchCounts => 3, // SPHERES_IN, ENVELOPE_UNIFORM, COUNTS_OUT
        crate::Kernel::ScatterBinSpherePairs => 4, // SPHERES_IN, OFFSETS_IN, ENVELOPE_UNIFORM, PAIRS_OUT

        // kT narrow-phase and history
        crate::Kernel::NarrowPhaseSphereContacts => 4, // BIN_SPHERE_PAIRS_IN, SPHERES_IN, MASK_UNIFORM, CONTACTS_OUT
        crate::Kernel::MapContactHistory => 3, // PREV_CONTACTS_IN, NEW_CONTACTS_IN, MAPPING_OUT

        // dT force evaluation and integration
        crate::Kernel::EvaluateContactForces => 4, // CONTACTS_IN, OWNERS_IN, MATERIALS_IN, FORCES_OUT
        crate::Kernel::IntegrateOwners => 3, // OWNERS_INOUT, FORCES_IN, PARAMS_UNIFORM

        // Generic primitives reused by several passes
        crate::Kernel::SegmentedReduceSum | crate::Kernel::ScatterAdd => 4, // DATA_IN, INDICES, OUT, CONFIG
        crate::Kernel::Gather => 4, // DATA_IN, INDICES, OUT, CONFIG
    }
}
