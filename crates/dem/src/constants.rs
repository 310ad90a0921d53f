//! Literal constants pinned for this implementation. The distilled
//! specification and the filtered `Defines.h` it was distilled from leave
//! these as build-time knobs rather than fixed values; DESIGN.md records the
//! choice of each as an Open Question decision.

/// Bit-width of a sub-voxel coordinate along one axis: `sx, sy, sz` range
/// over `[0, 2^VOXEL_RES_POWER2)`.
pub const VOXEL_RES_POWER2: u32 = 16;

/// Total bits split across `nvXp2 + nvYp2 + nvZp2` by [`crate::spatial::figure_out_nv`].
pub const VOXEL_COUNT_POWER2: u32 = 42;

/// Family ids are `u8`; `255` is reserved as the always-fixed family.
pub const F_MAX: u32 = 255;

/// Maximum number of per-contact or per-owner wildcards.
pub const W_MAX: usize = 8;

/// Bin ids are `u32`; the total bin count must not exceed this.
pub const BIN_ID_MAX: u64 = u32::MAX as u64;

/// Per-bin sphere count above which broad-phase reports a runtime assertion.
pub const MAX_SPHERES_PER_BIN: usize = 256;

/// Cumulative component budget for embedding clump templates directly into
/// jitified kernels; templates past this threshold spill to global memory.
pub const T_JIT: usize = 64;

/// Sentinel written into a new contact's history slot when it has no
/// counterpart in the previous step's contact list.
pub const NULL_MAPPING: u32 = u32::MAX;
