//! Error and warning types for the DEM core, grouped per the three kinds
//! described by the error-handling design: configuration errors are fatal at
//! [`crate::solver::DemSolver::initialize`], runtime assertions are fatal
//! during the current step, and warnings are collected rather than raised.

use compute::ComputeError;

/// A fatal error surfaced to the driver. Configuration errors are detected at
/// `initialize()`; runtime assertions are detected mid-run by kT or dT and
/// cause both threads to be drained and joined before this is returned.
#[derive(Debug, thiserror::Error)]
pub enum DemError {
    /// User-supplied scene data is out of range: a zero domain, an
    /// out-of-range template index, a bin count that overflows the
    /// configured bin-index type, an invalid force-law reference.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A per-step invariant was violated while the simulation was running,
    /// e.g. a bin overflowed its sphere capacity or the contact list
    /// exceeded its capacity multiplier.
    #[error("runtime assertion failed: {0}")]
    RuntimeAssertion(String),

    /// The underlying compute backend rejected a dispatch (shape mismatch,
    /// unimplemented kernel on the active backend, ...).
    #[error("compute backend error: {0}")]
    Backend(#[from] ComputeError),
}

/// A non-fatal diagnostic emitted once at init time, per §7: a reserved
/// family used on a non-fixed body, a material missing a property the force
/// law declared as required, a force law that declares but never writes to a
/// wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning(pub String);

impl Warning {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::warn!("{message}");
        Self(message)
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
