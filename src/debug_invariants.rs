//! Structural self-checks for the stateful parts of the runtime.
//!
//! Implementors only write [`DebugInvariants::validate_invariants`]; the
//! asserting wrapper is provided and disappears from release builds.

use crate::bsp_error::BspError;

/// Panics with `[invariants] <context>: <error>` if `$expr` is an `Err`,
/// in debug builds only.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)+) => {
        #[cfg(debug_assertions)]
        if let Err(e) = $expr {
            panic!("[invariants] {}: {}", format_args!($($ctx)+), e);
        }
    };
}

pub trait DebugInvariants {
    /// Name used in the panic message of a failed check.
    const NAME: &'static str;

    /// First violated invariant, if any.
    fn validate_invariants(&self) -> Result<(), BspError>;

    /// Panics on a violated invariant in debug builds; no-op in release.
    fn debug_assert_invariants(&self) {
        debug_invariants!(self.validate_invariants(), "{}", Self::NAME);
    }
}
