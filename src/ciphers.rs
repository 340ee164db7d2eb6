//! Effective-ciphersuite computation.

use crate::engine::{CipherId, Engine};
use crate::material::SecurityMode;

/// Compute the mode-appropriate ciphersuite list to hand to the engine.
///
/// Iterates the engine's full supported list in its native order, retaining
/// suites present in `allow_list` (all of them, if the list is empty) and,
/// for PSK mode, only suites whose key exchange uses PSK. The result can be
/// empty; callers treat that as a fatal precondition for handshaking and
/// never fall back to an unfiltered set.
pub fn select(engine: &dyn Engine, mode: SecurityMode, allow_list: &[CipherId]) -> Vec<CipherId> {
    engine
        .supported_ciphersuites()
        .into_iter()
        .filter(|suite| allow_list.is_empty() || allow_list.contains(suite))
        .filter(|suite| mode != SecurityMode::Psk || engine.suite_uses_psk(*suite))
        .collect()
}
