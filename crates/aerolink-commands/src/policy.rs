//! Per-code delivery policy table.
//!
//! Some command codes are special to the delivery layer even though their
//! payload semantics stay opaque: codes whose resend would be unsafe get a
//! single try, and codes that may legitimately run as concurrent instances
//! bypass the one-per-slot rule. Consulted once at submission time.

use aerolink_core::CommandCode;

/// Whether an unanswered send of this code may be resent.
///
/// Toggles like arm/disarm must not be resent: the first frame may have been
/// acted on with only the ack lost, and a resend would toggle again.
pub fn is_retryable(code: CommandCode) -> bool {
    !matches!(
        code,
        CommandCode::COMPONENT_ARM_DISARM | CommandCode::DO_FLIGHTTERMINATION
    )
}

/// Whether multiple concurrent in-flight instances of this code are
/// permitted, disambiguated by a caller-supplied index.
pub fn is_duplicable(code: CommandCode) -> bool {
    matches!(
        code,
        CommandCode::DO_SET_ROI_LOCATION | CommandCode::DO_SET_ROI_NONE
    )
}

/// Cap the caller-requested try budget by the code's retry policy.
pub fn effective_max_tries(code: CommandCode, requested: u32) -> u32 {
    if is_retryable(code) { requested } else { 1 }
}
