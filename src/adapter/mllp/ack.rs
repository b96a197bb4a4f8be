//! Decides which `MSA-1` code an inbound MLLP adapter returns, per
//! SPEC_FULL.md §4.3. The actual MSH/MSA byte construction lives in
//! [`crate::hl7::build_ack`]; this module is the pure decision function.

use crate::domain::AckMode;

/// Outcome of attempting to frame and parse an inbound message, used to
/// decide the ACK code under `ack_mode=application`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The message parsed and passed whatever validation the adapter runs.
    Valid,
    /// The message parsed but failed application-level validation.
    ApplicationInvalid,
    /// The message was structurally malformed (could not be parsed at all).
    StructurallyInvalid,
}

/// `MSA-1` code to send back, or `None` if `ack_mode=never` suppresses the
/// ACK entirely.
#[must_use]
pub fn ack_code(ack_mode: AckMode, outcome: ValidationOutcome) -> Option<&'static str> {
    match (ack_mode, outcome) {
        (AckMode::Never, _) => None,
        (_, ValidationOutcome::StructurallyInvalid) => Some("AR"),
        (AckMode::Immediate, _) => Some("AA"),
        (AckMode::Application, ValidationOutcome::Valid) => Some("AA"),
        (AckMode::Application, ValidationOutcome::ApplicationInvalid) => Some("AE"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_always_accepts_unless_malformed() {
        assert_eq!(
            ack_code(AckMode::Immediate, ValidationOutcome::Valid),
            Some("AA")
        );
        assert_eq!(
            ack_code(AckMode::Immediate, ValidationOutcome::ApplicationInvalid),
            Some("AA")
        );
    }

    #[test]
    fn application_mode_distinguishes_valid_from_invalid() {
        assert_eq!(
            ack_code(AckMode::Application, ValidationOutcome::Valid),
            Some("AA")
        );
        assert_eq!(
            ack_code(AckMode::Application, ValidationOutcome::ApplicationInvalid),
            Some("AE")
        );
    }

    #[test]
    fn structurally_invalid_is_always_reject_unless_never() {
        assert_eq!(
            ack_code(AckMode::Immediate, ValidationOutcome::StructurallyInvalid),
            Some("AR")
        );
        assert_eq!(
            ack_code(AckMode::Application, ValidationOutcome::StructurallyInvalid),
            Some("AR")
        );
        assert_eq!(
            ack_code(AckMode::Never, ValidationOutcome::StructurallyInvalid),
            None
        );
    }

    #[test]
    fn never_mode_suppresses_ack_regardless_of_outcome() {
        assert_eq!(ack_code(AckMode::Never, ValidationOutcome::Valid), None);
    }
}
