//! The repair pass: a pure, idempotent function over `Meta`. It never
//! touches `data`, never promotes an unrecognized risk string into a
//! canonical one, and never flips `ok`.

use super::types::{Envelope, Meta, Risk, RiskLevel};

const MAX_EXPLAIN_LEN: usize = 280;
const ELLIPSIS: &str = "...";

/// Clamps `confidence` into `[0, 1]`, trims/lowercases a canonical risk
/// string (leaving `Risk::Custom` untouched), and truncates `explain` to
/// `MAX_EXPLAIN_LEN` code units with a trailing ellipsis. Running this twice
/// produces the same result as running it once.
pub fn repair_meta(meta: &mut Meta) {
    meta.confidence = meta.confidence.clamp(0.0, 1.0);
    meta.risk = normalize_risk(meta.risk.clone());
    meta.explain = truncate_explain(&meta.explain);
}

fn normalize_risk(risk: Risk) -> Risk {
    match risk {
        Risk::Level(level) => Risk::Level(level),
        Risk::Custom { custom, reason } => {
            let trimmed = custom.trim();
            match RiskLevel::parse(trimmed) {
                Some(level) => Risk::Level(level),
                None => Risk::Custom {
                    custom: trimmed.to_string(),
                    reason,
                },
            }
        }
    }
}

pub(super) fn truncate_explain(explain: &str) -> String {
    if explain.chars().count() <= MAX_EXPLAIN_LEN {
        return explain.to_string();
    }
    let keep = MAX_EXPLAIN_LEN - ELLIPSIS.len();
    let mut truncated: String = explain.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Applies [`repair_meta`] to whichever branch of the envelope is present,
/// leaving `data`/`error`/`partial_data` untouched.
pub fn repair_envelope(mut envelope: Envelope) -> Envelope {
    repair_meta(envelope.meta_mut());
    envelope
}

/// Builds a repaired failure envelope for a given error, deriving `explain`
/// from the error message when the caller has none. Used by the runner when
/// a call fails before any model-produced meta exists.
pub fn repair_error_envelope(mut envelope: Envelope) -> Envelope {
    if let Envelope::Failure { meta, error, .. } = &mut envelope {
        if meta.explain.trim().is_empty() {
            meta.explain = error.message.clone();
        }
        if meta.confidence != 0.0 {
            meta.confidence = 0.0;
        }
    }
    repair_envelope(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::types::{Data, EnvelopeError};

    fn success(confidence: f64, risk: Risk, explain: &str) -> Envelope {
        Envelope::Success {
            meta: Meta::new(confidence, risk, explain),
            data: Data {
                rationale: serde_json::json!("because"),
                extensions: None,
                fields: Default::default(),
            },
        }
    }

    #[test]
    fn confidence_is_clamped() {
        let envelope = repair_envelope(success(1.7, Risk::Level(RiskLevel::Low), "ok"));
        assert_eq!(envelope.meta().confidence, 1.0);

        let envelope = repair_envelope(success(-0.3, Risk::Level(RiskLevel::Low), "ok"));
        assert_eq!(envelope.meta().confidence, 0.0);
    }

    #[test]
    fn explain_is_truncated_with_ellipsis() {
        let long = "x".repeat(500);
        let envelope = repair_envelope(success(0.5, Risk::Level(RiskLevel::None), &long));
        assert_eq!(envelope.meta().explain.chars().count(), 280);
        assert!(envelope.meta().explain.ends_with("..."));
    }

    #[test]
    fn short_explain_is_untouched() {
        let envelope = repair_envelope(success(0.5, Risk::Level(RiskLevel::None), "fine"));
        assert_eq!(envelope.meta().explain, "fine");
    }

    #[test]
    fn unknown_custom_risk_is_not_promoted() {
        let risk = Risk::Custom {
            custom: "  totally-novel  ".to_string(),
            reason: "because".to_string(),
        };
        let envelope = repair_envelope(success(0.5, risk, "ok"));
        match envelope.meta().risk.clone() {
            Risk::Custom { custom, .. } => assert_eq!(custom, "totally-novel"),
            Risk::Level(_) => panic!("unknown custom risk must not become a canonical level"),
        }
    }

    #[test]
    fn custom_risk_matching_a_known_name_is_canonicalized() {
        let risk = Risk::Custom {
            custom: " High ".to_string(),
            reason: "because".to_string(),
        };
        let envelope = repair_envelope(success(0.5, risk, "ok"));
        assert!(matches!(envelope.meta().risk, Risk::Level(RiskLevel::High)));
    }

    #[test]
    fn repair_is_idempotent() {
        let once = repair_envelope(success(1.7, Risk::Level(RiskLevel::Low), &"y".repeat(400)));
        let twice = repair_envelope(once.clone());
        assert_eq!(once.meta().confidence, twice.meta().confidence);
        assert_eq!(once.meta().explain, twice.meta().explain);
    }

    #[test]
    fn repair_never_flips_ok() {
        let envelope = Envelope::Failure {
            meta: Meta::new(0.0, Risk::Level(RiskLevel::High), ""),
            error: EnvelopeError {
                code: "LLM_ERROR".to_string(),
                message: "backend timed out".to_string(),
                recoverable: Some(true),
                retry_after_ms: Some(5000),
                details: None,
            },
            partial_data: None,
        };
        let repaired = repair_error_envelope(envelope);
        assert!(!repaired.is_ok());
        assert_eq!(repaired.meta().explain, "backend timed out");
    }
}
