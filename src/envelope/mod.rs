//! The v2.2 envelope: a closed `Success`/`Failure` sum type, detection and
//! promotion of earlier envelope shapes, risk aggregation, and the
//! idempotent repair pass.

mod convert;
mod repair;
mod risk;
mod types;

pub use convert::{convert_legacy_to_envelope, is_envelope_response, is_v22_envelope, wrap_v21_to_v22};
pub use repair::{repair_envelope, repair_error_envelope, repair_meta};
pub use risk::{aggregate, aggregate_by_rule, aggregate_from_items, RiskRule};
pub use types::{
    Data, Envelope, EnvelopeError, Extensions, Insight, Meta, Risk, RiskLevel, Wire, WireError,
    ENVELOPE_VERSION,
};
