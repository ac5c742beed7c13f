//! The v2.2 envelope shape: a closed, exhaustive sum type standing in for
//! the source's duck-typed response dictionaries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;

pub const ENVELOPE_VERSION: &str = "2.2";

/// Canonical risk levels, ordered `None < Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    fn rank(self) -> u8 {
        match self {
            RiskLevel::None => 0,
            RiskLevel::Low => 1,
            RiskLevel::Medium => 2,
            RiskLevel::High => 3,
        }
    }

    pub fn parse(s: &str) -> Option<RiskLevel> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Some(RiskLevel::None),
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl PartialOrd for RiskLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RiskLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Risk as reported in `meta`. A module whose enum strategy is `extensible`
/// may report a `custom` value with a `reason` instead of a canonical level;
/// aggregation treats any `Custom` value as `Medium` (see `risk::aggregate`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Risk {
    Level(RiskLevel),
    Custom { custom: String, reason: String },
}

impl Risk {
    pub fn canonical_or_medium(&self) -> RiskLevel {
        match self {
            Risk::Level(level) => *level,
            Risk::Custom { .. } => RiskLevel::Medium,
        }
    }
}

/// Control-plane metadata. Always present, on both success and failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub confidence: f64,
    pub risk: Risk,
    pub explain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl Meta {
    pub fn new(confidence: f64, risk: Risk, explain: impl Into<String>) -> Self {
        Meta {
            confidence,
            risk,
            explain: explain.into(),
            trace_id: None,
            model: None,
            latency_ms: None,
        }
    }
}

/// A single overflow insight, capped per-module by `overflow.max_items`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub text: String,
    pub suggested_mapping: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Extensions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<Insight>,
}

/// The data-plane payload on success. `rationale` is required by the v2.2
/// data schema; everything else is module-specific and carried in `fields`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Data {
    pub rationale: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Extensions>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recoverable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// The closed envelope sum type. `ok` and the mutual exclusion of
/// `data`/`error` are enforced by construction, not by convention.
#[derive(Debug, Clone)]
pub enum Envelope {
    Success {
        meta: Meta,
        data: Data,
    },
    Failure {
        meta: Meta,
        error: EnvelopeError,
        partial_data: Option<Value>,
    },
}

impl Envelope {
    pub fn is_ok(&self) -> bool {
        matches!(self, Envelope::Success { .. })
    }

    pub fn meta(&self) -> &Meta {
        match self {
            Envelope::Success { meta, .. } => meta,
            Envelope::Failure { meta, .. } => meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut Meta {
        match self {
            Envelope::Success { meta, .. } => meta,
            Envelope::Failure { meta, .. } => meta,
        }
    }
}

/// The v2.2 wire representation, used only at the (de)serialization
/// boundary so `Envelope` itself stays exhaustive and closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wire {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub meta: Meta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_data: Option<Value>,
}

impl From<Envelope> for Wire {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Success { meta, data } => Wire {
                ok: true,
                version: Some(ENVELOPE_VERSION.to_string()),
                meta,
                data: Some(data),
                error: None,
                partial_data: None,
            },
            Envelope::Failure {
                meta,
                error,
                partial_data,
            } => Wire {
                ok: false,
                version: Some(ENVELOPE_VERSION.to_string()),
                meta,
                data: None,
                error: Some(error),
                partial_data,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("envelope marked ok=true but has no `data`")]
    MissingData,
    #[error("envelope marked ok=false but has no `error`")]
    MissingError,
}

impl TryFrom<Wire> for Envelope {
    type Error = WireError;

    fn try_from(wire: Wire) -> Result<Self, Self::Error> {
        if wire.ok {
            let data = wire.data.ok_or(WireError::MissingData)?;
            Ok(Envelope::Success {
                meta: wire.meta,
                data,
            })
        } else {
            let error = wire.error.ok_or(WireError::MissingError)?;
            Ok(Envelope::Failure {
                meta: wire.meta,
                error,
                partial_data: wire.partial_data,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_ordering() {
        assert!(RiskLevel::None < RiskLevel::Low);
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
    }

    #[test]
    fn risk_level_parse_is_case_and_whitespace_insensitive() {
        assert_eq!(RiskLevel::parse(" High "), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse("bogus"), None);
    }

    #[test]
    fn wire_roundtrip_success() {
        let envelope = Envelope::Success {
            meta: Meta::new(0.9, Risk::Level(RiskLevel::Low), "looks fine"),
            data: Data {
                rationale: serde_json::json!("because"),
                extensions: None,
                fields: Default::default(),
            },
        };
        let wire: Wire = envelope.into();
        assert!(wire.ok);
        let back: Envelope = wire.try_into().unwrap();
        assert!(back.is_ok());
    }

    #[test]
    fn wire_success_without_data_errors() {
        let wire = Wire {
            ok: true,
            version: None,
            meta: Meta::new(0.5, Risk::Level(RiskLevel::None), ""),
            data: None,
            error: None,
            partial_data: None,
        };
        assert!(matches!(
            Envelope::try_from(wire),
            Err(WireError::MissingData)
        ));
    }
}
