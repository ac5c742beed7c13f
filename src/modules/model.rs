//! The normalized in-memory module record. Every format version the loader
//! understands (v0, v1, v2.0, v2.1, v2.2) is parsed down to this one shape,
//! so nothing outside `modules::loader` ever branches on format version.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::envelope::RiskRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatVersion {
    V0,
    V1,
    V20,
    V21,
    V22,
}

impl FormatVersion {
    pub fn is_legacy(self) -> bool {
        matches!(self, FormatVersion::V0 | FormatVersion::V1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Exec,
    Decision,
    Exploration,
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Decision
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaStrictness {
    High,
    Medium,
    Low,
}

impl Default for SchemaStrictness {
    fn default() -> Self {
        SchemaStrictness::Medium
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Overflow {
    #[serde(default = "default_overflow_enabled")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub recoverable: bool,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_true")]
    pub require_suggested_mapping: bool,
}

fn default_true() -> bool {
    true
}
fn default_overflow_enabled() -> bool {
    true
}
fn default_max_items() -> usize {
    5
}

impl Overflow {
    /// The defaults derived purely from `schema_strictness`, used when a
    /// module declares no `overflow` block of its own.
    pub fn for_strictness(strictness: SchemaStrictness) -> Overflow {
        match strictness {
            SchemaStrictness::High => Overflow {
                enabled: false,
                recoverable: true,
                max_items: 0,
                require_suggested_mapping: true,
            },
            SchemaStrictness::Medium => Overflow {
                enabled: true,
                recoverable: true,
                max_items: 5,
                require_suggested_mapping: true,
            },
            SchemaStrictness::Low => Overflow {
                enabled: true,
                recoverable: true,
                max_items: 20,
                require_suggested_mapping: true,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumStrategy {
    Strict,
    Extensible,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumsConfig {
    pub strategy: EnumStrategy,
    #[serde(default)]
    pub unknown_tag: Option<String>,
}

impl EnumsConfig {
    /// `extensible` for decision/exploration tiers, else `strict`, matching
    /// the manifest's own default derivation rule.
    pub fn for_tier(tier: Tier) -> EnumsConfig {
        let strategy = match tier {
            Tier::Decision | Tier::Exploration => EnumStrategy::Extensible,
            Tier::Exec => EnumStrategy::Strict,
        };
        EnumsConfig {
            strategy,
            unknown_tag: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compat {
    #[serde(default = "default_true")]
    pub accepts_v21_payload: bool,
    #[serde(default = "default_true")]
    pub runtime_auto_wrap: bool,
    #[serde(default = "default_output_alias")]
    pub schema_output_alias: String,
}

fn default_output_alias() -> String {
    "data".to_string()
}

impl Default for Compat {
    fn default() -> Self {
        Compat {
            accepts_v21_payload: true,
            runtime_auto_wrap: true,
            schema_output_alias: default_output_alias(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaConfig {
    #[serde(default)]
    pub risk_rule: RiskRule,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub no_network: bool,
    #[serde(default)]
    pub no_side_effects: bool,
    #[serde(default)]
    pub no_file_write: bool,
    #[serde(default)]
    pub no_inventing_data: bool,
    #[serde(default)]
    pub require_confidence: bool,
    #[serde(default)]
    pub require_rationale: bool,
    #[serde(default)]
    pub require_behavior_equivalence: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policies {
    #[serde(default)]
    pub network: ToolPolicy,
    #[serde(default)]
    pub filesystem: ToolPolicy,
    #[serde(default)]
    pub tools: ToolPolicy,
}

/// The four JSON-Schema documents a module declares, plus shared
/// definitions (notably `$defs.extensions`, used by the overflow payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schemas {
    #[serde(default = "empty_object")]
    pub input: Value,
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default = "empty_object")]
    pub meta: Value,
    #[serde(default = "empty_object")]
    pub error: Value,
    #[serde(default, rename = "$defs")]
    pub defs: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl Default for Schemas {
    fn default() -> Self {
        Schemas {
            input: empty_object(),
            data: empty_object(),
            meta: empty_object(),
            error: empty_object(),
            defs: empty_object(),
        }
    }
}

/// The normalized record every loaded module is flattened into, regardless
/// of which on-disk format version it was parsed from.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub version: String,
    pub format_version: FormatVersion,
    pub responsibility: String,
    pub tier: Tier,
    pub schema_strictness: SchemaStrictness,
    pub excludes: Vec<String>,
    pub prompt: String,
    pub schemas: Schemas,
    pub constraints: Constraints,
    pub policies: Policies,
    pub overflow: Overflow,
    pub enums: EnumsConfig,
    pub compat: Compat,
    pub meta_config: MetaConfig,
    pub path: PathBuf,
}

impl Module {
    pub fn requires_extensions_defs(&self) -> bool {
        self.overflow.enabled
    }
}
