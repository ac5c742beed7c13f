//! Module loading: format detection across the four on-disk module
//! formats (v0, v1, v2.0/v2.1, v2.2) and normalization into one record
//! shape.

mod error;
mod loader;
mod model;

pub use error::ModuleError;
pub use loader::{detect_format, load_all, load_dir};
pub use model::{
    Compat, Constraints, EnumStrategy, EnumsConfig, FormatVersion, MetaConfig, Module, Overflow,
    Policies, Schemas, SchemaStrictness, Tier, ToolPolicy,
};
