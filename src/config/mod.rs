//! Configuration parsing and types.
//!
//! - `types` - Root config structure (`Config`, proxy and identity sections)
//! - `service` - Service entries (`ServiceConfig`, `ServiceKind`, `PortValue`)
//! - `options` - Runtime `Options` derived from config plus CLI overrides
//! - `parser` - YAML config discovery and parsing
//! - `validation` - Config validation

mod options;
mod parser;
mod service;
mod types;
mod validation;

pub use options::*;
pub use parser::*;
pub use service::*;
pub use types::*;
