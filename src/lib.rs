//! Structured log fields that accumulate along a call chain.
//!
//! Callers inject fields into a [`Context`]; nested callers inject more, and
//! newer fields override older ones when de-duplication is enabled. Any point
//! in the chain can extract the merged view and hand it to an emitter.

pub mod errors;
pub mod config;
pub mod context;
pub mod emit;
pub mod fields;

pub use serde_json::{json, Value};

pub use config::{
    caller_enabled, deduplication_enabled, set_caller_enabled, set_deduplication_enabled, Config,
};
pub use context::{extract_fields, inject_fields, Context, ContextGuard};
pub use emit::{Emitter, Logger, TracingEmitter};
pub use errors::FieldsError;
pub use fields::{Fields, Iter, MergeMode};
