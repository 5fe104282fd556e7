//! Schema boundary
//!
//! Field layouts and the schema hash are produced by the schema compiler.
//! This module only models what the mutation builder needs to validate and
//! serialize a mutation: type ids, field ids, field kinds and constraints.

mod types;

pub use types::{FieldDef, FieldKind, Schema, TypeDef};
