//! Compiled schema types
//!
//! The schema compiler hands the write path a flat description of every
//! record type: a numeric type id, numbered fields with their kinds, and a
//! hash identifying the schema version. The write path only reads it.

use serde::{Deserialize, Serialize};

use crate::errors::{WriteError, WriteResult};

/// Field kinds the mutation builder knows how to serialize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// 32-bit unsigned integer
    Uint32,
    /// 64-bit signed integer
    Int,
    /// 64-bit floating point
    Float,
    /// Boolean
    Bool,
    /// UTF-8 string
    String,
    /// Opaque bytes
    Binary,
    /// Single reference to a row of another type
    Reference {
        /// Referenced type name
        target: String,
    },
    /// List of references to rows of another type
    References {
        /// Referenced type name
        target: String,
    },
}

impl FieldKind {
    /// Wire tag written in every field unit
    pub fn tag(&self) -> u8 {
        match self {
            FieldKind::Uint32 => 1,
            FieldKind::Int => 2,
            FieldKind::Float => 3,
            FieldKind::Bool => 4,
            FieldKind::String => 5,
            FieldKind::Binary => 6,
            FieldKind::Reference { .. } => 7,
            FieldKind::References { .. } => 8,
        }
    }

    /// Returns the kind name for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldKind::Uint32 => "uint32",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::String => "string",
            FieldKind::Binary => "binary",
            FieldKind::Reference { .. } => "reference",
            FieldKind::References { .. } => "references",
        }
    }
}

/// One numbered field of a record type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field id written into each field unit
    pub id: u8,
    /// Field name used by mutation calls
    pub name: String,
    /// Field kind
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Whether a create must set the field
    #[serde(default)]
    pub required: bool,
    /// Maximum byte length for strings and binaries
    #[serde(default)]
    pub max_len: Option<usize>,
}

impl FieldDef {
    /// Create an optional field
    pub fn new(id: u8, name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            required: false,
            max_len: None,
        }
    }

    /// Mark the field required on create
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Bound the byte length of a string or binary field
    pub fn max_len(mut self, max: usize) -> Self {
        self.max_len = Some(max);
        self
    }
}

/// A record type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Numeric type id
    pub id: u16,
    /// Type name used by mutation calls
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDef>,
}

impl TypeDef {
    /// Create a type with no fields
    pub fn new(id: u16, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Look up a field by name
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A compiled schema version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Version hash written once per batch header
    pub hash: u64,
    /// Record types
    pub types: Vec<TypeDef>,
}

impl Schema {
    /// Create an empty schema with a hash
    pub fn new(hash: u64) -> Self {
        Self {
            hash,
            types: Vec::new(),
        }
    }

    /// Add a record type
    pub fn with_type(mut self, def: TypeDef) -> Self {
        self.types.push(def);
        self
    }

    /// Parse a compiled schema from JSON
    pub fn from_json(json: &str) -> WriteResult<Self> {
        let schema: Schema = serde_json::from_str(json)
            .map_err(|e| WriteError::InvalidConfig(format!("schema: {}", e)))?;
        schema.check()?;
        Ok(schema)
    }

    /// Look up a type by name
    pub fn type_by_name(&self, name: &str) -> WriteResult<&TypeDef> {
        self.types
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| WriteError::UnknownType(name.to_string()))
    }

    /// Reject duplicate type ids or duplicate field ids within a type
    pub fn check(&self) -> WriteResult<()> {
        let mut type_ids = std::collections::HashSet::new();
        for def in &self.types {
            if !type_ids.insert(def.id) {
                return Err(WriteError::InvalidConfig(format!(
                    "schema: duplicate type id {}",
                    def.id
                )));
            }
            let mut field_ids = std::collections::HashSet::new();
            for field in &def.fields {
                if !field_ids.insert(field.id) {
                    return Err(WriteError::InvalidConfig(format!(
                        "schema: duplicate field id {} in {}",
                        field.id, def.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_from_json() {
        let json = r#"{
            "hash": 42,
            "types": [
                {"id": 1, "name": "User", "fields": [
                    {"id": 0, "name": "name", "kind": "string", "required": true, "max_len": 16}
                ]},
                {"id": 2, "name": "Post", "fields": [
                    {"id": 0, "name": "author", "kind": "reference", "target": "User"}
                ]}
            ]
        }"#;
        let schema = Schema::from_json(json).unwrap();
        assert_eq!(schema.hash, 42);
        let post = schema.type_by_name("Post").unwrap();
        assert_eq!(
            post.field_by_name("author").unwrap().kind,
            FieldKind::Reference { target: "User".into() }
        );
        assert_eq!(schema.type_by_name("User").unwrap().fields[0].max_len, Some(16));
    }

    #[test]
    fn test_unknown_type() {
        let schema = Schema::new(1);
        assert_eq!(
            schema.type_by_name("Nope").unwrap_err(),
            WriteError::UnknownType("Nope".into())
        );
    }

    #[test]
    fn test_duplicate_field_ids_rejected() {
        let schema = Schema::new(1).with_type(
            TypeDef::new(1, "User")
                .field(FieldDef::new(0, "a", FieldKind::Int))
                .field(FieldDef::new(0, "b", FieldKind::Int)),
        );
        assert!(schema.check().is_err());
    }

    #[test]
    fn test_kind_tags_are_distinct() {
        let kinds = [
            FieldKind::Uint32,
            FieldKind::Int,
            FieldKind::Float,
            FieldKind::Bool,
            FieldKind::String,
            FieldKind::Binary,
            FieldKind::Reference { target: String::new() },
            FieldKind::References { target: String::new() },
        ];
        let tags: std::collections::HashSet<u8> = kinds.iter().map(|k| k.tag()).collect();
        assert_eq!(tags.len(), kinds.len());
    }
}
