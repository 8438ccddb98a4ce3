//! Metadata resolution bridging entity shapes to provider column names and
//! declared types.
//!
//! The translator needs a column name and a declared type for every member an
//! expression touches; the materializer needs the declared type of every field
//! it coerces. Both go through [`MetadataProvider`].

use std::collections::HashMap;
use std::fmt;

use crate::query::errors::QueryError;
use crate::query::Result;

/// Declared target type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeclaredType {
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float.
    Float64,
    /// Exact decimal with a fixed number of fractional digits.
    Decimal {
        /// Fractional digits kept after materialization.
        scale: u32,
    },
    /// Character data.
    String {
        /// Whether the column stores ANSI (single-byte) characters.
        ansi: bool,
        /// Maximum length; `None` marks an unbounded (large) string.
        max_length: Option<u32>,
    },
    /// Binary data.
    Bytes,
    /// Date and time without offset.
    DateTime,
    /// Date and time with a UTC offset.
    DateTimeOffset,
}

impl DeclaredType {
    /// Element type name used when echoing captured collections.
    pub fn element_name(self) -> &'static str {
        match self {
            DeclaredType::Bool => "bool",
            DeclaredType::Int32 => "int",
            DeclaredType::Int64 => "long",
            DeclaredType::Float64 => "double",
            DeclaredType::Decimal { .. } => "decimal",
            DeclaredType::String { .. } => "string",
            DeclaredType::Bytes => "byte[]",
            DeclaredType::DateTime => "DateTime",
            DeclaredType::DateTimeOffset => "DateTimeOffset",
        }
    }

    /// Bounded Unicode string.
    pub const fn unicode(max_length: u32) -> Self {
        DeclaredType::String {
            ansi: false,
            max_length: Some(max_length),
        }
    }

    /// Bounded ANSI string.
    pub const fn ansi(max_length: u32) -> Self {
        DeclaredType::String {
            ansi: true,
            max_length: Some(max_length),
        }
    }

    /// Unbounded Unicode string.
    pub const fn text() -> Self {
        DeclaredType::String {
            ansi: false,
            max_length: None,
        }
    }

    /// Returns `true` for integer, float, and decimal types.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DeclaredType::Int32
                | DeclaredType::Int64
                | DeclaredType::Float64
                | DeclaredType::Decimal { .. }
        )
    }

    /// Returns `true` for temporal types.
    pub fn is_temporal(self) -> bool {
        matches!(self, DeclaredType::DateTime | DeclaredType::DateTimeOffset)
    }

    /// Returns `true` for unbounded strings.
    pub fn is_large_string(self) -> bool {
        matches!(
            self,
            DeclaredType::String {
                max_length: None,
                ..
            }
        )
    }

    /// Rank used to pick the wider of two numeric types.
    pub(crate) fn numeric_rank(self) -> Option<u8> {
        match self {
            DeclaredType::Int32 => Some(1),
            DeclaredType::Int64 => Some(2),
            DeclaredType::Decimal { .. } => Some(3),
            DeclaredType::Float64 => Some(4),
            _ => None,
        }
    }

    /// Provider type name used in explicit casts and explain output.
    pub fn type_name(self) -> &'static str {
        match self {
            DeclaredType::Bool => "INTEGER",
            DeclaredType::Int32 | DeclaredType::Int64 => "INTEGER",
            DeclaredType::Float64 => "REAL",
            DeclaredType::Decimal { .. } => "NUMERIC",
            DeclaredType::String { ansi: true, .. } => "VARCHAR",
            DeclaredType::String { ansi: false, .. } => "NVARCHAR",
            DeclaredType::Bytes => "BLOB",
            DeclaredType::DateTime => "DATETIME",
            DeclaredType::DateTimeOffset => "DATETIMEOFFSET",
        }
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclaredType::Bool => f.write_str("bool"),
            DeclaredType::Int32 => f.write_str("int"),
            DeclaredType::Int64 => f.write_str("long"),
            DeclaredType::Float64 => f.write_str("double"),
            DeclaredType::Decimal { scale } => write!(f, "decimal({scale})"),
            DeclaredType::String { ansi, max_length } => {
                let kind = if *ansi { "varchar" } else { "nvarchar" };
                match max_length {
                    Some(len) => write!(f, "{kind}({len})"),
                    None => write!(f, "{kind}(max)"),
                }
            }
            DeclaredType::Bytes => f.write_str("binary"),
            DeclaredType::DateTime => f.write_str("DateTime"),
            DeclaredType::DateTimeOffset => f.write_str("DateTimeOffset"),
        }
    }
}

/// Field of an entity shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    /// Member name used by query expressions.
    pub name: String,
    /// Provider column or document property name.
    pub column: String,
    /// Declared target type.
    pub ty: DeclaredType,
    /// Whether the field accepts nulls.
    pub nullable: bool,
}

impl FieldDef {
    /// Field whose column name equals its member name.
    pub fn new(name: impl Into<String>, ty: DeclaredType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            ty,
            nullable: false,
        }
    }

    /// Overrides the provider column name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Marks the field as nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Column layout of an entity as stored by the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityShape {
    /// Entity name used by query sources.
    pub name: String,
    /// Backing table or container.
    pub table: String,
    /// Fields in provider column order.
    pub fields: Vec<FieldDef>,
}

impl EntityShape {
    /// Creates a shape backed by a table of the same name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: name.clone(),
            name,
            fields: Vec::new(),
        }
    }

    /// Overrides the backing table.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Appends a field.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Looks up a field by member name.
    pub fn find(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Provides entity shapes to the translator and materializer.
pub trait MetadataProvider: Send + Sync {
    /// Resolves an entity name to its shape.
    fn entity(&self, name: &str) -> Result<EntityShape>;
}

/// Simple in-memory metadata provider.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMetadata {
    entities: HashMap<String, EntityShape>,
}

impl InMemoryMetadata {
    /// Creates a new empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity shape.
    pub fn with_entity(mut self, shape: EntityShape) -> Self {
        self.entities.insert(shape.name.clone(), shape);
        self
    }
}

impl MetadataProvider for InMemoryMetadata {
    fn entity(&self, name: &str) -> Result<EntityShape> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::unknown_entity(name))
    }
}
