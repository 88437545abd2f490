//! Schema-related data models.
//!
//! Descriptors are produced fresh by every introspection call and are never
//! cached.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A table or view returned by `list_tables`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub kind: TableKind,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, kind: TableKind) -> Self {
        Self {
            name: name.into(),
            schema: None,
            kind,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Table,
    View,
}

impl TableKind {
    /// Parse the table type reported by an engine's catalog.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "view" | "v" | "materialized view" | "matview" => Self::View,
            _ => Self::Table,
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::View => write!(f, "view"),
        }
    }
}

/// A column returned by `describe_table`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Type exactly as reported by the engine
    pub data_type: String,
    /// See `db::types::normalize_type_name`
    pub normalized_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// 1-based
    pub ordinal_position: u32,
    pub is_primary_key: bool,
    /// Part of a primary, unique or foreign key
    pub is_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,
}

impl ColumnDescriptor {
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        nullable: bool,
        ordinal_position: u32,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            normalized_type: String::new(),
            nullable,
            default_value: None,
            ordinal_position,
            is_primary_key: false,
            is_key: false,
            max_length: None,
        }
    }

    pub fn with_normalized_type(mut self, normalized: impl Into<String>) -> Self {
        self.normalized_type = normalized.into();
        self
    }

    pub fn with_default(mut self, default_value: Option<String>) -> Self {
        self.default_value = default_value;
        self
    }

    /// Mark as primary key. Primary-key columns are always key columns.
    pub fn with_primary_key(mut self, is_pk: bool) -> Self {
        self.is_primary_key = is_pk;
        self.is_key |= is_pk;
        self
    }

    pub fn with_key(mut self, is_key: bool) -> Self {
        self.is_key = is_key || self.is_primary_key;
        self
    }

    /// Negative lengths (e.g. SQL Server `MAX` = -1) are reported as absent.
    pub fn with_max_length(mut self, max_length: Option<i64>) -> Self {
        self.max_length = max_length.filter(|l| *l >= 0);
        self
    }
}
