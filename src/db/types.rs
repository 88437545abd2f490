//! Engine-agnostic type mappings.
//!
//! Row decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Engine-specific decoders handle the actual value extraction
//!
//! [`normalize_type_name`] maps raw catalog type names onto one small
//! vocabulary (see its docs) so `describe_table` output is comparable across
//! engines.

use crate::models::{ColumnMetadata, EngineKind};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Unknown,
}

/// Classify a driver-reported type name into a logical category.
pub fn categorize_type(type_name: &str, engine: EngineKind) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") || lower.contains("money") {
        // SQLite's NUMERIC is affinity, values come back as integer or real
        if engine == EngineKind::Sqlite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" || lower == "bit" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") {
        return TypeCategory::Text;
    }

    // Dates, times, enums and everything else go through the text decoder
    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// Preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal") || name == "money"
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Decode binary data to JSON value.
///
/// If `decode_binary` is true, attempts to decode as UTF-8 text first.
/// Falls back to base64 encoding if not valid UTF-8 or if `decode_binary` is false.
pub fn decode_binary_value(bytes: &[u8], decode_binary: bool) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    if decode_binary {
        match std::str::from_utf8(bytes) {
            Ok(s) => JsonValue::String(s.to_string()),
            Err(_) => JsonValue::String(STANDARD.encode(bytes)),
        }
    } else {
        JsonValue::String(STANDARD.encode(bytes))
    }
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting driver rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self, decode_binary: bool) -> serde_json::Map<String, JsonValue>;
    fn column_metadata(&self) -> Vec<ColumnMetadata>;
}

/// Implements [`RowToJson`] for a sqlx row type given its decoder module.
macro_rules! impl_sqlx_row_to_json {
    ($row:ty, $engine:expr, $decoder:ident) => {
        impl RowToJson for $row {
            fn to_json_map(&self, decode_binary: bool) -> serde_json::Map<String, JsonValue> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let type_name = col.type_info().name();
                        let category = categorize_type(type_name, $engine);
                        let value =
                            $decoder::decode_column(self, idx, type_name, category, decode_binary);
                        (col.name().to_string(), value)
                    })
                    .collect()
            }

            fn column_metadata(&self) -> Vec<ColumnMetadata> {
                self.columns()
                    .iter()
                    .map(|col| ColumnMetadata::new(col.name(), col.type_info().name()))
                    .collect()
            }
        }
    };
}

impl_sqlx_row_to_json!(MySqlRow, EngineKind::Mysql, mysql);
impl_sqlx_row_to_json!(PgRow, EngineKind::Postgresql, postgres);
impl_sqlx_row_to_json!(SqliteRow, EngineKind::Sqlite, sqlite);

pub(crate) use sqlserver::type_name as sqlserver_type_name;

impl RowToJson for tiberius::Row {
    fn to_json_map(&self, decode_binary: bool) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let value = sqlserver::decode_column(self, idx, col.column_type(), decode_binary);
                (col.name().to_string(), value)
            })
            .collect()
    }

    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        self.columns()
            .iter()
            .map(|col| ColumnMetadata::new(col.name(), sqlserver::type_name(col.column_type())))
            .collect()
    }
}

// =============================================================================
// Engine-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx, decode_binary),
            TypeCategory::Json => decode_json(row, idx),
            _ => decode_text(row, idx, type_name, decode_binary),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_binary_col(row: &MySqlRow, idx: usize, decode_binary: bool) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| decode_binary_value(&v, decode_binary))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null)
    }

    fn decode_text(row: &MySqlRow, idx: usize, type_name: &str, decode_binary: bool) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            return JsonValue::String(v);
        }
        // DATETIME, DATE and TIME are binary in the MySQL protocol
        let lower = type_name.to_lowercase();
        if lower.contains("datetime") || lower == "timestamp" {
            if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
                return JsonValue::String(v.to_string());
            }
        }
        if lower == "date" {
            if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
                return JsonValue::String(v.to_string());
            }
        }
        if lower == "time" {
            if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
                return JsonValue::String(v.to_string());
            }
        }
        // Some servers report text columns as VARBINARY
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| decode_binary_value(&v, decode_binary))
            .unwrap_or(JsonValue::Null)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx, decode_binary),
            TypeCategory::Json => decode_json(row, idx),
            _ => decode_text(row, idx, type_name),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_binary_col(row: &PgRow, idx: usize, decode_binary: bool) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| decode_binary_value(&v, decode_binary))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null)
    }

    fn decode_text(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            return JsonValue::String(v);
        }
        match type_name.to_lowercase().as_str() {
            "timestamptz" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_rfc3339())),
            "timestamp" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_string())),
            "date" => row
                .try_get::<Option<chrono::NaiveDate>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_string())),
            "time" => row
                .try_get::<Option<chrono::NaiveTime>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_string())),
            _ => None,
        }
        .unwrap_or(JsonValue::Null)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        _type_name: &str,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx, decode_binary),
            _ => decode_dynamic(row, idx, decode_binary),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_boolean(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &SqliteRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        row.try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map(float_value)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_binary_col(row: &SqliteRow, idx: usize, decode_binary: bool) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| decode_binary_value(&v, decode_binary))
            .unwrap_or(JsonValue::Null)
    }

    /// Expression columns carry no declared type; try each storage class.
    fn decode_dynamic(row: &SqliteRow, idx: usize, decode_binary: bool) -> JsonValue {
        if let Ok(None) = row.try_get_unchecked::<Option<String>, _>(idx) {
            return JsonValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            return JsonValue::String(v);
        }
        decode_binary_col(row, idx, decode_binary)
    }
}

mod sqlserver {
    use super::*;
    use tiberius::ColumnType;

    pub fn type_name(ty: ColumnType) -> String {
        format!("{:?}", ty).to_lowercase()
    }

    pub fn decode_column(
        row: &tiberius::Row,
        idx: usize,
        ty: ColumnType,
        decode_binary: bool,
    ) -> JsonValue {
        match ty {
            ColumnType::Null => JsonValue::Null,
            ColumnType::Bit | ColumnType::Bitn => row
                .try_get::<bool, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            ColumnType::Int1
            | ColumnType::Int2
            | ColumnType::Int4
            | ColumnType::Int8
            | ColumnType::Intn => decode_integer(row, idx),
            ColumnType::Float4 | ColumnType::Float8 | ColumnType::Floatn => decode_float(row, idx),
            ColumnType::Decimaln
            | ColumnType::Numericn
            | ColumnType::Money
            | ColumnType::Money4 => decode_decimal(row, idx),
            ColumnType::Guid => row
                .try_get::<tiberius::Uuid, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null),
            ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => row
                .try_get::<&[u8], _>(idx)
                .ok()
                .flatten()
                .map(|v| decode_binary_value(v, decode_binary))
                .unwrap_or(JsonValue::Null),
            ColumnType::Datetime
            | ColumnType::Datetime4
            | ColumnType::Datetimen
            | ColumnType::Datetime2 => row
                .try_get::<chrono::NaiveDateTime, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null),
            ColumnType::DatetimeOffsetn => row
                .try_get::<chrono::DateTime<chrono::FixedOffset>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_rfc3339()))
                .unwrap_or(JsonValue::Null),
            ColumnType::Daten => row
                .try_get::<chrono::NaiveDate, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null),
            ColumnType::Timen => row
                .try_get::<chrono::NaiveTime, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null),
            _ => row
                .try_get::<&str, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null),
        }
    }

    fn decode_integer(row: &tiberius::Row, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<i64, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<i32, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<i16, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<u8, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_float(row: &tiberius::Row, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<f64, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<f32, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_decimal(row: &tiberius::Row, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<tiberius::numeric::Numeric, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        // MONEY arrives as a float
        if let Ok(Some(v)) = row.try_get::<f64, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        JsonValue::Null
    }
}

// =============================================================================
// Type Normalization
// =============================================================================

/// Normalize a catalog type name for `engine`.
///
/// The result is one of `integer`, `bigint`, `smallint`, `tinyint`, `decimal`,
/// `real`, `double`, `boolean`, `text`, `char`, `binary`, `date`, `time`,
/// `timestamp`, `timestamptz`, `json`, `uuid`, `xml`, or, for anything else,
/// the lowercased base name with any length/precision suffix removed.
///
/// Engine rules that differ from the shared table:
/// - MySQL `tinyint(1)` and `bit(1)` are `boolean`; `float` is `real`.
/// - SQL Server `bit` is `boolean`, `float` is `double`, `money` is `decimal`,
///   `datetimeoffset` is `timestamptz`.
/// - SQLite follows column affinity: names containing `int` are `integer`,
///   `char`/`clob`/`text` are `text`, `blob` or no type is `binary`,
///   `real`/`floa`/`doub` are `double`, everything else is `decimal`.
pub fn normalize_type_name(engine: EngineKind, type_name: &str) -> String {
    let lower = type_name.trim().to_lowercase();

    match engine {
        EngineKind::Mysql if lower.starts_with("tinyint(1)") || lower.starts_with("bit(1)") => {
            return "boolean".to_string();
        }
        EngineKind::Sqlite => return sqlite_affinity(&lower).to_string(),
        _ => {}
    }

    let base = lower
        .split('(')
        .next()
        .unwrap_or(&lower)
        .trim()
        .trim_end_matches(" unsigned")
        .to_string();

    let engine_specific = match (engine, base.as_str()) {
        (EngineKind::Mysql, "float") => Some("real"),
        (EngineKind::Sqlserver, "float") => Some("double"),
        (EngineKind::Sqlserver, "bit") => Some("boolean"),
        (EngineKind::Sqlserver, "datetimeoffset") => Some("timestamptz"),
        (EngineKind::Sqlserver, "money" | "smallmoney") => Some("decimal"),
        _ => None,
    };
    if let Some(name) = engine_specific {
        return name.to_string();
    }

    match base.as_str() {
        "int4" | "integer" | "int" | "mediumint" | "serial" => "integer",
        "int8" | "bigint" | "bigserial" => "bigint",
        "int2" | "smallint" | "smallserial" => "smallint",
        "tinyint" => "tinyint",
        "numeric" | "decimal" | "money" => "decimal",
        "float4" | "real" | "float" => "real",
        "float8" | "double precision" | "double" => "double",
        "bool" | "boolean" | "bit" => "boolean",
        "varchar" | "character varying" | "nvarchar" | "text" | "ntext" | "tinytext"
        | "mediumtext" | "longtext" | "citext" | "string" | "enum" | "set" => "text",
        "char" | "character" | "bpchar" | "nchar" => "char",
        "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary"
        | "image" => "binary",
        "date" => "date",
        "time" | "time without time zone" | "timetz" | "time with time zone" => "time",
        "timestamp" | "timestamp without time zone" | "datetime" | "datetime2"
        | "smalldatetime" => "timestamp",
        "timestamptz" | "timestamp with time zone" => "timestamptz",
        "json" | "jsonb" => "json",
        "uuid" | "uniqueidentifier" => "uuid",
        "xml" => "xml",
        _ => return base,
    }
    .to_string()
}

fn sqlite_affinity(lower: &str) -> &'static str {
    if lower.contains("int") {
        "integer"
    } else if lower.contains("char") || lower.contains("clob") || lower.contains("text") {
        "text"
    } else if lower.is_empty() || lower.contains("blob") {
        "binary"
    } else if lower.contains("real") || lower.contains("floa") || lower.contains("doub") {
        "double"
    } else {
        "decimal"
    }
}
