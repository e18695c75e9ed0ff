//! Dynamic value model
//!
//! Core data structures for carrying routine parameters and result rows
//! without compile-time knowledge of the routine's signature. Values move
//! through a closed variant set; anything outside it surfaces as a cast
//! error naming both sides instead of being coerced silently.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};

/// A single dynamically-typed SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// Integer value (all integer widths widen to i64)
    Int(i64),

    /// Floating point value
    Float(f64),

    /// Arbitrary-precision numeric value
    Decimal(Decimal),

    /// Text/string value
    Text(String),

    /// Timestamp without time zone
    Timestamp(NaiveDateTime),

    /// Timestamp with time zone, normalized to UTC
    TimestampTz(DateTime<Utc>),

    /// Binary data
    Bytes(Vec<u8>),

    /// JSON value (parsed)
    Json(serde_json::Value),

    /// UUID value
    Uuid(Uuid),
}

impl SqlValue {
    /// Short name used in cast and bind diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::Int(_) => "int",
            SqlValue::Float(_) => "float",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Text(_) => "text",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::TimestampTz(_) => "timestamptz",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Json(_) => "json",
            SqlValue::Uuid(_) => "uuid",
        }
    }

    /// Check if this is a NULL value
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render this value as a JSON document fragment.
    ///
    /// Used when a parameter is forced into JSON transport: decimals become
    /// strings (lossless), timestamps become ISO 8601 strings, binary data
    /// becomes the `\x`-prefixed hex form.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SqlValue::Null => serde_json::Value::Null,
            SqlValue::Bool(v) => serde_json::Value::Bool(*v),
            SqlValue::Int(v) => serde_json::Value::from(*v),
            SqlValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            SqlValue::Decimal(v) => serde_json::Value::String(v.to_string()),
            SqlValue::Text(v) => serde_json::Value::String(v.clone()),
            SqlValue::Timestamp(v) => {
                serde_json::Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            SqlValue::TimestampTz(v) => serde_json::Value::String(v.to_rfc3339()),
            SqlValue::Bytes(v) => {
                let mut hex = String::with_capacity(2 + v.len() * 2);
                hex.push_str("\\x");
                for byte in v {
                    hex.push_str(&format!("{:02x}", byte));
                }
                serde_json::Value::String(hex)
            }
            SqlValue::Json(v) => v.clone(),
            SqlValue::Uuid(v) => serde_json::Value::String(v.to_string()),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::TimestampTz(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlValue::Null,
        }
    }
}

fn bind_error(value: &SqlValue, ty: &Type) -> Box<dyn std::error::Error + Sync + Send> {
    format!(
        "cannot bind {} value as postgres type {}",
        value.type_name(),
        ty
    )
    .into()
}

/// Binding delegates to the typed impls of the declared parameter type, so an
/// `Int` binds correctly against int2/int4/int8/numeric alike. The server
/// knows each routine argument's declared type; `accepts` stays permissive and
/// genuine mismatches are reported from `to_sql` with both type names.
impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => match *ty {
                Type::BOOL => v.to_sql(ty, out),
                _ => Err(bind_error(self, ty)),
            },
            SqlValue::Int(v) => match *ty {
                Type::INT2 => i16::try_from(*v)
                    .map_err(|_| bind_error(self, ty))?
                    .to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)
                    .map_err(|_| bind_error(self, ty))?
                    .to_sql(ty, out),
                Type::INT8 => v.to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*v).to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                _ => Err(bind_error(self, ty)),
            },
            SqlValue::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => v.to_sql(ty, out),
                Type::NUMERIC => Decimal::from_f64(*v)
                    .ok_or_else(|| bind_error(self, ty))?
                    .to_sql(ty, out),
                _ => Err(bind_error(self, ty)),
            },
            SqlValue::Decimal(v) => match *ty {
                Type::NUMERIC => v.to_sql(ty, out),
                Type::FLOAT8 => v
                    .to_f64()
                    .ok_or_else(|| bind_error(self, ty))?
                    .to_sql(ty, out),
                _ => Err(bind_error(self, ty)),
            },
            SqlValue::Text(s) => match *ty {
                Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                    s.as_str().to_sql(ty, out)
                }
                // JSON transport of pre-serialized text: json is the raw
                // bytes, jsonb carries a leading version octet
                Type::JSON => {
                    out.extend_from_slice(s.as_bytes());
                    Ok(IsNull::No)
                }
                Type::JSONB => {
                    out.put_u8(1);
                    out.extend_from_slice(s.as_bytes());
                    Ok(IsNull::No)
                }
                Type::UUID => Uuid::parse_str(s)
                    .map_err(|_| bind_error(self, ty))?
                    .to_sql(ty, out),
                _ => Err(bind_error(self, ty)),
            },
            SqlValue::Timestamp(v) => match *ty {
                Type::TIMESTAMP => v.to_sql(ty, out),
                Type::TIMESTAMPTZ => v.and_utc().to_sql(ty, out),
                _ => Err(bind_error(self, ty)),
            },
            SqlValue::TimestampTz(v) => match *ty {
                Type::TIMESTAMPTZ => v.to_sql(ty, out),
                Type::TIMESTAMP => v.naive_utc().to_sql(ty, out),
                _ => Err(bind_error(self, ty)),
            },
            SqlValue::Bytes(v) => match *ty {
                Type::BYTEA => v.as_slice().to_sql(ty, out),
                _ => Err(bind_error(self, ty)),
            },
            SqlValue::Json(v) => match *ty {
                Type::JSON | Type::JSONB => v.to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => {
                    let rendered = v.to_string();
                    rendered.as_str().to_sql(ty, out)
                }
                _ => Err(bind_error(self, ty)),
            },
            SqlValue::Uuid(v) => match *ty {
                Type::UUID => v.to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => {
                    let rendered = v.to_string();
                    rendered.as_str().to_sql(ty, out)
                }
                _ => Err(bind_error(self, ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// A single result row: column names in result order plus one value per
/// column. Column names are shared across all rows of a result set.
#[derive(Debug, Clone)]
pub struct SqlRow {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl SqlRow {
    /// Build a row from owned column names and values.
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self {
            columns: columns.into(),
            values,
        }
    }

    pub(crate) fn with_shared_columns(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Column names in result order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in column order
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Consume the row, keeping only the values
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a value by column name.
    ///
    /// `None` means the column is absent from the result; a present column
    /// holding SQL NULL comes back as `Some(&SqlValue::Null)`. Lookup tries
    /// an exact match first, then falls back to ASCII case-insensitive.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        if let Some(idx) = self.columns.iter().position(|c| c == name) {
            return self.values.get(idx);
        }
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    /// Look up a value by position
    pub fn get_at(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }
}

fn decode_error(ty: &Type, requested: &'static str) -> GatewayError {
    GatewayError::CastMismatch {
        produced: ty.name().to_string(),
        requested,
    }
}

/// Decode one column of a wire row into the closed value set.
///
/// NULL decodes to `SqlValue::Null` for every type. A column type outside the
/// set is tried as text and otherwise reported as a cast error rather than
/// smuggled through as a placeholder.
pub(crate) fn value_from_pg(row: &tokio_postgres::Row, idx: usize) -> GatewayResult<SqlValue> {
    let ty = row.columns()[idx].type_();
    match *ty {
        Type::BOOL => match row.try_get::<_, Option<bool>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Bool(v)),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "bool")),
        },
        Type::INT2 => match row.try_get::<_, Option<i16>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Int(v as i64)),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "int")),
        },
        Type::INT4 => match row.try_get::<_, Option<i32>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Int(v as i64)),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "int")),
        },
        Type::INT8 => match row.try_get::<_, Option<i64>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Int(v)),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "int")),
        },
        Type::OID => match row.try_get::<_, Option<u32>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Int(v as i64)),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "int")),
        },
        Type::FLOAT4 => match row.try_get::<_, Option<f32>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Float(v as f64)),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "float")),
        },
        Type::FLOAT8 => match row.try_get::<_, Option<f64>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Float(v)),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "float")),
        },
        Type::NUMERIC => match row.try_get::<_, Option<Decimal>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Decimal(v)),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "decimal")),
        },
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            match row.try_get::<_, Option<String>>(idx) {
                Ok(Some(v)) => Ok(SqlValue::Text(v)),
                Ok(None) => Ok(SqlValue::Null),
                Err(_) => Err(decode_error(ty, "text")),
            }
        }
        Type::TIMESTAMP => match row.try_get::<_, Option<NaiveDateTime>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Timestamp(v)),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "timestamp")),
        },
        Type::TIMESTAMPTZ => match row.try_get::<_, Option<DateTime<Utc>>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::TimestampTz(v)),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "timestamptz")),
        },
        Type::DATE => match row.try_get::<_, Option<chrono::NaiveDate>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Text(v.to_string())),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "text")),
        },
        Type::TIME => match row.try_get::<_, Option<chrono::NaiveTime>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Text(v.to_string())),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "text")),
        },
        Type::JSON | Type::JSONB => match row.try_get::<_, Option<serde_json::Value>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Json(v)),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "json")),
        },
        Type::BYTEA => match row.try_get::<_, Option<Vec<u8>>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Bytes(v)),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "bytes")),
        },
        Type::UUID => match row.try_get::<_, Option<Uuid>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Uuid(v)),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "uuid")),
        },
        // Unmapped types get one chance as text before failing loudly
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(Some(v)) => Ok(SqlValue::Text(v)),
            Ok(None) => Ok(SqlValue::Null),
            Err(_) => Err(decode_error(ty, "SqlValue")),
        },
    }
}

/// Decode a full wire row, sharing one column-name allocation per result set.
pub(crate) fn row_from_pg(
    row: &tokio_postgres::Row,
    columns: &Arc<[String]>,
) -> GatewayResult<SqlRow> {
    let mut values = Vec::with_capacity(row.len());
    for idx in 0..row.len() {
        values.push(value_from_pg(row, idx)?);
    }
    Ok(SqlRow::with_shared_columns(Arc::clone(columns), values))
}

/// Conversion from a result row into a caller-requested type.
///
/// Every failure is a cast error naming what the routine produced and what
/// the caller requested, never a silent coercion.
pub trait FromSqlRow: Sized {
    /// Name reported as the requested side of a cast failure.
    const TYPE_NAME: &'static str;

    fn from_row(row: SqlRow) -> GatewayResult<Self>;
}

fn single_value(row: SqlRow, requested: &'static str) -> GatewayResult<SqlValue> {
    if row.len() != 1 {
        return Err(GatewayError::CastMismatch {
            produced: format!("row with {} columns", row.len()),
            requested,
        });
    }
    match row.into_values().into_iter().next() {
        Some(v) => Ok(v),
        None => Err(GatewayError::CastMismatch {
            produced: "row with 0 columns".to_string(),
            requested,
        }),
    }
}

fn scalar_mismatch(value: &SqlValue, requested: &'static str) -> GatewayError {
    GatewayError::CastMismatch {
        produced: value.type_name().to_string(),
        requested,
    }
}

impl FromSqlRow for SqlRow {
    const TYPE_NAME: &'static str = "row";

    fn from_row(row: SqlRow) -> GatewayResult<Self> {
        Ok(row)
    }
}

impl FromSqlRow for String {
    const TYPE_NAME: &'static str = "string";

    fn from_row(row: SqlRow) -> GatewayResult<Self> {
        match single_value(row, Self::TYPE_NAME)? {
            SqlValue::Text(s) => Ok(s),
            SqlValue::Json(v) => Ok(v.to_string()),
            other => Err(scalar_mismatch(&other, Self::TYPE_NAME)),
        }
    }
}

impl FromSqlRow for i64 {
    const TYPE_NAME: &'static str = "i64";

    fn from_row(row: SqlRow) -> GatewayResult<Self> {
        match single_value(row, Self::TYPE_NAME)? {
            SqlValue::Int(v) => Ok(v),
            other => Err(scalar_mismatch(&other, Self::TYPE_NAME)),
        }
    }
}

impl FromSqlRow for i32 {
    const TYPE_NAME: &'static str = "i32";

    fn from_row(row: SqlRow) -> GatewayResult<Self> {
        match single_value(row, Self::TYPE_NAME)? {
            SqlValue::Int(v) => i32::try_from(v).map_err(|_| GatewayError::CastMismatch {
                produced: "int out of i32 range".to_string(),
                requested: Self::TYPE_NAME,
            }),
            other => Err(scalar_mismatch(&other, Self::TYPE_NAME)),
        }
    }
}

impl FromSqlRow for f64 {
    const TYPE_NAME: &'static str = "f64";

    fn from_row(row: SqlRow) -> GatewayResult<Self> {
        match single_value(row, Self::TYPE_NAME)? {
            SqlValue::Float(v) => Ok(v),
            SqlValue::Int(v) => Ok(v as f64),
            other => Err(scalar_mismatch(&other, Self::TYPE_NAME)),
        }
    }
}

impl FromSqlRow for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_row(row: SqlRow) -> GatewayResult<Self> {
        match single_value(row, Self::TYPE_NAME)? {
            SqlValue::Bool(v) => Ok(v),
            other => Err(scalar_mismatch(&other, Self::TYPE_NAME)),
        }
    }
}

impl FromSqlRow for Decimal {
    const TYPE_NAME: &'static str = "decimal";

    fn from_row(row: SqlRow) -> GatewayResult<Self> {
        match single_value(row, Self::TYPE_NAME)? {
            SqlValue::Decimal(v) => Ok(v),
            SqlValue::Int(v) => Ok(Decimal::from(v)),
            other => Err(scalar_mismatch(&other, Self::TYPE_NAME)),
        }
    }
}

impl FromSqlRow for Uuid {
    const TYPE_NAME: &'static str = "uuid";

    fn from_row(row: SqlRow) -> GatewayResult<Self> {
        match single_value(row, Self::TYPE_NAME)? {
            SqlValue::Uuid(v) => Ok(v),
            other => Err(scalar_mismatch(&other, Self::TYPE_NAME)),
        }
    }
}

impl FromSqlRow for NaiveDateTime {
    const TYPE_NAME: &'static str = "timestamp";

    fn from_row(row: SqlRow) -> GatewayResult<Self> {
        match single_value(row, Self::TYPE_NAME)? {
            SqlValue::Timestamp(v) => Ok(v),
            SqlValue::TimestampTz(v) => Ok(v.naive_utc()),
            other => Err(scalar_mismatch(&other, Self::TYPE_NAME)),
        }
    }
}

impl FromSqlRow for DateTime<Utc> {
    const TYPE_NAME: &'static str = "timestamptz";

    fn from_row(row: SqlRow) -> GatewayResult<Self> {
        match single_value(row, Self::TYPE_NAME)? {
            SqlValue::TimestampTz(v) => Ok(v),
            SqlValue::Timestamp(v) => Ok(v.and_utc()),
            other => Err(scalar_mismatch(&other, Self::TYPE_NAME)),
        }
    }
}

impl FromSqlRow for Vec<u8> {
    const TYPE_NAME: &'static str = "bytes";

    fn from_row(row: SqlRow) -> GatewayResult<Self> {
        match single_value(row, Self::TYPE_NAME)? {
            SqlValue::Bytes(v) => Ok(v),
            other => Err(scalar_mismatch(&other, Self::TYPE_NAME)),
        }
    }
}

impl FromSqlRow for serde_json::Value {
    const TYPE_NAME: &'static str = "json";

    fn from_row(row: SqlRow) -> GatewayResult<Self> {
        if row.len() == 1 {
            return match single_value(row, Self::TYPE_NAME)? {
                SqlValue::Json(v) => Ok(v),
                SqlValue::Text(s) => {
                    serde_json::from_str(&s).map_err(|_| GatewayError::CastMismatch {
                        produced: "text (not valid json)".to_string(),
                        requested: Self::TYPE_NAME,
                    })
                }
                SqlValue::Null => Ok(serde_json::Value::Null),
                other => Err(scalar_mismatch(&other, Self::TYPE_NAME)),
            };
        }
        // Multi-column rows become one JSON object keyed by column name
        let mut map = serde_json::Map::with_capacity(row.len());
        for (name, value) in row.columns().iter().zip(row.values()) {
            map.insert(name.clone(), value.to_json());
        }
        Ok(serde_json::Value::Object(map))
    }
}

impl<T: FromSqlRow> FromSqlRow for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;

    fn from_row(row: SqlRow) -> GatewayResult<Self> {
        if row.len() == 1 && row.values()[0].is_null() {
            return Ok(None);
        }
        T::from_row(row).map(Some)
    }
}
