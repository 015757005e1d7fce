//! Dynamic SQL values and ordered field maps.
//!
//! [`SqlValue`] is the typed currency for filters, ids and write payloads;
//! `Null` doubles as the "unset" sentinel. [`FieldMap`] is the
//! schema-described mapping used for create/update payloads, with
//! `from_serialize` playing the role of a schema dump.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{Column, Postgres, QueryBuilder, Row, TypeInfo};
use uuid::Uuid;

use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Append this value to a query, as a bind parameter for concrete
    /// values and a literal NULL otherwise.
    pub(crate) fn push_to(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        match self {
            SqlValue::Null => {
                qb.push("NULL");
            }
            SqlValue::Bool(v) => {
                qb.push_bind(*v);
            }
            SqlValue::Int(v) => {
                qb.push_bind(*v);
            }
            SqlValue::BigInt(v) => {
                qb.push_bind(*v);
            }
            SqlValue::Float(v) => {
                qb.push_bind(*v);
            }
            SqlValue::Text(v) => {
                qb.push_bind(v.clone());
            }
            SqlValue::Uuid(v) => {
                qb.push_bind(*v);
            }
            SqlValue::Timestamp(v) => {
                qb.push_bind(*v);
            }
        }
    }

    /// Decode a column of a fetched row by its database type.
    ///
    /// Used for relation keys and change tracking, where the column type is
    /// only known at runtime.
    pub(crate) fn decode(row: &PgRow, column: &str) -> Result<SqlValue, ServiceError> {
        let ty = row.try_column(column)?.type_info().name().to_string();
        let value = match ty.as_str() {
            "INT2" => row
                .try_get::<Option<i16>, _>(column)?
                .map(|v| SqlValue::Int(v.into())),
            "INT4" => row.try_get::<Option<i32>, _>(column)?.map(SqlValue::Int),
            "INT8" => row.try_get::<Option<i64>, _>(column)?.map(SqlValue::BigInt),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(column)?
                .map(|v| SqlValue::Float(v.into())),
            "FLOAT8" => row.try_get::<Option<f64>, _>(column)?.map(SqlValue::Float),
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => {
                row.try_get::<Option<String>, _>(column)?.map(SqlValue::Text)
            }
            "BOOL" => row.try_get::<Option<bool>, _>(column)?.map(SqlValue::Bool),
            "UUID" => row.try_get::<Option<Uuid>, _>(column)?.map(SqlValue::Uuid),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(column)?
                .map(SqlValue::Timestamp),
            other => {
                return Err(ServiceError::UnsupportedColumn {
                    column: column.to_string(),
                    ty: other.to_string(),
                })
            }
        };
        Ok(value.unwrap_or(SqlValue::Null))
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => Ok(()),
            SqlValue::Bool(v) => write!(f, "{v}"),
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::BigInt(v) => write!(f, "{v}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Text(v) => f.write_str(v),
            SqlValue::Uuid(v) => write!(f, "{v}"),
            SqlValue::Timestamp(v) => f.write_str(&v.to_rfc3339()),
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
        SqlValue::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::BigInt(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
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

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl<V: Into<SqlValue>> From<Option<V>> for SqlValue {
    fn from(v: Option<V>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Ordered field-name to value mapping for write payloads and filters.
///
/// Later inserts of an existing key replace the value in place, so merging
/// overrides over a schema keeps the schema's field order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, SqlValue)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<SqlValue>) {
        let field = field.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field, value)),
        }
    }

    /// Merge `overrides` over this map; override values win.
    pub fn merge(mut self, overrides: FieldMap) -> Self {
        for (field, value) in overrides.entries {
            self.insert(field, value);
        }
        self
    }

    pub fn get(&self, field: &str) -> Option<&SqlValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, SqlValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a field map from any serializable schema, the `model_dump`
    /// analog. Nested arrays and objects are rejected.
    pub fn from_serialize<S: Serialize>(schema: &S) -> Result<Self, ServiceError> {
        let value = serde_json::to_value(schema)?;
        let serde_json::Value::Object(map) = value else {
            return Err(ServiceError::UnsupportedField {
                field: "<root>".to_string(),
            });
        };

        let mut fields = FieldMap::new();
        for (field, value) in map {
            let value = match value {
                serde_json::Value::Null => SqlValue::Null,
                serde_json::Value::Bool(v) => SqlValue::Bool(v),
                serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                    (Some(v), _) => SqlValue::BigInt(v),
                    (None, Some(v)) => SqlValue::Float(v),
                    (None, None) => return Err(ServiceError::UnsupportedField { field }),
                },
                serde_json::Value::String(v) => SqlValue::Text(v),
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    return Err(ServiceError::UnsupportedField { field })
                }
            };
            fields.insert(field, value);
        }
        Ok(fields)
    }
}

impl IntoIterator for FieldMap {
    type Item = (String, SqlValue);
    type IntoIter = std::vec::IntoIter<(String, SqlValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
