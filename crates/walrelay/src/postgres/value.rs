//! Typed column values
//!
//! Raw tuple bytes carry the textual PostgreSQL representation; the column's
//! declared type OID decides what they mean. Coercion never fails the
//! session: a cell that does not parse is logged and kept as its raw string.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::ser::Serializer;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

// Type OIDs from pg_type.dat.
pub const BOOL_OID: i32 = 16;
pub const INT8_OID: i32 = 20;
pub const INT2_OID: i32 = 21;
pub const INT4_OID: i32 = 23;
pub const TEXT_OID: i32 = 25;
pub const JSON_OID: i32 = 114;
pub const VARCHAR_OID: i32 = 1043;
pub const DATE_OID: i32 = 1082;
pub const TIME_OID: i32 = 1083;
pub const TIMESTAMP_OID: i32 = 1114;
pub const TIMESTAMPTZ_OID: i32 = 1184;
pub const NUMERIC_OID: i32 = 1700;
pub const UUID_OID: i32 = 2950;
pub const JSONB_OID: i32 = 3802;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIMESTAMPTZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%#z";

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Text(String),
    /// `timestamp without time zone`
    Timestamp(NaiveDateTime),
    /// `timestamp with time zone`, normalized to UTC
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Null => serializer.serialize_none(),
            CellValue::Bool(v) => serializer.serialize_bool(*v),
            CellValue::Int(v) => serializer.serialize_i32(*v),
            CellValue::BigInt(v) => serializer.serialize_i64(*v),
            CellValue::Text(v) => serializer.serialize_str(v),
            CellValue::Timestamp(v) => {
                serializer.serialize_str(&v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            CellValue::TimestampTz(v) => serializer.serialize_str(&v.to_rfc3339()),
            CellValue::Uuid(v) => serializer.serialize_str(&v.to_string()),
            CellValue::Json(v) => v.serialize(serializer),
        }
    }
}

impl CellValue {
    /// Decode raw column bytes according to the column's type OID.
    ///
    /// `None` decodes to `Null` regardless of the OID. Parse failures keep
    /// the raw string; unknown OIDs keep the raw string and warn once per
    /// OID.
    pub fn coerce(raw: Option<&[u8]>, type_oid: i32, column: &str) -> CellValue {
        let Some(raw) = raw else {
            return CellValue::Null;
        };
        let text = String::from_utf8_lossy(raw);

        let parsed = match type_oid {
            BOOL_OID => parse_bool(&text).map(CellValue::Bool),
            INT2_OID | INT4_OID => text
                .parse::<i32>()
                .map(CellValue::Int)
                .map_err(|e| e.to_string()),
            INT8_OID | NUMERIC_OID => text
                .parse::<i64>()
                .map(CellValue::BigInt)
                .map_err(|e| e.to_string()),
            TEXT_OID | VARCHAR_OID => Ok(CellValue::Text(text.to_string())),
            TIMESTAMP_OID => NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT)
                .map(CellValue::Timestamp)
                .map_err(|e| e.to_string()),
            TIMESTAMPTZ_OID => DateTime::parse_from_str(&text, TIMESTAMPTZ_FORMAT)
                .map(|dt| CellValue::TimestampTz(dt.with_timezone(&Utc)))
                .map_err(|e| e.to_string()),
            DATE_OID | TIME_OID => Ok(CellValue::Text(text.to_string())),
            UUID_OID => Uuid::parse_str(&text)
                .map(CellValue::Uuid)
                .map_err(|e| e.to_string()),
            JSON_OID | JSONB_OID => serde_json::from_slice(raw)
                .map(CellValue::Json)
                .map_err(|e| e.to_string()),
            other => {
                warn_unknown_oid(other, column);
                Ok(CellValue::Text(text.to_string()))
            }
        };

        match parsed {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    pg_type = type_oid,
                    column_name = column,
                    error = %err,
                    "column data parse error"
                );
                CellValue::Text(text.to_string())
            }
        }
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s {
        "t" | "true" | "TRUE" | "True" | "1" => Ok(true),
        "f" | "false" | "FALSE" | "False" | "0" => Ok(false),
        other => Err(format!("invalid bool {other:?}")),
    }
}

// One warning per unknown OID for the life of the process; every cell of an
// unmapped type would otherwise repeat it.
fn warn_unknown_oid(type_oid: i32, column: &str) {
    static SEEN: OnceLock<Mutex<HashSet<i32>>> = OnceLock::new();
    let seen = SEEN.get_or_init(|| Mutex::new(HashSet::new()));
    let newly_seen = seen
        .lock()
        .map(|mut set| set.insert(type_oid))
        .unwrap_or(false);
    if newly_seen {
        warn!(pg_type = type_oid, column_name = column, "unknown oid type");
    }
}
