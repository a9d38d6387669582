//! Row materialization: `sqlx::postgres::PgRow` → `corpus_core::Row`.
//!
//! Grounded on `dashflow-sql-database::SQLDatabase::run_postgres_query`'s
//! per-column `type_info().name()` dispatch to `try_get::<T, _>`, extended
//! with Postgres type names an ad-hoc read-only `SELECT` surface never
//! needed (timestamps, UUIDs, JSON/JSONB, NUMERIC) since this adapter must
//! round-trip arbitrary application schemas.

use chrono::{DateTime, NaiveDateTime, Utc};
use corpus_core::Row;
use serde_json::Value as JsonValue;
use sqlx::{Column, Row as _, TypeInfo};
use uuid::Uuid;

pub fn pg_row_to_map(row: &sqlx::postgres::PgRow) -> Row {
    let mut out = Row::new();
    for (i, col) in row.columns().iter().enumerate() {
        let name = col.name().to_string();
        let type_name = col.type_info().name();

        let value: JsonValue = match type_name {
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => row
                .try_get::<Option<String>, _>(i)
                .ok()
                .flatten()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
            "INT2" | "INT4" | "SERIAL" => row
                .try_get::<Option<i32>, _>(i)
                .ok()
                .flatten()
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or(JsonValue::Null),
            "INT8" | "BIGSERIAL" => row
                .try_get::<Option<i64>, _>(i)
                .ok()
                .flatten()
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or(JsonValue::Null),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(i)
                .ok()
                .flatten()
                .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            "FLOAT8" | "NUMERIC" => row
                .try_get::<Option<f64>, _>(i)
                .ok()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            "BOOL" => row
                .try_get::<Option<bool>, _>(i)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            "UUID" => row
                .try_get::<Option<Uuid>, _>(i)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(i)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.and_utc().to_rfc3339()))
                .unwrap_or(JsonValue::Null),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(i)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_rfc3339()))
                .unwrap_or(JsonValue::Null),
            "JSON" | "JSONB" => row
                .try_get::<Option<JsonValue>, _>(i)
                .ok()
                .flatten()
                .unwrap_or(JsonValue::Null),
            _ => row
                .try_get::<Option<String>, _>(i)
                .ok()
                .flatten()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        };

        out.insert(name, value);
    }
    out
}
