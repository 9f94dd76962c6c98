//! Wire payload validation. Missing or `null` keys become `None`; a key of
//! the wrong type is rejected with its dotted path.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::errors::{Error, Result};
use crate::model::{DomeReadings, StorageReadings};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f %z"];

/// Heartbeat body after validation
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatPayload {
    pub time: DateTime<Utc>,
    pub automatic: bool,
    pub status: Option<String>,
    pub cover_position: Option<f64>,
    pub readings: DomeReadings,
    pub storage: StorageReadings,
}

/// The `meta` part of a sighting upload after validation
#[derive(Debug, Clone, PartialEq)]
pub struct SightingMeta {
    pub timestamp: DateTime<Utc>,
    /// Bytes, bounded by the `BIGINT` column
    pub avi_size: Option<i64>,
}

/// Station timestamps without an offset are taken as UTC
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let value = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(parsed.and_utc());
        }
    }

    Err(Error::MalformedTimestamp(raw.to_string()))
}

/// Only `time` and `auto` are required
pub fn heartbeat_payload(body: &Value) -> Result<HeartbeatPayload> {
    let root = as_object(body, "payload")?;

    let time = required_str(root, "time")?;
    let time = parse_timestamp(time)?;
    let automatic = match root.get("auto") {
        Some(Value::Bool(automatic)) => *automatic,
        None | Some(Value::Null) => return Err(Error::malformed("auto", "missing")),
        Some(_) => return Err(Error::malformed("auto", "expected a boolean")),
    };

    let dome = object_at(root, "dome", "dome")?;
    let status = match dome.and_then(|dome| dome.get("s")) {
        None | Some(Value::Null) => None,
        Some(Value::String(status)) => Some(status.clone()),
        Some(_) => return Err(Error::malformed("dome.s", "expected a string")),
    };

    let climate = nested(dome, "t", "dome.t")?;
    let readings = DomeReadings {
        temperature: number_at(climate, "t_sht", "dome.t.t_sht")?,
        humidity: number_at(climate, "h_sht", "dome.t.h_sht")?,
        lens_temperature: number_at(climate, "t_lens", "dome.t.t_lens")?,
        cpu_temperature: number_at(climate, "t_cpu", "dome.t.t_cpu")?,
    };

    let cover = nested(dome, "z", "dome.z")?;
    let cover_position = number_at(cover, "sp", "dome.z.sp")?;

    let disk = object_at(root, "disk", "disk")?;
    let primary = nested(disk, "prim", "disk.prim")?;
    let permanent = nested(disk, "perm", "disk.perm")?;
    let storage = StorageReadings {
        primary_available: number_at(primary, "a", "disk.prim.a")?,
        primary_total: number_at(primary, "t", "disk.prim.t")?,
        permanent_available: number_at(permanent, "a", "disk.perm.a")?,
        permanent_total: number_at(permanent, "t", "disk.perm.t")?,
    };

    Ok(HeartbeatPayload {
        time,
        automatic,
        status,
        cover_position,
        readings,
        storage,
    })
}

pub fn sighting_meta(meta: &Value) -> Result<SightingMeta> {
    let root = as_object(meta, "meta")?;
    let timestamp = parse_timestamp(required_str(root, "timestamp").map_err(|e| prefix(e, "meta"))?)?;

    let avi_size = match root.get("avi_size") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_u64()
                .and_then(|size| i64::try_from(size).ok())
                .ok_or_else(|| {
                    Error::malformed("meta.avi_size", "expected a non-negative 64-bit signed integer")
                })?,
        ),
    };

    Ok(SightingMeta { timestamp, avi_size })
}

fn as_object<'a>(value: &'a Value, field: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| Error::malformed(field, "expected a JSON object"))
}

fn required_str<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    match object.get(key) {
        Some(Value::String(value)) => Ok(value),
        None | Some(Value::Null) => Err(Error::malformed(key, "missing")),
        Some(_) => Err(Error::malformed(key, "expected a string")),
    }
}

fn object_at<'a>(
    object: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<&'a Map<String, Value>>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(inner)) => Ok(Some(inner)),
        Some(_) => Err(Error::malformed(path, "expected an object")),
    }
}

fn nested<'a>(
    parent: Option<&'a Map<String, Value>>,
    key: &str,
    path: &str,
) -> Result<Option<&'a Map<String, Value>>> {
    match parent {
        Some(parent) => object_at(parent, key, path),
        None => Ok(None),
    }
}

fn number_at(object: Option<&Map<String, Value>>, key: &str, path: &str) -> Result<Option<f64>> {
    match object.and_then(|object| object.get(key)) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| Error::malformed(path, "expected a number")),
    }
}

fn prefix(error: Error, parent: &str) -> Error {
    match error {
        Error::MalformedPayload { field, reason } => Error::MalformedPayload {
            field: format!("{}.{}", parent, field),
            reason,
        },
        other => other,
    }
}
