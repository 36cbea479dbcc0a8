//! Conversion between native `Value`s and the service's tagged JSON.
//!
//! # Design
//! Tagged wire values are JSON objects carrying a `__type` discriminator.
//! `decode` dispatches on the tag and passes everything else through,
//! recursing into arrays and plain objects so nested tags are resolved too.
//! An unknown tag is an error only for a field's own value; nested inside a
//! composite it is kept as a literal object.
//! `encode` is the inverse; a resource nested anywhere inside another
//! resource's fields is always written as a `Pointer`, never embedded.
//!
//! Decoding performs no I/O. A `Pointer` becomes an unloaded `Resource` stub
//! that only holds the client handle it will hydrate through later.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map};

use crate::client::Client;
use crate::collection::Collection;
use crate::error::{ParseError, Result};
use crate::resource::Resource;
use crate::types::{Acl, Binary, File, GeoPoint, Relation, Value};

pub const TYPE_KEY: &str = "__type";

/// Field whose untagged object value is always an access control list.
pub const ACL_KEY: &str = "ACL";

/// Decode one field value received from the server.
pub fn decode(client: &Client, key: &str, wire: serde_json::Value) -> Result<Value> {
    decode_value(client, key, wire, false)
}

fn decode_value(client: &Client, key: &str, wire: serde_json::Value, nested: bool) -> Result<Value> {
    match wire {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => Ok(Value::Number(n)),
        serde_json::Value::String(s) => Ok(Value::String(s)),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| decode_value(client, key, item, true))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        serde_json::Value::Object(map) => {
            if let Some(tag) = map.get(TYPE_KEY).and_then(|t| t.as_str()) {
                let tag = tag.to_string();
                if nested && !is_known_tag(&tag) {
                    return Ok(Value::from(serde_json::Value::Object(map)));
                }
                return decode_tagged(client, key, &tag, map);
            }
            if key == ACL_KEY {
                let acl: Acl = serde_json::from_value(serde_json::Value::Object(map)).map_err(|e| {
                    ParseError::InvalidWireValue {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                return Ok(Value::Acl(acl));
            }
            let mut fields = BTreeMap::new();
            for (k, v) in map {
                let decoded = decode_value(client, &k, v, true)?;
                fields.insert(k, decoded);
            }
            Ok(Value::Object(fields))
        }
    }
}

const KNOWN_TAGS: [&str; 7] = ["Pointer", "Object", "Date", "Bytes", "GeoPoint", "File", "Relation"];

fn is_known_tag(tag: &str) -> bool {
    KNOWN_TAGS.contains(&tag)
}

fn decode_tagged(client: &Client, key: &str, tag: &str, mut map: Map<String, serde_json::Value>) -> Result<Value> {
    match tag {
        "Pointer" => {
            let class_name = required_str(key, &map, "className")?;
            let object_id = required_str(key, &map, "objectId")?;
            let collection = Collection::from_class_name(&class_name);
            Ok(Value::Pointer(Box::new(Resource::stub(client, collection, object_id))))
        }
        // Pointers expanded through `include` arrive as full objects.
        "Object" => {
            let class_name = required_str(key, &map, "className")?;
            map.remove(TYPE_KEY);
            map.remove("className");
            let collection = Collection::from_class_name(&class_name);
            let resource = Resource::from_wire(client, collection, map)?;
            Ok(Value::Pointer(Box::new(resource)))
        }
        "Date" => {
            let iso = required_str(key, &map, "iso")?;
            let date = parse_date(&iso).map_err(|reason| invalid(key, reason))?;
            Ok(Value::Date(date))
        }
        "Bytes" => {
            let encoded = required_str(key, &map, "base64")?;
            let binary = Binary::from_base64(&encoded).map_err(|e| invalid(key, e.to_string()))?;
            Ok(Value::Bytes(binary))
        }
        "GeoPoint" => {
            let latitude = required_f64(key, &map, "latitude")?;
            let longitude = required_f64(key, &map, "longitude")?;
            Ok(Value::GeoPoint(GeoPoint::new(latitude, longitude)))
        }
        "File" => {
            let name = required_str(key, &map, "name")?;
            let url = map.get("url").and_then(|u| u.as_str()).map(str::to_string);
            Ok(Value::File(File { name, url }))
        }
        "Relation" => {
            let class_name = map.get("className").and_then(|c| c.as_str()).map(str::to_string);
            Ok(Value::Relation(Relation { class_name }))
        }
        other => Err(ParseError::UnknownWireType(other.to_string())),
    }
}

/// Encode a value for the wire.
///
/// With `reference_only`, a resource is written as a `Pointer`; otherwise as
/// its full field map, whose own nested resources are always pointers.
/// Composite values pass the flag down to their elements.
pub fn encode(value: &Value, reference_only: bool) -> Result<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Value::Number(n.clone()),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| encode(item, reference_only))
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Object(fields) => {
            let mut map = Map::new();
            for (k, v) in fields {
                map.insert(k.clone(), encode(v, reference_only)?);
            }
            serde_json::Value::Object(map)
        }
        Value::Date(date) => encode_date(date),
        Value::Bytes(binary) => json!({TYPE_KEY: "Bytes", "base64": binary.base64()}),
        Value::GeoPoint(point) => json!({
            TYPE_KEY: "GeoPoint",
            "latitude": point.latitude,
            "longitude": point.longitude,
        }),
        Value::File(file) => {
            let mut map = Map::new();
            map.insert(TYPE_KEY.into(), "File".into());
            map.insert("name".into(), file.name.clone().into());
            if let Some(url) = &file.url {
                map.insert("url".into(), url.clone().into());
            }
            serde_json::Value::Object(map)
        }
        Value::Pointer(resource) if reference_only => resource.pointer()?,
        Value::Pointer(resource) => serde_json::Value::Object(resource.to_wire()?),
        Value::Relation(relation) => {
            let mut map = Map::new();
            map.insert(TYPE_KEY.into(), "Relation".into());
            if let Some(class_name) = &relation.class_name {
                map.insert("className".into(), class_name.clone().into());
            }
            serde_json::Value::Object(map)
        }
        Value::Acl(acl) => serde_json::to_value(acl).map_err(|e| ParseError::Serialization(e.to_string()))?,
    })
}

pub fn encode_date(date: &DateTime<Utc>) -> serde_json::Value {
    json!({TYPE_KEY: "Date", "iso": format_date(date)})
}

/// Render an instant as `YYYY-MM-DDTHH:MM:SS.mmmZ`, truncating below
/// milliseconds.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an ISO-8601 timestamp into UTC.
pub fn parse_date(iso: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(iso)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| format!("invalid date '{iso}': {e}"))
}

/// Timestamps such as `createdAt` arrive as bare strings, but tolerate the
/// tagged `Date` form as well.
pub(crate) fn decode_timestamp(key: &str, wire: &serde_json::Value) -> Result<DateTime<Utc>> {
    let iso = match wire {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Object(map) => map
            .get("iso")
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid(key, "missing 'iso'".to_string()))?,
        other => return Err(invalid(key, format!("expected a timestamp, got {other}"))),
    };
    parse_date(iso).map_err(|reason| invalid(key, reason))
}

fn required_str(key: &str, map: &Map<String, serde_json::Value>, field: &str) -> Result<String> {
    map.get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| invalid(key, format!("missing '{field}'")))
}

fn required_f64(key: &str, map: &Map<String, serde_json::Value>, field: &str) -> Result<f64> {
    map.get(field)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| invalid(key, format!("missing '{field}'")))
}

fn invalid(key: &str, reason: String) -> ParseError {
    ParseError::InvalidWireValue {
        key: key.to_string(),
        reason,
    }
}
