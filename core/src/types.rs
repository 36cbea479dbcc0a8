//! Native values stored in resource fields.
//!
//! # Design
//! `Value` is a closed variant over the JSON primitives plus every tagged
//! type the service understands. Conversion to and from the tagged wire form
//! lives in `codec`; these types only carry data.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::Resource;

/// A field value held by a `Resource`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Date(DateTime<Utc>),
    Bytes(Binary),
    GeoPoint(GeoPoint),
    File(File),
    /// A reference to another resource. Decoded references start unloaded.
    Pointer(Box<Resource>),
    Relation(Relation),
    Acl(Acl),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Binary> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_geo_point(&self) -> Option<&GeoPoint> {
        match self {
            Value::GeoPoint(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            Value::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Value::Pointer(r) => Some(r),
            _ => None,
        }
    }

    /// Mutable access to a referenced resource, needed to hydrate a stub.
    pub fn as_resource_mut(&mut self) -> Option<&mut Resource> {
        match self {
            Value::Pointer(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_acl(&self) -> Option<&Acl> {
        match self {
            Value::Acl(a) => Some(a),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

/// Non-finite floats have no JSON form and become `Null`.
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<Binary> for Value {
    fn from(b: Binary) -> Self {
        Value::Bytes(b)
    }
}

impl From<GeoPoint> for Value {
    fn from(p: GeoPoint) -> Self {
        Value::GeoPoint(p)
    }
}

impl From<File> for Value {
    fn from(f: File) -> Self {
        Value::File(f)
    }
}

impl From<Acl> for Value {
    fn from(a: Acl) -> Self {
        Value::Acl(a)
    }
}

impl From<Resource> for Value {
    fn from(r: Resource) -> Self {
        Value::Pointer(Box::new(r))
    }
}

impl From<&Resource> for Value {
    fn from(r: &Resource) -> Self {
        Value::Pointer(Box::new(r.clone()))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Literal JSON is taken as data: objects keep their keys as written, tags
/// included, and are emitted unchanged by the encoder.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// An opaque byte payload.
///
/// The base64 text it was decoded from is kept verbatim so a value read from
/// the server is written back byte-for-byte.
#[derive(Clone, PartialEq, Eq)]
pub struct Binary {
    encoded: String,
    decoded: Vec<u8>,
}

impl Binary {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let decoded = bytes.into();
        Self {
            encoded: STANDARD.encode(&decoded),
            decoded,
        }
    }

    /// Wrap base64 text received from the server.
    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        let decoded = STANDARD.decode(encoded)?;
        Ok(Self {
            encoded: encoded.to_string(),
            decoded,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.decoded
    }

    pub fn base64(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Debug for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binary({} bytes)", self.decoded.len())
    }
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// A handle to a file stored by the service. Content is never downloaded by
/// this crate; `url` is where the caller can fetch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub name: String,
    pub url: Option<String>,
}

impl File {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
        }
    }
}

/// Marker for a many-to-many field. The contents are only reachable through
/// `Resource::relation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Class of the related objects, when the server reported it.
    pub class_name: Option<String>,
}

/// Read/write flags for one ACL subject. False flags are omitted on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default, skip_serializing_if = "is_false")]
    pub read: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub write: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Access control list: subject key (user id, `role:<name>`, or `*`) to
/// permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Acl {
    entries: BTreeMap<String, Permission>,
}

impl Acl {
    /// Subject key granting access to everyone.
    pub const PUBLIC: &'static str = "*";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_read(&mut self, subject: &str, allowed: bool) {
        self.entries.entry(subject.to_string()).or_default().read = allowed;
        self.prune(subject);
    }

    pub fn set_write(&mut self, subject: &str, allowed: bool) {
        self.entries.entry(subject.to_string()).or_default().write = allowed;
        self.prune(subject);
    }

    pub fn set_public_read(&mut self, allowed: bool) {
        self.set_read(Self::PUBLIC, allowed);
    }

    pub fn set_public_write(&mut self, allowed: bool) {
        self.set_write(Self::PUBLIC, allowed);
    }

    pub fn set_role_read(&mut self, role: &str, allowed: bool) {
        self.set_read(&format!("role:{role}"), allowed);
    }

    pub fn set_role_write(&mut self, role: &str, allowed: bool) {
        self.set_write(&format!("role:{role}"), allowed);
    }

    pub fn can_read(&self, subject: &str) -> bool {
        self.entries.get(subject).is_some_and(|p| p.read)
    }

    pub fn can_write(&self, subject: &str) -> bool {
        self.entries.get(subject).is_some_and(|p| p.write)
    }

    pub fn permission(&self, subject: &str) -> Option<Permission> {
        self.entries.get(subject).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Permission)> {
        self.entries.iter().map(|(k, p)| (k.as_str(), *p))
    }

    fn prune(&mut self, subject: &str) {
        if self.entries.get(subject) == Some(&Permission::default()) {
            self.entries.remove(subject);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_keeps_original_text() {
        let b = Binary::from_base64("aGVsbG8=").unwrap();
        assert_eq!(b.as_slice(), b"hello");
        assert_eq!(b.base64(), "aGVsbG8=");
        assert_eq!(Binary::new("hello").base64(), "aGVsbG8=");
    }

    #[test]
    fn binary_rejects_bad_base64() {
        assert!(Binary::from_base64("not base64!").is_err());
    }

    #[test]
    fn acl_serializes_only_granted_flags() {
        let mut acl = Acl::new();
        acl.set_public_read(true);
        acl.set_read("user1", true);
        acl.set_write("user1", true);
        acl.set_role_write("admins", true);

        let json = serde_json::to_value(&acl).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "*": {"read": true},
                "user1": {"read": true, "write": true},
                "role:admins": {"write": true},
            })
        );
    }

    #[test]
    fn acl_drops_subjects_with_no_rights() {
        let mut acl = Acl::new();
        acl.set_read("user1", true);
        acl.set_read("user1", false);
        assert_eq!(acl.iter().count(), 0);
        assert!(!acl.can_read("user1"));
    }

    #[test]
    fn non_finite_float_becomes_null() {
        assert!(Value::from(f64::NAN).is_null());
        assert_eq!(Value::from(2.5).as_f64(), Some(2.5));
    }

    #[test]
    fn literal_json_is_kept_structurally() {
        let v = Value::from(serde_json::json!({"a": [1, "x", null]}));
        let Value::Object(map) = v else { panic!("expected object") };
        assert_eq!(
            map["a"],
            Value::Array(vec![Value::from(1i64), Value::from("x"), Value::Null])
        );
    }
}
