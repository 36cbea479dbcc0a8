//! Remote objects: identity, timestamps, dynamic fields and persistence.
//!
//! # Design
//! A `Resource` is one generic type parameterized by its `Collection`, with
//! fields kept in an explicit map of name to `Value`. Bookkeeping data
//! (`objectId`, timestamps, session token) lives in dedicated struct fields
//! and never appears in the field map or on the wire as a field.
//!
//! References decoded from the server start as unloaded stubs holding only
//! an id. Every field accessor checks the `loaded` flag first and hydrates
//! the stub with one GET; after that the cached fields are used.
//!
//! Writes are described by a `PendingWrite` so the same request can be sent
//! directly or folded into a batch, with the response applied by
//! `apply_write` either way.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::{json, Map};

use crate::client::Client;
use crate::codec::{self, decode_timestamp};
use crate::collection::Collection;
use crate::error::{ParseError, Result};
use crate::http::HttpMethod;
use crate::relation::RelationRef;
use crate::types::Value;

/// Names that are bookkeeping, never user fields.
pub const RESERVED_FIELDS: &[&str] = &["objectId", "createdAt", "updatedAt", "sessionToken", "className", "__type"];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_FIELDS.contains(&key)
}

/// One object of a remote collection.
#[derive(Clone)]
pub struct Resource {
    client: Client,
    collection: Collection,
    object_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    fields: BTreeMap<String, Value>,
    // Fields removed since the last save, sent as Delete ops on update.
    removed: BTreeSet<String>,
    session_token: Option<String>,
    loaded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteKind {
    Create,
    Update,
    Delete,
}

/// A create, update or delete, rendered but not yet sent.
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub kind: WriteKind,
    pub method: HttpMethod,
    pub endpoint: String,
    pub body: Option<serde_json::Value>,
}

impl Resource {
    /// A new, unsaved object of `class_name`.
    pub fn new(client: &Client, class_name: &str) -> Self {
        Self::of(client, Collection::from_class_name(class_name))
    }

    pub fn of(client: &Client, collection: Collection) -> Self {
        Self {
            client: client.clone(),
            collection,
            object_id: None,
            created_at: None,
            updated_at: None,
            fields: BTreeMap::new(),
            removed: BTreeSet::new(),
            session_token: None,
            loaded: true,
        }
    }

    /// An unloaded reference: only the id is known until first field access.
    pub(crate) fn stub(client: &Client, collection: Collection, object_id: String) -> Self {
        Self {
            object_id: Some(object_id),
            loaded: false,
            ..Self::of(client, collection)
        }
    }

    /// A loaded resource built from a JSON object received from the server.
    pub(crate) fn from_wire(client: &Client, collection: Collection, map: Map<String, serde_json::Value>) -> Result<Self> {
        let mut resource = Self::of(client, collection);
        resource.absorb(map)?;
        Ok(resource)
    }

    /// Fetch one object by id. Fails with `NotFound` when it does not exist.
    pub fn retrieve(client: &Client, collection: Collection, object_id: &str) -> Result<Self> {
        let body = client.get(&collection.object_endpoint(object_id), &[])?;
        Self::from_wire(client, collection, into_object(body)?)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn class_name(&self) -> &str {
        self.collection.class_name()
    }

    pub fn object_id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }

    /// Assign the id of an object that already exists remotely. An id can
    /// only be set once.
    pub fn set_object_id(&mut self, object_id: impl Into<String>) -> Result<()> {
        if self.object_id.is_some() {
            return Err(ParseError::ObjectIdAlreadySet);
        }
        self.object_id = Some(object_id.into());
        Ok(())
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    pub fn set_session_token(&mut self, token: impl Into<String>) {
        self.session_token = Some(token.into());
    }

    pub fn is_authenticated(&self) -> bool {
        self.session_token.is_some()
    }

    /// Hydrate an unloaded reference. A no-op once loaded.
    pub fn ensure_loaded(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        tracing::trace!(class = self.class_name(), object_id = ?self.object_id, "hydrating reference");
        self.refresh()
    }

    /// Re-read every field and timestamp from the server.
    pub fn refresh(&mut self) -> Result<()> {
        let endpoint = self.object_endpoint()?;
        let body = self
            .client
            .request(HttpMethod::Get, &endpoint, &[], None, self.session_token.as_deref())?;
        let map = into_object(body)?;
        self.fields.clear();
        self.removed.clear();
        self.absorb(map)?;
        self.loaded = true;
        Ok(())
    }

    pub fn get(&mut self, key: &str) -> Result<Option<&Value>> {
        self.ensure_loaded()?;
        Ok(self.fields.get(key))
    }

    pub fn get_mut(&mut self, key: &str) -> Result<Option<&mut Value>> {
        self.ensure_loaded()?;
        Ok(self.fields.get_mut(key))
    }

    /// Read a field without hydrating. Always `None` on an unloaded stub.
    pub fn peek(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn has(&mut self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        if is_reserved(key) {
            return Err(ParseError::ReservedField(key.to_string()));
        }
        self.ensure_loaded()?;
        self.removed.remove(key);
        self.fields.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Drop a field locally; a saved object also deletes it remotely on the
    /// next `save`.
    pub fn remove(&mut self, key: &str) -> Result<Option<Value>> {
        self.ensure_loaded()?;
        let previous = self.fields.remove(key);
        if self.object_id.is_some() {
            self.removed.insert(key.to_string());
        }
        Ok(previous)
    }

    pub fn fields(&mut self) -> Result<impl Iterator<Item = (&str, &Value)> + '_> {
        self.ensure_loaded()?;
        Ok(self.fields.iter().map(|(k, v)| (k.as_str(), v)))
    }

    /// Handle to the many-to-many relation stored under `key`.
    pub fn relation(&self, key: &str) -> RelationRef {
        RelationRef::new(self, key)
    }

    /// Wire `Pointer` to this object.
    pub fn pointer(&self) -> Result<serde_json::Value> {
        let object_id = self.require_id()?;
        Ok(json!({
            "__type": "Pointer",
            "className": self.class_name(),
            "objectId": object_id,
        }))
    }

    /// Editable fields encoded for a create or update body. Nested resources
    /// become pointers; relation markers are left out since relations are only
    /// changed through `RelationRef`.
    pub fn to_wire(&self) -> Result<Map<String, serde_json::Value>> {
        let mut map = Map::new();
        for (key, value) in &self.fields {
            if matches!(value, Value::Relation(_)) {
                continue;
            }
            map.insert(key.clone(), codec::encode(value, true)?);
        }
        for key in &self.removed {
            map.insert(key.clone(), json!({"__op": "Delete"}));
        }
        Ok(map)
    }

    /// Create when unsaved, update otherwise.
    pub fn save(&mut self) -> Result<()> {
        let write = self.pending_save()?;
        self.perform(write)
    }

    /// Delete remotely, then reset this instance to an empty unsaved shell. A
    /// later `save` creates a new object.
    pub fn delete(&mut self) -> Result<()> {
        let write = self.pending_delete()?;
        self.perform(write)
    }

    /// Atomically add 1 to a numeric field. See `increment_by`.
    pub fn increment(&mut self, key: &str) -> Result<()> {
        self.increment_by(key, 1)
    }

    /// Atomically add `amount` to a numeric field on the server, right away
    /// and independently of `save`. The local value is bumped by the same
    /// amount without re-fetching. Fractional amounts are allowed.
    pub fn increment_by(&mut self, key: &str, amount: impl Into<Value>) -> Result<()> {
        if is_reserved(key) {
            return Err(ParseError::ReservedField(key.to_string()));
        }
        let amount = match amount.into() {
            Value::Number(n) => n,
            other => {
                return Err(ParseError::InvalidWireValue {
                    key: key.to_string(),
                    reason: format!("increment amount must be a number, got {other:?}"),
                })
            }
        };
        self.check_session("increment")?;
        let endpoint = self.object_endpoint()?;
        self.ensure_loaded()?;

        let bumped = match self.fields.get(key) {
            None => Value::Number(amount.clone()),
            Some(Value::Number(n)) => add_numbers(n, &amount),
            Some(_) => return Err(ParseError::NotNumeric(key.to_string())),
        };

        let mut body = Map::new();
        body.insert(key.to_string(), json!({"__op": "Increment", "amount": amount}));
        let response = self.client.request(
            HttpMethod::Put,
            &endpoint,
            &[],
            Some(&serde_json::Value::Object(body)),
            self.session_token.as_deref(),
        )?;
        if let Some(updated) = response.get("updatedAt") {
            self.updated_at = Some(decode_timestamp("updatedAt", updated)?);
        }
        self.fields.insert(key.to_string(), bumped);
        Ok(())
    }

    pub(crate) fn pending_save(&self) -> Result<PendingWrite> {
        self.check_session("save")?;
        let body = Some(serde_json::Value::Object(self.to_wire()?));
        Ok(match &self.object_id {
            None => PendingWrite {
                kind: WriteKind::Create,
                method: HttpMethod::Post,
                endpoint: self.collection.endpoint(),
                body,
            },
            Some(object_id) => PendingWrite {
                kind: WriteKind::Update,
                method: HttpMethod::Put,
                endpoint: self.collection.object_endpoint(object_id),
                body,
            },
        })
    }

    pub(crate) fn pending_delete(&self) -> Result<PendingWrite> {
        self.check_session("delete")?;
        Ok(PendingWrite {
            kind: WriteKind::Delete,
            method: HttpMethod::Delete,
            endpoint: self.object_endpoint()?,
            body: None,
        })
    }

    /// Adopt the server's answer to a write.
    pub(crate) fn apply_write(&mut self, kind: WriteKind, response: &serde_json::Value) -> Result<()> {
        match kind {
            WriteKind::Create => {
                let object_id = response
                    .get("objectId")
                    .and_then(|id| id.as_str())
                    .ok_or_else(|| ParseError::Deserialization("create response has no objectId".into()))?;
                let created_at = response
                    .get("createdAt")
                    .map(|w| decode_timestamp("createdAt", w))
                    .transpose()?;
                self.object_id = Some(object_id.to_string());
                self.created_at = created_at;
                self.updated_at = created_at;
                if let Some(token) = response.get("sessionToken").and_then(|t| t.as_str()) {
                    self.session_token = Some(token.to_string());
                }
                self.removed.clear();
            }
            WriteKind::Update => {
                if let Some(updated) = response.get("updatedAt") {
                    self.updated_at = Some(decode_timestamp("updatedAt", updated)?);
                }
                self.removed.clear();
            }
            WriteKind::Delete => self.clear(),
        }
        Ok(())
    }

    fn perform(&mut self, write: PendingWrite) -> Result<()> {
        let response = self.client.request(
            write.method,
            &write.endpoint,
            &[],
            write.body.as_ref(),
            self.session_token.as_deref(),
        )?;
        self.apply_write(write.kind, &response)
    }

    fn absorb(&mut self, map: Map<String, serde_json::Value>) -> Result<()> {
        for (key, wire) in map {
            match key.as_str() {
                "objectId" => {
                    if let Some(id) = wire.as_str() {
                        self.object_id = Some(id.to_string());
                    }
                }
                "createdAt" => self.created_at = Some(decode_timestamp(&key, &wire)?),
                "updatedAt" => self.updated_at = Some(decode_timestamp(&key, &wire)?),
                "sessionToken" => {
                    if let Some(token) = wire.as_str() {
                        self.session_token = Some(token.to_string());
                    }
                }
                "className" | "__type" => {}
                _ => {
                    let value = codec::decode(&self.client, &key, wire)?;
                    self.fields.insert(key, value);
                }
            }
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.object_id = None;
        self.created_at = None;
        self.updated_at = None;
        self.fields.clear();
        self.removed.clear();
        self.session_token = None;
        self.loaded = true;
    }

    fn check_session(&self, action: &str) -> Result<()> {
        if self.collection.requires_session() && self.session_token.is_none() {
            return Err(ParseError::LoginRequired(format!(
                "{action} on {} requires a logged-in session",
                self.class_name()
            )));
        }
        Ok(())
    }

    fn require_id(&self) -> Result<&str> {
        self.object_id
            .as_deref()
            .ok_or_else(|| ParseError::Unsaved(self.class_name().to_string()))
    }

    fn object_endpoint(&self) -> Result<String> {
        Ok(self.collection.object_endpoint(self.require_id()?))
    }
}

/// Two resources are the same entity when class and id match. Unsaved
/// resources have no identity and are never equal.
impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.object_id.is_some() && self.collection == other.collection && self.object_id == other.object_id
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}:{}>", self.class_name(), self.object_id.as_deref().unwrap_or("unsaved"))
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("class_name", &self.class_name())
            .field("object_id", &self.object_id)
            .field("loaded", &self.loaded)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// Integer sum when both sides are integers and it fits, float otherwise.
fn add_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Value {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => match x.checked_add(y) {
            Some(sum) => Value::from(sum),
            None => Value::from(x as f64 + y as f64),
        },
        _ => Value::from(a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default()),
    }
}

pub(crate) fn into_object(body: serde_json::Value) -> Result<Map<String, serde_json::Value>> {
    match body {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(ParseError::Deserialization(format!("expected a JSON object, got {other}"))),
    }
}
