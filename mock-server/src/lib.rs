//! In-memory imitation of the Parse REST API.
//!
//! # Overview
//! Serves the subset of the service the client library talks to: object CRUD
//! with atomic operations, queries, users and sessions, batch, cloud
//! functions, remote config, push and dropping a class. Everything lives in one `Store` behind
//! a `RwLock`; handlers only translate HTTP to store calls.
//!
//! # Design
//! Objects are kept exactly as they travel on the wire (a JSON map with
//! `objectId`, `createdAt`, `updatedAt` and tagged field values), so queries
//! compare tagged values structurally. Relation membership is tracked
//! separately from the objects, which only hold the `Relation` marker.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub const USER_CLASS: &str = "_User";
pub const APPLICATION_ID_HEADER: &str = "x-parse-application-id";
pub const SESSION_TOKEN_HEADER: &str = "x-parse-session-token";
pub const MASTER_KEY_HEADER: &str = "x-parse-master-key";

/// Largest number of requests accepted in one batch.
pub const MAX_BATCH: usize = 50;
const DEFAULT_LIMIT: usize = 100;
const PROTECTED_FIELDS: &[&str] = &["objectId", "createdAt", "updatedAt", "sessionToken"];

pub type Object = Map<String, Value>;

/// An error reply in the service's `{"code", "error"}` shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i64,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i64, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn object_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, 101, "object not found")
    }

    fn bad_request(code: i64, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    fn unauthorized(code: i64, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"code": self.code, "error": self.message}))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

type RelationKey = (String, String, String);

/// All server state.
#[derive(Debug, Default)]
pub struct Store {
    // Per class, in insertion order.
    classes: HashMap<String, Vec<Object>>,
    // (parent class, parent id, field) -> (class, id) of members.
    relations: HashMap<RelationKey, BTreeSet<(String, String)>>,
    // session token -> user id
    sessions: HashMap<String, String>,
}

pub type Db = Arc<RwLock<Store>>;

impl Store {
    pub fn create(&mut self, class_name: &str, body: Object) -> ApiResult<Object> {
        let object_id = new_object_id();
        let now = timestamp();
        let mut object = Object::new();
        object.insert("objectId".into(), object_id.clone().into());
        object.insert("createdAt".into(), now.clone().into());
        object.insert("updatedAt".into(), now.clone().into());
        apply_ops(&mut self.relations, class_name, &object_id, &mut object, body)?;
        self.classes.entry(class_name.to_string()).or_default().push(object);

        let mut reply = Object::new();
        reply.insert("objectId".into(), object_id.into());
        reply.insert("createdAt".into(), now.into());
        Ok(reply)
    }

    pub fn fetch(&self, class_name: &str, object_id: &str) -> ApiResult<Object> {
        self.find_by_id(class_name, object_id)
            .map(public_view)
            .ok_or_else(ApiError::object_not_found)
    }

    pub fn update(&mut self, class_name: &str, object_id: &str, body: Object) -> ApiResult<Object> {
        let Store { classes, relations, .. } = self;
        let object = classes
            .get_mut(class_name)
            .and_then(|objects| objects.iter_mut().find(|o| id_of(o) == Some(object_id)))
            .ok_or_else(ApiError::object_not_found)?;
        // Ops are applied to a copy so a failing one leaves the object intact.
        let mut updated = object.clone();
        apply_ops(relations, class_name, object_id, &mut updated, body)?;
        let now = timestamp();
        updated.insert("updatedAt".into(), now.clone().into());
        *object = updated;

        let mut reply = Object::new();
        reply.insert("updatedAt".into(), now.into());
        Ok(reply)
    }

    pub fn delete(&mut self, class_name: &str, object_id: &str) -> ApiResult<Object> {
        let objects = self.classes.get_mut(class_name).ok_or_else(ApiError::object_not_found)?;
        let index = objects
            .iter()
            .position(|o| id_of(o) == Some(object_id))
            .ok_or_else(ApiError::object_not_found)?;
        objects.remove(index);
        self.relations
            .retain(|(class, id, _), _| !(class == class_name && id == object_id));
        if class_name == USER_CLASS {
            self.sessions.retain(|_, user_id| user_id != object_id);
        }
        Ok(Object::new())
    }

    /// Remove a class with all of its objects and relations.
    pub fn drop_class(&mut self, class_name: &str) -> Object {
        self.classes.remove(class_name);
        self.relations.retain(|(class, _, _), _| class != class_name);
        for members in self.relations.values_mut() {
            members.retain(|(class, _)| class != class_name);
        }
        Object::new()
    }

    /// Run a query with the service's GET parameters: `where`, `order`,
    /// `limit`, `skip`, `include` and `count`.
    pub fn query(&self, class_name: &str, params: &HashMap<String, String>) -> ApiResult<Value> {
        let constraints = match params.get("where") {
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                _ => return Err(ApiError::bad_request(102, "invalid JSON in where")),
            },
            None => Object::new(),
        };
        let mut rows = self.find(class_name, &constraints)?;

        if let Some(order) = params.get("order") {
            let keys: Vec<(&str, bool)> = order
                .split(',')
                .filter(|k| !k.is_empty())
                .map(|k| match k.strip_prefix('-') {
                    Some(field) => (field, true),
                    None => (k, false),
                })
                .collect();
            rows.sort_by(|a, b| compare_rows(a, b, &keys));
        }

        let count = rows.len();
        let skip = parse_number(params, "skip", 0)?;
        let limit = parse_number(params, "limit", DEFAULT_LIMIT)?;
        let include: Vec<&str> = params
            .get("include")
            .map(|i| i.split(',').filter(|f| !f.is_empty()).collect())
            .unwrap_or_default();

        let results: Vec<Value> = rows
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|row| Value::Object(self.expand(public_view(row), &include)))
            .collect();

        let mut reply = Object::new();
        reply.insert("results".into(), Value::Array(results));
        if params.get("count").map(String::as_str) == Some("1") {
            reply.insert("count".into(), count.into());
        }
        Ok(Value::Object(reply))
    }

    pub fn signup(&mut self, mut body: Object) -> ApiResult<(StatusCode, Object)> {
        if let Some(auth_data) = body.remove("authData") {
            return self.login_with_auth_data(auth_data);
        }
        let username = body
            .get("username")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::bad_request(200, "bad or missing username"))?
            .to_string();
        if body.get("password").and_then(Value::as_str).is_none() {
            return Err(ApiError::bad_request(201, "password is required"));
        }
        let taken = self
            .classes
            .get(USER_CLASS)
            .is_some_and(|users| users.iter().any(|u| u.get("username").and_then(Value::as_str) == Some(username.as_str())));
        if taken {
            return Err(ApiError::bad_request(202, format!("username {username} already taken")));
        }

        let mut reply = self.create(USER_CLASS, body)?;
        let user_id = id_of(&reply).map(str::to_string).unwrap_or_default();
        reply.insert("sessionToken".into(), self.open_session(&user_id).into());
        Ok((StatusCode::CREATED, reply))
    }

    pub fn login(&mut self, username: &str, password: &str) -> ApiResult<Object> {
        let user = self
            .classes
            .get(USER_CLASS)
            .and_then(|users| {
                users.iter().find(|u| {
                    u.get("username").and_then(Value::as_str) == Some(username)
                        && u.get("password").and_then(Value::as_str) == Some(password)
                })
            })
            .map(public_view)
            .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, 101, "invalid login parameters"))?;
        Ok(self.with_session(user))
    }

    fn login_with_auth_data(&mut self, auth_data: Value) -> ApiResult<(StatusCode, Object)> {
        let Value::Object(providers) = &auth_data else {
            return Err(ApiError::bad_request(251, "authData must be an object"));
        };
        let existing = self.classes.get(USER_CLASS).and_then(|users| {
            users.iter().find(|u| {
                u.get("authData").and_then(Value::as_object).is_some_and(|linked| {
                    providers.iter().any(|(name, data)| {
                        data.get("id")
                            .is_some_and(|id| linked.get(name).and_then(|l| l.get("id")) == Some(id))
                    })
                })
            })
        });
        if let Some(user) = existing.map(public_view) {
            return Ok((StatusCode::OK, self.with_session(user)));
        }

        let mut body = Object::new();
        body.insert("username".into(), new_object_id().into());
        body.insert("authData".into(), auth_data);
        let mut reply = self.create(USER_CLASS, body)?;
        let user_id = id_of(&reply).map(str::to_string).unwrap_or_default();
        reply.insert("sessionToken".into(), self.open_session(&user_id).into());
        Ok((StatusCode::CREATED, reply))
    }

    /// The user owning the session token in `headers`.
    pub fn current_user(&self, headers: &HeaderMap) -> ApiResult<Object> {
        let user_id = self.session_user(headers)?;
        self.fetch(USER_CLASS, user_id)
    }

    /// Users may only be changed through their own session.
    pub fn authorize_user(&self, headers: &HeaderMap, object_id: &str) -> ApiResult<()> {
        match self.session_user(headers) {
            Ok(user_id) if user_id == object_id => Ok(()),
            Ok(_) => Err(ApiError::unauthorized(206, "cannot modify user with another session")),
            Err(err) => Err(err),
        }
    }

    pub fn request_password_reset(&self, body: &Object) -> ApiResult<Object> {
        let email = body
            .get("email")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::bad_request(204, "you must provide an email"))?;
        let known = self
            .classes
            .get(USER_CLASS)
            .is_some_and(|users| users.iter().any(|u| u.get("email").and_then(Value::as_str) == Some(email)));
        if !known {
            return Err(ApiError::bad_request(205, format!("no user found with email {email}")));
        }
        Ok(Object::new())
    }

    /// Run every request of a batch and collect one success or error entry
    /// per request.
    pub fn batch(&mut self, requests: Vec<BatchRequest>) -> ApiResult<Vec<Value>> {
        if requests.len() > MAX_BATCH {
            return Err(ApiError::bad_request(
                154,
                format!("too many operations in batch: {} (max {MAX_BATCH})", requests.len()),
            ));
        }
        Ok(requests
            .into_iter()
            .map(|request| match self.dispatch(request) {
                Ok(success) => json!({ "success": success }),
                Err(err) => json!({ "error": {"code": err.code, "error": err.message} }),
            })
            .collect())
    }

    fn dispatch(&mut self, request: BatchRequest) -> ApiResult<Object> {
        let path = request
            .path
            .strip_prefix("/1/")
            .ok_or_else(|| ApiError::bad_request(107, format!("invalid batch path {}", request.path)))?;
        let segments: Vec<&str> = path.split('/').collect();
        let body = request.body.unwrap_or_default();
        match (request.method.as_str(), segments.as_slice()) {
            ("POST", ["classes", class_name]) => self.create(class_name, body),
            ("GET", ["classes", class_name, object_id]) => self.fetch(class_name, object_id),
            ("PUT", ["classes", class_name, object_id]) => self.update(class_name, object_id, body),
            ("DELETE", ["classes", class_name, object_id]) => self.delete(class_name, object_id),
            (method, _) => Err(ApiError::bad_request(
                107,
                format!("unsupported batch request {method} {}", request.path),
            )),
        }
    }

    fn find(&self, class_name: &str, constraints: &Object) -> ApiResult<Vec<&Object>> {
        let mut rows = Vec::new();
        for object in self.classes.get(class_name).into_iter().flatten() {
            if self.matches(class_name, object, constraints)? {
                rows.push(object);
            }
        }
        Ok(rows)
    }

    fn find_by_id(&self, class_name: &str, object_id: &str) -> Option<&Object> {
        self.classes
            .get(class_name)?
            .iter()
            .find(|o| id_of(o) == Some(object_id))
    }

    fn matches(&self, class_name: &str, object: &Object, constraints: &Object) -> ApiResult<bool> {
        for (key, constraint) in constraints {
            if key == "$relatedTo" {
                if !self.related(class_name, object, constraint)? {
                    return Ok(false);
                }
                continue;
            }
            let field = object.get(key);
            let holds = match operator_map(constraint) {
                Some(ops) => {
                    let mut all = true;
                    for (op, operand) in ops {
                        all &= self.check_operator(op, field, operand)?;
                    }
                    all
                }
                None => equals(field, constraint),
            };
            if !holds {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn check_operator(&self, op: &str, field: Option<&Value>, operand: &Value) -> ApiResult<bool> {
        let ordered = |accept: fn(Ordering) -> bool| {
            field
                .and_then(|f| compare_values(f, operand))
                .is_some_and(accept)
        };
        Ok(match op {
            "$lt" => ordered(|o| o == Ordering::Less),
            "$lte" => ordered(|o| o != Ordering::Greater),
            "$gt" => ordered(|o| o == Ordering::Greater),
            "$gte" => ordered(|o| o != Ordering::Less),
            "$ne" => !equals(field, operand),
            "$in" => in_list(field, operand)?,
            "$nin" => !in_list(field, operand)?,
            "$exists" => field.is_some() == operand.as_bool().unwrap_or(true),
            "$all" => {
                let wanted = operand
                    .as_array()
                    .ok_or_else(|| ApiError::bad_request(102, "$all expects an array"))?;
                match field.and_then(Value::as_array) {
                    Some(items) => wanted.iter().all(|w| items.contains(w)),
                    None => false,
                }
            }
            "$select" | "$dontSelect" => {
                let found = self.selected(field, operand)?;
                if op == "$select" {
                    found
                } else {
                    !found
                }
            }
            other => return Err(ApiError::bad_request(102, format!("unsupported operator {other}"))),
        })
    }

    /// Whether `field` is among the `key` values of another query's rows.
    fn selected(&self, field: Option<&Value>, operand: &Value) -> ApiResult<bool> {
        let invalid = || ApiError::bad_request(102, "$select expects {query: {className, where}, key}");
        let query = operand.get("query").ok_or_else(invalid)?;
        let class_name = query.get("className").and_then(Value::as_str).ok_or_else(invalid)?;
        let key = operand.get("key").and_then(Value::as_str).ok_or_else(invalid)?;
        let empty = Object::new();
        let constraints = query.get("where").and_then(Value::as_object).unwrap_or(&empty);
        let Some(field) = field else {
            return Ok(false);
        };
        Ok(self
            .find(class_name, constraints)?
            .iter()
            .any(|row| row.get(key) == Some(field)))
    }

    fn related(&self, class_name: &str, object: &Object, constraint: &Value) -> ApiResult<bool> {
        let invalid = || ApiError::bad_request(102, "$relatedTo expects {object: Pointer, key}");
        let parent = constraint.get("object").ok_or_else(invalid)?;
        let parent_class = parent.get("className").and_then(Value::as_str).ok_or_else(invalid)?;
        let parent_id = parent.get("objectId").and_then(Value::as_str).ok_or_else(invalid)?;
        let key = constraint.get("key").and_then(Value::as_str).ok_or_else(invalid)?;
        let relation = (parent_class.to_string(), parent_id.to_string(), key.to_string());
        let member = (class_name.to_string(), id_of(object).unwrap_or_default().to_string());
        Ok(self
            .relations
            .get(&relation)
            .is_some_and(|members| members.contains(&member)))
    }

    /// Replace pointers in `fields` with the objects they reference.
    fn expand(&self, mut object: Object, fields: &[&str]) -> Object {
        for field in fields {
            let Some(pointer) = object.get(*field) else {
                continue;
            };
            if pointer.get("__type").and_then(Value::as_str) != Some("Pointer") {
                continue;
            }
            let target = pointer
                .get("className")
                .and_then(Value::as_str)
                .zip(pointer.get("objectId").and_then(Value::as_str))
                .and_then(|(class_name, id)| Some((class_name.to_string(), self.find_by_id(class_name, id)?)));
            if let Some((class_name, found)) = target {
                let mut inline = public_view(found);
                inline.insert("__type".into(), "Object".into());
                inline.insert("className".into(), class_name.into());
                object.insert(field.to_string(), Value::Object(inline));
            }
        }
        object
    }

    fn open_session(&mut self, user_id: &str) -> String {
        let token = format!("r:{}", Uuid::new_v4().simple());
        self.sessions.insert(token.clone(), user_id.to_string());
        token
    }

    fn with_session(&mut self, mut user: Object) -> Object {
        let user_id = id_of(&user).unwrap_or_default().to_string();
        user.insert("sessionToken".into(), self.open_session(&user_id).into());
        user
    }

    fn session_user(&self, headers: &HeaderMap) -> ApiResult<&str> {
        let token = headers
            .get(SESSION_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized(209, "missing session token"))?;
        self.sessions
            .get(token)
            .map(String::as_str)
            .ok_or_else(|| ApiError::unauthorized(209, "invalid session token"))
    }
}

/// Apply a create or update body: plain values are stored, `__op` values are
/// executed against the current field.
fn apply_ops(
    relations: &mut HashMap<RelationKey, BTreeSet<(String, String)>>,
    class_name: &str,
    object_id: &str,
    object: &mut Object,
    body: Object,
) -> ApiResult<()> {
    for (key, value) in body {
        if PROTECTED_FIELDS.contains(&key.as_str()) || key.starts_with('_') {
            return Err(ApiError::bad_request(105, format!("invalid field name: {key}")));
        }
        let op = value.get("__op").and_then(Value::as_str).map(str::to_string);
        match op.as_deref() {
            None => {
                object.insert(key, value);
            }
            Some("Delete") => {
                object.remove(&key);
            }
            Some("Increment") => {
                let amount = value
                    .get("amount")
                    .ok_or_else(|| ApiError::bad_request(111, "Increment needs an amount"))?;
                let sum = increment(object.get(&key), amount)
                    .ok_or_else(|| ApiError::bad_request(111, format!("cannot increment non-number field {key}")))?;
                object.insert(key, sum);
            }
            Some(op @ ("AddRelation" | "RemoveRelation")) => {
                let targets = relation_targets(&value)?;
                let Some((target_class, _)) = targets.first() else {
                    continue;
                };
                let target_class = target_class.clone();
                if let Some(existing) = object.get(&key) {
                    if existing.get("className").and_then(Value::as_str) != Some(target_class.as_str()) {
                        return Err(ApiError::bad_request(111, format!("{key} holds another class")));
                    }
                }
                let members = relations
                    .entry((class_name.to_string(), object_id.to_string(), key.clone()))
                    .or_default();
                for target in targets {
                    if op == "AddRelation" {
                        members.insert(target);
                    } else {
                        members.remove(&target);
                    }
                }
                object.insert(key, json!({"__type": "Relation", "className": target_class}));
            }
            Some(other) => return Err(ApiError::bad_request(111, format!("unknown operation {other}"))),
        }
    }
    Ok(())
}

fn relation_targets(op: &Value) -> ApiResult<Vec<(String, String)>> {
    let invalid = || ApiError::bad_request(111, "relation ops need a list of pointers of one class");
    let objects = op.get("objects").and_then(Value::as_array).ok_or_else(invalid)?;
    let targets = objects
        .iter()
        .map(|p| {
            let class_name = p.get("className").and_then(Value::as_str).ok_or_else(invalid)?;
            let object_id = p.get("objectId").and_then(Value::as_str).ok_or_else(invalid)?;
            Ok((class_name.to_string(), object_id.to_string()))
        })
        .collect::<ApiResult<Vec<_>>>()?;
    if targets.windows(2).any(|pair| pair[0].0 != pair[1].0) {
        return Err(invalid());
    }
    Ok(targets)
}

fn increment(current: Option<&Value>, amount: &Value) -> Option<Value> {
    match current {
        None => Some(amount.clone()),
        Some(current) => match (current.as_i64(), amount.as_i64()) {
            (Some(a), Some(b)) => a.checked_add(b).map(Value::from),
            _ => Some(json!(current.as_f64()? + amount.as_f64()?)),
        },
    }
}

/// `{"$gt": 1, ...}` constraints, as opposed to a literal value.
fn operator_map(constraint: &Value) -> Option<&Object> {
    let map = constraint.as_object()?;
    (!map.is_empty() && map.keys().all(|k| k.starts_with('$'))).then_some(map)
}

/// Equality as the service applies it: an array field matches any member.
fn equals(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
        Some(value) => value == expected,
    }
}

fn in_list(field: Option<&Value>, operand: &Value) -> ApiResult<bool> {
    let options = operand
        .as_array()
        .ok_or_else(|| ApiError::bad_request(102, "$in expects an array"))?;
    Ok(options.iter().any(|option| equals(field, option)))
}

/// Order numbers numerically and strings or dates lexically. Mixed kinds
/// do not compare.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (sort_key(a)?, sort_key(b)?) {
        (SortKey::Number(x), SortKey::Number(y)) => x.partial_cmp(&y),
        (SortKey::Text(x), SortKey::Text(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

enum SortKey<'a> {
    Number(f64),
    Text(&'a str),
}

fn sort_key(value: &Value) -> Option<SortKey<'_>> {
    match value {
        Value::Number(n) => n.as_f64().map(SortKey::Number),
        Value::String(s) => Some(SortKey::Text(s)),
        // ISO-8601 UTC timestamps with fixed precision sort lexically.
        Value::Object(map) if map.get("__type").and_then(Value::as_str) == Some("Date") => {
            map.get("iso").and_then(Value::as_str).map(SortKey::Text)
        }
        _ => None,
    }
}

fn compare_rows(a: &Object, b: &Object, keys: &[(&str, bool)]) -> Ordering {
    for (field, descending) in keys {
        let ordering = match (a.get(*field), b.get(*field)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        };
        let ordering = if *descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn parse_number(params: &HashMap<String, String>, key: &str, default: usize) -> ApiResult<usize> {
    match params.get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::bad_request(102, format!("invalid {key}: {raw}"))),
        None => Ok(default),
    }
}

fn public_view(object: &Object) -> Object {
    let mut view = object.clone();
    view.remove("password");
    view
}

fn id_of(object: &Object) -> Option<&str> {
    object.get("objectId").and_then(Value::as_str)
}

fn new_object_id() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_string()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub body: Option<Object>,
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
    pub requests: Vec<BatchRequest>,
}

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Store::default()));
    let api = Router::new()
        .route("/classes/{class_name}", get(query_objects).post(create_object))
        .route(
            "/classes/{class_name}/{object_id}",
            get(get_object).put(update_object).delete(delete_object),
        )
        .route("/users", get(query_users).post(signup))
        .route("/users/me", get(current_user))
        .route("/users/{object_id}", get(get_user).put(update_user).delete(delete_user))
        .route("/login", get(login))
        .route("/requestPasswordReset", post(request_password_reset))
        .route("/batch", post(batch))
        .route("/functions/{name}", post(call_function))
        .route("/config", get(config))
        .route("/push", post(push))
        .route("/schemas/{class_name}", post(drop_schema))
        .layer(middleware::from_fn(require_application_id))
        .with_state(db);
    Router::new().nest("/1", api).layer(TraceLayer::new_for_http())
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn require_application_id(request: Request, next: Next) -> Response {
    if request.headers().get(APPLICATION_ID_HEADER).is_none() {
        return ApiError::unauthorized(0, "unauthorized").into_response();
    }
    next.run(request).await
}

async fn query_objects(
    State(db): State<Db>,
    Path(class_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    db.read().await.query(&class_name, &params).map(Json)
}

async fn create_object(
    State(db): State<Db>,
    Path(class_name): Path<String>,
    Json(body): Json<Object>,
) -> ApiResult<(StatusCode, Json<Object>)> {
    let created = db.write().await.create(&class_name, body)?;
    tracing::debug!(class_name, object_id = ?created.get("objectId"), "created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_object(
    State(db): State<Db>,
    Path((class_name, object_id)): Path<(String, String)>,
) -> ApiResult<Json<Object>> {
    db.read().await.fetch(&class_name, &object_id).map(Json)
}

async fn update_object(
    State(db): State<Db>,
    Path((class_name, object_id)): Path<(String, String)>,
    Json(body): Json<Object>,
) -> ApiResult<Json<Object>> {
    db.write().await.update(&class_name, &object_id, body).map(Json)
}

async fn delete_object(
    State(db): State<Db>,
    Path((class_name, object_id)): Path<(String, String)>,
) -> ApiResult<Json<Object>> {
    db.write().await.delete(&class_name, &object_id).map(Json)
}

async fn query_users(
    State(db): State<Db>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    db.read().await.query(USER_CLASS, &params).map(Json)
}

async fn signup(State(db): State<Db>, Json(body): Json<Object>) -> ApiResult<(StatusCode, Json<Object>)> {
    let (status, reply) = db.write().await.signup(body)?;
    Ok((status, Json(reply)))
}

async fn current_user(State(db): State<Db>, headers: HeaderMap) -> ApiResult<Json<Object>> {
    db.read().await.current_user(&headers).map(Json)
}

async fn get_user(State(db): State<Db>, Path(object_id): Path<String>) -> ApiResult<Json<Object>> {
    db.read().await.fetch(USER_CLASS, &object_id).map(Json)
}

async fn update_user(
    State(db): State<Db>,
    Path(object_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Object>,
) -> ApiResult<Json<Object>> {
    let mut store = db.write().await;
    store.authorize_user(&headers, &object_id)?;
    store.update(USER_CLASS, &object_id, body).map(Json)
}

async fn delete_user(
    State(db): State<Db>,
    Path(object_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Object>> {
    let mut store = db.write().await;
    store.authorize_user(&headers, &object_id)?;
    store.delete(USER_CLASS, &object_id).map(Json)
}

async fn login(
    State(db): State<Db>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Object>> {
    let username = params.get("username").map(String::as_str).unwrap_or_default();
    let password = params.get("password").map(String::as_str).unwrap_or_default();
    db.write().await.login(username, password).map(Json)
}

async fn request_password_reset(State(db): State<Db>, Json(body): Json<Object>) -> ApiResult<Json<Object>> {
    db.read().await.request_password_reset(&body).map(Json)
}

async fn batch(State(db): State<Db>, Json(body): Json<BatchBody>) -> ApiResult<Json<Vec<Value>>> {
    db.write().await.batch(body.requests).map(Json)
}

async fn call_function(Path(name): Path<String>, Json(params): Json<Value>) -> ApiResult<Json<Value>> {
    let result = match name.as_str() {
        "hello" => json!("Hello world!"),
        "echo" => params,
        _ => return Err(ApiError::bad_request(141, format!("Invalid function: \"{name}\""))),
    };
    Ok(Json(json!({ "result": result })))
}

async fn config() -> Json<Value> {
    Json(json!({"params": {"welcomeMessage": "Welcome to the mock server", "winningNumber": 42}}))
}

async fn push(Json(body): Json<Object>) -> ApiResult<Json<Value>> {
    if !body.get("data").is_some_and(Value::is_object) {
        return Err(ApiError::bad_request(115, "missing push data"));
    }
    Ok(Json(json!({"result": true})))
}

// Only the method-override form is served, and only with the master key.
async fn drop_schema(
    State(db): State<Db>,
    Path(class_name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Object>,
) -> ApiResult<Json<Object>> {
    if headers.get(MASTER_KEY_HEADER).is_none() {
        return Err(ApiError::new(StatusCode::FORBIDDEN, 0, "unauthorized: master key is required"));
    }
    if body.get("_method").and_then(Value::as_str) != Some("DELETE") {
        return Err(ApiError::bad_request(107, "unsupported schema operation"));
    }
    tracing::debug!(class_name, "dropping class");
    Ok(Json(db.write().await.drop_class(&class_name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn object(value: Value) -> Object {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn seed_scores(store: &mut Store) -> Vec<String> {
        [("a", 10), ("b", 30), ("c", 20)]
            .iter()
            .map(|(name, score)| {
                let reply = store
                    .create("GameScore", object(json!({"playerName": name, "score": score})))
                    .unwrap();
                id_of(&reply).unwrap().to_string()
            })
            .collect()
    }

    fn names(reply: &Value) -> Vec<&str> {
        reply["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["playerName"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn create_assigns_id_and_timestamps() {
        let mut store = Store::default();
        let reply = store.create("GameScore", object(json!({"score": 1}))).unwrap();
        let id = id_of(&reply).unwrap().to_string();
        assert_eq!(id.len(), 10);
        let stored = store.fetch("GameScore", &id).unwrap();
        assert_eq!(stored["score"], 1);
        assert_eq!(stored["createdAt"], stored["updatedAt"]);
    }

    #[test]
    fn protected_fields_are_rejected() {
        let mut store = Store::default();
        let err = store.create("GameScore", object(json!({"objectId": "x"}))).unwrap_err();
        assert_eq!(err.code, 105);
    }

    #[test]
    fn operators_filter_rows() {
        let mut store = Store::default();
        seed_scores(&mut store);
        let reply = store
            .query("GameScore", &params(&[("where", r#"{"score":{"$gt":15,"$lte":30}}"#), ("order", "score")]))
            .unwrap();
        assert_eq!(names(&reply), vec!["c", "b"]);

        let reply = store
            .query("GameScore", &params(&[("where", r#"{"playerName":{"$in":["a","c"]}}"#), ("order", "-score")]))
            .unwrap();
        assert_eq!(names(&reply), vec!["c", "a"]);

        let reply = store
            .query("GameScore", &params(&[("where", r#"{"score":{"$gt":3,"$lt":3}}"#)]))
            .unwrap();
        assert!(names(&reply).is_empty());
    }

    #[test]
    fn count_ignores_paging() {
        let mut store = Store::default();
        seed_scores(&mut store);
        let reply = store
            .query("GameScore", &params(&[("count", "1"), ("limit", "0"), ("skip", "1")]))
            .unwrap();
        assert_eq!(reply["count"], 3);
        assert!(names(&reply).is_empty());
    }

    #[test]
    fn drop_class_removes_objects_and_memberships() {
        let mut store = Store::default();
        seed_scores(&mut store);
        store.drop_class("GameScore");
        let reply = store.query("GameScore", &params(&[])).unwrap();
        assert!(names(&reply).is_empty());
    }

    #[test]
    fn increment_and_delete_ops() {
        let mut store = Store::default();
        let ids = seed_scores(&mut store);
        store
            .update(
                "GameScore",
                &ids[0],
                object(json!({"score": {"__op": "Increment", "amount": 5}, "playerName": {"__op": "Delete"}})),
            )
            .unwrap();
        let stored = store.fetch("GameScore", &ids[0]).unwrap();
        assert_eq!(stored["score"], 15);
        assert!(!stored.contains_key("playerName"));

        let err = store
            .update("GameScore", &ids[1], object(json!({"playerName": {"__op": "Increment", "amount": 1}})))
            .unwrap_err();
        assert_eq!(err.code, 111);
        assert_eq!(store.fetch("GameScore", &ids[1]).unwrap()["playerName"], "b");
    }

    #[test]
    fn relations_are_queryable() {
        let mut store = Store::default();
        let ids = seed_scores(&mut store);
        let game = store.create("Game", Object::new()).unwrap();
        let game_id = id_of(&game).unwrap().to_string();
        let pointer = |id: &str| json!({"__type": "Pointer", "className": "GameScore", "objectId": id});
        store
            .update(
                "Game",
                &game_id,
                object(json!({"scores": {"__op": "AddRelation", "objects": [pointer(&ids[0]), pointer(&ids[2])]}})),
            )
            .unwrap();
        assert_eq!(
            store.fetch("Game", &game_id).unwrap()["scores"],
            json!({"__type": "Relation", "className": "GameScore"})
        );

        let related = json!({"$relatedTo": {
            "object": {"__type": "Pointer", "className": "Game", "objectId": game_id},
            "key": "scores",
        }});
        let reply = store
            .query("GameScore", &params(&[("where", &related.to_string()), ("order", "score")]))
            .unwrap();
        assert_eq!(names(&reply), vec!["a", "c"]);
    }

    #[test]
    fn include_inlines_pointers() {
        let mut store = Store::default();
        let post = store.create("Post", object(json!({"title": "hello"}))).unwrap();
        let post_id = id_of(&post).unwrap();
        store
            .create(
                "Comment",
                object(json!({"post": {"__type": "Pointer", "className": "Post", "objectId": post_id}})),
            )
            .unwrap();
        let reply = store.query("Comment", &params(&[("include", "post")])).unwrap();
        let inline = &reply["results"][0]["post"];
        assert_eq!(inline["__type"], "Object");
        assert_eq!(inline["className"], "Post");
        assert_eq!(inline["title"], "hello");
    }

    #[test]
    fn batch_reports_each_item() {
        let mut store = Store::default();
        let requests: Vec<BatchRequest> = serde_json::from_value(json!([
            {"method": "POST", "path": "/1/classes/GameScore", "body": {"score": 1}},
            {"method": "DELETE", "path": "/1/classes/GameScore/missing"},
        ]))
        .unwrap();
        let results = store.batch(requests).unwrap();
        assert!(results[0]["success"]["objectId"].is_string());
        assert_eq!(results[1]["error"]["code"], 101);
    }

    #[test]
    fn signup_and_login() {
        let mut store = Store::default();
        let (status, reply) = store
            .signup(object(json!({"username": "cooldude6", "password": "secret"})))
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(reply["sessionToken"].as_str().unwrap().starts_with("r:"));

        let err = store
            .signup(object(json!({"username": "cooldude6", "password": "other"})))
            .unwrap_err();
        assert_eq!(err.code, 202);

        let user = store.login("cooldude6", "secret").unwrap();
        assert!(!user.contains_key("password"));
        assert!(user.contains_key("sessionToken"));
        assert_eq!(store.login("cooldude6", "wrong").unwrap_err().status, StatusCode::NOT_FOUND);
    }
}
