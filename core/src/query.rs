//! Immutable, chainable queries over one collection.
//!
//! # Design
//! Builder state is held in persistent `imbl` collections, so every chained
//! call returns a new `Query` sharing structure with its parent and the parent
//! stays usable as a base for other branches. The only mutable part is the
//! per-instance result cache: the first terminal call on an instance issues
//! the request and later calls on the same instance reuse the rows. Derived
//! queries always start with an empty cache.

use std::cell::OnceCell;
use std::fmt;
use std::str::FromStr;

use imbl::{OrdMap, Vector};
use serde_json::Map;

use crate::client::Client;
use crate::codec;
use crate::collection::Collection;
use crate::error::{ParseError, Result};
use crate::resource::{into_object, Resource};
use crate::types::Value;

/// Top-level key of a relation constraint.
pub const RELATED_TO_KEY: &str = "$relatedTo";

/// Comparison applied by `Query::filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    Ne,
    In,
    NotIn,
    Exists,
    Select,
    DontSelect,
    All,
    RelatedTo,
}

impl Operator {
    const ALL: [Operator; 13] = [
        Operator::Eq,
        Operator::Lt,
        Operator::Lte,
        Operator::Gt,
        Operator::Gte,
        Operator::Ne,
        Operator::In,
        Operator::NotIn,
        Operator::Exists,
        Operator::Select,
        Operator::DontSelect,
        Operator::All,
        Operator::RelatedTo,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Ne => "ne",
            Operator::In => "in",
            Operator::NotIn => "nin",
            Operator::Exists => "exists",
            Operator::Select => "select",
            Operator::DontSelect => "dontSelect",
            Operator::All => "all",
            Operator::RelatedTo => "relatedTo",
        }
    }

    /// Key inside a field's constraint object, e.g. `$gt`.
    pub fn wire_key(&self) -> String {
        format!("${}", self.name())
    }

    /// Split `score__gt` into `("score", Gt)`. A name without a known suffix
    /// is an equality filter.
    pub fn split_expr(expr: &str) -> (&str, Operator) {
        for op in Self::ALL {
            if op == Operator::Eq {
                continue;
            }
            if let Some(field) = expr.strip_suffix(op.name()).and_then(|rest| rest.strip_suffix("__")) {
                if !field.is_empty() {
                    return (field, op);
                }
            }
        }
        (expr, Operator::Eq)
    }
}

impl FromStr for Operator {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "notIn" {
            return Ok(Operator::NotIn);
        }
        Self::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| ParseError::InvalidFilter(format!("unknown operator '{s}'")))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Constraint {
    /// `{field: value}`
    Exact(serde_json::Value),
    /// `{field: {"$op": value, ...}}`
    Operators(OrdMap<String, serde_json::Value>),
}

/// A filter, sort and page over one collection.
pub struct Query {
    client: Client,
    collection: Collection,
    constraints: OrdMap<String, Constraint>,
    order: Option<String>,
    limit: Option<u64>,
    skip: Option<u64>,
    include: Vector<String>,
    cache: OnceCell<Vec<Resource>>,
}

impl Query {
    pub fn new(client: &Client, collection: Collection) -> Self {
        Self {
            client: client.clone(),
            collection,
            constraints: OrdMap::new(),
            order: None,
            limit: None,
            skip: None,
            include: Vector::new(),
            cache: OnceCell::new(),
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Constrain `field` with `op`. Values are encoded with resources as
    /// pointers.
    ///
    /// Several operators on one field merge into one constraint object.
    /// Adding an operator to a field already pinned by equality is an
    /// `InvalidFilter` error; equality replaces any earlier operators.
    pub fn filter(&self, field: &str, op: Operator, value: impl Into<Value>) -> Result<Query> {
        let operand = codec::encode(&value.into(), true)?;
        let constraints = match op {
            Operator::Eq => self.constraints.update(field.to_string(), Constraint::Exact(operand)),
            Operator::RelatedTo => self
                .constraints
                .update(RELATED_TO_KEY.to_string(), Constraint::Exact(operand)),
            _ => {
                let merged = match self.constraints.get(field) {
                    None => OrdMap::unit(op.wire_key(), operand),
                    Some(Constraint::Operators(existing)) => existing.update(op.wire_key(), operand),
                    Some(Constraint::Exact(_)) => {
                        return Err(ParseError::InvalidFilter(format!(
                            "cannot add ${op} on '{field}' after filtering it for a specific value"
                        )))
                    }
                };
                self.constraints.update(field.to_string(), Constraint::Operators(merged))
            }
        };
        Ok(Query {
            constraints,
            ..self.derive()
        })
    }

    /// `filter` with the operator given as a suffix: `score__gte`.
    pub fn filter_expr(&self, expr: &str, value: impl Into<Value>) -> Result<Query> {
        let (field, op) = Operator::split_expr(expr);
        self.filter(field, op, value)
    }

    /// Restrict to objects in `parent`'s relation `key`.
    pub fn related_to(&self, parent: &Resource, key: &str) -> Result<Query> {
        let mut map = Map::new();
        map.insert("object".into(), parent.pointer()?);
        map.insert("key".into(), key.into());
        self.filter(RELATED_TO_KEY, Operator::RelatedTo, serde_json::Value::Object(map))
    }

    pub fn limit(&self, limit: u64) -> Query {
        Query {
            limit: Some(limit),
            ..self.derive()
        }
    }

    pub fn skip(&self, skip: u64) -> Query {
        Query {
            skip: Some(skip),
            ..self.derive()
        }
    }

    /// Sort by one field; a later call replaces the sort key.
    pub fn order_by(&self, field: &str, descending: bool) -> Query {
        let order = if descending {
            format!("-{field}")
        } else {
            field.to_string()
        };
        Query {
            order: Some(order),
            ..self.derive()
        }
    }

    /// Ask the server to inline the objects referenced by `fields`.
    pub fn select_related(&self, fields: &[&str]) -> Query {
        let mut include = self.include.clone();
        for field in fields {
            if !include.contains(&field.to_string()) {
                include.push_back(field.to_string());
            }
        }
        Query {
            include,
            ..self.derive()
        }
    }

    /// The compiled `where` document.
    pub fn where_json(&self) -> serde_json::Value {
        let mut map = Map::new();
        for (field, constraint) in self.constraints.iter() {
            let value = match constraint {
                Constraint::Exact(value) => value.clone(),
                Constraint::Operators(ops) => serde_json::Value::Object(
                    ops.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                ),
            };
            map.insert(field.clone(), value);
        }
        serde_json::Value::Object(map)
    }

    /// GET parameters for this query.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if !self.constraints.is_empty() {
            params.push(("where".to_string(), self.where_json().to_string()));
        }
        if let Some(order) = &self.order {
            params.push(("order".to_string(), order.clone()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(skip) = self.skip {
            params.push(("skip".to_string(), skip.to_string()));
        }
        if !self.include.is_empty() {
            let include: Vec<&str> = self.include.iter().map(String::as_str).collect();
            params.push(("include".to_string(), include.join(",")));
        }
        params
    }

    /// All matching objects. The first call issues the request; later calls
    /// on this instance return the cached rows.
    pub fn fetch(&self) -> Result<&[Resource]> {
        if let Some(rows) = self.cache.get() {
            return Ok(rows.as_slice());
        }
        let body = self.client.get(&self.collection.endpoint(), &self.params())?;
        let rows = self.decode_results(body)?;
        tracing::debug!(class = self.collection.class_name(), rows = rows.len(), "query fetched");
        Ok(self.cache.get_or_init(|| rows).as_slice())
    }

    /// Number of matching objects, counted by the server.
    ///
    /// The server counts the unskipped result set, so with `skip` set the
    /// number is not the number of rows `fetch` would return. An instance
    /// that was already fetched answers from its cache instead.
    pub fn count(&self) -> Result<u64> {
        if let Some(rows) = self.cache.get() {
            return Ok(rows.len() as u64);
        }
        let mut params: Vec<(String, String)> =
            self.params().into_iter().filter(|(k, _)| k != "limit").collect();
        params.push(("count".to_string(), "1".to_string()));
        params.push(("limit".to_string(), "0".to_string()));
        let body = self.client.get(&self.collection.endpoint(), &params)?;
        body.get("count")
            .and_then(|c| c.as_u64())
            .ok_or_else(|| ParseError::Deserialization("count response has no count".into()))
    }

    /// The single matching object.
    pub fn get(&self) -> Result<Resource> {
        match self.fetch()? {
            [] => Err(ParseError::DoesNotExist),
            [only] => Ok(only.clone()),
            rows => Err(ParseError::MultipleResultsReturned(rows.len())),
        }
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(!self.fetch()?.is_empty())
    }

    fn decode_results(&self, body: serde_json::Value) -> Result<Vec<Resource>> {
        let mut body = into_object(body)?;
        let results = match body.remove("results") {
            Some(serde_json::Value::Array(results)) => results,
            _ => return Err(ParseError::Deserialization("query response has no results".into())),
        };
        results
            .into_iter()
            .map(|row| Resource::from_wire(&self.client, self.collection.clone(), into_object(row)?))
            .collect()
    }

    /// Copy of the builder state with an empty cache.
    fn derive(&self) -> Query {
        Query {
            client: self.client.clone(),
            collection: self.collection.clone(),
            constraints: self.constraints.clone(),
            order: self.order.clone(),
            limit: self.limit,
            skip: self.skip,
            include: self.include.clone(),
            cache: OnceCell::new(),
        }
    }
}

impl Clone for Query {
    fn clone(&self) -> Self {
        self.derive()
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("class_name", &self.collection.class_name())
            .field("where", &self.where_json())
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("skip", &self.skip)
            .field("include", &self.include)
            .field("evaluated", &self.cache.get().is_some())
            .finish()
    }
}
