//! Blocking client for the Parse REST API.
//!
//! # Overview
//! Remote objects are `Resource`s: a collection, an id, two timestamps and a
//! map of typed field `Value`s. The `codec` module converts those values to
//! and from the tagged JSON the service speaks. `Query` builds filtered,
//! sorted, paged reads; `Batch` folds many writes into one request.
//!
//! # Design
//! - `Client` holds the connection settings and a `Transport`. It is
//!   constructed once and cloned into every resource and query.
//! - Requests are built and parsed as plain data (`HttpRequest`,
//!   `HttpResponse`); only the transport touches the network, so everything
//!   above it is tested with scripted responses.
//! - References to other objects decode as unloaded stubs that fetch
//!   themselves on first field access.
//!
//! ```no_run
//! use parse_rest::{Client, ClientConfig, Operator};
//!
//! # fn main() -> parse_rest::Result<()> {
//! let client = Client::new(ClientConfig::new("app-id", "rest-key"));
//!
//! let mut score = client.object("GameScore");
//! score.set("score", 1337)?;
//! score.set("playerName", "Sean Plott")?;
//! score.save()?;
//!
//! let top = client
//!     .query("GameScore")
//!     .filter("score", Operator::Gte, 1000)?
//!     .order_by("score", true)
//!     .limit(10);
//! for row in top.fetch()? {
//!     println!("{row}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod client;
mod cloud;
pub mod codec;
pub mod collection;
pub mod config;
pub mod error;
pub mod http;
pub mod push;
pub mod query;
pub mod relation;
pub mod resource;
mod schema;
pub mod types;
pub mod user;

pub use batch::{Batch, BatchOperation};
pub use client::Client;
pub use collection::Collection;
pub use config::{ClientConfig, ConfigError};
pub use error::{ParseError, Result};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
#[cfg(feature = "ureq")]
pub use http::UreqTransport;
pub use push::Push;
pub use query::{Operator, Query};
pub use relation::RelationRef;
pub use resource::Resource;
pub use types::{Acl, Binary, File, GeoPoint, Permission, Relation, Value};
