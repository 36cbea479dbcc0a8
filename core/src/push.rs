//! Push notifications.

use serde_json::{json, Map};

use crate::client::Client;
use crate::error::Result;
use crate::query::Query;

/// A notification and its audience. Without channels or a query the push
/// goes to every installation.
#[derive(Debug, Clone, PartialEq)]
pub struct Push {
    data: serde_json::Value,
    channels: Vec<String>,
    target: Option<serde_json::Value>,
}

impl Push {
    /// A push with an arbitrary payload (`alert`, `badge`, `sound`, ...).
    pub fn alert(data: serde_json::Value) -> Self {
        Self {
            data,
            channels: Vec::new(),
            target: None,
        }
    }

    /// A push whose payload is a plain alert text.
    pub fn message(text: &str) -> Self {
        Self::alert(json!({ "alert": text }))
    }

    pub fn channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    /// Target the installations matching `query`.
    pub fn to(mut self, query: &Query) -> Self {
        self.target = Some(query.where_json());
        self
    }

    pub fn to_wire(&self) -> serde_json::Value {
        let mut body = Map::new();
        body.insert("data".into(), self.data.clone());
        if !self.channels.is_empty() {
            body.insert("channels".into(), json!(self.channels));
        }
        if let Some(target) = &self.target {
            body.insert("where".into(), target.clone());
        }
        serde_json::Value::Object(body)
    }
}

impl Client {
    pub fn push(&self, push: &Push) -> Result<()> {
        self.post("push", &push.to_wire())?;
        tracing::debug!(channels = ?push.channels, "push sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ClientConfig;
    use crate::http::testing::ScriptedTransport;
    use crate::query::Operator;

    #[test]
    fn message_to_channels() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(200, json!({"result": true}));
        let client = Client::with_transport(ClientConfig::new("app", "rest"), transport.clone());

        client
            .push(&Push::message("The Giants won!").channels(["Giants", "Mets"]))
            .unwrap();

        assert_eq!(transport.last_request().path, "https://api.parse.com/1/push");
        assert_eq!(
            transport.last_body(),
            json!({"data": {"alert": "The Giants won!"}, "channels": ["Giants", "Mets"]})
        );
    }

    #[test]
    fn query_becomes_where() {
        let client = Client::with_transport(ClientConfig::new("app", "rest"), Arc::new(ScriptedTransport::new()));
        let query = client
            .query("_Installation")
            .filter("deviceType", Operator::Eq, "ios")
            .unwrap();
        let push = Push::alert(json!({"alert": "hi", "badge": "Increment"})).to(&query);
        assert_eq!(
            push.to_wire(),
            json!({"data": {"alert": "hi", "badge": "Increment"}, "where": {"deviceType": "ios"}})
        );
    }
}
