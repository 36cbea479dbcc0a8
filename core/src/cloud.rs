//! Cloud functions and remote configuration.

use crate::client::Client;
use crate::error::{ParseError, Result};

impl Client {
    /// Run the server-side function `name` and return its `result`.
    pub fn call_function(&self, name: &str, params: &serde_json::Value) -> Result<serde_json::Value> {
        let mut body = self.post(&format!("functions/{}", urlencoding::encode(name)), params)?;
        body.get_mut("result")
            .map(serde_json::Value::take)
            .ok_or_else(|| ParseError::Deserialization(format!("function '{name}' returned no result")))
    }

    /// The application's config parameters.
    pub fn remote_config(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        match self.get("config", &[])?.get_mut("params").map(serde_json::Value::take) {
            Some(serde_json::Value::Object(params)) => Ok(params),
            Some(other) => Err(ParseError::Deserialization(format!("config params is not an object: {other}"))),
            None => Err(ParseError::Deserialization("config returned no params".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::config::ClientConfig;
    use crate::http::testing::ScriptedTransport;

    fn setup() -> (Arc<ScriptedTransport>, Client) {
        let transport = Arc::new(ScriptedTransport::new());
        let client = Client::with_transport(ClientConfig::new("app", "rest"), transport.clone());
        (transport, client)
    }

    #[test]
    fn function_result_is_unwrapped() {
        let (transport, client) = setup();
        transport.respond(200, json!({"result": {"average": 4.5}}));
        let result = client.call_function("averageStars", &json!({"movie": "The Matrix"})).unwrap();
        assert_eq!(result, json!({"average": 4.5}));
        assert_eq!(transport.last_request().path, "https://api.parse.com/1/functions/averageStars");
        assert_eq!(transport.last_body(), json!({"movie": "The Matrix"}));
    }

    #[test]
    fn function_without_result_is_an_error() {
        let (transport, client) = setup();
        transport.respond(200, json!({}));
        assert!(matches!(
            client.call_function("hello", &json!({})),
            Err(ParseError::Deserialization(_))
        ));
    }

    #[test]
    fn remote_config_returns_params() {
        let (transport, client) = setup();
        transport.respond(200, json!({"params": {"welcomeMessage": "Welcome!", "winningNumber": 42}}));
        let params = client.remote_config().unwrap();
        assert_eq!(params["winningNumber"], 42);

        transport.respond(200, json!({"params": {}}));
        assert!(client.remote_config().unwrap().is_empty());
    }

    #[test]
    fn remote_config_without_params_is_an_error() {
        let (transport, client) = setup();
        transport.respond(200, json!({}));
        assert!(matches!(client.remote_config(), Err(ParseError::Deserialization(_))));

        transport.respond(200, json!({"params": [1, 2]}));
        assert!(matches!(client.remote_config(), Err(ParseError::Deserialization(_))));
    }

    #[test]
    fn function_name_is_one_path_segment() {
        let (transport, client) = setup();
        transport.respond(200, json!({"result": null}));
        client.call_function("stats/daily?x", &json!({})).unwrap();
        assert_eq!(
            transport.last_request().path,
            "https://api.parse.com/1/functions/stats%2Fdaily%3Fx"
        );
    }
}
