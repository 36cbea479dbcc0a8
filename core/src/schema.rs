//! Class-level administration.

use serde_json::json;

use crate::client::Client;
use crate::error::{ParseError, Result};

impl Client {
    /// Delete `class_name` together with every object in it.
    ///
    /// Sent as a method-override POST to `schemas/<class>` and always
    /// authenticated with the master key, even on a session handle.
    pub fn drop_class(&self, class_name: &str) -> Result<()> {
        if self.config().master_key.is_none() {
            return Err(ParseError::MasterKeyRequired("drop_class"));
        }
        let endpoint = format!("schemas/{}", urlencoding::encode(class_name));
        let body = json!({"_method": "DELETE", "_ClientVersion": "browser"});
        self.without_session().post(&endpoint, &body)?;
        tracing::info!(class_name, "class dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::{MASTER_KEY_HEADER, SESSION_TOKEN_HEADER};
    use crate::config::ClientConfig;
    use crate::http::testing::ScriptedTransport;
    use crate::http::HttpMethod;

    #[test]
    fn drop_posts_method_override_with_master_key() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = Client::with_transport(
            ClientConfig::new("app", "rest").with_master_key("master"),
            transport.clone(),
        )
        .with_session("r:abc");
        transport.respond(200, json!({}));

        client.drop_class("GameScore").unwrap();

        let req = transport.last_request();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.path, "https://api.parse.com/1/schemas/GameScore");
        assert_eq!(req.header(MASTER_KEY_HEADER), Some("master"));
        assert_eq!(req.header(SESSION_TOKEN_HEADER), None);
        assert_eq!(transport.last_body(), json!({"_method": "DELETE", "_ClientVersion": "browser"}));
    }

    #[test]
    fn drop_without_master_key_sends_nothing() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = Client::with_transport(ClientConfig::new("app", "rest"), transport.clone());
        assert!(matches!(client.drop_class("GameScore"), Err(ParseError::MasterKeyRequired(_))));
        assert_eq!(transport.request_count(), 0);
    }
}
