//! Sign-up, login and session lookups for the `_User` collection.
//!
//! Users are ordinary `Resource`s of `Collection::User`. Login responses
//! carry a `sessionToken`, which the resource keeps outside its field map and
//! sends as `X-Parse-Session-Token` on every later write.

use serde_json::{json, Map};

use crate::client::Client;
use crate::collection::Collection;
use crate::error::Result;
use crate::http::HttpMethod;
use crate::resource::{into_object, Resource};

/// Create an account and return it logged in.
///
/// `extra` holds additional fields stored on the new user, already in wire
/// form.
pub fn signup(client: &Client, username: &str, password: &str, extra: Map<String, serde_json::Value>) -> Result<Resource> {
    let mut body = extra;
    body.insert("username".into(), username.into());
    body.insert("password".into(), password.into());
    let response = client.post(Collection::User.endpoint().as_str(), &serde_json::Value::Object(body.clone()))?;

    // The create response only echoes bookkeeping; the fields are ours.
    let mut fields = body;
    fields.remove("password");
    fields.extend(into_object(response)?);
    tracing::debug!(username, "signed up");
    Resource::from_wire(client, Collection::User, fields)
}

/// Log in with a username and password.
pub fn login(client: &Client, username: &str, password: &str) -> Result<Resource> {
    let params = [
        ("username".to_string(), username.to_string()),
        ("password".to_string(), password.to_string()),
    ];
    let response = client.get("login", &params)?;
    tracing::debug!(username, "logged in");
    Resource::from_wire(client, Collection::User, into_object(response)?)
}

/// Log in, or sign up, through a third-party provider.
///
/// `auth_data` maps provider name to its credentials, e.g.
/// `{"facebook": {"id": "...", "access_token": "..."}}`.
pub fn login_with_auth_data(client: &Client, auth_data: serde_json::Value) -> Result<Resource> {
    let response = client.post(Collection::User.endpoint().as_str(), &json!({ "authData": auth_data }))?;
    Resource::from_wire(client, Collection::User, into_object(response)?)
}

/// Ask the service to email a password reset link.
pub fn request_password_reset(client: &Client, email: &str) -> Result<()> {
    client.post("requestPasswordReset", &json!({ "email": email }))?;
    Ok(())
}

/// The user owning `session_token`.
pub fn current(client: &Client, session_token: &str) -> Result<Resource> {
    let response = client.request(HttpMethod::Get, "users/me", &[], None, Some(session_token))?;
    let mut user = Resource::from_wire(client, Collection::User, into_object(response)?)?;
    if !user.is_authenticated() {
        user.set_session_token(session_token);
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::SESSION_TOKEN_HEADER;
    use crate::config::ClientConfig;
    use crate::error::ParseError;
    use crate::http::testing::ScriptedTransport;
    use crate::types::Value;

    fn setup() -> (Arc<ScriptedTransport>, Client) {
        let transport = Arc::new(ScriptedTransport::new());
        let client = Client::with_transport(
            ClientConfig::new("app", "rest").with_api_root("http://localhost:1337/1"),
            transport.clone(),
        );
        (transport, client)
    }

    #[test]
    fn signup_returns_a_logged_in_user() {
        let (transport, client) = setup();
        transport.respond(
            201,
            json!({"objectId": "u1", "createdAt": "2011-11-07T20:58:34.448Z", "sessionToken": "r:abc"}),
        );
        let mut extra = Map::new();
        extra.insert("phone".into(), "415-392-0202".into());

        let mut user = signup(&client, "cooldude6", "p_n7!-e8", extra).unwrap();

        let req = transport.last_request();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.path, "http://localhost:1337/1/users");
        assert_eq!(
            transport.last_body(),
            json!({"username": "cooldude6", "password": "p_n7!-e8", "phone": "415-392-0202"})
        );
        assert_eq!(user.object_id(), Some("u1"));
        assert_eq!(user.session_token(), Some("r:abc"));
        assert_eq!(user.get("username").unwrap(), Some(&Value::from("cooldude6")));
        assert!(!user.has("password").unwrap());
    }

    #[test]
    fn login_uses_query_params() {
        let (transport, client) = setup();
        transport.respond(
            200,
            json!({
                "objectId": "u1",
                "username": "cooldude6",
                "sessionToken": "r:abc",
                "createdAt": "2011-11-07T20:58:34.448Z",
                "updatedAt": "2011-11-07T20:58:34.448Z",
            }),
        );
        let user = login(&client, "cooldude6", "p_n7!-e8").unwrap();
        let req = transport.last_request();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.path, "http://localhost:1337/1/login?username=cooldude6&password=p_n7%21-e8");
        assert!(user.is_authenticated());
        assert_eq!(user.peek("sessionToken"), None);
    }

    #[test]
    fn bad_login_is_not_found() {
        let (transport, client) = setup();
        transport.respond(404, json!({"code": 101, "error": "invalid login parameters"}));
        assert!(matches!(login(&client, "x", "y"), Err(ParseError::NotFound(_))));
    }

    #[test]
    fn auth_data_login_posts_provider_credentials() {
        let (transport, client) = setup();
        transport.respond(201, json!({"objectId": "u2", "sessionToken": "r:fb", "createdAt": "2011-11-07T20:58:34.448Z"}));
        let auth = json!({"facebook": {"id": "123", "access_token": "tok"}});
        let user = login_with_auth_data(&client, auth.clone()).unwrap();
        assert_eq!(transport.last_body(), json!({ "authData": auth }));
        assert_eq!(user.session_token(), Some("r:fb"));
    }

    #[test]
    fn password_reset_posts_email() {
        let (transport, client) = setup();
        transport.respond(200, json!({}));
        request_password_reset(&client, "a@example.com").unwrap();
        assert_eq!(transport.last_request().path, "http://localhost:1337/1/requestPasswordReset");
        assert_eq!(transport.last_body(), json!({"email": "a@example.com"}));
    }

    #[test]
    fn current_sends_session_header() {
        let (transport, client) = setup();
        transport.respond(200, json!({"objectId": "u1", "username": "cooldude6"}));
        let user = current(&client, "r:abc").unwrap();
        let req = transport.last_request();
        assert_eq!(req.path, "http://localhost:1337/1/users/me");
        assert_eq!(req.header(SESSION_TOKEN_HEADER), Some("r:abc"));
        assert_eq!(user.session_token(), Some("r:abc"));
        assert_eq!(user.collection(), &Collection::User);
    }
}
