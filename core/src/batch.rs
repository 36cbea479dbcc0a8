//! Several writes in one round trip.
//!
//! # Design
//! Each resource renders its write as a `PendingWrite`, exactly as a direct
//! `save` or `delete` would, and the writes are posted together to `batch`.
//! The response is a list with one `{"success": ...}` or `{"error": ...}`
//! entry per request, in order. Every successful entry is applied to its
//! resource; the first entry that failed, remotely or while being applied,
//! is then reported as `ParseError::Batch`.

use serde::Serialize;
use serde_json::json;

use crate::client::Client;
use crate::error::{ParseError, Result};
use crate::http::HttpMethod;
use crate::resource::{PendingWrite, Resource};

/// One request inside a batch body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOperation {
    pub method: &'static str,
    /// Host-relative path, e.g. `/1/classes/GameScore`.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Sends creates, updates and deletes for many resources at once.
#[derive(Debug, Clone)]
pub struct Batch {
    client: Client,
}

impl Batch {
    pub fn new(client: &Client) -> Self {
        Self { client: client.clone() }
    }

    /// Create or update every resource in one request.
    pub fn save(&self, resources: &mut [Resource]) -> Result<()> {
        let writes = resources
            .iter()
            .map(|r| {
                check_batchable(r)?;
                r.pending_save()
            })
            .collect::<Result<Vec<_>>>()?;
        self.run(resources, writes)
    }

    /// Delete every resource in one request.
    pub fn delete(&self, resources: &mut [Resource]) -> Result<()> {
        let writes = resources
            .iter()
            .map(|r| {
                check_batchable(r)?;
                r.pending_delete()
            })
            .collect::<Result<Vec<_>>>()?;
        self.run(resources, writes)
    }

    /// The batch items for `writes`.
    pub(crate) fn operations(&self, writes: &[PendingWrite]) -> Result<Vec<BatchOperation>> {
        writes
            .iter()
            .map(|w| {
                Ok(BatchOperation {
                    method: w.method.as_str(),
                    path: self.client.batch_path(&w.endpoint)?,
                    body: w.body.clone(),
                })
            })
            .collect()
    }

    /// Post `operations` as one batch. The outer result is the HTTP call;
    /// each inner result is one item's `success` payload or its error.
    pub fn execute(&self, operations: &[BatchOperation]) -> Result<Vec<Result<serde_json::Value>>> {
        if operations.is_empty() {
            return Ok(Vec::new());
        }
        let requests = serde_json::to_value(operations).map_err(|e| ParseError::Serialization(e.to_string()))?;
        let body = json!({ "requests": requests });
        let response = self.client.request(HttpMethod::Post, "batch", &[], Some(&body), None)?;
        let items = match response {
            serde_json::Value::Array(items) if items.len() == operations.len() => items,
            other => {
                return Err(ParseError::Deserialization(format!(
                    "expected {} batch results, got {other}",
                    operations.len()
                )))
            }
        };
        Ok(items.into_iter().map(item_result).collect())
    }

    fn run(&self, resources: &mut [Resource], writes: Vec<PendingWrite>) -> Result<()> {
        let operations = self.operations(&writes)?;
        let results = self.execute(&operations)?;

        let mut first_failure = None;
        for (index, ((resource, write), result)) in resources.iter_mut().zip(&writes).zip(results).enumerate() {
            // Committed items are applied even after a local failure.
            match result.and_then(|success| resource.apply_write(write.kind, &success)) {
                Ok(()) => {}
                Err(source) => {
                    tracing::warn!(index, %resource, error = %source, "batch item failed");
                    if first_failure.is_none() {
                        first_failure = Some(ParseError::Batch {
                            index,
                            source: Box::new(source),
                        });
                    }
                }
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn item_result(mut item: serde_json::Value) -> Result<serde_json::Value> {
    if let Some(success) = item.get_mut("success") {
        return Ok(success.take());
    }
    let error = item.get("error");
    Err(ParseError::Remote {
        code: error.and_then(|e| e.get("code")).and_then(|c| c.as_i64()).unwrap_or_default(),
        message: error
            .and_then(|e| e.get("error"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string(),
    })
}

/// Batch items carry no session token, so users are excluded.
fn check_batchable(resource: &Resource) -> Result<()> {
    if resource.collection().requires_session() {
        return Err(ParseError::LoginRequired(format!(
            "{} can not be written in a batch",
            resource.class_name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ClientConfig;
    use crate::http::testing::ScriptedTransport;

    fn setup() -> (Arc<ScriptedTransport>, Client) {
        let transport = Arc::new(ScriptedTransport::new());
        let client = Client::with_transport(
            ClientConfig::new("app", "rest").with_api_root("http://localhost:1337/1"),
            transport.clone(),
        );
        (transport, client)
    }

    fn scores(client: &Client, n: i64) -> Vec<Resource> {
        (0..n)
            .map(|i| {
                let mut r = Resource::new(client, "GameScore");
                r.set("score", i).unwrap();
                r
            })
            .collect()
    }

    #[test]
    fn save_creates_all_in_one_request() {
        let (transport, client) = setup();
        transport.respond(
            200,
            json!([
                {"success": {"objectId": "a", "createdAt": "2011-08-20T02:06:57.931Z"}},
                {"success": {"objectId": "b", "createdAt": "2011-08-20T02:06:57.931Z"}},
            ]),
        );
        let mut items = scores(&client, 2);
        client.batch().save(&mut items).unwrap();

        assert_eq!(transport.request_count(), 1);
        let req = transport.last_request();
        assert_eq!(req.path, "http://localhost:1337/1/batch");
        assert_eq!(
            transport.last_body(),
            json!({"requests": [
                {"method": "POST", "path": "/1/classes/GameScore", "body": {"score": 0}},
                {"method": "POST", "path": "/1/classes/GameScore", "body": {"score": 1}},
            ]})
        );
        assert_eq!(items[0].object_id(), Some("a"));
        assert_eq!(items[1].object_id(), Some("b"));
        assert!(items[1].created_at().is_some());
    }

    #[test]
    fn delete_omits_body_and_clears_instances() {
        let (transport, client) = setup();
        transport.respond(200, json!([{"success": {}}]));
        let mut items = scores(&client, 1);
        items[0].set_object_id("a").unwrap();

        client.batch().delete(&mut items).unwrap();
        assert_eq!(
            transport.last_body(),
            json!({"requests": [{"method": "DELETE", "path": "/1/classes/GameScore/a"}]})
        );
        assert_eq!(items[0].object_id(), None);
    }

    #[test]
    fn failure_is_reported_after_applying_successes() {
        let (transport, client) = setup();
        transport.respond(
            200,
            json!([
                {"error": {"code": 101, "error": "object not found for update"}},
                {"success": {"objectId": "b", "createdAt": "2011-08-20T02:06:57.931Z"}},
            ]),
        );
        let mut items = scores(&client, 2);
        match client.batch().save(&mut items) {
            Err(ParseError::Batch { index, source }) => {
                assert_eq!(index, 0);
                assert!(matches!(*source, ParseError::Remote { code: 101, .. }));
            }
            other => panic!("expected Batch error, got {other:?}"),
        }
        assert_eq!(items[0].object_id(), None);
        assert_eq!(items[1].object_id(), Some("b"));
    }

    #[test]
    fn unusable_success_is_indexed_and_later_items_still_apply() {
        let (transport, client) = setup();
        transport.respond(
            200,
            json!([
                {"success": {"createdAt": "2011-08-20T02:06:57.931Z"}},
                {"success": {"objectId": "b", "createdAt": "2011-08-20T02:06:57.931Z"}},
            ]),
        );
        let mut items = scores(&client, 2);
        match client.batch().save(&mut items) {
            Err(ParseError::Batch { index, source }) => {
                assert_eq!(index, 0);
                assert!(matches!(*source, ParseError::Deserialization(_)));
            }
            other => panic!("expected Batch error, got {other:?}"),
        }
        assert_eq!(items[0].object_id(), None);
        assert_eq!(items[1].object_id(), Some("b"));
    }

    #[test]
    fn empty_input_sends_nothing() {
        let (transport, client) = setup();
        client.batch().save(&mut []).unwrap();
        client.batch().delete(&mut []).unwrap();
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn users_and_unsaved_deletes_are_rejected_up_front() {
        let (transport, client) = setup();
        let mut users = vec![Resource::new(&client, "_User")];
        assert!(matches!(client.batch().save(&mut users), Err(ParseError::LoginRequired(_))));

        let mut unsaved = scores(&client, 1);
        assert!(matches!(client.batch().delete(&mut unsaved), Err(ParseError::Unsaved(_))));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn execute_returns_per_item_results() {
        let (transport, client) = setup();
        transport.respond(
            200,
            json!([
                {"success": {"updatedAt": "2011-08-21T18:02:52.248Z"}},
                {"error": {"code": 101, "error": "object not found"}},
            ]),
        );
        let ops = vec![
            BatchOperation {
                method: "PUT",
                path: "/1/classes/GameScore/a".into(),
                body: Some(json!({"score": 2})),
            },
            BatchOperation {
                method: "DELETE",
                path: "/1/classes/GameScore/b".into(),
                body: None,
            },
        ];
        let results = client.batch().execute(&ops).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].as_ref().unwrap().get("updatedAt").is_some());
        match &results[1] {
            Err(ParseError::Remote { code, message }) => {
                assert_eq!(*code, 101);
                assert_eq!(message, "object not found");
            }
            other => panic!("expected Remote error, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_result_count_is_an_error() {
        let (transport, client) = setup();
        transport.respond(200, json!([]));
        let mut items = scores(&client, 1);
        assert!(matches!(client.batch().save(&mut items), Err(ParseError::Deserialization(_))));
    }
}
