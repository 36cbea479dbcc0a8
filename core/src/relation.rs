//! Many-to-many relation fields.

use serde_json::{json, Map};

use crate::client::Client;
use crate::collection::Collection;
use crate::error::{ParseError, Result};
use crate::http::HttpMethod;
use crate::query::{Operator, Query, RELATED_TO_KEY};
use crate::resource::Resource;
use crate::types::Value;

/// Handle to the relation stored under `key` on one parent object.
///
/// The relation's members are never held locally. `add` and `remove` send
/// an atomic operation immediately; `query` lists the current members.
#[derive(Debug, Clone)]
pub struct RelationRef {
    client: Client,
    parent: Collection,
    parent_id: Option<String>,
    session_token: Option<String>,
    key: String,
    target: Option<Collection>,
}

impl RelationRef {
    pub(crate) fn new(parent: &Resource, key: &str) -> Self {
        let target = match parent.peek(key) {
            Some(Value::Relation(relation)) => relation
                .class_name
                .as_deref()
                .map(Collection::from_class_name),
            _ => None,
        };
        Self {
            client: parent.client().clone(),
            parent: parent.collection().clone(),
            parent_id: parent.object_id().map(str::to_string),
            session_token: parent.session_token().map(str::to_string),
            key: key.to_string(),
            target,
        }
    }

    /// Fix the class of related objects when the server has not reported it.
    pub fn with_target(mut self, class_name: &str) -> Self {
        self.target = Some(Collection::from_class_name(class_name));
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn target(&self) -> Option<&Collection> {
        self.target.as_ref()
    }

    pub fn add(&mut self, objects: &[&Resource]) -> Result<()> {
        self.modify("AddRelation", objects)
    }

    pub fn remove(&mut self, objects: &[&Resource]) -> Result<()> {
        self.modify("RemoveRelation", objects)
    }

    /// Query over the objects currently in the relation.
    pub fn query(&self) -> Result<Query> {
        let target = self.target.clone().ok_or_else(|| {
            ParseError::InvalidRelationTarget(format!("class of relation '{}' is unknown", self.key))
        })?;
        let mut object = Map::new();
        object.insert("__type".into(), "Pointer".into());
        object.insert("className".into(), self.parent.class_name().into());
        object.insert("objectId".into(), self.parent_id()?.into());
        let mut related = Map::new();
        related.insert("object".into(), serde_json::Value::Object(object));
        related.insert("key".into(), self.key.as_str().into());
        Query::new(&self.client, target).filter(RELATED_TO_KEY, Operator::RelatedTo, serde_json::Value::Object(related))
    }

    fn modify(&mut self, op: &str, objects: &[&Resource]) -> Result<()> {
        let parent_id = self.parent_id()?.to_string();
        if objects.is_empty() {
            return Ok(());
        }
        let pointers = objects
            .iter()
            .map(|object| self.check_target(object))
            .collect::<Result<Vec<_>>>()?;

        let mut body = Map::new();
        body.insert(self.key.clone(), json!({"__op": op, "objects": pointers}));
        self.client.request(
            HttpMethod::Put,
            &self.parent.object_endpoint(&parent_id),
            &[],
            Some(&serde_json::Value::Object(body)),
            self.session_token.as_deref(),
        )?;
        tracing::debug!(key = %self.key, op, count = objects.len(), "relation updated");
        Ok(())
    }

    /// Pointer to `object`, which must be saved and of the relation's class.
    /// The first object added to a relation of unknown class fixes the class.
    fn check_target(&mut self, object: &Resource) -> Result<serde_json::Value> {
        if object.object_id().is_none() {
            return Err(ParseError::InvalidRelationTarget(format!("{object} has not been saved")));
        }
        match &self.target {
            Some(target) if target != object.collection() => {
                return Err(ParseError::InvalidRelationTarget(format!(
                    "relation '{}' holds {target}, not {}",
                    self.key,
                    object.class_name()
                )))
            }
            Some(_) => {}
            None => self.target = Some(object.collection().clone()),
        }
        object.pointer()
    }

    fn parent_id(&self) -> Result<&str> {
        self.parent_id
            .as_deref()
            .ok_or_else(|| ParseError::Unsaved(self.parent.class_name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ClientConfig;
    use crate::http::testing::ScriptedTransport;
    use crate::resource::into_object;

    fn setup() -> (Arc<ScriptedTransport>, Client) {
        let transport = Arc::new(ScriptedTransport::new());
        let client = Client::with_transport(
            ClientConfig::new("app", "rest").with_api_root("http://localhost:1337/1"),
            transport.clone(),
        );
        (transport, client)
    }

    fn saved(client: &Client, class_name: &str, id: &str) -> Resource {
        let mut r = Resource::new(client, class_name);
        r.set_object_id(id).unwrap();
        r
    }

    #[test]
    fn target_comes_from_decoded_relation_field() {
        let (_, client) = setup();
        let map = into_object(json!({
            "objectId": "p1",
            "likes": {"__type": "Relation", "className": "_User"},
        }))
        .unwrap();
        let post = Resource::from_wire(&client, Collection::from_class_name("Post"), map).unwrap();
        assert_eq!(post.relation("likes").target(), Some(&Collection::User));
        assert_eq!(post.relation("other").target(), None);
    }

    #[test]
    fn add_sends_pointers() {
        let (transport, client) = setup();
        transport.respond(200, json!({"updatedAt": "2011-08-21T18:02:52.248Z"}));
        let post = saved(&client, "Post", "p1");
        let a = saved(&client, "Comment", "c1");
        let b = saved(&client, "Comment", "c2");

        let mut comments = post.relation("comments");
        comments.add(&[&a, &b]).unwrap();

        let req = transport.last_request();
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.path, "http://localhost:1337/1/classes/Post/p1");
        assert_eq!(
            transport.last_body(),
            json!({"comments": {"__op": "AddRelation", "objects": [
                {"__type": "Pointer", "className": "Comment", "objectId": "c1"},
                {"__type": "Pointer", "className": "Comment", "objectId": "c2"},
            ]}})
        );
        assert_eq!(comments.target(), Some(&Collection::from_class_name("Comment")));
    }

    #[test]
    fn remove_sends_remove_op() {
        let (transport, client) = setup();
        transport.respond(200, json!({}));
        let post = saved(&client, "Post", "p1");
        let a = saved(&client, "Comment", "c1");
        post.relation("comments").with_target("Comment").remove(&[&a]).unwrap();
        assert_eq!(transport.last_body()["comments"]["__op"], "RemoveRelation");
    }

    #[test]
    fn wrong_class_or_unsaved_target_is_rejected() {
        let (transport, client) = setup();
        let post = saved(&client, "Post", "p1");
        let user = saved(&client, "_User", "u1");
        let draft = Resource::new(&client, "Comment");

        let mut comments = post.relation("comments").with_target("Comment");
        assert!(matches!(comments.add(&[&user]), Err(ParseError::InvalidRelationTarget(_))));
        assert!(matches!(comments.add(&[&draft]), Err(ParseError::InvalidRelationTarget(_))));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn unsaved_parent_is_rejected() {
        let (_, client) = setup();
        let post = Resource::new(&client, "Post");
        let a = saved(&client, "Comment", "c1");
        assert!(matches!(post.relation("comments").add(&[&a]), Err(ParseError::Unsaved(_))));
    }

    #[test]
    fn query_constrains_by_related_to() {
        let (_, client) = setup();
        let post = saved(&client, "Post", "p1");
        let q = post.relation("comments").with_target("Comment").query().unwrap();
        assert_eq!(q.collection(), &Collection::from_class_name("Comment"));
        assert_eq!(
            q.where_json(),
            json!({"$relatedTo": {
                "object": {"__type": "Pointer", "className": "Post", "objectId": "p1"},
                "key": "comments",
            }})
        );
        assert!(post.relation("comments").query().is_err());
    }
}
