//! Named groups of remote objects and the endpoints that serve them.

use std::fmt;

/// A collection of remote objects.
///
/// `from_class_name` is the registry mapping a wire `className` back to its
/// collection; built-in classes get their own endpoints, everything else is
/// served under `classes/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Collection {
    Object(String),
    User,
    Installation,
    Role,
}

impl Collection {
    pub fn from_class_name(class_name: &str) -> Self {
        match class_name {
            "_User" => Collection::User,
            "_Installation" => Collection::Installation,
            "_Role" => Collection::Role,
            other => Collection::Object(other.to_string()),
        }
    }

    /// The `className` used in pointers and queries.
    pub fn class_name(&self) -> &str {
        match self {
            Collection::Object(name) => name,
            Collection::User => "_User",
            Collection::Installation => "_Installation",
            Collection::Role => "_Role",
        }
    }

    /// Endpoint relative to the API root. Names and ids are
    /// percent-encoded as single path segments.
    pub fn endpoint(&self) -> String {
        match self {
            Collection::Object(name) => format!("classes/{}", urlencoding::encode(name)),
            Collection::User => "users".to_string(),
            Collection::Installation => "installations".to_string(),
            Collection::Role => "roles".to_string(),
        }
    }

    pub fn object_endpoint(&self, object_id: &str) -> String {
        format!("{}/{}", self.endpoint(), urlencoding::encode(object_id))
    }

    /// Saving or deleting in this collection needs a session token.
    pub fn requires_session(&self) -> bool {
        matches!(self, Collection::User)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

impl From<&str> for Collection {
    fn from(class_name: &str) -> Self {
        Collection::from_class_name(class_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_classes_have_their_own_endpoints() {
        assert_eq!(Collection::from_class_name("_User").endpoint(), "users");
        assert_eq!(Collection::from_class_name("_Installation").endpoint(), "installations");
        assert_eq!(Collection::from_class_name("_Role").endpoint(), "roles");
    }

    #[test]
    fn user_classes_live_under_classes() {
        let c = Collection::from_class_name("GameScore");
        assert_eq!(c.endpoint(), "classes/GameScore");
        assert_eq!(c.object_endpoint("abc"), "classes/GameScore/abc");
        assert_eq!(c.class_name(), "GameScore");
    }

    #[test]
    fn names_and_ids_are_single_path_segments() {
        let c = Collection::from_class_name("Game Score");
        assert_eq!(c.endpoint(), "classes/Game%20Score");
        assert_eq!(c.object_endpoint("a/b?c"), "classes/Game%20Score/a%2Fb%3Fc");
        assert_eq!(c.class_name(), "Game Score");
    }

    #[test]
    fn class_name_round_trips() {
        for c in [
            Collection::User,
            Collection::Installation,
            Collection::Role,
            Collection::Object("Post".into()),
        ] {
            assert_eq!(Collection::from_class_name(c.class_name()), c);
        }
    }

    #[test]
    fn only_users_require_a_session() {
        assert!(Collection::User.requires_session());
        assert!(!Collection::Role.requires_session());
        assert!(!Collection::Object("Post".into()).requires_session());
    }
}
