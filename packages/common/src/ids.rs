//! Identifier newtypes shared by every package.
//!
//! All identifiers are opaque strings on the wire (`#[serde(transparent)]`).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Project a branch belongs to
    ProjectId
);

string_id!(
    /// Content hash of a commit object (`#` followed by hex digits)
    CommitHash
);

string_id!(
    /// Identity of one connected client (one editor instance)
    ClientId
);

string_id!(
    /// Identity of an OT-backed text field
    DocumentId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_transparent_on_the_wire() {
        let hash = CommitHash::new("#00ff");
        assert_eq!(serde_json::to_string(&hash).unwrap(), "\"#00ff\"");

        let back: CommitHash = serde_json::from_str("\"#00ff\"").unwrap();
        assert_eq!(back, hash);
        assert_eq!(back.to_string(), "#00ff");
    }
}
