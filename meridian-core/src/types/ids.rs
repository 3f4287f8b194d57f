//! String identifier newtypes

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from a string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the underlying string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Campaign whose budget ledger is serialized through one writer.
    CampaignId
);

string_id!(
    /// Variant or channel competing for budget within a campaign.
    ArmId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = ArmId::new("arm-a");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"arm-a\"");
        let parsed: ArmId = serde_json::from_str("\"arm-a\"").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_id_ordering_is_lexicographic() {
        let mut ids = vec![CampaignId::from("b"), CampaignId::from("a")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "a");
    }
}
