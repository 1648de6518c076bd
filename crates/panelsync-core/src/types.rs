//! Core types for PanelSync

pub mod snapshot;

pub use snapshot::{Faction, InventoryItem, StatusEffect, Token, UserSnapshot, UserStats};

use serde::{Deserialize, Deserializer, Serialize};

/// Base URL of the EBS as delivered by the broadcaster configuration.
///
/// Stored without trailing slashes so endpoint paths can be appended directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseUrl(String);

impl BaseUrl {
    /// Create a BaseUrl, returning `None` for blank input
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Get the URL as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build `{base}/api/user/{user_id}/{suffix}`
    pub fn user_endpoint(&self, user_id: &str, suffix: &str) -> String {
        format!("{}/api/user/{}/{}", self.0, user_id, suffix)
    }
}

impl std::fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity supplied by the host's authorization callback.
#[derive(Clone, PartialEq, Eq)]
pub struct HostAuth {
    /// Opaque user identifier used in endpoint paths
    pub user_id: String,
    /// Bearer token sent with every request
    pub token: String,
}

impl HostAuth {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for HostAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAuth")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// A message delivered by the EBS messages endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub content: String,
    #[serde(
        rename = "type",
        default = "default_category",
        deserialize_with = "category_or_chat"
    )]
    pub category: String,
}

pub(crate) fn default_category() -> String {
    "chat".to_string()
}

/// Blank or `null` categories fall back to `chat`.
fn category_or_chat<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(default_category))
}

/// Deserialize `null` as the type's default value.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trims_trailing_slashes() {
        let url = BaseUrl::new("https://ebs.example.com//").unwrap();
        assert_eq!(url.as_str(), "https://ebs.example.com");
        assert_eq!(
            url.user_endpoint("123", "data"),
            "https://ebs.example.com/api/user/123/data"
        );
    }

    #[test]
    fn test_base_url_rejects_blank() {
        assert!(BaseUrl::new("").is_none());
        assert!(BaseUrl::new("   ").is_none());
        assert!(BaseUrl::new("/").is_none());
    }

    #[test]
    fn test_host_auth_debug_redacts_token() {
        let auth = HostAuth::new("42", "secret-token");
        let printed = format!("{:?}", auth);
        assert!(printed.contains("42"));
        assert!(!printed.contains("secret-token"));
    }

    #[test]
    fn test_server_message_category_defaults_to_chat() {
        let msg: ServerMessage = serde_json::from_str(r#"{"content":"hi"}"#).unwrap();
        assert_eq!(msg.category, "chat");

        let msg: ServerMessage =
            serde_json::from_str(r#"{"content":"loot","type":"reward"}"#).unwrap();
        assert_eq!(msg.category, "reward");

        let msg: ServerMessage =
            serde_json::from_str(r#"{"content":"x","type":null}"#).unwrap();
        assert_eq!(msg.category, "chat");
    }
}
