//! User state snapshot as served by the EBS data endpoint
//!
//! A [`UserSnapshot`] is the complete, atomically-replaced representation of
//! one user's state. The engine holds it behind an `Arc` and swaps it as a
//! whole; the only in-place change is `is_dungeon_active`, which the push
//! router patches between polls.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::null_as_default;

/// Progression stats for a user.
///
/// Counters are display-only: floats are truncated and anything that is not
/// a number reads as zero rather than failing the whole snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserStats {
    #[serde(deserialize_with = "lenient_count")]
    pub level: u32,
    #[serde(deserialize_with = "lenient_count")]
    pub experience: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub attack: u32,
    #[serde(deserialize_with = "lenient_count")]
    pub defense: u32,
    #[serde(deserialize_with = "lenient_count")]
    pub total_check_ins: u32,
    #[serde(deserialize_with = "lenient_count")]
    pub session_check_ins: u32,
    #[serde(deserialize_with = "lenient_count")]
    pub prestige_rank: u32,
    #[serde(deserialize_with = "lenient_count")]
    pub prestige_tier: u32,
    #[serde(deserialize_with = "lenient_count")]
    pub clips_made: u32,
    /// When the user last checked in
    #[serde(deserialize_with = "lenient_time")]
    pub last_check_in_time: Option<DateTime<Utc>>,
    /// Server-computed next check-in time; already reflects item and
    /// prestige modifiers
    #[serde(deserialize_with = "lenient_time")]
    pub next_check_in_time: Option<DateTime<Utc>>,
}

/// A token held by the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Token {
    #[serde(deserialize_with = "lenient_text")]
    pub id: String,
    #[serde(deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(deserialize_with = "lenient_opt_text")]
    pub image_base64: Option<String>,
    #[serde(deserialize_with = "lenient_count")]
    pub count: u32,
}

/// An inventory item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InventoryItem {
    #[serde(deserialize_with = "lenient_text")]
    pub id: String,
    #[serde(deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(deserialize_with = "lenient_text")]
    pub description: String,
    #[serde(deserialize_with = "lenient_opt_text")]
    pub image_base64: Option<String>,
    #[serde(deserialize_with = "lenient_count")]
    pub count: u32,
    #[serde(deserialize_with = "lenient_flag")]
    pub is_unique: bool,
}

/// An active status effect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusEffect {
    #[serde(deserialize_with = "lenient_text")]
    pub id: String,
    #[serde(deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(deserialize_with = "lenient_opt_text")]
    pub image_base64: Option<String>,
    #[serde(deserialize_with = "lenient_count")]
    pub count: u32,
}

/// Faction loyalty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Faction {
    #[serde(deserialize_with = "lenient_opt_text")]
    pub current_loyalty: Option<String>,
    #[serde(deserialize_with = "lenient_opt_text")]
    pub default_faction: Option<String>,
    /// Past loyalties, kept as sent; the panel never interprets them
    #[serde(deserialize_with = "null_as_default")]
    pub faction_history: Vec<serde_json::Value>,
    #[serde(deserialize_with = "lenient_opt_text")]
    pub faction_image_base64: Option<String>,
}

impl Faction {
    /// Loyalty line shown on the overview page.
    pub fn loyalty_line(&self) -> String {
        match (&self.current_loyalty, &self.default_faction) {
            (Some(current), _) => format!("Loyal to: {}", current),
            (None, Some(default)) => format!("Default: {}", default),
            (None, None) => "No faction selected".to_string(),
        }
    }

    /// True when the user has a default faction but is not checked in to it.
    pub fn is_default_only(&self) -> bool {
        self.current_loyalty.is_none() && self.default_faction.is_some()
    }
}

/// Complete user state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSnapshot {
    /// Display name; absent until the user has checked in once
    pub user_name: Option<String>,
    pub twitch_avatar_url: Option<String>,
    pub prestige_image_base64: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub stats: UserStats,
    /// Server's verdict on whether a check-in is allowed right now
    pub can_check_in: Option<bool>,
    #[serde(deserialize_with = "null_as_default")]
    pub tokens: Vec<Token>,
    #[serde(deserialize_with = "null_as_default")]
    pub inventory: Vec<InventoryItem>,
    #[serde(deserialize_with = "null_as_default")]
    pub effects: Vec<StatusEffect>,
    #[serde(deserialize_with = "null_as_default")]
    pub faction: Faction,
    #[serde(deserialize_with = "null_as_default")]
    pub is_dungeon_active: bool,
}

impl UserSnapshot {
    /// The canonical snapshot for a user the EBS has no record of.
    pub fn new_user_default() -> Self {
        Self {
            user_name: None,
            twitch_avatar_url: None,
            prestige_image_base64: None,
            stats: UserStats {
                level: 0,
                experience: 0,
                attack: 0,
                defense: 0,
                total_check_ins: 0,
                session_check_ins: 0,
                prestige_rank: 0,
                prestige_tier: 0,
                clips_made: 0,
                last_check_in_time: None,
                next_check_in_time: None,
            },
            can_check_in: None,
            tokens: Vec::new(),
            inventory: Vec::new(),
            effects: Vec::new(),
            faction: Faction {
                current_loyalty: None,
                default_faction: None,
                faction_history: Vec::new(),
                faction_image_base64: None,
            },
            is_dungeon_active: false,
        }
    }

    /// Whether the user has an identity on the EBS yet.
    pub fn is_checked_in(&self) -> bool {
        self.user_name
            .as_deref()
            .map(|name| !name.is_empty())
            .unwrap_or(false)
    }

    /// Copy of this snapshot with the dungeon flag replaced.
    pub fn with_dungeon_active(&self, active: bool) -> Self {
        Self {
            is_dungeon_active: active,
            ..self.clone()
        }
    }

    /// Why check-in is unavailable at `now`, when there is a reason worth
    /// showing.
    pub fn check_in_hint(&self, now: DateTime<Utc>) -> Option<&'static str> {
        if self.can_check_in.unwrap_or(false) {
            return None;
        }
        if self.is_dungeon_active {
            return Some("Check-ins disabled during dungeon");
        }
        match self.stats.next_check_in_time {
            Some(next) if next > now => Some("Cooldown active"),
            _ => None,
        }
    }

    /// Dungeon status line for the actions page
    pub fn dungeon_line(&self) -> &'static str {
        if self.is_dungeon_active {
            "Dungeon is open!"
        } else {
            "No active dungeon"
        }
    }
}

/// Accepts RFC 3339 strings or epoch milliseconds. Anything else, including
/// `null` and unparseable strings, becomes `None`.
fn lenient_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    })
}

/// Strings as-is, numbers in their JSON form, anything else empty.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_text(deserializer)?.unwrap_or_default())
}

fn lenient_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Non-negative numbers, truncated; numeric strings are accepted too.
/// Anything else, or a value out of range for `T`, becomes zero.
fn lenient_count<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64> + Default,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let number = match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().and_then(truncate)),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok().and_then(truncate),
        _ => None,
    };
    Ok(number.and_then(|n| T::try_from(n).ok()).unwrap_or_default())
}

fn truncate(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0 && value <= u64::MAX as f64).then(|| value as u64)
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(matches!(value, Some(serde_json::Value::Bool(true))))
}
