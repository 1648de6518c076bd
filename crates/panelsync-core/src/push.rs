//! Push event routing
//!
//! Broadcast payloads arrive as JSON objects with a `type` discriminator.
//! Only `dungeonStatus` is consumed by the panel; everything else, including
//! the overlay's own `click` broadcasts, is recognized and ignored so new
//! server-side message types never break older panels.
//!
//! ```text
//! {"type":"dungeonStatus","active":true}                 -> DungeonStatus
//! {"type":"click","coordinates":{"x":..,"y":..},...}     -> Ignored
//! {"type":"somethingNew",...}                            -> Ignored
//! not json / no type / bad "active"                      -> PushError::Malformed
//! ```

use serde::{Deserialize, Serialize};

use crate::error::PushError;

pub const DUNGEON_STATUS: &str = "dungeonStatus";
pub const CLICK: &str = "click";

/// A push event after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// The broadcaster opened or closed a dungeon
    DungeonStatus { active: bool },
    /// A well-formed payload the panel does not act on
    Ignored { kind: String },
}

impl PushEvent {
    /// Whether the event changes panel state
    pub fn is_actionable(&self) -> bool {
        !matches!(self, PushEvent::Ignored { .. })
    }
}

/// Normalized click coordinates broadcast by the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClickCoordinates {
    pub x: f64,
    pub y: f64,
}

/// Click broadcast produced by the sibling overlay component.
///
/// The panel never consumes these; the type exists so the wire format is
/// documented and can be produced by tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickBroadcast {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: ClickCoordinates,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub broadcaster_id: Option<String>,
}

impl ClickBroadcast {
    pub fn new(x: f64, y: f64, timestamp: i64, broadcaster_id: Option<String>) -> Self {
        Self {
            kind: CLICK.to_string(),
            coordinates: ClickCoordinates { x, y },
            timestamp,
            broadcaster_id,
        }
    }
}

#[derive(Deserialize)]
struct DungeonStatusBody {
    active: bool,
}

/// Validate and classify a raw broadcast payload.
pub fn parse_push(raw: &str) -> Result<PushEvent, PushError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|err| PushError::Malformed(err.to_string()))?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| PushError::Malformed("missing \"type\" discriminator".to_string()))?
        .to_string();

    match kind.as_str() {
        DUNGEON_STATUS => {
            let body: DungeonStatusBody = serde_json::from_value(value)
                .map_err(|err| PushError::Malformed(format!("{}: {}", DUNGEON_STATUS, err)))?;
            Ok(PushEvent::DungeonStatus {
                active: body.active,
            })
        }
        _ => Ok(PushEvent::Ignored { kind }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dungeon_status() {
        assert_eq!(
            parse_push(r#"{"type":"dungeonStatus","active":true}"#),
            Ok(PushEvent::DungeonStatus { active: true })
        );
        assert_eq!(
            parse_push(r#"{"type":"dungeonStatus","active":false,"extra":1}"#),
            Ok(PushEvent::DungeonStatus { active: false })
        );
    }

    #[test]
    fn test_unknown_types_are_ignored() {
        let event = parse_push(r#"{"type":"scene_change","scene":{}}"#).unwrap();
        assert_eq!(
            event,
            PushEvent::Ignored {
                kind: "scene_change".to_string()
            }
        );
        assert!(!event.is_actionable());
    }

    #[test]
    fn test_click_broadcast_is_ignored() {
        let click = ClickBroadcast::new(0.25, 0.75, 1_700_000_000_000, Some("99".to_string()));
        let raw = serde_json::to_string(&click).unwrap();
        assert!(raw.contains("\"broadcasterId\":\"99\""));
        assert_eq!(
            parse_push(&raw),
            Ok(PushEvent::Ignored {
                kind: CLICK.to_string()
            })
        );
    }

    #[test]
    fn test_malformed_payloads() {
        for raw in [
            "",
            "not json",
            "[]",
            r#"{"active":true}"#,
            r#"{"type":7}"#,
            r#"{"type":"dungeonStatus"}"#,
            r#"{"type":"dungeonStatus","active":"yes"}"#,
        ] {
            assert!(
                matches!(parse_push(raw), Err(PushError::Malformed(_))),
                "expected malformed: {raw}"
            );
        }
    }
}
