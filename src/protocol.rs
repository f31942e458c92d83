//! # Wire protocol
//!
//! Outbound requests are JSON objects carrying an `action` discriminator:
//!
//! | action      | fields                                             | reply |
//! |-------------|----------------------------------------------------|-------|
//! | `subscribe` | `performance_id`                                   | no    |
//! | `register`  | `artist`, `title`, `performance_date`, `duration`  | yes   |
//! | `update`    | `token` + arbitrary caller fields                  | yes   |
//! | `publish`   | `heartrate`, `token`                               | no    |
//!
//! Replies and server pushes are handed back as raw text; nothing here parses them.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};
use strum::{AsRefStr, Display};

/// Default performance length in seconds sent with `register`.
pub const DEFAULT_DURATION_SECS: u32 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Action {
    Subscribe,
    Register,
    Update,
    Publish,
    /// Standalone read of a server push.
    #[strum(serialize = "wait_for_data")]
    Receive,
}

/// Outbound request frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Subscribe {
        performance_id: String,
    },
    Register {
        artist: String,
        title: String,
        /// Unix timestamp in seconds.
        performance_date: i64,
        duration: u32,
    },
    Update {
        token: String,
        fields: Map<String, Value>,
    },
    Publish {
        token: String,
        heartrate: u32,
    },
}

impl Command {
    /// Build a `register` request, resolving `performance_date` to the current
    /// time when the caller leaves it unset.
    pub fn register(
        artist: impl Into<String>,
        title: impl Into<String>,
        performance_date: Option<i64>,
        duration: Option<u32>,
    ) -> Self {
        Command::Register {
            artist: artist.into(),
            title: title.into(),
            performance_date: performance_date.unwrap_or_else(|| chrono::Utc::now().timestamp()),
            duration: duration.unwrap_or(DEFAULT_DURATION_SECS),
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Command::Subscribe { .. } => Action::Subscribe,
            Command::Register { .. } => Action::Register,
            Command::Update { .. } => Action::Update,
            Command::Publish { .. } => Action::Publish,
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let action = self.action();
        match self {
            Command::Subscribe { performance_id } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("action", action.as_ref())?;
                map.serialize_entry("performance_id", performance_id)?;
                map.end()
            }
            Command::Register {
                artist,
                title,
                performance_date,
                duration,
            } => {
                let mut map = serializer.serialize_map(Some(5))?;
                map.serialize_entry("action", action.as_ref())?;
                map.serialize_entry("artist", artist)?;
                map.serialize_entry("title", title)?;
                map.serialize_entry("performance_date", performance_date)?;
                map.serialize_entry("duration", duration)?;
                map.end()
            }
            Command::Update { token, fields } => {
                // Caller fields are applied last so they win over `action` and `token`.
                let mut merged = Map::new();
                merged.insert("action".into(), Value::from(action.as_ref()));
                merged.insert("token".into(), Value::from(token.as_str()));
                merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                merged.serialize(serializer)
            }
            Command::Publish { token, heartrate } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("action", action.as_ref())?;
                map.serialize_entry("heartrate", heartrate)?;
                map.serialize_entry("token", token)?;
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(command: &Command) -> Value {
        let frame = command.to_frame().unwrap();
        serde_json::from_str(&frame).unwrap()
    }

    #[test]
    fn test_subscribe_frame() {
        let command = Command::Subscribe {
            performance_id: "perf-7".into(),
        };
        assert_eq!(
            encode(&command),
            json!({"action": "subscribe", "performance_id": "perf-7"})
        );
    }

    #[test]
    fn test_register_frame_with_explicit_values() {
        let command = Command::register("A", "T", Some(1000), Some(60));
        assert_eq!(
            encode(&command),
            json!({
                "action": "register",
                "artist": "A",
                "title": "T",
                "performance_date": 1000,
                "duration": 60
            })
        );
    }

    #[test]
    fn test_register_defaults_resolved_per_call() {
        let before = chrono::Utc::now().timestamp();
        let command = Command::register("A", "T", None, None);
        let after = chrono::Utc::now().timestamp();

        match command {
            Command::Register {
                performance_date,
                duration,
                ..
            } => {
                assert!(performance_date >= before && performance_date <= after);
                assert_eq!(duration, DEFAULT_DURATION_SECS);
            }
            other => panic!("expected register, got {:?}", other),
        }
    }

    #[test]
    fn test_update_merges_caller_fields() {
        let mut fields = Map::new();
        fields.insert("title".into(), json!("New"));
        let command = Command::Update {
            token: "tok".into(),
            fields,
        };
        assert_eq!(
            encode(&command),
            json!({"action": "update", "token": "tok", "title": "New"})
        );
    }

    #[test]
    fn test_update_caller_fields_win_on_collision() {
        let mut fields = Map::new();
        fields.insert("token".into(), json!("override"));
        fields.insert("action".into(), json!("custom"));
        let command = Command::Update {
            token: "tok".into(),
            fields,
        };

        let frame = command.to_frame().unwrap();
        // One key per name, no duplicates in the emitted object
        assert_eq!(frame.matches("\"token\"").count(), 1);
        assert_eq!(
            encode(&command),
            json!({"action": "custom", "token": "override"})
        );
    }

    #[test]
    fn test_publish_frame() {
        let command = Command::Publish {
            token: "tok".into(),
            heartrate: 72,
        };
        assert_eq!(
            encode(&command),
            json!({"action": "publish", "heartrate": 72, "token": "tok"})
        );
    }

    #[test]
    fn test_action_names_match_wire_values() {
        assert_eq!(Action::Publish.to_string(), "publish");
        assert_eq!(Action::Subscribe.as_ref(), "subscribe");
        assert_eq!(
            Command::Publish {
                token: "t".into(),
                heartrate: 1
            }
            .action(),
            Action::Publish
        );
    }
}
