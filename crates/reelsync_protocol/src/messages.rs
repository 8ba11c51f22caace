//! Wire messages for the action, batch, change-feed, and realtime channels.

use crate::action::Action;
use crate::error::{ProtocolError, ProtocolResult};
use crate::record::{ChangeRecord, EntityKey};
use serde::{Deserialize, Serialize};

fn is_false(v: &bool) -> bool {
    !*v
}

/// Per-action response from the server.
///
/// Returned by both the single-action and batch endpoints. Exactly one of
/// three outcomes holds: success (with the assigned `last_modified`),
/// conflict (with the authoritative `server_state`), or rejection (with an
/// `error` message).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionAck {
    /// Whether the action was applied.
    pub success: bool,
    /// Server-assigned timestamp of the resulting entity state.
    #[serde(default)]
    pub last_modified: Option<f64>,
    /// Error message for rejections and conflicts.
    #[serde(default)]
    pub error: Option<String>,
    /// True when the entity's state was incompatible with the action. The
    /// client must adopt `server_state` and drop its queue entry.
    #[serde(default, skip_serializing_if = "is_false")]
    pub conflict: bool,
    /// Current authoritative state, present on conflicts.
    #[serde(default)]
    pub server_state: Option<ChangeRecord>,
    /// True for rejections the client may retry (e.g. the server exceeded
    /// its processing deadline). False rejections are permanent.
    #[serde(default, skip_serializing_if = "is_false")]
    pub retryable: bool,
}

impl ActionAck {
    /// A successful application.
    pub fn ok(last_modified: f64) -> Self {
        Self {
            success: true,
            last_modified: Some(last_modified),
            error: None,
            conflict: false,
            server_state: None,
            retryable: false,
        }
    }

    /// A permanent rejection (malformed or semantically invalid action).
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            last_modified: None,
            error: Some(message.into()),
            conflict: false,
            server_state: None,
            retryable: false,
        }
    }

    /// A retryable rejection (transient server-side failure).
    pub fn retry_later(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::rejected(message)
        }
    }

    /// A conflict carrying the authoritative state, when one exists.
    pub fn conflict(message: impl Into<String>, server_state: Option<ChangeRecord>) -> Self {
        Self {
            success: false,
            last_modified: server_state.as_ref().map(|r| r.last_modified()),
            error: Some(message.into()),
            conflict: true,
            server_state,
            retryable: false,
        }
    }
}

/// Batch of actions, order-preserving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Actions in client enqueue order.
    pub actions: Vec<Action>,
}

/// Batch response. `results[i]` corresponds to `actions[i]`; one failing
/// action does not affect the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Per-action outcomes, order-preserving.
    pub results: Vec<ActionAck>,
    /// Server clock at response time (Unix seconds).
    pub server_timestamp: f64,
}

/// Query parameters for the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangesQuery {
    /// Return records with `last_modified` strictly greater than this.
    pub since: f64,
    /// Page size. `None` selects the legacy non-paginated variant, still
    /// bounded by the server's hard cap.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Records to skip within the window.
    #[serde(default)]
    pub offset: Option<u32>,
}

impl ChangesQuery {
    /// A paginated query.
    pub fn paged(since: f64, limit: u32) -> Self {
        Self {
            since,
            limit: Some(limit),
            offset: None,
        }
    }

    /// The legacy non-paginated variant.
    pub fn legacy(since: f64) -> Self {
        Self {
            since,
            limit: None,
            offset: None,
        }
    }

    /// Sets the offset.
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Renders as an HTTP query string (no leading `?`).
    pub fn to_query_string(&self) -> String {
        let mut out = format!("since={}", self.since);
        if let Some(limit) = self.limit {
            out.push_str(&format!("&limit={limit}"));
        }
        if let Some(offset) = self.offset {
            out.push_str(&format!("&offset={offset}"));
        }
        out
    }

    /// Parses an HTTP query string (no leading `?`).
    pub fn parse_query(query: &str) -> ProtocolResult<Self> {
        let mut parsed = Self::legacy(0.0);
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| ProtocolError::InvalidQuery(format!("malformed pair: {pair}")))?;
            match name {
                "since" => {
                    parsed.since = value.parse().map_err(|_| {
                        ProtocolError::InvalidQuery(format!("since is not a number: {value}"))
                    })?;
                }
                "limit" => {
                    parsed.limit = Some(value.parse().map_err(|_| {
                        ProtocolError::InvalidQuery(format!("limit is not a number: {value}"))
                    })?);
                }
                "offset" => {
                    parsed.offset = Some(value.parse().map_err(|_| {
                        ProtocolError::InvalidQuery(format!("offset is not a number: {value}"))
                    })?);
                }
                other => {
                    return Err(ProtocolError::InvalidQuery(format!(
                        "unknown parameter: {other}"
                    )));
                }
            }
        }
        Ok(parsed)
    }
}

/// One page of the change feed, ordered by `last_modified` ascending.
///
/// Ascending order is what makes an interrupted pull resumable: the client
/// restarts with `since` set to the last record it applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesPage {
    /// Records in ascending `last_modified` order.
    pub records: Vec<ChangeRecord>,
    /// True when more records exist past this page.
    #[serde(default)]
    pub has_more: bool,
}

impl ChangesPage {
    /// An empty page.
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            has_more: false,
        }
    }
}

/// Compact change notification pushed over the realtime channel.
///
/// Carries no payload; a client that cares fetches the state through the
/// change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotice {
    /// The changed entity.
    #[serde(flatten)]
    pub entity: EntityKey,
    /// The entity's new server timestamp.
    pub last_modified: f64,
}

/// Frames exchanged over the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RealtimeFrame {
    /// Server hello, sent once when a session opens.
    Connected {
        /// Server clock at connect time.
        timestamp: f64,
    },
    /// An entity changed.
    Change {
        /// The notification.
        #[serde(flatten)]
        notice: ChangeNotice,
    },
    /// Client liveness ping.
    Ping {
        /// Client clock at send time.
        timestamp: f64,
    },
    /// Server reply to a ping.
    Pong {
        /// Server clock at reply time.
        timestamp: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MovieState;

    #[test]
    fn ack_constructors() {
        let ack = ActionAck::ok(5.0);
        assert!(ack.success);
        assert_eq!(ack.last_modified, Some(5.0));
        assert!(!ack.conflict);

        let ack = ActionAck::rejected("unknown person");
        assert!(!ack.success);
        assert!(!ack.retryable);

        let ack = ActionAck::retry_later("server busy");
        assert!(ack.retryable);

        let mut movie = MovieState::new("tt0001");
        movie.last_modified = 9.0;
        let ack = ActionAck::conflict("already deleted", Some(ChangeRecord::Movie(movie)));
        assert!(ack.conflict);
        assert_eq!(ack.last_modified, Some(9.0));
        assert!(ack.server_state.is_some());
    }

    #[test]
    fn ack_wire_defaults() {
        // A plain success ack decodes with conflict/retryable defaulted.
        let json = r#"{"success":true,"last_modified":3.5}"#;
        let ack: ActionAck = serde_json::from_str(json).unwrap();
        assert!(ack.success);
        assert!(!ack.conflict);
        assert!(!ack.retryable);
        assert!(ack.server_state.is_none());
    }

    #[test]
    fn query_string_roundtrip() {
        let query = ChangesQuery::paged(12.5, 100).with_offset(200);
        let rendered = query.to_query_string();
        assert_eq!(rendered, "since=12.5&limit=100&offset=200");

        let parsed = ChangesQuery::parse_query(&rendered).unwrap();
        assert_eq!(parsed, query);
    }

    #[test]
    fn legacy_query() {
        let parsed = ChangesQuery::parse_query("since=0").unwrap();
        assert_eq!(parsed.since, 0.0);
        assert!(parsed.limit.is_none());

        assert!(ChangesQuery::parse_query("since=abc").is_err());
        assert!(ChangesQuery::parse_query("verbose=1").is_err());
    }

    #[test]
    fn change_notice_shape() {
        let notice = ChangeNotice {
            entity: EntityKey::Movie("tt0001".into()),
            last_modified: 42.0,
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["entity_type"], "movie");
        assert_eq!(json["entity_key"], "tt0001");
        assert_eq!(json["last_modified"], 42.0);
    }

    #[test]
    fn realtime_frame_roundtrip() {
        let frame = RealtimeFrame::Change {
            notice: ChangeNotice {
                entity: EntityKey::Person("Ana".into()),
                last_modified: 7.0,
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"change\""));

        let decoded: RealtimeFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn batch_results_are_order_preserving() {
        let response = BatchResponse {
            results: vec![ActionAck::ok(1.0), ActionAck::rejected("bad")],
            server_timestamp: 2.0,
        };
        let json = serde_json::to_string(&response).unwrap();
        let decoded: BatchResponse = serde_json::from_str(&json).unwrap();
        assert!(decoded.results[0].success);
        assert!(!decoded.results[1].success);
    }
}
