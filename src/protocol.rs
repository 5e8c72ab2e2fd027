//! Wire protocol: the `{type, payload}` envelope and typed event payloads.
//!
//! Every inbound channel message is a JSON envelope of the shape
//! `{"type": string, "payload": object}`. The `type` string is mapped onto
//! [`EventKind`], a closed enum of the event types this client understands
//! plus an [`EventKind::Other`] passthrough so that new server event types
//! never break old clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON envelope wrapping every channel message, inbound and outbound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type (inbound) or destination (outbound)
    pub r#type: String,
    /// Event payload; `null` when the sender omitted it
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Build an outbound envelope for the given destination
    pub fn outbound(destination: &str, payload: Value) -> Self {
        Self {
            r#type: destination.to_string(),
            payload,
        }
    }
}

/// Parse a raw text frame into an [`Envelope`].
///
/// Fails on non-JSON input and on JSON without a string `type` field.
pub fn parse_envelope(text: &str) -> Result<Envelope, serde_json::Error> {
    serde_json::from_str(text)
}

/// Frame type marker for client-originated control frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Auth,
}

/// Authentication frame sent as the first outbound frame after connect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFrame {
    pub r#type: FrameType,
    pub token: String,
}

impl AuthFrame {
    /// Create an auth frame carrying the given bearer token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            r#type: FrameType::Auth,
            token: token.into(),
        }
    }
}

/// Event types recognized by this client.
///
/// `Other` carries the raw type string of anything else, including
/// hierarchical topic addresses (e.g. `/topic/games/42/chat`), so
/// subscribers can still register for event types this enum does not
/// know about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    GameUpdated,
    NotificationCreated,
    ChatMessage,
    PlayerJoined,
    PlayerLeft,
    GameCancelled,
    TeamInvite,
    Typing,
    Other(String),
}

impl EventKind {
    /// Map a wire `type` string onto an event kind
    pub fn parse(s: &str) -> Self {
        match s {
            "game_updated" => Self::GameUpdated,
            "notification_created" => Self::NotificationCreated,
            "chat_message" => Self::ChatMessage,
            "player_joined" => Self::PlayerJoined,
            "player_left" => Self::PlayerLeft,
            "game_cancelled" => Self::GameCancelled,
            "team_invite" => Self::TeamInvite,
            "typing" => Self::Typing,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire `type` string for this kind
    pub fn as_str(&self) -> &str {
        match self {
            Self::GameUpdated => "game_updated",
            Self::NotificationCreated => "notification_created",
            Self::ChatMessage => "chat_message",
            Self::PlayerJoined => "player_joined",
            Self::PlayerLeft => "player_left",
            Self::GameCancelled => "game_cancelled",
            Self::TeamInvite => "team_invite",
            Self::Typing => "typing",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `notification_created` event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationCreatedPayload {
    pub id: String,
    pub title: String,
    pub message: String,
    /// Server-side priority ("high" maps to a warning notification)
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub action_url: Option<String>,
}

/// Payload of a `chat_message` event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub game_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub sent_at: i64,
}

/// Payload of `player_joined` / `player_left` events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPresencePayload {
    pub game_id: String,
    pub player_name: String,
}

/// Payload of a `game_cancelled` event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameCancelledPayload {
    pub game_id: String,
    pub game_name: String,
}

/// Payload of a `team_invite` event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamInvitePayload {
    pub team_id: String,
    pub team_name: String,
}

/// Payload of a `typing` event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub game_id: String,
    pub user_id: String,
    pub user_name: String,
}

/// Outbound destination for chat messages in a game room
pub fn chat_destination(game_id: &str) -> String {
    format!("/app/games/{}/chat", game_id)
}

/// Outbound destination for typing events in a game room
pub fn typing_destination(game_id: &str) -> String {
    format!("/app/games/{}/typing", game_id)
}

/// Inbound topic address for chat messages in a game room
pub fn chat_topic(game_id: &str) -> String {
    format!("/topic/games/{}/chat", game_id)
}

/// Inbound topic address for typing events in a game room
pub fn typing_topic(game_id: &str) -> String {
    format!("/topic/games/{}/typing", game_id)
}
