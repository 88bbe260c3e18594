//! Wire messages exchanged between the coordinator and a client over the
//! websocket connection. Grounded on the message bodies and `name`
//! constants in `original_source/go/server_state.go` and `go/client.go`.

use serde::{Deserialize, Serialize};

use crate::token::Token;

/// A message as it travels the websocket, tagged by `name` the way the
/// original JSON payloads are.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum WireMessage {
    /// Coordinator -> client: are you still there, and can you still reach
    /// the current primary?
    Ping {
        #[serde(rename = "system")]
        system_name: String,
        token: Token,
    },
    /// Client -> coordinator: reply to a ping.
    Pong {
        id: String,
        #[serde(rename = "system")]
        system_name: String,
        token: Token,
    },
    /// Coordinator -> client: drop your handle on the current primary, a
    /// switch is coming.
    Invalidate {
        #[serde(rename = "system")]
        system_name: String,
        token: Token,
    },
    /// Client -> coordinator: acknowledges it invalidated its handle.
    ClientInvalidated {
        id: String,
        #[serde(rename = "system")]
        system_name: String,
        token: Token,
    },
    /// Coordinator -> client: here is the new primary, adopt it.
    Reconfigure {
        #[serde(rename = "system")]
        system_name: String,
        token: Token,
        server: String,
    },
    /// Client -> coordinator: hello, I'm online.
    ClientStarted {
        id: String,
    },
    /// Client -> coordinator: periodic liveness signal outside of a vote.
    Heartbeat {
        id: String,
    },
    /// Internal: a client websocket disconnected and must be dropped from
    /// the registry. Submitted by the transport layer, not sent by peers.
    Unsubscribe {
        id: String,
    },
    /// Subscriber -> coordinator: begin receiving notification text frames
    /// on this `/notifications` connection.
    StartNotify,
    /// Subscriber -> coordinator: stop receiving notification text frames.
    StopNotify,
}

impl WireMessage {
    pub fn system_name(&self) -> Option<&str> {
        match self {
            WireMessage::Ping { system_name, .. }
            | WireMessage::Pong { system_name, .. }
            | WireMessage::Invalidate { system_name, .. }
            | WireMessage::ClientInvalidated { system_name, .. }
            | WireMessage::Reconfigure { system_name, .. } => Some(system_name),
            WireMessage::ClientStarted { .. }
            | WireMessage::Heartbeat { .. }
            | WireMessage::Unsubscribe { .. }
            | WireMessage::StartNotify
            | WireMessage::StopNotify => None,
        }
    }

    pub fn client_id(&self) -> Option<&str> {
        match self {
            WireMessage::Pong { id, .. }
            | WireMessage::ClientInvalidated { id, .. }
            | WireMessage::ClientStarted { id }
            | WireMessage::Heartbeat { id }
            | WireMessage::Unsubscribe { id } => Some(id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pong_round_trips_through_json() {
        let msg = WireMessage::Pong {
            id: "client-1".to_string(),
            system_name: "system".to_string(),
            token: Token::from_value(42),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"name\":\"pong\""));
        assert!(json.contains("\"system\":\"system\""));
        assert!(!json.contains("system_name"));
        let back: WireMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn system_name_is_absent_for_lifecycle_messages() {
        let msg = WireMessage::ClientStarted {
            id: "client-1".to_string(),
        };
        assert_eq!(msg.system_name(), None);
        assert_eq!(msg.client_id(), Some("client-1"));
    }
}
