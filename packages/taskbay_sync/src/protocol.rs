//! Wire protocol for the realtime channel.
//!
//! Everything is JSON with a `type` tag, shared by both transports: the
//! duplex socket carries `ClientOp` frames up and `ServerEvent` frames down,
//! while the fallback stream delivers the same `ServerEvent` JSON inside
//! named SSE events.

use serde::{Deserialize, Serialize};

/// Messages from client to server over the duplex transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientOp {
    /// First frame after the socket opens. The server binds the connection
    /// to the token's identity or closes it.
    #[serde(rename = "auth")]
    Auth { token: String },

    /// Subscribe to a message thread.
    #[serde(rename = "thread:join", rename_all = "camelCase")]
    ThreadJoin { thread_id: String },

    /// Unsubscribe from a message thread.
    #[serde(rename = "thread:leave", rename_all = "camelCase")]
    ThreadLeave { thread_id: String },
}

/// Messages from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A message posted to a joined thread. The message body is passed
    /// through to the message store untouched.
    #[serde(rename = "message:new", rename_all = "camelCase")]
    MessageNew {
        thread_id: String,
        message: serde_json::Value,
    },

    /// A participant read the thread up to now.
    #[serde(rename = "message:read", rename_all = "camelCase")]
    MessageRead { thread_id: String, user_id: String },

    /// An account-level notification (orders, requests, invoices, ...).
    /// `event` names the platform event, `data` is its payload.
    #[serde(rename = "notification")]
    Notification {
        event: String,
        data: serde_json::Value,
    },

    /// Connection status advisory from the server. Informational only.
    #[serde(rename = "status")]
    Status { status: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_ops_use_wire_tags() {
        let join = ClientOp::ThreadJoin {
            thread_id: "thread-7".to_string(),
        };
        let json = serde_json::to_value(&join).unwrap();
        assert_eq!(json, json!({"type": "thread:join", "threadId": "thread-7"}));

        let auth = serde_json::to_value(ClientOp::Auth {
            token: "tok".to_string(),
        })
        .unwrap();
        assert_eq!(auth, json!({"type": "auth", "token": "tok"}));
    }

    #[test]
    fn server_events_parse_from_wire_json() {
        let ev: ServerEvent = serde_json::from_value(json!({
            "type": "message:new",
            "threadId": "thread-7",
            "message": {"id": "m-1", "body": "hello"},
        }))
        .unwrap();
        assert_eq!(
            ev,
            ServerEvent::MessageNew {
                thread_id: "thread-7".to_string(),
                message: json!({"id": "m-1", "body": "hello"}),
            }
        );

        let ev: ServerEvent = serde_json::from_value(json!({
            "type": "message:read",
            "threadId": "thread-7",
            "userId": "user-2",
        }))
        .unwrap();
        assert_eq!(
            ev,
            ServerEvent::MessageRead {
                thread_id: "thread-7".to_string(),
                user_id: "user-2".to_string(),
            }
        );

        let ev: ServerEvent = serde_json::from_value(json!({
            "type": "notification",
            "event": "order:created",
            "data": {"id": "n-1"},
        }))
        .unwrap();
        assert!(matches!(ev, ServerEvent::Notification { .. }));
    }

    #[test]
    fn unknown_event_type_fails_to_parse() {
        let err = serde_json::from_value::<ServerEvent>(json!({"type": "presence:ping"}));
        assert!(err.is_err());
    }

    #[test]
    fn missing_fields_fail_to_parse() {
        let err = serde_json::from_value::<ServerEvent>(json!({"type": "message:new"}));
        assert!(err.is_err());
    }
}
