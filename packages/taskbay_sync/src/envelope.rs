//! Routable envelopes derived from raw server events.
//!
//! Both transports can deliver the same platform event, so every routable
//! event gets a deterministic dedupe id derived from payload identity, not
//! from transport metadata. An event whose payload cannot yield an id is
//! malformed and is dropped by the router rather than delivered twice.

use crate::protocol::ServerEvent;

/// Dedupe id formats, one namespace per event family:
///   `msg:{threadId}:{messageId}`
///   `read:{threadId}:{userId}`
///   `ntf:{notificationId}`
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub dedupe_id: String,
    pub body: EnvelopeBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeBody {
    MessageNew {
        thread_id: String,
        message: serde_json::Value,
    },
    MessageRead {
        thread_id: String,
        user_id: String,
    },
    Notification {
        event: String,
        data: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("{kind} payload has no usable id")]
    MissingId { kind: &'static str },

    #[error("status events are not routable")]
    NotRoutable,
}

impl EventEnvelope {
    pub fn from_event(event: ServerEvent) -> Result<Self, EnvelopeError> {
        match event {
            ServerEvent::MessageNew { thread_id, message } => {
                let id = payload_id(&message).ok_or(EnvelopeError::MissingId {
                    kind: "message:new",
                })?;
                Ok(Self {
                    dedupe_id: format!("msg:{thread_id}:{id}"),
                    body: EnvelopeBody::MessageNew { thread_id, message },
                })
            }
            ServerEvent::MessageRead { thread_id, user_id } => Ok(Self {
                dedupe_id: format!("read:{thread_id}:{user_id}"),
                body: EnvelopeBody::MessageRead { thread_id, user_id },
            }),
            ServerEvent::Notification { event, data } => {
                let id = payload_id(&data).ok_or(EnvelopeError::MissingId {
                    kind: "notification",
                })?;
                Ok(Self {
                    dedupe_id: format!("ntf:{id}"),
                    body: EnvelopeBody::Notification { event, data },
                })
            }
            ServerEvent::Status { .. } => Err(EnvelopeError::NotRoutable),
        }
    }
}

/// Top-level `id` of a payload object, as a string. Servers send both string
/// and numeric ids.
fn payload_id(payload: &serde_json::Value) -> Option<String> {
    match payload.get("id")? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
