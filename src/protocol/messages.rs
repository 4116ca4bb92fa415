//! Message bodies exchanged with the notification backend
//!
//! Outbound: [`CarMetadata`] snapshots published to `car.events`.
//! Inbound: [`Notification`]s arriving on the private reply queue or the
//! shared broadcast queue, decoded with [`Notification::decode`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Telemetry snapshot for one simulated car
///
/// Published verbatim as the message body; the client performs no validation.
///
/// # Examples
/// ```
/// use carlink::protocol::CarMetadata;
/// use chrono::Utc;
///
/// let metadata = CarMetadata {
///     latitude: 59.33,
///     longitude: 18.07,
///     battery: 95.0,
///     timestamp: Utc::now(),
/// };
/// let json = serde_json::to_value(&metadata).unwrap();
/// assert_eq!(json["battery"], 95.0);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CarMetadata {
    pub latitude: f64,
    pub longitude: f64,
    /// State of charge in percent
    pub battery: f64,
    pub timestamp: DateTime<Utc>,
}

/// Severity carried in the `type` field of every notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Info,
    Warning,
    Error,
    Danger,
    Ack,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Info => "info",
            NotificationType::Warning => "warning",
            NotificationType::Error => "error",
            NotificationType::Danger => "danger",
            NotificationType::Ack => "ack",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(NotificationType::Info),
            "warning" => Ok(NotificationType::Warning),
            "error" => Ok(NotificationType::Error),
            "danger" => Ok(NotificationType::Danger),
            "ack" => Ok(NotificationType::Ack),
            other => Err(format!("unknown notification type: {other}")),
        }
    }
}

/// Reply addressed to one publisher through its private queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatedReply {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub message: String,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Notification fanned out to every subscriber of the broadcast queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastNotification {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub application: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Decoded inbound notification
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Carries a `correlationId` and no `application`
    Reply(CorrelatedReply),
    /// Carries an `application`
    Broadcast(BroadcastNotification),
    /// A JSON object matching neither shape, kept for forward compatibility
    Unknown(Value),
}

/// Payload could not be turned into a [`Notification`]
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Payload is not a JSON object")]
    NotAnObject,
    #[error("Malformed {shape} notification: {source}")]
    Malformed {
        shape: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl Notification {
    /// Decode a raw UTF-8 JSON payload
    ///
    /// The discriminant is the presence of the `application` field; replies are
    /// recognised by `correlationId`. Objects with neither become [`Notification::Unknown`].
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(payload).map_err(DecodeError::InvalidJson)?;
        let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

        if object.contains_key("application") {
            serde_json::from_value(value)
                .map(Notification::Broadcast)
                .map_err(|source| DecodeError::Malformed {
                    shape: "broadcast",
                    source,
                })
        } else if object.contains_key("correlationId") {
            serde_json::from_value(value)
                .map(Notification::Reply)
                .map_err(|source| DecodeError::Malformed {
                    shape: "reply",
                    source,
                })
        } else {
            Ok(Notification::Unknown(value))
        }
    }

    /// Correlation identifier when this is a reply
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Notification::Reply(reply) => Some(&reply.correlation_id),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<NotificationType> {
        match self {
            Notification::Reply(reply) => Some(reply.kind),
            Notification::Broadcast(broadcast) => Some(broadcast.kind),
            Notification::Unknown(_) => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Notification::Reply(reply) => Some(&reply.message),
            Notification::Broadcast(broadcast) => Some(&broadcast.message),
            Notification::Unknown(value) => value.get("message").and_then(Value::as_str),
        }
    }

    /// Timestamp stamped by the producer, if any
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Notification::Reply(reply) => reply.timestamp,
            Notification::Broadcast(broadcast) => broadcast.timestamp,
            Notification::Unknown(value) => value
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc)),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Notification::Broadcast(_))
    }
}

/// Body of `POST /v1/notifications` on the notification API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationRequest {
    pub application: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: NotificationType,
}
