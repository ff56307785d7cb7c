use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{require, Entity};
use crate::error::Result;
use crate::storage::keys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    AppointmentConfirmed,
    AppointmentCancelled,
    AppointmentReminder,
    General,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
}

impl Entity for Notification {
    const COLLECTION: &'static str = keys::NOTIFICATIONS;
    const NAME: &'static str = "Notification";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<()> {
        require(Self::NAME, "id", &self.id)?;
        require(Self::NAME, "userId", &self.user_id)?;
        require(Self::NAME, "title", &self.title)?;
        require(Self::NAME, "message", &self.message)?;
        Ok(())
    }
}

/// Caller-supplied part of a notification; id, timestamp and read flag are assigned on create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    #[serde(default)]
    pub appointment_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_field_wire_names() {
        let n = Notification {
            id: "n1".to_string(),
            user_id: "u1".to_string(),
            title: "Consulta Confirmada".to_string(),
            message: "ok".to_string(),
            kind: NotificationType::AppointmentConfirmed,
            read: false,
            created_at: "2024-03-01T10:00:00Z".parse().unwrap(),
            appointment_id: Some("a1".to_string()),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "appointment_confirmed");
        assert_eq!(json["createdAt"], "2024-03-01T10:00:00Z");
        assert_eq!(json["appointmentId"], "a1");

        let back: Notification = serde_json::from_value(json).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn test_bad_created_at_is_rejected() {
        let json = r#"{"id":"n1","userId":"u1","title":"t","message":"m",
            "type":"general","read":false,"createdAt":"yesterday"}"#;
        assert!(serde_json::from_str::<Notification>(json).is_err());
    }
}
