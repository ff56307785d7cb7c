//! Per-user notification inbox.
//!
//! Besides plain create/list/mark-read, this module builds the fixed
//! messages sent when an appointment is booked, confirmed, cancelled or
//! about to happen. The message texts are shown verbatim by the client.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{new_id, Appointment, NewNotification, Notification, NotificationType};
use crate::repository::{Collection, SettingsRepository};
use crate::storage::KeyValueStore;

pub const TITLE_CONFIRMED: &str = "Consulta Confirmada";
pub const TITLE_CANCELLED: &str = "Consulta Cancelada";
pub const TITLE_NEW_APPOINTMENT: &str = "Nova Consulta";
pub const TITLE_REMINDER: &str = "Lembrete de Consulta";

pub fn confirmed_message(appointment: &Appointment) -> String {
    format!(
        "Sua consulta com {} foi confirmada para {} às {}.",
        appointment.doctor_name, appointment.date, appointment.time
    )
}

pub fn cancelled_message(appointment: &Appointment) -> String {
    let mut message = format!(
        "Sua consulta com {} marcada para {} às {} foi cancelada.",
        appointment.doctor_name, appointment.date, appointment.time
    );
    if let Some(reason) = appointment
        .cancel_reason
        .as_deref()
        .filter(|r| !r.trim().is_empty())
    {
        message.push_str(&format!(" Motivo: {}", reason));
    }
    message
}

pub fn new_appointment_message(appointment: &Appointment) -> String {
    format!(
        "{} agendou uma consulta de {} para {} às {}.",
        appointment.patient_name, appointment.specialty, appointment.date, appointment.time
    )
}

pub fn reminder_message(appointment: &Appointment) -> String {
    format!(
        "Lembrete: sua consulta com {} está marcada para {} às {}.",
        appointment.doctor_name, appointment.date, appointment.time
    )
}

#[derive(Clone)]
pub struct NotificationCenter {
    notifications: Collection<Notification>,
    settings: SettingsRepository,
}

impl NotificationCenter {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        Self {
            notifications: Collection::new(store.clone()),
            settings: SettingsRepository::new(store),
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.notifications = self.notifications.with_ttl(ttl);
        self
    }

    pub fn repository(&self) -> &Collection<Notification> {
        &self.notifications
    }

    /// The user's notifications, newest first.
    pub async fn list(&self, user_id: &str) -> Vec<Notification> {
        let mut list: Vec<Notification> = self
            .notifications
            .get_all()
            .await
            .into_iter()
            .filter(|n| n.user_id == user_id)
            .collect();
        // Ids come from a monotonic generator, so creation order settles equal timestamps
        list.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        list
    }

    pub async fn create(&self, new: NewNotification) -> Result<Notification> {
        let notification = Notification {
            id: new_id(),
            user_id: new.user_id,
            title: new.title,
            message: new.message,
            kind: new.kind,
            read: false,
            created_at: self.notifications.store().now(),
            appointment_id: new.appointment_id,
        };
        self.notifications.add(notification.clone()).await?;
        debug!(id = %notification.id, user = %notification.user_id, "Notification created");
        Ok(notification)
    }

    /// Returns `false` when no notification has this id.
    pub async fn mark_read(&self, id: &str) -> Result<bool> {
        self.notifications.update(id, |n| n.read = true).await
    }

    /// Mark every unread notification of `user_id` read; returns how many changed.
    pub async fn mark_all_read(&self, user_id: &str) -> Result<usize> {
        self.notifications
            .update_where(|n| n.user_id == user_id && !n.read, |n| n.read = true)
            .await
    }

    pub async fn unread_count(&self, user_id: &str) -> usize {
        self.notifications
            .get_all()
            .await
            .iter()
            .filter(|n| n.user_id == user_id && !n.read)
            .count()
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        self.notifications.delete(id).await
    }

    pub async fn clear_for_user(&self, user_id: &str) -> Result<usize> {
        self.notifications
            .delete_where(|n| n.user_id == user_id)
            .await
    }

    // ===== Templated notifications =====

    /// Create a templated notification unless the user turned notifications off.
    async fn notify(
        &self,
        user_id: &str,
        title: &str,
        message: String,
        kind: NotificationType,
        appointment: &Appointment,
    ) -> Result<Option<Notification>> {
        if !self.settings.get().await.notifications {
            debug!(user = %user_id, ?kind, "Notifications disabled, skipping");
            return Ok(None);
        }
        let notification = self
            .create(NewNotification {
                user_id: user_id.to_string(),
                title: title.to_string(),
                message,
                kind,
                appointment_id: Some(appointment.id.clone()),
            })
            .await?;
        info!(user = %user_id, appointment = %appointment.id, ?kind, "Sent appointment notification");
        Ok(Some(notification))
    }

    /// Tell the patient their appointment was confirmed.
    pub async fn notify_confirmed(&self, appointment: &Appointment) -> Result<Option<Notification>> {
        self.notify(
            &appointment.patient_id,
            TITLE_CONFIRMED,
            confirmed_message(appointment),
            NotificationType::AppointmentConfirmed,
            appointment,
        )
        .await
    }

    /// Tell the patient their appointment was cancelled.
    pub async fn notify_cancelled(&self, appointment: &Appointment) -> Result<Option<Notification>> {
        self.notify(
            &appointment.patient_id,
            TITLE_CANCELLED,
            cancelled_message(appointment),
            NotificationType::AppointmentCancelled,
            appointment,
        )
        .await
    }

    /// Tell the doctor a patient booked with them.
    pub async fn notify_new_appointment(
        &self,
        appointment: &Appointment,
    ) -> Result<Option<Notification>> {
        self.notify(
            &appointment.doctor_id,
            TITLE_NEW_APPOINTMENT,
            new_appointment_message(appointment),
            NotificationType::General,
            appointment,
        )
        .await
    }

    pub async fn notify_reminder(&self, appointment: &Appointment) -> Result<Option<Notification>> {
        self.notify(
            &appointment.patient_id,
            TITLE_REMINDER,
            reminder_message(appointment),
            NotificationType::AppointmentReminder,
            appointment,
        )
        .await
    }
}
