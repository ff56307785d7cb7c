use tracing::info;

use super::Collection;
use crate::error::Result;
use crate::models::{Appointment, AppointmentDraft, AppointmentPatch, AppointmentStatus};

impl Collection<Appointment> {
    /// Book a new pending appointment and return it.
    pub async fn schedule(&self, draft: AppointmentDraft) -> Result<Appointment> {
        let appointment = draft.into_appointment();
        self.add(appointment.clone()).await?;
        info!(
            id = %appointment.id,
            doctor = %appointment.doctor_id,
            date = %appointment.date,
            "Appointment scheduled"
        );
        Ok(appointment)
    }

    pub async fn for_patient(&self, patient_id: &str) -> Vec<Appointment> {
        self.get_all()
            .await
            .into_iter()
            .filter(|a| a.patient_id == patient_id)
            .collect()
    }

    pub async fn for_doctor(&self, doctor_id: &str) -> Vec<Appointment> {
        self.get_all()
            .await
            .into_iter()
            .filter(|a| a.doctor_id == doctor_id)
            .collect()
    }

    pub async fn patch(&self, id: &str, patch: AppointmentPatch) -> Result<bool> {
        self.update(id, |appointment| patch.apply(appointment)).await
    }

    pub async fn confirm(&self, id: &str) -> Result<bool> {
        self.update(id, |appointment| {
            appointment.status = AppointmentStatus::Confirmed;
            appointment.cancel_reason = None;
        })
        .await
    }

    pub async fn cancel(&self, id: &str, reason: Option<String>) -> Result<bool> {
        self.update(id, |appointment| {
            appointment.status = AppointmentStatus::Cancelled;
            appointment.cancel_reason = reason;
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::appointment::tests::appointment;
    use crate::repository::AppointmentRepository;
    use crate::storage::KeyValueStore;

    fn repo() -> AppointmentRepository {
        Collection::new(Arc::new(KeyValueStore::in_memory()))
    }

    #[tokio::test]
    async fn test_schedule_assigns_unique_ids() {
        let repo = repo();
        let draft = AppointmentDraft {
            patient_id: "p1".to_string(),
            patient_name: "Ana".to_string(),
            doctor_id: "d1".to_string(),
            doctor_name: "Dr. Rui".to_string(),
            date: "02/05/2024".to_string(),
            time: "08:00".to_string(),
            specialty: "Clínica Geral".to_string(),
        };

        let first = repo.schedule(draft.clone()).await.unwrap();
        let second = repo.schedule(draft).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(repo.count().await, 2);
    }

    #[tokio::test]
    async fn test_filters_by_participant() {
        let repo = repo();
        repo.add(appointment("a1", "p1", "d1", "Cardiologia", "01/01/2024", AppointmentStatus::Pending)).await.unwrap();
        repo.add(appointment("a2", "p2", "d1", "Cardiologia", "01/01/2024", AppointmentStatus::Pending)).await.unwrap();
        repo.add(appointment("a3", "p1", "d2", "Pediatria", "01/01/2024", AppointmentStatus::Pending)).await.unwrap();

        assert_eq!(repo.for_patient("p1").await.len(), 2);
        assert_eq!(repo.for_doctor("d1").await.len(), 2);
        assert!(repo.for_doctor("d9").await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_then_confirm() {
        let repo = repo();
        repo.add(appointment("a1", "p1", "d1", "Cardiologia", "01/01/2024", AppointmentStatus::Pending)).await.unwrap();

        assert!(repo.cancel("a1", Some("Imprevisto".to_string())).await.unwrap());
        let a1 = repo.find("a1").await.unwrap();
        assert_eq!(a1.status, AppointmentStatus::Cancelled);
        assert_eq!(a1.cancel_reason.as_deref(), Some("Imprevisto"));

        assert!(repo.confirm("a1").await.unwrap());
        let a1 = repo.find("a1").await.unwrap();
        assert_eq!(a1.status, AppointmentStatus::Confirmed);
        assert_eq!(a1.cancel_reason, None);

        assert!(!repo.confirm("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_patch() {
        let repo = repo();
        repo.add(appointment("a1", "p1", "d1", "Cardiologia", "01/01/2024", AppointmentStatus::Pending)).await.unwrap();

        let patch = AppointmentPatch {
            date: Some("03/01/2024".to_string()),
            ..Default::default()
        };
        assert!(repo.patch("a1", patch).await.unwrap());
        let a1 = repo.find("a1").await.unwrap();
        assert_eq!(a1.date, "03/01/2024");
        assert_eq!(a1.time, "09:30");
    }
}
