use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::{new_id, require, Entity};
use crate::error::{Result, StoreError};
use crate::storage::keys;

/// Date format used by the client for appointment dates
pub const DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 3] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Cancelled,
    ];
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub doctor_id: String,
    pub doctor_name: String,
    /// `DD/MM/YYYY`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    pub specialty: String,
    pub status: AppointmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

impl Appointment {
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.date.trim(), DATE_FORMAT).ok()
    }

    /// `MM/YYYY` bucket of the appointment date, if the date parses
    pub fn month_key(&self) -> Option<String> {
        self.parsed_date()
            .map(|d| format!("{:02}/{:04}", d.month(), d.year()))
    }

    pub fn is_active(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }
}

/// True for a 24-hour `HH:MM` clock time
fn is_valid_time(time: &str) -> bool {
    let Some((hours, minutes)) = time.split_once(':') else {
        return false;
    };
    if hours.len() != 2 || minutes.len() != 2 {
        return false;
    }
    match (hours.parse::<u8>(), minutes.parse::<u8>()) {
        (Ok(h), Ok(m)) => h < 24 && m < 60,
        _ => false,
    }
}

impl Entity for Appointment {
    const COLLECTION: &'static str = keys::APPOINTMENTS;
    const NAME: &'static str = "Appointment";

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<()> {
        require(Self::NAME, "id", &self.id)?;
        require(Self::NAME, "patientId", &self.patient_id)?;
        require(Self::NAME, "patientName", &self.patient_name)?;
        require(Self::NAME, "doctorId", &self.doctor_id)?;
        require(Self::NAME, "doctorName", &self.doctor_name)?;
        require(Self::NAME, "date", &self.date)?;
        require(Self::NAME, "specialty", &self.specialty)?;
        if !is_valid_time(&self.time) {
            return Err(StoreError::validation(format!(
                "Appointment {} has invalid time {} (expected HH:MM)",
                self.id,
                StoreError::quote(&self.time)
            )));
        }
        Ok(())
    }
}

/// Everything needed to book a new appointment; id and status are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDraft {
    pub patient_id: String,
    pub patient_name: String,
    pub doctor_id: String,
    pub doctor_name: String,
    pub date: String,
    pub time: String,
    pub specialty: String,
}

impl AppointmentDraft {
    pub fn into_appointment(self) -> Appointment {
        Appointment {
            id: new_id(),
            patient_id: self.patient_id,
            patient_name: self.patient_name,
            doctor_id: self.doctor_id,
            doctor_name: self.doctor_name,
            date: self.date,
            time: self.time,
            specialty: self.specialty,
            status: AppointmentStatus::Pending,
            cancel_reason: None,
        }
    }
}

/// Partial update: only the `Some` fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPatch {
    pub date: Option<String>,
    pub time: Option<String>,
    pub specialty: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub cancel_reason: Option<String>,
}

impl AppointmentPatch {
    pub fn apply(self, appointment: &mut Appointment) {
        if let Some(date) = self.date {
            appointment.date = date;
        }
        if let Some(time) = self.time {
            appointment.time = time;
        }
        if let Some(specialty) = self.specialty {
            appointment.specialty = specialty;
        }
        if let Some(status) = self.status {
            appointment.status = status;
        }
        if let Some(reason) = self.cancel_reason {
            appointment.cancel_reason = Some(reason);
        }
    }
}
