//! Read-only metrics derived from the appointment and user collections.
//!
//! A record whose date does not parse as `DD/MM/YYYY` is left out of the
//! month histogram only; it still counts towards totals, statuses and
//! specialties.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::models::{Appointment, AppointmentStatus, Role, User};
use crate::repository::{AppointmentRepository, UserRepository};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum StatsScope {
    General,
    Doctor(String),
    Patient(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatusPercentages {
    pub confirmed: f64,
    pub pending: f64,
    pub cancelled: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoleCounts {
    pub admins: usize,
    pub doctors: usize,
    pub patients: usize,
}

impl RoleCounts {
    pub fn from_users(users: &[User]) -> Self {
        let mut counts = Self::default();
        for user in users {
            match user.role() {
                Role::Admin => counts.admins += 1,
                Role::Doctor => counts.doctors += 1,
                Role::Patient => counts.patients += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.admins + self.doctors + self.patients
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub scope: StatsScope,
    pub total_appointments: usize,
    pub confirmed_appointments: usize,
    pub pending_appointments: usize,
    pub cancelled_appointments: usize,
    /// Distinct patients (general and doctor scopes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_patients: Option<usize>,
    /// Distinct doctors (general and patient scopes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_doctors: Option<usize>,
    pub appointments_by_specialty: BTreeMap<String, usize>,
    /// Keyed by `MM/YYYY`
    pub appointments_by_month: BTreeMap<String, usize>,
    pub percentages: StatusPercentages,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_users: Option<RoleCounts>,
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

impl Statistics {
    /// Aggregate `appointments`, which must already be filtered to `scope`.
    pub fn aggregate(scope: StatsScope, appointments: &[Appointment]) -> Self {
        let mut confirmed = 0;
        let mut pending = 0;
        let mut cancelled = 0;
        let mut patients = HashSet::new();
        let mut doctors = HashSet::new();
        let mut by_specialty = BTreeMap::new();
        let mut by_month = BTreeMap::new();

        for appointment in appointments {
            match appointment.status {
                AppointmentStatus::Confirmed => confirmed += 1,
                AppointmentStatus::Pending => pending += 1,
                AppointmentStatus::Cancelled => cancelled += 1,
            }
            patients.insert(appointment.patient_id.as_str());
            doctors.insert(appointment.doctor_id.as_str());
            *by_specialty
                .entry(appointment.specialty.clone())
                .or_insert(0) += 1;

            match appointment.month_key() {
                Some(month) => *by_month.entry(month).or_insert(0) += 1,
                None => debug!(
                    id = %appointment.id,
                    date = %appointment.date,
                    "Skipping unparsable date in month histogram"
                ),
            }
        }

        let total = appointments.len();
        let (total_patients, total_doctors) = match scope {
            StatsScope::General => (Some(patients.len()), Some(doctors.len())),
            StatsScope::Doctor(_) => (Some(patients.len()), None),
            StatsScope::Patient(_) => (None, Some(doctors.len())),
        };

        Self {
            scope,
            total_appointments: total,
            confirmed_appointments: confirmed,
            pending_appointments: pending,
            cancelled_appointments: cancelled,
            total_patients,
            total_doctors,
            appointments_by_specialty: by_specialty,
            appointments_by_month: by_month,
            percentages: StatusPercentages {
                confirmed: percentage(confirmed, total),
                pending: percentage(pending, total),
                cancelled: percentage(cancelled, total),
            },
            registered_users: None,
        }
    }

    pub fn count_for(&self, status: AppointmentStatus) -> usize {
        match status {
            AppointmentStatus::Confirmed => self.confirmed_appointments,
            AppointmentStatus::Pending => self.pending_appointments,
            AppointmentStatus::Cancelled => self.cancelled_appointments,
        }
    }

    /// Specialties by descending count, ties broken by name.
    pub fn top_specialties(&self, limit: usize) -> Vec<(String, usize)> {
        let mut ranked: Vec<(String, usize)> = self
            .appointments_by_specialty
            .iter()
            .map(|(name, count)| (name.clone(), *count))
            .collect();
        ranked.sort_by(|(a_name, a_count), (b_name, b_count)| {
            b_count.cmp(a_count).then_with(|| a_name.cmp(b_name))
        });
        ranked.truncate(limit);
        ranked
    }

    /// Month histogram in calendar order (`BTreeMap` order is by `MM` first).
    pub fn months_chronological(&self) -> Vec<(String, usize)> {
        let mut months: Vec<(String, usize)> = self
            .appointments_by_month
            .iter()
            .map(|(key, count)| (key.clone(), *count))
            .collect();
        months.sort_by_key(|(key, _)| month_sort_key(key));
        months
    }

    /// Month with the most appointments; the earliest wins a tie.
    pub fn busiest_month(&self) -> Option<(String, usize)> {
        self.months_chronological()
            .into_iter()
            .min_by_key(|(key, count)| (Reverse(*count), month_sort_key(key)))
    }
}

/// `(year, month)` of an `MM/YYYY` key
fn month_sort_key(key: &str) -> (u32, u32) {
    let (month, year) = key.split_once('/').unwrap_or((key, ""));
    (year.parse().unwrap_or(0), month.parse().unwrap_or(0))
}

/// Computes [`Statistics`] from the repositories on demand.
#[derive(Clone)]
pub struct StatisticsEngine {
    appointments: AppointmentRepository,
    users: UserRepository,
}

impl StatisticsEngine {
    pub fn new(appointments: AppointmentRepository, users: UserRepository) -> Self {
        Self {
            appointments,
            users,
        }
    }

    pub async fn compute_general(&self) -> Statistics {
        let appointments = self.appointments.get_all().await;
        let users = self.users.get_all().await;

        let mut stats = Statistics::aggregate(StatsScope::General, &appointments);
        stats.registered_users = Some(RoleCounts::from_users(&users));
        stats
    }

    pub async fn compute_for_doctor(&self, doctor_id: &str) -> Statistics {
        let appointments = self.appointments.for_doctor(doctor_id).await;
        Statistics::aggregate(StatsScope::Doctor(doctor_id.to_string()), &appointments)
    }

    pub async fn compute_for_patient(&self, patient_id: &str) -> Statistics {
        let appointments = self.appointments.for_patient(patient_id).await;
        Statistics::aggregate(StatsScope::Patient(patient_id.to_string()), &appointments)
    }
}
