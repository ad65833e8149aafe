use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::contact::{EmailAddress, PhoneNumber};
use crate::ids::{AppointmentId, DoctorId, PatientId};
use crate::repo::{
    AppointmentRepository, DoctorRepository, PatientRepository, memory::MemoryRepository,
    postgres::PgRepository,
};

#[derive(Clone)]
pub struct AppState {
    pub appointments: Arc<dyn AppointmentRepository>,
    pub patients: Arc<dyn PatientRepository>,
    pub doctors: Arc<dyn DoctorRepository>,
}

impl AppState {
    pub fn postgres(db: sqlx::PgPool) -> Self {
        let repo = Arc::new(PgRepository::new(db));
        Self {
            appointments: repo.clone(),
            patients: repo.clone(),
            doctors: repo,
        }
    }

    pub fn in_memory() -> Self {
        let repo = Arc::new(MemoryRepository::default());
        Self {
            appointments: repo.clone(),
            patients: repo.clone(),
            doctors: repo,
        }
    }
}

/* -------------------------
   Appointment enums
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentType {
    FirstConsult,
    CheckUp,
    FollowUp,
}

impl AppointmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentType::FirstConsult => "FIRST_CONSULT",
            AppointmentType::CheckUp => "CHECK_UP",
            AppointmentType::FollowUp => "FOLLOW_UP",
        }
    }
}

impl FromStr for AppointmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FIRST_CONSULT" => Ok(AppointmentType::FirstConsult),
            "CHECK_UP" => Ok(AppointmentType::CheckUp),
            "FOLLOW_UP" => Ok(AppointmentType::FollowUp),
            other => Err(format!("unknown appointment type {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::InProgress => "IN_PROGRESS",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::NoShow => "NO_SHOW",
        }
    }

    /// Whether the appointment still holds its slot on the doctor's calendar.
    pub fn occupies_slot(self) -> bool {
        self != AppointmentStatus::Cancelled
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppointmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown appointment status {s:?}"))
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Appointment length; only the clinic's booking granularities are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct DurationMinutes(i32);

impl DurationMinutes {
    pub const ALLOWED: [i32; 7] = [15, 30, 45, 60, 90, 120, 180];

    pub fn new(minutes: i32) -> Result<Self, String> {
        if Self::ALLOWED.contains(&minutes) {
            Ok(Self(minutes))
        } else {
            Err(format!(
                "durationMinutes must be one of {:?}, got {minutes}",
                Self::ALLOWED
            ))
        }
    }

    pub fn minutes(self) -> i32 {
        self.0
    }

    pub fn as_duration(self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.0))
    }
}

impl TryFrom<i32> for DurationMinutes {
    type Error = String;

    fn try_from(minutes: i32) -> Result<Self, Self::Error> {
        Self::new(minutes)
    }
}

impl From<DurationMinutes> for i32 {
    fn from(d: DurationMinutes) -> i32 {
        d.0
    }
}

/* -------------------------
   Appointment
--------------------------*/

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: AppointmentId,
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    #[serde(rename = "type")]
    pub kind: AppointmentType,
    pub status: AppointmentStatus,
    pub scheduled_date_time: DateTime<Utc>,
    pub duration_minutes: DurationMinutes,
    pub reason_for_visit: Option<String>,
    pub notes: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn end(&self) -> DateTime<Utc> {
        self.scheduled_date_time + self.duration_minutes.as_duration()
    }
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub kind: AppointmentType,
    pub scheduled_date_time: DateTime<Utc>,
    pub duration_minutes: DurationMinutes,
    pub reason_for_visit: Option<String>,
    pub notes: Option<String>,
}

impl NewAppointment {
    /// Materialize the appointment in its initial SCHEDULED state.
    pub fn into_appointment(self, id: AppointmentId, now: DateTime<Utc>) -> Appointment {
        Appointment {
            id,
            patient_id: self.patient_id,
            doctor_id: self.doctor_id,
            kind: self.kind,
            status: AppointmentStatus::Scheduled,
            scheduled_date_time: self.scheduled_date_time,
            duration_minutes: self.duration_minutes,
            reason_for_visit: self.reason_for_visit,
            notes: self.notes,
            checked_in_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Field-level edits; `Some(None)` clears an optional text field.
#[derive(Debug, Clone, Default)]
pub struct AppointmentChanges {
    pub kind: Option<AppointmentType>,
    pub scheduled_date_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<DurationMinutes>,
    pub reason_for_visit: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

impl AppointmentChanges {
    pub fn moves_slot(&self) -> bool {
        self.scheduled_date_time.is_some() || self.duration_minutes.is_some()
    }

    pub fn apply(self, appt: &mut Appointment, now: DateTime<Utc>) {
        if let Some(kind) = self.kind {
            appt.kind = kind;
        }
        if let Some(at) = self.scheduled_date_time {
            appt.scheduled_date_time = at;
        }
        if let Some(d) = self.duration_minutes {
            appt.duration_minutes = d;
        }
        if let Some(reason) = self.reason_for_visit {
            appt.reason_for_visit = reason;
        }
        if let Some(notes) = self.notes {
            appt.notes = notes;
        }
        appt.updated_at = now;
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub doctor_id: Option<DoctorId>,
    pub patient_id: Option<PatientId>,
    pub status: Option<AppointmentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AppointmentFilter {
    pub fn matches(&self, appt: &Appointment) -> bool {
        self.doctor_id.as_ref().is_none_or(|d| *d == appt.doctor_id)
            && self.patient_id.as_ref().is_none_or(|p| *p == appt.patient_id)
            && self.status.is_none_or(|s| s == appt.status)
            && self.from.is_none_or(|from| appt.scheduled_date_time >= from)
            && self.to.is_none_or(|to| appt.scheduled_date_time < to)
    }
}

/* -------------------------
   Patient / Doctor
--------------------------*/

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: PatientId,
    pub first_name: String,
    pub last_name: String,
    pub email: EmailAddress,
    pub phone: Option<PhoneNumber>,
    pub date_of_birth: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    pub email: EmailAddress,
    pub phone: Option<PhoneNumber>,
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct PatientChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<EmailAddress>,
    pub phone: Option<Option<PhoneNumber>>,
    pub date_of_birth: Option<Option<NaiveDate>>,
}

impl PatientChanges {
    pub fn apply(self, patient: &mut Patient, now: DateTime<Utc>) {
        if let Some(first) = self.first_name {
            patient.first_name = first;
        }
        if let Some(last) = self.last_name {
            patient.last_name = last;
        }
        if let Some(email) = self.email {
            patient.email = email;
        }
        if let Some(phone) = self.phone {
            patient.phone = phone;
        }
        if let Some(dob) = self.date_of_birth {
            patient.date_of_birth = dob;
        }
        patient.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    pub id: DoctorId,
    pub first_name: String,
    pub last_name: String,
    pub email: EmailAddress,
    pub phone: Option<PhoneNumber>,
    pub specialty: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDoctor {
    pub first_name: String,
    pub last_name: String,
    pub email: EmailAddress,
    pub phone: Option<PhoneNumber>,
    pub specialty: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in AppointmentStatus::ALL {
            assert_eq!(status.as_str().parse::<AppointmentStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("DONE".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn only_cancelled_releases_the_slot() {
        for status in AppointmentStatus::ALL {
            assert_eq!(status.occupies_slot(), status != AppointmentStatus::Cancelled);
        }
    }

    #[test]
    fn duration_granularities() {
        for m in DurationMinutes::ALLOWED {
            assert_eq!(DurationMinutes::new(m).unwrap().minutes(), m);
        }
        for m in [0, -15, 10, 20, 240] {
            assert!(DurationMinutes::new(m).is_err());
        }
        assert!(serde_json::from_str::<DurationMinutes>("25").is_err());
    }

    #[test]
    fn appointment_type_wire_names() {
        assert_eq!(serde_json::to_string(&AppointmentType::CheckUp).unwrap(), "\"CHECK_UP\"");
        assert_eq!("FOLLOW_UP".parse::<AppointmentType>().unwrap(), AppointmentType::FollowUp);
    }
}
