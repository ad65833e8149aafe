// src/repo/mod.rs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

use crate::contact::{EmailAddress, PhoneNumber};
use crate::ids::{AppointmentId, DoctorId, PatientId};
use crate::models::{
    Appointment, AppointmentChanges, AppointmentFilter, AppointmentStatus, Doctor,
    DurationMinutes, NewAppointment, NewDoctor, NewPatient, Patient, PatientChanges,
};

pub mod memory;
pub mod postgres;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    Conflict {
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("{0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(String),
}

impl RepoError {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        RepoError::NotFound(format!("{entity} {id} not found"))
    }
}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound("record not found".into()),
            sqlx::Error::Database(db) => match db.kind() {
                ErrorKind::UniqueViolation => RepoError::Conflict {
                    message: format!(
                        "unique constraint violated: {}",
                        db.constraint().unwrap_or("unknown")
                    ),
                    details: None,
                },
                ErrorKind::ForeignKeyViolation => RepoError::Validation(format!(
                    "referenced record does not exist ({})",
                    db.constraint().unwrap_or("unknown")
                )),
                ErrorKind::CheckViolation | ErrorKind::NotNullViolation => {
                    RepoError::Validation(db.message().to_string())
                }
                _ => RepoError::Database(e.to_string()),
            },
            _ => RepoError::Database(e.to_string()),
        }
    }
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn get(&self, id: &AppointmentId) -> Result<Appointment, RepoError>;

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, RepoError>;

    /// Slot-holding appointments of `doctor_id` starting before `before`.
    async fn active_for_doctor_before(
        &self,
        doctor_id: &DoctorId,
        before: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, RepoError>;

    /// Check-and-reserve: fails with `Conflict` if the slot is taken.
    async fn create(&self, new: NewAppointment) -> Result<Appointment, RepoError>;

    /// Applies `changes`, re-checking the slot if the appointment moves.
    async fn update(
        &self,
        id: &AppointmentId,
        changes: AppointmentChanges,
    ) -> Result<Appointment, RepoError>;

    /// Any status may replace any other. Reactivating a cancelled
    /// appointment re-checks its slot.
    async fn set_status(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Appointment, RepoError>;

    /// IN_PROGRESS plus a first check-in timestamp.
    async fn check_in(&self, id: &AppointmentId) -> Result<Appointment, RepoError>;

    async fn delete(&self, id: &AppointmentId) -> Result<(), RepoError>;
}

#[async_trait]
pub trait PatientRepository: Send + Sync {
    async fn get(&self, id: &PatientId) -> Result<Patient, RepoError>;

    async fn search(&self, query: Option<&str>) -> Result<Vec<Patient>, RepoError>;

    async fn create(&self, new: NewPatient) -> Result<Patient, RepoError>;

    async fn update(&self, id: &PatientId, changes: PatientChanges) -> Result<Patient, RepoError>;
}

#[async_trait]
pub trait DoctorRepository: Send + Sync {
    async fn get(&self, id: &DoctorId) -> Result<Doctor, RepoError>;

    async fn list(&self) -> Result<Vec<Doctor>, RepoError>;

    async fn create(&self, new: NewDoctor) -> Result<Doctor, RepoError>;
}

pub const SEARCH_LIMIT: usize = 50;

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct AppointmentRow {
    pub appointment_id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub appointment_type: String,
    pub status: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub reason_for_visit: Option<String>,
    pub notes: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn corrupt(what: &str, e: impl std::fmt::Display) -> RepoError {
    RepoError::Database(format!("corrupt {what} in stored row: {e}"))
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = RepoError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            id: AppointmentId::parse(&row.appointment_id)
                .map_err(|e| corrupt("appointment_id", e))?,
            patient_id: PatientId::parse(&row.patient_id).map_err(|e| corrupt("patient_id", e))?,
            doctor_id: DoctorId::parse(&row.doctor_id).map_err(|e| corrupt("doctor_id", e))?,
            kind: row.appointment_type.parse().map_err(|e| corrupt("appointment_type", e))?,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            scheduled_date_time: row.scheduled_at,
            duration_minutes: DurationMinutes::new(row.duration_minutes)
                .map_err(|e| corrupt("duration_minutes", e))?,
            reason_for_visit: row.reason_for_visit,
            notes: row.notes,
            checked_in_at: row.checked_in_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&Appointment> for AppointmentRow {
    fn from(a: &Appointment) -> Self {
        AppointmentRow {
            appointment_id: a.id.suffix().to_string(),
            patient_id: a.patient_id.suffix().to_string(),
            doctor_id: a.doctor_id.suffix().to_string(),
            appointment_type: a.kind.as_str().to_string(),
            status: a.status.as_str().to_string(),
            scheduled_at: a.scheduled_date_time,
            duration_minutes: a.duration_minutes.minutes(),
            reason_for_visit: a.reason_for_visit.clone(),
            notes: a.notes.clone(),
            checked_in_at: a.checked_in_at,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

/// `clinic_user` joined with `patient`.
#[derive(Debug, Clone, FromRow)]
pub struct PatientRow {
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PatientRow> for Patient {
    type Error = RepoError;

    fn try_from(row: PatientRow) -> Result<Self, Self::Error> {
        Ok(Patient {
            id: PatientId::parse(&row.patient_id).map_err(|e| corrupt("patient_id", e))?,
            first_name: row.first_name,
            last_name: row.last_name,
            email: EmailAddress::parse(&row.email).map_err(|e| corrupt("email", e))?,
            phone: row
                .phone
                .as_deref()
                .map(PhoneNumber::parse)
                .transpose()
                .map_err(|e| corrupt("phone", e))?,
            date_of_birth: row.date_of_birth,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// `clinic_user` joined with `doctor`.
#[derive(Debug, Clone, FromRow)]
pub struct DoctorRow {
    pub doctor_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub specialty: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DoctorRow> for Doctor {
    type Error = RepoError;

    fn try_from(row: DoctorRow) -> Result<Self, Self::Error> {
        Ok(Doctor {
            id: DoctorId::parse(&row.doctor_id).map_err(|e| corrupt("doctor_id", e))?,
            first_name: row.first_name,
            last_name: row.last_name,
            email: EmailAddress::parse(&row.email).map_err(|e| corrupt("email", e))?,
            phone: row
                .phone
                .as_deref()
                .map(PhoneNumber::parse)
                .transpose()
                .map_err(|e| corrupt("phone", e))?,
            specialty: row.specialty,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
