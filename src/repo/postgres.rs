// src/repo/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgExecutor, PgPool};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{
    AppointmentRepository, AppointmentRow, DoctorRepository, DoctorRow, PatientRepository,
    PatientRow, RepoError, SEARCH_LIMIT,
};
use crate::ids::{AppointmentId, DoctorId, PatientId};
use crate::models::{
    Appointment, AppointmentChanges, AppointmentFilter, AppointmentStatus, Doctor, NewAppointment,
    NewDoctor, NewPatient, Patient, PatientChanges,
};
use crate::scheduling::{conflict_error, find_conflict};

pub struct PgRepository {
    db: PgPool,
}

impl PgRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const SELECT_APPOINTMENT: &str = r#"
    SELECT
      appointment_id,
      patient_id,
      doctor_id,
      appointment_type,
      status,
      scheduled_at,
      duration_minutes,
      reason_for_visit,
      notes,
      checked_in_at,
      created_at,
      updated_at
    FROM appointment
"#;

const RETURNING_APPOINTMENT: &str = r#"
    RETURNING appointment_id, patient_id, doctor_id, appointment_type, status, scheduled_at,
              duration_minutes, reason_for_visit, notes, checked_in_at, created_at, updated_at
"#;

const SELECT_PATIENT: &str = r#"
    SELECT p.patient_id, u.first_name, u.last_name, u.email, u.phone,
           p.date_of_birth, p.created_at, p.updated_at
    FROM patient p
    JOIN clinic_user u ON u.user_id = p.user_id
"#;

const SELECT_DOCTOR: &str = r#"
    SELECT d.doctor_id, u.first_name, u.last_name, u.email, u.phone,
           d.specialty, d.created_at, d.updated_at
    FROM doctor d
    JOIN clinic_user u ON u.user_id = d.user_id
"#;

/// `ILIKE` pattern matching `needle` literally anywhere in the value.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/* ============================================================
   Appointment helpers
   ============================================================ */

/// Serializes every calendar write for one doctor until the transaction ends.
async fn lock_doctor_calendar(
    tx: &mut Transaction<'_, Postgres>,
    doctor_id: &DoctorId,
) -> Result<(), RepoError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(doctor_id.suffix())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn calendar_before<'e>(
    ex: impl PgExecutor<'e>,
    doctor_id: &DoctorId,
    before: DateTime<Utc>,
) -> Result<Vec<Appointment>, RepoError> {
    let sql = format!(
        "{SELECT_APPOINTMENT}
        WHERE doctor_id = $1
          AND status <> 'CANCELLED'
          AND scheduled_at < $2
        ORDER BY scheduled_at ASC"
    );
    let rows = sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(doctor_id.suffix())
        .bind(before)
        .fetch_all(ex)
        .await?;

    rows.into_iter().map(Appointment::try_from).collect()
}

async fn ensure_slot_free(
    tx: &mut Transaction<'_, Postgres>,
    appt: &Appointment,
    exclude: Option<&AppointmentId>,
) -> Result<(), RepoError> {
    lock_doctor_calendar(tx, &appt.doctor_id).await?;
    let calendar = calendar_before(&mut **tx, &appt.doctor_id, appt.end()).await?;
    match find_conflict(&calendar, appt.scheduled_date_time, appt.duration_minutes, exclude) {
        Some(existing) => {
            tracing::warn!(
                appointment_id = %appt.id,
                conflicting = %existing.id,
                "slot already taken"
            );
            Err(conflict_error(existing))
        }
        None => Ok(()),
    }
}

async fn fetch_appointment_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: &AppointmentId,
) -> Result<Appointment, RepoError> {
    let sql = format!("{SELECT_APPOINTMENT} WHERE appointment_id = $1 FOR UPDATE");
    let row = sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(id.suffix())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| RepoError::not_found("appointment", id))?;

    Appointment::try_from(row)
}

async fn save_appointment(
    tx: &mut Transaction<'_, Postgres>,
    appt: &Appointment,
) -> Result<Appointment, RepoError> {
    let row = AppointmentRow::from(appt);
    let sql = format!(
        "UPDATE appointment
        SET appointment_type = $2,
            status = $3,
            scheduled_at = $4,
            duration_minutes = $5,
            reason_for_visit = $6,
            notes = $7,
            checked_in_at = $8,
            updated_at = now()
        WHERE appointment_id = $1
        {RETURNING_APPOINTMENT}"
    );
    let saved = sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(&row.appointment_id)
        .bind(&row.appointment_type)
        .bind(&row.status)
        .bind(row.scheduled_at)
        .bind(row.duration_minutes)
        .bind(&row.reason_for_visit)
        .bind(&row.notes)
        .bind(row.checked_in_at)
        .fetch_one(&mut **tx)
        .await?;

    Appointment::try_from(saved)
}

impl PgRepository {
    async fn transition(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
        check_in_at: Option<DateTime<Utc>>,
    ) -> Result<Appointment, RepoError> {
        let mut tx = self.db.begin().await?;
        let current = fetch_appointment_for_update(&mut tx, id).await?;

        let mut next = current.clone();
        next.status = status;
        if next.checked_in_at.is_none() {
            next.checked_in_at = check_in_at;
        }

        if !current.status.occupies_slot() && status.occupies_slot() {
            ensure_slot_free(&mut tx, &next, Some(id)).await?;
        }

        let saved = save_appointment(&mut tx, &next).await?;
        tx.commit().await?;

        tracing::info!(
            appointment_id = %id,
            from = %current.status,
            to = %saved.status,
            "appointment status changed"
        );
        Ok(saved)
    }
}

#[async_trait]
impl AppointmentRepository for PgRepository {
    async fn get(&self, id: &AppointmentId) -> Result<Appointment, RepoError> {
        let sql = format!("{SELECT_APPOINTMENT} WHERE appointment_id = $1");
        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(id.suffix())
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| RepoError::not_found("appointment", id))?;

        Appointment::try_from(row)
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, RepoError> {
        let sql = format!(
            "{SELECT_APPOINTMENT}
            WHERE ($1::text IS NULL OR doctor_id = $1)
              AND ($2::text IS NULL OR patient_id = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::timestamptz IS NULL OR scheduled_at >= $4)
              AND ($5::timestamptz IS NULL OR scheduled_at <  $5)
            ORDER BY scheduled_at ASC, appointment_id ASC"
        );
        let rows = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(filter.doctor_id.as_ref().map(|d| d.suffix()))
            .bind(filter.patient_id.as_ref().map(|p| p.suffix()))
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.from)
            .bind(filter.to)
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(Appointment::try_from).collect()
    }

    async fn active_for_doctor_before(
        &self,
        doctor_id: &DoctorId,
        before: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, RepoError> {
        calendar_before(&self.db, doctor_id, before).await
    }

    async fn create(&self, new: NewAppointment) -> Result<Appointment, RepoError> {
        let appt = new.into_appointment(AppointmentId::generate(), Utc::now());

        let mut tx = self.db.begin().await?;
        ensure_slot_free(&mut tx, &appt, None).await?;

        let row = AppointmentRow::from(&appt);
        let sql = format!(
            "INSERT INTO appointment (
              appointment_id,
              patient_id,
              doctor_id,
              appointment_type,
              status,
              scheduled_at,
              duration_minutes,
              reason_for_visit,
              notes,
              created_at,
              updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9, now(), now())
            {RETURNING_APPOINTMENT}"
        );
        let inserted = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(&row.appointment_id)
            .bind(&row.patient_id)
            .bind(&row.doctor_id)
            .bind(&row.appointment_type)
            .bind(&row.status)
            .bind(row.scheduled_at)
            .bind(row.duration_minutes)
            .bind(&row.reason_for_visit)
            .bind(&row.notes)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        let created = Appointment::try_from(inserted)?;
        tracing::info!(
            appointment_id = %created.id,
            doctor_id = %created.doctor_id,
            start = %created.scheduled_date_time,
            minutes = created.duration_minutes.minutes(),
            "appointment booked"
        );
        Ok(created)
    }

    async fn update(
        &self,
        id: &AppointmentId,
        changes: AppointmentChanges,
    ) -> Result<Appointment, RepoError> {
        let mut tx = self.db.begin().await?;
        let mut next = fetch_appointment_for_update(&mut tx, id).await?;

        let moves = changes.moves_slot();
        changes.apply(&mut next, Utc::now());
        if moves && next.status.occupies_slot() {
            ensure_slot_free(&mut tx, &next, Some(id)).await?;
        }

        let saved = save_appointment(&mut tx, &next).await?;
        tx.commit().await?;

        tracing::info!(appointment_id = %id, "appointment updated");
        Ok(saved)
    }

    async fn set_status(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Appointment, RepoError> {
        self.transition(id, status, None).await
    }

    async fn check_in(&self, id: &AppointmentId) -> Result<Appointment, RepoError> {
        self.transition(id, AppointmentStatus::InProgress, Some(Utc::now()))
            .await
    }

    async fn delete(&self, id: &AppointmentId) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM appointment WHERE appointment_id = $1")
            .bind(id.suffix())
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::not_found("appointment", id));
        }
        tracing::info!(appointment_id = %id, "appointment deleted");
        Ok(())
    }
}

/* ============================================================
   Patients
   ============================================================ */

async fn fetch_patient<'e>(ex: impl PgExecutor<'e>, id: &PatientId) -> Result<Patient, RepoError> {
    let sql = format!("{SELECT_PATIENT} WHERE p.patient_id = $1");
    let row = sqlx::query_as::<_, PatientRow>(&sql)
        .bind(id.suffix())
        .fetch_optional(ex)
        .await?
        .ok_or_else(|| RepoError::not_found("patient", id))?;

    Patient::try_from(row)
}

#[async_trait]
impl PatientRepository for PgRepository {
    async fn get(&self, id: &PatientId) -> Result<Patient, RepoError> {
        fetch_patient(&self.db, id).await
    }

    async fn search(&self, query: Option<&str>) -> Result<Vec<Patient>, RepoError> {
        let like = query.map(contains_pattern);
        let sql = format!(
            "{SELECT_PATIENT}
            WHERE $1::text IS NULL
               OR u.first_name ILIKE $1 ESCAPE '\\'
               OR u.last_name ILIKE $1 ESCAPE '\\'
               OR u.email ILIKE $1 ESCAPE '\\'
            ORDER BY p.created_at DESC
            LIMIT $2"
        );
        let rows = sqlx::query_as::<_, PatientRow>(&sql)
            .bind(like)
            .bind(SEARCH_LIMIT as i64)
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(Patient::try_from).collect()
    }

    async fn create(&self, new: NewPatient) -> Result<Patient, RepoError> {
        let id = PatientId::generate();
        let user_id = Uuid::new_v4();

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO clinic_user (user_id, first_name, last_name, email, phone)
            VALUES ($1,$2,$3,$4,$5)
            "#,
        )
        .bind(user_id)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(new.email.as_str())
        .bind(new.phone.as_ref().map(|p| p.as_str()))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO patient (patient_id, user_id, date_of_birth)
            VALUES ($1,$2,$3)
            "#,
        )
        .bind(id.suffix())
        .bind(user_id)
        .bind(new.date_of_birth)
        .execute(&mut *tx)
        .await?;

        let patient = fetch_patient(&mut *tx, &id).await?;
        tx.commit().await?;

        tracing::info!(patient_id = %patient.id, "patient created");
        Ok(patient)
    }

    async fn update(&self, id: &PatientId, changes: PatientChanges) -> Result<Patient, RepoError> {
        let mut tx = self.db.begin().await?;

        let user_id: Uuid = sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM patient
            WHERE patient_id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.suffix())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepoError::not_found("patient", id))?;

        let mut next = fetch_patient(&mut *tx, id).await?;
        changes.apply(&mut next, Utc::now());

        sqlx::query(
            r#"
            UPDATE clinic_user
            SET first_name = $2,
                last_name = $3,
                email = $4,
                phone = $5,
                updated_at = now()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(&next.first_name)
        .bind(&next.last_name)
        .bind(next.email.as_str())
        .bind(next.phone.as_ref().map(|p| p.as_str()))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE patient
            SET date_of_birth = $2,
                updated_at = now()
            WHERE patient_id = $1
            "#,
        )
        .bind(id.suffix())
        .bind(next.date_of_birth)
        .execute(&mut *tx)
        .await?;

        let saved = fetch_patient(&mut *tx, id).await?;
        tx.commit().await?;

        tracing::info!(patient_id = %id, "patient updated");
        Ok(saved)
    }
}

/* ============================================================
   Doctors
   ============================================================ */

async fn fetch_doctor<'e>(ex: impl PgExecutor<'e>, id: &DoctorId) -> Result<Doctor, RepoError> {
    let sql = format!("{SELECT_DOCTOR} WHERE d.doctor_id = $1");
    let row = sqlx::query_as::<_, DoctorRow>(&sql)
        .bind(id.suffix())
        .fetch_optional(ex)
        .await?
        .ok_or_else(|| RepoError::not_found("doctor", id))?;

    Doctor::try_from(row)
}

#[async_trait]
impl DoctorRepository for PgRepository {
    async fn get(&self, id: &DoctorId) -> Result<Doctor, RepoError> {
        fetch_doctor(&self.db, id).await
    }

    async fn list(&self) -> Result<Vec<Doctor>, RepoError> {
        let sql = format!("{SELECT_DOCTOR} ORDER BY u.last_name ASC, u.first_name ASC");
        let rows = sqlx::query_as::<_, DoctorRow>(&sql)
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(Doctor::try_from).collect()
    }

    async fn create(&self, new: NewDoctor) -> Result<Doctor, RepoError> {
        let id = DoctorId::generate();
        let user_id = Uuid::new_v4();

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO clinic_user (user_id, first_name, last_name, email, phone)
            VALUES ($1,$2,$3,$4,$5)
            "#,
        )
        .bind(user_id)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(new.email.as_str())
        .bind(new.phone.as_ref().map(|p| p.as_str()))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO doctor (doctor_id, user_id, specialty)
            VALUES ($1,$2,$3)
            "#,
        )
        .bind(id.suffix())
        .bind(user_id)
        .bind(&new.specialty)
        .execute(&mut *tx)
        .await?;

        let doctor = fetch_doctor(&mut *tx, &id).await?;
        tx.commit().await?;

        tracing::info!(doctor_id = %doctor.id, "doctor created");
        Ok(doctor)
    }
}
