// src/repo/memory.rs
//
// Process-local store used for STORAGE_BACKEND=memory and in tests.
// A single write lock covers every check-then-write sequence.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    AppointmentRepository, DoctorRepository, PatientRepository, RepoError, SEARCH_LIMIT,
};
use crate::contact::EmailAddress;
use crate::ids::{AppointmentId, DoctorId, PatientId};
use crate::models::{
    Appointment, AppointmentChanges, AppointmentFilter, AppointmentStatus, Doctor, NewAppointment,
    NewDoctor, NewPatient, Patient, PatientChanges,
};
use crate::scheduling::{conflict_error, find_conflict};

#[derive(Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    appointments: BTreeMap<AppointmentId, Appointment>,
    patients: BTreeMap<PatientId, Patient>,
    doctors: BTreeMap<DoctorId, Doctor>,
}

impl Tables {
    /// Emails are unique across every clinic user, patient or doctor.
    fn email_taken(&self, email: &EmailAddress, except_patient: Option<&PatientId>) -> bool {
        self.patients
            .values()
            .any(|p| p.email == *email && except_patient != Some(&p.id))
            || self.doctors.values().any(|d| d.email == *email)
    }

    fn doctor_calendar<'a>(
        &'a self,
        doctor_id: &'a DoctorId,
    ) -> impl Iterator<Item = &'a Appointment> {
        self.appointments
            .values()
            .filter(move |a| a.doctor_id == *doctor_id)
    }

    fn ensure_slot_free(&self, appt: &Appointment) -> Result<(), RepoError> {
        match find_conflict(
            self.doctor_calendar(&appt.doctor_id),
            appt.scheduled_date_time,
            appt.duration_minutes,
            Some(&appt.id),
        ) {
            Some(existing) => Err(conflict_error(existing)),
            None => Ok(()),
        }
    }

    fn transition(
        &mut self,
        id: &AppointmentId,
        status: AppointmentStatus,
        check_in_at: Option<DateTime<Utc>>,
    ) -> Result<Appointment, RepoError> {
        let current = self
            .appointments
            .get(id)
            .ok_or_else(|| RepoError::not_found("appointment", id))?;

        let mut next = current.clone();
        next.status = status;
        if next.checked_in_at.is_none() {
            next.checked_in_at = check_in_at;
        }
        next.updated_at = Utc::now();

        if !current.status.occupies_slot() && status.occupies_slot() {
            self.ensure_slot_free(&next)?;
        }

        self.appointments.insert(id.clone(), next.clone());
        Ok(next)
    }
}

fn duplicate_email() -> RepoError {
    RepoError::Conflict {
        message: "unique constraint violated: clinic_user_email_key".into(),
        details: None,
    }
}

#[async_trait]
impl AppointmentRepository for MemoryRepository {
    async fn get(&self, id: &AppointmentId) -> Result<Appointment, RepoError> {
        self.tables
            .read()
            .await
            .appointments
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("appointment", id))
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, RepoError> {
        let tables = self.tables.read().await;
        let mut out: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.scheduled_date_time
                .cmp(&b.scheduled_date_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(out)
    }

    async fn active_for_doctor_before(
        &self,
        doctor_id: &DoctorId,
        before: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables
            .doctor_calendar(doctor_id)
            .filter(|a| a.status.occupies_slot() && a.scheduled_date_time < before)
            .cloned()
            .collect())
    }

    async fn create(&self, new: NewAppointment) -> Result<Appointment, RepoError> {
        let mut tables = self.tables.write().await;

        if !tables.patients.contains_key(&new.patient_id) {
            return Err(RepoError::Validation(format!(
                "patient {} does not exist",
                new.patient_id
            )));
        }
        if !tables.doctors.contains_key(&new.doctor_id) {
            return Err(RepoError::Validation(format!(
                "doctor {} does not exist",
                new.doctor_id
            )));
        }

        let appt = new.into_appointment(AppointmentId::generate(), Utc::now());
        tables.ensure_slot_free(&appt)?;

        tables.appointments.insert(appt.id.clone(), appt.clone());
        Ok(appt)
    }

    async fn update(
        &self,
        id: &AppointmentId,
        changes: AppointmentChanges,
    ) -> Result<Appointment, RepoError> {
        let mut tables = self.tables.write().await;
        let mut next = tables
            .appointments
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("appointment", id))?;

        let moves = changes.moves_slot();
        changes.apply(&mut next, Utc::now());
        if moves && next.status.occupies_slot() {
            tables.ensure_slot_free(&next)?;
        }

        tables.appointments.insert(id.clone(), next.clone());
        Ok(next)
    }

    async fn set_status(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Appointment, RepoError> {
        self.tables.write().await.transition(id, status, None)
    }

    async fn check_in(&self, id: &AppointmentId) -> Result<Appointment, RepoError> {
        self.tables
            .write()
            .await
            .transition(id, AppointmentStatus::InProgress, Some(Utc::now()))
    }

    async fn delete(&self, id: &AppointmentId) -> Result<(), RepoError> {
        self.tables
            .write()
            .await
            .appointments
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepoError::not_found("appointment", id))
    }
}

#[async_trait]
impl PatientRepository for MemoryRepository {
    async fn get(&self, id: &PatientId) -> Result<Patient, RepoError> {
        self.tables
            .read()
            .await
            .patients
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("patient", id))
    }

    async fn search(&self, query: Option<&str>) -> Result<Vec<Patient>, RepoError> {
        let tables = self.tables.read().await;
        let needle = query.map(str::to_lowercase);

        let mut out: Vec<Patient> = tables
            .patients
            .values()
            .filter(|p| match &needle {
                None => true,
                Some(n) => {
                    p.first_name.to_lowercase().contains(n)
                        || p.last_name.to_lowercase().contains(n)
                        || p.email.as_str().contains(n)
                }
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        out.truncate(SEARCH_LIMIT);
        Ok(out)
    }

    async fn create(&self, new: NewPatient) -> Result<Patient, RepoError> {
        let mut tables = self.tables.write().await;
        if tables.email_taken(&new.email, None) {
            return Err(duplicate_email());
        }

        let now = Utc::now();
        let patient = Patient {
            id: PatientId::generate(),
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            phone: new.phone,
            date_of_birth: new.date_of_birth,
            created_at: now,
            updated_at: now,
        };
        tables.patients.insert(patient.id.clone(), patient.clone());
        Ok(patient)
    }

    async fn update(&self, id: &PatientId, changes: PatientChanges) -> Result<Patient, RepoError> {
        let mut tables = self.tables.write().await;
        let mut next = tables
            .patients
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("patient", id))?;

        if let Some(email) = &changes.email {
            if tables.email_taken(email, Some(id)) {
                return Err(duplicate_email());
            }
        }

        changes.apply(&mut next, Utc::now());
        tables.patients.insert(id.clone(), next.clone());
        Ok(next)
    }
}

#[async_trait]
impl DoctorRepository for MemoryRepository {
    async fn get(&self, id: &DoctorId) -> Result<Doctor, RepoError> {
        self.tables
            .read()
            .await
            .doctors
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("doctor", id))
    }

    async fn list(&self) -> Result<Vec<Doctor>, RepoError> {
        let tables = self.tables.read().await;
        let mut out: Vec<Doctor> = tables.doctors.values().cloned().collect();
        out.sort_by(|a, b| {
            a.last_name
                .cmp(&b.last_name)
                .then_with(|| a.first_name.cmp(&b.first_name))
        });
        Ok(out)
    }

    async fn create(&self, new: NewDoctor) -> Result<Doctor, RepoError> {
        let mut tables = self.tables.write().await;
        if tables.email_taken(&new.email, None) {
            return Err(duplicate_email());
        }

        let now = Utc::now();
        let doctor = Doctor {
            id: DoctorId::generate(),
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            phone: new.phone,
            specialty: new.specialty,
            created_at: now,
            updated_at: now,
        };
        tables.doctors.insert(doctor.id.clone(), doctor.clone());
        Ok(doctor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentType, DurationMinutes};
    use crate::scheduling::has_conflict;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    fn mins(m: i32) -> DurationMinutes {
        DurationMinutes::new(m).unwrap()
    }

    async fn seed(repo: &MemoryRepository) -> (PatientId, DoctorId) {
        let patient = PatientRepository::create(
            repo,
            NewPatient {
                first_name: "Grace".into(),
                last_name: "Hopper".into(),
                email: EmailAddress::parse("grace@example.org").unwrap(),
                phone: None,
                date_of_birth: None,
            },
        )
        .await
        .unwrap();
        let doctor = DoctorRepository::create(
            repo,
            NewDoctor {
                first_name: "John".into(),
                last_name: "Watson".into(),
                email: EmailAddress::parse("watson@example.org").unwrap(),
                phone: None,
                specialty: Some("General practice".into()),
            },
        )
        .await
        .unwrap();
        (patient.id, doctor.id)
    }

    fn booking(
        patient: &PatientId,
        doctor: &DoctorId,
        start: DateTime<Utc>,
        m: i32,
    ) -> NewAppointment {
        NewAppointment {
            patient_id: patient.clone(),
            doctor_id: doctor.clone(),
            kind: AppointmentType::CheckUp,
            scheduled_date_time: start,
            duration_minutes: mins(m),
            reason_for_visit: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn booking_at_nine_thirty_fits_after_nine_oclock() {
        let repo = MemoryRepository::default();
        let (p, d) = seed(&repo).await;

        let first = AppointmentRepository::create(&repo, booking(&p, &d, at(9, 0), 30))
            .await
            .unwrap();
        assert_eq!(first.status, AppointmentStatus::Scheduled);

        assert!(!has_conflict(&repo, &d, at(9, 30), mins(30)).await);
        assert!(has_conflict(&repo, &d, at(9, 15), mins(30)).await);

        AppointmentRepository::create(&repo, booking(&p, &d, at(9, 30), 30))
            .await
            .unwrap();
        let err = AppointmentRepository::create(&repo, booking(&p, &d, at(9, 15), 30))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Conflict { .. }));
    }

    #[tokio::test]
    async fn other_doctors_calendars_are_independent() {
        let repo = MemoryRepository::default();
        let (p, d) = seed(&repo).await;
        let other = DoctorRepository::create(
            &repo,
            NewDoctor {
                first_name: "Leonard".into(),
                last_name: "McCoy".into(),
                email: EmailAddress::parse("mccoy@example.org").unwrap(),
                phone: None,
                specialty: None,
            },
        )
        .await
        .unwrap();

        AppointmentRepository::create(&repo, booking(&p, &d, at(9, 0), 60))
            .await
            .unwrap();
        AppointmentRepository::create(&repo, booking(&p, &other.id, at(9, 0), 60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancelling_frees_the_slot_and_reactivation_is_guarded() {
        let repo = MemoryRepository::default();
        let (p, d) = seed(&repo).await;

        let first = AppointmentRepository::create(&repo, booking(&p, &d, at(9, 0), 30))
            .await
            .unwrap();
        repo.set_status(&first.id, AppointmentStatus::Cancelled)
            .await
            .unwrap();
        assert!(!has_conflict(&repo, &d, at(9, 0), mins(30)).await);

        AppointmentRepository::create(&repo, booking(&p, &d, at(9, 0), 30))
            .await
            .unwrap();

        let err = repo
            .set_status(&first.id, AppointmentStatus::Scheduled)
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Conflict { .. }));
        assert_eq!(
            AppointmentRepository::get(&repo, &first.id).await.unwrap().status,
            AppointmentStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn any_status_can_follow_any_other() {
        let repo = MemoryRepository::default();
        let (p, d) = seed(&repo).await;
        let appt = AppointmentRepository::create(&repo, booking(&p, &d, at(9, 0), 30))
            .await
            .unwrap();

        for from in AppointmentStatus::ALL {
            for to in AppointmentStatus::ALL {
                repo.set_status(&appt.id, from).await.unwrap();
                let updated = repo.set_status(&appt.id, to).await.unwrap();
                assert_eq!(updated.status, to, "{from} -> {to}");
            }
        }
    }

    #[tokio::test]
    async fn check_in_stamps_once() {
        let repo = MemoryRepository::default();
        let (p, d) = seed(&repo).await;
        let appt = AppointmentRepository::create(&repo, booking(&p, &d, at(9, 0), 30))
            .await
            .unwrap();

        let first = repo.check_in(&appt.id).await.unwrap();
        assert_eq!(first.status, AppointmentStatus::InProgress);
        let stamped = first.checked_in_at.unwrap();

        let again = repo.check_in(&appt.id).await.unwrap();
        assert_eq!(again.checked_in_at, Some(stamped));
    }

    #[tokio::test]
    async fn rescheduling_excludes_itself_but_not_neighbours() {
        let repo = MemoryRepository::default();
        let (p, d) = seed(&repo).await;
        let a = AppointmentRepository::create(&repo, booking(&p, &d, at(9, 0), 30))
            .await
            .unwrap();
        AppointmentRepository::create(&repo, booking(&p, &d, at(10, 0), 30))
            .await
            .unwrap();

        let stretched = AppointmentRepository::update(
            &repo,
            &a.id,
            AppointmentChanges {
                duration_minutes: Some(mins(60)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(stretched.end(), at(10, 0));

        let err = AppointmentRepository::update(
            &repo,
            &a.id,
            AppointmentChanges {
                scheduled_date_time: Some(at(9, 45)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RepoError::Conflict { .. }));
    }

    #[tokio::test]
    async fn unknown_references_are_validation_errors() {
        let repo = MemoryRepository::default();
        let (p, _) = seed(&repo).await;
        let ghost = DoctorId::parse("doctor_ghost").unwrap();
        let err = AppointmentRepository::create(&repo, booking(&p, &ghost, at(9, 0), 30))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
    }

    #[tokio::test]
    async fn duplicate_emails_conflict() {
        let repo = MemoryRepository::default();
        seed(&repo).await;
        let err = PatientRepository::create(
            &repo,
            NewPatient {
                first_name: "Other".into(),
                last_name: "Person".into(),
                email: EmailAddress::parse("WATSON@example.org").unwrap(),
                phone: None,
                date_of_birth: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RepoError::Conflict { .. }));
    }

    #[tokio::test]
    async fn concurrent_bookings_for_one_slot_admit_exactly_one() {
        let repo = Arc::new(MemoryRepository::default());
        let (p, d) = seed(&repo).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            let req = booking(&p, &d, at(14, 0), 45);
            handles.push(tokio::spawn(async move {
                AppointmentRepository::create(repo.as_ref(), req).await
            }));
        }

        let mut booked = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                booked += 1;
            }
        }
        assert_eq!(booked, 1);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let repo = MemoryRepository::default();
        let (p, d) = seed(&repo).await;
        let appt = AppointmentRepository::create(&repo, booking(&p, &d, at(9, 0), 30))
            .await
            .unwrap();
        repo.delete(&appt.id).await.unwrap();
        assert!(matches!(
            AppointmentRepository::get(&repo, &appt.id).await,
            Err(RepoError::NotFound(_))
        ));
        assert!(matches!(repo.delete(&appt.id).await, Err(RepoError::NotFound(_))));
    }
}
