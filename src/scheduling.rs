// src/scheduling.rs
//
// Doctor calendar rules. Intervals are half-open: [start, start + duration).

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::ids::{AppointmentId, DoctorId};
use crate::models::{Appointment, DurationMinutes};
use crate::repo::{AppointmentRepository, RepoError};

pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// First appointment in `candidates` that still occupies its slot and
/// overlaps the proposed interval. `exclude` skips the appointment being
/// moved so it never conflicts with itself.
pub fn find_conflict<'a>(
    candidates: impl IntoIterator<Item = &'a Appointment>,
    start: DateTime<Utc>,
    duration: DurationMinutes,
    exclude: Option<&AppointmentId>,
) -> Option<&'a Appointment> {
    let end = start + duration.as_duration();
    candidates.into_iter().find(|existing| {
        existing.status.occupies_slot()
            && exclude.is_none_or(|id| *id != existing.id)
            && overlaps(existing.scheduled_date_time, existing.end(), start, end)
    })
}

pub fn conflict_error(existing: &Appointment) -> RepoError {
    RepoError::Conflict {
        message: format!(
            "doctor {} already has appointment {} from {} to {}",
            existing.doctor_id,
            existing.id,
            existing.scheduled_date_time.to_rfc3339(),
            existing.end().to_rfc3339()
        ),
        details: Some(json!({
            "conflictingAppointmentId": existing.id,
            "scheduledDateTime": existing.scheduled_date_time,
            "endDateTime": existing.end(),
        })),
    }
}

/// Read-only availability check. A failed lookup reports the slot as taken.
pub async fn has_conflict(
    repo: &dyn AppointmentRepository,
    doctor_id: &DoctorId,
    start: DateTime<Utc>,
    duration: DurationMinutes,
) -> bool {
    let end = start + duration.as_duration();
    match repo.active_for_doctor_before(doctor_id, end).await {
        Ok(candidates) => {
            let conflict = find_conflict(&candidates, start, duration, None);
            if let Some(existing) = conflict {
                tracing::debug!(%doctor_id, conflicting = %existing.id, "slot taken");
            }
            conflict.is_some()
        }
        Err(e) => {
            tracing::warn!(
                %doctor_id,
                error = %e,
                "conflict lookup failed; treating slot as taken"
            );
            true
        }
    }
}
