// src/routes/appointment_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{clean_text, deserialize_double_option, ApiJson, ApiOk, ApiPath, ApiQuery};
use crate::{
    error::ApiError,
    ids::{AppointmentId, DoctorId, PatientId},
    models::{
        AppState, Appointment, AppointmentChanges, AppointmentFilter, AppointmentStatus,
        AppointmentType, DurationMinutes, NewAppointment,
    },
    scheduling,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/conflicts", get(check_conflict))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment)
                .put(replace_appointment)
                .patch(patch_appointment)
                .delete(delete_appointment),
        )
        .route("/appointments/{appointment_id}/status", patch(set_status))
        .route("/appointments/{appointment_id}/check-in", post(check_in))
}

/* ============================================================
   Request DTOs
   ============================================================ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    #[serde(rename = "type")]
    pub kind: AppointmentType,
    pub scheduled_date_time: DateTime<Utc>,
    pub duration_minutes: DurationMinutes,
    pub reason_for_visit: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceAppointmentRequest {
    #[serde(rename = "type")]
    pub kind: AppointmentType,
    pub scheduled_date_time: DateTime<Utc>,
    pub duration_minutes: DurationMinutes,
    pub reason_for_visit: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchAppointmentRequest {
    #[serde(rename = "type")]
    pub kind: Option<AppointmentType>,
    pub scheduled_date_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<DurationMinutes>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub reason_for_visit: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub doctor_id: Option<DoctorId>,
    pub patient_id: Option<PatientId>,
    pub status: Option<AppointmentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictQuery {
    pub doctor_id: DoctorId,
    pub start: DateTime<Utc>,
    pub duration_minutes: i32,
}

/* ============================================================
   Response DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictData {
    pub has_conflict: bool,
}

#[derive(Debug, Serialize)]
pub struct DeletedData {
    pub id: AppointmentId,
    pub deleted: bool,
}

fn parse_appointment_id(raw: &str) -> Result<AppointmentId, ApiError> {
    Ok(AppointmentId::parse(raw)?)
}

/* ============================================================
   GET /appointments
   ============================================================ */

pub async fn list_appointments(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<ListQuery>,
) -> Result<Json<ApiOk<Vec<Appointment>>>, ApiError> {
    if let (Some(from), Some(to)) = (q.from, q.to) {
        if to <= from {
            return Err(ApiError::validation("to must be after from"));
        }
    }

    let filter = AppointmentFilter {
        doctor_id: q.doctor_id,
        patient_id: q.patient_id,
        status: q.status,
        from: q.from,
        to: q.to,
    };
    let rows = state.appointments.list(&filter).await?;
    Ok(ApiOk::new(rows))
}

/* ============================================================
   GET /appointments/conflicts
   ============================================================ */

pub async fn check_conflict(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<ConflictQuery>,
) -> Result<Json<ApiOk<ConflictData>>, ApiError> {
    let duration = DurationMinutes::new(q.duration_minutes).map_err(ApiError::Validation)?;
    let has_conflict = scheduling::has_conflict(
        state.appointments.as_ref(),
        &q.doctor_id,
        q.start,
        duration,
    )
    .await;

    Ok(ApiOk::new(ConflictData { has_conflict }))
}

/* ============================================================
   GET /appointments/{id}
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    ApiPath(appointment_id): ApiPath<String>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    let id = parse_appointment_id(&appointment_id)?;
    Ok(ApiOk::new(state.appointments.get(&id).await?))
}

/* ============================================================
   POST /appointments
   ============================================================ */

pub async fn create_appointment(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<Appointment>>), ApiError> {
    let new = NewAppointment {
        patient_id: req.patient_id,
        doctor_id: req.doctor_id,
        kind: req.kind,
        scheduled_date_time: req.scheduled_date_time,
        duration_minutes: req.duration_minutes,
        reason_for_visit: clean_text(req.reason_for_visit),
        notes: clean_text(req.notes),
    };

    let created = state.appointments.create(new).await?;
    Ok((StatusCode::CREATED, ApiOk::new(created)))
}

/* ============================================================
   PUT /appointments/{id}
   ============================================================ */

pub async fn replace_appointment(
    State(state): State<AppState>,
    ApiPath(appointment_id): ApiPath<String>,
    ApiJson(req): ApiJson<ReplaceAppointmentRequest>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    let id = parse_appointment_id(&appointment_id)?;
    let changes = AppointmentChanges {
        kind: Some(req.kind),
        scheduled_date_time: Some(req.scheduled_date_time),
        duration_minutes: Some(req.duration_minutes),
        reason_for_visit: Some(clean_text(req.reason_for_visit)),
        notes: Some(clean_text(req.notes)),
    };

    Ok(ApiOk::new(state.appointments.update(&id, changes).await?))
}

/* ============================================================
   PATCH /appointments/{id}
   ============================================================ */

pub async fn patch_appointment(
    State(state): State<AppState>,
    ApiPath(appointment_id): ApiPath<String>,
    ApiJson(req): ApiJson<PatchAppointmentRequest>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    let id = parse_appointment_id(&appointment_id)?;
    let changes = AppointmentChanges {
        kind: req.kind,
        scheduled_date_time: req.scheduled_date_time,
        duration_minutes: req.duration_minutes,
        reason_for_visit: req.reason_for_visit.map(clean_text),
        notes: req.notes.map(clean_text),
    };

    Ok(ApiOk::new(state.appointments.update(&id, changes).await?))
}

/* ============================================================
   DELETE /appointments/{id}
   ============================================================ */

pub async fn delete_appointment(
    State(state): State<AppState>,
    ApiPath(appointment_id): ApiPath<String>,
) -> Result<Json<ApiOk<DeletedData>>, ApiError> {
    let id = parse_appointment_id(&appointment_id)?;
    state.appointments.delete(&id).await?;
    Ok(ApiOk::new(DeletedData { id, deleted: true }))
}

/* ============================================================
   Status transitions
   ============================================================ */

pub async fn set_status(
    State(state): State<AppState>,
    ApiPath(appointment_id): ApiPath<String>,
    ApiJson(req): ApiJson<SetStatusRequest>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    let id = parse_appointment_id(&appointment_id)?;
    Ok(ApiOk::new(state.appointments.set_status(&id, req.status).await?))
}

pub async fn check_in(
    State(state): State<AppState>,
    ApiPath(appointment_id): ApiPath<String>,
) -> Result<Json<ApiOk<Appointment>>, ApiError> {
    let id = parse_appointment_id(&appointment_id)?;
    let appt = state.appointments.check_in(&id).await?;
    tracing::info!(appointment_id = %id, "patient checked in");
    Ok(ApiOk::new(appt))
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, Router};
    use serde_json::{json, Value};

    use crate::routes::test_support::{app, send};

    async fn seed(app: &Router) -> (String, String) {
        let (status, patient) = send(
            app,
            "POST",
            "/api/v1/patients",
            Some(json!({
                "firstName": "Marie",
                "lastName": "Curie",
                "email": "marie@example.org",
                "phone": "+33 1 23 45 67 89"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{patient}");

        let (status, doctor) = send(
            app,
            "POST",
            "/api/v1/doctors",
            Some(json!({
                "firstName": "Gregory",
                "lastName": "House",
                "email": "house@example.org",
                "specialty": "Diagnostics"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{doctor}");

        (
            patient["data"]["id"].as_str().unwrap().to_string(),
            doctor["data"]["id"].as_str().unwrap().to_string(),
        )
    }

    async fn book(
        app: &Router,
        patient: &str,
        doctor: &str,
        start: &str,
        minutes: i32,
    ) -> (StatusCode, Value) {
        send(
            app,
            "POST",
            "/api/v1/appointments",
            Some(json!({
                "patientId": patient,
                "doctorId": doctor,
                "type": "CHECK_UP",
                "scheduledDateTime": start,
                "durationMinutes": minutes,
                "reasonForVisit": "  routine  "
            })),
        )
        .await
    }

    #[tokio::test]
    async fn booking_flow_matches_the_half_open_rule() {
        let app = app();
        let (p, d) = seed(&app).await;

        let (status, first) = book(&app, &p, &d, "2025-03-10T09:00:00Z", 30).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["success"], true);
        assert_eq!(first["data"]["status"], "SCHEDULED");
        assert_eq!(first["data"]["reasonForVisit"], "routine");
        assert!(first["data"]["id"].as_str().unwrap().starts_with("appt_"));

        let (status, _) = book(&app, &p, &d, "2025-03-10T09:30:00Z", 30).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, err) = book(&app, &p, &d, "2025-03-10T09:15:00Z", 30).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["success"], false);
        assert_eq!(err["error"]["type"], "ConflictError");
        assert!(err["error"]["details"]["conflictingAppointmentId"].is_string());
    }

    #[tokio::test]
    async fn conflict_check_reports_and_cancellation_frees_the_slot() {
        let app = app();
        let (p, d) = seed(&app).await;
        let (_, first) = book(&app, &p, &d, "2025-03-10T09:00:00Z", 30).await;
        let id = first["data"]["id"].as_str().unwrap().to_string();

        let conflicts = |start: &str| {
            format!("/api/v1/appointments/conflicts?doctorId={d}&start={start}&durationMinutes=30")
        };

        let (status, body) = send(&app, "GET", &conflicts("2025-03-10T09:15:00Z"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["hasConflict"], true);

        let (_, body) = send(&app, "GET", &conflicts("2025-03-10T09:30:00Z"), None).await;
        assert_eq!(body["data"]["hasConflict"], false);

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/api/v1/appointments/{id}/status"),
            Some(json!({ "status": "CANCELLED" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "CANCELLED");

        let (_, body) = send(&app, "GET", &conflicts("2025-03-10T09:15:00Z"), None).await;
        assert_eq!(body["data"]["hasConflict"], false);
        let (status, _) = book(&app, &p, &d, "2025-03-10T09:15:00Z", 30).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn legacy_id_shapes_resolve_to_the_same_appointment() {
        let app = app();
        let (p, d) = seed(&app).await;
        let (_, first) = book(&app, &p, &d, "2025-03-10T11:00:00Z", 60).await;
        let id = first["data"]["id"].as_str().unwrap().to_string();
        let suffix = id.trim_start_matches("appt_");

        for path_id in [id.clone(), suffix.to_string(), format!("appt_{id}")] {
            let uri = format!("/api/v1/appointments/{path_id}");
            let (status, body) = send(&app, "GET", &uri, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["data"]["id"], id.as_str());
        }

        let doubled_doctor = format!("doctor_{d}");
        let (status, body) = book(&app, &p, &doubled_doctor, "2025-03-10T13:00:00Z", 15).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["doctorId"], d.as_str());
    }

    #[tokio::test]
    async fn check_in_moves_to_in_progress() {
        let app = app();
        let (p, d) = seed(&app).await;
        let (_, first) = book(&app, &p, &d, "2025-03-10T09:00:00Z", 30).await;
        let id = first["data"]["id"].as_str().unwrap().to_string();

        let uri = format!("/api/v1/appointments/{id}/check-in");
        let (status, body) = send(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "IN_PROGRESS");
        assert!(body["data"]["checkedInAt"].is_string());
    }

    #[tokio::test]
    async fn patch_clears_notes_and_put_reschedules() {
        let app = app();
        let (p, d) = seed(&app).await;
        let (_, first) = book(&app, &p, &d, "2025-03-10T09:00:00Z", 30).await;
        let id = first["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/api/v1/appointments/{id}"),
            Some(json!({ "notes": "bring x-rays" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["notes"], "bring x-rays");

        let (_, body) = send(
            &app,
            "PATCH",
            &format!("/api/v1/appointments/{id}"),
            Some(json!({ "notes": null })),
        )
        .await;
        assert!(body["data"]["notes"].is_null());
        assert_eq!(body["data"]["reasonForVisit"], "routine");

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/v1/appointments/{id}"),
            Some(json!({
                "type": "FOLLOW_UP",
                "scheduledDateTime": "2025-03-10T09:15:00Z",
                "durationMinutes": 45
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["type"], "FOLLOW_UP");
        assert_eq!(body["data"]["durationMinutes"], 45);
        assert!(body["data"]["reasonForVisit"].is_null());
    }

    #[tokio::test]
    async fn list_filters_by_doctor_and_status() {
        let app = app();
        let (p, d) = seed(&app).await;
        book(&app, &p, &d, "2025-03-10T10:00:00Z", 30).await;
        let (_, early) = book(&app, &p, &d, "2025-03-10T08:00:00Z", 30).await;
        let early_id = early["data"]["id"].as_str().unwrap().to_string();
        send(
            &app,
            "PATCH",
            &format!("/api/v1/appointments/{early_id}/status"),
            Some(json!({ "status": "NO_SHOW" })),
        )
        .await;

        let uri = format!("/api/v1/appointments?doctorId={d}");
        let (status, body) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let items = body["data"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["id"], early_id.as_str());

        let (_, body) = send(&app, "GET", "/api/v1/appointments?status=NO_SHOW", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_input_uses_the_error_envelope() {
        let app = app();
        let (p, d) = seed(&app).await;

        let (status, body) = book(&app, &p, &d, "2025-03-10T09:00:00Z", 20).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "ValidationError");

        let (status, body) = send(
            &app,
            "PATCH",
            "/api/v1/appointments/appt_x/status",
            Some(json!({ "status": "FINISHED" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "ValidationError");

        let (status, body) = send(&app, "GET", "/api/v1/appointments/appt_missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["type"], "NotFound");

        let (status, body) = send(&app, "DELETE", "/api/v1/appointments/appt_missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["type"], "NotFound");
    }
}
