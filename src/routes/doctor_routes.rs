// src/routes/doctor_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::{clean_text, required_name, ApiJson, ApiOk, ApiPath};
use crate::{
    contact::{EmailAddress, PhoneNumber},
    error::ApiError,
    ids::DoctorId,
    models::{AppState, Doctor, NewDoctor},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/doctors", get(list_doctors).post(create_doctor))
        .route("/doctors/{doctor_id}", get(get_doctor))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDoctorRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub specialty: Option<String>,
}

pub async fn list_doctors(
    State(state): State<AppState>,
) -> Result<Json<ApiOk<Vec<Doctor>>>, ApiError> {
    Ok(ApiOk::new(state.doctors.list().await?))
}

pub async fn get_doctor(
    State(state): State<AppState>,
    ApiPath(doctor_id): ApiPath<String>,
) -> Result<Json<ApiOk<Doctor>>, ApiError> {
    let id = DoctorId::parse(&doctor_id)?;
    Ok(ApiOk::new(state.doctors.get(&id).await?))
}

pub async fn create_doctor(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateDoctorRequest>,
) -> Result<(StatusCode, Json<ApiOk<Doctor>>), ApiError> {
    let phone = match clean_text(req.phone) {
        Some(p) => Some(PhoneNumber::parse(&p)?),
        None => None,
    };

    let new = NewDoctor {
        first_name: required_name("firstName", &req.first_name)?,
        last_name: required_name("lastName", &req.last_name)?,
        email: EmailAddress::parse(&req.email)?,
        phone,
        specialty: clean_text(req.specialty),
    };

    let doctor = state.doctors.create(new).await?;
    Ok((StatusCode::CREATED, ApiOk::new(doctor)))
}
