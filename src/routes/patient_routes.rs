// src/routes/patient_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;

use super::{deserialize_double_option, required_name, ApiJson, ApiOk, ApiPath, ApiQuery};
use crate::{
    contact::{EmailAddress, PhoneNumber},
    error::ApiError,
    ids::PatientId,
    models::{AppState, NewPatient, Patient, PatientChanges},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", get(search_patients).post(create_patient))
        .route("/patients/{patient_id}", get(get_patient).patch(update_patient))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub date_of_birth: Option<Option<NaiveDate>>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
}

/// Blank phone input means "no phone".
fn parse_phone(raw: Option<&str>) -> Result<Option<PhoneNumber>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(p) => Ok(Some(PhoneNumber::parse(p)?)),
        None => Ok(None),
    }
}

pub async fn create_patient(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreatePatientRequest>,
) -> Result<(StatusCode, Json<ApiOk<Patient>>), ApiError> {
    let new = NewPatient {
        first_name: required_name("firstName", &req.first_name)?,
        last_name: required_name("lastName", &req.last_name)?,
        email: EmailAddress::parse(&req.email)?,
        phone: parse_phone(req.phone.as_deref())?,
        date_of_birth: req.date_of_birth,
    };

    let patient = state.patients.create(new).await?;
    Ok((StatusCode::CREATED, ApiOk::new(patient)))
}

pub async fn get_patient(
    State(state): State<AppState>,
    ApiPath(patient_id): ApiPath<String>,
) -> Result<Json<ApiOk<Patient>>, ApiError> {
    let id = PatientId::parse(&patient_id)?;
    Ok(ApiOk::new(state.patients.get(&id).await?))
}

pub async fn search_patients(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<SearchQuery>,
) -> Result<Json<ApiOk<Vec<Patient>>>, ApiError> {
    let query = q.query.as_deref().map(str::trim).filter(|s| !s.is_empty());
    Ok(ApiOk::new(state.patients.search(query).await?))
}

pub async fn update_patient(
    State(state): State<AppState>,
    ApiPath(patient_id): ApiPath<String>,
    ApiJson(req): ApiJson<UpdatePatientRequest>,
) -> Result<Json<ApiOk<Patient>>, ApiError> {
    let id = PatientId::parse(&patient_id)?;

    let changes = PatientChanges {
        first_name: req
            .first_name
            .as_deref()
            .map(|s| required_name("firstName", s))
            .transpose()?,
        last_name: req
            .last_name
            .as_deref()
            .map(|s| required_name("lastName", s))
            .transpose()?,
        email: req.email.as_deref().map(EmailAddress::parse).transpose()?,
        phone: match req.phone {
            None => None,
            Some(raw) => Some(parse_phone(raw.as_deref())?),
        },
        date_of_birth: req.date_of_birth,
    };

    Ok(ApiOk::new(state.patients.update(&id, changes).await?))
}
