use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use chrono::Utc;
use serde::Deserialize;

use crate::errors::GarageError;

use super::catalog::RepairCatalog;
use super::db::DbHandle;
use super::models::{Invoice, RepairStatus, Vehicle, VehicleChange, VehicleView};
use super::progress::with_progress;
use super::triggers::Notifier;
use super::ws::{WsMessage, WsSender, broadcast_message};

/// Header carrying the caller's user reference, set by the identity provider.
pub const USER_HEADER: &str = "x-user-id";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: WsSender,
    pub notifier: Notifier,
    pub catalog: RepairCatalog,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub id: Option<String>,
    #[serde(default)]
    pub email: String,
    pub push_token: Option<String>,
}

#[derive(Deserialize)]
pub struct PushTokenRequest {
    pub token: String,
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct BreakdownRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub license_plate: String,
    #[serde(default)]
    pub repairs: Vec<String>,
}

#[derive(Deserialize)]
pub struct VehicleListQuery {
    #[serde(default)]
    pub view: VehicleView,
}

#[derive(Deserialize)]
pub struct UpdateRepairRequest {
    pub status: String,
    pub expected_version: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct SendNotificationRequest {
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<GarageError> for ApiError {
    fn from(err: GarageError) -> Self {
        let msg = err.to_string();
        match err {
            GarageError::UserNotFound { .. }
            | GarageError::VehicleNotFound { .. }
            | GarageError::RepairNotFound { .. }
            | GarageError::PushTokenMissing { .. } => ApiError::NotFound(msg),
            GarageError::UserExists { .. }
            | GarageError::InvalidRepairTransition { .. }
            | GarageError::NotReadyForPayment { .. }
            | GarageError::AlreadyPaid { .. }
            | GarageError::VersionConflict { .. } => ApiError::Conflict(msg),
            GarageError::AccessDenied { .. } => ApiError::Forbidden(msg),
            GarageError::Unauthenticated => ApiError::Unauthorized(msg),
            GarageError::UnknownRepairType(_) | GarageError::BadRequest(_) => {
                ApiError::BadRequest(msg)
            }
            GarageError::Push(_) | GarageError::Database(_) | GarageError::Other(_) => {
                tracing::error!(error = %msg, "request failed");
                ApiError::Internal(msg)
            }
        }
    }
}

fn db_error(err: anyhow::Error) -> ApiError {
    GarageError::from_db(err).into()
}

// ── Caller identity ───────────────────────────────────────────────────

/// The authenticated caller, taken from the [`USER_HEADER`] header.
pub struct Caller(pub String);

fn caller_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        caller_id(&parts.headers)
            .map(Caller)
            .ok_or_else(|| GarageError::Unauthenticated.into())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/catalog", get(list_catalog))
        .route("/api/users", post(create_user))
        .route("/api/users/{id}", get(get_user))
        .route("/api/users/{id}/push-token", put(put_push_token))
        .route("/api/vehicles", get(list_vehicles).post(create_vehicle))
        .route("/api/vehicles/{id}", get(get_vehicle))
        .route("/api/vehicles/{id}/invoice", get(get_invoice))
        .route("/api/vehicles/{id}/pay", post(pay_vehicle))
        .route("/api/garage/vehicles", get(garage_queue))
        .route(
            "/api/garage/vehicles/{id}/repairs/{position}",
            patch(update_repair),
        )
        .route("/api/notifications/send", post(send_notification))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_catalog(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.catalog.entries().to_vec())
}

async fn create_user(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = req
        .id
        .filter(|id| !id.trim().is_empty())
        .or_else(|| caller_id(&headers))
        .ok_or_else(|| ApiError::BadRequest("id is required".into()))?;
    let email = req.email.trim().to_string();
    if email.is_empty() {
        return Err(ApiError::BadRequest("email is required".into()));
    }
    let push_token = req.push_token.filter(|t| !t.trim().is_empty());

    let user = state
        .db
        .call(move |db| db.create_user(&id, &email, push_token.as_deref(), Utc::now()))
        .await
        .map_err(db_error)?;

    broadcast_message(
        &state.ws_tx,
        &WsMessage::UserRegistered {
            user_id: user.id.clone(),
        },
    );
    state.notifier.on_user_created(&user).await;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lookup = id.clone();
    let user = state
        .db
        .call(move |db| db.get_user(&lookup))
        .await
        .map_err(db_error)?;
    match user {
        Some(user) => Ok(Json(user)),
        None => Err(GarageError::UserNotFound { id }.into()),
    }
}

async fn put_push_token(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Json(req): Json<PushTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if caller != id {
        return Err(ApiError::Forbidden(
            "Cannot set the push token of another user".into(),
        ));
    }
    let token = req.token.trim().to_string();
    if token.is_empty() {
        return Err(ApiError::BadRequest("token is required".into()));
    }
    let email = req.email;

    let (user, created) = state
        .db
        .call(move |db| db.upsert_push_token(&id, email.as_deref(), &token, Utc::now()))
        .await
        .map_err(db_error)?;

    if created {
        broadcast_message(
            &state.ws_tx,
            &WsMessage::UserRegistered {
                user_id: user.id.clone(),
            },
        );
        state.notifier.on_user_created(&user).await;
    }
    Ok(Json(user))
}

async fn create_vehicle(
    State(state): State<SharedState>,
    Caller(owner): Caller,
    Json(req): Json<BreakdownRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let model = req.model.trim().to_string();
    let license_plate = req.license_plate.trim().to_uppercase();
    if model.is_empty() || license_plate.is_empty() {
        return Err(ApiError::BadRequest(
            "model and license_plate are required".into(),
        ));
    }
    let repairs = state.catalog.new_repairs(&req.repairs)?;

    let vehicle = state
        .db
        .call(move |db| {
            let owner_email = db
                .get_user(&owner)?
                .map(|u| u.email)
                .filter(|e| !e.is_empty());
            db.create_vehicle(
                &owner,
                owner_email.as_deref(),
                &model,
                &license_plate,
                &repairs,
                Utc::now(),
            )
        })
        .await
        .map_err(db_error)?;
    let vehicle = with_progress(vehicle, Utc::now());

    broadcast_message(
        &state.ws_tx,
        &WsMessage::VehicleCreated {
            vehicle: vehicle.clone(),
        },
    );
    state.notifier.on_vehicle_created(&vehicle);
    Ok((StatusCode::CREATED, Json(vehicle)))
}

async fn list_vehicles(
    State(state): State<SharedState>,
    Caller(owner): Caller,
    Query(query): Query<VehicleListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let view = query.view;
    let vehicles = state
        .db
        .call(move |db| db.list_vehicles_for_owner(&owner, view))
        .await
        .map_err(db_error)?;
    let now = Utc::now();
    let vehicles: Vec<Vehicle> = vehicles.into_iter().map(|v| with_progress(v, now)).collect();
    Ok(Json(vehicles))
}

/// Load a vehicle the caller owns.
async fn load_owned(state: &SharedState, caller: &str, id: String) -> Result<Vehicle, ApiError> {
    let lookup = id.clone();
    let vehicle = state
        .db
        .call(move |db| db.get_vehicle(&lookup))
        .await
        .map_err(db_error)?
        .ok_or_else(|| GarageError::VehicleNotFound { id: id.clone() })?;
    if vehicle.owner_id != caller {
        return Err(GarageError::AccessDenied { vehicle_id: id }.into());
    }
    Ok(vehicle)
}

async fn get_vehicle(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let vehicle = load_owned(&state, &caller, id).await?;
    Ok(Json(with_progress(vehicle, Utc::now())))
}

async fn get_invoice(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let vehicle = load_owned(&state, &caller, id).await?;
    Ok(Json(Invoice::from(&vehicle)))
}

async fn pay_vehicle(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    load_owned(&state, &caller, id.clone()).await?;
    let mut change = state
        .db
        .call(move |db| db.mark_paid(&id, Utc::now()))
        .await
        .map_err(db_error)?;
    change.vehicle = with_progress(change.vehicle, Utc::now());
    if change.status_changed() {
        tracing::info!(vehicle_id = %change.vehicle.id, "invoice paid");
        publish_change(&state, &change).await;
    }
    Ok(Json(change.vehicle))
}

async fn garage_queue(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let vehicles = state
        .db
        .call(|db| db.list_garage_queue())
        .await
        .map_err(db_error)?;
    let now = Utc::now();
    let vehicles: Vec<Vehicle> = vehicles.into_iter().map(|v| with_progress(v, now)).collect();
    Ok(Json(vehicles))
}

async fn update_repair(
    State(state): State<SharedState>,
    Path((id, position)): Path<(String, i32)>,
    Json(req): Json<UpdateRepairRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let to = RepairStatus::from_str(&req.status).map_err(ApiError::BadRequest)?;
    let expected_version = req.expected_version;
    let mut change = state
        .db
        .call(move |db| db.update_repair_status(&id, position, to, expected_version, Utc::now()))
        .await
        .map_err(db_error)?;
    change.vehicle = with_progress(change.vehicle, Utc::now());
    if change.written() {
        publish_change(&state, &change).await;
    }
    Ok(Json(change.vehicle))
}

/// Fan a vehicle write out to live subscribers and the notifier. The vehicle
/// must already carry its progress fractions.
async fn publish_change(state: &SharedState, change: &VehicleChange) {
    broadcast_message(
        &state.ws_tx,
        &WsMessage::VehicleUpdated {
            vehicle: change.vehicle.clone(),
        },
    );
    if change.status_changed() {
        broadcast_message(
            &state.ws_tx,
            &WsMessage::VehicleStatusChanged {
                vehicle_id: change.vehicle.id.clone(),
                owner_id: change.vehicle.owner_id.clone(),
                from: change.before,
                to: change.vehicle.status,
            },
        );
    }
    state.notifier.on_vehicle_updated(change).await;
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.trim().is_empty())
}

async fn send_notification(
    State(state): State<SharedState>,
    Json(req): Json<SendNotificationRequest>,
) -> Response {
    let (Some(user_id), Some(title), Some(body)) =
        (required(req.user_id), required(req.title), required(req.body))
    else {
        return ApiError::BadRequest("Missing required fields: user_id, title, body".into())
            .into_response();
    };

    match state.notifier.send_manual(&user_id, &title, &body).await {
        Ok(message_id) => Json(serde_json::json!({
            "success": true,
            "message_id": message_id,
        }))
        .into_response(),
        Err(err @ (GarageError::UserNotFound { .. } | GarageError::PushTokenMissing { .. })) => {
            ApiError::from(err).into_response()
        }
        Err(err) => {
            tracing::error!(user_id = %user_id, error = %err, "manual push failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "success": false,
                    "error": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
