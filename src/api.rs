use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, MatchedPath, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::{InstanceId, TypeId};
use crate::notify::{RealtimeEvent, Subscription};
use crate::observability;
use crate::slot::{self, Slot};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Tenant joined by `/hubs/iot` when the client names none.
    pub default_tenant: Arc<str>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, default_tenant: impl Into<Arc<str>>) -> Self {
        Self {
            engine,
            default_tenant: default_tenant.into(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/resource-types", get(list_resource_types))
        .route("/api/resource-types/:type_id/free-slots", post(free_slots))
        .route("/api/resource-types/:type_id/bookings", post(type_bookings_on))
        .route("/api/bookings", post(create_booking).get(all_bookings))
        .route("/api/bookings/:booking_id", delete(cancel_booking))
        .route("/api/calendar/:date", get(bookings_on))
        .route("/api/users/:user_id/bookings", get(user_bookings))
        .route("/api/resources", get(list_resources))
        .route("/api/resources/:id", get(get_resource))
        .route("/api/resources/:id/bookable", patch(toggle_bookable))
        .route("/hubs/booking", get(booking_hub))
        .route("/hubs/iot", get(iot_hub))
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
}

async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_default();
    let response = next.run(req).await;
    metrics::counter!(
        observability::HTTP_REQUESTS_TOTAL,
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    BadRequest(String),
    NotFound(String),
    Forbidden,
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(e: PathRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Engine(e) => write!(f, "{e}"),
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) => f.write_str(msg),
            ApiError::Forbidden => f.write_str("admin role required"),
            ApiError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::NoAvailability { .. } | EngineError::AlreadyExists(..) => StatusCode::CONFLICT,
                EngineError::NotFound(..) => StatusCode::NOT_FOUND,
                EngineError::InvalidSlot(_) | EngineError::InvalidDate(_) | EngineError::LimitExceeded(_) => {
                    StatusCode::BAD_REQUEST
                }
                EngineError::WalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!("request failed: {self}");
            "the booking store is unavailable, try again later".to_string()
        } else {
            self.to_string()
        };
        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}

// ── Caller identity ──────────────────────────────────────────────

/// Identity forwarded by the fronting identity provider.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub user_id: Option<String>,
    pub is_admin: bool,
}

impl Caller {
    fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin { Ok(()) } else { Err(ApiError::Forbidden) }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        };
        Ok(Caller {
            user_id: header("x-user-id"),
            is_admin: header("x-user-role").is_some_and(|r| r.eq_ignore_ascii_case("admin")),
        })
    }
}

/// Run a mutation on its own task so it completes even if the client goes away.
async fn detached<T, F>(fut: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, EngineError>> + Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

// ── Bodies ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DateBody {
    #[serde(deserialize_with = "slot::lenient_date::deserialize")]
    date: NaiveDate,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBookingBody {
    resource_type_id: TypeId,
    #[serde(deserialize_with = "slot::lenient_date::deserialize")]
    date: NaiveDate,
    time_slot: String,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookingReceipt {
    booking_id: Ulid,
    date: NaiveDate,
    time_slot: Slot,
    resource_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserBooking {
    booking_id: Ulid,
    date: NaiveDate,
    time_slot: Slot,
    resource_name: String,
    /// The slot has not ended yet.
    upcoming: bool,
}

#[derive(Deserialize)]
struct HubQuery {
    tenant: Option<String>,
}

// ── Handlers ─────────────────────────────────────────────────────

async fn list_resource_types(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.list_resource_types())
}

async fn free_slots(
    State(state): State<AppState>,
    type_id: Result<Path<TypeId>, PathRejection>,
    body: Result<Json<DateBody>, JsonRejection>,
) -> Result<Json<Vec<Slot>>, ApiError> {
    let Path(type_id) = type_id?;
    let Json(body) = body?;
    Ok(Json(state.engine.free_slots(type_id, body.date).await?))
}

async fn type_bookings_on(
    State(state): State<AppState>,
    caller: Caller,
    type_id: Result<Path<TypeId>, PathRejection>,
    body: Result<Json<DateBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    caller.require_admin()?;
    let Path(type_id) = type_id?;
    let Json(body) = body?;
    let bookings = state.engine.bookings_for_type_on(type_id, body.date).await;
    if bookings.is_empty() {
        return Err(ApiError::NotFound("No bookings under this day".into()));
    }
    Ok(Json(bookings))
}

async fn create_booking(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<CreateBookingBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let slot: Slot = body.time_slot.parse().map_err(EngineError::from)?;
    let user_id = body
        .user_id
        .filter(|u| !u.trim().is_empty())
        .or(caller.user_id)
        .ok_or_else(|| ApiError::BadRequest("userId is required".into()))?;

    let engine = state.engine.clone();
    let info = detached(async move {
        engine
            .create_booking(body.resource_type_id, body.date, slot, user_id)
            .await
    })
    .await?;

    Ok(Json(BookingReceipt {
        booking_id: info.booking_id,
        date: info.date,
        time_slot: info.time_slot,
        resource_name: info.resource_name,
    }))
}

async fn all_bookings(State(state): State<AppState>, caller: Caller) -> Result<impl IntoResponse, ApiError> {
    caller.require_admin()?;
    Ok(Json(state.engine.all_bookings().await))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: Ulid = booking_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid booking id: {booking_id:?}")))?;
    let engine = state.engine.clone();
    detached(async move { engine.cancel_booking(id).await }).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn bookings_on(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let date = slot::normalize_date(&date).map_err(EngineError::from)?;
    Ok(Json(state.engine.bookings_on(date).await))
}

async fn user_bookings(State(state): State<AppState>, Path(user_id): Path<String>) -> impl IntoResponse {
    let now = chrono::Local::now().naive_local();
    let bookings: Vec<UserBooking> = state
        .engine
        .bookings_for_user(&user_id)
        .await
        .into_iter()
        .map(|b| UserBooking {
            booking_id: b.booking_id,
            date: b.date,
            time_slot: b.time_slot,
            upcoming: b.time_slot.is_open_at(b.date, now),
            resource_name: b.resource_name,
        })
        .collect();
    Json(bookings)
}

async fn list_resources(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.list_instances().await)
}

async fn get_resource(
    State(state): State<AppState>,
    id: Result<Path<InstanceId>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.engine.get_instance(id).await?))
}

async fn toggle_bookable(
    State(state): State<AppState>,
    caller: Caller,
    id: Result<Path<InstanceId>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    caller.require_admin()?;
    let Path(id) = id?;
    let engine = state.engine.clone();
    Ok(Json(detached(async move { engine.toggle_bookable(id).await }).await?))
}

// ── Realtime hubs ────────────────────────────────────────────────

async fn booking_hub(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    // Subscribe before the upgrade so nothing published after the handshake is missed.
    let subscription = state.engine.notify.subscribe();
    ws.on_upgrade(move |socket| pump_events(socket, subscription, None))
}

async fn iot_hub(
    State(state): State<AppState>,
    Query(query): Query<HubQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let tenant = query.tenant.unwrap_or_else(|| state.default_tenant.to_string());
    let (group, subscription) = state
        .engine
        .notify
        .tenants()
        .join(&tenant)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let current = group.status().map(|online| RealtimeEvent::IotStatusChanged { online });
    let engine = state.engine.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        pump_events(socket, subscription, current).await;
        engine.notify.tenants().leave(&group);
    }))
}

async fn pump_events(socket: WebSocket, mut subscription: Subscription, first: Option<RealtimeEvent>) {
    let (mut sink, mut incoming) = socket.split();

    if let Some(event) = first
        && send_event(&mut sink, &event).await.is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                if send_event(&mut sink, &event).await.is_err() {
                    break;
                }
            }
            msg = incoming.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    let _ = sink.close().await;
}

async fn send_event<S>(sink: &mut S, event: &RealtimeEvent) -> Result<(), axum::Error>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(event).map_err(axum::Error::new)?;
    sink.send(Message::Text(text)).await
}
