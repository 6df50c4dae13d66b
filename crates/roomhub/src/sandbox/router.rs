use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::state::{SandboxBackend, SandboxError};
use crate::api::{
    AvailabilityCheck, BookingRequest, Credentials, OAuthGrant, OAuthProvider, PhotoRegistration,
    RoomPayload, SignUpRequest,
};

type SharedBackend = Arc<SandboxBackend>;

/// Rental API surface under `/api/v1`, plus the upload endpoint that
/// destinations point at.
pub fn sandbox_router(backend: SharedBackend) -> Router {
    Router::new()
        .route("/api/v1/rooms/", get(list_rooms).post(create_room))
        .route("/api/v1/rooms/amenities", get(amenities))
        .route(
            "/api/v1/rooms/:room_pk",
            get(room).put(update_room).delete(delete_room),
        )
        .route("/api/v1/rooms/:room_pk/reviews", get(room_reviews))
        .route("/api/v1/rooms/:room_pk/bookings", post(create_booking))
        .route("/api/v1/rooms/:room_pk/bookings/check", get(check_availability))
        .route("/api/v1/rooms/:room_pk/photos", post(register_photo))
        .route("/api/v1/categories", get(categories))
        .route("/api/v1/users/me", get(current_user))
        .route("/api/v1/users/log-in", post(log_in))
        .route("/api/v1/users/log-out", post(log_out))
        .route("/api/v1/users/sign-up", post(sign_up))
        .route("/api/v1/users/:provider", post(oauth_log_in))
        .route("/api/v1/medias/photos/get-url", post(upload_destination))
        .route("/uploads/:destination_id", post(accept_upload))
        .with_state(backend)
}

impl IntoResponse for SandboxError {
    fn into_response(self) -> Response {
        let status = match self {
            SandboxError::Unauthenticated => StatusCode::UNAUTHORIZED,
            SandboxError::Forbidden => StatusCode::FORBIDDEN,
            SandboxError::NotFound(_) => StatusCode::NOT_FOUND,
            SandboxError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        let payload = json!({ "error": self.to_string() });
        (status, Json(payload)).into_response()
    }
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, SandboxError>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn list_rooms(State(backend): State<SharedBackend>) -> Response {
    (StatusCode::OK, Json(backend.list_rooms())).into_response()
}

async fn create_room(
    State(backend): State<SharedBackend>,
    Json(payload): Json<RoomPayload>,
) -> Response {
    respond(StatusCode::CREATED, backend.create_room(payload))
}

async fn amenities(State(backend): State<SharedBackend>) -> Response {
    (StatusCode::OK, Json(backend.amenities())).into_response()
}

async fn room(State(backend): State<SharedBackend>, Path(room_pk): Path<String>) -> Response {
    respond(StatusCode::OK, backend.room(&room_pk))
}

async fn update_room(
    State(backend): State<SharedBackend>,
    Path(room_pk): Path<String>,
    Json(payload): Json<RoomPayload>,
) -> Response {
    respond(StatusCode::OK, backend.update_room(&room_pk, payload))
}

async fn delete_room(
    State(backend): State<SharedBackend>,
    Path(room_pk): Path<String>,
) -> Response {
    match backend.delete_room(&room_pk) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn room_reviews(
    State(backend): State<SharedBackend>,
    Path(room_pk): Path<String>,
) -> Response {
    respond(StatusCode::OK, backend.room_reviews(&room_pk))
}

#[derive(Debug, Deserialize)]
struct CheckParams {
    check_in: NaiveDate,
    check_out: NaiveDate,
}

async fn check_availability(
    State(backend): State<SharedBackend>,
    Path(room_pk): Path<String>,
    Query(params): Query<CheckParams>,
) -> Response {
    let result = backend
        .check_availability(&room_pk, params.check_in, params.check_out)
        .map(|ok| AvailabilityCheck { ok });
    respond(StatusCode::OK, result)
}

async fn create_booking(
    State(backend): State<SharedBackend>,
    Path(room_pk): Path<String>,
    Json(mut request): Json<BookingRequest>,
) -> Response {
    request.room_pk = room_pk;
    respond(StatusCode::CREATED, backend.create_booking(request))
}

#[derive(Debug, Deserialize)]
struct PhotoBody {
    description: String,
    file: String,
}

async fn register_photo(
    State(backend): State<SharedBackend>,
    Path(room_pk): Path<String>,
    Json(body): Json<PhotoBody>,
) -> Response {
    let registration = PhotoRegistration {
        room_pk,
        description: body.description,
        file: body.file,
    };
    respond(StatusCode::CREATED, backend.register_photo(registration))
}

#[derive(Debug, Deserialize)]
struct CategoryParams {
    kind: Option<String>,
}

async fn categories(
    State(backend): State<SharedBackend>,
    Query(params): Query<CategoryParams>,
) -> Response {
    let kind = params.kind.unwrap_or_else(|| "room".to_string());
    (StatusCode::OK, Json(backend.categories(&kind))).into_response()
}

async fn current_user(State(backend): State<SharedBackend>) -> Response {
    respond(StatusCode::OK, backend.current_user())
}

async fn log_in(
    State(backend): State<SharedBackend>,
    Json(credentials): Json<Credentials>,
) -> Response {
    respond(StatusCode::OK, backend.log_in(credentials))
}

async fn log_out(State(backend): State<SharedBackend>) -> Response {
    respond(StatusCode::OK, backend.log_out().map(|()| json!({ "ok": "bye!" })))
}

async fn sign_up(
    State(backend): State<SharedBackend>,
    Json(request): Json<SignUpRequest>,
) -> Response {
    respond(StatusCode::CREATED, backend.sign_up(request))
}

async fn oauth_log_in(
    State(backend): State<SharedBackend>,
    Path(provider): Path<String>,
    Json(grant): Json<OAuthGrant>,
) -> Response {
    let provider = match provider.as_str() {
        "github" => OAuthProvider::Github,
        "kakao" => OAuthProvider::Kakao,
        "naver" => OAuthProvider::Naver,
        other => return SandboxError::NotFound(format!("provider {other}")).into_response(),
    };
    match backend.oauth_log_in(provider, grant) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn upload_destination(State(backend): State<SharedBackend>) -> Response {
    respond(StatusCode::OK, backend.upload_destination())
}

async fn accept_upload(
    State(backend): State<SharedBackend>,
    Path(destination_id): Path<String>,
    mut multipart: Multipart,
) -> Response {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "malformed upload body");
                return SandboxError::BadRequest(err.body_text()).into_response();
            }
        };
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.bin").to_string();
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => return SandboxError::BadRequest(err.body_text()).into_response(),
        };
        let result = backend
            .accept_upload(&destination_id, &file_name, bytes.len())
            .map(|receipt| json!({ "result": receipt, "success": true }));
        return respond(StatusCode::OK, result);
    }
    SandboxError::BadRequest("missing file part".to_string()).into_response()
}
