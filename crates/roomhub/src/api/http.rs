use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::types::{
    Amenity, AvailabilityCheck, Booking, BookingRequest, Category, Credentials, LoginOutcome,
    MediaFile, OAuthGrant, OAuthProvider, Photo, PhotoRegistration, Review, RoomDetail,
    RoomPayload, RoomSummary, SignUpRequest, TransferReceipt, UploadDestination, User,
};
use super::{ApiError, RentalApi};
use crate::config::ApiConfig;

const CSRF_HEADER: &str = "x-csrftoken";

/// `RentalApi` over the backend's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpRentalApi {
    client: reqwest::Client,
    base_url: String,
    write_headers: HeaderMap,
}

impl HttpRentalApi {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| ApiError::Transport(err.to_string()))?;

        let mut write_headers = HeaderMap::new();
        if let Some(token) = &config.csrf_token {
            let value = HeaderValue::from_str(token)
                .map_err(|err| ApiError::Transport(format!("invalid credential: {err}")))?;
            write_headers.insert(HeaderName::from_static(CSRF_HEADER), value);
        }

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            write_headers,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn read(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    fn write(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .headers(self.write_headers.clone())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "backend responded");
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status.as_u16(), error_message(&text)))
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        let status = response.status().as_u16();
        response
            .json::<T>()
            .await
            .map_err(|err| ApiError::Server {
                status,
                message: format!("undecodable response body: {err}"),
            })
    }

    async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.json(self.write(Method::POST, path).json(body)).await
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Transport(format!("request timed out: {err}"))
    } else {
        ApiError::Transport(err.to_string())
    }
}

/// Pull the human-readable message out of an error body, falling back to the
/// raw text.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
        detail: Option<String>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: Some(message),
            ..
        })
        | Ok(ErrorBody {
            detail: Some(message),
            ..
        }) => message,
        _ if body.trim().is_empty() => "no response body".to_string(),
        _ => body.trim().to_string(),
    }
}

#[derive(Deserialize)]
struct TransferEnvelope {
    result: TransferReceipt,
}

#[async_trait]
impl RentalApi for HttpRentalApi {
    async fn list_rooms(&self) -> Result<Vec<RoomSummary>, ApiError> {
        self.json(self.read("rooms/")).await
    }

    async fn room(&self, room_pk: &str) -> Result<RoomDetail, ApiError> {
        self.json(self.read(&format!("rooms/{room_pk}"))).await
    }

    async fn room_reviews(&self, room_pk: &str) -> Result<Vec<Review>, ApiError> {
        self.json(self.read(&format!("rooms/{room_pk}/reviews")))
            .await
    }

    async fn amenities(&self) -> Result<Vec<Amenity>, ApiError> {
        self.json(self.read("rooms/amenities")).await
    }

    async fn categories(&self, kind: &str) -> Result<Vec<Category>, ApiError> {
        self.json(self.read("categories").query(&[("kind", kind)]))
            .await
    }

    async fn check_availability(
        &self,
        room_pk: &str,
        check_in: &str,
        check_out: &str,
    ) -> Result<AvailabilityCheck, ApiError> {
        let request = self
            .read(&format!("rooms/{room_pk}/bookings/check"))
            .query(&[("check_in", check_in), ("check_out", check_out)]);
        self.json(request).await
    }

    async fn create_booking(&self, request: BookingRequest) -> Result<Booking, ApiError> {
        let path = format!("rooms/{}/bookings", request.room_pk);
        self.post_json(&path, &request).await
    }

    async fn create_room(&self, payload: RoomPayload) -> Result<RoomDetail, ApiError> {
        self.post_json("rooms/", &payload).await
    }

    async fn update_room(
        &self,
        room_pk: &str,
        payload: RoomPayload,
    ) -> Result<RoomDetail, ApiError> {
        let request = self
            .write(Method::PUT, &format!("rooms/{room_pk}"))
            .json(&payload);
        self.json(request).await
    }

    async fn delete_room(&self, room_pk: &str) -> Result<(), ApiError> {
        self.send(self.write(Method::DELETE, &format!("rooms/{room_pk}")))
            .await
            .map(|_| ())
    }

    async fn current_user(&self) -> Result<User, ApiError> {
        self.json(self.read("users/me")).await
    }

    async fn log_in(&self, credentials: Credentials) -> Result<LoginOutcome, ApiError> {
        self.post_json("users/log-in", &credentials).await
    }

    async fn sign_up(&self, request: SignUpRequest) -> Result<User, ApiError> {
        self.post_json("users/sign-up", &request).await
    }

    async fn log_out(&self) -> Result<(), ApiError> {
        self.send(self.write(Method::POST, "users/log-out"))
            .await
            .map(|_| ())
    }

    async fn oauth_log_in(
        &self,
        provider: OAuthProvider,
        grant: OAuthGrant,
    ) -> Result<(), ApiError> {
        let request = self
            .write(Method::POST, &format!("users/{}", provider.path_segment()))
            .json(&grant);
        self.send(request).await.map(|_| ())
    }

    async fn upload_destination(&self) -> Result<UploadDestination, ApiError> {
        self.json(self.write(Method::POST, "medias/photos/get-url"))
            .await
    }

    async fn transfer_file(
        &self,
        destination: &UploadDestination,
        file: MediaFile,
    ) -> Result<TransferReceipt, ApiError> {
        let MediaFile {
            name,
            content_type,
            bytes,
        } = file;
        let part = Part::bytes(bytes)
            .file_name(name)
            .mime_str(content_type.as_ref())
            .map_err(|err| ApiError::Client {
                status: 400,
                message: format!("unsupported content type: {err}"),
            })?;
        let form = Form::new().part("file", part);

        // Destination URLs are absolute and belong to the media store, so the
        // ambient credential is not attached.
        let request = self.client.post(&destination.upload_url).multipart(form);
        let envelope: TransferEnvelope = self.json(request).await?;
        Ok(envelope.result)
    }

    async fn register_photo(&self, registration: PhotoRegistration) -> Result<Photo, ApiError> {
        let path = format!("rooms/{}/photos", registration.room_pk);
        let body = json!({
            "description": registration.description,
            "file": registration.file,
        });
        self.post_json(&path, &body).await
    }
}
