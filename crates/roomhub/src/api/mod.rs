//! The resource API consumed by the orchestration layer.
//!
//! Each operation is described by the key it reads under or the keys it
//! invalidates; the transport behind [`RentalApi`] is swappable (HTTP,
//! sandbox, scripted fakes in tests).

pub mod http;
pub mod types;

use async_trait::async_trait;

pub use http::HttpRentalApi;
pub use types::{
    Amenity, AvailabilityCheck, Booking, BookingRequest, Category, Credentials, LoginOutcome,
    MediaFile, OAuthGrant, OAuthProvider, Photo, PhotoRegistration, Review, RoomDetail,
    RoomPayload, RoomSummary, SignUpRequest, TransferReceipt, UploadDestination, User,
};

/// Failure surfaced by any resource operation.
///
/// `Clone` because a single failed fetch is handed to every caller that was
/// coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request rejected ({status}): {message}")]
    Client { status: u16, message: String },
    #[error("not authorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("server failure ({status}): {message}")]
    Server { status: u16, message: String },
}

impl ApiError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => ApiError::Unauthorized { status, message },
            400..=499 => ApiError::Client { status, message },
            _ => ApiError::Server { status, message },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Transport(_) => None,
            ApiError::Client { status, .. }
            | ApiError::Unauthorized { status, .. }
            | ApiError::Server { status, .. } => Some(*status),
        }
    }
}

/// Every backend operation the client issues.
#[async_trait]
pub trait RentalApi: Send + Sync + 'static {
    async fn list_rooms(&self) -> Result<Vec<RoomSummary>, ApiError>;
    async fn room(&self, room_pk: &str) -> Result<RoomDetail, ApiError>;
    async fn room_reviews(&self, room_pk: &str) -> Result<Vec<Review>, ApiError>;
    async fn amenities(&self) -> Result<Vec<Amenity>, ApiError>;
    async fn categories(&self, kind: &str) -> Result<Vec<Category>, ApiError>;
    async fn check_availability(
        &self,
        room_pk: &str,
        check_in: &str,
        check_out: &str,
    ) -> Result<AvailabilityCheck, ApiError>;
    async fn create_booking(&self, request: BookingRequest) -> Result<Booking, ApiError>;

    async fn create_room(&self, payload: RoomPayload) -> Result<RoomDetail, ApiError>;
    async fn update_room(&self, room_pk: &str, payload: RoomPayload)
        -> Result<RoomDetail, ApiError>;
    async fn delete_room(&self, room_pk: &str) -> Result<(), ApiError>;

    async fn current_user(&self) -> Result<User, ApiError>;
    async fn log_in(&self, credentials: Credentials) -> Result<LoginOutcome, ApiError>;
    async fn sign_up(&self, request: SignUpRequest) -> Result<User, ApiError>;
    async fn log_out(&self) -> Result<(), ApiError>;
    async fn oauth_log_in(&self, provider: OAuthProvider, grant: OAuthGrant)
        -> Result<(), ApiError>;

    async fn upload_destination(&self) -> Result<UploadDestination, ApiError>;
    async fn transfer_file(
        &self,
        destination: &UploadDestination,
        file: MediaFile,
    ) -> Result<TransferReceipt, ApiError>;
    async fn register_photo(&self, registration: PhotoRegistration) -> Result<Photo, ApiError>;
}
