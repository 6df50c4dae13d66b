use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub pk: String,
    pub file: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_host: bool,
}

/// Row in the room listing. `is_owner` depends on who is logged in, which is
/// why a session change invalidates every room key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub pk: String,
    pub name: String,
    pub country: String,
    pub city: String,
    pub price: u32,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default)]
    pub photos: Vec<Photo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDetail {
    pub pk: String,
    pub name: String,
    pub country: String,
    pub city: String,
    pub address: String,
    pub price: u32,
    pub rooms: u16,
    pub toilets: u16,
    pub description: String,
    pub pet_friendly: bool,
    pub kind: String,
    pub owner: User,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub amenities: Vec<Amenity>,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default)]
    pub photos: Vec<Photo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub pk: String,
    pub user: User,
    pub payload: String,
    pub rating: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amenity {
    pub pk: u32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub pk: u32,
    pub name: String,
    pub kind: String,
}

/// Body for room create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomPayload {
    pub name: String,
    pub country: String,
    pub city: String,
    pub price: u32,
    pub rooms: u16,
    pub toilets: u16,
    pub description: String,
    pub address: String,
    pub pet_friendly: bool,
    pub kind: String,
    pub category: u32,
    #[serde(default)]
    pub amenities: Vec<u32>,
}

/// Backend answer to a range check; `ok` means the range is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityCheck {
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub room_pk: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub pk: String,
    pub room_pk: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub username: String,
    pub password: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginOutcome {
    pub ok: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthProvider {
    Github,
    Kakao,
    Naver,
}

impl OAuthProvider {
    pub fn path_segment(self) -> &'static str {
        match self {
            OAuthProvider::Github => "github",
            OAuthProvider::Kakao => "kakao",
            OAuthProvider::Naver => "naver",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// Authorization code handed back by a provider redirect. Only Naver sends
/// `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthGrant {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDestination {
    pub id: String,
    #[serde(rename = "uploadURL")]
    pub upload_url: String,
}

/// Raw file selected by the user.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub name: String,
    pub content_type: mime::Mime,
    pub bytes: Vec<u8>,
}

impl MediaFile {
    pub fn new(name: impl Into<String>, content_type: mime::Mime, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type,
            bytes,
        }
    }
}

impl fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaFile")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// What the media store reports after a transfer: the stored object id and
/// the URLs of its variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub id: String,
    #[serde(default)]
    pub variants: Vec<String>,
}

impl TransferReceipt {
    pub fn primary_variant(&self) -> Option<&str> {
        self.variants.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRegistration {
    pub room_pk: String,
    pub description: String,
    pub file: String,
}
