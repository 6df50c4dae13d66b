use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use tracing::info;

use crate::api::{
    Amenity, Booking, BookingRequest, Category, Credentials, LoginOutcome, OAuthGrant,
    OAuthProvider, Photo, PhotoRegistration, Review, RoomDetail, RoomPayload, RoomSummary,
    SignUpRequest, TransferReceipt, UploadDestination, User,
};

/// Rejections the sandbox hands back, mapped onto HTTP statuses by the router.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("only the owner can do that")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
}

struct Account {
    password: String,
    user: User,
}

struct StoredRoom {
    detail: RoomDetail,
    owner: String,
}

#[derive(Default)]
struct SandboxData {
    accounts: HashMap<String, Account>,
    session: Option<String>,
    rooms: BTreeMap<u64, StoredRoom>,
    reviews: HashMap<String, Vec<Review>>,
    amenities: Vec<Amenity>,
    categories: Vec<Category>,
    bookings: Vec<Booking>,
    open_destinations: HashSet<String>,
    stored_variants: HashSet<String>,
    next_id: u64,
}

impl SandboxData {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn session_user(&self) -> Result<&User, SandboxError> {
        self.session
            .as_ref()
            .and_then(|username| self.accounts.get(username))
            .map(|account| &account.user)
            .ok_or(SandboxError::Unauthenticated)
    }

    fn room_mut(&mut self, room_pk: &str) -> Result<&mut StoredRoom, SandboxError> {
        room_pk
            .parse::<u64>()
            .ok()
            .and_then(|pk| self.rooms.get_mut(&pk))
            .ok_or_else(|| SandboxError::NotFound(format!("room {room_pk}")))
    }

    fn room(&self, room_pk: &str) -> Result<&StoredRoom, SandboxError> {
        room_pk
            .parse::<u64>()
            .ok()
            .and_then(|pk| self.rooms.get(&pk))
            .ok_or_else(|| SandboxError::NotFound(format!("room {room_pk}")))
    }

    fn require_owner(&self, room_pk: &str) -> Result<(), SandboxError> {
        let user = self.session_user()?.username.clone();
        if self.room(room_pk)?.owner == user {
            Ok(())
        } else {
            Err(SandboxError::Forbidden)
        }
    }

    fn viewer(&self) -> Option<&str> {
        self.session.as_deref()
    }

    fn with_owner_flag(&self, room: &StoredRoom) -> RoomDetail {
        let mut detail = room.detail.clone();
        detail.is_owner = self.viewer() == Some(room.owner.as_str());
        detail
    }

    fn overlaps(&self, room_pk: &str, check_in: NaiveDate, check_out: NaiveDate) -> bool {
        self.bookings.iter().any(|booking| {
            booking.room_pk == room_pk
                && booking.check_in < check_out
                && check_in < booking.check_out
        })
    }

    fn resolve_payload(
        &self,
        payload: &RoomPayload,
    ) -> Result<(Category, Vec<Amenity>), SandboxError> {
        let category = self
            .categories
            .iter()
            .find(|category| category.pk == payload.category)
            .cloned()
            .ok_or_else(|| SandboxError::BadRequest("category not found".to_string()))?;
        let amenities = payload
            .amenities
            .iter()
            .map(|pk| {
                self.amenities
                    .iter()
                    .find(|amenity| amenity.pk == *pk)
                    .cloned()
                    .ok_or_else(|| SandboxError::BadRequest(format!("amenity {pk} not found")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((category, amenities))
    }
}

/// In-memory rental backend used by the sandbox server, demos, and tests.
///
/// One session at a time: logging in replaces whoever was logged in.
pub struct SandboxBackend {
    origin: String,
    data: Mutex<SandboxData>,
}

impl std::fmt::Debug for SandboxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxBackend")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl SandboxBackend {
    /// `origin` is the externally reachable `scheme://host:port`, used to mint
    /// absolute upload destinations and stored-file URLs.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            data: Mutex::new(SandboxData::default()),
        }
    }

    /// A backend preloaded with two accounts, two rooms, reviews, amenities,
    /// categories, and one booking.
    pub fn seeded(origin: impl Into<String>) -> Self {
        let backend = Self::new(origin);
        {
            let mut data = backend.lock();
            seed(&mut data);
        }
        backend
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn lock(&self) -> MutexGuard<'_, SandboxData> {
        self.data.lock().expect("sandbox mutex poisoned")
    }

    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        let data = self.lock();
        data.rooms
            .values()
            .map(|room| {
                let detail = data.with_owner_flag(room);
                RoomSummary {
                    pk: detail.pk,
                    name: detail.name,
                    country: detail.country,
                    city: detail.city,
                    price: detail.price,
                    rating: detail.rating,
                    is_owner: detail.is_owner,
                    photos: detail.photos,
                }
            })
            .collect()
    }

    pub fn room(&self, room_pk: &str) -> Result<RoomDetail, SandboxError> {
        let data = self.lock();
        let room = data.room(room_pk)?;
        Ok(data.with_owner_flag(room))
    }

    pub fn room_reviews(&self, room_pk: &str) -> Result<Vec<Review>, SandboxError> {
        let data = self.lock();
        data.room(room_pk)?;
        Ok(data.reviews.get(room_pk).cloned().unwrap_or_default())
    }

    pub fn amenities(&self) -> Vec<Amenity> {
        self.lock().amenities.clone()
    }

    pub fn categories(&self, kind: &str) -> Vec<Category> {
        self.lock()
            .categories
            .iter()
            .filter(|category| category.kind == kind)
            .cloned()
            .collect()
    }

    pub fn check_availability(
        &self,
        room_pk: &str,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<bool, SandboxError> {
        if check_in >= check_out {
            return Err(SandboxError::BadRequest(
                "check_out must be after check_in".to_string(),
            ));
        }
        let data = self.lock();
        data.room(room_pk)?;
        Ok(!data.overlaps(room_pk, check_in, check_out))
    }

    pub fn create_booking(&self, request: BookingRequest) -> Result<Booking, SandboxError> {
        let mut data = self.lock();
        data.session_user()?;
        data.room(&request.room_pk)?;
        if request.check_in >= request.check_out {
            return Err(SandboxError::BadRequest(
                "check_out must be after check_in".to_string(),
            ));
        }
        if request.guests == 0 {
            return Err(SandboxError::BadRequest("at least one guest".to_string()));
        }
        if data.overlaps(&request.room_pk, request.check_in, request.check_out) {
            return Err(SandboxError::BadRequest(
                "those dates are already taken".to_string(),
            ));
        }
        let booking = Booking {
            pk: data.next_id().to_string(),
            room_pk: request.room_pk,
            check_in: request.check_in,
            check_out: request.check_out,
            guests: request.guests,
        };
        data.bookings.push(booking.clone());
        Ok(booking)
    }

    pub fn create_room(&self, payload: RoomPayload) -> Result<RoomDetail, SandboxError> {
        let mut data = self.lock();
        let owner = data.session_user()?.clone();
        let (category, amenities) = data.resolve_payload(&payload)?;
        let pk = data.next_id();
        let detail = room_detail(pk, payload, owner.clone(), category, amenities);
        data.rooms.insert(
            pk,
            StoredRoom {
                detail,
                owner: owner.username,
            },
        );
        let room = data.room(&pk.to_string())?;
        Ok(data.with_owner_flag(room))
    }

    pub fn update_room(
        &self,
        room_pk: &str,
        payload: RoomPayload,
    ) -> Result<RoomDetail, SandboxError> {
        let mut data = self.lock();
        data.require_owner(room_pk)?;
        let (category, amenities) = data.resolve_payload(&payload)?;
        let room = data.room_mut(room_pk)?;
        let detail = &mut room.detail;
        detail.name = payload.name;
        detail.country = payload.country;
        detail.city = payload.city;
        detail.address = payload.address;
        detail.price = payload.price;
        detail.rooms = payload.rooms;
        detail.toilets = payload.toilets;
        detail.description = payload.description;
        detail.pet_friendly = payload.pet_friendly;
        detail.kind = payload.kind;
        detail.category = Some(category);
        detail.amenities = amenities;
        let room = data.room(room_pk)?;
        Ok(data.with_owner_flag(room))
    }

    pub fn delete_room(&self, room_pk: &str) -> Result<(), SandboxError> {
        let mut data = self.lock();
        data.require_owner(room_pk)?;
        if let Ok(pk) = room_pk.parse::<u64>() {
            data.rooms.remove(&pk);
        }
        data.reviews.remove(room_pk);
        data.bookings.retain(|booking| booking.room_pk != room_pk);
        Ok(())
    }

    pub fn current_user(&self) -> Result<User, SandboxError> {
        self.lock().session_user().cloned()
    }

    pub fn log_in(&self, credentials: Credentials) -> Result<LoginOutcome, SandboxError> {
        let mut data = self.lock();
        let valid = data
            .accounts
            .get(&credentials.username)
            .is_some_and(|account| account.password == credentials.password);
        if !valid {
            return Err(SandboxError::BadRequest("wrong password".to_string()));
        }
        info!(username = %credentials.username, "sandbox session opened");
        data.session = Some(credentials.username);
        Ok(LoginOutcome {
            ok: "Welcome!".to_string(),
        })
    }

    pub fn log_out(&self) -> Result<(), SandboxError> {
        let mut data = self.lock();
        data.session_user()?;
        data.session = None;
        Ok(())
    }

    pub fn sign_up(&self, request: SignUpRequest) -> Result<User, SandboxError> {
        let mut data = self.lock();
        if request.password.len() < 4 {
            return Err(SandboxError::BadRequest("password too short".to_string()));
        }
        if data.accounts.contains_key(&request.username) {
            return Err(SandboxError::BadRequest("username already taken".to_string()));
        }
        let user = User {
            username: request.username.clone(),
            name: request.name,
            email: Some(request.email),
            avatar: None,
            is_host: false,
        };
        data.accounts.insert(
            request.username.clone(),
            Account {
                password: request.password,
                user: user.clone(),
            },
        );
        data.session = Some(request.username);
        Ok(user)
    }

    pub fn oauth_log_in(
        &self,
        provider: OAuthProvider,
        grant: OAuthGrant,
    ) -> Result<(), SandboxError> {
        if grant.code.trim().is_empty() {
            return Err(SandboxError::BadRequest("missing authorization code".to_string()));
        }
        if provider == OAuthProvider::Naver && grant.state.is_none() {
            return Err(SandboxError::BadRequest("missing state".to_string()));
        }
        let username = format!("{provider}-{}", grant.code.trim());
        let mut data = self.lock();
        data.accounts.entry(username.clone()).or_insert_with(|| Account {
            password: String::new(),
            user: User {
                username: username.clone(),
                name: format!("{provider} user"),
                email: None,
                avatar: None,
                is_host: false,
            },
        });
        data.session = Some(username);
        Ok(())
    }

    pub fn upload_destination(&self) -> Result<UploadDestination, SandboxError> {
        let mut data = self.lock();
        data.session_user()?;
        let id = format!("dest-{}", data.next_id());
        data.open_destinations.insert(id.clone());
        Ok(UploadDestination {
            upload_url: format!("{}/uploads/{id}", self.origin),
            id,
        })
    }

    /// Accept a file for a destination. Destinations are single-use.
    pub fn accept_upload(
        &self,
        destination_id: &str,
        file_name: &str,
        len: usize,
    ) -> Result<TransferReceipt, SandboxError> {
        if len == 0 {
            return Err(SandboxError::BadRequest("empty file".to_string()));
        }
        let mut data = self.lock();
        if !data.open_destinations.remove(destination_id) {
            return Err(SandboxError::NotFound(format!("upload destination {destination_id}")));
        }
        let variant = format!(
            "{}/media/{destination_id}/{}",
            self.origin,
            stored_file_name(file_name)
        );
        data.stored_variants.insert(variant.clone());
        Ok(TransferReceipt {
            id: destination_id.to_string(),
            variants: vec![variant],
        })
    }

    pub fn register_photo(&self, registration: PhotoRegistration) -> Result<Photo, SandboxError> {
        let mut data = self.lock();
        data.require_owner(&registration.room_pk)?;
        if !data.stored_variants.contains(&registration.file) {
            return Err(SandboxError::BadRequest("file was never uploaded".to_string()));
        }
        let photo = Photo {
            pk: data.next_id().to_string(),
            file: registration.file,
            description: registration.description,
        };
        data.room_mut(&registration.room_pk)?
            .detail
            .photos
            .push(photo.clone());
        Ok(photo)
    }

    /// Destinations handed out but never consumed.
    pub fn orphaned_destinations(&self) -> usize {
        self.lock().open_destinations.len()
    }
}

fn room_detail(
    pk: u64,
    payload: RoomPayload,
    owner: User,
    category: Category,
    amenities: Vec<Amenity>,
) -> RoomDetail {
    RoomDetail {
        pk: pk.to_string(),
        name: payload.name,
        country: payload.country,
        city: payload.city,
        address: payload.address,
        price: payload.price,
        rooms: payload.rooms,
        toilets: payload.toilets,
        description: payload.description,
        pet_friendly: payload.pet_friendly,
        kind: payload.kind,
        owner,
        category: Some(category),
        amenities,
        rating: None,
        is_owner: false,
        photos: Vec::new(),
    }
}

fn seed(data: &mut SandboxData) {
    let host = User {
        username: "host".to_string(),
        name: "Hana Host".to_string(),
        email: Some("host@example.com".to_string()),
        avatar: None,
        is_host: true,
    };
    let guest = User {
        username: "guest".to_string(),
        name: "Gil Guest".to_string(),
        email: Some("guest@example.com".to_string()),
        avatar: None,
        is_host: false,
    };
    data.accounts.insert(
        host.username.clone(),
        Account {
            password: "host-pass".to_string(),
            user: host.clone(),
        },
    );
    data.accounts.insert(
        guest.username.clone(),
        Account {
            password: "guest-pass".to_string(),
            user: guest.clone(),
        },
    );

    data.amenities = vec![
        Amenity {
            pk: 1,
            name: "Wi-Fi".to_string(),
            description: None,
        },
        Amenity {
            pk: 2,
            name: "Kitchen".to_string(),
            description: Some("Shared, fully equipped".to_string()),
        },
    ];
    data.categories = vec![
        Category {
            pk: 1,
            name: "Apartment".to_string(),
            kind: "room".to_string(),
        },
        Category {
            pk: 2,
            name: "Tour".to_string(),
            kind: "experience".to_string(),
        },
    ];

    let rooms = [
        ("Seaside loft", "Busan", 120_u32),
        ("Hanok guesthouse", "Seoul", 95),
    ];
    for (name, city, price) in rooms {
        let pk = data.next_id();
        let payload = RoomPayload {
            name: name.to_string(),
            country: "Korea".to_string(),
            city: city.to_string(),
            price,
            rooms: 2,
            toilets: 1,
            description: format!("{name} in {city}"),
            address: format!("{pk} Sandbox-ro, {city}"),
            pet_friendly: false,
            kind: "entire_place".to_string(),
            category: 1,
            amenities: vec![1, 2],
        };
        let (category, amenities) = match data.resolve_payload(&payload) {
            Ok(resolved) => resolved,
            Err(_) => continue,
        };
        let mut detail = room_detail(pk, payload, host.clone(), category, amenities);
        detail.rating = Some(4.8);
        data.rooms.insert(
            pk,
            StoredRoom {
                detail,
                owner: host.username.clone(),
            },
        );
        data.reviews.insert(
            pk.to_string(),
            vec![Review {
                pk: format!("review-{pk}"),
                user: guest.clone(),
                payload: "Would stay again".to_string(),
                rating: 5,
            }],
        );
    }

    if let (Some(check_in), Some(check_out)) = (
        NaiveDate::from_ymd_opt(2025, 1, 10),
        NaiveDate::from_ymd_opt(2025, 1, 12),
    ) {
        let pk = data.next_id().to_string();
        data.bookings.push(Booking {
            pk,
            room_pk: "1".to_string(),
            check_in,
            check_out,
            guests: 2,
        });
    }
}

/// Last path segment of a client-supplied name, reduced to URL-safe characters.
fn stored_file_name(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
