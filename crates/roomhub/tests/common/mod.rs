//! Scripted `RentalApi` double: counts calls, records the order writes
//! arrive in, and lets a test hold any operation open until released.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Notify;

use roomhub::api::{
    Amenity, ApiError, AvailabilityCheck, Booking, BookingRequest, Category, Credentials,
    LoginOutcome, MediaFile, OAuthGrant, OAuthProvider, Photo, PhotoRegistration, RentalApi,
    Review, RoomDetail, RoomPayload, RoomSummary, SignUpRequest, TransferReceipt,
    UploadDestination, User,
};
use roomhub::config::CacheConfig;
use roomhub::RentalClient;

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, day).expect("valid date")
}

pub fn user(username: &str) -> User {
    User {
        username: username.to_string(),
        name: username.to_uppercase(),
        email: None,
        avatar: None,
        is_host: true,
    }
}

pub fn room_payload(name: &str) -> RoomPayload {
    RoomPayload {
        name: name.to_string(),
        country: "Korea".to_string(),
        city: "Seoul".to_string(),
        price: 80,
        rooms: 1,
        toilets: 1,
        description: "quiet".to_string(),
        address: "1 Test-ro".to_string(),
        pet_friendly: true,
        kind: "private_room".to_string(),
        category: 1,
        amenities: vec![1],
    }
}

pub fn room_detail(pk: &str, version: usize) -> RoomDetail {
    RoomDetail {
        pk: pk.to_string(),
        name: format!("room {pk} v{version}"),
        country: "Korea".to_string(),
        city: "Seoul".to_string(),
        address: "1 Test-ro".to_string(),
        price: 80,
        rooms: 1,
        toilets: 1,
        description: "quiet".to_string(),
        pet_friendly: true,
        kind: "private_room".to_string(),
        owner: user("host"),
        category: None,
        amenities: Vec::new(),
        rating: None,
        is_owner: false,
        photos: Vec::new(),
    }
}

#[derive(Default)]
struct Script {
    calls: HashMap<String, usize>,
    log: Vec<String>,
    gates: HashMap<String, Arc<Notify>>,
    failures: HashMap<String, ApiError>,
    unavailable: Vec<(String, String, String)>,
    transfers: Vec<(UploadDestination, String)>,
    registrations: Vec<PhotoRegistration>,
    variants: Option<Vec<String>>,
}

#[derive(Default)]
pub struct ScriptedApi {
    script: Mutex<Script>,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().expect("script mutex poisoned")
    }

    /// Hold `label` open until [`ScriptedApi::release`] is called for it.
    /// Labels are operation names, `check_availability/{pk}/{in}..{out}` for
    /// a single range, or `transfer_file/{name}` for a single file.
    pub fn gate(&self, label: &str) {
        self.lock()
            .gates
            .insert(label.to_string(), Arc::new(Notify::new()));
    }

    pub fn release(&self, label: &str) {
        if let Some(gate) = self.lock().gates.remove(label) {
            gate.notify_one();
        }
    }

    pub fn fail(&self, operation: &str, error: ApiError) {
        self.lock().failures.insert(operation.to_string(), error);
    }

    pub fn recover(&self, operation: &str) {
        self.lock().failures.remove(operation);
    }

    pub fn mark_unavailable(&self, room_pk: &str, check_in: NaiveDate, check_out: NaiveDate) {
        self.lock().unavailable.push((
            room_pk.to_string(),
            check_in.to_string(),
            check_out.to_string(),
        ));
    }

    pub fn transfer_variants(&self, variants: Vec<String>) {
        self.lock().variants = Some(variants);
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Operation names in arrival order.
    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn transfers(&self) -> Vec<(UploadDestination, String)> {
        self.lock().transfers.clone()
    }

    pub fn registrations(&self) -> Vec<PhotoRegistration> {
        self.lock().registrations.clone()
    }

    /// Count the call, wait on any gate, then report a scripted failure.
    /// Returns the call number for this operation.
    async fn enter(&self, operation: &str, gate_labels: &[String]) -> Result<usize, ApiError> {
        let (count, gates) = {
            let mut script = self.lock();
            let count = {
                let entry = script.calls.entry(operation.to_string()).or_insert(0);
                *entry += 1;
                *entry
            };
            script.log.push(operation.to_string());
            let gates: Vec<Arc<Notify>> = std::iter::once(operation.to_string())
                .chain(gate_labels.iter().cloned())
                .filter_map(|label| script.gates.get(&label).cloned())
                .collect();
            (count, gates)
        };
        for gate in gates {
            gate.notified().await;
        }
        match self.lock().failures.get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(count),
        }
    }
}

#[async_trait]
impl RentalApi for ScriptedApi {
    async fn list_rooms(&self) -> Result<Vec<RoomSummary>, ApiError> {
        let version = self.enter("list_rooms", &[]).await?;
        Ok(vec![RoomSummary {
            pk: "42".to_string(),
            name: format!("room 42 v{version}"),
            country: "Korea".to_string(),
            city: "Seoul".to_string(),
            price: 80,
            rating: None,
            is_owner: false,
            photos: Vec::new(),
        }])
    }

    async fn room(&self, room_pk: &str) -> Result<RoomDetail, ApiError> {
        let version = self.enter("room", &[]).await?;
        Ok(room_detail(room_pk, version))
    }

    async fn room_reviews(&self, _room_pk: &str) -> Result<Vec<Review>, ApiError> {
        self.enter("room_reviews", &[]).await?;
        Ok(vec![Review {
            pk: "r1".to_string(),
            user: user("guest"),
            payload: "lovely".to_string(),
            rating: 5,
        }])
    }

    async fn amenities(&self) -> Result<Vec<Amenity>, ApiError> {
        self.enter("amenities", &[]).await?;
        Ok(vec![Amenity {
            pk: 1,
            name: "Wi-Fi".to_string(),
            description: None,
        }])
    }

    async fn categories(&self, kind: &str) -> Result<Vec<Category>, ApiError> {
        self.enter("categories", &[]).await?;
        Ok(vec![Category {
            pk: 1,
            name: "Apartment".to_string(),
            kind: kind.to_string(),
        }])
    }

    async fn check_availability(
        &self,
        room_pk: &str,
        check_in: &str,
        check_out: &str,
    ) -> Result<AvailabilityCheck, ApiError> {
        let label = format!("check_availability/{room_pk}/{check_in}..{check_out}");
        self.enter("check_availability", &[label]).await?;
        let taken = self.lock().unavailable.iter().any(|(pk, start, end)| {
            pk == room_pk && start == check_in && end == check_out
        });
        Ok(AvailabilityCheck { ok: !taken })
    }

    async fn create_booking(&self, request: BookingRequest) -> Result<Booking, ApiError> {
        let number = self.enter("create_booking", &[]).await?;
        Ok(Booking {
            pk: format!("b{number}"),
            room_pk: request.room_pk,
            check_in: request.check_in,
            check_out: request.check_out,
            guests: request.guests,
        })
    }

    async fn create_room(&self, payload: RoomPayload) -> Result<RoomDetail, ApiError> {
        self.enter("create_room", &[]).await?;
        let mut detail = room_detail("100", 1);
        detail.name = payload.name;
        Ok(detail)
    }

    async fn update_room(
        &self,
        room_pk: &str,
        payload: RoomPayload,
    ) -> Result<RoomDetail, ApiError> {
        self.enter("update_room", &[]).await?;
        let mut detail = room_detail(room_pk, 0);
        detail.name = payload.name;
        Ok(detail)
    }

    async fn delete_room(&self, _room_pk: &str) -> Result<(), ApiError> {
        self.enter("delete_room", &[]).await.map(|_| ())
    }

    async fn current_user(&self) -> Result<User, ApiError> {
        self.enter("current_user", &[]).await?;
        Ok(user("host"))
    }

    async fn log_in(&self, credentials: Credentials) -> Result<LoginOutcome, ApiError> {
        self.enter("log_in", &[]).await?;
        Ok(LoginOutcome {
            ok: format!("Welcome {}", credentials.username),
        })
    }

    async fn sign_up(&self, request: SignUpRequest) -> Result<User, ApiError> {
        self.enter("sign_up", &[]).await?;
        Ok(user(&request.username))
    }

    async fn log_out(&self) -> Result<(), ApiError> {
        self.enter("log_out", &[]).await.map(|_| ())
    }

    async fn oauth_log_in(
        &self,
        _provider: OAuthProvider,
        _grant: OAuthGrant,
    ) -> Result<(), ApiError> {
        self.enter("oauth_log_in", &[]).await.map(|_| ())
    }

    async fn upload_destination(&self) -> Result<UploadDestination, ApiError> {
        let number = self.enter("upload_destination", &[]).await?;
        Ok(UploadDestination {
            id: format!("dest-{number}"),
            upload_url: format!("https://media.test/direct/dest-{number}"),
        })
    }

    async fn transfer_file(
        &self,
        destination: &UploadDestination,
        file: MediaFile,
    ) -> Result<TransferReceipt, ApiError> {
        self.enter("transfer_file", &[format!("transfer_file/{}", file.name)])
            .await?;
        let mut script = self.lock();
        script.transfers.push((destination.clone(), file.name.clone()));
        let variants = script
            .variants
            .clone()
            .unwrap_or_else(|| vec![format!("https://media.test/{}/public", file.name)]);
        Ok(TransferReceipt {
            id: destination.id.clone(),
            variants,
        })
    }

    async fn register_photo(&self, registration: PhotoRegistration) -> Result<Photo, ApiError> {
        self.enter("register_photo", &[]).await?;
        self.lock().registrations.push(registration.clone());
        Ok(Photo {
            pk: "p1".to_string(),
            file: registration.file,
            description: registration.description,
        })
    }
}

pub fn client(api: &Arc<ScriptedApi>) -> RentalClient<ScriptedApi> {
    RentalClient::new(Arc::clone(api), &CacheConfig::default())
}
