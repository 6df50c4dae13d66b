//! The surface a UI binds to: every read goes through the query cache under
//! its key, every write through the mutation broadcaster with the keys it
//! makes stale.

use std::sync::Arc;

use crate::api::{
    Amenity, Booking, BookingRequest, Category, Credentials, LoginOutcome, OAuthGrant,
    OAuthProvider, RentalApi, Review, RoomDetail, RoomPayload, RoomSummary, SignUpRequest, User,
};
use crate::availability::{AvailabilityProber, DateRange, Probe};
use crate::config::CacheConfig;
use crate::mutation::{
    Invalidation, MutationBroadcaster, MutationEvent, MutationKind, MutationRecord,
};
use crate::query::{KeyPattern, QueryCache, QueryKey, QueryState, ReadOptions, ResourceKind};
use crate::upload::{PipelineRun, PipelineStatus, UploadPipeline, UploadRequest};

pub struct RentalClient<A> {
    api: Arc<A>,
    cache: QueryCache,
    mutations: MutationBroadcaster,
    availability: AvailabilityProber<A>,
    uploads: UploadPipeline<A>,
    read_options: ReadOptions,
}

impl<A> std::fmt::Debug for RentalClient<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RentalClient")
            .field("cache", &self.cache)
            .field("read_options", &self.read_options)
            .finish_non_exhaustive()
    }
}

/// Session changes flip per-user flags such as `is_owner` on every room.
fn session_invalidation() -> Invalidation {
    Invalidation::of([
        KeyPattern::exact(QueryKey::current_user()),
        KeyPattern::kind(ResourceKind::Rooms),
    ])
}

fn room_invalidation(room_pk: &str) -> Invalidation {
    Invalidation::of([
        KeyPattern::resource(ResourceKind::Rooms, room_pk),
        KeyPattern::exact(QueryKey::rooms()),
    ])
}

impl<A: RentalApi> RentalClient<A> {
    pub fn new(api: Arc<A>, config: &CacheConfig) -> Self {
        Self::with_cache(api, QueryCache::new(), config)
    }

    /// Build around an existing cache, e.g. one with an injected store.
    pub fn with_cache(api: Arc<A>, cache: QueryCache, config: &CacheConfig) -> Self {
        let mutations = MutationBroadcaster::new(cache.clone(), config.event_capacity);
        let availability = AvailabilityProber::new(Arc::clone(&api), cache.clone());
        let uploads = UploadPipeline::new(Arc::clone(&api), mutations.clone());
        Self {
            api,
            cache,
            mutations,
            availability,
            uploads,
            read_options: ReadOptions::default().stale_after(config.stale_after()),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn mutations(&self) -> &MutationBroadcaster {
        &self.mutations
    }

    pub fn availability(&self) -> &AvailabilityProber<A> {
        &self.availability
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MutationEvent> {
        self.mutations.subscribe()
    }

    pub fn upload_status(&self) -> tokio::sync::watch::Receiver<PipelineStatus> {
        self.uploads.status()
    }

    // Reads.

    pub async fn rooms(&self) -> QueryState<Vec<RoomSummary>> {
        let api = Arc::clone(&self.api);
        self.cache
            .read(QueryKey::rooms(), self.read_options, move || async move {
                api.list_rooms().await
            })
            .await
    }

    pub async fn room(&self, room_pk: &str) -> QueryState<RoomDetail> {
        let api = Arc::clone(&self.api);
        let pk = room_pk.to_string();
        self.cache
            .read(QueryKey::room(room_pk), self.read_options, move || async move {
                api.room(&pk).await
            })
            .await
    }

    pub async fn room_reviews(&self, room_pk: &str) -> QueryState<Vec<Review>> {
        let api = Arc::clone(&self.api);
        let pk = room_pk.to_string();
        self.cache
            .read(
                QueryKey::room_reviews(room_pk),
                self.read_options,
                move || async move { api.room_reviews(&pk).await },
            )
            .await
    }

    pub async fn amenities(&self) -> QueryState<Vec<Amenity>> {
        let api = Arc::clone(&self.api);
        self.cache
            .read(QueryKey::amenities(), self.read_options, move || async move {
                api.amenities().await
            })
            .await
    }

    pub async fn categories(&self, kind: &str) -> QueryState<Vec<Category>> {
        let api = Arc::clone(&self.api);
        let category_kind = kind.to_string();
        self.cache
            .read(QueryKey::categories(kind), self.read_options, move || async move {
                api.categories(&category_kind).await
            })
            .await
    }

    /// The logged-in user; an `Unauthorized` error means nobody is.
    pub async fn current_user(&self) -> QueryState<User> {
        let api = Arc::clone(&self.api);
        self.cache
            .read(QueryKey::current_user(), self.read_options, move || async move {
                api.current_user().await
            })
            .await
    }

    pub async fn check_availability(&self, room_pk: &str, range: DateRange) -> Probe {
        self.availability.probe(room_pk, range).await
    }

    /// Ask the backend again for `range`, replacing a cached answer or error.
    pub async fn recheck_availability(&self, room_pk: &str, range: DateRange) -> Probe {
        self.availability.recheck(room_pk, range).await
    }

    // Writes.

    pub async fn log_in(
        &self,
        credentials: Credentials,
    ) -> MutationRecord<Credentials, LoginOutcome> {
        let api = Arc::clone(&self.api);
        self.mutations
            .run(
                MutationKind::LogIn,
                credentials,
                session_invalidation(),
                move |credentials| async move { api.log_in(credentials).await },
            )
            .await
    }

    pub async fn log_out(&self) -> MutationRecord<(), ()> {
        let api = Arc::clone(&self.api);
        self.mutations
            .run(
                MutationKind::LogOut,
                (),
                session_invalidation(),
                move |()| async move { api.log_out().await },
            )
            .await
    }

    pub async fn sign_up(&self, request: SignUpRequest) -> MutationRecord<SignUpRequest, User> {
        let api = Arc::clone(&self.api);
        self.mutations
            .run(
                MutationKind::SignUp,
                request,
                Invalidation::of([KeyPattern::exact(QueryKey::current_user())]),
                move |request| async move { api.sign_up(request).await },
            )
            .await
    }

    /// Exchange a provider authorization code for a session.
    pub async fn oauth_log_in(
        &self,
        provider: OAuthProvider,
        grant: OAuthGrant,
    ) -> MutationRecord<(OAuthProvider, OAuthGrant), ()> {
        let api = Arc::clone(&self.api);
        self.mutations
            .run(
                MutationKind::OAuthLogIn,
                (provider, grant),
                session_invalidation(),
                move |(provider, grant)| async move { api.oauth_log_in(provider, grant).await },
            )
            .await
    }

    pub async fn create_room(
        &self,
        payload: RoomPayload,
    ) -> MutationRecord<RoomPayload, RoomDetail> {
        let api = Arc::clone(&self.api);
        self.mutations
            .run(
                MutationKind::CreateRoom,
                payload,
                Invalidation::of([KeyPattern::exact(QueryKey::rooms())]),
                move |payload| async move { api.create_room(payload).await },
            )
            .await
    }

    pub async fn update_room(
        &self,
        room_pk: &str,
        payload: RoomPayload,
    ) -> MutationRecord<(String, RoomPayload), RoomDetail> {
        let api = Arc::clone(&self.api);
        self.mutations
            .run(
                MutationKind::UpdateRoom,
                (room_pk.to_string(), payload),
                room_invalidation(room_pk),
                move |(pk, payload)| async move { api.update_room(&pk, payload).await },
            )
            .await
    }

    pub async fn delete_room(&self, room_pk: &str) -> MutationRecord<String, ()> {
        let api = Arc::clone(&self.api);
        self.mutations
            .run(
                MutationKind::DeleteRoom,
                room_pk.to_string(),
                room_invalidation(room_pk)
                    .and(KeyPattern::resource(ResourceKind::Availability, room_pk)),
                move |pk| async move { api.delete_room(&pk).await },
            )
            .await
    }

    pub async fn book(&self, request: BookingRequest) -> MutationRecord<BookingRequest, Booking> {
        let api = Arc::clone(&self.api);
        let invalidation = Invalidation::of([KeyPattern::resource(
            ResourceKind::Availability,
            request.room_pk.clone(),
        )]);
        self.mutations
            .run(
                MutationKind::Booking,
                request,
                invalidation,
                move |request| async move { api.create_booking(request).await },
            )
            .await
    }

    /// Publish a photo through the acquire, transfer, register stages.
    pub async fn upload_photo(&self, request: UploadRequest) -> PipelineRun {
        self.uploads.run(request).await
    }
}
