//! End-to-end behavior of the client facade against a scripted backend:
//! coalesced reads, invalidation after writes, availability probing, and the
//! photo upload pipeline.

mod common;

use std::sync::Arc;

use common::{client, date, room_payload, ScriptedApi};
use roomhub::api::{
    ApiError, BookingRequest, Credentials, MediaFile, OAuthGrant, OAuthProvider,
    PhotoRegistration, SignUpRequest,
};
use roomhub::availability::{DateRange, ProbeState};
use roomhub::mutation::{MutationKind, MutationStatus};
use roomhub::query::{KeyPattern, QueryError, QueryKey, QueryStatus};
use roomhub::upload::{PipelineStage, PipelineStatus, UploadRequest};
use roomhub::RentalClient;

async fn wait_for_call(api: &ScriptedApi, operation: &str, count: usize) {
    while api.calls(operation) < count {
        tokio::task::yield_now().await;
    }
}

fn photo_request() -> UploadRequest {
    UploadRequest {
        file: MediaFile::new("a.jpg", mime::IMAGE_JPEG, vec![0xFF, 0xD8, 0xFF]),
        description: "nice view".to_string(),
        room_pk: "42".to_string(),
    }
}

#[tokio::test]
async fn concurrent_reads_of_one_key_share_a_single_fetch() {
    let api = ScriptedApi::new();
    api.gate("room");
    let client = client(&api);

    let (first, second, ()) = tokio::join!(client.room("42"), client.room("42"), async {
        wait_for_call(&api, "room", 1).await;
        api.release("room");
    });

    assert_eq!(api.calls("room"), 1);
    let first = first.value().cloned().expect("first reader ready");
    let second = second.value().cloned().expect("second reader ready");
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn reads_are_served_from_cache_until_a_write_invalidates_them() {
    let api = ScriptedApi::new();
    let client = client(&api);

    let before = client.rooms().await;
    let again = client.rooms().await;
    assert_eq!(api.calls("list_rooms"), 1);
    assert_eq!(
        before.value().map(|rooms| rooms[0].name.clone()),
        again.value().map(|rooms| rooms[0].name.clone())
    );

    let record = client.update_room("42", room_payload("renamed")).await;
    assert_eq!(record.status, MutationStatus::Success);

    let after = client.rooms().await;
    assert_eq!(api.calls("list_rooms"), 2);
    assert_eq!(
        after.value().map(|rooms| rooms[0].name.as_str()),
        Some("room 42 v2")
    );
}

#[tokio::test]
async fn room_write_refreshes_keys_nested_under_the_room() {
    let api = ScriptedApi::new();
    let client = client(&api);
    client.room_reviews("42").await;
    client.room_reviews("7").await;
    assert_eq!(api.calls("room_reviews"), 2);

    let record = client.update_room("42", room_payload("renamed")).await;
    assert!(record.is_success());

    client.room_reviews("42").await;
    client.room_reviews("7").await;
    assert_eq!(api.calls("room_reviews"), 3);
}

#[tokio::test]
async fn failed_write_leaves_cached_reads_alone() {
    let api = ScriptedApi::new();
    let client = client(&api);
    client.room("42").await;

    api.fail("delete_room", ApiError::from_status(403, "not yours"));
    let record = client.delete_room("42").await;
    assert_eq!(record.status, MutationStatus::Error);
    assert!(matches!(record.error, Some(ApiError::Unauthorized { status: 403, .. })));

    client.room("42").await;
    assert_eq!(api.calls("room"), 1);
    assert_eq!(api.calls("delete_room"), 1);
}

#[tokio::test]
async fn session_changes_refresh_user_and_room_keys_only() {
    let api = ScriptedApi::new();
    let client = client(&api);
    client.current_user().await;
    client.rooms().await;
    client.room("42").await;
    client.categories("room").await;

    let record = client
        .log_in(Credentials {
            username: "host".to_string(),
            password: "host-pass".to_string(),
        })
        .await;
    assert!(record.is_success());

    client.current_user().await;
    client.rooms().await;
    client.room("42").await;
    client.categories("room").await;
    assert_eq!(api.calls("current_user"), 2);
    assert_eq!(api.calls("list_rooms"), 2);
    assert_eq!(api.calls("room"), 2);
    assert_eq!(api.calls("categories"), 1);
}

#[tokio::test]
async fn errors_are_kept_until_the_key_is_invalidated() {
    let api = ScriptedApi::new();
    let client = client(&api);
    api.fail("room", ApiError::from_status(500, "boom"));

    let failed = client.room("42").await;
    assert!(matches!(
        failed.error(),
        Some(QueryError::Api(ApiError::Server { status: 500, .. }))
    ));

    api.recover("room");
    assert_eq!(client.room("42").await.status(), QueryStatus::Error);
    assert_eq!(api.calls("room"), 1);

    client
        .cache()
        .invalidate(&KeyPattern::exact(QueryKey::room("42")));
    assert_eq!(client.room("42").await.status(), QueryStatus::Ready);
    assert_eq!(api.calls("room"), 2);
}

#[tokio::test]
async fn each_date_range_is_checked_separately() {
    let api = ScriptedApi::new();
    api.mark_unavailable("42", date(1), date(4));
    let client = client(&api);

    let short = client
        .check_availability("42", DateRange::new(date(1), date(3)))
        .await;
    let long = client
        .check_availability("42", DateRange::new(date(1), date(4)))
        .await;
    let short_again = client
        .check_availability("42", DateRange::new(date(1), date(3)))
        .await;

    assert_eq!(short.state, ProbeState::Ready { available: true });
    assert_eq!(long.state, ProbeState::Ready { available: false });
    assert_eq!(short_again.state, ProbeState::Ready { available: true });
    assert_ne!(short.key, long.key);
    assert_eq!(api.calls("check_availability"), 2);
}

#[tokio::test]
async fn incomplete_selection_is_idle_and_never_fetches() {
    let api = ScriptedApi::new();
    let client = client(&api);

    let probe = client
        .check_availability("42", DateRange::starting(date(1)))
        .await;

    assert_eq!(probe.state, ProbeState::Idle);
    assert_eq!(probe.state.available(), None);
    assert_eq!(probe.key, None);
    assert_eq!(api.calls("check_availability"), 0);
}

#[tokio::test]
async fn late_result_for_an_abandoned_range_is_discarded() {
    let api = ScriptedApi::new();
    let slow = "check_availability/42/2025-01-01..2025-01-03";
    api.gate(slow);
    let client = client(&api);

    let (abandoned, latest) = tokio::join!(
        client.check_availability("42", DateRange::new(date(1), date(3))),
        async {
            wait_for_call(&api, "check_availability", 1).await;
            let latest = client
                .check_availability("42", DateRange::new(date(5), date(7)))
                .await;
            api.release(slow);
            latest
        }
    );

    assert_eq!(abandoned.state, ProbeState::Superseded);
    assert_eq!(latest.state, ProbeState::Ready { available: true });
    assert_eq!(
        client.availability().current_intent(),
        Some(QueryKey::availability("42", date(5), date(7)))
    );
}

#[tokio::test]
async fn booking_rechecks_only_the_booked_rooms_ranges() {
    let api = ScriptedApi::new();
    let client = client(&api);
    client
        .check_availability("42", DateRange::new(date(1), date(3)))
        .await;
    client
        .check_availability("7", DateRange::new(date(1), date(3)))
        .await;
    client.room("42").await;

    let mut events = client.subscribe();
    let record = client
        .book(BookingRequest {
            room_pk: "42".to_string(),
            check_in: date(1),
            check_out: date(3),
            guests: 2,
        })
        .await;
    assert!(record.is_success());

    let pending = events.recv().await.expect("pending event");
    let success = events.recv().await.expect("success event");
    assert_eq!((pending.kind, pending.status), (MutationKind::Booking, MutationStatus::Pending));
    assert_eq!(success.status, MutationStatus::Success);
    assert_eq!(success.id, record.id);

    let keys = client.cache().keys();
    assert!(!keys.contains(&QueryKey::availability("42", date(1), date(3))));
    assert!(keys.contains(&QueryKey::availability("7", date(1), date(3))));
    assert!(keys.contains(&QueryKey::room("42")));
}

#[tokio::test]
async fn upload_runs_acquire_transfer_register_in_order() {
    let api = ScriptedApi::new();
    let client = client(&api);
    client.room("42").await;

    let run = client.upload_photo(photo_request()).await;

    assert_eq!(run.status, PipelineStatus::Done);
    assert_eq!(
        api.log(),
        vec!["room", "upload_destination", "transfer_file", "register_photo"]
    );
    let destination = run.destination.clone().expect("destination recorded");
    assert_eq!(api.transfers(), vec![(destination, "a.jpg".to_string())]);
    assert_eq!(
        api.registrations(),
        vec![PhotoRegistration {
            room_pk: "42".to_string(),
            description: "nice view".to_string(),
            file: "https://media.test/a.jpg/public".to_string(),
        }]
    );
    assert_eq!(run.mutations.len(), 3);
    assert_eq!(*client.upload_status().borrow(), PipelineStatus::Done);
    assert!(!client.cache().keys().contains(&QueryKey::room("42")));
}

#[tokio::test]
async fn failed_transfer_stops_the_pipeline_before_registration() {
    let api = ScriptedApi::new();
    api.fail("transfer_file", ApiError::Transport("connection reset".to_string()));
    let client = client(&api);
    client.room("42").await;

    let run = client.upload_photo(photo_request()).await;

    assert_eq!(
        run.status,
        PipelineStatus::Aborted {
            stage: PipelineStage::Transfer,
            error: ApiError::Transport("connection reset".to_string()),
        }
    );
    assert!(run.destination.is_some());
    assert!(run.photo.is_none());
    assert_eq!(api.calls("register_photo"), 0);
    assert_eq!(run.mutations.len(), 2);
    assert!(client.cache().keys().contains(&QueryKey::room("42")));
    assert!(client.upload_status().borrow().is_terminal());
}

#[tokio::test]
async fn transfer_without_variants_aborts_at_transfer() {
    let api = ScriptedApi::new();
    api.transfer_variants(Vec::new());
    let client = client(&api);

    let run = client.upload_photo(photo_request()).await;

    assert!(matches!(
        run.status,
        PipelineStatus::Aborted {
            stage: PipelineStage::Transfer,
            ..
        }
    ));
    assert!(run.receipt.is_some());
    assert_eq!(api.calls("register_photo"), 0);
}

#[tokio::test]
async fn failed_range_check_can_be_rechecked() {
    let api = ScriptedApi::new();
    api.fail("check_availability", ApiError::Transport("reset".to_string()));
    let client = client(&api);
    let range = DateRange::new(date(1), date(3));

    let failed = client.check_availability("42", range).await;
    assert!(matches!(failed.state, ProbeState::Error(_)));

    api.recover("check_availability");
    let cached = client.check_availability("42", range).await;
    assert!(matches!(cached.state, ProbeState::Error(_)));
    assert_eq!(api.calls("check_availability"), 1);

    let rechecked = client.recheck_availability("42", range).await;
    assert_eq!(rechecked.state, ProbeState::Ready { available: true });
    assert_eq!(rechecked.key, failed.key);
    assert_eq!(api.calls("check_availability"), 2);

    let served = client.check_availability("42", range).await;
    assert_eq!(served.state, ProbeState::Ready { available: true });
    assert_eq!(api.calls("check_availability"), 2);
}

#[tokio::test]
async fn recheck_of_an_abandoned_range_is_discarded() {
    let api = ScriptedApi::new();
    let slow = "check_availability/42/2025-01-01..2025-01-03";
    api.gate(slow);
    let client = client(&api);

    let (abandoned, latest) = tokio::join!(
        client.recheck_availability("42", DateRange::new(date(1), date(3))),
        async {
            wait_for_call(&api, "check_availability", 1).await;
            let latest = client
                .check_availability("42", DateRange::new(date(5), date(7)))
                .await;
            api.release(slow);
            latest
        }
    );

    assert_eq!(abandoned.state, ProbeState::Superseded);
    assert_eq!(latest.state, ProbeState::Ready { available: true });
}

#[tokio::test]
async fn switching_rooms_discards_the_previous_rooms_probe() {
    let api = ScriptedApi::new();
    let slow = "check_availability/42/2025-01-01..2025-01-03";
    api.gate(slow);
    let client = client(&api);
    let range = DateRange::new(date(1), date(3));

    let (abandoned, latest) = tokio::join!(client.check_availability("42", range), async {
        wait_for_call(&api, "check_availability", 1).await;
        let latest = client.check_availability("7", range).await;
        api.release(slow);
        latest
    });

    assert_eq!(abandoned.state, ProbeState::Superseded);
    assert_eq!(latest.state, ProbeState::Ready { available: true });
    assert_eq!(
        client.availability().current_intent(),
        Some(QueryKey::availability("7", date(1), date(3)))
    );
}

async fn warm_cache(client: &RentalClient<ScriptedApi>) -> Vec<QueryKey> {
    client.current_user().await;
    client.rooms().await;
    client.room("42").await;
    client.room_reviews("42").await;
    client.room("7").await;
    client.amenities().await;
    client.categories("room").await;
    client
        .check_availability("42", DateRange::new(date(1), date(3)))
        .await;
    client
        .check_availability("7", DateRange::new(date(1), date(3)))
        .await;
    let mut keys = client.cache().keys();
    keys.sort();
    keys
}

fn remaining(client: &RentalClient<ScriptedApi>, warmed: &[QueryKey]) -> Vec<QueryKey> {
    let keys = client.cache().keys();
    warmed
        .iter()
        .filter(|key| keys.contains(key))
        .cloned()
        .collect()
}

fn without(warmed: &[QueryKey], dropped: &[QueryKey]) -> Vec<QueryKey> {
    warmed
        .iter()
        .filter(|key| !dropped.contains(key))
        .cloned()
        .collect()
}

#[tokio::test]
async fn sign_up_only_refreshes_the_current_user() {
    let api = ScriptedApi::new();
    let client = client(&api);
    let warmed = warm_cache(&client).await;

    let record = client
        .sign_up(SignUpRequest {
            username: "newcomer".to_string(),
            password: "secret".to_string(),
            name: "New Comer".to_string(),
            email: "new@example.test".to_string(),
        })
        .await;
    assert!(record.is_success());

    assert_eq!(
        remaining(&client, &warmed),
        without(&warmed, &[QueryKey::current_user()])
    );
}

#[tokio::test]
async fn creating_a_room_only_refreshes_the_listing() {
    let api = ScriptedApi::new();
    let client = client(&api);
    let warmed = warm_cache(&client).await;

    let record = client.create_room(room_payload("fresh")).await;
    assert!(record.is_success());

    assert_eq!(
        remaining(&client, &warmed),
        without(&warmed, &[QueryKey::rooms()])
    );
}

#[tokio::test]
async fn oauth_and_log_out_refresh_user_and_every_room_key() {
    let api = ScriptedApi::new();
    let client = client(&api);
    let session_keys = [
        QueryKey::current_user(),
        QueryKey::rooms(),
        QueryKey::room("42"),
        QueryKey::room_reviews("42"),
        QueryKey::room("7"),
    ];

    let warmed = warm_cache(&client).await;
    let record = client
        .oauth_log_in(
            OAuthProvider::Github,
            OAuthGrant {
                code: "gh-code".to_string(),
                state: None,
            },
        )
        .await;
    assert!(record.is_success());
    assert_eq!(remaining(&client, &warmed), without(&warmed, &session_keys));

    let warmed = warm_cache(&client).await;
    let record = client.log_out().await;
    assert!(record.is_success());
    assert_eq!(remaining(&client, &warmed), without(&warmed, &session_keys));
}

#[tokio::test]
async fn deleting_a_room_drops_its_availability_ranges() {
    let api = ScriptedApi::new();
    let client = client(&api);
    let warmed = warm_cache(&client).await;

    let record = client.delete_room("42").await;
    assert!(record.is_success());

    assert_eq!(
        remaining(&client, &warmed),
        without(
            &warmed,
            &[
                QueryKey::rooms(),
                QueryKey::room("42"),
                QueryKey::room_reviews("42"),
                QueryKey::availability("42", date(1), date(3)),
            ]
        )
    );
}

#[tokio::test]
async fn failed_acquire_never_transfers() {
    let api = ScriptedApi::new();
    api.fail("upload_destination", ApiError::from_status(401, "log in first"));
    let client = client(&api);

    let run = client.upload_photo(photo_request()).await;

    assert!(matches!(
        run.status,
        PipelineStatus::Aborted {
            stage: PipelineStage::Acquire,
            error: ApiError::Unauthorized { status: 401, .. },
        }
    ));
    assert!(run.destination.is_none());
    assert_eq!(run.mutations.len(), 1);
    assert_eq!(api.calls("transfer_file"), 0);
    assert_eq!(api.calls("register_photo"), 0);
    assert_eq!(*client.upload_status().borrow(), run.status);
}

#[tokio::test]
async fn failed_registration_aborts_at_register() {
    let api = ScriptedApi::new();
    api.fail("register_photo", ApiError::from_status(403, "not your room"));
    let client = client(&api);
    client.room("42").await;

    let run = client.upload_photo(photo_request()).await;

    assert!(matches!(
        run.status,
        PipelineStatus::Aborted {
            stage: PipelineStage::Register,
            ..
        }
    ));
    assert!(run.receipt.is_some());
    assert!(run.photo.is_none());
    assert_eq!(run.mutations.len(), 3);
    assert!(client.cache().keys().contains(&QueryKey::room("42")));
}

#[tokio::test]
async fn older_upload_finishing_late_leaves_the_shared_status_alone() {
    let api = ScriptedApi::new();
    api.gate("transfer_file/b.jpg");
    let client = client(&api);
    let older = UploadRequest {
        file: MediaFile::new("b.jpg", mime::IMAGE_JPEG, vec![0xFF, 0xD8, 0xFF]),
        ..photo_request()
    };

    let (older, newer) = tokio::join!(client.upload_photo(older), async {
        wait_for_call(&api, "transfer_file", 1).await;
        let newer = client.upload_photo(photo_request()).await;
        api.fail("register_photo", ApiError::from_status(403, "not your room"));
        api.release("transfer_file/b.jpg");
        newer
    });

    assert_eq!(newer.status, PipelineStatus::Done);
    assert!(matches!(
        older.status,
        PipelineStatus::Aborted {
            stage: PipelineStage::Register,
            ..
        }
    ));
    assert_eq!(*client.upload_status().borrow(), PipelineStatus::Done);
}
