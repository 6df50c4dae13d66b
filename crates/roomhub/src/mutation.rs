//! Lifecycle and invalidation wrapper shared by every write.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::api::ApiError;
use crate::query::{KeyPattern, QueryCache};

static MUTATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Correlation token threaded through every lifecycle event of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MutationId(u64);

impl MutationId {
    fn next() -> Self {
        Self(MUTATION_SEQUENCE.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mut-{:06}", self.0)
    }
}

/// Which write a record belongs to. Only one record per kind is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    LogIn,
    LogOut,
    SignUp,
    OAuthLogIn,
    CreateRoom,
    UpdateRoom,
    DeleteRoom,
    Booking,
    AcquireUpload,
    TransferUpload,
    RegisterPhoto,
}

impl MutationKind {
    pub fn label(self) -> &'static str {
        match self {
            MutationKind::LogIn => "log in",
            MutationKind::LogOut => "log out",
            MutationKind::SignUp => "sign up",
            MutationKind::OAuthLogIn => "social log in",
            MutationKind::CreateRoom => "create room",
            MutationKind::UpdateRoom => "update room",
            MutationKind::DeleteRoom => "delete room",
            MutationKind::Booking => "book room",
            MutationKind::AcquireUpload => "acquire upload destination",
            MutationKind::TransferUpload => "transfer photo",
            MutationKind::RegisterPhoto => "register photo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Idle,
    Pending,
    Success,
    Error,
}

/// Keys a successful write makes stale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidation {
    patterns: Vec<KeyPattern>,
}

impl Invalidation {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn of(patterns: impl IntoIterator<Item = KeyPattern>) -> Self {
        Self {
            patterns: patterns.into_iter().collect(),
        }
    }

    pub fn and(mut self, pattern: KeyPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn patterns(&self) -> &[KeyPattern] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// One invocation of a write. Never reused; a new invocation gets a new
/// record.
#[derive(Debug, Clone)]
pub struct MutationRecord<I, O> {
    pub id: MutationId,
    pub kind: MutationKind,
    pub status: MutationStatus,
    pub input: I,
    pub output: Option<O>,
    pub error: Option<ApiError>,
}

impl<I, O> MutationRecord<I, O> {
    fn idle(kind: MutationKind, input: I) -> Self {
        Self {
            id: MutationId::next(),
            kind,
            status: MutationStatus::Idle,
            input,
            output: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == MutationStatus::Success
    }

    pub fn into_result(self) -> Result<O, ApiError> {
        match (self.output, self.error) {
            (Some(output), _) => Ok(output),
            (None, Some(err)) => Err(err),
            (None, None) => Err(ApiError::Transport(format!(
                "{} never completed",
                self.kind.label()
            ))),
        }
    }
}

/// Published on every status transition so observers (toasts, spinners) can
/// follow a write by its id.
#[derive(Debug, Clone, Serialize)]
pub struct MutationEvent {
    pub id: MutationId,
    pub kind: MutationKind,
    pub status: MutationStatus,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs writes, publishes their lifecycle, and invalidates the query cache on
/// success. Holds no business logic.
#[derive(Debug, Clone)]
pub struct MutationBroadcaster {
    cache: QueryCache,
    events: broadcast::Sender<MutationEvent>,
    latest: Arc<Mutex<HashMap<MutationKind, MutationId>>>,
}

impl MutationBroadcaster {
    pub fn new(cache: QueryCache, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            cache,
            events,
            latest: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.events.subscribe()
    }

    /// Whether `record` is still the newest invocation of its kind.
    pub fn is_current<I, O>(&self, record: &MutationRecord<I, O>) -> bool {
        self.latest
            .lock()
            .expect("mutation registry mutex poisoned")
            .get(&record.kind)
            == Some(&record.id)
    }

    /// Drive `operation` through `idle -> pending -> success | error`.
    ///
    /// `input` is cloned into the operation; the record keeps the original.
    /// Errors are returned on the record and never retried.
    pub async fn run<I, O, F, Fut>(
        &self,
        kind: MutationKind,
        input: I,
        invalidation: Invalidation,
        operation: F,
    ) -> MutationRecord<I, O>
    where
        I: Clone,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<O, ApiError>>,
    {
        let mut record = MutationRecord::idle(kind, input);
        self.latest
            .lock()
            .expect("mutation registry mutex poisoned")
            .insert(kind, record.id);

        record.status = MutationStatus::Pending;
        self.publish(&record, None);
        info!(id = %record.id, kind = kind.label(), "mutation started");

        match operation(record.input.clone()).await {
            Ok(output) => {
                record.output = Some(output);
                record.status = MutationStatus::Success;
                let removed: usize = invalidation
                    .patterns()
                    .iter()
                    .map(|pattern| self.cache.invalidate(pattern))
                    .sum();
                info!(id = %record.id, kind = kind.label(), removed, "mutation succeeded");
                self.publish(&record, None);
            }
            Err(err) => {
                warn!(id = %record.id, kind = kind.label(), error = %err, "mutation failed");
                record.error = Some(err.clone());
                record.status = MutationStatus::Error;
                self.publish(&record, Some(err.to_string()));
            }
        }

        record
    }

    fn publish<I, O>(&self, record: &MutationRecord<I, O>, error: Option<String>) {
        let event = MutationEvent {
            id: record.id,
            kind: record.kind,
            status: record.status,
            at: Utc::now(),
            error,
        };
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }
}
