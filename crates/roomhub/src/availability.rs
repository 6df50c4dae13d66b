//! Date-range availability checks on top of the query cache.
//!
//! Each distinct `(room, check_in, check_out)` is its own cache entry and
//! entries are never pruned. Results that arrive after the caller moved on to
//! another room or range are reported as [`ProbeState::Superseded`].

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{AvailabilityCheck, RentalApi};
use crate::query::{QueryCache, QueryError, QueryKey, QueryState, ReadOptions};

/// A calendar selection; either endpoint may still be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn starting(start: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// Both endpoints, when the selection is complete.
    pub fn endpoints(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.start.zip(self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    /// Selection incomplete: availability is unknown, not `false`.
    Idle,
    Ready { available: bool },
    Error(QueryError),
    /// The room or range changed while this probe was in flight.
    Superseded,
}

impl ProbeState {
    pub fn available(&self) -> Option<bool> {
        match self {
            ProbeState::Ready { available } => Some(*available),
            _ => None,
        }
    }
}

/// Outcome paired with the key it was computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub key: Option<QueryKey>,
    pub state: ProbeState,
}

pub struct AvailabilityProber<A> {
    api: Arc<A>,
    cache: QueryCache,
    intent: Mutex<Option<QueryKey>>,
}

impl<A> std::fmt::Debug for AvailabilityProber<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityProber")
            .field("intent", &self.current_intent())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Cached,
    Refetch,
}

impl<A> AvailabilityProber<A> {
    /// Forget the current selection (e.g. the view unmounted).
    pub fn clear(&self) {
        self.set_intent(None);
    }

    pub fn current_intent(&self) -> Option<QueryKey> {
        self.intent
            .lock()
            .expect("availability intent mutex poisoned")
            .clone()
    }

    /// Whether a result computed for `key` may still be rendered.
    pub fn is_current(&self, key: &QueryKey) -> bool {
        self.intent
            .lock()
            .expect("availability intent mutex poisoned")
            .as_ref()
            == Some(key)
    }

    fn set_intent(&self, key: Option<QueryKey>) {
        *self
            .intent
            .lock()
            .expect("availability intent mutex poisoned") = key;
    }
}

impl<A: RentalApi> AvailabilityProber<A> {
    pub fn new(api: Arc<A>, cache: QueryCache) -> Self {
        Self {
            api,
            cache,
            intent: Mutex::new(None),
        }
    }

    /// Check `room_pk` for `range`. Becomes the caller's current intent
    /// immediately; an older probe finishing later is discarded.
    pub async fn probe(&self, room_pk: &str, range: DateRange) -> Probe {
        self.check(room_pk, range, Freshness::Cached).await
    }

    /// Like [`probe`](Self::probe), but asks the backend again even when the
    /// range already has a settled answer or error.
    pub async fn recheck(&self, room_pk: &str, range: DateRange) -> Probe {
        self.check(room_pk, range, Freshness::Refetch).await
    }

    async fn check(&self, room_pk: &str, range: DateRange, freshness: Freshness) -> Probe {
        let Some((check_in, check_out)) = range.endpoints() else {
            self.set_intent(None);
            return Probe {
                key: None,
                state: ProbeState::Idle,
            };
        };

        let key = QueryKey::availability(room_pk, check_in, check_out);
        self.set_intent(Some(key.clone()));

        let api = Arc::clone(&self.api);
        let pk = room_pk.to_string();
        let check_in = key_date(check_in);
        let check_out = key_date(check_out);
        let fetcher = move || async move {
            api.check_availability(&pk, &check_in, &check_out).await
        };
        let state: QueryState<AvailabilityCheck> = match freshness {
            Freshness::Cached => {
                self.cache
                    .read(key.clone(), ReadOptions::default(), fetcher)
                    .await
            }
            Freshness::Refetch => {
                debug!(%key, "rechecking availability");
                self.cache.refetch(key.clone(), fetcher).await
            }
        };

        if !self.is_current(&key) {
            debug!(%key, "discarding availability result for abandoned selection");
            return Probe {
                key: Some(key),
                state: ProbeState::Superseded,
            };
        }

        let state = match state {
            QueryState::Ready(check) => ProbeState::Ready {
                available: check.ok,
            },
            QueryState::Error(err) => ProbeState::Error(err),
            QueryState::Idle | QueryState::Pending => ProbeState::Idle,
        };
        Probe {
            key: Some(key),
            state,
        }
    }
}

fn key_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
