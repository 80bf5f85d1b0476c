//! Per-metric load state machine with generation-token cancellation.
//!
//! ```text
//! idle --load--> loading --ok--> loaded
//!                loading --no map query--> attempted-no-data
//!                loading --transient error--> idle
//! ```
//!
//! Deselecting a metric forgets its slot. Changing the date range starts a
//! new epoch and forgets every slot. A response is applied only if its
//! ticket still matches the slot's generation and the current epoch.

use crate::error::BackendError;
use crate::models::{DateRange, LoadState, RawRecord};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::backend::MetricsBackend;

/// Outcome of one backend fetch, shared by every caller awaiting it.
pub type FetchResult = Arc<Result<Vec<RawRecord>, BackendError>>;

/// A fetch that several callers can await.
pub type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Identifies one issued request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub metric_id: String,
    pub generation: u64,
    pub epoch: u64,
    pub range: Option<DateRange>,
}

/// An outstanding request and its shared response.
#[derive(Clone)]
pub struct LoadHandle {
    pub ticket: LoadTicket,
    fetch: SharedFetch,
}

impl LoadHandle {
    /// Wait for the response.
    pub async fn wait(self) -> (LoadTicket, FetchResult) {
        let result = self.fetch.await;
        (self.ticket, result)
    }
}

impl std::fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadHandle")
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

/// Answer to a `load` call.
#[derive(Debug)]
pub enum LoadRequest {
    /// A new backend request was issued.
    Started(LoadHandle),
    /// A request for this metric is already outstanding; await the same one.
    Joined(LoadHandle),
    /// Data is already loaded for the current range.
    AlreadyLoaded,
    /// The backend has no map query for this metric.
    Unavailable,
}

impl LoadRequest {
    /// The handle to await, if any.
    pub fn handle(self) -> Option<LoadHandle> {
        match self {
            LoadRequest::Started(h) | LoadRequest::Joined(h) => Some(h),
            LoadRequest::AlreadyLoaded | LoadRequest::Unavailable => None,
        }
    }
}

/// Result of applying a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    Loaded,
    NoData,
    Failed(BackendError),
    /// The ticket is stale; the response was ignored.
    Discarded,
}

struct MetricSlot {
    state: LoadState,
    generation: u64,
    inflight: Option<LoadHandle>,
}

/// Loads metric datasets, at most one request per metric at a time.
pub struct MetricDataLoader {
    backend: Arc<dyn MetricsBackend>,
    range: Option<DateRange>,
    epoch: u64,
    next_generation: u64,
    slots: HashMap<String, MetricSlot>,
}

impl MetricDataLoader {
    pub fn new(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend,
            range: None,
            epoch: 0,
            next_generation: 1,
            slots: HashMap::new(),
        }
    }

    pub fn date_range(&self) -> Option<DateRange> {
        self.range
    }

    /// Current state of a metric.
    pub fn state(&self, metric_id: &str) -> LoadState {
        self.slots
            .get(metric_id)
            .map(|slot| slot.state)
            .unwrap_or(LoadState::Idle)
    }

    /// Request data for a metric over `range`.
    ///
    /// A range different from the current one invalidates every metric first.
    pub fn load(&mut self, metric_id: &str, range: Option<DateRange>) -> LoadRequest {
        if range != self.range {
            self.set_date_range(range);
        }

        if let Some(slot) = self.slots.get(metric_id) {
            match slot.state {
                LoadState::Loading => {
                    if let Some(handle) = slot.inflight.clone() {
                        debug!("Joining in-flight load of metric {}", metric_id);
                        return LoadRequest::Joined(handle);
                    }
                }
                LoadState::Loaded => return LoadRequest::AlreadyLoaded,
                LoadState::AttemptedNoData => return LoadRequest::Unavailable,
                LoadState::Idle => {}
            }
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let ticket = LoadTicket {
            metric_id: metric_id.to_string(),
            generation,
            epoch: self.epoch,
            range: self.range,
        };

        let request = self.backend.get_map_data(metric_id, self.range);
        let id = metric_id.to_string();
        let fetch: BoxFuture<'static, FetchResult> = async move {
            let result = match request.await {
                Ok(response) => response.into_records(&id),
                Err(e) => Err(e),
            };
            Arc::new(result)
        }
        .boxed();

        let handle = LoadHandle {
            ticket,
            fetch: fetch.shared(),
        };

        debug!(
            "Loading metric {} (generation {}, range {:?})",
            metric_id, generation, self.range
        );

        self.slots.insert(
            metric_id.to_string(),
            MetricSlot {
                state: LoadState::Loading,
                generation,
                inflight: Some(handle.clone()),
            },
        );

        LoadRequest::Started(handle)
    }

    /// Apply a response. Stale tickets are discarded without any change.
    pub fn settle(&mut self, ticket: &LoadTicket, result: &Result<Vec<RawRecord>, BackendError>) -> Settled {
        if ticket.epoch != self.epoch {
            debug!(
                "Discarding response for metric {} from an older date range",
                ticket.metric_id
            );
            return Settled::Discarded;
        }

        let Some(slot) = self.slots.get_mut(&ticket.metric_id) else {
            debug!(
                "Discarding response for deselected metric {}",
                ticket.metric_id
            );
            return Settled::Discarded;
        };

        if slot.generation != ticket.generation || slot.state != LoadState::Loading {
            debug!(
                "Discarding stale response for metric {} (generation {} != {})",
                ticket.metric_id, ticket.generation, slot.generation
            );
            return Settled::Discarded;
        }

        slot.inflight = None;
        match result {
            Ok(records) => {
                info!(
                    "Loaded {} records for metric {}",
                    records.len(),
                    ticket.metric_id
                );
                slot.state = LoadState::Loaded;
                Settled::Loaded
            }
            Err(e) if e.is_terminal() => {
                info!("Metric {} is not available on the map: {}", ticket.metric_id, e);
                slot.state = LoadState::AttemptedNoData;
                Settled::NoData
            }
            Err(e) => {
                warn!("Failed to load metric {}: {}", ticket.metric_id, e);
                slot.state = LoadState::Idle;
                Settled::Failed(e.clone())
            }
        }
    }

    /// Forget everything about a metric, including an outstanding request.
    pub fn deselect(&mut self, metric_id: &str) {
        if self.slots.remove(metric_id).is_some() {
            debug!("Forgot load state of metric {}", metric_id);
        }
    }

    /// Switch the date range. Returns true if it changed.
    pub fn set_date_range(&mut self, range: Option<DateRange>) -> bool {
        if range == self.range {
            return false;
        }
        info!(
            "Date range changed to {:?}; invalidating {} metrics",
            range,
            self.slots.len()
        );
        self.range = range;
        self.epoch += 1;
        self.slots.clear();
        true
    }
}
