//! Identifier-keyed record of results and acknowledgements with blocking waits.
//!
//! Clients use a [`ResultCorrelator`] to wait for the answer to a get or set.
//! The primary uses an [`AckCorrelator`] to wait until every replica has
//! acknowledged a write. Both are the same [`Correlator`] over a different
//! [`Record`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::message::Message;
use crate::request_id::RequestId;

/// State accumulated under one identifier.
pub trait Record: Default + Clone + Send + Sync + 'static {
    type Event;

    fn record(&mut self, event: Self::Event);
}

/// Results received for one request, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Results(Vec<Message>);

impl Results {
    pub fn first(&self) -> Option<&Message> {
        self.0.first()
    }

    pub fn into_first(self) -> Option<Message> {
        self.0.into_iter().next()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Record for Results {
    type Event = Message;

    fn record(&mut self, event: Message) {
        self.0.push(event);
    }
}

/// Number of acknowledgements received for one replication round. Only ever grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct AckCount(pub usize);

impl Record for AckCount {
    type Event = ();

    fn record(&mut self, _: ()) {
        self.0 += 1;
    }
}

pub type ResultCorrelator = Correlator<Results>;
pub type AckCorrelator = Correlator<AckCount>;

/// Returned when a wait's deadline passes; carries the state seen last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitTimedOut<R> {
    pub last: R,
}

/// Concurrent map from identifier to a [`Record`].
///
/// Entries are created on first reference, from either side, and are kept
/// for the life of the process.
pub struct Correlator<R: Record> {
    entries: Mutex<HashMap<RequestId, Arc<watch::Sender<R>>>>,
}

impl<R: Record> Correlator<R> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Applies `event` to the record for `id` and wakes its waiters.
    ///
    /// Returns the record as it stands after the event.
    pub fn record(&self, id: &RequestId, event: R::Event) -> R {
        let entry = self.entry(id);
        let mut updated = None;
        entry.send_modify(|state| {
            state.record(event);
            updated = Some(state.clone());
        });
        updated.unwrap_or_default()
    }

    pub fn current(&self, id: &RequestId) -> R {
        self.entry(id).borrow().clone()
    }

    /// Suspends until `predicate` holds for the record under `id`, then
    /// returns the record. Waits forever when `limit` is `None`.
    pub async fn await_satisfied<F>(
        &self,
        id: &RequestId,
        limit: Option<Duration>,
        mut predicate: F,
    ) -> Result<R, WaitTimedOut<R>>
    where
        F: FnMut(&R) -> bool + Send,
    {
        let entry = self.entry(id);
        let mut rx = entry.subscribe();

        let outcome = match limit {
            None => Some(rx.wait_for(|state| predicate(state)).await.map(|state| state.clone())),
            Some(limit) => tokio::time::timeout(limit, rx.wait_for(|state| predicate(state)))
                .await
                .ok()
                .map(|waited| waited.map(|state| state.clone())),
        };

        match outcome {
            Some(Ok(state)) => Ok(state),
            // The sender lives in `entry`, so the channel cannot close under us.
            Some(Err(_)) | None => Err(WaitTimedOut {
                last: entry.borrow().clone(),
            }),
        }
    }

    /// Number of identifiers referenced so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, id: &RequestId) -> Arc<watch::Sender<R>> {
        let mut entries = self.lock();
        let entry = entries
            .entry(id.clone())
            .or_insert_with(|| Arc::new(watch::channel(R::default()).0));
        Arc::clone(entry)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, Arc<watch::Sender<R>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: Record> Default for Correlator<R> {
    fn default() -> Self {
        Self::new()
    }
}
