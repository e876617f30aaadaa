//! Inbound message queue with two priority lanes.
//!
//! Results and acknowledgements go into a lane that is always drained
//! before ordinary traffic, so a handler parked on an acknowledgement is
//! released regardless of the backlog.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::message::MessageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Results and acknowledgements.
    Result,
    /// Everything else, including frames with an unknown leading token.
    Ordinary,
}

impl Lane {
    pub fn of_raw(raw: &str) -> Self {
        match MessageKind::of_raw(raw) {
            Some(kind) if kind.is_result() => Lane::Result,
            _ => Lane::Ordinary,
        }
    }
}

#[derive(Default)]
struct Lanes {
    results: VecDeque<String>,
    ordinary: VecDeque<String>,
    closed: bool,
}

/// Multi-producer, single-consumer buffer of raw frames.
///
/// Each lane is FIFO. Whenever the consumer takes an item, a pending result
/// is always preferred over pending ordinary traffic.
#[derive(Default)]
pub struct MessageQueue {
    lanes: Mutex<Lanes>,
    available: Notify,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies `raw` by its leading token and appends it to its lane.
    pub fn enqueue(&self, raw: String) -> Lane {
        let lane = Lane::of_raw(&raw);
        {
            let mut lanes = self.lock();
            if lanes.closed {
                return lane;
            }
            match lane {
                Lane::Result => lanes.results.push_back(raw),
                Lane::Ordinary => lanes.ordinary.push_back(raw),
            }
        }
        self.available.notify_one();
        lane
    }

    /// Takes the next frame without waiting.
    pub fn try_dequeue(&self) -> Option<String> {
        let mut lanes = self.lock();
        lanes
            .results
            .pop_front()
            .or_else(|| lanes.ordinary.pop_front())
    }

    /// Waits for the next frame. Returns `None` once the queue is closed.
    ///
    /// Intended for exactly one consumer.
    pub async fn dequeue(&self) -> Option<String> {
        loop {
            {
                let mut lanes = self.lock();
                if lanes.closed {
                    return None;
                }
                if let Some(raw) = lanes
                    .results
                    .pop_front()
                    .or_else(|| lanes.ordinary.pop_front())
                {
                    return Some(raw);
                }
            }
            // notify_one leaves a permit behind when nobody is waiting, so an
            // enqueue between the check above and this await is not lost.
            self.available.notified().await;
        }
    }

    /// Stops the consumer. Pending frames are discarded.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_one();
    }

    pub fn len(&self) -> usize {
        let lanes = self.lock();
        lanes.results.len() + lanes.ordinary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
