use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{nack_outcome, Broker, BrokerError, BrokerMessage, Delivery, NackOutcome};
use crate::core::Priority;

/// Where a message currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Waiting(Priority, u64),
    Delayed(DateTime<Utc>, u64),
    Active,
    Failed,
}

#[derive(Debug)]
struct Entry {
    message: BrokerMessage,
    attempts_made: u32,
    slot: Slot,
}

#[derive(Debug, Default)]
struct BrokerState {
    seq: u64,
    entries: HashMap<String, Entry>,
    waiting: BTreeMap<(Priority, u64), String>,
    delayed: BTreeMap<(DateTime<Utc>, u64), String>,
    closed: bool,
}

impl BrokerState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn unlink(&mut self, slot: Slot) {
        match slot {
            Slot::Waiting(priority, seq) => {
                self.waiting.remove(&(priority, seq));
            }
            Slot::Delayed(at, seq) => {
                self.delayed.remove(&(at, seq));
            }
            Slot::Active | Slot::Failed => {}
        }
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Number of messages in each broker set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub failed: usize,
}

/// In-process broker
///
/// Implements the full broker contract behind a mutex: priority ordering
/// (FIFO within a priority), delayed retries, reservation and a failed set.
/// Useful for running distributed mode inside a single process and in tests.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of how many messages sit in each set
    pub fn counts(&self) -> BrokerCounts {
        let Ok(state) = self.state.lock() else {
            return BrokerCounts::default();
        };
        let mut counts = BrokerCounts {
            waiting: state.waiting.len(),
            delayed: state.delayed.len(),
            ..BrokerCounts::default()
        };
        for entry in state.entries.values() {
            match entry.slot {
                Slot::Active => counts.active += 1,
                Slot::Failed => counts.failed += 1,
                _ => {}
            }
        }
        counts
    }

    /// Attempts recorded against a message, if the broker holds it
    pub fn attempts_made(&self, job_id: &str) -> Option<u32> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.entries.get(job_id).map(|e| e.attempts_made))
    }

    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>, BrokerError> {
        self.state
            .lock()
            .map_err(|e| BrokerError::operation_failed("lock", e.to_string()))
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        self.lock()?.ensure_open()
    }

    async fn add(&self, message: BrokerMessage) -> Result<(), BrokerError> {
        let mut state = self.lock()?;
        state.ensure_open()?;

        if let Some(previous) = state.entries.remove(&message.job_id) {
            state.unlink(previous.slot);
        }

        let seq = state.next_seq();
        let key = (message.priority, seq);
        state.waiting.insert(key, message.job_id.clone());
        state.entries.insert(
            message.job_id.clone(),
            Entry {
                message,
                attempts_made: 0,
                slot: Slot::Waiting(key.0, key.1),
            },
        );
        Ok(())
    }

    async fn promote_delayed(&self, now: DateTime<Utc>) -> Result<usize, BrokerError> {
        let mut state = self.lock()?;
        state.ensure_open()?;

        let due: Vec<(DateTime<Utc>, u64)> = state
            .delayed
            .range(..=(now, u64::MAX))
            .map(|(key, _)| *key)
            .collect();

        for key in &due {
            let Some(job_id) = state.delayed.remove(key) else {
                continue;
            };
            let seq = state.next_seq();
            let Some(entry) = state.entries.get_mut(&job_id) else {
                continue;
            };
            let priority = entry.message.priority;
            entry.slot = Slot::Waiting(priority, seq);
            state.waiting.insert((priority, seq), job_id);
        }

        if !due.is_empty() {
            debug!(promoted = due.len(), "Promoted delayed messages");
        }
        Ok(due.len())
    }

    async fn reserve(&self) -> Result<Option<Delivery>, BrokerError> {
        let mut state = self.lock()?;
        state.ensure_open()?;

        let Some((_, job_id)) = state.waiting.pop_first() else {
            return Ok(None);
        };
        let entry = state
            .entries
            .get_mut(&job_id)
            .ok_or_else(|| BrokerError::message_not_found(&job_id))?;
        entry.slot = Slot::Active;

        Ok(Some(Delivery {
            message: entry.message.clone(),
            attempts_made: entry.attempts_made,
        }))
    }

    async fn ack(&self, job_id: &str) -> Result<(), BrokerError> {
        let mut state = self.lock()?;
        match state.entries.remove(job_id) {
            Some(entry) => {
                state.unlink(entry.slot);
                Ok(())
            }
            None => Err(BrokerError::message_not_found(job_id)),
        }
    }

    async fn nack(&self, job_id: &str, _error: &str) -> Result<NackOutcome, BrokerError> {
        let mut state = self.lock()?;
        let seq = state.next_seq();
        let entry = state
            .entries
            .get_mut(job_id)
            .ok_or_else(|| BrokerError::message_not_found(job_id))?;

        entry.attempts_made = entry.attempts_made.saturating_add(1);
        let outcome = nack_outcome(&entry.message, entry.attempts_made, Utc::now());
        let previous = entry.slot;

        match outcome {
            NackOutcome::Retrying { retry_at, .. } => {
                entry.slot = Slot::Delayed(retry_at, seq);
                state.unlink(previous);
                state.delayed.insert((retry_at, seq), job_id.to_string());
            }
            NackOutcome::Exhausted { .. } => {
                entry.slot = Slot::Failed;
                state.unlink(previous);
            }
        }
        Ok(outcome)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.lock()?.closed = true;
        Ok(())
    }
}
