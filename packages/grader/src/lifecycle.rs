use std::sync::Arc;

use common::SubmissionKey;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::GradeError;

/// What happens to a request for a submission that is already being graded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Fail fast with [`GradeError::GradingInProgress`].
    #[default]
    Reject,
    /// Wait for the running pass to finish, then grade.
    Queue,
}

/// Registry enforcing at most one grading pass per submission key.
#[derive(Clone, Default)]
pub struct InFlight {
    slots: Arc<DashMap<SubmissionKey, Arc<Mutex<()>>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the key for one pass. The claim lasts until the guard drops.
    pub async fn acquire(
        &self,
        key: SubmissionKey,
        policy: ConflictPolicy,
    ) -> Result<InFlightGuard, GradeError> {
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let lock = match policy {
            ConflictPolicy::Reject => match slot.clone().try_lock_owned() {
                Ok(lock) => lock,
                Err(_) => {
                    drop(slot);
                    self.release_slot(&key);
                    return Err(GradeError::GradingInProgress(key));
                }
            },
            ConflictPolicy::Queue => {
                debug!(key = %key, "Waiting for running grading pass");
                slot.clone().lock_owned().await
            }
        };

        Ok(InFlightGuard {
            lock: Some(lock),
            slot,
            key,
            slots: self.slots.clone(),
        })
    }

    /// Whether a pass currently holds the key.
    pub fn is_busy(&self, key: &SubmissionKey) -> bool {
        self.slots
            .get(key)
            .is_some_and(|slot| slot.try_lock().is_err())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop the slot unless someone still holds or waits on it.
    fn release_slot(&self, key: &SubmissionKey) {
        self.slots
            .remove_if(key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

/// Exclusive claim on a submission key.
pub struct InFlightGuard {
    lock: Option<OwnedMutexGuard<()>>,
    slot: Arc<Mutex<()>>,
    key: SubmissionKey,
    slots: Arc<DashMap<SubmissionKey, Arc<Mutex<()>>>>,
}

impl InFlightGuard {
    pub fn key(&self) -> &SubmissionKey {
        &self.key
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.lock.take();
        // Map + this guard.
        self.slots.remove_if(&self.key, |_, slot| {
            Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) <= 2
        });
    }
}
