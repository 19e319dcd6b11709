//! Per-session single-flight guard for suggestion runs.
//!
//! At most one run holds a session key at a time. Under
//! [`GuardPolicy::Reject`] a second trigger gets a busy error; under
//! [`GuardPolicy::Supersede`] the running permit is cancelled and the new
//! trigger takes the slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use talkboard_core::config::GuardPolicy;
use talkboard_core::{Result, TalkboardError};

struct Slot {
    id: u64,
    token: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<String, Slot>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<String, Slot>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct SessionGuard {
    policy: GuardPolicy,
    slots: Registry,
    next_id: AtomicU64,
}

impl SessionGuard {
    pub fn new(policy: GuardPolicy) -> Self {
        Self {
            policy,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn policy(&self) -> GuardPolicy {
        self.policy
    }

    /// Claim the slot for `session`. The slot is released when the returned
    /// permit is dropped.
    pub fn acquire(&self, session: &str) -> Result<FlightPermit> {
        let mut slots = lock(&self.slots);

        if let Some(current) = slots.get(session) {
            match self.policy {
                GuardPolicy::Reject => {
                    debug!(session, "Run already in flight, rejecting");
                    return Err(TalkboardError::Busy(format!(
                        "A request for session '{session}' is already in progress"
                    )));
                }
                GuardPolicy::Supersede => {
                    debug!(session, superseded = current.id, "Cancelling in-flight run");
                    current.token.cancel();
                }
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        slots.insert(
            session.to_string(),
            Slot {
                id,
                token: token.clone(),
            },
        );

        Ok(FlightPermit {
            session: session.to_string(),
            id,
            token,
            slots: Arc::clone(&self.slots),
        })
    }

    /// Sessions with a run in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.slots).len()
    }
}

/// Held for the duration of one run.
pub struct FlightPermit {
    session: String,
    id: u64,
    token: CancellationToken,
    slots: Registry,
}

impl FlightPermit {
    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once a newer run supersedes this one.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        let mut slots = lock(&self.slots);
        if slots.get(&self.session).is_some_and(|slot| slot.id == self.id) {
            slots.remove(&self.session);
        }
    }
}
