//! Collapses concurrent refreshes of the same refresh token into one
//! provider call.
//!
//! Refresh tokens are commonly single-use: two parallel requests presenting
//! the same token would otherwise race, and the loser would be logged out.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

use shopgate_access::{AuthenticationError, Session};

use super::store::token_digest;

/// Outcome shared by every caller waiting on one refresh.
pub type RefreshOutcome = Result<Option<Session>, AuthenticationError>;

/// In-flight refreshes keyed by refresh token digest.
#[derive(Debug, Default)]
pub struct RefreshFlights {
    inflight: Mutex<HashMap<String, Arc<OnceCell<RefreshOutcome>>>>,
}

impl RefreshFlights {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `refresh` unless a refresh for the same token is already in
    /// flight, in which case the caller waits for and shares its outcome.
    pub async fn run<F, Fut>(&self, refresh_token: &str, refresh: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        let key = token_digest(refresh_token);
        let (cell, leader) = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match inflight.get(&key) {
                Some(cell) => (Arc::clone(cell), false),
                None => {
                    let cell = Arc::new(OnceCell::new());
                    inflight.insert(key.clone(), Arc::clone(&cell));
                    (cell, true)
                }
            }
        };
        let flight = Flight {
            flights: self,
            key,
            cell,
            leader,
        };

        let outcome = flight.cell.get_or_init(refresh).await.clone();
        drop(flight);
        outcome
    }

    /// Number of refreshes currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Map entry owned by one caller of [`RefreshFlights::run`]. The entry is
/// removed once the outcome is known, or when the caller that opened the
/// flight is dropped before finishing.
struct Flight<'a> {
    flights: &'a RefreshFlights,
    key: String,
    cell: Arc<OnceCell<RefreshOutcome>>,
    leader: bool,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if !self.leader && !self.cell.initialized() {
            return;
        }
        let mut inflight = self
            .flights
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if inflight
            .get(&self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.cell))
        {
            inflight.remove(&self.key);
        }
    }
}
