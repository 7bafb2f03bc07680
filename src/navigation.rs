//! Navigation port used to send the user back to the login screen

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Where the application currently is and how to move it elsewhere
pub trait Navigator: Send + Sync {
    /// Current location path, `None` when the host has no notion of one
    fn current_path(&self) -> Option<String>;

    fn navigate(&self, path: &str);
}

/// Navigator that keeps the location in memory
///
/// Suits headless front ends that poll the location instead of reacting to a
/// browser history change.
#[derive(Debug)]
pub struct MemoryNavigator {
    state: Mutex<NavigationState>,
}

#[derive(Debug)]
struct NavigationState {
    current: String,
    history: Vec<String>,
}

impl MemoryNavigator {
    pub fn new(initial_path: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(NavigationState {
                current: initial_path.into(),
                history: Vec::new(),
            }),
        }
    }

    /// Paths navigated to so far, oldest first
    pub fn history(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .clone()
    }
}

impl Default for MemoryNavigator {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Navigator for MemoryNavigator {
    fn current_path(&self) -> Option<String> {
        Some(
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .current
                .clone(),
        )
    }

    fn navigate(&self, path: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.current = path.to_string();
        state.history.push(path.to_string());
    }
}

/// Ensures concurrent session teardowns navigate to login only once
///
/// Requests note the epoch they started in. The first failure of an epoch
/// wins the redirect and opens the next epoch, so failures of requests that
/// were already in flight are dropped while later requests can redirect again.
#[derive(Debug, Default)]
pub struct RedirectGuard {
    epoch: AtomicU64,
}

impl RedirectGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch a request starting now belongs to
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Claim the redirect for requests of `epoch`; only the first caller wins
    pub fn try_acquire(&self, epoch: u64) -> bool {
        self.epoch
            .compare_exchange(epoch, epoch.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Whether `current` already points at `login_path`, ignoring query and fragment
pub fn is_at_path(current: &str, login_path: &str) -> bool {
    let path = current.split(['?', '#']).next().unwrap_or(current);
    path.trim_end_matches('/') == login_path.trim_end_matches('/')
}
