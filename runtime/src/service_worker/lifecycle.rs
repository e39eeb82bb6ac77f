//! Service Worker Lifecycle Management
//!
//! Handles service worker state transitions, the skip-waiting request, and
//! removal of caches left behind by the previous (precaching) worker.

use futures::future::try_join_all;

use super::cache::CacheStorage;
use super::{ServiceWorkerError, ServiceWorkerState};

/// Lifecycle event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Install event
    Install,
    /// Activate event
    Activate,
    /// `skipWaiting()` was requested
    SkipWaiting,
    /// State change
    StateChange(StateChangeEvent),
    /// Clients were claimed
    ControllerChange { claimed: usize },
    /// Legacy caches removed during activation
    LegacyCachesPurged(Vec<String>),
}

/// State change event data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChangeEvent {
    /// Old state
    pub old_state: ServiceWorkerState,
    /// New state
    pub new_state: ServiceWorkerState,
}

/// Lifecycle manager
pub struct LifecycleManager {
    /// Current state
    state: ServiceWorkerState,
    /// Whether `skipWaiting()` was requested
    skip_waiting: bool,
    /// Recorded events
    pending_events: Vec<LifecycleEvent>,
}

impl LifecycleManager {
    /// Create new lifecycle manager
    pub fn new() -> Self {
        Self {
            state: ServiceWorkerState::Parsed,
            skip_waiting: false,
            pending_events: Vec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> ServiceWorkerState {
        self.state
    }

    /// Record an event
    pub fn dispatch(&mut self, event: LifecycleEvent) {
        self.pending_events.push(event);
    }

    /// Get pending events
    pub fn pending_events(&self) -> &[LifecycleEvent] {
        &self.pending_events
    }

    /// Clear pending events
    pub fn clear_pending(&mut self) {
        self.pending_events.clear();
    }

    /// Transition worker state
    pub fn transition_state(
        &mut self,
        new_state: ServiceWorkerState,
    ) -> Result<(), ServiceWorkerError> {
        let old_state = self.state;

        if !is_valid_transition(old_state, new_state) {
            return Err(ServiceWorkerError::InvalidStateTransition {
                from: old_state,
                to: new_state,
            });
        }

        self.state = new_state;
        log::info!("[ShellWorker Lifecycle] {:?} -> {:?}", old_state, new_state);

        self.dispatch(LifecycleEvent::StateChange(StateChangeEvent {
            old_state,
            new_state,
        }));

        match new_state {
            ServiceWorkerState::Installing => self.dispatch(LifecycleEvent::Install),
            ServiceWorkerState::Activating => self.dispatch(LifecycleEvent::Activate),
            _ => {}
        }

        Ok(())
    }

    /// Request immediate activation.
    ///
    /// Always succeeds. Returns `true` when the worker is currently waiting,
    /// in which case the caller should start activation now.
    pub fn skip_waiting(&mut self) -> bool {
        self.skip_waiting = true;
        self.dispatch(LifecycleEvent::SkipWaiting);
        self.state == ServiceWorkerState::Installed
    }

    /// Whether `skipWaiting()` was requested
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting
    }

    /// Check that clients may be claimed in the current state
    pub fn ensure_can_claim(&self) -> Result<(), ServiceWorkerError> {
        match self.state {
            ServiceWorkerState::Activating | ServiceWorkerState::Activated => Ok(()),
            state => Err(ServiceWorkerError::InvalidStateTransition {
                from: state,
                to: ServiceWorkerState::Activated,
            }),
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a state transition is valid
fn is_valid_transition(from: ServiceWorkerState, to: ServiceWorkerState) -> bool {
    use ServiceWorkerState::*;

    matches!(
        (from, to),
        (Parsed, Installing)
            | (Installing, Installed)
            | (Installing, Redundant) // Install failed
            | (Installed, Activating)
            | (Activating, Activated)
            | (Activating, Redundant) // Activate failed
            | (Activated, Redundant) // Replaced by new worker
    )
}

/// Delete every cache whose name starts with `prefix`.
///
/// Deletions run concurrently and all must succeed; the first failure is
/// returned. Returns the names that were targeted.
pub async fn purge_legacy_caches(
    caches: &dyn CacheStorage,
    prefix: &str,
) -> Result<Vec<String>, ServiceWorkerError> {
    let legacy: Vec<String> = caches
        .keys()
        .await?
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .collect();

    let deletions = legacy.iter().map(|name| async move {
        caches
            .delete(name)
            .await
            .map_err(|source| ServiceWorkerError::CacheCleanup {
                cache: name.clone(),
                source,
            })
    });
    try_join_all(deletions).await?;

    Ok(legacy)
}
