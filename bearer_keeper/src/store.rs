use std::sync::Arc;

use parking_lot::RwLock;

use crate::{Credential, Generation, ReadinessGate};

#[derive(Debug)]
struct Published {
    generation: Generation,
    credential: Arc<Credential>,
}

#[derive(Debug)]
struct ManagerState {
    current: Option<Published>,
    gate: Arc<ReadinessGate>,
    successor: Option<Arc<ReadinessGate>>,
}

/// Shared home of the current credential and the gate of the generation being acquired
///
/// The lifecycle loop is the only writer. Readers take the lock in shared mode and
/// only ever see whole credentials, since publishing swaps an `Arc`.
#[derive(Debug)]
pub(crate) struct CredentialStore {
    state: RwLock<ManagerState>,
}

impl CredentialStore {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(ManagerState {
                current: None,
                gate: Arc::new(ReadinessGate::new(Generation::default())),
                successor: None,
            }),
        }
    }

    /// Replaces the current credential and signals the installed gate
    ///
    /// The gate is signaled while the write lock is held, so a released waiter
    /// always observes the credential that released it.
    pub(crate) fn publish(&self, credential: impl Into<Arc<Credential>>) -> Generation {
        let mut state = self.state.write();
        let generation = state.gate.generation();
        state.current = Some(Published {
            generation,
            credential: credential.into(),
        });
        state.gate.signal_ready();
        generation
    }

    /// Installs the gate for the generation after the published one
    ///
    /// Reuses the successor already handed out by [`next_gate`][Self::next_gate], if any.
    pub(crate) fn advance(&self) -> Generation {
        let mut state = self.state.write();
        debug_assert!(state.gate.is_ready(), "advanced past an unpublished generation");
        let next = state.gate.generation().next();
        state.gate = state
            .successor
            .take()
            .unwrap_or_else(|| Arc::new(ReadinessGate::new(next)));
        debug_assert_eq!(state.gate.generation(), next);
        next
    }

    pub(crate) fn read_current(&self) -> Option<Arc<Credential>> {
        self.state
            .read()
            .current
            .as_ref()
            .map(|p| Arc::clone(&p.credential))
    }

    pub(crate) fn current_generation(&self) -> Option<Generation> {
        self.state.read().current.as_ref().map(|p| p.generation)
    }

    pub(crate) fn snapshot_header_value(&self) -> String {
        self.state
            .read()
            .current
            .as_ref()
            .map(|p| p.credential.authorization_value())
            .unwrap_or_default()
    }

    /// The gate of the generation currently being acquired or awaited
    pub(crate) fn current_gate(&self) -> Arc<ReadinessGate> {
        Arc::clone(&self.state.read().gate)
    }

    /// The gate of the first generation newer than the published one
    ///
    /// Between publication and [`advance`][Self::advance], the installed gate is the
    /// published generation's; its successor is created here and installed later.
    pub(crate) fn next_gate(&self) -> Arc<ReadinessGate> {
        let mut state = self.state.write();
        if !state.gate.is_ready() {
            return Arc::clone(&state.gate);
        }

        let next = state.gate.generation().next();
        Arc::clone(
            state
                .successor
                .get_or_insert_with(|| Arc::new(ReadinessGate::new(next))),
        )
    }

    /// The first generation's gate, if nothing has been published yet
    pub(crate) fn pending_first_gate(&self) -> Option<Arc<ReadinessGate>> {
        let state = self.state.read();
        if state.current.is_some() {
            None
        } else {
            Some(Arc::clone(&state.gate))
        }
    }
}
