use std::fmt;

use tokio::sync::watch;

/// Identifies one acquire-publish-wait cycle of the lifecycle loop
///
/// Generations start at zero and advance by one each time a credential is published.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation following this one
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A one-shot signal that releases every waiter when its generation's credential lands
///
/// A gate starts out not ready and becomes ready at most once. Each generation
/// has its own gate, so a waiter is always released by the generation it waited on.
pub struct ReadinessGate {
    generation: Generation,
    ready: watch::Sender<bool>,
}

impl ReadinessGate {
    /// Constructs a gate that is not yet ready
    pub fn new(generation: Generation) -> Self {
        let (ready, _) = watch::channel(false);
        Self { generation, ready }
    }

    /// The generation this gate belongs to
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Whether the gate has been signaled
    #[inline]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Marks the gate as ready, releasing all waiters
    ///
    /// Returns `true` if this call changed the gate's state. Signaling a gate that is
    /// already ready has no effect.
    pub fn signal_ready(&self) -> bool {
        self.ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    /// Waits until the gate is ready
    ///
    /// Returns immediately if the gate has already been signaled.
    pub async fn wait(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("generation", &self.generation)
            .field("ready", &self.is_ready())
            .finish()
    }
}
