// Sommaii Chat Engine — Cancellation Coordinator
//
// One live cancellation signal per transcript surface. `supersede()` cancels
// the current signal before handing out a fresh one, so a cancelled signal
// can never become active again. Generations make signal identity observable.

use log::debug;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// A cancellable stream lifetime.
#[derive(Debug, Clone)]
pub struct StreamSignal {
    generation: u64,
    token: CancellationToken,
}

impl StreamSignal {
    fn fresh(generation: u64) -> Self {
        StreamSignal {
            generation,
            token: CancellationToken::new(),
        }
    }

    /// Strictly increasing per coordinator; never reused.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolves once the signal is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug)]
pub struct CancellationCoordinator {
    active: Mutex<StreamSignal>,
}

impl Default for CancellationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationCoordinator {
    pub fn new() -> Self {
        CancellationCoordinator {
            active: Mutex::new(StreamSignal::fresh(0)),
        }
    }

    /// The current live signal.
    pub fn active_signal(&self) -> StreamSignal {
        self.active.lock().clone()
    }

    /// Cancel the current signal and install a new one. The old signal is
    /// cancelled before the new one is visible to anyone.
    pub fn supersede(&self) -> StreamSignal {
        let mut active = self.active.lock();
        active.cancel();
        let next = StreamSignal::fresh(active.generation + 1);
        debug!(
            "[chat] Signal {} superseded by {}",
            active.generation, next.generation
        );
        *active = next.clone();
        next
    }
}
