//! Per-fiber registry of channel unsubscribe handles.

use parking_lot::Mutex;

use crate::channel::Subscription;

/// Collects the unsubscribe handles a fiber owns.
///
/// The fiber exclusively owns this registry; the channel side holds only the
/// callback to remove. Disposing the registry unsubscribes everything, so
/// fiber teardown cascades to the channels automatically.
pub struct SubscriptionRegistry {
    subs: Mutex<Vec<Subscription>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subs: Mutex::new(Vec::new()),
        }
    }

    /// Adds an unsubscribe handle to be disposed with the owning fiber.
    pub fn register(&self, subscription: Subscription) {
        let mut subs = self.subs.lock();
        // Already-dead handles would otherwise pile up on long-lived fibers.
        subs.retain(|s| !s.is_disposed());
        subs.push(subscription);
    }

    /// Number of live registered handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subs.lock().iter().filter(|s| !s.is_disposed()).count()
    }

    /// Returns `true` if nothing live is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unsubscribes everything that was registered.
    pub fn dispose_all(&self) {
        let subs = std::mem::take(&mut *self.subs.lock());
        for sub in &subs {
            sub.unsubscribe();
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
