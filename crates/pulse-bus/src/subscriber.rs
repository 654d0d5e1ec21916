//! # Subscriptions
//!
//! The subscription side of the bus: a dispatch table from topic pattern to
//! handler list, and the handle returned by [`PulseBus::on`](crate::PulseBus::on).

use parking_lot::RwLock;
use pulse_types::Pulse;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// A subscriber callback. Runs synchronously on the emitting thread.
pub type PulseHandler = Arc<dyn Fn(&Pulse) + Send + Sync>;

/// One registration in the dispatch table.
#[derive(Clone)]
pub(crate) struct HandlerEntry {
    pub(crate) id: u64,
    pub(crate) handler: PulseHandler,
}

/// Pattern -> handlers, in registration order.
pub(crate) type SubscriberTable = RwLock<HashMap<String, Vec<HandlerEntry>>>;

/// Removes exactly one registration. Returns true if it was present.
pub(crate) fn remove_entry(table: &SubscriberTable, pattern: &str, id: u64) -> bool {
    let mut table = table.write();
    let Some(entries) = table.get_mut(pattern) else {
        return false;
    };
    let before = entries.len();
    entries.retain(|entry| entry.id != id);
    let removed = entries.len() != before;
    if entries.is_empty() {
        table.remove(pattern);
    }
    removed
}

/// Handle for one bus registration.
///
/// Dropping the handle unsubscribes. Use [`Subscription::detach`] to keep
/// the handler registered for the lifetime of the bus.
#[must_use = "dropping a Subscription immediately unsubscribes its handler"]
pub struct Subscription {
    pattern: String,
    id: u64,
    table: Option<Weak<SubscriberTable>>,
}

impl Subscription {
    pub(crate) fn new(pattern: String, id: u64, table: Weak<SubscriberTable>) -> Self {
        Self {
            pattern,
            id,
            table: Some(table),
        }
    }

    /// The pattern this handler was registered on.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Removes this registration, leaving other handlers on the same pattern
    /// untouched. Calling it on an already removed registration is a no-op.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keeps the handler registered after this handle is gone.
    pub fn detach(mut self) {
        self.table = None;
    }

    fn release(&mut self) {
        let Some(table) = self.table.take().and_then(|weak| weak.upgrade()) else {
            return;
        };
        if remove_entry(&table, &self.pattern, self.id) {
            debug!(pattern = %self.pattern, id = self.id, "Subscription removed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .field("id", &self.id)
            .field("attached", &self.table.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64) -> HandlerEntry {
        HandlerEntry {
            id,
            handler: Arc::new(|_| {}),
        }
    }

    #[test]
    fn test_remove_entry_only_removes_matching_id() {
        let table: SubscriberTable = RwLock::new(HashMap::new());
        table
            .write()
            .insert("t".to_string(), vec![entry(1), entry(2)]);

        assert!(remove_entry(&table, "t", 1));
        assert_eq!(table.read()["t"].len(), 1);
        assert_eq!(table.read()["t"][0].id, 2);

        assert!(!remove_entry(&table, "t", 1));
        assert!(remove_entry(&table, "t", 2));
        assert!(table.read().get("t").is_none());
    }

    #[test]
    fn test_release_after_table_dropped_is_noop() {
        let table = Arc::new(RwLock::new(HashMap::new()));
        let sub = Subscription::new("t".to_string(), 1, Arc::downgrade(&table));
        drop(table);
        sub.unsubscribe();
    }
}
