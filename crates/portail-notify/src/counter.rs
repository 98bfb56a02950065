use tokio::sync::watch;

use portail_types::{Notification, Reader, Role};

use crate::store::NotificationStore;

/// Entries addressed to `role` that `reader` has not read.
pub fn count_unread<'a>(entries: impl IntoIterator<Item = &'a Notification>, role: &Role, reader: &Reader) -> usize {
    entries
        .into_iter()
        .filter(|n| !n.is_read(reader) && role.matches(n.role.as_str()))
        .count()
}

/// Publishes the unread badge value derived from a store.
///
/// Holds no state of its own beyond the last published value; callers
/// `refresh` after every store mutation and UI code watches the receiver.
#[derive(Debug)]
pub struct UnreadCounter {
    tx: watch::Sender<usize>,
}

impl UnreadCounter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx }
    }

    /// Recompute from `store` and publish if the value changed.
    pub fn refresh(&self, store: &NotificationStore) -> usize {
        let unread = store.unread();
        self.tx.send_if_modified(|current| {
            if *current == unread {
                return false;
            }
            *current = unread;
            true
        });
        unread
    }

    pub fn current(&self) -> usize {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<usize> {
        self.tx.subscribe()
    }
}

impl Default for UnreadCounter {
    fn default() -> Self {
        Self::new()
    }
}
