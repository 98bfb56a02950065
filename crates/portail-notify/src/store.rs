use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use portail_types::{Notification, NotificationId, Reader, Role};

use crate::counter;

/// Store shared between a feed, its live pump and its reconciler.
pub type SharedStore = Arc<RwLock<NotificationStore>>;

/// In-memory notification list for one session role.
///
/// Entries are kept in arrival order (head = most recent arrival); display
/// order is computed from timestamps. Every operation is idempotent with
/// respect to the notification id, and a read mark is never taken back.
/// Whether "read" means the shared `viewed` flag or the session user's entry
/// in `readBy` depends on the store's [`Reader`].
#[derive(Debug, Clone)]
pub struct NotificationStore {
    role: Role,
    reader: Reader,
    entries: Vec<Notification>,
}

impl NotificationStore {
    pub fn new(role: Role) -> Self {
        Self { role, reader: Reader::Shared, entries: Vec::new() }
    }

    pub fn with_reader(mut self, reader: Reader) -> Self {
        self.reader = reader;
        self
    }

    pub fn shared(role: Role) -> SharedStore {
        Self::new(role).into_shared()
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    /// Replace the whole list with a freshly fetched one.
    /// Duplicate ids keep their first occurrence.
    pub fn replace(&mut self, list: Vec<Notification>) {
        let mut seen = HashSet::with_capacity(list.len());
        self.entries = list
            .into_iter()
            .filter(|n| seen.insert(n.id.clone()))
            .collect();
    }

    /// Insert a pushed notification at the head.
    /// Returns false (and changes nothing) if the id is already present.
    pub fn prepend(&mut self, notification: Notification) -> bool {
        if self.contains(&notification.id) {
            return false;
        }
        self.entries.insert(0, notification);
        true
    }

    /// Returns true only when an unread entry was flipped.
    pub fn mark_viewed(&mut self, id: &NotificationId) -> bool {
        let reader = &self.reader;
        self.entries
            .iter_mut()
            .find(|n| &n.id == id)
            .is_some_and(|n| n.mark_read(reader))
    }

    pub fn mark_all_viewed(&mut self) -> usize {
        let reader = &self.reader;
        self.entries.iter_mut().map(|n| n.mark_read(reader)).filter(|&flipped| flipped).count()
    }

    pub fn is_read(&self, id: &NotificationId) -> bool {
        self.get(id).is_some_and(|n| n.is_read(&self.reader))
    }

    pub fn get(&self, id: &NotificationId) -> Option<&Notification> {
        self.entries.iter().find(|n| &n.id == id)
    }

    pub fn contains(&self, id: &NotificationId) -> bool {
        self.get(id).is_some()
    }

    /// Entries in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter()
    }

    /// Entries newest first by timestamp; ties keep arrival order.
    pub fn display(&self) -> Vec<&Notification> {
        let mut view: Vec<&Notification> = self.entries.iter().collect();
        view.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        view
    }

    pub fn unread(&self) -> usize {
        counter::count_unread(self.entries.iter(), &self.role, &self.reader)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
