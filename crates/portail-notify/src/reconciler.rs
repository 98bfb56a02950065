use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use portail_types::{NotificationId, Reader};

use crate::api::NotificationApi;
use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::store::{NotificationStore, SharedStore};

/// Keeps the backend's read state in line with the local store.
///
/// Marks are applied locally first and never rolled back. An id stays in the
/// in-flight set while its push is running and moves to the pending set if the
/// push still fails after the retry budget; [`flush_pending`](Self::flush_pending)
/// re-sends those. A reload re-applies both sets, so a mark the backend has not
/// confirmed yet survives the server's older copy.
///
/// Sessions with a per-user [`Reader`] use the `readBy` endpoints.
pub struct ReadStateReconciler {
    api: Arc<dyn NotificationApi>,
    store: SharedStore,
    session: Arc<Session>,
    retry: BackoffPolicy,
    in_flight: Mutex<BTreeSet<NotificationId>>,
    pending: Mutex<BTreeSet<NotificationId>>,
}

/// Holds an id in the in-flight set for the duration of one push. Dropped
/// unconfirmed (the caller gave up on the future) it parks the id as pending.
struct InFlight<'a> {
    reconciler: &'a ReadStateReconciler,
    id: &'a NotificationId,
    confirmed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.confirmed {
            self.reconciler.pending.lock().insert(self.id.clone());
        }
        self.reconciler.in_flight.lock().remove(self.id);
    }
}

impl ReadStateReconciler {
    pub fn new(api: Arc<dyn NotificationApi>, store: SharedStore, session: Arc<Session>, retry: BackoffPolicy) -> Self {
        Self {
            api,
            store,
            session,
            retry,
            in_flight: Mutex::new(BTreeSet::new()),
            pending: Mutex::new(BTreeSet::new()),
        }
    }

    /// Mark one notification as read.
    ///
    /// Returns `Ok(true)` when the backend was told, `Ok(false)` when there
    /// was nothing to do (unknown id, or already read and confirmed).
    pub async fn mark_as_read(&self, id: &NotificationId) -> Result<bool> {
        {
            let mut store = self.store.write();
            if !store.contains(id) {
                debug!("mark_as_read: unknown notification {}", id);
                return Ok(false);
            }
            let flipped = store.mark_viewed(id);
            if !flipped && !self.pending.lock().contains(id) {
                return Ok(false);
            }
            // registered under the store lock so a concurrent reload sees it
            self.in_flight.lock().insert(id.clone());
        }

        let mut guard = InFlight { reconciler: self, id, confirmed: false };
        let res = self.push(id).await;
        guard.confirmed = res.is_ok();
        drop(guard);
        res.map(|()| true)
    }

    async fn send(&self, id: &NotificationId) -> Result<()> {
        match self.session.reader() {
            Reader::Shared => self.api.mark_viewed(&self.session, id).await,
            Reader::Personnel(_) => self.api.mark_read_by(&self.session, id).await,
        }
    }

    /// Send one id to the backend with retries. On final failure the id is
    /// kept pending and the error returned.
    async fn push(&self, id: &NotificationId) -> Result<()> {
        let mut backoff = self.retry.start();
        loop {
            match self.send(id).await {
                Ok(()) => {
                    self.pending.lock().remove(id);
                    return Ok(());
                }
                Err(e) if e.is_retryable() => match backoff.next_delay() {
                    Some(delay) => {
                        warn!("Marking {} as read failed ({}), retrying in {:?}", id, e, delay);
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(self.give_up(id, e)),
                },
                Err(e) => return Err(self.give_up(id, e)),
            }
        }
    }

    fn give_up(&self, id: &NotificationId, err: Error) -> Error {
        error!("Could not mark notification {} as read: {}", id, err);
        self.pending.lock().insert(id.clone());
        err
    }

    /// Re-send every pending id. Returns how many the backend accepted; the
    /// first failure is returned after all ids were tried.
    pub async fn flush_pending(&self) -> Result<usize> {
        let ids: Vec<NotificationId> = self.pending.lock().iter().cloned().collect();
        if ids.is_empty() {
            return Ok(0);
        }
        info!("Re-sending {} pending read marks", ids.len());

        let mut sent = 0;
        let mut first_err = None;
        for id in &ids {
            match self.push(id).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(sent),
        }
    }

    /// Re-apply unconfirmed marks (pending or still in flight) after the
    /// store was reloaded from the backend.
    pub fn reapply_pending(&self, store: &mut NotificationStore) {
        for id in self.pending.lock().iter().chain(self.in_flight.lock().iter()) {
            store.mark_viewed(id);
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    pub fn pending(&self) -> Vec<NotificationId> {
        self.pending.lock().iter().cloned().collect()
    }

    /// Mark everything read on the backend, then locally.
    ///
    /// Returns the backend's updated count, or for per-user sessions (whose
    /// endpoint reports no count) the number of entries flipped locally.
    pub async fn mark_all_as_read(&self) -> Result<u64> {
        let updated = match self.session.reader() {
            Reader::Shared => {
                self.session.mark_all_request()?;
                Some(self.api.mark_all_read(&self.session).await?.updated_count)
            }
            Reader::Personnel(_) => {
                self.api.mark_all_read_by_user(&self.session).await?;
                None
            }
        };

        let flipped = self.store.write().mark_all_viewed();
        self.pending.lock().clear();
        let updated = updated.unwrap_or(flipped as u64);
        info!(
            "Marked all notifications read for {} (backend {}, local {})",
            self.session.role, updated, flipped
        );
        Ok(updated)
    }
}
