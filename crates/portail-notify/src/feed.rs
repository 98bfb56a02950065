use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use portail_types::{LiveEvent, Notification, NotificationId};

use crate::api::NotificationApi;
use crate::backoff::BackoffPolicy;
use crate::counter::UnreadCounter;
use crate::error::{Error, Result};
use crate::hub::{NotificationHub, Subscription};
use crate::reconciler::ReadStateReconciler;
use crate::session::Session;
use crate::store::{NotificationStore, SharedStore};

/// Notification list for one consumer (a page, a tray icon, a CLI run).
///
/// Owns its store, a live subscription pumped into the store by a background
/// task, and the read-state reconciler. Dropping the feed cancels in-flight
/// work and releases the subscription.
pub struct NotificationFeed {
    session: Arc<Session>,
    api: Arc<dyn NotificationApi>,
    store: SharedStore,
    counter: Arc<UnreadCounter>,
    /// Bumped after every store mutation
    revision: Arc<watch::Sender<u64>>,
    reconciler: ReadStateReconciler,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl NotificationFeed {
    /// Subscribe to the session's topic and start applying pushed events.
    pub fn open(
        session: Session,
        api: Arc<dyn NotificationApi>,
        hub: &NotificationHub,
        read_retry: BackoffPolicy,
    ) -> Result<Self> {
        let topic = session.topic()?;
        let mut feed = Self::detached(session, api, read_retry);

        let subscription = hub.subscribe(&topic);
        info!("Feed for {} listening on {}", feed.session.role, topic);
        feed.pump = Some(tokio::spawn(pump(
            subscription,
            feed.store.clone(),
            feed.counter.clone(),
            feed.revision.clone(),
            feed.cancel.clone(),
        )));
        Ok(feed)
    }

    /// A feed with no live updates; only `load` changes the list.
    pub fn detached(session: Session, api: Arc<dyn NotificationApi>, read_retry: BackoffPolicy) -> Self {
        let session = Arc::new(session);
        let store = NotificationStore::new(session.role.clone())
            .with_reader(session.reader())
            .into_shared();
        let reconciler = ReadStateReconciler::new(api.clone(), store.clone(), session.clone(), read_retry);
        Self {
            session,
            api,
            store,
            counter: Arc::new(UnreadCounter::new()),
            revision: Arc::new(watch::channel(0).0),
            reconciler,
            cancel: CancellationToken::new(),
            pump: None,
        }
    }

    /// Fetch the list and replace the store with it.
    ///
    /// On failure the store is left as it was. A fetch that completes after
    /// the feed was closed is discarded with `Error::Cancelled`.
    pub async fn load(&self) -> Result<usize> {
        let list = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            res = self.api.fetch(&self.session) => res?,
        };
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (len, unread) = {
            let mut store = self.store.write();
            store.replace(list);
            self.reconciler.reapply_pending(&mut store);
            (store.len(), self.counter.refresh(&store))
        };
        bump(&self.revision);
        info!("Loaded {} notifications ({} unread)", len, unread);

        if self.reconciler.has_pending() {
            if let Err(e) = self.reconciler.flush_pending().await {
                warn!("Pending read marks still not accepted: {}", e);
            }
        }
        Ok(len)
    }

    pub async fn mark_as_read(&self, id: &NotificationId) -> Result<bool> {
        let res = self.reconciler.mark_as_read(id).await;
        self.refresh_counter();
        res
    }

    pub async fn mark_all_as_read(&self) -> Result<u64> {
        let res = self.reconciler.mark_all_as_read().await;
        self.refresh_counter();
        res
    }

    pub async fn flush_pending(&self) -> Result<usize> {
        self.reconciler.flush_pending().await
    }

    pub fn pending(&self) -> Vec<NotificationId> {
        self.reconciler.pending()
    }

    /// Newest first.
    pub fn display(&self) -> Vec<Notification> {
        self.store.read().display().into_iter().cloned().collect()
    }

    pub fn unread(&self) -> usize {
        self.store.read().unread()
    }

    pub fn watch_unread(&self) -> watch::Receiver<usize> {
        self.counter.watch()
    }

    /// Wakes on every change to the list, including pushes that leave the
    /// unread count as it was.
    pub fn watch_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_live(&self) -> bool {
        self.pump.as_ref().is_some_and(|p| !p.is_finished())
    }

    /// Tear down: cancel in-flight work, release the subscription, clear
    /// the list.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
        self.store.write().clear();
        self.refresh_counter();
    }

    fn refresh_counter(&self) {
        let store = self.store.read();
        self.counter.refresh(&store);
        bump(&self.revision);
    }
}

impl Drop for NotificationFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Apply one live event. Returns true if the store changed.
pub fn apply_event(store: &mut NotificationStore, event: LiveEvent) -> bool {
    match event {
        LiveEvent::Created(notification) => {
            let id = notification.id.clone();
            let inserted = store.prepend(notification);
            if inserted {
                debug!("Pushed notification {}", id);
            } else {
                debug!("Ignoring duplicate push for {}", id);
            }
            inserted
        }
        LiveEvent::UnreadHint(count) => {
            debug!("Backend reports {} unread (local {})", count, store.unread());
            false
        }
    }
}

fn bump(revision: &watch::Sender<u64>) {
    revision.send_modify(|rev| *rev = rev.wrapping_add(1));
}

async fn pump(
    mut subscription: Subscription,
    store: SharedStore,
    counter: Arc<UnreadCounter>,
    revision: Arc<watch::Sender<u64>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = subscription.recv() => event,
        };
        let Some(event) = event else {
            warn!("Live updates for {} ended", subscription.topic());
            break;
        };

        let changed = {
            let mut guard = store.write();
            let changed = apply_event(&mut guard, event);
            if changed {
                counter.refresh(&guard);
            }
            changed
        };
        if changed {
            bump(&revision);
        }
    }
    debug!("Feed pump for {} stopped", subscription.topic());
}
